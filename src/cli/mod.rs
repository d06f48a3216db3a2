//! RK-016: CLI subcommands: init, validate, synth, diff, list.

use crate::core::app::App;
use crate::core::assembly::CloudAssembly;
use crate::core::error::{Error, Result};
use crate::core::{parser, planner, types};
use crate::stacks;
use clap::Subcommand;
use std::path::{Path, PathBuf};

/// Config file picked up when `-f` is not given.
pub const DEFAULT_CONFIG: &str = "rafiki.yaml";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default rafiki.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate rafiki.yaml without synthesizing
    Validate {
        /// Path to rafiki.yaml (defaults apply when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Compose all stacks and write the cloud assembly
    Synth {
        /// Path to rafiki.yaml (defaults apply when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,
    },

    /// Show what changed since the last synth
    Diff {
        /// Path to rafiki.yaml (defaults apply when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output directory holding the previous assembly
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,
    },

    /// List stacks in deployment order
    List {
        /// Path to rafiki.yaml (defaults apply when absent)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(file.as_deref()),
        Commands::Synth { file, out } => cmd_synth(file.as_deref(), &out),
        Commands::Diff { file, out } => cmd_diff(file.as_deref(), &out),
        Commands::List { file } => cmd_list(file.as_deref()),
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: rafiki

# Account and region fall back to CDK_DEFAULT_ACCOUNT / CDK_DEFAULT_REGION
env: {}

network:
  stack_name: VpcStack
  cidr: 10.0.0.0/16
  max_azs: 2
  nat_gateways: 1
  subnets:
    - name: ServerPrivate
      type: private_with_egress
      cidr_mask: 24
    - name: ServerPublic
      type: public
      cidr_mask: 24
      map_public_ip_on_launch: true

compute:
  stack_name: WebSocketEcsStack
  cluster_name: websocket-service
  instance_type: t3.micro
  min_capacity: 1
  max_capacity: 1
  container:
    name: websocket-service
    image_path: assets/container-image
    memory_mib: 512
    port: 8080
  load_balancer:
    listener_port: 80
    open: true

edge:
  stack_name: DistributionStack
  default_root_object: index.html
  price_class: PriceClass_100
  logging: false
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG);
    if config_path.exists() {
        return Err(Error::io(
            format!("cannot initialize {}", path.display()),
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", config_path.display()),
            ),
        ));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| Error::io(format!("cannot create {}", path.display()), e))?;
    std::fs::write(&config_path, INIT_TEMPLATE)
        .map_err(|e| Error::io(format!("cannot write {}", config_path.display()), e))?;

    println!("Initialized rafiki project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

/// Explicit file, else `rafiki.yaml` in the working directory if present.
fn config_path(file: Option<&Path>) -> Option<PathBuf> {
    match file {
        Some(f) => Some(f.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            default.exists().then_some(default)
        }
    }
}

/// Directory asset paths in the config are relative to.
fn asset_base(path: Option<&Path>) -> PathBuf {
    path.and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn cmd_validate(file: Option<&Path>) -> Result<()> {
    let path = config_path(file);
    let config = match &path {
        Some(p) => parser::parse_config_file(p)?,
        None => types::AppConfig::default(),
    };
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} (3 stacks, {} subnet tiers x {} AZs)",
            config.name,
            config.network.subnets.len(),
            config.network.max_azs
        );
        Ok(())
    } else {
        Err(Error::Validation(
            errors.into_iter().map(|e| e.message).collect(),
        ))
    }
}

/// Load, compose and synthesize.
fn synthesize(file: Option<&Path>) -> Result<CloudAssembly> {
    let path = config_path(file);
    let config = parser::load(path.as_deref())?;
    let mut app = App::from_env(&config.env);
    stacks::compose_at(&mut app, &config, &asset_base(path.as_deref()))?;
    app.synth()
}

fn cmd_synth(file: Option<&Path>, out: &Path) -> Result<()> {
    let assembly = synthesize(file)?;
    let written = assembly.write(out)?;

    println!("Synthesized {} stack(s) to {}", assembly.stacks.len(), out.display());
    for stack in &assembly.stacks {
        println!("  {} {}", stack.name, stack.hash);
    }
    println!("Assembly: {}", assembly.hash());
    tracing::info!(files = written.len(), out = %out.display(), "assembly written");
    Ok(())
}

fn cmd_diff(file: Option<&Path>, out: &Path) -> Result<()> {
    let assembly = synthesize(file)?;
    let plan = planner::plan(&assembly, out)?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::DiffPlan) {
    println!("Diff: {} resources", plan.changes.len());
    println!();

    let mut current_stack = String::new();
    for change in &plan.changes {
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            println!("{}:", current_stack);
        }
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!(
            "  {} {} ({})",
            symbol, change.logical_id, change.resource_type
        );
    }

    println!();
    println!(
        "Diff: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_list(file: Option<&Path>) -> Result<()> {
    let assembly = synthesize(file)?;
    for stack in &assembly.stacks {
        let deps = if stack.dependencies.is_empty() {
            "-".to_string()
        } else {
            stack.dependencies.join(", ")
        };
        println!(
            "{}  {}  resources={}  depends-on={}",
            stack.name,
            stack.environment,
            stack.template.resources.len(),
            deps
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assembly;

    /// Project directory with a config and the container image it points at.
    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let image = dir.path().join("assets/container-image");
        std::fs::create_dir_all(&image).unwrap();
        std::fs::write(image.join("Dockerfile"), "FROM nginx:1.27-alpine\n").unwrap();
        let config = dir.path().join(DEFAULT_CONFIG);
        (dir, config)
    }

    #[test]
    fn test_rk016_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("new-project");
        cmd_init(&sub).unwrap();
        assert!(sub.join(DEFAULT_CONFIG).exists());
    }

    #[test]
    fn test_rk016_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG), "exists").unwrap();
        let err = cmd_init(dir.path()).unwrap_err();
        match &err {
            Error::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists)
            }
            other => panic!("expected an io error, got {:?}", other),
        }
        assert!(err.to_string().contains("already exists"));
        assert!(!err.to_string().contains("validation error"));
        let kept = std::fs::read_to_string(dir.path().join(DEFAULT_CONFIG)).unwrap();
        assert_eq!(kept, "exists");
    }

    #[test]
    fn test_rk016_init_template_is_default_config() {
        let config = parser::parse_config(INIT_TEMPLATE).unwrap();
        assert!(parser::validate_config(&config).is_empty());
        assert_eq!(config, types::AppConfig::default());
    }

    #[test]
    fn test_rk016_validate_valid() {
        let (_dir, config) = project();
        cmd_validate(Some(&config)).unwrap();
    }

    #[test]
    fn test_rk016_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join(DEFAULT_CONFIG);
        std::fs::write(
            &config,
            r#"
version: "2.0"
compute:
  min_capacity: 5
  max_capacity: 1
"#,
        )
        .unwrap();
        let err = cmd_validate(Some(&config)).unwrap_err();
        match err {
            Error::Validation(messages) => assert!(messages.len() >= 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_rk016_synth_writes_assembly() {
        let (dir, config) = project();
        let out = dir.path().join("cdk.out");
        cmd_synth(Some(&config), &out).unwrap();
        assert!(out.join("VpcStack.template.json").exists());
        assert!(out.join("WebSocketEcsStack.template.json").exists());
        assert!(out.join("WebSocketEcsStack.assets.json").exists());
        assert!(out.join("DistributionStack.template.json").exists());
        let manifest = assembly::load_manifest(&out).unwrap().unwrap();
        let names: Vec<_> = manifest.artifacts.keys().cloned().collect();
        assert_eq!(names, vec!["VpcStack", "WebSocketEcsStack", "DistributionStack"]);
    }

    #[test]
    fn test_rk016_synth_twice_identical() {
        let (dir, config) = project();
        let out = dir.path().join("cdk.out");
        cmd_synth(Some(&config), &out).unwrap();
        let first = std::fs::read(out.join("manifest.json")).unwrap();
        cmd_synth(Some(&config), &out).unwrap();
        let second = std::fs::read(out.join("manifest.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rk016_synth_missing_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let err = cmd_synth(
            Some(&dir.path().join(DEFAULT_CONFIG)),
            &dir.path().join("cdk.out"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Asset { .. }));
    }

    #[test]
    fn test_rk016_diff_after_synth_is_empty() {
        let (dir, config) = project();
        let out = dir.path().join("cdk.out");
        cmd_synth(Some(&config), &out).unwrap();
        let assembly = synthesize(Some(&config)).unwrap();
        let plan = planner::plan(&assembly, &out).unwrap();
        assert!(plan.is_empty());
        assert!(plan.unchanged > 0);
        cmd_diff(Some(&config), &out).unwrap();
    }

    #[test]
    fn test_rk016_diff_detects_config_change() {
        let (dir, config) = project();
        let out = dir.path().join("cdk.out");
        cmd_synth(Some(&config), &out).unwrap();

        let yaml = std::fs::read_to_string(&config)
            .unwrap()
            .replace("logging: false", "logging: true");
        std::fs::write(&config, yaml).unwrap();

        let assembly = synthesize(Some(&config)).unwrap();
        let plan = planner::plan(&assembly, &out).unwrap();
        assert_eq!(plan.to_create, 1);
        assert_eq!(plan.to_update, 1);
        let created = plan
            .changes
            .iter()
            .find(|c| c.action == types::PlanAction::Create)
            .unwrap();
        assert_eq!(created.resource_type, "AWS::S3::Bucket");
    }

    #[test]
    fn test_rk016_list() {
        let (_dir, config) = project();
        cmd_list(Some(&config)).unwrap();
    }

    #[test]
    fn test_rk016_asset_base() {
        assert_eq!(asset_base(None), PathBuf::from("."));
        assert_eq!(asset_base(Some(Path::new("rafiki.yaml"))), PathBuf::from("."));
        assert_eq!(
            asset_base(Some(Path::new("/srv/app/rafiki.yaml"))),
            PathBuf::from("/srv/app")
        );
    }
}
