//! RK-006: Cloud assembly. Synthesized templates, asset manifests and the
//! top-level manifest, written atomically to an output directory.

use super::error::{Error, Result};
use super::hasher;
use super::template::Template;
use super::types::Environment;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0";
const STACK_ARTIFACT: &str = "aws:cloudformation:stack";

/// A container image built from a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    /// Content hash of the source directory (bare hex)
    pub id: String,
    /// Source directory as configured
    pub directory: String,
    pub dockerfile: String,
    pub repository_name: String,
    pub image_tag: String,
}

impl ImageAsset {
    /// Hash `dir` and describe the image it builds. The directory must
    /// exist and contain a `Dockerfile`.
    pub fn from_directory(dir: &Path, repository_name: &str) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::Asset {
                path: dir.to_path_buf(),
                reason: "image directory does not exist".to_string(),
            });
        }
        if !dir.join("Dockerfile").is_file() {
            return Err(Error::Asset {
                path: dir.to_path_buf(),
                reason: "no Dockerfile in image directory".to_string(),
            });
        }
        let hash = hasher::hash_directory(dir)?;
        let id = hasher::bare(&hash).to_string();
        Ok(Self {
            image_tag: id.clone(),
            id,
            directory: dir.to_string_lossy().replace('\\', "/"),
            dockerfile: "Dockerfile".to_string(),
            repository_name: repository_name.to_string(),
        })
    }
}

/// One stack after synthesis.
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub name: String,
    pub environment: Environment,
    pub dependencies: Vec<String>,
    pub template: Template,
    /// Rendered template JSON
    pub body: String,
    /// BLAKE3 of `body`
    pub hash: String,
    pub assets: Vec<ImageAsset>,
}

/// All synthesized stacks, in deployment order.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    pub stacks: Vec<SynthesizedStack>,
}

/// `manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub artifacts: IndexMap<String, ArtifactEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEntry {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub environment: String,
    pub template_file: String,
    pub template_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_file: Option<String>,
}

/// `<Stack>.assets.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub version: String,
    pub docker_images: IndexMap<String, DockerImageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerImageEntry {
    pub source: DockerImageSource,
    pub destination: DockerImageDestination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerImageSource {
    pub directory: String,
    pub dockerfile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerImageDestination {
    pub repository_name: String,
    pub image_tag: String,
}

impl SynthesizedStack {
    pub fn template_file(&self) -> String {
        format!("{}.template.json", self.name)
    }

    pub fn assets_file(&self) -> Option<String> {
        (!self.assets.is_empty()).then(|| format!("{}.assets.json", self.name))
    }

    pub fn asset_manifest(&self) -> AssetManifest {
        AssetManifest {
            version: MANIFEST_VERSION.to_string(),
            docker_images: self
                .assets
                .iter()
                .map(|a| {
                    (
                        a.id.clone(),
                        DockerImageEntry {
                            source: DockerImageSource {
                                directory: a.directory.clone(),
                                dockerfile: a.dockerfile.clone(),
                            },
                            destination: DockerImageDestination {
                                repository_name: a.repository_name.clone(),
                                image_tag: a.image_tag.clone(),
                            },
                        },
                    )
                })
                .collect(),
        }
    }
}

impl CloudAssembly {
    pub fn stack(&self, name: &str) -> Option<&SynthesizedStack> {
        self.stacks.iter().find(|s| s.name == name)
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            version: MANIFEST_VERSION.to_string(),
            artifacts: self
                .stacks
                .iter()
                .map(|s| {
                    (
                        s.name.clone(),
                        ArtifactEntry {
                            artifact_type: STACK_ARTIFACT.to_string(),
                            environment: s.environment.to_string(),
                            template_file: s.template_file(),
                            template_hash: s.hash.clone(),
                            dependencies: s.dependencies.clone(),
                            assets_file: s.assets_file(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Hash over every stack's template hash, in deployment order.
    pub fn hash(&self) -> String {
        let hashes: Vec<&str> = self.stacks.iter().map(|s| s.hash.as_str()).collect();
        hasher::composite_hash(&hashes)
    }

    /// Find the stack exporting `export_name` and the exported value.
    pub fn resolve_export(&self, export_name: &str) -> Option<(&str, &Value)> {
        self.stacks.iter().find_map(|s| {
            s.template
                .outputs
                .values()
                .find(|o| o.export.as_ref().is_some_and(|e| e.name == export_name))
                .map(|o| (s.name.as_str(), &o.value))
        })
    }

    /// Write every template, asset manifest and `manifest.json` into `dir`.
    /// Files of stacks that disappeared since the last write are removed,
    /// as are asset manifests of stacks that no longer carry assets.
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("cannot create dir {}", dir.display()), e))?;

        if let Some(previous) = load_manifest(dir)? {
            for (name, entry) in &previous.artifacts {
                let current = self.stack(name);
                if current.is_none() {
                    tracing::info!(stack = %name, "removing stale artifact");
                    remove_if_exists(&dir.join(&entry.template_file))?;
                }
                let Some(assets) = &entry.assets_file else {
                    continue;
                };
                if current.and_then(SynthesizedStack::assets_file).as_ref() != Some(assets) {
                    tracing::info!(stack = %name, file = %assets, "removing stale asset manifest");
                    remove_if_exists(&dir.join(assets))?;
                }
            }
        }

        let mut written = Vec::new();
        for stack in &self.stacks {
            let path = dir.join(stack.template_file());
            write_atomic(&path, &stack.body)?;
            written.push(path);

            if let Some(file) = stack.assets_file() {
                let path = dir.join(file);
                let body = serde_json::to_string_pretty(&stack.asset_manifest())?;
                write_atomic(&path, &body)?;
                written.push(path);
            }
        }

        let path = dir.join(MANIFEST_FILE);
        write_atomic(&path, &serde_json::to_string_pretty(&self.manifest())?)?;
        written.push(path);
        Ok(written)
    }
}

/// Load `manifest.json` from an output directory, if present.
pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::io(format!("cannot read {}", path.display()), e))?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Load a previously written stack template, if present.
pub fn load_template(dir: &Path, stack: &str) -> Result<Option<Template>> {
    let path = dir.join(format!("{}.template.json", stack));
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::io(format!("cannot read {}", path.display()), e))?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Write to a temp file, then rename over the target.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    std::fs::write(&tmp_path, content)
        .map_err(|e| Error::io(format!("cannot write {}", tmp_path.display()), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        Error::io(
            format!("cannot rename {} → {}", tmp_path.display(), path.display()),
            e,
        )
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("cannot remove {}", path.display()), e)),
    }
}
