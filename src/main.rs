//! Rafiki CLI, a typed infrastructure synthesizer.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "rafiki",
    version,
    about = "Synthesize the VPC, ECS-on-EC2 and CloudFront stacks into a CloudFormation assembly"
)]
struct Cli {
    /// Log composition and synthesis at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: rafiki::cli::Commands,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = rafiki::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
