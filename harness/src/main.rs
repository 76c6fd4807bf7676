use clap::Parser;
use harness::config::DevRunConfig;
use harness::container::{detect_runtime, CliEngine, ContainerRuntime};
use harness::orchestrator::{DevRunOptions, Orchestrator};
use harness::shutdown::stop_on_ctrl_c;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "docker-run")]
#[command(about = "Build the afterglow dev image and run the site inside it")]
struct Cli {
    /// Remove and rebuild the dev image even if it exists
    #[arg(long)]
    force: bool,
    /// Install packages and build the site
    #[arg(long)]
    build: bool,
    /// Start the router from the build output
    #[arg(long)]
    run: bool,
    /// TOML file overriding the built-in settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Container runtime to use instead of auto-detection
    #[arg(long, value_parser = ["docker", "podman"])]
    runtime: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DevRunConfig::load(path)?,
        None => DevRunConfig::default(),
    };
    if let Some(runtime) = cli.runtime {
        config = config.with_runtime(runtime);
    }
    config.validate()?;

    let runtime = match config.container_runtime()? {
        Some(runtime) => runtime,
        None => detect_runtime(),
    };
    if runtime == ContainerRuntime::None {
        warn!("Neither podman nor docker was found on PATH");
    }
    let engine = CliEngine::new(runtime)?;
    info!("Using {}", engine.runtime().command());

    let host_dir = config.resolved_host_dir()?;
    let config = config.with_context_under(&host_dir);
    let orchestrator = Orchestrator::new(&engine, config, host_dir);

    let options = DevRunOptions {
        force: cli.force,
        build: cli.build,
        run: cli.run,
    };

    let mut stop = stop_on_ctrl_c();
    let mut stdout = tokio::io::stdout();
    let report = orchestrator.execute(options, &mut stdout, &mut stop).await?;

    info!(
        "Image {:?}, {} command(s) run",
        report.image,
        report.runs.len()
    );
    if !report.all_succeeded() {
        warn!("Some commands exited with a non-zero status");
    }

    Ok(())
}
