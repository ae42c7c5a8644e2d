use clap::Parser;
use pageprobe::{exit_code, setup_logging, CdpEngine, Cli, Orchestrator};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    setup_logging(args.verbose);

    info!("pageprobe v{}", env!("CARGO_PKG_VERSION"));

    // configuration failures exit before any page interaction
    let config = match args.load_config().await {
        Ok(config) => config,
        Err(e) => {
            error!("configuration failed: {e}");
            std::process::exit(exit_code::CONFIG_FAILED);
        }
    };

    let engine = match CdpEngine::launch(&config).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("browser launch failed: {e}");
            std::process::exit(exit_code::ERROR);
        }
    };

    let orchestrator = Orchestrator::new(config, engine);
    let code = orchestrator.run().await;
    std::process::exit(code);
}
