use std::process::ExitCode;

use clap::Parser;
use ndkw_service::ServiceArgs;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ServiceArgs::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => log::warn!("Ctrl-C handler unavailable: {}", e),
            }
        });
    }

    match ndkw_service::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Service failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
