use clap::Parser;
use log::{error, info};
use server::config::{Args, ServerConfig};
use server::relay::{self, SimCommand};
use server::simulation::Simulation;
use server::transport;

/// Parses command-line arguments, then runs the transport and simulation
/// schedulers side by side. Either scheduler failing is fatal for both.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::from_args(&args);

    let ((events_tx, events_rx), (commands_tx, commands_rx)) = relay::channel();
    let shutdown_tx = commands_tx.clone();

    let transport_handle = {
        let config = config.clone();
        tokio::spawn(async move { transport::run(config, events_tx, commands_rx).await })
    };

    let simulation_handle = {
        let simulation = Simulation::new(config);
        tokio::spawn(async move { simulation.run(events_rx, commands_tx).await })
    };

    tokio::select! {
        result = transport_handle => {
            match result {
                Ok(Ok(())) => {
                    info!("Transport scheduler stopped");
                }
                Ok(Err(err)) => {
                    error!("Transport scheduler failed: {}", err);
                    std::process::exit(1);
                }
                Err(err) => {
                    error!("Transport task panicked: {}", err);
                    std::process::exit(1);
                }
            }
        }
        result = simulation_handle => {
            match result {
                Ok(Ok(())) => {
                    info!("Simulation scheduler stopped");
                }
                Ok(Err(err)) => {
                    error!("Simulation scheduler failed: {}", err);
                    std::process::exit(1);
                }
                Err(err) => {
                    error!("Simulation task panicked: {}", err);
                    std::process::exit(1);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(SimCommand::Stop);
        }
    }

    Ok(())
}
