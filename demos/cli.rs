use anyhow::{Context, Result};
use std::{env, process, sync::Arc};
use zeromatch::{ChannelFlowHandler, ZeroConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zeromatch=debug")),
        )
        .init();

    // 1. --- Load Configuration ---
    let args: Vec<String> = env::args().collect();

    // Expecting 2 arguments: program name + 1 path argument
    if args.len() != 2 {
        eprintln!("Usage: {} <path>", args[0]);
        process::exit(1);
    }

    let config_path = &args[1];
    println!("Loading configuration from '{}'...", config_path);
    let config = ZeroConfig::load(config_path)?;
    println!(
        "Configuration loaded: {} match rules, {} HomeKit models.",
        config.match_rules.len(),
        config.homekit_models.len()
    );

    // 2. --- Set up Communication Channel ---
    // Every discovery flow the library creates lands in this channel.
    let (handler, mut flows) = ChannelFlowHandler::new();

    // 3. --- Start Discovery ---
    let mut discovery =
        zeromatch::start(&config, Arc::new(handler)).context("start zeroconf discovery")?;
    println!("\n--- Listening for zeroconf services ---");
    println!("Press Ctrl+C to exit.");

    // 4. --- Print Flows Until Interrupted ---
    loop {
        tokio::select! {
            flow = flows.recv() => {
                let Some(flow) = flow else { break };
                println!("{}", serde_json::to_string_pretty(&flow)?);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    discovery.stop().await?;
    zeromatch::mdns::shutdown_shared_listener()?;
    println!("Shutdown complete");
    Ok(())
}
