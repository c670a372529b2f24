// src/main.rs - silvia-host entry point
use clap::Parser;

use silvia_rs::config::{self, Config};
use silvia_rs::hardware;
use silvia_rs::machine::Machine;

#[derive(Parser)]
#[command(name = "silvia-host", about = "Espresso machine boiler controller")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(default_value = "silvia.toml")]
    config: String,

    /// Run against simulated hardware instead of the Pi's GPIO.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting silvia-rs boiler host");

    let args = Args::parse();
    let config = if std::path::Path::new(&args.config).exists() {
        config::load_config(&args.config).map_err(|e| {
            tracing::error!("Failed to load config from '{}': {}", args.config, e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?
    } else if args.simulate {
        tracing::warn!("No config file at '{}', simulating with defaults", args.config);
        Config::default()
    } else {
        tracing::error!("Configuration file '{}' not found", args.config);
        return Err(format!("configuration file '{}' not found", args.config).into());
    };

    tracing::info!(
        "Setpoint {} °C, schedule {} ({} - {})",
        config.control.brew_temp,
        if config.schedule.enabled { "on" } else { "off" },
        config.schedule.wake_time,
        config.schedule.sleep_time,
    );

    let devices = if args.simulate {
        hardware::sim::build(&config)
    } else {
        hardware::gpio::build(&config)?
    };

    let machine = Machine::new(config, devices)?;
    let (tasks, watchdog) = machine.start().await?;

    // The watchdog owns the rest of the process lifetime; it returns only
    // after tearing every loop down with the heater off.
    watchdog.run(tasks).await;

    tracing::info!("silvia-rs exiting");
    Ok(())
}
