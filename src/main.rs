//! StamPLC MQTT command client
//!
//! Sends RPC commands to a StamPLC GPS tracker over MQTT, matches each
//! command to its asynchronously delivered response, and prints the result.
//! Can also monitor the device's telemetry and attribute streams.

mod config;
mod error;
mod protocol;
mod rpc;
mod session;
mod transport;

use clap::{Parser, Subcommand};
use config::ClientConfig;
use protocol::{RpcResponse, RpcStatus};
use serde_json::{json, Map, Value};
use session::{SessionEvent, SessionEvents, SessionManager};
use std::time::Duration;
use transport::MqttConnector;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "stamplc-client")]
#[command(about = "MQTT command and telemetry client for StamPLC GPS trackers")]
#[command(version)]
struct Cli {
    /// MQTT broker address
    #[arg(long, default_value = "127.0.0.1")]
    broker: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// MQTT username
    #[arg(long)]
    username: Option<String>,

    /// MQTT password
    #[arg(long)]
    password: Option<String>,

    /// Response timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get current GPS position
    Gps,
    /// Get device statistics
    Stats,
    /// Get device logs
    Logs {
        /// Number of log lines to fetch
        #[arg(long, default_value_t = 50)]
        lines: u32,
        /// Log type filter
        #[arg(long, default_value = "all")]
        log_type: String,
    },
    /// Update device configuration
    Config {
        /// GPS publish interval (ms)
        #[arg(long)]
        gps_interval: Option<u64>,
        /// MQTT broker host the device should use
        #[arg(long)]
        mqtt_host: Option<String>,
        /// MQTT broker port the device should use
        #[arg(long)]
        mqtt_port: Option<u16>,
        /// Cellular APN
        #[arg(long)]
        apn: Option<String>,
    },
    /// Trigger an OTA firmware update
    Ota {
        /// Firmware image URL
        url: String,
        /// Firmware version
        version: String,
        /// Firmware MD5 hash
        #[arg(long)]
        md5: Option<String>,
    },
    /// Reboot the device
    Reboot {
        /// Delay before reboot (ms)
        #[arg(long, default_value_t = 5000)]
        delay: u64,
    },
    /// Set a reporting interval
    Interval {
        /// Interval type
        #[arg(value_parser = ["gps_publish", "stats_publish"])]
        kind: String,
        /// Interval value (ms)
        value_ms: u64,
    },
    /// Monitor all device messages
    Monitor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let config = ClientConfig {
        broker_host: cli.broker.clone(),
        broker_port: cli.port,
        username: cli.username.clone(),
        password: cli.password.clone(),
        request_timeout: Duration::from_secs(cli.timeout),
        ..Default::default()
    };

    info!(broker = %config.broker_host, port = config.broker_port, "connecting");

    let connector = MqttConnector::new(&config);
    let mut session = SessionManager::new(config, Box::new(connector));
    let mut events = session.connect().await?;

    let result = run_command(&cli.command, &session, &mut events).await;
    session.disconnect().await;
    result
}

async fn run_command(
    command: &Command,
    session: &SessionManager,
    events: &mut SessionEvents,
) -> anyhow::Result<()> {
    if let Command::Monitor = command {
        monitor(events).await;
        return Ok(());
    }

    let client = session.client()?;
    match command {
        Command::Gps => print_gps(&client.get_gps().await?),
        Command::Stats => print_stats(&client.get_stats().await?),
        Command::Logs { lines, log_type } => {
            print_logs(&client.get_logs(*lines, log_type).await?);
        }
        Command::Config {
            gps_interval,
            mqtt_host,
            mqtt_port,
            apn,
        } => {
            let mut fields = Map::new();
            if let Some(interval) = gps_interval {
                fields.insert("gps_interval".into(), json!(interval));
            }
            if let Some(host) = mqtt_host {
                fields.insert("mqtt_host".into(), json!(host));
            }
            if let Some(port) = mqtt_port {
                fields.insert("mqtt_port".into(), json!(port));
            }
            if let Some(apn) = apn {
                fields.insert("apn".into(), json!(apn));
            }
            if fields.is_empty() {
                warn!("no configuration fields given, nothing to update");
                return Ok(());
            }
            print_config_update(&client.config_update(fields).await?);
        }
        Command::Ota { url, version, md5 } => {
            info!(%url, %version, "starting OTA update");
            print_ota(&client.ota_update(url, version, md5.as_deref()).await?);
        }
        Command::Reboot { delay } => print_reboot(&client.reboot(*delay).await?),
        Command::Interval { kind, value_ms } => {
            print_interval(kind, &client.set_interval(kind, *value_ms).await?);
        }
        Command::Monitor => unreachable!("handled above"),
    }
    Ok(())
}

/// Print the device's error and return None unless the command succeeded
fn success_data(response: &RpcResponse) -> Option<&Value> {
    match response.status {
        RpcStatus::Success => response.data.as_ref(),
        RpcStatus::Pending => {
            println!("Command accepted, still in progress on the device");
            None
        }
        RpcStatus::Error => {
            println!(
                "Device reported an error: {}",
                response.error.as_deref().unwrap_or("unknown")
            );
            None
        }
    }
}

fn print_gps(response: &RpcResponse) {
    if let Some(data) = success_data(response) {
        println!("GPS position:");
        println!("  latitude:   {}", data["latitude"]);
        println!("  longitude:  {}", data["longitude"]);
        println!("  altitude:   {} m", data["altitude"]);
        println!("  satellites: {}", data["satellites"]);
        println!("  valid:      {}", data["valid"]);
    }
}

fn print_stats(response: &RpcResponse) {
    if let Some(data) = success_data(response) {
        println!("Device statistics:");
        println!(
            "{}",
            serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
        );
    }
}

fn print_logs(response: &RpcResponse) {
    if let Some(data) = success_data(response) {
        println!("Device logs:");
        match &data["logs"] {
            Value::String(logs) => println!("{logs}"),
            other => println!("{other}"),
        }
    }
}

fn print_config_update(response: &RpcResponse) {
    if let Some(data) = success_data(response) {
        println!("Configuration updated:");
        println!("  updated fields:   {}", data["updated"]);
        println!("  restart required: {}", data["restart_required"]);
    }
}

fn print_ota(response: &RpcResponse) {
    match response.status {
        RpcStatus::Success => {
            println!("OTA update accepted, device will reboot shortly");
        }
        _ => {
            let _ = success_data(response);
        }
    }
}

fn print_reboot(response: &RpcResponse) {
    if let Some(data) = success_data(response) {
        println!("Reboot scheduled: {}", data["message"]);
    }
}

fn print_interval(kind: &str, response: &RpcResponse) {
    if let Some(data) = success_data(response) {
        println!("Interval updated:");
        println!("  type:     {kind}");
        println!("  previous: {} ms", data["previous_value"]);
        println!("  new:      {} ms", data["new_value"]);
    }
}

/// Print telemetry and attribute messages until the session closes or
/// Ctrl+C is pressed
async fn monitor(events: &mut SessionEvents) {
    info!("monitoring device messages, press Ctrl+C to stop");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Telemetry(value)) => {
                    println!(
                        "[telemetry] {}",
                        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
                    );
                }
                Some(SessionEvent::Attributes(value)) => {
                    println!(
                        "[attributes] {}",
                        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
                    );
                }
                Some(SessionEvent::Closed { reason }) => {
                    warn!(%reason, "session closed");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("stopping monitor");
                break;
            }
        }
    }
}
