//! CLI entry point for the MQTT fleet simulator.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mqtt_fleet_simulator::registry::LatencySummary;
use mqtt_fleet_simulator::{
    run_publish, run_subscribe, FieldConfig, ProtocolVersion, SimulationConfig, SubscribeConfig,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mqtt-fleet-simulator")]
#[command(about = "Simulates a fleet of IoT devices publishing expression-driven telemetry")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish telemetry from a simulated device fleet
    Publish {
        /// Broker hostname
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Broker port
        #[arg(short = 'P', long, default_value = "1883")]
        port: u16,

        /// MQTT protocol version
        #[arg(long, value_enum, default_value = "v3")]
        protocol: ProtocolVersion,

        /// Number of devices to simulate
        #[arg(short, long, default_value = "10")]
        devices: usize,

        /// Site name, substituted into topics and visible to expressions
        #[arg(short, long, default_value = "site0")]
        site: String,

        /// Topic pattern; {site} and {id} are substituted per device
        #[arg(short, long, default_value = "{site}/{id}/telemetry")]
        topic: String,

        /// QoS level (0, 1, or 2)
        #[arg(short, long, default_value = "1")]
        qos: u8,

        /// Set the retain flag on publishes
        #[arg(long)]
        retain: bool,

        /// Maximum publishes per device per period
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Rate limiter period in seconds
        #[arg(long, default_value = "1")]
        period: u64,

        /// Rows rendered into each published payload
        #[arg(short, long, default_value = "1")]
        renders: usize,

        /// Measure broker round trips: each device subscribes to its own
        /// topic and the summary reports publish-to-delivery latency
        #[arg(long)]
        trace: bool,

        /// Duration in seconds; runs until Ctrl-C when omitted
        #[arg(short = 'D', long)]
        duration: Option<u64>,

        /// Payload field as name=expression; repeatable
        #[arg(short, long = "field", required = true)]
        fields: Vec<String>,
    },

    /// Subscribe to a topic filter and measure received payloads
    Subscribe {
        /// Broker hostname
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Broker port
        #[arg(short = 'P', long, default_value = "1883")]
        port: u16,

        /// MQTT protocol version
        #[arg(long, value_enum, default_value = "v3")]
        protocol: ProtocolVersion,

        /// Topic filter to subscribe to (supports + and #)
        #[arg(short, long, default_value = "#")]
        topic: String,

        /// QoS level for the subscription
        #[arg(short, long, default_value = "1")]
        qos: u8,

        /// Expression evaluated against each received row (bound to x)
        #[arg(short, long)]
        measure: Option<String>,

        /// Duration in seconds; runs until Ctrl-C when omitted
        #[arg(short = 'D', long)]
        duration: Option<u64>,
    },
}

/// Parses a `name=expression` field argument.
fn parse_field(raw: &str) -> Result<FieldConfig> {
    match raw.split_once('=') {
        Some((name, expression)) if !name.trim().is_empty() => Ok(FieldConfig {
            name: name.trim().to_string(),
            expression: expression.to_string(),
        }),
        _ => bail!("invalid field {raw:?}, expected name=expression"),
    }
}

fn print_summary(label: &str, summary: &LatencySummary) {
    if summary.count == 0 {
        info!("{label}: no observations recorded");
        return;
    }
    info!(
        count = summary.count,
        min_us = summary.min_us,
        mean_us = summary.mean_us,
        p50_us = summary.p50_us,
        p95_us = summary.p95_us,
        p99_us = summary.p99_us,
        max_us = summary.max_us,
        "{label}"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Publish {
            host,
            port,
            protocol,
            devices,
            site,
            topic,
            qos,
            retain,
            limit,
            period,
            renders,
            trace,
            duration,
            fields,
        } => {
            let fields = fields
                .iter()
                .map(|raw| parse_field(raw))
                .collect::<Result<Vec<_>>>()?;
            let config = SimulationConfig {
                broker_host: host,
                broker_port: port,
                protocol,
                device_count: devices,
                site,
                topic_pattern: topic,
                qos,
                retain,
                limit,
                period: Duration::from_secs(period),
                renders_per_publish: renders,
                trace,
                duration: duration.map(Duration::from_secs),
                fields,
            };
            let label = if config.trace {
                "broker round-trip latency"
            } else {
                "publish acknowledgement latency"
            };

            let summary = run_publish(config, cancel)
                .await
                .context("publish workload failed")?;
            print_summary(label, &summary);
        }

        Commands::Subscribe {
            host,
            port,
            protocol,
            topic,
            qos,
            measure,
            duration,
        } => {
            let config = SubscribeConfig {
                broker_host: host,
                broker_port: port,
                protocol,
                topic,
                qos,
                measure,
                duration: duration.map(Duration::from_secs),
            };

            let summary = run_subscribe(config, cancel)
                .await
                .context("subscribe workload failed")?;
            print_summary("measured values", &summary);
        }
    }

    Ok(())
}
