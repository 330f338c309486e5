//! Configuration structs for the fleet simulator.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// MQTT protocol version spoken by the simulated clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V3,
    V5,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3 => write!(f, "v3.1.1"),
            ProtocolVersion::V5 => write!(f, "v5.0"),
        }
    }
}

/// One payload field: a name and the expression that produces its value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub expression: String,
}

/// Configuration for the publish workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Broker hostname
    pub broker_host: String,

    /// Broker port
    pub broker_port: u16,

    /// Protocol version for every client in the fleet
    pub protocol: ProtocolVersion,

    /// Number of devices to simulate
    pub device_count: usize,

    /// Site name, available to expressions and topic patterns
    pub site: String,

    /// Topic pattern; `{site}` and `{id}` are substituted per device
    pub topic_pattern: String,

    /// QoS level for publishes (0, 1, or 2)
    pub qos: u8,

    /// Retain flag for publishes
    pub retain: bool,

    /// Maximum publishes per device per period
    pub limit: u32,

    /// Rate limiter period
    pub period: Duration,

    /// Rows rendered into each published payload
    pub renders_per_publish: usize,

    /// Measure broker round trips: each device also subscribes to its own
    /// topic and the summary reports publish-to-delivery latency instead of
    /// acknowledgement latency
    pub trace: bool,

    /// How long to run; `None` runs until interrupted
    pub duration: Option<Duration>,

    /// Payload fields rendered for every row
    pub fields: Vec<FieldConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            protocol: ProtocolVersion::V3,
            device_count: 1,
            site: "site0".to_string(),
            topic_pattern: "{site}/{id}/telemetry".to_string(),
            qos: 1,
            retain: false,
            limit: 10,
            period: Duration::from_secs(1),
            renders_per_publish: 1,
            trace: false,
            duration: None,
            fields: Vec::new(),
        }
    }
}

/// Configuration for the subscribe workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeConfig {
    /// Broker hostname
    pub broker_host: String,

    /// Broker port
    pub broker_port: u16,

    /// Protocol version
    pub protocol: ProtocolVersion,

    /// Topic filter to subscribe to (supports `+` and `#`)
    pub topic: String,

    /// QoS level for the subscription
    pub qos: u8,

    /// Expression evaluated against each received row, with the row bound to
    /// `x`; numeric results feed the latency summary. `None` just logs.
    pub measure: Option<String>,

    /// How long to run; `None` runs until interrupted
    pub duration: Option<Duration>,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            protocol: ProtocolVersion::V3,
            topic: "#".to_string(),
            qos: 1,
            measure: None,
            duration: None,
        }
    }
}
