//! Expression-driven IoT device fleet simulator for MQTT brokers.
//!
//! This crate simulates a fleet of telemetry-producing devices. Payloads are
//! described by a small expression language (`sin`, `rand`, `delta`, row
//! index `x`, previous render `p`, ...), assembled through a composition
//! tree, rendered per device against a mutable environment, and published
//! over MQTT v3.1.1 or v5.0 at a configured rate. A subscribe workload
//! measures values back out of received payloads.
//!
//! # Usage
//! ```bash
//! # Publish: 100 devices, 10 messages/s each, two expression fields
//! mqtt-fleet-simulator publish --devices 100 --limit 10 \
//!     --field "temperature=30.0 + rand(-5.0, 5.0)" \
//!     --field "uptime=delta(start)"
//!
//! # Subscribe and measure a field from every received row
//! mqtt-fleet-simulator subscribe --topic "site0/#" --measure "x.temperature"
//!
//! # Measure broker round trips instead of acknowledgement latency
//! mqtt-fleet-simulator publish --devices 10 --trace --field "value=x"
//! ```

pub mod client;
pub mod composition;
pub mod config;
pub mod environment;
pub mod expression;
pub mod fleet;
pub mod formatter;
pub mod limiter;
pub mod outlet;
pub mod publisher;
pub mod registry;
pub mod renderer;
pub mod simulation;
pub mod subscriber;
pub mod topic;
pub mod tracer;
pub mod value;

pub use config::{FieldConfig, ProtocolVersion, SimulationConfig, SubscribeConfig};
pub use fleet::{generate_fleet, Device};
pub use simulation::{run_publish, run_subscribe};
pub use value::Value;
