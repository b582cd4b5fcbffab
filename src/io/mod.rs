//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `http` - HTTP API and Prometheus metrics endpoint
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `mqtt_egress` - MQTT publisher for dispatch events

pub mod egress_channel;
pub mod http;
pub mod mqtt_egress;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, report_metrics, DispatchEventPayload, EgressSender};
pub use http::{start_http_server, HttpState};
pub use mqtt_egress::MqttPublisher;
