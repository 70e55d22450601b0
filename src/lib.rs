//! Helpers for talking to Azure IoT Hub over MQTT.
//!
//! Handles TLS configuration and authentication for a device, and builds the
//! fully-qualified topics IoT Hub uses for telemetry and cloud-to-device
//! messages. The MQTT client itself is rumqttc.

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod identity;
pub mod tls;

pub use client::{AsyncClientFactory, ClientFactory, ClientOption, ClientOptions};
pub use config::{Config, EnvError};
pub use device::{Broker, Device};
pub use error::{Error, Result};
pub use identity::device_id_from_cert;
pub use tls::{ClientIdentity, TlsConfig, TrustPool};
