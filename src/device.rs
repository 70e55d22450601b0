use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::identity::device_id_from_cert;

pub const AZURE_DEVICES_ENDPOINT: &str = "azure-devices.net";
pub const MQTT_TLS_PORT: u16 = 8883;

/// An MQTT server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
}

impl Broker {
    pub fn url(&self) -> String {
        format!("tls://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// An IoT Hub device.
///
/// Hub name and device ID end up in a DNS name and in topic paths, so they
/// must be plain ASCII tokens. That is not checked here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    hub_name: String,
    device_id: String,
    cert_path: PathBuf,
    priv_key_path: PathBuf,
}

impl Device {
    pub fn new(
        hub_name: impl Into<String>,
        device_id: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        priv_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hub_name: hub_name.into(),
            device_id: device_id.into(),
            cert_path: cert_path.into(),
            priv_key_path: priv_key_path.into(),
        }
    }

    /// Builds a device whose ID is the Common Name of its certificate.
    pub fn from_cert(
        hub_name: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        priv_key_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let cert_path = cert_path.into();
        let device_id = device_id_from_cert(&cert_path)?;
        Ok(Self::new(hub_name, device_id, cert_path, priv_key_path))
    }

    /// Loads a device description such as
    /// `{"hub_name": "...", "device_id": "...", "cert_path": "...", "priv_key_path": "..."}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| Error::from_read(path, e))?;
        serde_json::from_slice(&raw).map_err(|e| {
            Error::ConfigError(format!("invalid device file {}: {}", path.display(), e))
        })
    }

    pub fn hub_name(&self) -> &str {
        &self.hub_name
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn priv_key_path(&self) -> &Path {
        &self.priv_key_path
    }

    pub fn broker(&self) -> Broker {
        Broker {
            host: format!("{}.{}", self.hub_name, AZURE_DEVICES_ENDPOINT),
            port: MQTT_TLS_PORT,
        }
    }

    /// IoT Hub requires the client ID to be the device ID.
    pub fn client_id(&self) -> &str {
        &self.device_id
    }

    /// Username in the form IoT Hub expects for direct MQTT connections.
    pub fn username(&self) -> String {
        // IoT Hub docs suggest "{host}/{device}/?api-version=...", but with any
        // api-version appended the hub answers "Connection Refused: Server
        // Unavailable". Leave it out.
        format!("{}.{}/{}", self.hub_name, AZURE_DEVICES_ENDPOINT, self.device_id)
    }

    /// Wildcard topic on which cloud-to-device messages arrive.
    pub fn command_topic(&self) -> String {
        format!("/devices/{}/messages/devicebound/#", self.device_id)
    }

    /// Topic to publish device-to-cloud telemetry to.
    pub fn telemetry_topic(&self) -> String {
        format!("/devices/{}/messages/events", self.device_id)
    }
}
