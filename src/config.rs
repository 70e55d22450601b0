use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub hub_name: String,
    pub device_id: Option<String>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub device_file: Option<PathBuf>,
    pub ca_certs_path: PathBuf,

    pub keep_alive_secs: u64,
    pub telemetry_interval_ms: u64,
}

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Environment variable {0} is missing or invalid.")]
    MissingOrInvalid(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

impl Config {
    fn validate_timeouts(&self) -> Result<(), EnvError> {
        // IoT Hub drops connections with a keep-alive above 29 minutes.
        const MAX_KEEP_ALIVE_SECS: u64 = 29 * 60;
        const MIN_INTERVAL: u64 = 100;
        const MAX_INTERVAL: u64 = 3_600_000;

        if !(1..=MAX_KEEP_ALIVE_SECS).contains(&self.keep_alive_secs) {
            return Err(EnvError::ParsingError(format!(
                "IOTHUB_KEEP_ALIVE_SECS must be between 1 and {} s",
                MAX_KEEP_ALIVE_SECS
            )));
        }

        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&self.telemetry_interval_ms) {
            return Err(EnvError::ParsingError(format!(
                "IOTHUB_TELEMETRY_INTERVAL_MS must be between {} and {} ms",
                MIN_INTERVAL, MAX_INTERVAL
            )));
        }

        Ok(())
    }

    pub fn from_env() -> Result<Self, EnvError> {
        dotenv().ok(); // Load environment variables from .env file
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let device_file = non_empty("IOTHUB_DEVICE_FILE").map(PathBuf::from);

        // A device file replaces the individual device variables.
        let required = |key: &str| -> Result<String, EnvError> {
            match (non_empty(key), &device_file) {
                (Some(value), _) => Ok(value),
                (None, Some(_)) => Ok(String::new()),
                (None, None) => Err(EnvError::MissingOrInvalid(key.to_string())),
            }
        };

        let config = Self {
            hub_name: required("IOTHUB_HUB_NAME")?,
            device_id: non_empty("IOTHUB_DEVICE_ID"),
            cert_path: required("IOTHUB_CERT_PATH")?.into(),
            key_path: required("IOTHUB_KEY_PATH")?.into(),
            ca_certs_path: non_empty("IOTHUB_CA_CERTS_PATH")
                .unwrap_or_else(|| "roots.pem".to_string())
                .into(),
            device_file,

            keep_alive_secs: non_empty("IOTHUB_KEEP_ALIVE_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse::<u64>()
                .map_err(|_| {
                    EnvError::ParsingError("IOTHUB_KEEP_ALIVE_SECS must be a valid number".to_string())
                })?,
            telemetry_interval_ms: non_empty("IOTHUB_TELEMETRY_INTERVAL_MS")
                .unwrap_or_else(|| "5000".to_string())
                .parse::<u64>()
                .map_err(|_| {
                    EnvError::ParsingError(
                        "IOTHUB_TELEMETRY_INTERVAL_MS must be a valid number".to_string(),
                    )
                })?,
        };

        config.validate_timeouts()?;

        Ok(config)
    }

    /// Resolves the device: from the device file if one is configured,
    /// otherwise from the variables, reading the ID from the certificate when
    /// `IOTHUB_DEVICE_ID` is unset.
    pub fn device(&self) -> crate::Result<Device> {
        if let Some(path) = &self.device_file {
            return Device::from_json_file(path);
        }
        match &self.device_id {
            Some(id) => Ok(Device::new(
                &self.hub_name,
                id,
                &self.cert_path,
                &self.key_path,
            )),
            None => Device::from_cert(&self.hub_name, &self.cert_path, &self.key_path),
        }
    }
}
