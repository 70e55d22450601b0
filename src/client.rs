//! MQTT client construction for an IoT Hub device.
//!
//! `Device::new_client` fills in the minimum IoT Hub needs to accept a
//! connection (client ID, username, TLS and broker address), then hands the
//! options to a [`ClientFactory`]. Connecting, publishing, subscribing and
//! acknowledgements are all the MQTT client's business.

use log::info;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS, Transport};
use std::fmt;
use std::io::Read;
use std::time::Duration;

use crate::device::{Broker, Device};
use crate::error::{Error, Result};
use crate::tls::{ClientIdentity, TlsConfig, TrustPool};

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Everything the MQTT client is built from. Options passed to
/// `Device::new_client` may change any of it.
#[derive(Clone)]
pub struct ClientOptions {
    pub broker: Broker,
    pub client_id: String,
    pub username: String,
    pub tls: TlsConfig,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub request_channel_capacity: usize,
    pub last_will: Option<LastWill>,
}

impl ClientOptions {
    pub fn broker_url(&self) -> String {
        self.broker.url()
    }

    pub fn to_mqtt_options(&self) -> Result<MqttOptions> {
        // rumqttc panics on these rather than returning an error.
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(Error::ConfigError(format!(
                "invalid client id {:?}",
                self.client_id
            )));
        }
        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            return Err(Error::ConfigError(format!(
                "keep alive must be at least 1s, got {:?}",
                self.keep_alive
            )));
        }

        let mut mqtt_options =
            MqttOptions::new(&self.client_id, &self.broker.host, self.broker.port);
        mqtt_options.set_credentials(&self.username, "");
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options.set_clean_session(self.clean_session);
        if let Some(will) = &self.last_will {
            mqtt_options.set_last_will(will.clone());
        }
        mqtt_options.set_transport(Transport::tls_with_config(self.tls.to_transport()?));
        Ok(mqtt_options)
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("broker", &self.broker.url())
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("tls", &"TlsConfig")
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("request_channel_capacity", &self.request_channel_capacity)
            .field("last_will", &self.last_will.as_ref().map(|w| &w.topic))
            .finish()
    }
}

/// A customization applied to the default options before the client is
/// built. Any closure `Fn(&Device, &mut ClientOptions) -> Result<()>` is one.
pub trait ClientOption {
    fn apply(&self, device: &Device, opts: &mut ClientOptions) -> Result<()>;
}

impl<F> ClientOption for F
where
    F: Fn(&Device, &mut ClientOptions) -> Result<()>,
{
    fn apply(&self, device: &Device, opts: &mut ClientOptions) -> Result<()> {
        self(device, opts)
    }
}

/// Builds the actual MQTT client from finished options.
pub trait ClientFactory {
    type Client;

    fn create(&self, options: ClientOptions) -> Result<Self::Client>;
}

/// Produces a rumqttc `AsyncClient` and the `EventLoop` that drives it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncClientFactory;

impl ClientFactory for AsyncClientFactory {
    type Client = (AsyncClient, EventLoop);

    fn create(&self, options: ClientOptions) -> Result<Self::Client> {
        let mqtt_options = options.to_mqtt_options()?;
        Ok(AsyncClient::new(mqtt_options, options.request_channel_capacity))
    }
}

impl Device {
    /// Creates an MQTT client for this device's hub using rumqttc.
    ///
    /// `ca_certs` is a PEM bundle of root CAs for the hub; as of Feb 2023 it
    /// must include DigiCert Global Root G2. Options run in order after the
    /// defaults are set and the first error aborts construction.
    pub fn new_client<R: Read>(
        &self,
        ca_certs: R,
        options: &[&dyn ClientOption],
    ) -> Result<(AsyncClient, EventLoop)> {
        self.new_client_with(&AsyncClientFactory, ca_certs, options)
    }

    pub fn new_client_with<F, R>(
        &self,
        factory: &F,
        ca_certs: R,
        options: &[&dyn ClientOption],
    ) -> Result<F::Client>
    where
        F: ClientFactory,
        R: Read,
    {
        let opts = self.client_options(ca_certs, options)?;
        info!(
            "Creating MQTT client '{}' for broker {}",
            opts.client_id,
            opts.broker_url()
        );
        factory.create(opts)
    }

    /// The options `new_client` would build the client from.
    pub fn client_options<R: Read>(
        &self,
        ca_certs: R,
        options: &[&dyn ClientOption],
    ) -> Result<ClientOptions> {
        let roots = TrustPool::from_reader(ca_certs)?;
        let identity = ClientIdentity::load(self.cert_path(), self.priv_key_path())?;

        let mut opts = ClientOptions {
            broker: self.broker(),
            client_id: self.client_id().to_string(),
            username: self.username(),
            tls: TlsConfig::new(roots, identity),
            keep_alive: DEFAULT_KEEP_ALIVE,
            clean_session: true,
            request_channel_capacity: DEFAULT_REQUEST_CHANNEL_CAPACITY,
            last_will: None,
        };

        for option in options {
            option.apply(self, &mut opts)?;
        }

        Ok(opts)
    }
}

/// Sets the keep-alive interval. IoT Hub allows up to 29 minutes.
pub fn keep_alive(interval: Duration) -> impl ClientOption {
    move |_: &Device, opts: &mut ClientOptions| {
        if interval < Duration::from_secs(1) {
            return Err(Error::ConfigError(format!(
                "keep alive must be at least 1s, got {:?}",
                interval
            )));
        }
        opts.keep_alive = interval;
        Ok(())
    }
}

pub fn clean_session(clean: bool) -> impl ClientOption {
    move |_: &Device, opts: &mut ClientOptions| {
        opts.clean_session = clean;
        Ok(())
    }
}

/// Capacity of the channel between `AsyncClient` and its event loop.
pub fn request_channel_capacity(capacity: usize) -> impl ClientOption {
    move |_: &Device, opts: &mut ClientOptions| {
        if capacity == 0 {
            return Err(Error::ConfigError(
                "request channel capacity must be positive".to_string(),
            ));
        }
        opts.request_channel_capacity = capacity;
        Ok(())
    }
}

/// Publishes `payload` to the device's telemetry topic if the connection is
/// lost without a clean disconnect.
pub fn telemetry_will(payload: impl Into<Vec<u8>>) -> impl ClientOption {
    let payload: Vec<u8> = payload.into();
    move |device: &Device, opts: &mut ClientOptions| {
        opts.last_will = Some(LastWill::new(
            device.telemetry_topic(),
            payload.clone(),
            QoS::AtLeastOnce,
            false,
        ));
        Ok(())
    }
}
