//! Mutual-TLS material for the IoT Hub connection.
//!
//! The trust pool is what the broker's server certificate is checked
//! against; the client identity is what the device presents to the hub.

use log::debug;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use rumqttc::TlsConfiguration;
use rustls_pemfile::Item;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

/// Root certificates used to validate the broker.
#[derive(Clone)]
pub struct TrustPool {
    certs: Vec<X509>,
}

impl TrustPool {
    /// Reads a PEM bundle, keeping every certificate that parses. Blocks of
    /// other types and unparsable certificates are skipped; an empty result
    /// is an error.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut pem_certs = Vec::new();
        reader.read_to_end(&mut pem_certs)?;

        let certs: Vec<X509> = rustls_pemfile::read_all(&mut pem_certs.as_slice())
            .filter_map(|item| match item {
                Ok(Item::X509Certificate(der)) => match X509::from_der(der.as_ref()) {
                    Ok(cert) => Some(cert),
                    Err(e) => {
                        debug!("skipping unparsable CA certificate: {}", e);
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => {
                    debug!("skipping malformed PEM section: {}", e);
                    None
                }
            })
            .collect();

        if certs.is_empty() {
            return Err(Error::ConfigError(
                "no certs were parsed from given CA certs".to_string(),
            ));
        }
        debug!("loaded {} CA certificate(s)", certs.len());

        Ok(Self { certs })
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        pem_chain(&self.certs)
    }
}

/// The device's certificate chain and the private key for its leaf.
#[derive(Clone)]
pub struct ClientIdentity {
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl ClientIdentity {
    pub fn load(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();
        let cert_pem = std::fs::read(cert_path).map_err(|e| Error::from_read(cert_path, e))?;
        let key_pem = std::fs::read(key_path).map_err(|e| Error::from_read(key_path, e))?;

        let chain = X509::stack_from_pem(&cert_pem).map_err(|e| {
            Error::ConfigError(format!("failed to load x509 key pair: certificate: {}", e))
        })?;
        if chain.is_empty() {
            return Err(Error::ConfigError(
                "failed to load x509 key pair: no certificate found".to_string(),
            ));
        }

        let key = PKey::private_key_from_pem(&key_pem).map_err(|e| {
            Error::ConfigError(format!("failed to load x509 key pair: private key: {}", e))
        })?;

        let public = chain[0].public_key().map_err(|e| {
            Error::ConfigError(format!("failed to load x509 key pair: public key: {}", e))
        })?;
        if !public.public_eq(&*key) {
            return Err(Error::ConfigError(
                "failed to load x509 key pair: private key does not match certificate".to_string(),
            ));
        }

        Ok(Self { chain, key })
    }

    pub fn certificate(&self) -> &X509 {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.key
    }
}

/// TLS settings for one client. Built fresh per client.
///
/// `min_version` and `verify_mode` are applied only by [`TlsConfig::connector`];
/// [`TlsConfig::to_transport`] hands over the certificates alone and leaves
/// protocol versions and server verification to rumqttc's rustls defaults.
#[derive(Clone)]
pub struct TlsConfig {
    roots: TrustPool,
    identity: ClientIdentity,
    min_version: SslVersion,
    verify_mode: SslVerifyMode,
}

impl TlsConfig {
    pub fn new(roots: TrustPool, identity: ClientIdentity) -> Self {
        Self {
            roots,
            identity,
            min_version: SslVersion::TLS1_2,
            verify_mode: SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
        }
    }

    pub fn roots(&self) -> &TrustPool {
        &self.roots
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn min_version(&self) -> SslVersion {
        self.min_version
    }

    pub fn verify_mode(&self) -> SslVerifyMode {
        self.verify_mode
    }

    /// An OpenSSL connector pinned to the trust pool and presenting the
    /// client identity.
    pub fn connector(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_min_proto_version(Some(self.min_version))?;
        builder.set_verify(self.verify_mode);

        let mut store = X509StoreBuilder::new()?;
        for cert in self.roots.certificates() {
            store.add_cert(cert.clone())?;
        }
        builder.set_cert_store(store.build());

        builder.set_certificate(self.identity.certificate())?;
        for cert in &self.identity.chain()[1..] {
            builder.add_extra_chain_cert(cert.clone())?;
        }
        builder.set_private_key(self.identity.private_key())?;
        builder.check_private_key()?;

        Ok(builder.build())
    }

    /// The same material in the shape the MQTT client's TLS transport takes.
    /// rustls only speaks TLS 1.2 and 1.3 and always verifies the server, so
    /// its defaults already meet `min_version` and `verify_mode`.
    pub fn to_transport(&self) -> Result<TlsConfiguration> {
        Ok(TlsConfiguration::Simple {
            ca: self.roots.to_pem()?,
            alpn: None,
            client_auth: Some((
                pem_chain(self.identity.chain())?,
                self.identity.private_key().private_key_to_pem_pkcs8()?,
            )),
        })
    }
}

fn pem_chain(certs: &[X509]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for cert in certs {
        out.extend_from_slice(&cert.to_pem()?);
    }
    Ok(out)
}
