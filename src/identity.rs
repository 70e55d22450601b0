use openssl::nid::Nid;
use openssl::x509::X509;
use rustls_pemfile::Item;
use std::path::Path;

use crate::error::{Error, Result};

/// Reads the Common Name from a PEM-encoded X.509 certificate, which is
/// taken to be the device ID.
pub fn device_id_from_cert(cert_path: impl AsRef<Path>) -> Result<String> {
    let cert_path = cert_path.as_ref();
    let cert_bytes = std::fs::read(cert_path).map_err(|e| Error::from_read(cert_path, e))?;

    // Only the first PEM section counts, and it has to be a certificate.
    let item = rustls_pemfile::read_one(&mut cert_bytes.as_slice())
        .map_err(|e| Error::DecodeError(e.to_string()))?
        .ok_or_else(|| Error::DecodeError("no PEM block found".to_string()))?;
    let der = match item {
        Item::X509Certificate(der) => der,
        _ => {
            return Err(Error::DecodeError(
                "first PEM block is not a CERTIFICATE".to_string(),
            ))
        }
    };

    let cert = X509::from_der(der.as_ref()).map_err(|e| Error::ParseError(e.to_string()))?;
    common_name(&cert)
}

pub(crate) fn common_name(cert: &X509) -> Result<String> {
    let entry = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .ok_or_else(|| Error::ParseError("certificate subject has no common name".to_string()))?;

    entry
        .data()
        .to_string()
        .map_err(|e| Error::ParseError(e.to_string()))
}
