//! Certificates and scratch directories for the integration tests.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509NameBuilder, X509};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn mk_key() -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    PKey::from_ec_key(EcKey::generate(&group)?)
}

/// A self-signed CA certificate and its key.
pub fn mk_ca_cert(cn: &str) -> Result<(X509, PKey<Private>), ErrorStack> {
    let key_pair = mk_key()?;

    let mut x509_name = X509NameBuilder::new()?;
    x509_name.append_entry_by_text("CN", cn)?;
    let x509_name = x509_name.build();

    let mut cert_builder = X509::builder()?;
    cert_builder.set_version(2)?;
    let serial = serial_number()?.to_asn1_integer()?;
    cert_builder.set_serial_number(&serial)?;
    cert_builder.set_subject_name(&x509_name)?;
    cert_builder.set_issuer_name(&x509_name)?;
    cert_builder.set_pubkey(&key_pair)?;
    let not_before = Asn1Time::days_from_now(0)?;
    cert_builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(365)?;
    cert_builder.set_not_after(&not_after)?;
    cert_builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    cert_builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .build()?,
    )?;
    cert_builder.sign(&key_pair, MessageDigest::sha256())?;

    Ok((cert_builder.build(), key_pair))
}

/// A leaf certificate with subject `CN=cn`, signed by the given CA.
pub fn mk_ca_signed_cert(
    ca_cert: &X509,
    ca_key_pair: &PKey<Private>,
    cn: &str,
) -> Result<(X509, PKey<Private>), ErrorStack> {
    let key_pair = mk_key()?;

    let mut x509_name = X509NameBuilder::new()?;
    x509_name.append_entry_by_text("O", "iothub tests")?;
    x509_name.append_entry_by_text("CN", cn)?;
    let x509_name = x509_name.build();

    let mut cert_builder = X509::builder()?;
    cert_builder.set_version(2)?;
    let serial = serial_number()?.to_asn1_integer()?;
    cert_builder.set_serial_number(&serial)?;
    cert_builder.set_subject_name(&x509_name)?;
    cert_builder.set_issuer_name(ca_cert.subject_name())?;
    cert_builder.set_pubkey(&key_pair)?;
    let not_before = Asn1Time::days_from_now(0)?;
    cert_builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(365)?;
    cert_builder.set_not_after(&not_after)?;
    cert_builder.append_extension(BasicConstraints::new().build()?)?;
    cert_builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .build()?,
    )?;
    cert_builder.sign(ca_key_pair, MessageDigest::sha256())?;

    Ok((cert_builder.build(), key_pair))
}

fn serial_number() -> Result<BigNum, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

/// Scratch directory removed on drop.
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new(name: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "iothub-{}-{}-{}",
            name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, file: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.path.join(file);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// A CA plus a device certificate it signed, written out as PEM files.
pub struct DeviceCerts {
    pub dir: TestDir,
    pub ca_cert: X509,
    pub ca_pem: Vec<u8>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

pub fn device_certs(name: &str, cn: &str) -> DeviceCerts {
    let dir = TestDir::new(name);
    let (ca_cert, ca_key) = mk_ca_cert("iothub test root").unwrap();
    let (cert, key) = mk_ca_signed_cert(&ca_cert, &ca_key, cn).unwrap();

    let cert_path = dir.write("device.x509", cert.to_pem().unwrap());
    let key_path = dir.write("device.pem", key.private_key_to_pem_pkcs8().unwrap());
    let ca_pem = ca_cert.to_pem().unwrap();

    DeviceCerts {
        dir,
        ca_cert,
        ca_pem,
        cert_path,
        key_path,
    }
}
