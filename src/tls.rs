//! PEM certificate and key loading for the HTTPS gateway

use anyhow::Context;
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor from a PEM certificate chain and private key.
///
/// Uses the `ring` provider explicitly rather than the process default.
pub fn load_acceptor(cert_path: &str, key_path: &str) -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let tls_config = rustls::ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .context("TLS protocol setup failed")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .with_context(|| format!("certificate {} does not match key {}", cert_path, key_path))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// Every certificate in a PEM file, leaf first
pub fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path, "certificate")?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .with_context(|| format!("malformed PEM in TLS certificate {}", path))?;

    anyhow::ensure!(!certs.is_empty(), "TLS certificate {} holds no certificates", path);
    Ok(certs)
}

/// First PKCS#1, PKCS#8 or SEC1 private key in a PEM file
pub fn load_key(path: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path, "key")?;
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("malformed PEM in TLS key {}", path))?
        .with_context(|| format!("TLS key {} holds no private key", path))
}

fn open_pem(path: &str, what: &str) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open TLS {} {}", what, path))?;
    Ok(BufReader::new(file))
}
