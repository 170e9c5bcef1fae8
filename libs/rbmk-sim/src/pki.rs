//! A minimal PKI for the simulator: one root CA, minted once and cached to
//! disk, and per-host leaf certificates issued on demand (§4.G "PKI").
//!
//! Grounded on the CA/leaf-certificate pattern in
//! `examples/other_examples/13a64197_ktheindifferent-AtlasDNS__src-dns-doq.rs.rs`,
//! adapted from that file's `rcgen`/`rustls` 0.2x-era API to the
//! `rcgen` 0.13 / `rustls` 0.23 / `rustls-pki-types` stack this workspace uses.

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, Issuer, KeyPair, KeyUsagePurpose, SanType};
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};

const CA_CERT_FILE: &str = "ca-cert.pem";
const CA_KEY_FILE: &str = "ca-key.pem";

#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error("failed to create PKI cache directory {0}: {1}")]
    CacheDir(std::path::PathBuf, #[source] std::io::Error),
    #[error("failed to read/write PKI cache file {0}: {1}")]
    CacheFile(std::path::PathBuf, #[source] std::io::Error),
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
}

/// A leaf certificate and its private key, ready to hand to a
/// `rustls::ServerConfig`.
pub struct LeafCert {
    pub cert_der: CertificateDer<'static>,
    pub key_der: PrivatePkcs8KeyDer<'static>,
}

/// The simulator's certificate authority: one self-signed root, cached to
/// disk across runs (§4.G: "files are read-only after creation").
pub struct RootCa {
    ca_der: CertificateDer<'static>,
    ca_key: KeyPair,
    ca_params: CertificateParams,
}

impl RootCa {
    /// Loads the cached root CA from `cache_dir`, minting and persisting a
    /// new one on first use.
    pub fn load_or_create(cache_dir: &Path) -> Result<Self, PkiError> {
        fs::create_dir_all(cache_dir).map_err(|e| PkiError::CacheDir(cache_dir.to_owned(), e))?;

        let cert_path = cache_dir.join(CA_CERT_FILE);
        let key_path = cache_dir.join(CA_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            let cert_pem = fs::read_to_string(&cert_path).map_err(|e| PkiError::CacheFile(cert_path.clone(), e))?;
            let key_pem = fs::read_to_string(&key_path).map_err(|e| PkiError::CacheFile(key_path.clone(), e))?;

            let ca_key = KeyPair::from_pem(&key_pem)?;
            let ca_params = CertificateParams::from_ca_cert_pem(&cert_pem)?;
            let ca_cert = ca_params.clone().self_signed(&ca_key)?;

            return Ok(Self {
                ca_der: ca_cert.der().clone(),
                ca_key,
                ca_params,
            });
        }

        let mut ca_params = CertificateParams::new(Vec::new())?;
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        ca_params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, "rbmk QA root");
            dn
        };

        let ca_key = KeyPair::generate()?;
        let ca_cert = ca_params.clone().self_signed(&ca_key)?;

        fs::write(&cert_path, ca_cert.pem()).map_err(|e| PkiError::CacheFile(cert_path.clone(), e))?;
        fs::write(&key_path, ca_key.serialize_pem()).map_err(|e| PkiError::CacheFile(key_path.clone(), e))?;

        Ok(Self {
            ca_der: ca_cert.der().clone(),
            ca_key,
            ca_params,
        })
    }

    /// Issues a leaf certificate for `host`/`ip`, signed by this root.
    pub fn issue_leaf(&self, host: &str, ip: IpAddr) -> Result<LeafCert, PkiError> {
        let mut params = CertificateParams::new(vec![host.to_owned()])?;
        params.subject_alt_names.push(SanType::IpAddress(ip));
        params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, host);
            dn
        };

        let issuer = Issuer::new(self.ca_params.clone(), &self.ca_key);
        let leaf_key = KeyPair::generate()?;
        let leaf_cert = params.signed_by(&leaf_key, &issuer)?;

        Ok(LeafCert {
            cert_der: leaf_cert.der().clone(),
            key_der: PrivatePkcs8KeyDer::from(leaf_key.serialize_der()),
        })
    }

    /// The root's own DER certificate, for building the client-side trust
    /// store the simulator hands to `Network::with_root_store`.
    pub fn root_cert_der(&self) -> CertificateDer<'static> {
        self.ca_der.clone()
    }

    pub fn root_store(&self) -> Arc<rustls::RootCertStore> {
        let mut store = rustls::RootCertStore::empty();
        let _ = store.add(self.root_cert_der());
        Arc::new(store)
    }
}

/// Builds a `rustls::ServerConfig` serving `leaf` with ALPN `alpn`.
pub fn server_tls_config(leaf: LeafCert, alpn: &[&str]) -> Result<rustls::ServerConfig, rustls::Error> {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![leaf.cert_der], leaf.key_der.into())?;

    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_certificate_carries_requested_host_and_ip() {
        let dir = known_dirs::qa_pki_cache_dir()
            .unwrap()
            .join(format!("test-{}", std::process::id()));
        let ca = RootCa::load_or_create(&dir).unwrap();

        let leaf = ca.issue_leaf("dns.google", "8.8.4.4".parse().unwrap()).unwrap();

        assert!(!leaf.cert_der.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }
}
