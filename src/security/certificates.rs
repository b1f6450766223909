//! Self-signed certificate generation
//!
//! When TLS is required and only a key is configured, a throwaway
//! certificate is minted at startup. It only has to survive the TLS
//! handshake, so its lifetime defaults to a minute.

use anyhow::{Context, Result};
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, KeyPair};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Certificate generator
pub struct CertificateGenerator;

impl CertificateGenerator {
    fn params(common_name: &str, validity: Duration) -> CertificateParams {
        let mut params = CertificateParams::default();

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name);
        params.distinguished_name = distinguished_name;

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::seconds(validity.as_secs() as i64);
        params
    }

    /// Generate a new key and a certificate for it
    ///
    /// Returns `(cert_pem, key_pem)`.
    pub fn generate_self_signed(common_name: &str, validity: Duration) -> Result<(String, String)> {
        info!("Generating self-signed certificate for '{}'", common_name);

        let mut params = Self::params(common_name, validity);

        let key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)
            .context("Failed to generate key pair")?;
        params.key_pair = Some(key_pair);

        let cert = Certificate::from_params(params).context("Failed to generate certificate")?;
        let cert_pem = cert
            .serialize_pem()
            .context("Failed to serialize certificate")?;
        let key_pem = cert.serialize_private_key_pem();

        Ok((cert_pem, key_pem))
    }

    /// Certificate for an existing PEM private key
    pub fn generate_for_key(key_pem: &str, common_name: &str, validity: Duration) -> Result<String> {
        debug!("Generating certificate for configured key, CN '{}'", common_name);

        let key_pair = KeyPair::from_pem(key_pem).context("Failed to parse private key")?;
        let mut params = Self::params(common_name, validity);
        params.alg = key_pair
            .compatible_algs()
            .next()
            .context("No signature algorithm for private key")?;
        params.key_pair = Some(key_pair);

        let cert = Certificate::from_params(params).context("Failed to generate certificate")?;
        cert.serialize_pem()
            .context("Failed to serialize certificate")
    }

    /// Generate a key and certificate and write them as PEM files
    pub fn generate_and_save(
        common_name: &str,
        validity: Duration,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<()> {
        if cert_path.exists() || key_path.exists() {
            warn!("Certificate or key file already exists, will overwrite");
        }

        let (cert_pem, key_pem) = Self::generate_self_signed(common_name, validity)?;

        if let Some(parent) = cert_path.parent() {
            fs::create_dir_all(parent).context("Failed to create certificate directory")?;
        }
        if let Some(parent) = key_path.parent() {
            fs::create_dir_all(parent).context("Failed to create key directory")?;
        }

        fs::write(cert_path, cert_pem.as_bytes()).context("Failed to write certificate")?;
        fs::write(key_path, key_pem.as_bytes()).context("Failed to write private key")?;

        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(key_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(key_path, perms)?;
        }

        info!("Certificate written to {}", cert_path.display());
        Ok(())
    }
}
