//! TLS material for the protocol library
//!
//! The backend does not terminate TLS itself; it loads and checks the PEM
//! files and hands DER blobs to the protocol library's peer factory.

use anyhow::{bail, Context, Result};
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::certificates::CertificateGenerator;
use crate::config::SecurityConfig;

/// Certificate chain and private key, DER encoded
#[derive(Clone)]
pub struct TlsMaterial {
    cert_chain: Vec<Vec<u8>>,
    private_key: Vec<u8>,
    self_signed: bool,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("certificates", &self.cert_chain.len())
            .field("self_signed", &self.self_signed)
            .finish_non_exhaustive()
    }
}

impl TlsMaterial {
    /// Parse PEM-encoded certificate chain and key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert_chain = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
            .map(|cert| cert.map(|c| c.as_ref().to_vec()))
            .collect::<std::io::Result<Vec<_>>>()
            .context("Failed to parse certificate")?;
        if cert_chain.is_empty() {
            bail!("No certificates found");
        }

        let private_key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
            .context("Failed to parse private key")?
            .map(|key| key.secret_der().to_vec())
            .context("No private key found")?;

        Ok(Self {
            cert_chain,
            private_key,
            self_signed: false,
        })
    }

    /// Load PEM files
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        debug!("Loading TLS material from {:?} and {:?}", cert_path, key_path);

        let cert_pem = std::fs::read(cert_path)
            .with_context(|| format!("Failed to read certificate {}", cert_path.display()))?;
        let key_pem = std::fs::read(key_path)
            .with_context(|| format!("Failed to read private key {}", key_path.display()))?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Material for a key file with a freshly generated certificate
    pub fn self_signed_for_key(
        key_path: &Path,
        common_name: &str,
        validity: Duration,
    ) -> Result<Self> {
        let key_pem = std::fs::read_to_string(key_path)
            .with_context(|| format!("Failed to read private key {}", key_path.display()))?;
        let cert_pem = CertificateGenerator::generate_for_key(&key_pem, common_name, validity)?;

        let mut material = Self::from_pem(cert_pem.as_bytes(), key_pem.as_bytes())?;
        material.self_signed = true;
        Ok(material)
    }

    /// Resolve the material a connection needs
    ///
    /// Connection-local transports may run without TLS; everything else
    /// needs at least a key. A missing certificate is generated.
    pub fn resolve(security: &SecurityConfig, local_transport: bool) -> Result<Option<Self>> {
        match (&security.server_cert, &security.server_key) {
            (Some(cert), Some(key)) => {
                info!("Using TLS certificate {}", cert.display());
                Self::from_files(cert, key).map(Some)
            }
            (None, Some(key)) => {
                info!(
                    "No TLS certificate configured, generating one for CN '{}'",
                    security.self_signed_common_name
                );
                Self::self_signed_for_key(
                    key,
                    &security.self_signed_common_name,
                    Duration::from_secs(security.self_signed_validity_secs),
                )
                .map(Some)
            }
            (Some(_), None) => bail!("TLS certificate configured without a private key"),
            (None, None) if local_transport || security.rdp_key.is_some() => Ok(None),
            (None, None) => bail!("TLS is required: configure server_key or rdp_key"),
        }
    }

    /// DER certificate chain, leaf first
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.cert_chain
    }

    /// DER private key
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// Whether the certificate was generated at startup
    pub fn is_self_signed(&self) -> bool {
        self.self_signed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_pair(dir: &TempDir) -> (PathBuf, PathBuf) {
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        CertificateGenerator::generate_and_save("weston", Duration::from_secs(60), &cert, &key)
            .unwrap();
        (cert, key)
    }

    #[test]
    fn test_from_files() {
        let dir = TempDir::new().unwrap();
        let (cert, key) = write_pair(&dir);

        let material = TlsMaterial::from_files(&cert, &key).unwrap();
        assert_eq!(material.certificates().len(), 1);
        assert!(!material.private_key().is_empty());
        assert!(!material.is_self_signed());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(TlsMaterial::from_pem(b"nothing here", b"nor here").is_err());
    }

    #[test]
    fn test_resolve_key_only_generates_certificate() {
        let dir = TempDir::new().unwrap();
        let (_, key) = write_pair(&dir);
        let security = SecurityConfig {
            server_key: Some(key),
            ..SecurityConfig::default()
        };

        let material = TlsMaterial::resolve(&security, false).unwrap().unwrap();
        assert!(material.is_self_signed());
    }

    #[test]
    fn test_resolve_without_keys() {
        let security = SecurityConfig::default();
        assert!(TlsMaterial::resolve(&security, true).unwrap().is_none());
        assert!(TlsMaterial::resolve(&security, false).is_err());

        let rdp_only = SecurityConfig {
            rdp_key: Some(PathBuf::from("/etc/rdp.key")),
            ..SecurityConfig::default()
        };
        assert!(TlsMaterial::resolve(&rdp_only, false).unwrap().is_none());
    }
}
