//! Transport security
//!
//! TLS is handled by the protocol library. This module prepares what it
//! needs: PEM loading ([`TlsMaterial`]) and the self-signed certificate
//! used when only a key is configured ([`CertificateGenerator`]).

pub mod certificates;
pub mod tls;

pub use certificates::CertificateGenerator;
pub use tls::TlsMaterial;
