//! TLS configuration helpers.
//!
//! Both MQTT legs authenticate with the device's self-signed certificate.
//! The hub leg always verifies the server, against Mozilla's root store
//! unless explicit CA certificates are configured; the provisioning leg
//! verifies only when asked to (see
//! [`ProvisionConfig::verify_provisioning_tls`](crate::config::ProvisionConfig)).
//! The management API is reached over a plain server-verified HTTPS client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::tokio_rustls::rustls;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

use crate::cert::CertificatePaths;
use crate::error::{ProvisionError, Result};

/// How an MQTT leg checks the broker's certificate.
#[derive(Clone, PartialEq, Eq)]
pub enum ServerVerification {
    /// Verify against Mozilla's root CA store (webpki-roots).
    WebPki,

    /// Verify against explicit CA certificates (PEM-encoded).
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate.
    ///
    /// **WARNING**: the handshake signature is still checked but the chain
    /// and hostname are not.
    Disabled,
}

impl std::fmt::Debug for ServerVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::Disabled => write!(f, "Disabled"),
        }
    }
}

impl ServerVerification {
    /// Map a "verify" flag to a verification mode.
    pub fn from_flag(verify: bool) -> Self {
        if verify { Self::WebPki } else { Self::Disabled }
    }

    /// Returns true if the server certificate chain is checked.
    pub fn is_verifying(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// PEM certificate chain and private key presented by the device.
#[derive(Clone)]
pub struct DeviceIdentity {
    /// PEM-encoded certificate chain, device certificate first.
    pub cert_pem: Vec<u8>,

    /// PEM-encoded private key.
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl DeviceIdentity {
    /// Create a device identity from PEM-encoded data.
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Read a device identity from certificate and key files.
    pub async fn from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_pem = tokio::fs::read(cert_path).await?;
        let key_pem = tokio::fs::read(key_path).await?;
        Ok(Self { cert_pem, key_pem })
    }

    /// Read the identity written by certificate generation.
    pub async fn load(paths: &CertificatePaths) -> Result<Self> {
        Self::from_files(&paths.cert, &paths.key).await
    }
}

/// Build the HTTPS client used for the provisioning service management API.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .use_rustls_tls()
        .tls_built_in_root_certs(true)
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .user_agent(crate::USER_AGENT)
        .build()
        .map_err(|e| ProvisionError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Build a rustls client configuration for an MQTT leg.
///
/// The device certificate is always presented for client authentication.
pub fn build_mqtt_tls_config(
    identity: &DeviceIdentity,
    verification: &ServerVerification,
) -> Result<Arc<ClientConfig>> {
    let (certs, key) = parse_device_identity(identity)?;

    let builder = match verification {
        ServerVerification::WebPki => {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder().with_root_certificates(root_store)
        }
        ServerVerification::Explicit(ca_certs) => {
            let mut root_store = rustls::RootCertStore::empty();
            for ca_pem in ca_certs {
                for cert in parse_pem_certificates(ca_pem)? {
                    root_store
                        .add(cert)
                        .map_err(|e| ProvisionError::tls(format!("Failed to add CA cert: {}", e)))?;
                }
            }
            ClientConfig::builder().with_root_certificates(root_store)
        }
        ServerVerification::Disabled => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new())),
    };

    let tls_config = builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| ProvisionError::tls(format!("Failed to configure client auth: {}", e)))?;

    Ok(Arc::new(tls_config))
}

/// Server certificate verifier that accepts any chain and hostname.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self {
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Parse PEM-encoded certificates.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect();

    if certs.is_empty() {
        return Err(ProvisionError::invalid_pem("No certificates found in PEM data"));
    }

    Ok(certs)
}

/// Parse a PEM-encoded private key.
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(ProvisionError::invalid_pem(format!("Failed to parse PEM: {}", e)));
            }
        }
    }

    Err(ProvisionError::invalid_pem("No private key found in PEM data"))
}

fn parse_device_identity(
    identity: &DeviceIdentity,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = parse_pem_certificates(&identity.cert_pem)?;
    let key = parse_pem_private_key(&identity.key_pem)?;
    Ok((certs, key))
}
