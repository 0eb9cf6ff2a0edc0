// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Device certificate generation.
//!
//! Produces the self-signed client identity a device presents on both MQTT
//! legs and that is registered with the provisioning service:
//!
//! - RSA key (4096 bits by default), written unencrypted as PKCS#8 PEM
//! - X.509 certificate signed with SHA-256 RSA, valid for 365 days
//! - subject `CN=<device id>`, extended key usage `clientAuth`,
//!   `basicConstraints CA:FALSE`
//!
//! Files land at `<dir>/<device id>-cert.pem` and `<dir>/<device id>-key.pem`
//! and are overwritten when the same identity is provisioned again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use const_oid::db::rfc4519::CN;
use der::DecodePem;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use rustls_pki_types::PrivatePkcs8KeyDer;

use crate::error::{ProvisionError, Result};
use crate::identity::DeviceId;

/// Default RSA modulus size.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Default certificate lifetime.
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// Location of a device's certificate and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    /// PEM certificate.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

impl CertificatePaths {
    /// Deterministic paths for a device inside `dir`.
    pub fn for_device(dir: impl AsRef<Path>, device_id: &DeviceId) -> Self {
        let dir = dir.as_ref();
        Self {
            cert: dir.join(format!("{}-cert.pem", device_id)),
            key: dir.join(format!("{}-key.pem", device_id)),
        }
    }

    /// Returns true if both files are present.
    pub fn exist(&self) -> bool {
        self.cert.is_file() && self.key.is_file()
    }
}

/// PEM encoded certificate and private key.
#[derive(Clone)]
pub struct DeviceCertificate {
    /// PEM certificate.
    pub cert_pem: String,
    /// PEM PKCS#8 private key.
    pub key_pem: String,
}

impl std::fmt::Debug for DeviceCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCertificate")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Builder for a self-signed device client certificate.
///
/// # Example
///
/// ```no_run
/// use device_provisioner::cert::DeviceCertBuilder;
///
/// let generated = DeviceCertBuilder::new("device-simulator-1a2b3c4d")
///     .build()
///     .expect("Failed to generate certificate");
/// println!("{}", generated.cert_pem);
/// ```
#[derive(Debug, Clone)]
pub struct DeviceCertBuilder {
    common_name: String,
    key_bits: usize,
    validity_days: i64,
}

impl DeviceCertBuilder {
    /// Create a builder for the given subject common name.
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            key_bits: DEFAULT_KEY_BITS,
            validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }

    /// Set the RSA modulus size (2048, 3072 or 4096).
    pub fn key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// Set the certificate lifetime in days.
    pub fn validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// Generate the key pair and self-sign the certificate.
    ///
    /// This is CPU bound; RSA-4096 generation can take several seconds.
    pub fn build(self) -> Result<DeviceCertificate> {
        if !matches!(self.key_bits, 2048 | 3072 | 4096) {
            return Err(ProvisionError::certificate_generation(format!(
                "Unsupported RSA key size: {} bits (supported: 2048, 3072, 4096)",
                self.key_bits
            )));
        }
        if self.validity_days <= 0 {
            return Err(ProvisionError::certificate_generation(
                "validity must be at least one day",
            ));
        }

        let key_pair = generate_rsa_key_pair(self.key_bits)?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name);
        params.distinguished_name = dn;

        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.serial_number = Some(random_serial());

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(self.validity_days);

        let cert = params.self_signed(&key_pair).map_err(|e| {
            ProvisionError::certificate_generation(format!("Failed to sign certificate: {}", e))
        })?;

        Ok(DeviceCertificate {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }
}

fn generate_rsa_key_pair(bits: usize) -> Result<KeyPair> {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, bits).map_err(|e| {
        ProvisionError::certificate_generation(format!("Failed to generate RSA key: {}", e))
    })?;

    let pkcs8 = private_key.to_pkcs8_der().map_err(|e| {
        ProvisionError::certificate_generation(format!("Failed to encode RSA key: {}", e))
    })?;
    let key_der = PrivatePkcs8KeyDer::from(pkcs8.as_bytes().to_vec());

    KeyPair::from_pkcs8_der_and_sign_algo(&key_der, &rcgen::PKCS_RSA_SHA256).map_err(|e| {
        ProvisionError::certificate_generation(format!("Failed to load RSA key: {}", e))
    })
}

fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    // Keep the DER INTEGER positive and non-zero.
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::from_slice(&bytes)
}

/// Generate a certificate pair for `device_id` into `dir` with the default profile.
///
/// Creates `dir` if needed. Generation runs on a blocking worker and is
/// abandoned with [`ProvisionError::CertificateTimeout`] once `timeout`
/// elapses.
pub async fn generate_device_certificates(
    device_id: &DeviceId,
    dir: impl AsRef<Path>,
    timeout: Duration,
) -> Result<CertificatePaths> {
    generate_with_builder(
        DeviceCertBuilder::new(device_id.as_str()),
        device_id,
        dir,
        timeout,
    )
    .await
}

/// Generate a certificate pair using a custom builder.
///
/// When `timeout` elapses the blocking worker is detached, not stopped: it
/// keeps running until key generation finishes. Dropping a Tokio runtime
/// waits for such workers, so callers that own the runtime should shut it
/// down with [`Runtime::shutdown_timeout`](tokio::runtime::Runtime::shutdown_timeout).
pub async fn generate_with_builder(
    builder: DeviceCertBuilder,
    device_id: &DeviceId,
    dir: impl AsRef<Path>,
    timeout: Duration,
) -> Result<CertificatePaths> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;

    let paths = CertificatePaths::for_device(dir, device_id);
    tracing::debug!(
        "Generating {}-bit RSA key and certificate for {}",
        builder.key_bits,
        device_id
    );

    let generated = tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || builder.build()))
        .await
        .map_err(|_| ProvisionError::CertificateTimeout(timeout))?
        .map_err(|e| {
            ProvisionError::certificate_generation(format!("Generation task failed: {}", e))
        })??;

    tokio::fs::write(&paths.key, generated.key_pem.as_bytes()).await?;
    tokio::fs::write(&paths.cert, generated.cert_pem.as_bytes()).await?;

    tracing::debug!(
        "Wrote {} and {}",
        paths.cert.display(),
        paths.key.display()
    );

    Ok(paths)
}

/// Extract the subject common name of a PEM certificate.
pub fn certificate_common_name(cert_pem: &[u8]) -> Result<Option<String>> {
    let cert = x509_cert::Certificate::from_pem(cert_pem)
        .map_err(|e| ProvisionError::invalid_pem(format!("Failed to parse certificate: {}", e)))?;

    for rdn in cert.tbs_certificate.subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid == CN
                && let Ok(s) = std::str::from_utf8(atv.value.value())
            {
                return Ok(Some(s.to_string()));
            }
        }
    }

    Ok(None)
}
