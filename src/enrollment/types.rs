//! Enrollment records exchanged with the provisioning service.
//!
//! Field names follow the service's JSON representation (camelCase).
//! Read-only fields returned by the service are optional and skipped on
//! serialization when absent.

use serde::{Deserialize, Serialize};

/// An individual enrollment: one registration id bound to one attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualEnrollment {
    /// Registration id presented by the device.
    pub registration_id: String,

    /// Device id to create in the hub on assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// How the device proves its identity.
    pub attestation: AttestationMechanism,

    /// Behaviour when the device is provisioned again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprovision_policy: Option<ReprovisionPolicy>,

    /// Whether the enrollment is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_status: Option<ProvisioningStatus>,

    /// Hub the device was last assigned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iot_hub_host_name: Option<String>,

    /// Entity tag used for optimistic concurrency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Creation time (read-only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time_utc: Option<String>,

    /// Last update time (read-only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_date_time_utc: Option<String>,
}

impl IndividualEnrollment {
    /// Enrollment for a device attested by a client certificate.
    ///
    /// The registration id and device id are both `device_id`, the
    /// certificate PEM is the primary client certificate, and re-provisioning
    /// migrates device data and updates the hub assignment.
    pub fn x509(device_id: impl Into<String>, cert_pem: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self {
            registration_id: device_id.clone(),
            device_id: Some(device_id),
            attestation: AttestationMechanism::x509_client_certificate(cert_pem),
            reprovision_policy: Some(ReprovisionPolicy::default()),
            provisioning_status: None,
            iot_hub_host_name: None,
            etag: None,
            created_date_time_utc: None,
            last_updated_date_time_utc: None,
        }
    }

    /// Send the update conditionally on this entity tag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Re-provisioning behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprovisionPolicy {
    /// Move device state to the newly assigned hub.
    pub migrate_device_data: bool,

    /// Re-evaluate the hub assignment on every registration.
    pub update_hub_assignment: bool,
}

impl Default for ReprovisionPolicy {
    fn default() -> Self {
        Self {
            migrate_device_data: true,
            update_hub_assignment: true,
        }
    }
}

/// Enrollment activation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    /// Devices may register.
    Enabled,
    /// Registration is refused.
    Disabled,
}

/// Attestation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationType {
    /// X.509 certificate.
    #[serde(rename = "x509")]
    X509,
    /// TPM endorsement key.
    #[serde(rename = "tpm")]
    Tpm,
    /// Symmetric key.
    #[serde(rename = "symmetricKey")]
    SymmetricKey,
}

/// Attestation mechanism of an enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationMechanism {
    /// Attestation kind.
    #[serde(rename = "type")]
    pub kind: AttestationType,

    /// X.509 details when `kind` is [`AttestationType::X509`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x509: Option<X509Attestation>,
}

impl AttestationMechanism {
    /// X.509 attestation with a single primary client certificate.
    pub fn x509_client_certificate(cert_pem: impl Into<String>) -> Self {
        Self {
            kind: AttestationType::X509,
            x509: Some(X509Attestation {
                client_certificates: Some(X509Certificates {
                    primary: X509CertificateWithInfo {
                        certificate: Some(cert_pem.into()),
                        info: None,
                    },
                    secondary: None,
                }),
            }),
        }
    }

    /// Primary client certificate PEM, if present.
    pub fn primary_certificate(&self) -> Option<&str> {
        self.x509
            .as_ref()?
            .client_certificates
            .as_ref()?
            .primary
            .certificate
            .as_deref()
    }
}

/// X.509 attestation details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509Attestation {
    /// Client (leaf) certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificates: Option<X509Certificates>,
}

/// Primary and optional secondary certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct X509Certificates {
    /// Primary certificate.
    pub primary: X509CertificateWithInfo,

    /// Secondary certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<X509CertificateWithInfo>,
}

/// A certificate as sent (PEM) or as returned (info summary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct X509CertificateWithInfo {
    /// PEM certificate; only present on requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// Summary computed by the service; only present on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<X509CertificateInfo>,
}

/// Certificate summary returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct X509CertificateInfo {
    /// Subject distinguished name.
    #[serde(default)]
    pub subject_name: Option<String>,
    /// SHA-1 thumbprint.
    #[serde(default)]
    pub sha1_thumbprint: Option<String>,
    /// SHA-256 thumbprint.
    #[serde(default)]
    pub sha256_thumbprint: Option<String>,
    /// Issuer distinguished name.
    #[serde(default)]
    pub issuer_name: Option<String>,
    /// Start of validity.
    #[serde(default)]
    pub not_before_utc: Option<String>,
    /// End of validity.
    #[serde(default)]
    pub not_after_utc: Option<String>,
    /// Serial number.
    #[serde(default)]
    pub serial_number: Option<String>,
}
