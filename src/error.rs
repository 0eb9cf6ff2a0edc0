//! Error types for device provisioning.
//!
//! This module defines all error types that can occur while provisioning a
//! device, from configuration loading through certificate generation,
//! enrollment, and the two MQTT legs.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`ProvisionError`].
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors that can occur while provisioning a device.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required configuration value is absent or empty.
    #[error("Missing configuration value: {0}")]
    MissingConfig(String),

    /// A configuration value is present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The device identifier cannot be used as a certificate subject or MQTT client id.
    #[error("Invalid device id '{id}': {reason}")]
    InvalidDeviceId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The provisioning service connection string is malformed.
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Key or certificate generation failed.
    #[error("Certificate generation error: {0}")]
    CertificateGeneration(String),

    /// Key or certificate generation did not finish in time.
    #[error("Certificate generation timed out after {0:?}")]
    CertificateTimeout(Duration),

    /// The provisioning authority rejected a management request.
    #[error("Provisioning service error {status}: {message}")]
    Authority {
        /// HTTP status code.
        status: u16,
        /// Error message from the service.
        message: String,
    },

    /// HTTP request or response error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// MQTT client request could not be queued.
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// A message arrived on a topic that does not follow the response grammar.
    #[error("Invalid response topic: {0}")]
    InvalidTopic(String),

    /// The hub never accepted the device connection within the probe window.
    #[error("{device_id} could not connect within {waited:?}")]
    ProbeTimedOut {
        /// Device that was probed.
        device_id: String,
        /// How long the probe waited.
        waited: Duration,
    },

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Create a missing configuration error for the named setting.
    pub fn missing_config(name: impl Into<String>) -> Self {
        Self::MissingConfig(name.into())
    }

    /// Create an invalid configuration error with the given message.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid device id error.
    pub fn invalid_device_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDeviceId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid connection string error with the given message.
    pub fn invalid_connection_string(msg: impl Into<String>) -> Self {
        Self::InvalidConnectionString(msg.into())
    }

    /// Create a certificate generation error with the given message.
    pub fn certificate_generation(msg: impl Into<String>) -> Self {
        Self::CertificateGeneration(msg.into())
    }

    /// Create a provisioning authority error with status and message.
    pub fn authority(status: u16, message: impl Into<String>) -> Self {
        Self::Authority {
            status,
            message: message.into(),
        }
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Create an invalid topic error.
    pub fn invalid_topic(topic: impl Into<String>) -> Self {
        Self::InvalidTopic(topic.into())
    }

    /// Create a probe timeout error.
    pub fn probe_timed_out(device_id: impl Into<String>, waited: Duration) -> Self {
        Self::ProbeTimedOut {
            device_id: device_id.into(),
            waited,
        }
    }

    /// Returns true if this error aborts a provisioning run.
    ///
    /// Everything that reaches the caller as an error is fatal except a probe
    /// timeout, which is reported after all provisioning side effects have
    /// already happened.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ProbeTimedOut { .. })
    }

    /// Returns the HTTP status if the provisioning authority rejected a request.
    pub fn authority_status(&self) -> Option<u16> {
        match self {
            Self::Authority { status, .. } => Some(*status),
            _ => None,
        }
    }
}
