//! Registration topic grammar.
//!
//! Requests are published to
//! `$dps/registrations/PUT/iotdps-register/?$rid=<request id>` and responses
//! arrive on `$dps/registrations/res/<status>/?$rid=<request id>[&retry-after=<secs>]`.

use std::str::FromStr;

use serde::Deserialize;

use crate::error::{ProvisionError, Result};

/// Filter subscribed for registration responses.
pub const RESPONSE_TOPIC_FILTER: &str = "$dps/registrations/res/#";

/// Prefix of every registration response topic.
pub const RESPONSE_TOPIC_PREFIX: &str = "$dps/registrations/res/";

const REGISTER_TOPIC_PREFIX: &str = "$dps/registrations/PUT/iotdps-register/?$rid=";

/// HTTP-style status of an accepted registration (operation in progress).
pub const STATUS_ACCEPTED: u16 = 202;

/// Fresh random request id (16 hex chars).
pub fn new_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes)
}

/// Topic a registration request is published to.
pub fn register_topic(request_id: &str) -> String {
    format!("{}{}", REGISTER_TOPIC_PREFIX, request_id)
}

/// Body of a registration request.
pub fn register_payload(registration_id: &str) -> Vec<u8> {
    serde_json::json!({ "registrationId": registration_id })
        .to_string()
        .into_bytes()
}

/// A parsed response topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTopic {
    /// Status code embedded in the path.
    pub status_code: u16,

    /// `$rid` query parameter.
    pub request_id: Option<String>,

    /// `retry-after` query parameter, in seconds.
    pub retry_after: Option<u64>,
}

impl ResponseTopic {
    /// Parse a topic of the form `$dps/registrations/res/<status>/?<query>`.
    pub fn parse(topic: &str) -> Result<Self> {
        let rest = topic
            .strip_prefix(RESPONSE_TOPIC_PREFIX)
            .ok_or_else(|| ProvisionError::invalid_topic(topic))?;

        let (status, tail) = rest
            .split_once('/')
            .ok_or_else(|| ProvisionError::invalid_topic(topic))?;

        // Canonical decimal only: `0202` is not `202`.
        if status.is_empty()
            || !status.bytes().all(|b| b.is_ascii_digit())
            || (status.len() > 1 && status.starts_with('0'))
        {
            return Err(ProvisionError::invalid_topic(topic));
        }
        let status_code = status
            .parse()
            .map_err(|_| ProvisionError::invalid_topic(topic))?;

        let mut request_id = None;
        let mut retry_after = None;

        if let Some(query) = tail.strip_prefix('?') {
            for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match name.as_ref() {
                    "$rid" => request_id = Some(value.into_owned()),
                    "retry-after" => retry_after = value.parse().ok(),
                    _ => {}
                }
            }
        }

        Ok(Self {
            status_code,
            request_id,
            retry_after,
        })
    }

    /// Returns true for `202`, the only status treated as success.
    pub fn is_accepted(&self) -> bool {
        self.status_code == STATUS_ACCEPTED
    }
}

impl FromStr for ResponseTopic {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Registration response body, decoded best-effort.
///
/// Accepted responses carry an operation id and status; rejections carry an
/// error code and message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOperationStatus {
    /// Operation to poll for the final assignment.
    #[serde(default)]
    pub operation_id: Option<String>,

    /// Operation status (`assigning`, `assigned`, `failed`, ...).
    #[serde(default)]
    pub status: Option<String>,

    /// Assignment details once available.
    #[serde(default)]
    pub registration_state: Option<RegistrationState>,

    /// Service error code on rejection.
    #[serde(default)]
    pub error_code: Option<u64>,

    /// Service error message on rejection.
    #[serde(default)]
    pub message: Option<String>,

    /// Service tracking id on rejection.
    #[serde(default)]
    pub tracking_id: Option<String>,
}

impl RegistrationOperationStatus {
    /// Decode a response body; `None` if it is not the expected JSON.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

/// Device registration state reported by the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationState {
    /// Registration id.
    #[serde(default)]
    pub registration_id: Option<String>,
    /// Hub the device was assigned to.
    #[serde(default)]
    pub assigned_hub: Option<String>,
    /// Device id in the assigned hub.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Registration status.
    #[serde(default)]
    pub status: Option<String>,
    /// Registration sub-status.
    #[serde(default)]
    pub substatus: Option<String>,
    /// Error code when the registration failed.
    #[serde(default)]
    pub error_code: Option<u64>,
    /// Error message when the registration failed.
    #[serde(default)]
    pub error_message: Option<String>,
}
