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

//! Configuration types for device provisioning.
//!
//! [`ProvisionConfig`] carries the four required settings (provisioning
//! scope, global provisioning endpoint, hub endpoint, and the provisioning
//! service connection string) plus the timing knobs of the run. It is built
//! explicitly with [`ProvisionConfig::builder`] or read from the environment
//! with [`ProvisionConfig::from_env`]; either way construction fails as soon
//! as a required value is missing.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use base64::prelude::*;

use crate::error::{ProvisionError, Result};
use crate::tls::ServerVerification;

/// Environment variable holding the provisioning id scope.
pub const ENV_ID_SCOPE: &str = "ID_SCOPE";
/// Environment variable holding the global provisioning hostname.
pub const ENV_GLOBAL_DPS: &str = "GLOBAL_DPS";
/// Environment variable holding the hub hostname.
pub const ENV_IOTHUB: &str = "IOTHUB";
/// Environment variable holding the provisioning service connection string.
pub const ENV_DPS_CONNECTION_STRING: &str = "DPS_CONNECTION_STRING";
/// Optional: certificate output directory.
pub const ENV_CERT_DIR: &str = "CERT_DIR";
/// Optional: probe timeout in seconds, `0` for unbounded.
pub const ENV_PROBE_TIMEOUT_SECS: &str = "PROBE_TIMEOUT_SECS";
/// Optional: verify the provisioning endpoint's server certificate.
pub const ENV_DPS_VERIFY_TLS: &str = "DPS_VERIFY_TLS";

/// Default MQTT over TLS port.
pub const DEFAULT_MQTT_PORT: u16 = 8883;

/// Configuration for one provisioning run.
#[derive(Clone)]
pub struct ProvisionConfig {
    /// Provisioning id scope (e.g. `0ne00000000`).
    pub scope: String,

    /// Global provisioning endpoint hostname (e.g. `global.azure-devices-provisioning.net`).
    pub global_endpoint: String,

    /// Hub hostname the device is expected to be assigned to.
    pub hub_endpoint: String,

    /// Management credential for the provisioning service.
    pub management_credential: ServiceConnectionString,

    /// Directory where device certificates are written.
    pub cert_dir: PathBuf,

    /// MQTT port used on both legs.
    pub mqtt_port: u16,

    /// Upper bound on key and certificate generation.
    pub cert_timeout: Duration,

    /// Delay between registration and the connectivity probe.
    pub propagation_delay: Duration,

    /// How long the probe keeps the connection open after it is accepted.
    pub settle_delay: Duration,

    /// Upper bound on waiting for a registration response.
    pub registration_timeout: Duration,

    /// Upper bound on waiting for the hub to accept the device.
    ///
    /// `None` waits forever.
    pub probe_timeout: Option<Duration>,

    /// Pause between MQTT reconnect attempts.
    pub reconnect_period: Duration,

    /// Verify the provisioning endpoint's server certificate.
    ///
    /// The hub leg always verifies.
    pub verify_provisioning_tls: bool,

    /// Trust anchors for the hub leg's server certificate.
    ///
    /// Mozilla's root store unless explicit CA certificates are given. Never
    /// [`ServerVerification::Disabled`].
    pub hub_verification: ServerVerification,
}

impl std::fmt::Debug for ProvisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionConfig")
            .field("scope", &self.scope)
            .field("global_endpoint", &self.global_endpoint)
            .field("hub_endpoint", &self.hub_endpoint)
            .field("management_credential", &self.management_credential)
            .field("cert_dir", &self.cert_dir)
            .field("mqtt_port", &self.mqtt_port)
            .field("cert_timeout", &self.cert_timeout)
            .field("propagation_delay", &self.propagation_delay)
            .field("settle_delay", &self.settle_delay)
            .field("registration_timeout", &self.registration_timeout)
            .field("probe_timeout", &self.probe_timeout)
            .field("reconnect_period", &self.reconnect_period)
            .field("verify_provisioning_tls", &self.verify_provisioning_tls)
            .field("hub_verification", &self.hub_verification)
            .finish()
    }
}

impl ProvisionConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProvisionConfigBuilder {
        ProvisionConfigBuilder::new()
    }

    /// Load configuration from `.env` (if present) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::MissingConfig`] naming the first required
    /// variable that is unset or empty.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProvisionError::missing_config(name))
        };

        let mut builder = Self::builder()
            .scope(required(ENV_ID_SCOPE)?)
            .global_endpoint(required(ENV_GLOBAL_DPS)?)
            .hub_endpoint(required(ENV_IOTHUB)?)
            .management_credential(required(ENV_DPS_CONNECTION_STRING)?.parse()?);

        if let Some(dir) = lookup(ENV_CERT_DIR).filter(|v| !v.trim().is_empty()) {
            builder = builder.cert_dir(dir.trim());
        }

        if let Some(secs) = lookup(ENV_PROBE_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ProvisionError::invalid_config(format!(
                    "{} must be a whole number of seconds",
                    ENV_PROBE_TIMEOUT_SECS
                ))
            })?;
            builder = builder.probe_timeout(match secs {
                0 => None,
                s => Some(Duration::from_secs(s)),
            });
        }

        if let Some(flag) = lookup(ENV_DPS_VERIFY_TLS) {
            builder = builder.verify_provisioning_tls(parse_flag(ENV_DPS_VERIFY_TLS, &flag)?);
        }

        builder.build()
    }

    /// MQTT username presented to the provisioning endpoint.
    pub fn registration_username(&self, registration_id: &str) -> String {
        format!(
            "{}/registrations/{}/api-version={}",
            self.scope,
            registration_id,
            crate::registration::API_VERSION
        )
    }

    /// MQTT username presented to the hub.
    pub fn hub_username(&self, device_id: &str) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.hub_endpoint,
            device_id,
            crate::probe::API_VERSION
        )
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ProvisionError::invalid_config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

/// Builder for [`ProvisionConfig`].
#[derive(Default)]
pub struct ProvisionConfigBuilder {
    scope: Option<String>,
    global_endpoint: Option<String>,
    hub_endpoint: Option<String>,
    management_credential: Option<ServiceConnectionString>,
    cert_dir: Option<PathBuf>,
    mqtt_port: Option<u16>,
    cert_timeout: Option<Duration>,
    propagation_delay: Option<Duration>,
    settle_delay: Option<Duration>,
    registration_timeout: Option<Duration>,
    probe_timeout: Option<Option<Duration>>,
    reconnect_period: Option<Duration>,
    verify_provisioning_tls: bool,
    hub_ca_certs: Option<Vec<Vec<u8>>>,
}

impl ProvisionConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provisioning id scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the global provisioning endpoint hostname.
    pub fn global_endpoint(mut self, host: impl Into<String>) -> Self {
        self.global_endpoint = Some(host.into());
        self
    }

    /// Set the hub hostname.
    pub fn hub_endpoint(mut self, host: impl Into<String>) -> Self {
        self.hub_endpoint = Some(host.into());
        self
    }

    /// Set the provisioning service management credential.
    pub fn management_credential(mut self, credential: ServiceConnectionString) -> Self {
        self.management_credential = Some(credential);
        self
    }

    /// Set the certificate output directory.
    pub fn cert_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = Some(dir.into());
        self
    }

    /// Set the MQTT port used on both legs.
    pub fn mqtt_port(mut self, port: u16) -> Self {
        self.mqtt_port = Some(port);
        self
    }

    /// Set the key and certificate generation timeout.
    pub fn cert_timeout(mut self, timeout: Duration) -> Self {
        self.cert_timeout = Some(timeout);
        self
    }

    /// Set the delay between registration and the connectivity probe.
    pub fn propagation_delay(mut self, delay: Duration) -> Self {
        self.propagation_delay = Some(delay);
        self
    }

    /// Set how long the probe holds an accepted connection open.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    /// Set the registration response timeout.
    pub fn registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = Some(timeout);
        self
    }

    /// Set the probe timeout; `None` waits forever.
    pub fn probe_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the pause between MQTT reconnect attempts.
    pub fn reconnect_period(mut self, period: Duration) -> Self {
        self.reconnect_period = Some(period);
        self
    }

    /// Verify the provisioning endpoint's server certificate.
    pub fn verify_provisioning_tls(mut self, verify: bool) -> Self {
        self.verify_provisioning_tls = verify;
        self
    }

    /// Verify the hub against these CA certificates (PEM-encoded) instead of
    /// Mozilla's root store.
    pub fn hub_trust_explicit(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.hub_ca_certs = Some(ca_certs);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any of scope, global endpoint, hub endpoint or
    /// management credential is missing, or if an endpoint is not a bare
    /// hostname.
    pub fn build(self) -> Result<ProvisionConfig> {
        let scope = non_empty(self.scope, ENV_ID_SCOPE)?;
        let global_endpoint = hostname(self.global_endpoint, ENV_GLOBAL_DPS)?;
        let hub_endpoint = hostname(self.hub_endpoint, ENV_IOTHUB)?;
        let management_credential = self
            .management_credential
            .ok_or_else(|| ProvisionError::missing_config(ENV_DPS_CONNECTION_STRING))?;

        Ok(ProvisionConfig {
            scope,
            global_endpoint,
            hub_endpoint,
            management_credential,
            cert_dir: self.cert_dir.unwrap_or_else(|| PathBuf::from("certs")),
            mqtt_port: self.mqtt_port.unwrap_or(DEFAULT_MQTT_PORT),
            cert_timeout: self.cert_timeout.unwrap_or(Duration::from_secs(60)),
            propagation_delay: self.propagation_delay.unwrap_or(Duration::from_secs(5)),
            settle_delay: self.settle_delay.unwrap_or(Duration::from_secs(1)),
            registration_timeout: self
                .registration_timeout
                .unwrap_or(Duration::from_secs(60)),
            probe_timeout: self
                .probe_timeout
                .unwrap_or(Some(Duration::from_secs(60))),
            reconnect_period: self.reconnect_period.unwrap_or(Duration::from_secs(1)),
            verify_provisioning_tls: self.verify_provisioning_tls,
            hub_verification: match self.hub_ca_certs {
                Some(ca_certs) if ca_certs.is_empty() => {
                    return Err(ProvisionError::invalid_config(
                        "explicit hub trust needs at least one CA certificate",
                    ));
                }
                Some(ca_certs) => ServerVerification::Explicit(ca_certs),
                None => ServerVerification::WebPki,
            },
        })
    }
}

fn non_empty(value: Option<String>, name: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProvisionError::missing_config(name))
}

fn hostname(value: Option<String>, name: &str) -> Result<String> {
    let host = non_empty(value, name)?;
    if host.contains("://") || host.contains('/') {
        return Err(ProvisionError::invalid_config(format!(
            "{} must be a bare hostname, got '{}'",
            name, host
        )));
    }
    Ok(host)
}

/// Shared access credential for the provisioning service management API.
///
/// Parsed from the `HostName=...;SharedAccessKeyName=...;SharedAccessKey=...`
/// form shown in the service's access policies.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceConnectionString {
    /// Service hostname.
    pub host_name: String,

    /// Name of the shared access policy.
    pub shared_access_key_name: String,

    /// Base64 encoded policy key.
    pub shared_access_key: String,
}

impl std::fmt::Debug for ServiceConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConnectionString")
            .field("host_name", &self.host_name)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &"<redacted>")
            .finish()
    }
}

impl ServiceConnectionString {
    /// Decoded policy key bytes.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        BASE64_STANDARD
            .decode(self.shared_access_key.as_bytes())
            .map_err(|e| {
                ProvisionError::invalid_connection_string(format!(
                    "SharedAccessKey is not valid base64: {}",
                    e
                ))
            })
    }
}

impl FromStr for ServiceConnectionString {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        let mut host_name = None;
        let mut key_name = None;
        let mut key = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                ProvisionError::invalid_connection_string("segment without '='")
            })?;

            match name {
                "HostName" => host_name = Some(value.to_string()),
                "SharedAccessKeyName" => key_name = Some(value.to_string()),
                "SharedAccessKey" => key = Some(value.to_string()),
                // Other segments (e.g. DeviceId) are not used by the service API
                _ => {}
            }
        }

        let require = |value: Option<String>, name: &str| {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProvisionError::invalid_connection_string(format!("missing {}", name)))
        };

        let parsed = Self {
            host_name: require(host_name, "HostName")?,
            shared_access_key_name: require(key_name, "SharedAccessKeyName")?,
            shared_access_key: require(key, "SharedAccessKey")?,
        };
        parsed.key_bytes()?;

        Ok(parsed)
    }
}
