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

//! End-to-end provisioning of one device.
//!
//! Stages run strictly in order, each awaiting the previous one:
//!
//! 1. generate the certificate pair
//! 2. enroll the certificate with the provisioning service
//! 3. register over MQTT
//! 4. wait the propagation delay, then probe the hub
//!
//! Certificate generation and enrollment failures abort the run. A rejected
//! or unanswered registration is reported and the run continues. A probe
//! that never connects is reported in the result without failing the run.

use tracing::{error, info};

use crate::cert::{self, CertificatePaths};
use crate::config::ProvisionConfig;
use crate::enrollment::{self, IndividualEnrollment, ProvisioningServiceClient};
use crate::error::Result;
use crate::identity::DeviceId;
use crate::probe::{self, ProbeReport};
use crate::registration::{self, RegistrationOutcome};
use crate::tls::DeviceIdentity;

/// Everything a provisioning run produced.
#[derive(Debug)]
pub struct ProvisionReport {
    /// Device that was provisioned.
    pub device_id: DeviceId,
    /// Where the certificate pair was written.
    pub certificates: CertificatePaths,
    /// Enrollment as stored by the provisioning service.
    pub enrollment: IndividualEnrollment,
    /// Registration outcome.
    pub registration: RegistrationOutcome,
    /// Probe result; `None` when the hub never accepted the connection in time.
    pub probe: Option<ProbeReport>,
}

impl ProvisionReport {
    /// Returns true if registration was accepted and the probe connected.
    pub fn is_complete(&self) -> bool {
        self.registration.is_accepted() && self.probe.is_some()
    }
}

/// Runs the provisioning stages for a device.
#[derive(Debug, Clone)]
pub struct Provisioner {
    config: ProvisionConfig,
    service: ProvisioningServiceClient,
}

impl Provisioner {
    /// Create a provisioner using the configured management credential.
    pub fn new(config: ProvisionConfig) -> Result<Self> {
        let service = ProvisioningServiceClient::from_connection_string(&config.management_credential)?;
        Ok(Self { config, service })
    }

    /// Replace the management API client.
    pub fn with_service_client(mut self, service: ProvisioningServiceClient) -> Self {
        self.service = service;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Generate the device certificate pair.
    pub async fn generate_certificates(&self, device_id: &DeviceId) -> Result<CertificatePaths> {
        info!("generating certificates for {}", device_id);
        cert::generate_device_certificates(device_id, &self.config.cert_dir, self.config.cert_timeout)
            .await
    }

    /// Enroll the device certificate.
    pub async fn enroll(
        &self,
        device_id: &DeviceId,
        certificates: &CertificatePaths,
    ) -> Result<IndividualEnrollment> {
        info!("enrolling {}", device_id);
        enrollment::enroll_device(&self.service, device_id, &certificates.cert).await
    }

    /// Perform the registration handshake.
    pub async fn register(
        &self,
        device_id: &DeviceId,
        identity: &DeviceIdentity,
    ) -> Result<RegistrationOutcome> {
        info!("registering {} to IoTHub", device_id);
        registration::register_device(&self.config, device_id, identity).await
    }

    /// Wait for propagation, then probe the hub.
    pub async fn probe(&self, device_id: &DeviceId, identity: &DeviceIdentity) -> Result<ProbeReport> {
        tokio::time::sleep(self.config.propagation_delay).await;
        info!("testing device connection");
        probe::probe_connectivity(&self.config, device_id, identity).await
    }

    /// Run every stage for `device_id`.
    pub async fn run(&self, device_id: &DeviceId) -> Result<ProvisionReport> {
        let certificates = self.generate_certificates(device_id).await?;
        let enrollment = self.enroll(device_id, &certificates).await?;

        let identity = DeviceIdentity::load(&certificates).await?;
        let registration = self.register(device_id, &identity).await?;

        let probe = match self.probe(device_id, &identity).await {
            Ok(report) => Some(report),
            Err(e) if !e.is_fatal() => {
                error!("{}", e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(ProvisionReport {
            device_id: device_id.clone(),
            certificates,
            enrollment,
            registration,
            probe,
        })
    }
}
