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

//! Enrollment with the provisioning authority.
//!
//! Registers the device certificate as an individual enrollment keyed by the
//! device identity. The operation is create-or-update: running it again with
//! the same identity replaces the existing record.

mod client;
pub mod sas;
mod types;

use std::path::Path;

pub use client::{API_VERSION, ProvisioningServiceClient};
pub use types::{
    AttestationMechanism, AttestationType, IndividualEnrollment, ProvisioningStatus,
    ReprovisionPolicy, X509Attestation, X509CertificateInfo, X509CertificateWithInfo,
    X509Certificates,
};

use crate::error::Result;
use crate::identity::DeviceId;

/// Enroll `device_id` with the certificate at `cert_path`.
///
/// Any rejection by the authority is returned as an error and aborts the run.
pub async fn enroll_device(
    client: &ProvisioningServiceClient,
    device_id: &DeviceId,
    cert_path: impl AsRef<Path>,
) -> Result<IndividualEnrollment> {
    let cert_pem = tokio::fs::read_to_string(cert_path).await?;
    let enrollment = IndividualEnrollment::x509(device_id.as_str(), cert_pem);

    let stored = client
        .create_or_update_individual_enrollment(&enrollment)
        .await?;

    tracing::debug!(
        "Enrollment for {} stored (etag {:?})",
        stored.registration_id,
        stored.etag
    );

    Ok(stored)
}
