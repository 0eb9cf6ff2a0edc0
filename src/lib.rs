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

//! # device-provisioner
//!
//! Provisions an IoT device into a fleet through a device provisioning
//! service (DPS) and verifies it can reach its assigned hub.
//!
//! A run is strictly sequential:
//!
//! 1. **Certificates**: generate an RSA-4096 key and a self-signed
//!    client-auth certificate whose common name is the device id
//! 2. **Enrollment**: create or update an individual enrollment over the
//!    service's management API
//! 3. **Registration**: publish a register request over MQTT/TLS and read
//!    the status from the response topic
//! 4. **Probe**: connect to the hub with the same certificate and disconnect
//!
//! ## Quick Start
//!
//! ```no_run
//! use device_provisioner::{DeviceId, ProvisionConfig, Provisioner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // ID_SCOPE, GLOBAL_DPS, IOTHUB and DPS_CONNECTION_STRING
//!     let config = ProvisionConfig::from_env()?;
//!     let provisioner = Provisioner::new(config)?;
//!
//!     let report = provisioner.run(&DeviceId::generate()).await?;
//!     println!("{} registered: {}", report.device_id, report.registration.is_accepted());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```no_run
//! use std::time::Duration;
//! use device_provisioner::ProvisionConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProvisionConfig::builder()
//!     .scope("0ne00000000")
//!     .global_endpoint("global.azure-devices-provisioning.net")
//!     .hub_endpoint("my-hub.azure-devices.net")
//!     .management_credential("HostName=my-dps.azure-devices-provisioning.net;SharedAccessKeyName=provisioningserviceowner;SharedAccessKey=a2V5".parse()?)
//!     .probe_timeout(Some(Duration::from_secs(30)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cert;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod identity;
pub mod mqtt;
pub mod probe;
pub mod provision;
pub mod registration;
pub mod tls;

// Re-export main types at crate root for convenience
pub use cert::{CertificatePaths, DeviceCertBuilder};
pub use config::{ProvisionConfig, ProvisionConfigBuilder, ServiceConnectionString};
pub use enrollment::{IndividualEnrollment, ProvisioningServiceClient};
pub use error::{ProvisionError, Result};
pub use identity::DeviceId;
pub use probe::ProbeReport;
pub use provision::{ProvisionReport, Provisioner};
pub use registration::{RegistrationOutcome, RegistrationStatus};
pub use tls::DeviceIdentity;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("device-provisioner/", env!("CARGO_PKG_VERSION"));
