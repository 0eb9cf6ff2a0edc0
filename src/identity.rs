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

//! Device identity.
//!
//! A single [`DeviceId`] is used for one provisioning run. It becomes the
//! certificate subject common name, the MQTT client identifier on both legs,
//! the enrollment registration id, and the stem of the certificate file names.

use std::fmt;
use std::str::FromStr;

use crate::error::{ProvisionError, Result};

/// Prefix of generated device identifiers.
pub const GENERATED_PREFIX: &str = "device-simulator-";

/// Maximum registration id length accepted by the provisioning service.
pub const MAX_LEN: usize = 128;

/// Identifier of the device being provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Validate and wrap a caller-supplied identifier.
    ///
    /// The identifier must be non-empty, at most [`MAX_LEN`] characters, and
    /// consist of ASCII alphanumerics or `-`, `.`, `_`, `:`. This keeps it
    /// usable both as a registration id and as a file name component.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(ProvisionError::invalid_device_id(id, "must not be empty"));
        }
        if id.len() > MAX_LEN {
            return Err(ProvisionError::invalid_device_id(
                id,
                format!("longer than {} characters", MAX_LEN),
            ));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':')))
        {
            return Err(ProvisionError::invalid_device_id(
                id.clone(),
                format!("contains unsupported character '{}'", c),
            ));
        }

        Ok(Self(id))
    }

    /// Generate a random identifier of the form `device-simulator-<8 hex chars>`.
    pub fn generate() -> Self {
        let suffix: [u8; 4] = rand::random();
        Self(format!("{}{}", GENERATED_PREFIX, hex::encode(suffix)))
    }

    /// Use the supplied identifier, or generate one when absent.
    pub fn from_arg(arg: Option<&str>) -> Result<Self> {
        match arg {
            Some(id) => Self::new(id),
            None => Ok(Self::generate()),
        }
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
