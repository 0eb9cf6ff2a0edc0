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

//! Connectivity probe against the assigned hub.

use std::time::{Duration, Instant};

use rumqttc::{Event, EventLoop, Packet};
use tracing::{debug, info};

use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};
use crate::identity::DeviceId;
use crate::mqtt::{self, MqttEndpoint};
use crate::tls::{DeviceIdentity, build_mqtt_tls_config};

/// Device API version carried in the hub username.
pub const API_VERSION: &str = "2021-04-12";

/// Result of a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Device that connected.
    pub device_id: String,
    /// Connection attempts made, including the successful one.
    pub attempts: u32,
    /// Time until the hub acknowledged the connection.
    pub elapsed: Duration,
}

/// Connect to the hub as `device_id`, wait the settle delay, then disconnect.
///
/// The server certificate is always verified, against
/// [`ProvisionConfig::hub_verification`]. Connection errors are logged and
/// retried until the probe timeout, if any, elapses.
pub async fn probe_connectivity(
    config: &ProvisionConfig,
    device_id: &DeviceId,
    identity: &DeviceIdentity,
) -> Result<ProbeReport> {
    let tls = build_mqtt_tls_config(identity, &config.hub_verification)?;

    let endpoint = MqttEndpoint {
        host: &config.hub_endpoint,
        port: config.mqtt_port,
        client_id: device_id.as_str(),
        username: config.hub_username(device_id.as_str()),
    };
    debug!("Connecting to {}:{} as {}", endpoint.host, endpoint.port, endpoint.username);
    let (client, mut eventloop) = mqtt::connect(endpoint, tls);

    let started = Instant::now();
    let wait = wait_for_connack(&mut eventloop, device_id, config.reconnect_period);

    let attempts = match config.probe_timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(attempts) => attempts,
            Err(_) => return Err(ProvisionError::probe_timed_out(device_id.as_str(), limit)),
        },
        None => wait.await,
    };
    let elapsed = started.elapsed();

    info!("{} can connect successfully", device_id);
    tokio::time::sleep(config.settle_delay).await;
    mqtt::shutdown(&client, &mut eventloop).await;

    Ok(ProbeReport {
        device_id: device_id.to_string(),
        attempts,
        elapsed,
    })
}

async fn wait_for_connack(
    eventloop: &mut EventLoop,
    device_id: &DeviceId,
    reconnect_period: Duration,
) -> u32 {
    let mut attempts = 1;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return attempts,
            Ok(_) => {}
            Err(e) => {
                debug!("{} connection error: {}", device_id, e);
                info!("{} is trying to reconnect", device_id);
                tokio::time::sleep(reconnect_period).await;
                attempts += 1;
            }
        }
    }
}
