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

//! Device registration handshake.
//!
//! Connects to the global provisioning endpoint with the device certificate,
//! subscribes to `$dps/registrations/res/#`, publishes a register request and
//! disconnects after the first response. Only `202` counts as accepted; a
//! rejection is logged and returned as a value so the run can continue.
//!
//! # Example
//!
//! ```no_run
//! use device_provisioner::config::ProvisionConfig;
//! use device_provisioner::identity::DeviceId;
//! use device_provisioner::registration::register_device;
//! use device_provisioner::tls::DeviceIdentity;
//!
//! # async fn example() -> device_provisioner::Result<()> {
//! let config = ProvisionConfig::from_env()?;
//! let device_id = DeviceId::new("device-simulator-test1")?;
//! let identity = DeviceIdentity::from_files(
//!     "certs/device-simulator-test1-cert.pem",
//!     "certs/device-simulator-test1-key.pem",
//! )
//! .await?;
//!
//! let outcome = register_device(&config, &device_id, &identity).await?;
//! println!("accepted: {}", outcome.is_accepted());
//! # Ok(())
//! # }
//! ```

mod session;
pub mod topic;

pub use session::{
    RegistrationOutcome, RegistrationSession, RegistrationStatus, SessionAction, SessionState,
};
pub use topic::{RegistrationOperationStatus, RegistrationState, ResponseTopic};

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::config::ProvisionConfig;
use crate::error::Result;
use crate::identity::DeviceId;
use crate::mqtt::{self, MqttEndpoint};
use crate::tls::{DeviceIdentity, ServerVerification, build_mqtt_tls_config};

/// Device API version carried in the registration username.
pub const API_VERSION: &str = "2019-03-31";

/// Run one registration session for `device_id`.
///
/// Returns an error only when the session cannot be set up (bad TLS
/// material, client queue failure). Rejections and timeouts are outcomes.
pub async fn register_device(
    config: &ProvisionConfig,
    device_id: &DeviceId,
    identity: &DeviceIdentity,
) -> Result<RegistrationOutcome> {
    let verification = ServerVerification::from_flag(config.verify_provisioning_tls);
    if !verification.is_verifying() {
        warn!(
            "Server certificate verification is disabled for {}",
            config.global_endpoint
        );
    }
    let tls = build_mqtt_tls_config(identity, &verification)?;

    let endpoint = MqttEndpoint {
        host: &config.global_endpoint,
        port: config.mqtt_port,
        client_id: device_id.as_str(),
        username: config.registration_username(device_id.as_str()),
    };
    debug!("Connecting to {}:{} as {}", endpoint.host, endpoint.port, endpoint.username);
    let (client, mut eventloop) = mqtt::connect(endpoint, tls);

    let mut session = RegistrationSession::new(device_id.as_str());

    let result = tokio::time::timeout(
        config.registration_timeout,
        drive(&client, &mut eventloop, &mut session, config),
    )
    .await;

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            mqtt::shutdown(&client, &mut eventloop).await;
            return Err(e);
        }
        Err(_) => {
            warn!(
                "{} got no registration response within {:?}",
                device_id, config.registration_timeout
            );
            RegistrationOutcome::timed_out(
                device_id.as_str(),
                session.last_request_id().map(str::to_string),
            )
        }
    };

    mqtt::shutdown(&client, &mut eventloop).await;

    match outcome.status {
        RegistrationStatus::Accepted => info!("{} registration accepted", device_id),
        RegistrationStatus::Rejected { .. } => {
            error!("{} is failed to register {}", device_id, outcome.body)
        }
        RegistrationStatus::TimedOut => error!("{} is failed to register (no response)", device_id),
    }

    Ok(outcome)
}

async fn drive(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    session: &mut RegistrationSession,
    config: &ProvisionConfig,
) -> Result<RegistrationOutcome> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                for action in session.on_connected() {
                    apply(client, action).await?;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on {}", publish.topic);
                if let Some(outcome) = session.on_message(&publish.topic, &publish.payload) {
                    return Ok(outcome);
                }
            }
            Ok(_) => {}
            Err(e) => {
                session.on_disconnected();
                warn!("{} registration connection error: {}", session.registration_id(), e);
                tokio::time::sleep(config.reconnect_period).await;
            }
        }
    }
}

async fn apply(client: &AsyncClient, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::Subscribe { filter } => {
            debug!("Subscribing to {}", filter);
            client.subscribe(filter, QoS::AtMostOnce).await?;
        }
        SessionAction::Publish { topic, payload } => {
            debug!("Publishing to {}", topic);
            client.publish(topic, QoS::AtMostOnce, false, payload).await?;
        }
    }
    Ok(())
}
