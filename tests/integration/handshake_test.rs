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

//! Integration tests for the MQTT legs against a local TLS broker

use std::time::{Duration, Instant};

use crate::integration::broker::{BrokerEvent, MockBroker};
use crate::integration::{MockProvisioningService, local_config_builder, test_identity};
use device_provisioner::probe::probe_connectivity;
use device_provisioner::registration::register_device;
use device_provisioner::{DeviceId, ProvisionError, Provisioner, RegistrationStatus};

const DEVICE: &str = "device-simulator-test1";
const REGISTRATION_USERNAME: &str = "0ne00000000/registrations/device-simulator-test1/api-version=2019-03-31";
const HUB_USERNAME: &str = "127.0.0.1/device-simulator-test1/?api-version=2021-04-12";
const LEG_TIMEOUT: Duration = Duration::from_secs(5);

fn connect_event(username: &str) -> BrokerEvent {
    BrokerEvent::Connect {
        client_id: DEVICE.to_string(),
        username: Some(username.to_string()),
    }
}

fn request_id(events: &[BrokerEvent]) -> String {
    events
        .iter()
        .find_map(|event| match event {
            BrokerEvent::Publish { topic, .. } => topic
                .strip_prefix("$dps/registrations/PUT/iotdps-register/?$rid=")
                .map(str::to_string),
            _ => None,
        })
        .expect("No register request published")
}

#[tokio::test]
async fn test_registration_accepted_then_disconnects() {
    let broker = MockBroker::registration(202, r#"{"operationId":"op-1","status":"assigning"}"#).await;
    let dir = tempfile::tempdir().unwrap();
    let config = local_config_builder(dir.path(), broker.port())
        .registration_timeout(LEG_TIMEOUT)
        .build()
        .unwrap();
    let device_id = DeviceId::new(DEVICE).unwrap();

    let outcome = register_device(&config, &device_id, &test_identity(&device_id))
        .await
        .unwrap();

    assert_eq!(outcome.status, RegistrationStatus::Accepted);
    assert!(outcome.correlated);
    assert_eq!(outcome.body, r#"{"operationId":"op-1","status":"assigning"}"#);
    assert_eq!(
        outcome.operation.unwrap().operation_id.as_deref(),
        Some("op-1")
    );

    let events = broker.events_after_disconnects(1).await;
    let rid = request_id(&events);
    assert_eq!(outcome.request_id.as_deref(), Some(rid.as_str()));
    assert_eq!(
        events,
        vec![
            connect_event(REGISTRATION_USERNAME),
            BrokerEvent::Subscribe("$dps/registrations/res/#".to_string()),
            BrokerEvent::Publish {
                topic: format!("$dps/registrations/PUT/iotdps-register/?$rid={}", rid),
                payload: r#"{"registrationId":"device-simulator-test1"}"#.to_string(),
            },
            BrokerEvent::Disconnect,
        ]
    );
}

#[tokio::test]
async fn test_registration_rejected_keeps_body_and_disconnects() {
    let body = r#"{"errorCode":400209,"message":"Registration not found"}"#;
    let broker = MockBroker::registration(400, body).await;
    let dir = tempfile::tempdir().unwrap();
    let config = local_config_builder(dir.path(), broker.port())
        .registration_timeout(LEG_TIMEOUT)
        .build()
        .unwrap();
    let device_id = DeviceId::new(DEVICE).unwrap();

    let outcome = register_device(&config, &device_id, &test_identity(&device_id))
        .await
        .unwrap();

    assert_eq!(
        outcome.status,
        RegistrationStatus::Rejected {
            status_code: Some(400)
        }
    );
    assert!(!outcome.is_accepted());
    assert_eq!(outcome.body, body);

    let events = broker.events_after_disconnects(1).await;
    assert_eq!(events.first(), Some(&connect_event(REGISTRATION_USERNAME)));
    assert_eq!(events.last(), Some(&BrokerEvent::Disconnect));
}

#[tokio::test]
async fn test_hub_connect_settles_then_disconnects() {
    let broker = MockBroker::start().await;
    let dir = tempfile::tempdir().unwrap();
    let settle = Duration::from_millis(300);
    let config = local_config_builder(dir.path(), broker.port())
        .hub_trust_explicit(vec![broker.ca_pem()])
        .probe_timeout(Some(LEG_TIMEOUT))
        .settle_delay(settle)
        .build()
        .unwrap();
    let device_id = DeviceId::new(DEVICE).unwrap();

    let started = Instant::now();
    let report = probe_connectivity(&config, &device_id, &test_identity(&device_id))
        .await
        .unwrap();

    assert_eq!(report.device_id, DEVICE);
    assert_eq!(report.attempts, 1);
    assert!(started.elapsed() >= settle);

    let events = broker.events_after_disconnects(1).await;
    assert_eq!(
        events,
        vec![connect_event(HUB_USERNAME), BrokerEvent::Disconnect]
    );
}

#[tokio::test]
async fn test_hub_with_untrusted_certificate_times_out() {
    let broker = MockBroker::start().await;
    let dir = tempfile::tempdir().unwrap();
    // Default trust is Mozilla's root store, which did not issue the broker certificate.
    let config = local_config_builder(dir.path(), broker.port())
        .build()
        .unwrap();
    let device_id = DeviceId::new(DEVICE).unwrap();

    let err = probe_connectivity(&config, &device_id, &test_identity(&device_id))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::ProbeTimedOut { .. }));
    assert!(broker.events().is_empty());
}

#[tokio::test]
async fn test_full_run_against_local_services() {
    let service = MockProvisioningService::start().await;
    service.mock_create_or_update().await;
    let broker = MockBroker::registration(202, r#"{"operationId":"op-1","status":"assigning"}"#).await;

    let dir = tempfile::tempdir().unwrap();
    let config = local_config_builder(dir.path(), broker.port())
        .hub_trust_explicit(vec![broker.ca_pem()])
        .registration_timeout(LEG_TIMEOUT)
        .probe_timeout(Some(LEG_TIMEOUT))
        .build()
        .unwrap();
    let provisioner = Provisioner::new(config)
        .unwrap()
        .with_service_client(service.client());
    let device_id = DeviceId::new(DEVICE).unwrap();

    let report = provisioner.run(&device_id).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.registration.status, RegistrationStatus::Accepted);
    assert_eq!(report.probe.as_ref().map(|r| r.attempts), Some(1));

    let events = broker.events_after_disconnects(2).await;
    let connects: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, BrokerEvent::Connect { .. }))
        .cloned()
        .collect();
    assert_eq!(
        connects,
        vec![connect_event(REGISTRATION_USERNAME), connect_event(HUB_USERNAME)]
    );
    assert_eq!(events.last(), Some(&BrokerEvent::Disconnect));
}
