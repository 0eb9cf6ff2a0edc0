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

//! Integration tests for individual enrollment management

use crate::integration::{MockProvisioningService, write_test_certificate};
use device_provisioner::enrollment::{IndividualEnrollment, ProvisioningStatus, enroll_device};
use device_provisioner::{DeviceId, ProvisionError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_enroll_device_submits_x509_enrollment() {
    let mock = MockProvisioningService::start().await;
    mock.mock_create_or_update().await;

    let dir = tempfile::tempdir().unwrap();
    let device_id = DeviceId::new("device-simulator-test1").unwrap();
    let (cert_path, cert_pem) = write_test_certificate(dir.path(), &device_id);

    let stored = enroll_device(&mock.client(), &device_id, &cert_path)
        .await
        .expect("Enrollment failed");

    assert_eq!(stored.registration_id, "device-simulator-test1");
    assert_eq!(stored.etag.as_deref(), Some("\"1\""));
    assert_eq!(stored.provisioning_status, Some(ProvisioningStatus::Enabled));

    let requests = mock.inner().received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let auth = request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(auth.starts_with("SharedAccessSignature sr=test-dps.azure-devices-provisioning.net&sig="));
    assert!(auth.ends_with("&skn=provisioningserviceowner"));

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["registrationId"], "device-simulator-test1");
    assert_eq!(body["deviceId"], "device-simulator-test1");
    assert_eq!(body["attestation"]["type"], "x509");
    assert_eq!(
        body["attestation"]["x509"]["clientCertificates"]["primary"]["certificate"],
        cert_pem.as_str()
    );
    assert_eq!(body["reprovisionPolicy"]["migrateDeviceData"], true);
    assert_eq!(body["reprovisionPolicy"]["updateHubAssignment"], true);
    assert!(body.get("etag").is_none());
}

#[tokio::test]
async fn test_enroll_twice_updates_existing_record() {
    let mock = MockProvisioningService::start().await;
    mock.mock_create_or_update().await;

    let dir = tempfile::tempdir().unwrap();
    let device_id = DeviceId::new("device-simulator-test1").unwrap();
    let (cert_path, _) = write_test_certificate(dir.path(), &device_id);
    let client = mock.client();

    let first = enroll_device(&client, &device_id, &cert_path).await.unwrap();
    let second = enroll_device(&client, &device_id, &cert_path).await.unwrap();

    assert_eq!(first.etag.as_deref(), Some("\"1\""));
    assert_eq!(second.etag.as_deref(), Some("\"2\""));
    assert_eq!(mock.store().lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_enrollment_rejection_is_fatal() {
    let mock = MockProvisioningService::start().await;
    mock.mock_error("PUT", "device-simulator-test1", 401, "Unauthorized")
        .await;

    let dir = tempfile::tempdir().unwrap();
    let device_id = DeviceId::new("device-simulator-test1").unwrap();
    let (cert_path, _) = write_test_certificate(dir.path(), &device_id);

    let err = enroll_device(&mock.client(), &device_id, &cert_path)
        .await
        .unwrap_err();

    match &err {
        ProvisionError::Authority { status, message } => {
            assert_eq!(*status, 401);
            assert_eq!(message, "Unauthorized");
        }
        other => panic!("Expected Authority error, got {:?}", other),
    }
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_enroll_with_missing_certificate_file() {
    let mock = MockProvisioningService::start().await;
    mock.mock_create_or_update().await;

    let dir = tempfile::tempdir().unwrap();
    let device_id = DeviceId::new("device-simulator-test1").unwrap();

    let result = enroll_device(&mock.client(), &device_id, dir.path().join("missing.pem")).await;
    assert!(matches!(result, Err(ProvisionError::Io(_))));
    assert!(mock.inner().received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_with_etag_sends_if_match() {
    let mock = MockProvisioningService::start().await;

    Mock::given(method("PUT"))
        .and(path("/enrollments/dev-etag"))
        .and(header("If-Match", "\"7\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "registrationId": "dev-etag",
            "attestation": { "type": "x509" },
            "etag": "\"8\"",
        })))
        .expect(1)
        .mount(mock.inner())
        .await;

    let enrollment = IndividualEnrollment::x509("dev-etag", "-----BEGIN CERTIFICATE-----").with_etag("\"7\"");
    let stored = mock
        .client()
        .create_or_update_individual_enrollment(&enrollment)
        .await
        .unwrap();

    assert_eq!(stored.etag.as_deref(), Some("\"8\""));
}

#[tokio::test]
async fn test_get_enrollment() {
    let mock = MockProvisioningService::start().await;

    Mock::given(method("GET"))
        .and(path("/enrollments/device-simulator-test1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "registrationId": "device-simulator-test1",
            "deviceId": "device-simulator-test1",
            "attestation": {
                "type": "x509",
                "x509": {
                    "clientCertificates": {
                        "primary": {
                            "info": {
                                "subjectName": "CN=device-simulator-test1",
                                "sha256Thumbprint": "AB01",
                            }
                        }
                    }
                }
            },
            "iotHubHostName": "test-hub.azure-devices.net",
            "provisioningStatus": "enabled",
            "etag": "\"3\"",
        })))
        .mount(mock.inner())
        .await;

    let enrollment = mock
        .client()
        .get_individual_enrollment("device-simulator-test1")
        .await
        .unwrap()
        .expect("Enrollment should exist");

    assert_eq!(enrollment.iot_hub_host_name.as_deref(), Some("test-hub.azure-devices.net"));
    assert_eq!(enrollment.attestation.primary_certificate(), None);
    let info = enrollment
        .attestation
        .x509
        .and_then(|x| x.client_certificates)
        .and_then(|c| c.primary.info)
        .unwrap();
    assert_eq!(info.subject_name.as_deref(), Some("CN=device-simulator-test1"));
}

#[tokio::test]
async fn test_get_missing_enrollment_returns_none() {
    let mock = MockProvisioningService::start().await;
    mock.mock_error("GET", "nobody", 404, "Enrollment not found").await;

    let result = mock.client().get_individual_enrollment("nobody").await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_delete_enrollment() {
    let mock = MockProvisioningService::start().await;

    Mock::given(method("DELETE"))
        .and(path("/enrollments/device-simulator-test1"))
        .and(header("If-Match", "\"2\""))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(mock.inner())
        .await;

    mock.client()
        .delete_individual_enrollment("device-simulator-test1", Some("\"2\""))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_conflict_is_reported() {
    let mock = MockProvisioningService::start().await;
    mock.mock_error("DELETE", "device-simulator-test1", 412, "Precondition failed")
        .await;

    let err = mock
        .client()
        .delete_individual_enrollment("device-simulator-test1", Some("\"1\""))
        .await
        .unwrap_err();
    assert_eq!(err.authority_status(), Some(412));
}
