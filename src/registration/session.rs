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

//! Registration session state machine.
//!
//! The session is transport-free: the caller feeds it connection and message
//! events and executes the [`SessionAction`]s it returns. The first message
//! on the response topic ends the session, whatever its request id.

use super::topic::{
    self, RESPONSE_TOPIC_FILTER, RESPONSE_TOPIC_PREFIX, RegistrationOperationStatus, ResponseTopic,
};

/// Where a registration session is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No connection acknowledged yet, or the connection dropped.
    Disconnected,

    /// Subscribed and published; waiting for the response.
    AwaitingResponse {
        /// Request id of the outstanding request.
        request_id: String,
    },

    /// A response was received; later events are ignored.
    Terminated,
}

/// Work the transport must perform for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Subscribe to a topic filter.
    Subscribe {
        /// Topic filter.
        filter: String,
    },

    /// Publish a message.
    Publish {
        /// Topic name.
        topic: String,
        /// Message body.
        payload: Vec<u8>,
    },
}

/// Final status of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// The service answered `202`.
    Accepted,

    /// The service answered with any other status.
    ///
    /// `status_code` is `None` when the topic could not be parsed.
    Rejected {
        /// Status from the response topic.
        status_code: Option<u16>,
    },

    /// No response arrived in time.
    TimedOut,
}

/// Result of a registration session.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    /// Registration id that was requested.
    pub registration_id: String,

    /// Final status.
    pub status: RegistrationStatus,

    /// Request id carried by the response topic.
    pub request_id: Option<String>,

    /// Request id of the last request published.
    pub expected_request_id: Option<String>,

    /// Whether the response request id matched the last request.
    pub correlated: bool,

    /// Raw response body, UTF-8 decoded lossily.
    pub body: String,

    /// Decoded response body, if it was the expected JSON.
    pub operation: Option<RegistrationOperationStatus>,
}

impl RegistrationOutcome {
    /// Outcome for a session that never received a response.
    pub fn timed_out(registration_id: impl Into<String>, expected_request_id: Option<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            status: RegistrationStatus::TimedOut,
            request_id: None,
            expected_request_id,
            correlated: false,
            body: String::new(),
            operation: None,
        }
    }

    /// Returns true if the service accepted the registration.
    pub fn is_accepted(&self) -> bool {
        self.status == RegistrationStatus::Accepted
    }
}

/// One registration request/response exchange.
#[derive(Debug)]
pub struct RegistrationSession {
    registration_id: String,
    state: SessionState,
    last_request_id: Option<String>,
}

impl RegistrationSession {
    /// Create a session for `registration_id`.
    pub fn new(registration_id: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            state: SessionState::Disconnected,
            last_request_id: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Request id of the most recent publish.
    pub fn last_request_id(&self) -> Option<&str> {
        self.last_request_id.as_deref()
    }

    /// Registration id this session requests.
    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// Handle a connection acknowledgement.
    ///
    /// Every (re)connect subscribes again and publishes a new request with a
    /// fresh request id.
    pub fn on_connected(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Terminated {
            return Vec::new();
        }

        let request_id = topic::new_request_id();
        let actions = vec![
            SessionAction::Subscribe {
                filter: RESPONSE_TOPIC_FILTER.to_string(),
            },
            SessionAction::Publish {
                topic: topic::register_topic(&request_id),
                payload: topic::register_payload(&self.registration_id),
            },
        ];

        self.last_request_id = Some(request_id.clone());
        self.state = SessionState::AwaitingResponse { request_id };
        actions
    }

    /// Handle a dropped connection.
    pub fn on_disconnected(&mut self) {
        if self.state != SessionState::Terminated {
            self.state = SessionState::Disconnected;
        }
    }

    /// Handle an incoming message.
    ///
    /// Returns the outcome for the first message under the response prefix;
    /// messages on other topics and anything after termination yield `None`.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Option<RegistrationOutcome> {
        if self.state == SessionState::Terminated || !topic.starts_with(RESPONSE_TOPIC_PREFIX) {
            return None;
        }

        let parsed = ResponseTopic::parse(topic);
        let (status, request_id) = match parsed {
            Ok(response) => {
                let status = if response.is_accepted() {
                    RegistrationStatus::Accepted
                } else {
                    RegistrationStatus::Rejected {
                        status_code: Some(response.status_code),
                    }
                };
                (status, response.request_id)
            }
            Err(e) => {
                tracing::warn!("{}", e);
                (RegistrationStatus::Rejected { status_code: None }, None)
            }
        };

        let correlated = request_id.is_some() && request_id == self.last_request_id;
        if !correlated {
            tracing::warn!(
                "Response request id {:?} does not match {:?}",
                request_id,
                self.last_request_id
            );
        }

        self.state = SessionState::Terminated;

        Some(RegistrationOutcome {
            registration_id: self.registration_id.clone(),
            status,
            request_id,
            expected_request_id: self.last_request_id.clone(),
            correlated,
            body: String::from_utf8_lossy(payload).into_owned(),
            operation: RegistrationOperationStatus::from_payload(payload),
        })
    }
}
