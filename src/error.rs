/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use strum::{EnumDiscriminants, IntoStaticStr};
use thiserror::Error;

#[derive(Clone, Debug, Error, EnumDiscriminants, IntoStaticStr, PartialEq)]
#[repr(u32)]
#[strum(serialize_all = "snake_case")]
#[strum_discriminants(
    vis(pub),
    derive(IntoStaticStr),
    strum(serialize_all = "snake_case")
)]
pub enum NsqError {
    #[error("Error")]
    Error = 1,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String) = 2,
    #[error("Cannot read configuration file: {0}")]
    CannotReadConfiguration(String) = 3,
    #[error("Cannot parse configuration: {0}")]
    CannotParseConfiguration(String) = 4,
    #[error("Max in flight: {0} must be greater than or equal to concurrency: {1}")]
    MaxInFlightBelowConcurrency(usize, usize) = 5,
    #[error("Missing [producer] nsqd address")]
    MissingProducerAddress = 6,
    #[error("Either an nsqd or an nsqlookupd address is required")]
    MissingAddress = 7,
    #[error("Invalid address: {0}")]
    InvalidAddress(String) = 8,
    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String) = 9,
    #[error("Invalid channel name: {0}")]
    InvalidChannelName(String) = 10,
    #[error("Consumer not initialized")]
    ConsumerNotInitialized = 20,
    #[error("Consumer is already running")]
    ConsumerAlreadyRunning = 21,
    #[error("Consumer has been stopped")]
    ConsumerStopped = 22,
    #[error("Producer not initialized")]
    ProducerNotInitialized = 30,
    #[error("Cannot create producer: {0}")]
    CannotCreateProducer(String) = 31,
    #[error("Producer has been stopped")]
    ProducerStopped = 32,
    #[error("Not connected")]
    NotConnected = 40,
    #[error("Disconnected")]
    Disconnected = 41,
    #[error("Cannot establish connection to: {0}")]
    CannotEstablishConnection(String) = 42,
    #[error("Connection to: {0} timed out")]
    ConnectionTimeout(String) = 43,
    #[error("TCP error")]
    TcpError = 44,
    #[error("Identify failed: {0}")]
    IdentifyFailed(String) = 50,
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String) = 51,
    #[error("Invalid frame type: {0}")]
    InvalidFrameType(i32) = 52,
    #[error("Frame size: {0} exceeds the limit: {1}")]
    FrameTooLarge(usize, usize) = 53,
    #[error("Invalid message")]
    InvalidMessage = 54,
    #[error("Broker error: {0}")]
    BrokerError(String) = 55,
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String) = 56,
    #[error("Empty message batch")]
    EmptyMessageBatch = 57,
    #[error("Lookup failed for: {0}, reason: {1}")]
    LookupFailed(String, String) = 60,
    #[error("Invalid lookup response from: {0}")]
    InvalidLookupResponse(String) = 61,
    #[error("Cannot marshal message: {0}")]
    CannotMarshalMessage(String) = 70,
}

impl NsqError {
    pub fn as_code(&self) -> u32 {
        // SAFETY: the enum is `repr(u32)`, so its discriminant is stored as the
        // first field of the layout.
        unsafe { *(self as *const Self as *const u32) }
    }

    pub fn as_string(&self) -> &'static str {
        self.into()
    }

    /// Errors that a later attempt might not run into again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NsqError::NotConnected
                | NsqError::Disconnected
                | NsqError::CannotEstablishConnection(_)
                | NsqError::ConnectionTimeout(_)
                | NsqError::TcpError
                | NsqError::LookupFailed(_, _)
                | NsqError::InvalidLookupResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_expose_stable_codes() {
        assert_eq!(NsqError::Error.as_code(), 1);
        assert_eq!(NsqError::MaxInFlightBelowConcurrency(10, 50).as_code(), 5);
        assert_eq!(NsqError::ConsumerNotInitialized.as_code(), 20);
        assert_eq!(
            NsqError::CannotMarshalMessage("boom".to_string()).as_code(),
            70
        );
    }

    #[test]
    fn should_render_snake_case_names() {
        assert_eq!(NsqError::MissingAddress.as_string(), "missing_address");
        let name: &'static str = NsqErrorDiscriminants::ProducerNotInitialized.into();
        assert_eq!(name, "producer_not_initialized");
    }

    #[test]
    fn should_classify_transient_errors() {
        assert!(NsqError::CannotEstablishConnection("127.0.0.1:4150".into()).is_transient());
        assert!(!NsqError::InvalidTopicName("bad topic".into()).is_transient());
    }
}
