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

use crate::configs::connection_config::ConnectionConfig;
use crate::error::NsqError;
use crate::validatable::Validatable;
use std::time::Duration;

/// Builder for the connection configuration.
///
/// Starts from [`ConnectionConfig::default`] and validates the result in `build()`.
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Creates a new builder instance with default configuration values.
    pub fn new() -> Self {
        ConnectionConfigBuilder::default()
    }

    /// Sets the client identifier sent in IDENTIFY.
    pub fn with_client_id(mut self, client_id: String) -> Self {
        self.config.client_id = client_id;
        self
    }

    pub fn with_hostname(mut self, hostname: String) -> Self {
        self.config.hostname = hostname;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    /// Sets the TCP dial timeout. Defaults to 1 second.
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.config.dial_timeout = dial_timeout;
        self
    }

    /// Sets the read timeout. Defaults to 60 seconds.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.config.read_timeout = read_timeout;
        self
    }

    /// Sets the write timeout. Defaults to 1 second.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.config.write_timeout = write_timeout;
        self
    }

    /// Sets the heartbeat interval negotiated with nsqd. Defaults to 30 seconds.
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.config.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn with_msg_timeout(mut self, msg_timeout: Duration) -> Self {
        self.config.msg_timeout = Some(msg_timeout);
        self
    }

    /// Sets the maximum number of messages in flight. Defaults to 1.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.config.max_in_flight = max_in_flight;
        self
    }

    /// Sets the maximum number of delivery attempts, `0` means unlimited. Defaults to 5.
    pub fn with_max_attempts(mut self, max_attempts: u16) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn with_default_requeue_delay(mut self, delay: Duration) -> Self {
        self.config.default_requeue_delay = delay;
        self
    }

    pub fn with_max_requeue_delay(mut self, delay: Duration) -> Self {
        self.config.max_requeue_delay = delay;
        self
    }

    /// Sets how often lookupd is polled for new producers. Defaults to 60 seconds.
    pub fn with_lookupd_poll_interval(mut self, interval: Duration) -> Self {
        self.config.lookupd_poll_interval = interval;
        self
    }

    pub fn with_lookupd_retries(mut self, retries: u32) -> Self {
        self.config.lookupd_retries = retries;
        self
    }

    /// Sets the interval between re-dials of a dropped nsqd. Defaults to 15 seconds.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Sets how long stop waits for in-flight messages. Defaults to 30 seconds.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.config.drain_timeout = drain_timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.config.max_frame_size = max_frame_size;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ConnectionConfig, NsqError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
