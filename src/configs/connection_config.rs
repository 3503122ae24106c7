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

use crate::error::NsqError;
use crate::validatable::Validatable;
use std::time::Duration;

const MIN_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_REQUEUE_DELAY: Duration = Duration::from_secs(60 * 60);
const MAX_IN_FLIGHT_LIMIT: usize = 65_535;

/// Tuning parameters shared by every connection a consumer or a producer opens.
///
/// Defaults follow the ones used by the official NSQ clients:
/// - `dial_timeout`: 1 second.
/// - `read_timeout`: 60 seconds, must stay above `heartbeat_interval`.
/// - `write_timeout`: 1 second.
/// - `heartbeat_interval`: 30 seconds.
/// - `max_in_flight`: 1 message.
/// - `max_attempts`: 5 deliveries, `0` disables the limit.
/// - `default_requeue_delay`: 90 seconds, multiplied by the attempt count.
/// - `max_requeue_delay`: 15 minutes.
/// - `lookupd_poll_interval`: 60 seconds.
/// - `reconnect_interval`: 15 seconds between re-dials of a dropped nsqd.
/// - `drain_timeout`: 30 seconds to wait for in-flight messages on stop.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Sent to nsqd in IDENTIFY, the short hostname by default.
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Server side message timeout, `None` keeps the nsqd default.
    pub msg_timeout: Option<Duration>,
    pub max_in_flight: usize,
    pub max_attempts: u16,
    pub default_requeue_delay: Duration,
    pub max_requeue_delay: Duration,
    pub lookupd_poll_interval: Duration,
    /// Retries of a single lookupd HTTP query for transient failures.
    pub lookupd_retries: u32,
    pub reconnect_interval: Duration,
    pub drain_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> ConnectionConfig {
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        let client_id = hostname
            .split('.')
            .next()
            .unwrap_or(&hostname)
            .to_string();
        ConnectionConfig {
            client_id,
            hostname,
            user_agent: format!("nsqkit/{}", env!("CARGO_PKG_VERSION")),
            dial_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            msg_timeout: None,
            max_in_flight: 1,
            max_attempts: 5,
            default_requeue_delay: Duration::from_secs(90),
            max_requeue_delay: Duration::from_secs(15 * 60),
            lookupd_poll_interval: Duration::from_secs(60),
            lookupd_retries: 0,
            reconnect_interval: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(30),
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Delay used for a requeue without an explicit delay.
    pub fn requeue_delay(&self, attempts: u16) -> Duration {
        let delay = self
            .default_requeue_delay
            .saturating_mul(u32::from(attempts.max(1)));
        delay.min(self.max_requeue_delay)
    }
}

impl Validatable<NsqError> for ConnectionConfig {
    fn validate(&self) -> Result<(), NsqError> {
        if self.dial_timeout.is_zero() {
            return Err(NsqError::InvalidConfiguration(
                "dial_timeout must be greater than zero".to_string(),
            ));
        }

        for (name, value) in [
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
        ] {
            if value < MIN_TIMEOUT || value > MAX_TIMEOUT {
                return Err(NsqError::InvalidConfiguration(format!(
                    "{name} must be between {MIN_TIMEOUT:?} and {MAX_TIMEOUT:?}"
                )));
            }
        }

        if self.heartbeat_interval < Duration::from_secs(1)
            || self.heartbeat_interval >= self.read_timeout
        {
            return Err(NsqError::InvalidConfiguration(
                "heartbeat_interval must be at least 1s and below read_timeout".to_string(),
            ));
        }

        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT_LIMIT {
            return Err(NsqError::InvalidConfiguration(format!(
                "max_in_flight must be between 1 and {MAX_IN_FLIGHT_LIMIT}"
            )));
        }

        if self.default_requeue_delay > MAX_REQUEUE_DELAY
            || self.max_requeue_delay > MAX_REQUEUE_DELAY
        {
            return Err(NsqError::InvalidConfiguration(
                "requeue delays cannot exceed 60 minutes".to_string(),
            ));
        }

        if self.lookupd_poll_interval < Duration::from_millis(10)
            || self.lookupd_poll_interval > MAX_TIMEOUT
        {
            return Err(NsqError::InvalidConfiguration(
                "lookupd_poll_interval must be between 10ms and 5m".to_string(),
            ));
        }

        if self.reconnect_interval.is_zero() {
            return Err(NsqError::InvalidConfiguration(
                "reconnect_interval must be greater than zero".to_string(),
            ));
        }

        if self.max_frame_size < 1024 {
            return Err(NsqError::InvalidConfiguration(
                "max_frame_size must be at least 1 KiB".to_string(),
            ));
        }

        Ok(())
    }
}
