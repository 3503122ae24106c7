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

use crate::clients::nsq_producer::NsqProducer;
use crate::configs::client_config::ConfigSection;
use crate::configs::connection_config::ConnectionConfig;
use crate::error::NsqError;
use crate::logging::LogLevel;
use crate::marshal::MessageValue;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const NSQD_KEY: &str = "nsqd";

/// Publishes to the single nsqd named in the `[producer]` section.
///
/// `init` reads the configuration, `run` creates the underlying [`NsqProducer`], whose
/// connection is opened by the first publish.
#[derive(Debug, Default)]
pub struct Producer {
    initialized: bool,
    debug: bool,
    nsqd_address: String,
    connection_config: Arc<ConnectionConfig>,
    connection: Option<NsqProducer>,
}

impl Producer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = Arc::new(config);
        self
    }

    pub fn init(&mut self, section: &ConfigSection, debug: bool) -> Result<(), NsqError> {
        let address = section
            .get(NSQD_KEY)
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .ok_or(NsqError::MissingProducerAddress)?;
        self.nsqd_address = address.to_string();
        self.debug = debug;
        self.initialized = true;
        debug!("Initialized producer of nsqd: {}", self.nsqd_address);
        Ok(())
    }

    /// Creates the underlying producer, a no-op when it already exists.
    pub fn run(&mut self) -> Result<(), NsqError> {
        if !self.initialized {
            return Err(NsqError::ProducerNotInitialized);
        }

        if self.connection.is_some() {
            debug!("Producer of nsqd: {} is already running", self.nsqd_address);
            return Ok(());
        }

        let connection = NsqProducer::new(&self.nsqd_address, self.connection_config.clone())
            .map_err(|error| NsqError::CannotCreateProducer(error.to_string()))?;
        connection.set_log_level(LogLevel::for_debug_flag(self.debug));
        self.connection = Some(connection);
        info!("Producer of nsqd: {} is running", self.nsqd_address);
        Ok(())
    }

    pub async fn publish(&self, topic: &str, value: impl Into<MessageValue>) -> Result<(), NsqError> {
        let connection = self.connection()?;
        let body = value.into().encode()?;
        connection.publish(topic, body).await
    }

    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
    ) -> Result<(), NsqError> {
        let connection = self.connection()?;
        let body = MessageValue::structured(value)?.encode()?;
        connection.publish(topic, body).await
    }

    pub async fn multi_publish<I, V>(&self, topic: &str, values: I) -> Result<(), NsqError>
    where
        I: IntoIterator<Item = V>,
        V: Into<MessageValue>,
    {
        let connection = self.connection()?;
        let bodies = values
            .into_iter()
            .map(|value| value.into().encode())
            .collect::<Result<Vec<_>, _>>()?;
        connection.multi_publish(topic, bodies).await
    }

    pub async fn deferred_publish(
        &self,
        topic: &str,
        value: impl Into<MessageValue>,
        delay_seconds: u64,
    ) -> Result<(), NsqError> {
        let connection = self.connection()?;
        let body = value.into().encode()?;
        connection
            .deferred_publish(topic, Duration::from_secs(delay_seconds), body)
            .await
    }

    pub async fn ping(&self) -> Result<(), NsqError> {
        self.connection()?.ping().await
    }

    pub async fn stop(&mut self) {
        match self.connection.take() {
            Some(connection) => connection.stop().await,
            None => debug!("Producer was never started, nothing to stop"),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_running(&self) -> bool {
        self.connection.is_some()
    }

    pub fn nsqd_address(&self) -> &str {
        &self.nsqd_address
    }

    fn connection(&self) -> Result<&NsqProducer, NsqError> {
        if !self.initialized {
            return Err(NsqError::ProducerNotInitialized);
        }

        self.connection.as_ref().ok_or(NsqError::NotConnected)
    }
}
