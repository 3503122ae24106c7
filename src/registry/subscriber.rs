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

use crate::clients::handler::MessageHandler;
use crate::clients::nsq_consumer::NsqConsumer;
use crate::configs::connection_config::ConnectionConfig;
use crate::error::NsqError;
use crate::logging::LogLevel;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// A live subscription of one topic, as driven by a topic worker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn connect_to_lookupd(&self, address: &str) -> Result<(), NsqError>;
    async fn connect_to_lookupds(&self, addresses: &[String]) -> Result<(), NsqError>;
    async fn connect_to_nsqd(&self, address: &str) -> Result<(), NsqError>;
    async fn connect_to_nsqds(&self, addresses: &[String]) -> Result<(), NsqError>;
    fn set_log_level(&self, level: LogLevel);
    async fn stop(&self);
}

#[async_trait]
impl Subscriber for NsqConsumer {
    async fn connect_to_lookupd(&self, address: &str) -> Result<(), NsqError> {
        NsqConsumer::connect_to_lookupd(self, address).await
    }

    async fn connect_to_lookupds(&self, addresses: &[String]) -> Result<(), NsqError> {
        NsqConsumer::connect_to_lookupds(self, addresses).await
    }

    async fn connect_to_nsqd(&self, address: &str) -> Result<(), NsqError> {
        NsqConsumer::connect_to_nsqd(self, address).await
    }

    async fn connect_to_nsqds(&self, addresses: &[String]) -> Result<(), NsqError> {
        NsqConsumer::connect_to_nsqds(self, addresses).await
    }

    fn set_log_level(&self, level: LogLevel) {
        NsqConsumer::set_log_level(self, level)
    }

    async fn stop(&self) {
        NsqConsumer::stop(self).await
    }
}

/// Builds the subscriber of a topic worker from `(topic, channel, config, handler, concurrency)`.
pub trait SubscriberFactory: Send + Sync {
    fn create(
        &self,
        topic: &str,
        channel: &str,
        config: Arc<ConnectionConfig>,
        handler: Arc<dyn MessageHandler>,
        concurrency: usize,
    ) -> Result<Arc<dyn Subscriber>, NsqError>;
}

impl<F> SubscriberFactory for F
where
    F: Fn(
            &str,
            &str,
            Arc<ConnectionConfig>,
            Arc<dyn MessageHandler>,
            usize,
        ) -> Result<Arc<dyn Subscriber>, NsqError>
        + Send
        + Sync,
{
    fn create(
        &self,
        topic: &str,
        channel: &str,
        config: Arc<ConnectionConfig>,
        handler: Arc<dyn MessageHandler>,
        concurrency: usize,
    ) -> Result<Arc<dyn Subscriber>, NsqError> {
        (self)(topic, channel, config, handler, concurrency)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NsqSubscriberFactory;

impl SubscriberFactory for NsqSubscriberFactory {
    fn create(
        &self,
        topic: &str,
        channel: &str,
        config: Arc<ConnectionConfig>,
        handler: Arc<dyn MessageHandler>,
        concurrency: usize,
    ) -> Result<Arc<dyn Subscriber>, NsqError> {
        Ok(Arc::new(NsqConsumer::new(
            topic,
            channel,
            config,
            handler,
            concurrency,
        )?))
    }
}
