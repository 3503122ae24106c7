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
use crate::configs::connection_config::ConnectionConfig;
use crate::error::NsqError;
use crate::logging::LogLevel;
use crate::registry::backoff::retry_delay;
use crate::registry::subscriber::{Subscriber, SubscriberFactory};
use derive_more::Display;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Display)]
pub enum WorkerState {
    #[default]
    Idle,
    /// Retrying. With several nsqd addresses some of them may already be consuming.
    Connecting,
    Connected,
    Stopped,
    Failed,
}

/// The subscription of a single topic.
///
/// Clones share the state, subscriber and stop signal, so the registry keeps one copy
/// while another drives [`TopicWorker::connect`] on its own task.
#[derive(Clone)]
pub struct TopicWorker {
    topic: String,
    handler: Arc<dyn MessageHandler>,
    concurrency: usize,
    max_in_flight: usize,
    config: Arc<ConnectionConfig>,
    factory: Arc<dyn SubscriberFactory>,
    link: Arc<WorkerLink>,
}

struct WorkerLink {
    state: Mutex<WorkerState>,
    subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
    stop_sender: broadcast::Sender<()>,
    stopped: AtomicBool,
}

impl Debug for TopicWorker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicWorker")
            .field("topic", &self.topic)
            .field("concurrency", &self.concurrency)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

impl TopicWorker {
    /// `config` is the tuning template, its `max_in_flight` is replaced by the worker's own.
    pub fn new(
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        concurrency: usize,
        max_in_flight: usize,
        config: &ConnectionConfig,
        factory: Arc<dyn SubscriberFactory>,
    ) -> Self {
        let (stop_sender, _) = broadcast::channel(1);
        Self {
            topic: topic.to_string(),
            handler,
            concurrency,
            max_in_flight,
            config: Arc::new(ConnectionConfig {
                max_in_flight,
                ..config.clone()
            }),
            factory,
            link: Arc::new(WorkerLink {
                state: Mutex::new(WorkerState::Idle),
                subscriber: Mutex::new(None),
                stop_sender,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn handler(&self) -> &Arc<dyn MessageHandler> {
        &self.handler
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Replaces the handler, the limits stay as they were when the worker was created.
    pub fn set_handler(&mut self, topic: &str, handler: Arc<dyn MessageHandler>) {
        self.topic = topic.to_string();
        self.handler = handler;
    }

    pub async fn state(&self) -> WorkerState {
        *self.link.state.lock().await
    }

    pub fn is_stopped(&self) -> bool {
        self.link.stopped.load(Ordering::Acquire)
    }

    /// Builds the subscriber and connects it, retrying with backoff until it succeeds or
    /// the worker is stopped. nsqlookupd addresses take precedence over nsqd addresses.
    pub async fn connect(
        &self,
        channel: &str,
        nsqd_addresses: &[String],
        lookupd_addresses: &[String],
        debug: bool,
    ) {
        if nsqd_addresses.is_empty() && lookupd_addresses.is_empty() {
            warn!(
                "No nsqd or nsqlookupd address to subscribe topic: {} with",
                self.topic
            );
            self.set_state(WorkerState::Failed).await;
            return;
        }

        let mut stop_receiver = self.link.stop_sender.subscribe();
        if self.is_stopped() {
            return;
        }

        self.set_state(WorkerState::Connecting).await;
        let subscriber = match self.factory.create(
            &self.topic,
            channel,
            self.config.clone(),
            self.handler.clone(),
            self.concurrency,
        ) {
            Ok(subscriber) => subscriber,
            Err(error) => {
                error!(
                    "Cannot create subscriber of topic: {}, channel: {channel}. {error}",
                    self.topic
                );
                self.set_state(WorkerState::Failed).await;
                return;
            }
        };

        {
            let mut slot = self.link.subscriber.lock().await;
            if self.is_stopped() {
                drop(slot);
                subscriber.stop().await;
                return;
            }
            *slot = Some(subscriber.clone());
        }

        // Partially connected subscribers already consume while the loop retries.
        subscriber.set_log_level(LogLevel::for_debug_flag(debug));

        let mut attempt = 0u64;
        loop {
            let result = tokio::select! {
                result = Self::subscribe(subscriber.as_ref(), nsqd_addresses, lookupd_addresses) => result,
                _ = stop_receiver.recv() => return,
            };

            if self.is_stopped() {
                return;
            }

            match result {
                Ok(()) => {
                    info!(
                        "Subscribed topic: {}, channel: {channel} using nsqd: {nsqd_addresses:?}, nsqlookupd: {lookupd_addresses:?}",
                        self.topic
                    );
                    self.set_state(WorkerState::Connected).await;
                    return;
                }
                Err(error) => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    warn!(
                        "Failed to subscribe topic: {}, nsqd: {nsqd_addresses:?}, nsqlookupd: {lookupd_addresses:?}, attempt: {attempt}, retrying in {delay:?}. {error}",
                        self.topic
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = stop_receiver.recv() => return,
                    }
                }
            }
        }
    }

    async fn subscribe(
        subscriber: &dyn Subscriber,
        nsqd_addresses: &[String],
        lookupd_addresses: &[String],
    ) -> Result<(), NsqError> {
        if !lookupd_addresses.is_empty() {
            if lookupd_addresses.len() == 1 {
                subscriber.connect_to_lookupd(&lookupd_addresses[0]).await
            } else {
                subscriber.connect_to_lookupds(lookupd_addresses).await
            }
        } else if nsqd_addresses.len() == 1 {
            subscriber.connect_to_nsqd(&nsqd_addresses[0]).await
        } else {
            subscriber.connect_to_nsqds(nsqd_addresses).await
        }
    }

    /// Ends the retry loop and gracefully stops the subscriber, if one was created.
    pub async fn stop(&self) {
        if self.link.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.link.stop_sender.send(());
        let subscriber = self.link.subscriber.lock().await.take();
        if let Some(subscriber) = subscriber {
            subscriber.stop().await;
        }
        *self.link.state.lock().await = WorkerState::Stopped;
        info!("Stopped worker of topic: {}", self.topic);
    }

    async fn set_state(&self, state: WorkerState) {
        let mut current = self.link.state.lock().await;
        if *current != WorkerState::Stopped {
            *current = state;
        }
    }
}
