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
use crate::logging::{LogGate, LogLevel, gated_debug, gated_info, gated_warn};
use crate::protocol::command::{Command, validate_topic_name};
use crate::protocol::frame::OK;
use crate::tcp::nsqd_connection::{ConnectionEvent, NsqdConnection};
use crate::validatable::Validatable;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, trace};

type PendingResponses = Arc<Mutex<VecDeque<oneshot::Sender<Result<Bytes, NsqError>>>>>;

/// Publishes to a single nsqd.
///
/// The connection is opened on the first command and reopened on the next command after
/// it drops. Commands are pipelined and nsqd answers them in order, so every command
/// waiting for a response holds a slot in a FIFO queue that the router task completes.
#[derive(Debug)]
pub struct NsqProducer {
    address: String,
    config: Arc<ConnectionConfig>,
    gate: LogGate,
    link: Mutex<Option<ProducerLink>>,
    stopped: AtomicBool,
}

#[derive(Debug)]
struct ProducerLink {
    connection: Arc<NsqdConnection>,
    pending: PendingResponses,
    router: JoinHandle<()>,
}

impl NsqProducer {
    pub fn new(address: &str, config: Arc<ConnectionConfig>) -> Result<Self, NsqError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(NsqError::MissingProducerAddress);
        }

        config.validate()?;
        Ok(Self {
            address: address.to_string(),
            config,
            gate: LogGate::default(),
            link: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.gate.set_level(level);
    }

    pub fn log_level(&self) -> LogLevel {
        self.gate.level()
    }

    pub async fn publish(&self, topic: &str, body: Bytes) -> Result<(), NsqError> {
        validate_topic_name(topic)?;
        self.send_expecting_ok(Command::Publish {
            topic: topic.to_string(),
            body,
        })
        .await
    }

    pub async fn multi_publish(&self, topic: &str, bodies: Vec<Bytes>) -> Result<(), NsqError> {
        validate_topic_name(topic)?;
        if bodies.is_empty() {
            return Err(NsqError::EmptyMessageBatch);
        }

        self.send_expecting_ok(Command::MultiPublish {
            topic: topic.to_string(),
            bodies,
        })
        .await
    }

    pub async fn deferred_publish(
        &self,
        topic: &str,
        delay: Duration,
        body: Bytes,
    ) -> Result<(), NsqError> {
        validate_topic_name(topic)?;
        self.send_expecting_ok(Command::DeferredPublish {
            topic: topic.to_string(),
            delay,
            body,
        })
        .await
    }

    /// Opens the connection if needed and sends a `NOP`, nsqd does not answer it.
    pub async fn ping(&self) -> Result<(), NsqError> {
        let mut link = self.link.lock().await;
        let link = self.ensure_link(&mut link).await?;
        link.connection.send(Command::Nop).await
    }

    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            trace!("Producer of nsqd: {} is already stopped", self.address);
            return;
        }

        if let Some(link) = self.link.lock().await.take() {
            link.connection.close().await;
            link.router.abort();
            fail_pending(&link.pending, NsqError::ProducerStopped).await;
        }
        gated_info!(self.gate, "Stopped producer of nsqd: {}", self.address);
    }

    async fn send_expecting_ok(&self, command: Command) -> Result<(), NsqError> {
        let response = self.send(command).await?;
        if response == OK {
            Ok(())
        } else {
            Err(NsqError::UnexpectedResponse(
                String::from_utf8_lossy(&response).into_owned(),
            ))
        }
    }

    async fn send(&self, command: Command) -> Result<Bytes, NsqError> {
        let name = command.name();
        let receiver = {
            let mut link = self.link.lock().await;
            let link = self.ensure_link(&mut link).await?;
            let (sender, receiver) = oneshot::channel();
            link.pending.lock().await.push_back(sender);
            if let Err(error) = link.connection.send(command).await {
                link.pending.lock().await.pop_back();
                gated_warn!(
                    self.gate,
                    "Failed to send: {name} to nsqd: {}. {error}",
                    self.address
                );
                return Err(error);
            }
            receiver
        };

        match timeout(self.config.read_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NsqError::Disconnected),
            Err(_) => Err(NsqError::ConnectionTimeout(self.address.clone())),
        }
    }

    async fn ensure_link<'a>(
        &self,
        link: &'a mut Option<ProducerLink>,
    ) -> Result<&'a ProducerLink, NsqError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(NsqError::ProducerStopped);
        }

        if link
            .as_ref()
            .is_some_and(|current| current.connection.is_closed())
        {
            if let Some(stale) = link.take() {
                gated_debug!(self.gate, "Reconnecting to nsqd: {}...", self.address);
                stale.router.abort();
                fail_pending(&stale.pending, NsqError::Disconnected).await;
            }
        }

        if link.is_none() {
            *link = Some(self.open().await?);
        }

        link.as_ref().ok_or(NsqError::NotConnected)
    }

    async fn open(&self) -> Result<ProducerLink, NsqError> {
        let (sender, receiver) = flume::unbounded();
        let connection = NsqdConnection::connect(
            &self.address,
            &self.config,
            None,
            self.gate.clone(),
            sender,
        )
        .await?;
        let pending = PendingResponses::default();
        let router = tokio::spawn(route_responses(receiver, pending.clone()));
        gated_info!(self.gate, "Producer connected to nsqd: {}", self.address);
        Ok(ProducerLink {
            connection,
            pending,
            router,
        })
    }
}

async fn route_responses(receiver: flume::Receiver<ConnectionEvent>, pending: PendingResponses) {
    while let Ok(event) = receiver.recv_async().await {
        let (address, result) = match event {
            ConnectionEvent::Response { address, data } => (address, Ok(data)),
            ConnectionEvent::Error { address, data } => (
                address,
                Err(NsqError::BrokerError(
                    String::from_utf8_lossy(&data).into_owned(),
                )),
            ),
            ConnectionEvent::Closed { address } => {
                trace!("Producer connection to nsqd: {address} closed");
                fail_pending(&pending, NsqError::Disconnected).await;
                return;
            }
            ConnectionEvent::Message(message) => {
                error!(
                    "Producer connection to nsqd: {} received an unexpected message",
                    message.connection.address()
                );
                continue;
            }
        };

        match pending.lock().await.pop_front() {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => trace!("Unsolicited response from nsqd: {address}: {result:?}"),
        }
    }
}

async fn fail_pending(pending: &PendingResponses, error: NsqError) {
    for sender in pending.lock().await.drain(..) {
        let _ = sender.send(Err(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer() -> NsqProducer {
        NsqProducer::new("127.0.0.1:4150", Arc::new(ConnectionConfig::default())).unwrap()
    }

    #[test]
    fn should_require_address() {
        let error = NsqProducer::new("  ", Arc::new(ConnectionConfig::default())).unwrap_err();
        assert_eq!(error, NsqError::MissingProducerAddress);
    }

    #[tokio::test]
    async fn should_validate_before_connecting() {
        let producer = producer();
        assert_eq!(
            producer.multi_publish("events", Vec::new()).await,
            Err(NsqError::EmptyMessageBatch)
        );
        assert_eq!(
            producer.publish("bad topic", Bytes::new()).await,
            Err(NsqError::InvalidTopicName("bad topic".to_string()))
        );
    }

    #[tokio::test]
    async fn should_refuse_commands_after_stop() {
        let producer = producer();
        producer.stop().await;
        producer.stop().await;
        assert_eq!(
            producer.publish("events", Bytes::from_static(b"x")).await,
            Err(NsqError::ProducerStopped)
        );
        assert_eq!(producer.ping().await, Err(NsqError::ProducerStopped));
    }
}
