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

use crate::clients::handler::{Delivery, HandlerDecision, MessageHandler};
use crate::configs::connection_config::ConnectionConfig;
use crate::error::NsqError;
use crate::logging::{LogGate, LogLevel, gated_debug, gated_info, gated_warn};
use crate::lookup::lookupd_client::LookupdClient;
use crate::protocol::command::{validate_channel_name, validate_topic_name};
use crate::protocol::message::MessageId;
use crate::tcp::nsqd_connection::{ConnectionEvent, InFlightMessage, NsqdConnection};
use crate::validatable::Validatable;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{error, trace};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Counters of a consumer since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub messages_received: u64,
    pub messages_finished: u64,
    pub messages_requeued: u64,
    pub connections: usize,
}

/// Subscribes one `(topic, channel)` pair on any number of nsqd nodes, either dialed
/// directly or discovered through nsqlookupd, and fans the delivered messages out to
/// `concurrency` handler workers.
#[derive(Debug)]
pub struct NsqConsumer {
    core: Arc<ConsumerCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct ConsumerCore {
    topic: String,
    channel: String,
    config: Arc<ConnectionConfig>,
    handler: Arc<dyn MessageHandler>,
    concurrency: usize,
    gate: LogGate,
    lookupd: LookupdClient,
    connections: Mutex<HashMap<String, Arc<NsqdConnection>>>,
    nsqd_addresses: Mutex<Vec<String>>,
    lookupd_addresses: Mutex<Vec<String>>,
    events: (
        flume::Sender<ConnectionEvent>,
        flume::Receiver<ConnectionEvent>,
    ),
    stop_sender: broadcast::Sender<()>,
    stopping: AtomicBool,
    workers_started: AtomicBool,
    lookupd_loop_started: AtomicBool,
    connection_count: AtomicUsize,
    messages_received: AtomicU64,
    messages_finished: AtomicU64,
    messages_requeued: AtomicU64,
}

impl std::fmt::Debug for ConsumerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerCore")
            .field("topic", &self.topic)
            .field("channel", &self.channel)
            .field("concurrency", &self.concurrency)
            .field("stopping", &self.stopping)
            .finish_non_exhaustive()
    }
}

impl NsqConsumer {
    pub fn new(
        topic: &str,
        channel: &str,
        config: Arc<ConnectionConfig>,
        handler: Arc<dyn MessageHandler>,
        concurrency: usize,
    ) -> Result<Self, NsqError> {
        validate_topic_name(topic)?;
        validate_channel_name(channel)?;
        config.validate()?;
        let lookupd = LookupdClient::new(&config)?;
        let (stop_sender, _) = broadcast::channel(1);

        Ok(Self {
            core: Arc::new(ConsumerCore {
                topic: topic.to_string(),
                channel: channel.to_string(),
                config,
                handler,
                concurrency: concurrency.max(1),
                gate: LogGate::default(),
                lookupd,
                connections: Mutex::new(HashMap::new()),
                nsqd_addresses: Mutex::new(Vec::new()),
                lookupd_addresses: Mutex::new(Vec::new()),
                events: flume::unbounded(),
                stop_sender,
                stopping: AtomicBool::new(false),
                workers_started: AtomicBool::new(false),
                lookupd_loop_started: AtomicBool::new(false),
                connection_count: AtomicUsize::new(0),
                messages_received: AtomicU64::new(0),
                messages_finished: AtomicU64::new(0),
                messages_requeued: AtomicU64::new(0),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn topic(&self) -> &str {
        &self.core.topic
    }

    pub fn channel(&self) -> &str {
        &self.core.channel
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.core.gate.set_level(level);
    }

    pub fn log_level(&self) -> LogLevel {
        self.core.gate.level()
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            messages_received: self.core.messages_received.load(Ordering::Relaxed),
            messages_finished: self.core.messages_finished.load(Ordering::Relaxed),
            messages_requeued: self.core.messages_requeued.load(Ordering::Relaxed),
            connections: self.core.connection_count.load(Ordering::Relaxed),
        }
    }

    /// Connects to a single nsqd, a no-op when an open connection to it already exists.
    /// Directly configured addresses are re-dialed after the connection drops.
    pub async fn connect_to_nsqd(&self, address: &str) -> Result<(), NsqError> {
        self.ensure_running().await?;
        remember(&self.core.nsqd_addresses, address).await;
        self.core.dial(address).await
    }

    /// Connects to every address, returning the first failure after attempting them all.
    pub async fn connect_to_nsqds(&self, addresses: &[String]) -> Result<(), NsqError> {
        if addresses.is_empty() {
            return Err(NsqError::MissingAddress);
        }

        let mut first_error = None;
        for address in addresses {
            if let Err(error) = self.connect_to_nsqd(address).await {
                gated_warn!(self.core.gate, "Failed to connect to nsqd: {address}. {error}");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub async fn connect_to_lookupd(&self, address: &str) -> Result<(), NsqError> {
        self.connect_to_lookupds(&[address.to_string()]).await
    }

    /// Queries every nsqlookupd once and connects to the producers found. Succeeds when at
    /// least one query did, then keeps polling the lookupd addresses in rotation.
    pub async fn connect_to_lookupds(&self, addresses: &[String]) -> Result<(), NsqError> {
        if addresses.is_empty() {
            return Err(NsqError::MissingAddress);
        }

        self.ensure_running().await?;
        for address in addresses {
            remember(&self.core.lookupd_addresses, address).await;
        }

        let mut last_error = None;
        let mut queried = false;
        for address in addresses {
            match self.core.query_lookupd(address).await {
                Ok(()) => queried = true,
                Err(error) => {
                    gated_warn!(self.core.gate, "Failed to query nsqlookupd: {address}. {error}");
                    last_error = Some(error);
                }
            }
        }

        if !queried {
            return Err(last_error.unwrap_or(NsqError::MissingAddress));
        }

        if !self.core.lookupd_loop_started.swap(true, Ordering::AcqRel) {
            tokio::spawn(poll_lookupd(self.core.clone()));
        }
        Ok(())
    }

    /// Sends `CLS` to every connection, waits for in-flight messages up to the drain
    /// timeout, then closes the connections and the handler workers.
    pub async fn stop(&self) {
        if self.core.stopping.swap(true, Ordering::AcqRel) {
            trace!("Consumer of topic: {} is already stopped", self.core.topic);
            return;
        }

        gated_info!(
            self.core.gate,
            "Stopping consumer of topic: {}, channel: {}...",
            self.core.topic,
            self.core.channel
        );
        let connections = self
            .core
            .connections
            .lock()
            .await
            .drain()
            .map(|(_, connection)| connection)
            .collect::<Vec<_>>();
        self.core.connection_count.store(0, Ordering::Relaxed);

        for connection in &connections {
            if let Err(error) = connection.start_close().await {
                gated_debug!(
                    self.core.gate,
                    "Failed to send CLS to nsqd: {}. {error}",
                    connection.address()
                );
            }
        }

        let deadline = Instant::now() + self.core.config.drain_timeout;
        while connections
            .iter()
            .any(|connection| !connection.is_closed() && connection.in_flight() > 0)
        {
            if Instant::now() >= deadline {
                gated_warn!(
                    self.core.gate,
                    "Drain timeout elapsed with messages still in flight for topic: {}",
                    self.core.topic
                );
                break;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }

        for connection in &connections {
            connection.close().await;
        }

        let _ = self.core.stop_sender.send(());
        for worker in self.workers.lock().await.drain(..) {
            if let Err(error) = worker.await {
                error!("Handler worker of topic: {} failed. {error}", self.core.topic);
            }
        }
        gated_info!(
            self.core.gate,
            "Stopped consumer of topic: {}, channel: {}",
            self.core.topic,
            self.core.channel
        );
    }

    async fn ensure_running(&self) -> Result<(), NsqError> {
        if self.core.is_stopping() {
            return Err(NsqError::ConsumerStopped);
        }

        if self.core.workers_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut workers = self.workers.lock().await;
        for _ in 0..self.core.concurrency {
            workers.push(tokio::spawn(handle_events(
                self.core.clone(),
                self.core.stop_sender.subscribe(),
            )));
        }
        gated_debug!(
            self.core.gate,
            "Started {} handler worker(s) for topic: {}",
            self.core.concurrency,
            self.core.topic
        );
        Ok(())
    }
}

impl ConsumerCore {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    async fn dial(&self, address: &str) -> Result<(), NsqError> {
        if let Some(connection) = self.connections.lock().await.get(address) {
            if !connection.is_closed() {
                trace!("Already connected to nsqd: {address}");
                return Ok(());
            }
        }

        let connection = NsqdConnection::connect(
            address,
            &self.config,
            Some((self.topic.as_str(), self.channel.as_str())),
            self.gate.clone(),
            self.events.0.clone(),
        )
        .await?;

        {
            let mut connections = self.connections.lock().await;
            if self.is_stopping() {
                drop(connections);
                connection.close().await;
                return Err(NsqError::ConsumerStopped);
            }

            if let Some(existing) = connections.get(address) {
                if !existing.is_closed() {
                    drop(connections);
                    connection.close().await;
                    return Ok(());
                }
            }

            connections.insert(address.to_string(), connection);
            self.connection_count
                .store(connections.len(), Ordering::Relaxed);
        }

        gated_info!(
            self.gate,
            "Connected to nsqd: {address} for topic: {}, channel: {}",
            self.topic,
            self.channel
        );
        self.rebalance().await;
        Ok(())
    }

    /// Spreads `max_in_flight` evenly over the open connections, at least 1 each.
    async fn rebalance(&self) {
        if self.is_stopping() {
            return;
        }

        let connections = self
            .connections
            .lock()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        if connections.is_empty() {
            return;
        }

        let count = (self.config.max_in_flight / connections.len()).max(1) as u64;
        for connection in connections {
            if let Err(error) = connection.ready(count).await {
                gated_warn!(
                    self.gate,
                    "Failed to update RDY for nsqd: {}. {error}",
                    connection.address()
                );
            }
        }
    }

    async fn query_lookupd(&self, address: &str) -> Result<(), NsqError> {
        let producers = self.lookupd.lookup(address, &self.topic).await?;
        for producer in producers {
            if let Err(error) = self.dial(&producer).await {
                gated_warn!(
                    self.gate,
                    "Failed to connect to nsqd: {producer} discovered by nsqlookupd: {address}. {error}"
                );
            }
        }
        Ok(())
    }

    async fn handle_message(&self, in_flight: InFlightMessage) {
        let InFlightMessage {
            message,
            connection,
        } = in_flight;
        self.messages_received.fetch_add(1, Ordering::Relaxed);

        let max_attempts = self.config.max_attempts;
        if max_attempts > 0 && message.attempts > max_attempts {
            gated_warn!(
                self.gate,
                "Message: {} of topic: {} exceeded {max_attempts} attempts, giving up",
                message.id,
                self.topic
            );
            self.finish(&connection, &message.id).await;
            return;
        }

        let delivery = Delivery {
            id: message.id,
            attempts: message.attempts,
            timestamp: message.timestamp,
            nsqd_address: Arc::from(connection.address()),
        };
        let decision = AssertUnwindSafe(self.handler.handle(message.body, delivery))
            .catch_unwind()
            .await;

        match decision {
            Ok(HandlerDecision::Finish) => self.finish(&connection, &message.id).await,
            Ok(HandlerDecision::Requeue(delay)) => {
                let delay = delay
                    .map(|delay| delay.min(self.config.max_requeue_delay))
                    .unwrap_or_else(|| self.config.requeue_delay(message.attempts));
                self.requeue(&connection, &message.id, delay).await;
            }
            Ok(HandlerDecision::Fail) => {
                gated_warn!(
                    self.gate,
                    "Handler failed message: {} of topic: {}, finishing it",
                    message.id,
                    self.topic
                );
                self.finish(&connection, &message.id).await;
            }
            Err(_) => {
                error!(
                    "Handler panicked on message: {} of topic: {}, requeueing it",
                    message.id, self.topic
                );
                let delay = self.config.requeue_delay(message.attempts);
                self.requeue(&connection, &message.id, delay).await;
            }
        }
    }

    async fn finish(&self, connection: &NsqdConnection, id: &MessageId) {
        match connection.finish(*id).await {
            Ok(()) => {
                self.messages_finished.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => gated_warn!(
                self.gate,
                "Failed to finish message: {id} on nsqd: {}. {error}",
                connection.address()
            ),
        }
    }

    async fn requeue(
        &self,
        connection: &NsqdConnection,
        id: &MessageId,
        delay: Duration,
    ) {
        match connection.requeue(*id, delay).await {
            Ok(()) => {
                self.messages_requeued.fetch_add(1, Ordering::Relaxed);
                gated_debug!(self.gate, "Requeued message: {id} with delay: {delay:?}");
            }
            Err(error) => gated_warn!(
                self.gate,
                "Failed to requeue message: {id} on nsqd: {}. {error}",
                connection.address()
            ),
        }
    }

    async fn handle_closed(self: &Arc<Self>, address: &str) {
        {
            let mut connections = self.connections.lock().await;
            let dropped = connections
                .get(address)
                .is_some_and(|connection| connection.is_closed());
            if !dropped {
                return;
            }

            connections.remove(address);
            self.connection_count
                .store(connections.len(), Ordering::Relaxed);
        }

        if self.is_stopping() {
            return;
        }

        gated_warn!(
            self.gate,
            "Lost connection to nsqd: {address} for topic: {}",
            self.topic
        );
        self.rebalance().await;
        if self.nsqd_addresses.lock().await.iter().any(|known| known == address) {
            tokio::spawn(reconnect(self.clone(), address.to_string()));
        }
    }
}

async fn remember(addresses: &Mutex<Vec<String>>, address: &str) {
    let mut addresses = addresses.lock().await;
    if !addresses.iter().any(|known| known == address) {
        addresses.push(address.to_string());
    }
}

async fn handle_events(core: Arc<ConsumerCore>, mut stop_receiver: broadcast::Receiver<()>) {
    let receiver = core.events.1.clone();
    loop {
        tokio::select! {
            event = receiver.recv_async() => {
                let Ok(event) = event else {
                    break;
                };
                match event {
                    ConnectionEvent::Message(in_flight) => core.handle_message(in_flight).await,
                    ConnectionEvent::Response { address, data } => {
                        trace!("Response from nsqd: {address}: {}", String::from_utf8_lossy(&data));
                    }
                    ConnectionEvent::Error { address, data } => {
                        gated_debug!(
                            core.gate,
                            "nsqd: {address} reported: {}",
                            String::from_utf8_lossy(&data)
                        );
                    }
                    ConnectionEvent::Closed { address } => core.handle_closed(&address).await,
                }
            }
            _ = stop_receiver.recv() => break,
        }
    }
    trace!("Handler worker of topic: {} finished", core.topic);
}

async fn reconnect(core: Arc<ConsumerCore>, address: String) {
    let mut stop_receiver = core.stop_sender.subscribe();
    loop {
        tokio::select! {
            _ = sleep(core.config.reconnect_interval) => {}
            _ = stop_receiver.recv() => return,
        }

        if core.is_stopping() {
            return;
        }

        match core.dial(&address).await {
            Ok(()) => return,
            Err(error) => gated_warn!(
                core.gate,
                "Failed to reconnect to nsqd: {address}, retrying in {:?}. {error}",
                core.config.reconnect_interval
            ),
        }
    }
}

async fn poll_lookupd(core: Arc<ConsumerCore>) {
    let mut stop_receiver = core.stop_sender.subscribe();
    let mut next = 0usize;
    loop {
        tokio::select! {
            _ = sleep(core.config.lookupd_poll_interval) => {}
            _ = stop_receiver.recv() => return,
        }

        if core.is_stopping() {
            return;
        }

        let address = {
            let addresses = core.lookupd_addresses.lock().await;
            if addresses.is_empty() {
                continue;
            }
            let address = addresses[next % addresses.len()].clone();
            next = next.wrapping_add(1);
            address
        };

        if let Err(error) = core.query_lookupd(&address).await {
            gated_warn!(core.gate, "Failed to poll nsqlookupd: {address}. {error}");
        }
    }
}
