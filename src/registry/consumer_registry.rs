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
use crate::configs::client_config::ConfigSection;
use crate::configs::connection_config::ConnectionConfig;
use crate::error::NsqError;
use crate::registry::subscriber::{NsqSubscriberFactory, SubscriberFactory};
use crate::registry::topic_worker::TopicWorker;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const NSQD_KEY: &str = "nsqd";
pub const NSQLOOKUPD_KEY: &str = "nsqlookupd";
pub const CHANNEL_KEY: &str = "channel";
pub const MAX_IN_FLIGHT_KEY: &str = "maxInFlight";
pub const CONCURRENT_KEY: &str = "concurrent";

/// Registers one handler per topic and, once running, keeps a subscription per topic
/// alive on its own task.
///
/// ```no_run
/// # use bytes::Bytes;
/// # use nsqkit::prelude::*;
/// # use std::sync::Arc;
/// # async fn example() -> Result<(), NsqError> {
/// let section = ConfigSection::new()
///     .with("nsqlookupd", "127.0.0.1:4161")
///     .with("channel", "billing");
/// let mut registry = ConsumerRegistry::new();
/// registry.init(&section, false)?;
/// registry.add_handler("orders", Arc::new(|body: Bytes, _delivery: Delivery| async move {
///     println!("{}", String::from_utf8_lossy(&body));
///     HandlerDecision::Finish
/// }))?;
/// registry.run()?;
/// # Ok(())
/// # }
/// ```
pub struct ConsumerRegistry {
    initialized: bool,
    running: bool,
    debug: bool,
    channel_name: String,
    concurrency: usize,
    max_in_flight: usize,
    nsqd_addresses: Vec<String>,
    lookupd_addresses: Vec<String>,
    topics: HashMap<String, TopicWorker>,
    connection_config: ConnectionConfig,
    factory: Arc<dyn SubscriberFactory>,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("initialized", &self.initialized)
            .field("running", &self.running)
            .field("channel_name", &self.channel_name)
            .field("concurrency", &self.concurrency)
            .field("max_in_flight", &self.max_in_flight)
            .field("nsqd_addresses", &self.nsqd_addresses)
            .field("lookupd_addresses", &self.lookupd_addresses)
            .field("topics", &self.topics.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(NsqSubscriberFactory))
    }

    pub fn with_factory(factory: Arc<dyn SubscriberFactory>) -> Self {
        Self {
            initialized: false,
            running: false,
            debug: false,
            channel_name: String::new(),
            concurrency: 1,
            max_in_flight: 1,
            nsqd_addresses: Vec::new(),
            lookupd_addresses: Vec::new(),
            topics: HashMap::new(),
            connection_config: ConnectionConfig::default(),
            factory,
            tasks: HashMap::new(),
        }
    }

    /// Tuning applied to the workers created from now on.
    pub fn with_connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection_config = config;
        self
    }

    /// Reads `nsqd`, `nsqlookupd`, `channel`, `maxInFlight` and `concurrent`.
    pub fn init(&mut self, section: &ConfigSection, debug: bool) -> Result<(), NsqError> {
        if let Some(addresses) = section.get_list(NSQD_KEY) {
            self.nsqd_addresses = addresses;
        }
        if let Some(addresses) = section.get_list(NSQLOOKUPD_KEY) {
            self.lookupd_addresses = addresses;
        }
        if let Some(channel) = section.get(CHANNEL_KEY).map(str::trim) {
            self.channel_name = channel.to_string();
        }
        if let Some(max_in_flight) = section.get_positive(MAX_IN_FLIGHT_KEY) {
            self.max_in_flight = max_in_flight;
        }
        if let Some(concurrency) = section.get_positive(CONCURRENT_KEY) {
            self.concurrency = concurrency;
        }

        self.max_in_flight = self.max_in_flight.max(1);
        self.concurrency = self.concurrency.max(1);
        if self.max_in_flight < self.concurrency {
            error!(
                "Max in flight: {} is lower than concurrency: {}",
                self.max_in_flight, self.concurrency
            );
            return Err(NsqError::MaxInFlightBelowConcurrency(
                self.max_in_flight,
                self.concurrency,
            ));
        }

        self.debug = debug;
        self.initialized = true;
        debug!(
            "Initialized consumer registry, nsqd: {:?}, nsqlookupd: {:?}, channel: {}, max in flight: {}, concurrency: {}",
            self.nsqd_addresses,
            self.lookupd_addresses,
            self.channel_name,
            self.max_in_flight,
            self.concurrency
        );
        Ok(())
    }

    /// Registers or replaces the handler of `topic`. A new worker takes the current
    /// concurrency and max in flight, an existing one keeps its own.
    pub fn add_handler(
        &mut self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), NsqError> {
        if self.running {
            return Err(NsqError::ConsumerAlreadyRunning);
        }

        match self.topics.get_mut(topic) {
            Some(worker) => worker.set_handler(topic, handler),
            None => {
                let worker = TopicWorker::new(
                    topic,
                    handler,
                    self.concurrency,
                    self.max_in_flight,
                    &self.connection_config,
                    self.factory.clone(),
                );
                self.topics.insert(topic.to_string(), worker);
            }
        }
        Ok(())
    }

    pub fn set_channel_name(&mut self, channel: &str) {
        self.channel_name = channel.to_string();
    }

    pub fn set_nsqd_address(&mut self, address: &str) {
        add_unique(&mut self.nsqd_addresses, address);
    }

    pub fn set_multi_nsqd_addresses(&mut self, addresses: &[&str]) {
        for address in addresses {
            self.set_nsqd_address(address);
        }
    }

    pub fn set_lookupd_address(&mut self, address: &str) {
        add_unique(&mut self.lookupd_addresses, address);
    }

    pub fn set_multi_lookupd_addresses(&mut self, addresses: &[&str]) {
        for address in addresses {
            self.set_lookupd_address(address);
        }
    }

    /// Starts one task per registered topic and returns without waiting for any of them
    /// to connect. Must be called within a tokio runtime.
    pub fn run(&mut self) -> Result<(), NsqError> {
        if !self.initialized {
            return Err(NsqError::ConsumerNotInitialized);
        }

        if self.nsqd_addresses.is_empty() && self.lookupd_addresses.is_empty() {
            return Err(NsqError::MissingAddress);
        }

        if self.running {
            return Err(NsqError::ConsumerAlreadyRunning);
        }

        let runtime = Handle::try_current()
            .map_err(|error| NsqError::InvalidConfiguration(error.to_string()))?;
        self.running = true;
        for (topic, worker) in &self.topics {
            let worker = worker.clone();
            let channel = self.channel_name.clone();
            let nsqd_addresses = self.nsqd_addresses.clone();
            let lookupd_addresses = self.lookupd_addresses.clone();
            let debug = self.debug;
            let task = runtime.spawn(async move {
                worker
                    .connect(&channel, &nsqd_addresses, &lookupd_addresses, debug)
                    .await
            });
            self.tasks.insert(topic.clone(), task);
        }
        info!(
            "Consumer registry started {} topic worker(s) on channel: {}",
            self.topics.len(),
            self.channel_name
        );
        Ok(())
    }

    /// Stops the worker of `topic`, nothing happens for an unknown topic.
    pub async fn stop(&mut self, topic: &str) {
        let Some(worker) = self.topics.get(topic) else {
            debug!("No worker to stop for topic: {topic}");
            return;
        };

        worker.stop().await;
        if let Some(task) = self.tasks.remove(topic) {
            if let Err(error) = task.await {
                error!("Worker task of topic: {topic} failed. {error}");
            }
        }
    }

    /// Stops every worker concurrently, then waits for their tasks.
    pub async fn stop_all(&mut self) {
        join_all(self.topics.values().map(|worker| worker.stop())).await;
        for (topic, task) in self.tasks.drain() {
            if let Err(error) = task.await {
                error!("Worker task of topic: {topic} failed. {error}");
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn nsqd_addresses(&self) -> &[String] {
        &self.nsqd_addresses
    }

    pub fn lookupd_addresses(&self) -> &[String] {
        &self.lookupd_addresses
    }

    pub fn topics(&self) -> Vec<&str> {
        let mut topics = self.topics.keys().map(String::as_str).collect::<Vec<_>>();
        topics.sort_unstable();
        topics
    }

    pub fn worker(&self, topic: &str) -> Option<&TopicWorker> {
        self.topics.get(topic)
    }
}

fn add_unique(addresses: &mut Vec<String>, address: &str) {
    if !addresses.iter().any(|existing| existing == address) {
        addresses.push(address.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::handler::{Delivery, HandlerDecision};
    use crate::logging::LogLevel;
    use crate::registry::subscriber::{MockSubscriber, Subscriber};
    use crate::registry::topic_worker::WorkerState;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    /// Connects at once and takes `drain` to stop.
    struct DrainingSubscriber {
        drain: Duration,
    }

    #[async_trait]
    impl Subscriber for DrainingSubscriber {
        async fn connect_to_lookupd(&self, _address: &str) -> Result<(), NsqError> {
            Ok(())
        }

        async fn connect_to_lookupds(&self, _addresses: &[String]) -> Result<(), NsqError> {
            Ok(())
        }

        async fn connect_to_nsqd(&self, _address: &str) -> Result<(), NsqError> {
            Ok(())
        }

        async fn connect_to_nsqds(&self, _addresses: &[String]) -> Result<(), NsqError> {
            Ok(())
        }

        fn set_log_level(&self, _level: LogLevel) {}

        async fn stop(&self) {
            sleep(self.drain).await;
        }
    }

    fn handler() -> Arc<dyn MessageHandler> {
        Arc::new(|_body: Bytes, _delivery: Delivery| async { HandlerDecision::Finish })
    }

    fn unused_factory() -> Arc<dyn SubscriberFactory> {
        Arc::new(
            |_: &str,
             _: &str,
             _: Arc<ConnectionConfig>,
             _: Arc<dyn MessageHandler>,
             _: usize|
             -> Result<Arc<dyn Subscriber>, NsqError> {
                panic!("subscriber should not be built")
            },
        )
    }

    fn section(values: &[(&str, &str)]) -> ConfigSection {
        values.iter().copied().collect()
    }

    #[test]
    fn adding_an_address_twice_should_keep_one_copy() {
        let mut registry = ConsumerRegistry::new();
        registry.set_nsqd_address("127.0.0.1:4150");
        registry.set_nsqd_address("127.0.0.1:4150");
        registry.set_multi_nsqd_addresses(&["127.0.0.1:4150", "127.0.0.2:4150"]);
        registry.set_lookupd_address("127.0.0.1:4161");
        registry.set_multi_lookupd_addresses(&["127.0.0.1:4161"]);
        assert_eq!(registry.nsqd_addresses(), ["127.0.0.1:4150", "127.0.0.2:4150"]);
        assert_eq!(registry.lookupd_addresses(), ["127.0.0.1:4161"]);
    }

    #[test]
    fn init_should_fail_when_max_in_flight_is_below_concurrency() {
        let mut registry = ConsumerRegistry::new();
        let error = registry
            .init(&section(&[("concurrent", "50"), ("maxInFlight", "10")]), false)
            .unwrap_err();
        assert_eq!(error, NsqError::MaxInFlightBelowConcurrency(10, 50));
        assert!(!registry.is_initialized());

        let mut registry = ConsumerRegistry::new();
        registry
            .init(&section(&[("concurrent", "10"), ("maxInFlight", "50")]), true)
            .unwrap();
        assert!(registry.is_initialized());
        assert!(registry.is_debug());
        assert_eq!(registry.concurrency(), 10);
        assert_eq!(registry.max_in_flight(), 50);
    }

    #[test]
    fn init_should_ignore_invalid_numbers_and_overwrite_addresses() {
        let mut registry = ConsumerRegistry::new();
        registry.set_nsqd_address("old:4150");
        registry
            .init(
                &section(&[
                    ("nsqd", "a:4150, b:4150,,a:4150"),
                    ("nsqlookupd", "l:4161"),
                    ("channel", "billing"),
                    ("maxInFlight", "-3"),
                    ("concurrent", "lots"),
                ]),
                false,
            )
            .unwrap();
        assert_eq!(registry.nsqd_addresses(), ["a:4150", "b:4150"]);
        assert_eq!(registry.lookupd_addresses(), ["l:4161"]);
        assert_eq!(registry.channel_name(), "billing");
        assert_eq!(registry.max_in_flight(), 1);
        assert_eq!(registry.concurrency(), 1);
    }

    #[test]
    fn re_registering_a_topic_should_replace_the_handler_and_keep_limits() {
        let mut registry = ConsumerRegistry::with_factory(unused_factory());
        let first = handler();
        registry.add_handler("orders", first.clone()).unwrap();
        registry
            .init(&section(&[("concurrent", "4"), ("maxInFlight", "8")]), false)
            .unwrap();
        let second = handler();
        registry.add_handler("orders", second.clone()).unwrap();

        assert_eq!(registry.topics(), ["orders"]);
        let worker = registry.worker("orders").unwrap();
        assert!(Arc::ptr_eq(worker.handler(), &second));
        assert!(!Arc::ptr_eq(worker.handler(), &first));
        assert_eq!(worker.concurrency(), 1);
        assert_eq!(worker.max_in_flight(), 1);

        registry.add_handler("payments", handler()).unwrap();
        let worker = registry.worker("payments").unwrap();
        assert_eq!(worker.concurrency(), 4);
        assert_eq!(worker.max_in_flight(), 8);
    }

    #[tokio::test]
    async fn run_should_require_init_and_an_address() {
        let mut registry = ConsumerRegistry::with_factory(unused_factory());
        registry.add_handler("orders", handler()).unwrap();
        assert_eq!(registry.run(), Err(NsqError::ConsumerNotInitialized));

        registry.init(&ConfigSection::new(), false).unwrap();
        assert_eq!(registry.run(), Err(NsqError::MissingAddress));
        assert!(!registry.is_running());
        assert_eq!(
            registry.worker("orders").unwrap().state().await,
            WorkerState::Idle
        );
    }

    #[tokio::test]
    async fn run_should_subscribe_through_lookupd_and_lock_registration() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let factory: Arc<dyn SubscriberFactory> = Arc::new(
            move |topic: &str,
                  channel: &str,
                  config: Arc<ConnectionConfig>,
                  _: Arc<dyn MessageHandler>,
                  concurrency: usize|
                  -> Result<Arc<dyn Subscriber>, NsqError> {
                assert_eq!(topic, "orders");
                assert_eq!(channel, "billing");
                assert_eq!(config.max_in_flight, 20);
                assert_eq!(concurrency, 5);
                counter.fetch_add(1, Ordering::SeqCst);
                let mut subscriber = MockSubscriber::new();
                subscriber.expect_connect_to_nsqd().never();
                subscriber.expect_connect_to_nsqds().never();
                subscriber
                    .expect_connect_to_lookupd()
                    .times(1)
                    .returning(|_| Ok(()));
                subscriber
                    .expect_set_log_level()
                    .withf(|level| *level == LogLevel::Warning)
                    .return_const(());
                subscriber.expect_stop().times(1).return_const(());
                Ok(Arc::new(subscriber))
            },
        );

        let mut registry = ConsumerRegistry::with_factory(factory);
        registry
            .init(
                &section(&[
                    ("nsqd", "nsqd-1:4150"),
                    ("nsqlookupd", "lookupd-1:4161"),
                    ("channel", "billing"),
                    ("maxInFlight", "20"),
                    ("concurrent", "5"),
                ]),
                false,
            )
            .unwrap();
        registry.add_handler("orders", handler()).unwrap();
        registry.run().unwrap();
        assert!(registry.is_running());
        assert_eq!(registry.run(), Err(NsqError::ConsumerAlreadyRunning));
        assert_eq!(
            registry.add_handler("late", handler()),
            Err(NsqError::ConsumerAlreadyRunning)
        );
        assert_eq!(registry.topics(), ["orders"]);

        let worker = registry.worker("orders").unwrap().clone();
        for _ in 0..100 {
            if worker.state().await == WorkerState::Connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(worker.state().await, WorkerState::Connected);
        assert_eq!(created.load(Ordering::SeqCst), 1);

        registry.stop("unknown").await;
        registry.stop_all().await;
        assert_eq!(worker.state().await, WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_should_drain_topics_concurrently() {
        let factory: Arc<dyn SubscriberFactory> = Arc::new(
            |_: &str,
             _: &str,
             _: Arc<ConnectionConfig>,
             _: Arc<dyn MessageHandler>,
             _: usize|
             -> Result<Arc<dyn Subscriber>, NsqError> {
                Ok(Arc::new(DrainingSubscriber {
                    drain: Duration::from_secs(10),
                }))
            },
        );

        let mut registry = ConsumerRegistry::with_factory(factory);
        registry
            .init(&section(&[("nsqd", "nsqd-1:4150")]), false)
            .unwrap();
        for topic in ["orders", "payments", "refunds"] {
            registry.add_handler(topic, handler()).unwrap();
        }
        registry.run().unwrap();

        for topic in ["orders", "payments", "refunds"] {
            let worker = registry.worker(topic).unwrap().clone();
            for _ in 0..100 {
                if worker.state().await == WorkerState::Connected {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(worker.state().await, WorkerState::Connected);
        }

        let started = Instant::now();
        registry.stop_all().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(20), "took {elapsed:?}");
        for topic in ["orders", "payments", "refunds"] {
            assert_eq!(
                registry.worker(topic).unwrap().state().await,
                WorkerState::Stopped
            );
        }
    }

    #[tokio::test]
    async fn stopping_a_never_started_registry_should_be_a_no_op() {
        let mut registry = ConsumerRegistry::with_factory(unused_factory());
        registry.add_handler("orders", handler()).unwrap();
        registry.stop("unknown").await;
        registry.stop_all().await;
        assert_eq!(
            registry.worker("orders").unwrap().state().await,
            WorkerState::Stopped
        );
        assert_eq!(registry.topics(), ["orders"]);
    }
}
