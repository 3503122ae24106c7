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

mod common;

use bytes::Bytes;
use common::{FakeNsqd, start_fake_lookupd, start_toggled_fake_lookupd};
use nsqkit::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const TOPIC: &str = "events";

fn counting_handler(calls: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
    Arc::new(move |body: Bytes, delivery: Delivery| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            assert!(delivery.attempts >= 1);
            match body.as_ref() {
                b"retry" => HandlerDecision::Requeue(Some(Duration::from_secs(2))),
                b"backoff" => HandlerDecision::Requeue(None),
                b"poison" => panic!("cannot handle poison"),
                b"corrupt" => HandlerDecision::Fail,
                _ => HandlerDecision::Finish,
            }
        }
    })
}

async fn wait_for_state(worker: &TopicWorker, state: WorkerState) {
    for _ in 0..250 {
        if worker.state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(worker.state().await, state);
}

#[tokio::test]
async fn should_finish_or_requeue_delivered_messages() {
    let nsqd = FakeNsqd::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ConsumerRegistry::new();
    registry
        .init(
            &ConfigSection::new()
                .with("nsqd", nsqd.address.as_str())
                .with("channel", "billing")
                .with("maxInFlight", "8")
                .with("concurrent", "1"),
            false,
        )
        .unwrap();
    registry.add_handler(TOPIC, counting_handler(calls.clone())).unwrap();
    registry.run().unwrap();

    let subscribe = nsqd.expect_command("SUB").await;
    assert_eq!(subscribe.params, vec![TOPIC.to_string(), "billing".to_string()]);
    let ready = nsqd.expect_command("RDY").await;
    assert_eq!(ready.params, vec!["8".to_string()]);
    let worker = registry.worker(TOPIC).unwrap().clone();
    wait_for_state(&worker, WorkerState::Connected).await;

    nsqd.deliver(b"0000000000000001", 1, b"hello");
    let finish = nsqd.expect_command("FIN").await;
    assert_eq!(finish.params, vec!["0000000000000001".to_string()]);

    nsqd.deliver(b"0000000000000002", 1, b"retry");
    let requeue = nsqd.expect_command("REQ").await;
    assert_eq!(
        requeue.params,
        vec!["0000000000000002".to_string(), "2000".to_string()]
    );

    // Default requeue delay of 90s, scaled by the attempt.
    nsqd.deliver(b"0000000000000003", 2, b"backoff");
    let requeue = nsqd.expect_command("REQ").await;
    assert_eq!(
        requeue.params,
        vec!["0000000000000003".to_string(), "180000".to_string()]
    );

    nsqd.deliver(b"0000000000000004", 1, b"poison");
    let requeue = nsqd.expect_command("REQ").await;
    assert_eq!(
        requeue.params,
        vec!["0000000000000004".to_string(), "90000".to_string()]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    // Over the default limit of 5 attempts, finished without reaching the handler.
    nsqd.deliver(b"0000000000000005", 6, b"hello");
    let finish = nsqd.expect_command("FIN").await;
    assert_eq!(finish.params, vec!["0000000000000005".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    registry.stop_all().await;
    nsqd.expect_command("CLS").await;
    assert_eq!(worker.state().await, WorkerState::Stopped);
}

#[tokio::test]
async fn should_discover_nsqd_through_lookupd() {
    let nsqd = FakeNsqd::start().await;
    let lookupd = start_fake_lookupd(nsqd.port()).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = ConsumerRegistry::new();
    registry.set_channel_name("audit");
    registry.set_lookupd_address(&lookupd);
    registry.init(&ConfigSection::new(), true).unwrap();
    registry.add_handler(TOPIC, counting_handler(calls.clone())).unwrap();
    registry.run().unwrap();

    let subscribe = nsqd.expect_command("SUB").await;
    assert_eq!(subscribe.params, vec![TOPIC.to_string(), "audit".to_string()]);
    let worker = registry.worker(TOPIC).unwrap().clone();
    wait_for_state(&worker, WorkerState::Connected).await;

    nsqd.deliver(b"000000000000000a", 1, b"hello");
    nsqd.expect_command("FIN").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    registry.stop_all().await;
    assert_eq!(worker.state().await, WorkerState::Stopped);
}

#[tokio::test]
async fn consumer_should_connect_once_per_address_and_report_stats() {
    let nsqd = FakeNsqd::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ConnectionConfigBuilder::new()
        .with_max_in_flight(3)
        .build()
        .unwrap();
    let consumer = NsqConsumer::new(
        TOPIC,
        "stats",
        Arc::new(config),
        counting_handler(calls.clone()),
        2,
    )
    .unwrap();

    consumer.connect_to_nsqd(&nsqd.address).await.unwrap();
    consumer.connect_to_nsqd(&nsqd.address).await.unwrap();
    nsqd.expect_command("SUB").await;
    assert_eq!(consumer.stats().connections, 1);

    nsqd.deliver(b"000000000000000b", 1, b"hello");
    nsqd.expect_command("FIN").await;
    for _ in 0..50 {
        if consumer.stats().messages_finished == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stats = consumer.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.messages_finished, 1);

    consumer.stop().await;
    assert_eq!(consumer.stats().connections, 0);
}

async fn wait_for_connections(consumer: &NsqConsumer, expected: usize) {
    for _ in 0..250 {
        if consumer.stats().connections == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(consumer.stats().connections, expected);
}

#[tokio::test]
async fn failed_messages_should_be_finished() {
    let nsqd = FakeNsqd::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let consumer = NsqConsumer::new(
        TOPIC,
        "failures",
        Arc::new(ConnectionConfig::default()),
        counting_handler(calls.clone()),
        1,
    )
    .unwrap();
    consumer.connect_to_nsqd(&nsqd.address).await.unwrap();
    nsqd.expect_command("SUB").await;

    nsqd.deliver(b"000000000000000c", 1, b"corrupt");
    let finish = nsqd.expect_command("FIN").await;
    assert_eq!(finish.params, vec!["000000000000000c".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    consumer.stop().await;
}

#[tokio::test]
async fn dropped_nsqd_connection_should_be_redialed() {
    let nsqd = FakeNsqd::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ConnectionConfigBuilder::new()
        .with_reconnect_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    let consumer = NsqConsumer::new(
        TOPIC,
        "redial",
        Arc::new(config),
        counting_handler(calls.clone()),
        1,
    )
    .unwrap();
    consumer.connect_to_nsqd(&nsqd.address).await.unwrap();
    nsqd.expect_command("SUB").await;
    wait_for_connections(&consumer, 1).await;

    nsqd.drop_connections();
    let subscribe = nsqd.expect_command("SUB").await;
    assert_eq!(subscribe.params, vec![TOPIC.to_string(), "redial".to_string()]);
    wait_for_connections(&consumer, 1).await;

    nsqd.deliver(b"000000000000000d", 1, b"hello");
    nsqd.expect_command("FIN").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    consumer.stop().await;
}

#[tokio::test]
async fn lookupd_polling_should_pick_up_new_producers() {
    let nsqd = FakeNsqd::start().await;
    let registered = Arc::new(AtomicBool::new(false));
    let lookupd = start_toggled_fake_lookupd(nsqd.port(), registered.clone()).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ConnectionConfigBuilder::new()
        .with_lookupd_poll_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    let consumer = NsqConsumer::new(
        TOPIC,
        "late",
        Arc::new(config),
        counting_handler(calls.clone()),
        1,
    )
    .unwrap();

    consumer.connect_to_lookupd(&lookupd).await.unwrap();
    assert_eq!(consumer.stats().connections, 0);

    registered.store(true, Ordering::SeqCst);
    let subscribe = nsqd.expect_command("SUB").await;
    assert_eq!(subscribe.params, vec![TOPIC.to_string(), "late".to_string()]);
    wait_for_connections(&consumer, 1).await;

    nsqd.deliver(b"000000000000000e", 1, b"hello");
    nsqd.expect_command("FIN").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    consumer.stop().await;
}
