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
use common::{FakeNsqd, REJECTED_TOPIC};
use nsqkit::prelude::*;
use serde::Serialize;

async fn running_producer(nsqd: &FakeNsqd) -> Producer {
    let mut producer = Producer::new();
    producer
        .init(&ConfigSection::new().with("nsqd", nsqd.address.as_str()), false)
        .unwrap();
    producer.run().unwrap();
    producer
}

#[derive(Serialize)]
struct Order {
    id: u64,
    sku: &'static str,
}

#[tokio::test]
async fn should_identify_then_publish_marshalled_values() {
    let nsqd = FakeNsqd::start().await;
    let mut producer = running_producer(&nsqd).await;

    producer.publish("events", 42i64).await.unwrap();
    let identify = nsqd.expect_command("IDENTIFY").await;
    let identify: serde_json::Value = serde_json::from_slice(&identify.bodies[0]).unwrap();
    assert_eq!(identify["feature_negotiation"], true);

    let publish = nsqd.expect_command("PUB").await;
    assert_eq!(publish.params, vec!["events".to_string()]);
    assert_eq!(publish.bodies, vec![Bytes::from_static(b"42")]);

    producer.publish("events", 3.5).await.unwrap();
    let publish = nsqd.expect_command("PUB").await;
    assert_eq!(publish.bodies, vec![Bytes::from_static(b"3.5")]);

    producer
        .publish_json("events", &Order { id: 7, sku: "book" })
        .await
        .unwrap();
    let publish = nsqd.expect_command("PUB").await;
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&publish.bodies[0]).unwrap(),
        serde_json::json!({"id": 7, "sku": "book"})
    );

    producer.stop().await;
}

#[tokio::test]
async fn should_send_batches_and_deferred_messages() {
    let nsqd = FakeNsqd::start().await;
    let mut producer = running_producer(&nsqd).await;

    producer
        .multi_publish("events", vec!["a", "bc", "def"])
        .await
        .unwrap();
    let batch = nsqd.expect_command("MPUB").await;
    assert_eq!(batch.params, vec!["events".to_string()]);
    assert_eq!(
        batch.bodies,
        vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"bc"),
            Bytes::from_static(b"def")
        ]
    );

    producer
        .deferred_publish("events", Bytes::from_static(b"later"), 3)
        .await
        .unwrap();
    let deferred = nsqd.expect_command("DPUB").await;
    assert_eq!(deferred.params, vec!["events".to_string(), "3000".to_string()]);
    assert_eq!(deferred.bodies, vec![Bytes::from_static(b"later")]);

    producer.ping().await.unwrap();
    nsqd.expect_command("NOP").await;
    producer.stop().await;
}

#[tokio::test]
async fn should_return_broker_errors_verbatim() {
    let nsqd = FakeNsqd::start().await;
    let mut producer = running_producer(&nsqd).await;

    let error = producer.publish(REJECTED_TOPIC, "x").await.unwrap_err();
    assert_eq!(
        error,
        NsqError::BrokerError("E_PUB_FAILED topic rejected".to_string())
    );

    producer.publish("events", "after error").await.unwrap();
    producer.stop().await;
}

#[tokio::test]
async fn should_report_unreachable_nsqd() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut producer = Producer::new();
    producer
        .init(&ConfigSection::new().with("nsqd", address), false)
        .unwrap();
    producer.run().unwrap();
    let error = producer.publish("events", "x").await.unwrap_err();
    assert!(error.is_transient());
    producer.stop().await;
}
