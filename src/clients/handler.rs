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

use crate::protocol::message::MessageId;
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Metadata of a delivered message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: MessageId,
    /// Number of times nsqd has delivered the message, starting at 1.
    pub attempts: u16,
    /// Nanoseconds since the epoch.
    pub timestamp: i64,
    pub nsqd_address: Arc<str>,
}

/// How a handled message is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerDecision {
    /// `FIN`
    Finish,
    /// `REQ` after the given delay, or after the configured backoff for the attempt when `None`.
    Requeue(Option<Duration>),
    /// Logged and finished, the message is not redelivered.
    Fail,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: Bytes, delivery: Delivery) -> HandlerDecision;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Bytes, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerDecision> + Send + 'static,
{
    async fn handle(&self, body: Bytes, delivery: Delivery) -> HandlerDecision {
        (self)(body, delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closures_should_act_as_handlers() {
        let handler: Arc<dyn MessageHandler> = Arc::new(|body: Bytes, delivery: Delivery| async move {
            if body.is_empty() || delivery.attempts > 1 {
                HandlerDecision::Requeue(None)
            } else {
                HandlerDecision::Finish
            }
        });
        let delivery = Delivery {
            id: MessageId::from(*b"0123456789abcdef"),
            attempts: 1,
            timestamp: 0,
            nsqd_address: Arc::from("127.0.0.1:4150"),
        };

        assert_eq!(
            handler.handle(Bytes::from_static(b"x"), delivery.clone()).await,
            HandlerDecision::Finish
        );
        assert_eq!(
            handler.handle(Bytes::new(), delivery).await,
            HandlerDecision::Requeue(None)
        );
    }
}
