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

//! Prelude module for nsqkit.
//!
//! Re-exports the types needed to configure, publish and consume.
//!
//! # Examples
//!
//! ```
//! use nsqkit::prelude::*;
//! ```

pub use crate::clients::handler::{Delivery, HandlerDecision, MessageHandler};
pub use crate::clients::nsq_consumer::{ConsumerStats, NsqConsumer};
pub use crate::clients::nsq_producer::NsqProducer;
pub use crate::configs::client_config::{
    CONSUMER_SECTION, ClientConfig, ConfigSection, PRODUCER_SECTION,
};
pub use crate::configs::connection_config::ConnectionConfig;
pub use crate::configs::connection_config_builder::ConnectionConfigBuilder;
pub use crate::error::NsqError;
pub use crate::logging::LogLevel;
pub use crate::marshal::MessageValue;
pub use crate::producer::Producer;
pub use crate::protocol::message::MessageId;
pub use crate::registry::consumer_registry::ConsumerRegistry;
pub use crate::registry::subscriber::{NsqSubscriberFactory, Subscriber, SubscriberFactory};
pub use crate::registry::topic_worker::{TopicWorker, WorkerState};
pub use crate::validatable::Validatable;
