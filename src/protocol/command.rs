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

use crate::error::NsqError;
use crate::protocol::message::MessageId;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

pub const MAGIC_V2: &[u8; 4] = b"  V2";
const MAX_NAME_LENGTH: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

/// Commands a client sends to nsqd.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Identify(Bytes),
    Subscribe { topic: String, channel: String },
    Ready(u64),
    Finish(MessageId),
    Requeue { id: MessageId, delay: Duration },
    Close,
    Nop,
    Publish { topic: String, body: Bytes },
    MultiPublish { topic: String, bodies: Vec<Bytes> },
    DeferredPublish { topic: String, delay: Duration, body: Bytes },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Identify(_) => "IDENTIFY",
            Command::Subscribe { .. } => "SUB",
            Command::Ready(_) => "RDY",
            Command::Finish(_) => "FIN",
            Command::Requeue { .. } => "REQ",
            Command::Close => "CLS",
            Command::Nop => "NOP",
            Command::Publish { .. } => "PUB",
            Command::MultiPublish { .. } => "MPUB",
            Command::DeferredPublish { .. } => "DPUB",
        }
    }

    /// Whether nsqd answers the command with a response or an error frame.
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Command::Identify(_)
                | Command::Subscribe { .. }
                | Command::Close
                | Command::Publish { .. }
                | Command::MultiPublish { .. }
                | Command::DeferredPublish { .. }
        )
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut bytes = BytesMut::new();
        bytes.put_slice(self.name().as_bytes());
        match self {
            Command::Identify(body) => {
                bytes.put_u8(b'\n');
                put_body(&mut bytes, body);
            }
            Command::Subscribe { topic, channel } => {
                put_params(&mut bytes, &[topic.as_str(), channel.as_str()]);
            }
            Command::Ready(count) => {
                put_params(&mut bytes, &[count.to_string().as_str()]);
            }
            Command::Finish(id) => {
                put_params(&mut bytes, &[id.to_string().as_str()]);
            }
            Command::Requeue { id, delay } => {
                let id = id.to_string();
                let delay = delay.as_millis().to_string();
                put_params(&mut bytes, &[id.as_str(), delay.as_str()]);
            }
            Command::Close | Command::Nop => {
                bytes.put_u8(b'\n');
            }
            Command::Publish { topic, body } => {
                put_params(&mut bytes, &[topic.as_str()]);
                put_body(&mut bytes, body);
            }
            Command::MultiPublish { topic, bodies } => {
                put_params(&mut bytes, &[topic.as_str()]);
                let size = 4 + bodies.iter().map(|body| 4 + body.len()).sum::<usize>();
                bytes.put_u32(size as u32);
                bytes.put_u32(bodies.len() as u32);
                for body in bodies {
                    put_body(&mut bytes, body);
                }
            }
            Command::DeferredPublish { topic, delay, body } => {
                let delay = delay.as_millis().to_string();
                put_params(&mut bytes, &[topic.as_str(), delay.as_str()]);
                put_body(&mut bytes, body);
            }
        }
        bytes.freeze()
    }
}

fn put_params(bytes: &mut BytesMut, params: &[&str]) {
    for param in params {
        bytes.put_u8(b' ');
        bytes.put_slice(param.as_bytes());
    }
    bytes.put_u8(b'\n');
}

fn put_body(bytes: &mut BytesMut, body: &[u8]) {
    bytes.put_u32(body.len() as u32);
    bytes.put_slice(body);
}

fn is_valid_name(name: &str) -> bool {
    let base = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub fn validate_topic_name(topic: &str) -> Result<(), NsqError> {
    if is_valid_name(topic) {
        Ok(())
    } else {
        Err(NsqError::InvalidTopicName(topic.to_string()))
    }
}

pub fn validate_channel_name(channel: &str) -> Result<(), NsqError> {
    if is_valid_name(channel) {
        Ok(())
    } else {
        Err(NsqError::InvalidChannelName(channel.to_string()))
    }
}
