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
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::{Display, Formatter};

pub const MESSAGE_ID_LENGTH: usize = 16;
const MESSAGE_HEADER_LENGTH: usize = 8 + 2 + MESSAGE_ID_LENGTH;

/// The 16 byte identifier nsqd assigns to every message, printable ASCII on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LENGTH]);

impl MessageId {
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LENGTH] {
        &self.0
    }
}

impl From<[u8; MESSAGE_ID_LENGTH]> for MessageId {
    fn from(value: [u8; MESSAGE_ID_LENGTH]) -> Self {
        MessageId(value)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// A message as delivered in a message frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Nanoseconds since the epoch at which nsqd received the message.
    pub timestamp: i64,
    pub attempts: u16,
    pub body: Bytes,
}

impl Message {
    pub fn decode(mut data: Bytes) -> Result<Self, NsqError> {
        if data.len() < MESSAGE_HEADER_LENGTH {
            return Err(NsqError::InvalidMessage);
        }

        let timestamp = data.get_i64();
        let attempts = data.get_u16();
        let mut id = [0u8; MESSAGE_ID_LENGTH];
        data.copy_to_slice(&mut id);
        Ok(Message {
            id: MessageId(id),
            timestamp,
            attempts,
            body: data,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(MESSAGE_HEADER_LENGTH + self.body.len());
        bytes.put_i64(self.timestamp);
        bytes.put_u16(self.attempts);
        bytes.put_slice(&self.id.0);
        bytes.put_slice(&self.body);
        bytes.freeze()
    }
}
