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
use bytes::{BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

pub const HEARTBEAT: &[u8] = b"_heartbeat_";
pub const OK: &[u8] = b"OK";
pub const CLOSE_WAIT: &[u8] = b"CLOSE_WAIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Response = 0,
    Error = 1,
    Message = 2,
}

impl FrameType {
    pub fn from_code(value: i32) -> Result<Self, NsqError> {
        match value {
            0 => Ok(FrameType::Response),
            1 => Ok(FrameType::Error),
            2 => Ok(FrameType::Message),
            _ => Err(NsqError::InvalidFrameType(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub data: Bytes,
}

impl Frame {
    pub fn is_heartbeat(&self) -> bool {
        self.frame_type == FrameType::Response && self.data == HEARTBEAT
    }

    pub fn encode(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(8 + self.data.len());
        bytes.put_u32((self.data.len() + 4) as u32);
        bytes.put_i32(self.frame_type as i32);
        bytes.put_slice(&self.data);
        bytes.freeze()
    }

    /// Lossy text of the payload, for logs and errors.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

fn map_read_error(error: std::io::Error) -> NsqError {
    match error.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            NsqError::Disconnected
        }
        _ => NsqError::TcpError,
    }
}

/// Reads one `size | type | data` frame.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Frame, NsqError>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_u32().await.map_err(map_read_error)? as usize;
    if size < 4 {
        return Err(NsqError::InvalidMessage);
    }

    if size > max_frame_size {
        return Err(NsqError::FrameTooLarge(size, max_frame_size));
    }

    let frame_type = FrameType::from_code(reader.read_i32().await.map_err(map_read_error)?)?;
    let mut data = vec![0u8; size - 4];
    reader.read_exact(&mut data).await.map_err(map_read_error)?;
    trace!("Read frame: {frame_type:?} of size: {size}");
    Ok(Frame {
        frame_type,
        data: Bytes::from(data),
    })
}
