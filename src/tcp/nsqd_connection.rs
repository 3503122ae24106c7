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
use crate::logging::{LogGate, gated_debug, gated_info, gated_warn};
use crate::protocol::command::{Command, MAGIC_V2};
use crate::protocol::frame::{CLOSE_WAIT, Frame, FrameType, OK};
use crate::protocol::identify::{IdentifyRequest, IdentifyResponse};
use crate::protocol::message::{Message, MessageId};
use crate::tcp::tcp_connection_stream::{TcpCommandWriter, TcpConnectionStream, TcpFrameReader};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{error, trace};

const DEFAULT_MAX_RDY_COUNT: u64 = 2500;

/// What the reader task of a connection observed.
#[derive(Debug)]
pub enum ConnectionEvent {
    Message(InFlightMessage),
    Response { address: Arc<str>, data: Bytes },
    Error { address: Arc<str>, data: Bytes },
    Closed { address: Arc<str> },
}

/// A delivered message together with the connection it must be answered on.
#[derive(Debug)]
pub struct InFlightMessage {
    pub message: Message,
    pub connection: Arc<NsqdConnection>,
}

/// A single negotiated connection to nsqd.
///
/// The read half is owned by a background task that answers heartbeats and
/// forwards everything else as [`ConnectionEvent`]s, the write half is shared
/// behind a mutex so that handler workers can answer messages concurrently.
#[derive(Debug)]
pub struct NsqdConnection {
    address: Arc<str>,
    writer: Mutex<TcpCommandWriter>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    ready_count: AtomicU64,
    max_rdy_count: u64,
    version: Option<String>,
    gate: LogGate,
    reader: std::sync::Mutex<Option<AbortHandle>>,
}

impl NsqdConnection {
    /// Dials nsqd, performs the `V2` handshake and `IDENTIFY`, optionally subscribes to
    /// `(topic, channel)` and starts the reader task.
    pub async fn connect(
        address: &str,
        config: &ConnectionConfig,
        subscription: Option<(&str, &str)>,
        gate: LogGate,
        events: flume::Sender<ConnectionEvent>,
    ) -> Result<Arc<Self>, NsqError> {
        gated_debug!(gate, "Connecting to nsqd: {address}...");
        let mut stream =
            TcpConnectionStream::connect(address, config.dial_timeout, config.write_timeout)
                .await?;
        stream.write_magic(MAGIC_V2).await?;

        let identify = IdentifyRequest::from(config).to_bytes()?;
        stream.send(&Command::Identify(identify)).await?;
        let frame = read_handshake_frame(&mut stream, config).await?;
        if frame.frame_type != FrameType::Response {
            return Err(NsqError::IdentifyFailed(frame.text()));
        }

        let negotiated = IdentifyResponse::parse(&frame.data)?;
        let max_rdy_count = negotiated
            .as_ref()
            .map(|response| response.max_rdy_count)
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_MAX_RDY_COUNT);
        let version = negotiated
            .map(|response| response.version)
            .filter(|version| !version.is_empty());
        gated_debug!(
            gate,
            "Identified with nsqd: {address}, version: {}, max RDY: {max_rdy_count}",
            version.as_deref().unwrap_or("unknown")
        );

        if let Some((topic, channel)) = subscription {
            stream
                .send(&Command::Subscribe {
                    topic: topic.to_string(),
                    channel: channel.to_string(),
                })
                .await?;
            let frame = read_handshake_frame(&mut stream, config).await?;
            match frame.frame_type {
                FrameType::Response if frame.data == OK => {}
                FrameType::Error => return Err(NsqError::SubscribeFailed(frame.text())),
                _ => return Err(NsqError::UnexpectedResponse(frame.text())),
            }
            gated_info!(gate, "Subscribed to topic: {topic}, channel: {channel} on nsqd: {address}");
        }

        let (reader, writer) = stream.into_split();
        let connection = Arc::new(NsqdConnection {
            address: Arc::from(address),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            ready_count: AtomicU64::new(0),
            max_rdy_count,
            version,
            gate,
            reader: std::sync::Mutex::new(None),
        });

        let task = tokio::spawn(read_loop(
            Arc::downgrade(&connection),
            connection.address.clone(),
            reader,
            config.read_timeout,
            config.max_frame_size,
            events,
        ));
        if let Ok(mut slot) = connection.reader.lock() {
            *slot = Some(task.abort_handle());
        }

        Ok(connection)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn max_rdy_count(&self) -> u64 {
        self.max_rdy_count
    }

    pub fn ready_count(&self) -> u64 {
        self.ready_count.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn send(&self, command: Command) -> Result<(), NsqError> {
        if self.is_closed() {
            return Err(NsqError::Disconnected);
        }

        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.send(&command).await {
            self.closed.store(true, Ordering::Release);
            return Err(error);
        }
        Ok(())
    }

    /// Updates the RDY count, clamped to what nsqd negotiated.
    pub async fn ready(&self, count: u64) -> Result<(), NsqError> {
        let count = count.min(self.max_rdy_count);
        if self.ready_count.swap(count, Ordering::Relaxed) == count {
            return Ok(());
        }

        gated_debug!(self.gate, "Sending RDY {count} to nsqd: {}", self.address);
        self.send(Command::Ready(count)).await
    }

    pub async fn finish(&self, id: MessageId) -> Result<(), NsqError> {
        self.release();
        self.send(Command::Finish(id)).await
    }

    pub async fn requeue(&self, id: MessageId, delay: Duration) -> Result<(), NsqError> {
        self.release();
        self.send(Command::Requeue { id, delay }).await
    }

    /// Asks nsqd to stop delivering, messages already in flight can still be answered.
    pub async fn start_close(&self) -> Result<(), NsqError> {
        gated_debug!(self.gate, "Sending CLS to nsqd: {}", self.address);
        self.send(Command::Close).await
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            trace!("Connection to nsqd: {} is already closed", self.address);
        }

        if let Err(error) = self.writer.lock().await.shutdown().await {
            trace!("Failed to shutdown connection to nsqd: {}. {error}", self.address);
        }

        if let Ok(mut reader) = self.reader.lock() {
            if let Some(reader) = reader.take() {
                reader.abort();
            }
        }
        gated_info!(self.gate, "Closed connection to nsqd: {}", self.address);
    }

    fn track(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
    }
}

async fn read_handshake_frame(
    stream: &mut TcpConnectionStream,
    config: &ConnectionConfig,
) -> Result<Frame, NsqError> {
    loop {
        let frame = timeout(config.read_timeout, stream.read_frame(config.max_frame_size))
            .await
            .map_err(|_| NsqError::ConnectionTimeout(stream.server_address().to_string()))??;
        if !frame.is_heartbeat() {
            return Ok(frame);
        }

        stream.send(&Command::Nop).await?;
    }
}

async fn read_loop(
    connection: Weak<NsqdConnection>,
    address: Arc<str>,
    mut reader: TcpFrameReader,
    read_timeout: Duration,
    max_frame_size: usize,
    events: flume::Sender<ConnectionEvent>,
) {
    loop {
        let frame = match timeout(read_timeout, reader.read_frame(max_frame_size)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(NsqError::Disconnected)) => {
                trace!("nsqd: {address} closed the connection");
                break;
            }
            Ok(Err(error)) => {
                error!("Failed to read from nsqd: {address}. {error}");
                break;
            }
            Err(_) => {
                error!("No data received from nsqd: {address} within: {read_timeout:?}");
                break;
            }
        };

        let Some(connection) = connection.upgrade() else {
            break;
        };

        let event = match frame.frame_type {
            FrameType::Response if frame.is_heartbeat() => {
                gated_debug!(connection.gate, "Heartbeat from nsqd: {address}");
                if connection.send(Command::Nop).await.is_err() {
                    break;
                }
                continue;
            }
            FrameType::Response => {
                if frame.data == CLOSE_WAIT {
                    gated_debug!(connection.gate, "nsqd: {address} acknowledged CLS");
                }
                ConnectionEvent::Response {
                    address: address.clone(),
                    data: frame.data,
                }
            }
            FrameType::Error => {
                gated_warn!(connection.gate, "Error from nsqd: {address}: {}", frame.text());
                ConnectionEvent::Error {
                    address: address.clone(),
                    data: frame.data,
                }
            }
            FrameType::Message => match Message::decode(frame.data) {
                Ok(message) => {
                    connection.track();
                    ConnectionEvent::Message(InFlightMessage {
                        message,
                        connection: connection.clone(),
                    })
                }
                Err(error) => {
                    error!("Received an invalid message from nsqd: {address}. {error}");
                    continue;
                }
            },
        };

        if events.send_async(event).await.is_err() {
            trace!("No receiver left for events of nsqd: {address}");
            break;
        }
    }

    if let Some(connection) = connection.upgrade() {
        connection.closed.store(true, Ordering::Release);
    }
    let _ = events.send_async(ConnectionEvent::Closed { address }).await;
}
