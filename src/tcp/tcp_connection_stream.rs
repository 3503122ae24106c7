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
use crate::protocol::command::Command;
use crate::protocol::frame::{Frame, read_frame};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{error, trace};

#[derive(Debug)]
pub struct TcpConnectionStream {
    server_address: String,
    reader: TcpFrameReader,
    writer: TcpCommandWriter,
}

impl TcpConnectionStream {
    pub async fn connect(
        server_address: &str,
        dial_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, NsqError> {
        let stream = timeout(dial_timeout, TcpStream::connect(server_address))
            .await
            .map_err(|_| NsqError::ConnectionTimeout(server_address.to_string()))?
            .map_err(|error| {
                trace!("Failed to connect to nsqd: {server_address}. {error}");
                NsqError::CannotEstablishConnection(format!("{server_address} ({error})"))
            })?;
        if let Err(error) = stream.set_nodelay(true) {
            error!("Failed to set the nodelay option for: {server_address}: {error}, continuing...");
        }

        Ok(Self::new(server_address, stream, write_timeout))
    }

    pub fn new(server_address: &str, stream: TcpStream, write_timeout: Duration) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            server_address: server_address.to_string(),
            reader: TcpFrameReader {
                server_address: server_address.to_string(),
                reader: BufReader::new(reader),
            },
            writer: TcpCommandWriter {
                server_address: server_address.to_string(),
                writer: BufWriter::new(writer),
                write_timeout,
            },
        }
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub async fn write_magic(&mut self, magic: &[u8]) -> Result<(), NsqError> {
        self.writer.write_all(magic).await?;
        self.writer.flush().await
    }

    pub async fn send(&mut self, command: &Command) -> Result<(), NsqError> {
        self.writer.send(command).await
    }

    pub async fn read_frame(&mut self, max_frame_size: usize) -> Result<Frame, NsqError> {
        self.reader.read_frame(max_frame_size).await
    }

    pub fn into_split(self) -> (TcpFrameReader, TcpCommandWriter) {
        (self.reader, self.writer)
    }
}

#[derive(Debug)]
pub struct TcpFrameReader {
    server_address: String,
    reader: BufReader<OwnedReadHalf>,
}

impl TcpFrameReader {
    pub async fn read_frame(&mut self, max_frame_size: usize) -> Result<Frame, NsqError> {
        read_frame(&mut self.reader, max_frame_size)
            .await
            .inspect_err(|error| {
                trace!(
                    "Failed to read a frame from the TCP connection: {}. {error}",
                    self.server_address
                )
            })
    }
}

#[derive(Debug)]
pub struct TcpCommandWriter {
    server_address: String,
    writer: BufWriter<OwnedWriteHalf>,
    write_timeout: Duration,
}

impl TcpCommandWriter {
    pub async fn send(&mut self, command: &Command) -> Result<(), NsqError> {
        trace!(
            "Sending command: {} to: {}",
            command.name(),
            self.server_address
        );
        let payload = command.to_bytes();
        let result = timeout(self.write_timeout, async {
            self.write_all(&payload).await?;
            self.flush().await
        })
        .await;
        match result {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Writing command: {} to: {} timed out",
                    command.name(),
                    self.server_address
                );
                Err(NsqError::ConnectionTimeout(self.server_address.clone()))
            }
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), NsqError> {
        self.writer.write_all(buf).await.map_err(|error| {
            error!(
                "Failed to write data to the TCP connection: {}. {error}",
                self.server_address
            );
            NsqError::TcpError
        })
    }

    async fn flush(&mut self) -> Result<(), NsqError> {
        self.writer.flush().await.map_err(|error| {
            error!(
                "Failed to flush data to the TCP connection: {}. {error}",
                self.server_address
            );
            NsqError::TcpError
        })
    }

    pub async fn shutdown(&mut self) -> Result<(), NsqError> {
        self.writer.shutdown().await.map_err(|error| {
            error!(
                "Failed to shutdown the TCP connection: {}. {error}",
                self.server_address
            );
            NsqError::TcpError
        })
    }
}
