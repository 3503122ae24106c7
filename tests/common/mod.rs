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

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use nsqkit::protocol::frame::{Frame, FrameType};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;

pub const REJECTED_TOPIC: &str = "rejected";
const IDENTIFY_RESPONSE: &[u8] =
    br#"{"max_rdy_count":2500,"version":"1.3.0","max_msg_timeout":900000,"msg_timeout":60000}"#;
const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedCommand {
    pub name: String,
    pub params: Vec<String>,
    pub bodies: Vec<Bytes>,
}

/// In-process nsqd speaking just enough of the TCP protocol to record what clients send.
pub struct FakeNsqd {
    pub address: String,
    commands: flume::Receiver<ReceivedCommand>,
    outgoing: flume::Sender<Bytes>,
    kick: broadcast::Sender<()>,
}

impl FakeNsqd {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (recorder, commands) = flume::unbounded();
        let (outgoing, deliveries) = flume::unbounded();
        let (kick, _) = broadcast::channel(1);
        let kicker = kick.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(
                    socket,
                    recorder.clone(),
                    deliveries.clone(),
                    kicker.subscribe(),
                ));
            }
        });

        FakeNsqd {
            address,
            commands,
            outgoing,
            kick,
        }
    }

    /// Closes every open client connection, new ones are still accepted.
    pub fn drop_connections(&self) {
        let _ = self.kick.send(());
    }

    pub fn port(&self) -> u16 {
        self.address
            .rsplit(':')
            .next()
            .and_then(|port| port.parse().ok())
            .unwrap()
    }

    /// Queues a message for the next subscribed connection.
    pub fn deliver(&self, id: &[u8; 16], attempts: u16, body: &[u8]) {
        let mut data = BytesMut::new();
        data.put_i64(1_700_000_000_000_000_000);
        data.put_u16(attempts);
        data.put_slice(id);
        data.put_slice(body);
        let frame = Frame {
            frame_type: FrameType::Message,
            data: data.freeze(),
        };
        self.outgoing.send(frame.encode()).unwrap();
    }

    pub async fn next_command(&self) -> ReceivedCommand {
        timeout(WAIT, self.commands.recv_async())
            .await
            .expect("no command received in time")
            .expect("fake nsqd stopped")
    }

    /// Skips commands until one named `name` arrives.
    pub async fn expect_command(&self, name: &str) -> ReceivedCommand {
        loop {
            let command = self.next_command().await;
            if command.name == name {
                return command;
            }
        }
    }
}

fn response(data: &'static [u8]) -> Bytes {
    Frame {
        frame_type: FrameType::Response,
        data: Bytes::from_static(data),
    }
    .encode()
}

fn error(data: &'static [u8]) -> Bytes {
    Frame {
        frame_type: FrameType::Error,
        data: Bytes::from_static(data),
    }
    .encode()
}

async fn read_body(reader: &mut BufReader<OwnedReadHalf>) -> Bytes {
    let size = reader.read_u32().await.unwrap() as usize;
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await.unwrap();
    Bytes::from(body)
}

async fn serve(
    socket: TcpStream,
    recorder: flume::Sender<ReceivedCommand>,
    deliveries: flume::Receiver<Bytes>,
    mut kick: broadcast::Receiver<()>,
) {
    let (reader, writer) = socket.into_split();
    let writer: Arc<Mutex<OwnedWriteHalf>> = Arc::new(Mutex::new(writer));
    let mut reader = BufReader::new(reader);
    let mut magic = [0u8; 4];
    if reader.read_exact(&mut magic).await.is_err() {
        return;
    }
    assert_eq!(&magic, b"  V2");

    let mut pusher = None;
    loop {
        let mut line = String::new();
        tokio::select! {
            read = reader.read_line(&mut line) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
            _ = kick.recv() => break,
        }

        let mut parts = line.trim_end().split(' ');
        let name = parts.next().unwrap_or_default().to_string();
        let params = parts.map(str::to_string).collect::<Vec<_>>();
        let mut bodies = Vec::new();
        let reply = match name.as_str() {
            "IDENTIFY" => {
                bodies.push(read_body(&mut reader).await);
                Some(response(IDENTIFY_RESPONSE))
            }
            "SUB" => Some(response(b"OK")),
            "PUB" | "DPUB" => {
                bodies.push(read_body(&mut reader).await);
                if params.first().map(String::as_str) == Some(REJECTED_TOPIC) {
                    Some(error(b"E_PUB_FAILED topic rejected"))
                } else {
                    Some(response(b"OK"))
                }
            }
            "MPUB" => {
                let _size = reader.read_u32().await.unwrap();
                let count = reader.read_u32().await.unwrap();
                for _ in 0..count {
                    bodies.push(read_body(&mut reader).await);
                }
                Some(response(b"OK"))
            }
            "CLS" => Some(response(b"CLOSE_WAIT")),
            _ => None,
        };

        let subscribed = name == "SUB";
        let _ = recorder.send(ReceivedCommand {
            name,
            params,
            bodies,
        });
        if let Some(reply) = reply {
            if writer.lock().await.write_all(&reply).await.is_err() {
                break;
            }
        }

        if subscribed && pusher.is_none() {
            let writer = writer.clone();
            let deliveries = deliveries.clone();
            pusher = Some(tokio::spawn(async move {
                while let Ok(frame) = deliveries.recv_async().await {
                    if writer.lock().await.write_all(&frame).await.is_err() {
                        break;
                    }
                }
            }));
        }
    }

    if let Some(pusher) = pusher {
        pusher.abort();
    }
}

/// Answers every `/lookup` request with the given nsqd as the only producer.
pub async fn start_fake_lookupd(nsqd_port: u16) -> String {
    start_toggled_fake_lookupd(nsqd_port, Arc::new(AtomicBool::new(true))).await
}

/// Answers `/lookup` with 404 until `registered` is set, then with the given nsqd.
pub async fn start_toggled_fake_lookupd(nsqd_port: u16, registered: Arc<AtomicBool>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let registered = registered.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buffer = [0u8; 1024];
                while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                    match socket.read(&mut buffer).await {
                        Ok(0) | Err(_) => return,
                        Ok(read) => request.extend_from_slice(&buffer[..read]),
                    }
                }
                let (status, body) = if registered.load(Ordering::SeqCst) {
                    (
                        "200 OK",
                        format!(
                            r#"{{"channels":[],"producers":[{{"broadcast_address":"127.0.0.1","hostname":"fake","tcp_port":{nsqd_port},"http_port":4151,"version":"1.3.0"}}]}}"#
                        ),
                    )
                } else {
                    ("404 Not Found", r#"{"message":"TOPIC_NOT_FOUND"}"#.to_string())
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
    address
}
