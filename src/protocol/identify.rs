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
use crate::protocol::frame::OK;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Body of the IDENTIFY command.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentifyRequest {
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    pub feature_negotiation: bool,
    /// Milliseconds.
    pub heartbeat_interval: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_timeout: Option<u64>,
}

impl From<&ConnectionConfig> for IdentifyRequest {
    fn from(config: &ConnectionConfig) -> Self {
        IdentifyRequest {
            client_id: config.client_id.clone(),
            hostname: config.hostname.clone(),
            user_agent: config.user_agent.clone(),
            feature_negotiation: true,
            heartbeat_interval: config.heartbeat_interval.as_millis() as u64,
            msg_timeout: config.msg_timeout.map(|timeout| timeout.as_millis() as u64),
        }
    }
}

impl IdentifyRequest {
    pub fn to_bytes(&self) -> Result<Bytes, NsqError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|error| NsqError::IdentifyFailed(error.to_string()))
    }
}

/// Negotiated features returned by nsqd when `feature_negotiation` is enabled.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentifyResponse {
    pub max_rdy_count: u64,
    pub version: String,
    pub max_msg_timeout: u64,
    pub msg_timeout: u64,
    pub tls_v1: bool,
    pub deflate: bool,
    pub snappy: bool,
    pub auth_required: bool,
}

impl IdentifyResponse {
    /// Older nsqd versions answer a plain `OK` instead of the JSON document.
    pub fn parse(data: &[u8]) -> Result<Option<Self>, NsqError> {
        if data == OK {
            return Ok(None);
        }

        let response: IdentifyResponse = serde_json::from_slice(data)
            .map_err(|error| NsqError::IdentifyFailed(error.to_string()))?;
        if response.auth_required {
            return Err(NsqError::IdentifyFailed(
                "nsqd requires AUTH, which is not supported".to_string(),
            ));
        }

        if response.tls_v1 || response.deflate || response.snappy {
            return Err(NsqError::IdentifyFailed(
                "nsqd negotiated an unsupported stream upgrade".to_string(),
            ));
        }

        Ok(Some(response))
    }
}
