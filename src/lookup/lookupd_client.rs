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
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use tracing::{debug, trace};

const NSQ_V1_ACCEPT: &str = "application/vnd.nsq; version=1.0";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Producer {
    pub broadcast_address: String,
    pub tcp_port: u16,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
}

impl Producer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.broadcast_address, self.tcp_port)
    }
}

#[derive(Debug, Default, Deserialize)]
struct LookupData {
    #[serde(default)]
    producers: Vec<Producer>,
}

/// Pre 1.0 nsqlookupd wraps the payload in `{"status_code":200,"data":{...}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LookupResponse {
    Legacy { data: LookupData },
    Current(LookupData),
}

impl LookupResponse {
    fn into_producers(self) -> Vec<Producer> {
        match self {
            LookupResponse::Legacy { data } | LookupResponse::Current(data) => data.producers,
        }
    }
}

/// HTTP client of the nsqlookupd `/lookup` endpoint.
#[derive(Debug, Clone)]
pub struct LookupdClient {
    client: ClientWithMiddleware,
}

impl LookupdClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self, NsqError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.dial_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|error| NsqError::InvalidConfiguration(error.to_string()))?;
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(config.lookupd_retries);
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self { client })
    }

    /// Resolves `host:port` of every nsqd producing `topic`, empty when the topic is unknown yet.
    pub async fn lookup(&self, lookupd_address: &str, topic: &str) -> Result<Vec<String>, NsqError> {
        let producers = self.lookup_producers(lookupd_address, topic).await?;
        Ok(producers.iter().map(Producer::address).collect())
    }

    pub async fn lookup_producers(
        &self,
        lookupd_address: &str,
        topic: &str,
    ) -> Result<Vec<Producer>, NsqError> {
        let url = lookup_url(lookupd_address, topic)?;
        trace!("Querying nsqlookupd: {url}");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, NSQ_V1_ACCEPT)
            .send()
            .await
            .map_err(|error| NsqError::LookupFailed(lookupd_address.to_string(), error.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("nsqlookupd: {lookupd_address} has no producers of topic: {topic} yet");
            return Ok(Vec::new());
        }

        if !status.is_success() {
            let reason = response.text().await.unwrap_or_else(|_| status.to_string());
            return Err(NsqError::LookupFailed(lookupd_address.to_string(), reason));
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| NsqError::LookupFailed(lookupd_address.to_string(), error.to_string()))?;
        let response: LookupResponse = serde_json::from_slice(&body)
            .map_err(|_| NsqError::InvalidLookupResponse(lookupd_address.to_string()))?;
        let producers = response.into_producers();
        debug!(
            "nsqlookupd: {lookupd_address} returned {} producer(s) of topic: {topic}",
            producers.len()
        );
        Ok(producers)
    }
}

fn lookup_url(lookupd_address: &str, topic: &str) -> Result<Url, NsqError> {
    let base = if lookupd_address.contains("://") {
        lookupd_address.to_string()
    } else {
        format!("http://{lookupd_address}")
    };
    let mut url =
        Url::parse(&base).map_err(|_| NsqError::InvalidAddress(lookupd_address.to_string()))?;
    url.set_path("/lookup");
    url.query_pairs_mut().clear().append_pair("topic", topic);
    Ok(url)
}
