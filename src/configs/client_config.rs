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
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use toml::{Table, Value};
use tracing::{debug, error};

pub const PRODUCER_SECTION: &str = "producer";
pub const CONSUMER_SECTION: &str = "consumer";

/// Flat key/value view of one configuration section.
///
/// Values are kept as text, list values use commas as separators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSection {
    values: HashMap<String, String>,
}

impl ConfigSection {
    pub fn new() -> Self {
        ConfigSection::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Comma separated entries of `key`, trimmed, without empty and duplicate entries.
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        let value = self.get(key)?;
        let mut entries: Vec<String> = Vec::new();
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if !entries.iter().any(|existing| existing == entry) {
                entries.push(entry.to_string());
            }
        }
        Some(entries)
    }

    /// Value of `key` when it parses as an integer greater than zero.
    pub fn get_positive(&self, key: &str) -> Option<usize> {
        self.get(key)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|value| *value > 0)
            .and_then(|value| usize::try_from(value).ok())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigSection {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        ConfigSection {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Section keyed configuration, usually loaded from a TOML file:
///
/// ```toml
/// [producer]
/// nsqd = "127.0.0.1:4150"
///
/// [consumer]
/// nsqd = "127.0.0.1:4150"
/// nsqlookupd = ["127.0.0.1:4161", "127.0.0.2:4161"]
/// channel = "chan1"
/// maxInFlight = 100
/// concurrent = 20
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    sections: HashMap<String, ConfigSection>,
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NsqError> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|error| {
            error!(
                "Failed to read configuration file: {}. {error}",
                path.display()
            );
            NsqError::CannotReadConfiguration(path.display().to_string())
        })?;
        content.parse()
    }

    pub fn section(&self, name: &str) -> Option<&ConfigSection> {
        self.sections.get(name)
    }

    /// The `[producer]` section, empty when missing.
    pub fn producer(&self) -> ConfigSection {
        self.section(PRODUCER_SECTION).cloned().unwrap_or_default()
    }

    /// The `[consumer]` section, empty when missing.
    pub fn consumer(&self) -> ConfigSection {
        self.section(CONSUMER_SECTION).cloned().unwrap_or_default()
    }

    pub fn insert_section(&mut self, name: impl Into<String>, section: ConfigSection) {
        self.sections.insert(name.into(), section);
    }

    fn value_to_text(key: &str, value: &Value) -> Result<String, NsqError> {
        match value {
            Value::String(text) => Ok(text.clone()),
            Value::Integer(number) => Ok(number.to_string()),
            Value::Float(number) => Ok(number.to_string()),
            Value::Boolean(flag) => Ok(flag.to_string()),
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| Self::value_to_text(key, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items.join(","))
            }
            Value::Datetime(datetime) => Ok(datetime.to_string()),
            Value::Table(_) => Err(NsqError::CannotParseConfiguration(format!(
                "nested table under key: {key} is not supported"
            ))),
        }
    }
}

impl FromStr for ClientConfig {
    type Err = NsqError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let table: Table = content
            .parse()
            .map_err(|error: toml::de::Error| NsqError::CannotParseConfiguration(error.to_string()))?;
        let mut config = ClientConfig::default();
        for (name, value) in &table {
            let Value::Table(entries) = value else {
                return Err(NsqError::CannotParseConfiguration(format!(
                    "top level key: {name} must be a section"
                )));
            };

            let mut section = ConfigSection::new();
            for (key, value) in entries {
                section.insert(key.clone(), Self::value_to_text(key, value)?);
            }
            config.sections.insert(name.clone(), section);
        }
        Ok(config)
    }
}
