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
use bytes::Bytes;
use serde::Serialize;

/// A value that can be published, encoded into a message body by [`MessageValue::encode`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    /// Published unchanged.
    Bytes(Bytes),
    /// Shortest decimal text that reads back to the same value, never in exponent form.
    Float(f64),
    /// Base 10 text.
    Int(i64),
    /// UTF-8 text.
    Text(String),
    /// JSON document.
    Structured(serde_json::Value),
}

impl MessageValue {
    pub fn structured<T: Serialize + ?Sized>(value: &T) -> Result<Self, NsqError> {
        serde_json::to_value(value)
            .map(MessageValue::Structured)
            .map_err(|error| NsqError::CannotMarshalMessage(error.to_string()))
    }

    pub fn encode(&self) -> Result<Bytes, NsqError> {
        match self {
            MessageValue::Bytes(bytes) => Ok(bytes.clone()),
            MessageValue::Float(value) => Ok(Bytes::from(format_float(*value))),
            MessageValue::Int(value) => Ok(Bytes::from(value.to_string())),
            MessageValue::Text(text) => Ok(Bytes::from(text.clone())),
            MessageValue::Structured(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|error| NsqError::CannotMarshalMessage(error.to_string())),
        }
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        // `Display` for f64 is already the shortest round-trip form without an exponent.
        value.to_string()
    }
}

impl From<Bytes> for MessageValue {
    fn from(value: Bytes) -> Self {
        MessageValue::Bytes(value)
    }
}

impl From<Vec<u8>> for MessageValue {
    fn from(value: Vec<u8>) -> Self {
        MessageValue::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for MessageValue {
    fn from(value: &[u8]) -> Self {
        MessageValue::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<f64> for MessageValue {
    fn from(value: f64) -> Self {
        MessageValue::Float(value)
    }
}

impl From<i64> for MessageValue {
    fn from(value: i64) -> Self {
        MessageValue::Int(value)
    }
}

impl From<String> for MessageValue {
    fn from(value: String) -> Self {
        MessageValue::Text(value)
    }
}

impl From<&str> for MessageValue {
    fn from(value: &str) -> Self {
        MessageValue::Text(value.to_string())
    }
}

impl From<serde_json::Value> for MessageValue {
    fn from(value: serde_json::Value) -> Self {
        MessageValue::Structured(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[test]
    fn should_render_numbers_as_text() {
        assert_eq!(MessageValue::from(42i64).encode().unwrap(), "42");
        assert_eq!(MessageValue::from(-7i64).encode().unwrap(), "-7");
        assert_eq!(MessageValue::from(3.5).encode().unwrap(), "3.5");
        assert_eq!(MessageValue::from(0.1).encode().unwrap(), "0.1");
        assert_eq!(MessageValue::from(1e21).encode().unwrap(), "1000000000000000000000");
        assert_eq!(MessageValue::from(2.0).encode().unwrap(), "2");
    }

    #[test]
    fn should_render_non_finite_floats() {
        assert_eq!(MessageValue::from(f64::NAN).encode().unwrap(), "NaN");
        assert_eq!(MessageValue::from(f64::INFINITY).encode().unwrap(), "+Inf");
        assert_eq!(MessageValue::from(f64::NEG_INFINITY).encode().unwrap(), "-Inf");
    }

    #[test]
    fn should_pass_bytes_and_text_through() {
        let raw = vec![0u8, 159, 146, 150];
        assert_eq!(MessageValue::from(raw.clone()).encode().unwrap(), raw);
        assert_eq!(MessageValue::from("héllo").encode().unwrap(), "héllo");
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u64,
        items: Vec<String>,
    }

    #[test]
    fn structured_values_should_round_trip_through_json() {
        let order = Order {
            id: 7,
            items: vec!["book".to_string()],
        };
        let body = MessageValue::structured(&order).unwrap().encode().unwrap();
        assert_eq!(serde_json::from_slice::<Order>(&body).unwrap(), order);
    }

    #[test]
    fn should_reject_values_json_cannot_represent() {
        let mut map = BTreeMap::new();
        map.insert((1, 2), "tuple keys");
        let error = MessageValue::structured(&map).unwrap_err();
        assert_eq!(error.as_code(), 70);
    }
}
