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

use derive_more::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Verbosity threshold of a consumer or producer and of every connection it owns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Display, Default)]
#[repr(u8)]
pub enum LogLevel {
    #[display("debug")]
    Debug = 0,
    #[default]
    #[display("info")]
    Info = 1,
    #[display("warning")]
    Warning = 2,
    #[display("error")]
    Error = 3,
}

impl LogLevel {
    /// `Debug` when debug logging is requested, `Warning` otherwise.
    pub fn for_debug_flag(debug: bool) -> Self {
        if debug {
            LogLevel::Debug
        } else {
            LogLevel::Warning
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            _ => LogLevel::Error,
        }
    }
}

/// Shared, runtime adjustable log threshold.
#[derive(Debug, Clone, Default)]
pub struct LogGate {
    level: Arc<AtomicU8>,
}

impl LogGate {
    pub fn new(level: LogLevel) -> Self {
        LogGate {
            level: Arc::new(AtomicU8::new(level as u8)),
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn allows(&self, level: LogLevel) -> bool {
        level >= self.level()
    }
}

macro_rules! gated_debug {
    ($gate:expr, $($arg:tt)+) => {
        if $gate.allows($crate::logging::LogLevel::Debug) {
            ::tracing::debug!($($arg)+)
        }
    };
}

macro_rules! gated_info {
    ($gate:expr, $($arg:tt)+) => {
        if $gate.allows($crate::logging::LogLevel::Info) {
            ::tracing::info!($($arg)+)
        }
    };
}

macro_rules! gated_warn {
    ($gate:expr, $($arg:tt)+) => {
        if $gate.allows($crate::logging::LogLevel::Warning) {
            ::tracing::warn!($($arg)+)
        }
    };
}

pub(crate) use {gated_debug, gated_info, gated_warn};
