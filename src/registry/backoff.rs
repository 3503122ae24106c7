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

use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const LONG_RETRY_DELAY: Duration = Duration::from_secs(30);
const LONG_RETRY_EVERY: u64 = 6;

/// Delay before the next connect attempt after `attempt` consecutive failures (1 based).
pub fn retry_delay(attempt: u64) -> Duration {
    if attempt > 0 && attempt % LONG_RETRY_EVERY == 0 {
        LONG_RETRY_DELAY
    } else {
        RETRY_DELAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_sixth_attempt_should_wait_longer() {
        let delays = (1..=13).map(|attempt| retry_delay(attempt).as_secs()).collect::<Vec<_>>();
        assert_eq!(delays, vec![5, 5, 5, 5, 5, 30, 5, 5, 5, 5, 5, 30, 5]);
    }
}
