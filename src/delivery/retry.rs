/*
 * grelay - SMTP to Microsoft Graph relay
 * Copyright (C) 2026 The grelay Authors
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use crate::{config::Config, log_channels};

use super::SendError;

/// statuses worth another attempt: throttling and transient server faults
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// backoff never grows beyond this, jitter excluded
const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(10);

/// Immutable retry settings of one submission.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// total attempts, at least 1
    pub max_attempts: u32,
    pub initial_backoff: std::time::Duration,
    pub max_backoff: std::time::Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1) as u32,
            initial_backoff: std::time::Duration::from_millis(config.retry_initial_delay_ms),
            max_backoff: MAX_BACKOFF,
        }
    }

    /// `min(initial * 2^(attempt-1), max) + jitter in [0, delay/4)`
    fn backoff(&self, attempt: u32) -> std::time::Duration {
        let exponential = self
            .initial_backoff
            .saturating_mul(1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX));
        let capped = std::cmp::min(exponential, self.max_backoff);
        let jitter = std::time::Duration::from_millis(
            fastrand::u64(0..std::cmp::max(1, capped.as_millis() as u64 / 4)),
        );
        capped + jitter
    }

    #[cfg(test)]
    pub(crate) fn backoff_for_tests(&self, attempt: u32) -> std::time::Duration {
        self.backoff(attempt)
    }
}

/// Execute `request` until it yields a non-retryable outcome or the policy
/// is exhausted.
///
/// The request body must be an immutable byte buffer so every attempt sends
/// an identical payload; the response of a retried attempt is dropped
/// (closing its connection) before the next one. Cancellation during a
/// backoff wait takes effect immediately, a running attempt finishes within
/// the client's own deadline.
pub async fn send_with_retry(
    client: &reqwest::Client,
    request: reqwest::Request,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, SendError> {
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            log::debug!(
                target: log_channels::DELIVERY,
                "retrying submission, attempt={} backoff={}ms",
                attempt + 1,
                backoff.as_millis()
            );
            tokio::time::sleep(backoff).await;
        }

        let attempt_request = match request.try_clone() {
            Some(request) => request,
            None => return Err(SendError::NotReplayable),
        };

        match client.execute(attempt_request).await {
            Ok(response) if is_retryable(response.status()) => {
                log::debug!(
                    target: log_channels::DELIVERY,
                    "retryable status received, attempt={} status={}",
                    attempt + 1,
                    response.status()
                );
                last_error = Some(SendError::Status {
                    status: response.status(),
                });
                drop(response);
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                log::debug!(
                    target: log_channels::DELIVERY,
                    "submission attempt failed, attempt={} error={}",
                    attempt + 1,
                    e
                );
                last_error = Some(SendError::Transport(e));
            }
        }
    }

    Err(last_error.unwrap_or(SendError::NotReplayable))
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    RETRYABLE_STATUS.contains(&status.as_u16())
}
