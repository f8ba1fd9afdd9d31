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
use secrecy::ExposeSecret;

use crate::{config::Config, log_channels};

/// lifetime margin subtracted from the service-reported expiry
const EXPIRY_MARGIN: std::time::Duration = std::time::Duration::from_secs(60);
/// entries never expire sooner than this, whatever the service reported
const EXPIRY_FLOOR: std::time::Duration = std::time::Duration::from_secs(30);
/// deadline of one token endpoint request
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
/// period of the background sweep of expired entries
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// the oauth error code is safe to keep, the response body is not
    #[error("the identity provider rejected the credentials ({0})")]
    Rejected(String),
    #[error("token endpoint request failed")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint answered without an access token")]
    InvalidResponse,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: std::time::Instant,
}

/// Per-user cache of OAuth2 access tokens.
///
/// Concurrent `get` calls for the same login coalesce on a per-key gate so
/// a cold cache issues a single upstream request; late arrivals find the
/// entry the winner stored. Token endpoint requests are never retried here,
/// a failed fetch surfaces immediately.
pub struct TokenCache {
    config: std::sync::Arc<Config>,
    client: reqwest::Client,
    entries: std::sync::Mutex<std::collections::HashMap<String, CachedToken>>,
    flights: std::sync::Mutex<
        std::collections::HashMap<String, std::sync::Arc<tokio::sync::Mutex<()>>>,
    >,
}

impl TokenCache {
    pub fn new(config: std::sync::Arc<Config>) -> anyhow::Result<Self> {
        Ok(Self {
            config,
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .pool_max_idle_per_host(5)
                .pool_idle_timeout(std::time::Duration::from_secs(90))
                .build()?,
            entries: std::sync::Mutex::new(std::collections::HashMap::new()),
            flights: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    /// a valid token for `login`, from cache or freshly fetched.
    pub async fn get(&self, login: &str, secret: &str) -> Result<String, TokenError> {
        if let Some(token) = self.lookup(login) {
            log::debug!(target: log_channels::AUTH, "using cached token for '{}'", login);
            return Ok(token);
        }

        let gate = self.flight(login);
        let _guard = gate.lock().await;

        // another caller may have landed while we waited on the gate
        if let Some(token) = self.lookup(login) {
            return Ok(token);
        }

        let outcome = self.fetch(login, secret).await;

        // the cache must be populated before the gate entry disappears: a
        // caller that observes no flight in progress has to find the token
        if let Ok((token, expires_in)) = &outcome {
            self.store(login, token, *expires_in);
        }
        self.flights
            .lock()
            .expect("flight table poisoned")
            .remove(login);

        let (token, _) = outcome?;
        Ok(token)
    }

    fn lookup(&self, login: &str) -> Option<String> {
        let entries = self.entries.lock().expect("token cache poisoned");
        entries.get(login).and_then(|cached| {
            (std::time::Instant::now() < cached.expires_at).then(|| cached.token.clone())
        })
    }

    fn flight(&self, login: &str) -> std::sync::Arc<tokio::sync::Mutex<()>> {
        self.flights
            .lock()
            .expect("flight table poisoned")
            .entry(login.to_string())
            .or_default()
            .clone()
    }

    fn store(&self, login: &str, token: &str, expires_in: u64) {
        let lifetime = Self::lifetime_of(expires_in);
        self.entries
            .lock()
            .expect("token cache poisoned")
            .insert(
                login.to_string(),
                CachedToken {
                    token: token.to_string(),
                    expires_at: std::time::Instant::now() + lifetime,
                },
            );
        log::debug!(
            target: log_channels::AUTH,
            "token for '{}' cached for {}s",
            login,
            lifetime.as_secs()
        );
    }

    /// reported lifetime minus the refresh margin, floored so a pathological
    /// short-lived token cannot cause a refresh hot-loop.
    fn lifetime_of(expires_in: u64) -> std::time::Duration {
        std::cmp::max(
            EXPIRY_FLOOR,
            std::time::Duration::from_secs(expires_in).saturating_sub(EXPIRY_MARGIN),
        )
    }

    /// one ROPC exchange against the token endpoint.
    async fn fetch(&self, login: &str, secret: &str) -> Result<(String, u64), TokenError> {
        let oauth2 = &self.config.oauth2;
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            oauth2.authority.trim_end_matches('/'),
            urlencoding::encode(&oauth2.tenant_id)
        );

        let scope = oauth2.scopes.join(" ");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", oauth2.client_id.as_str()),
                ("client_secret", oauth2.client_secret.expose_secret().as_str()),
                ("username", login),
                ("password", secret),
                ("grant_type", "password"),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|_| TokenError::InvalidResponse)?;

        if !token.error.is_empty() {
            log::warn!(
                target: log_channels::AUTH,
                "token fetch for '{}' rejected: {} - {}",
                login,
                token.error,
                token.error_description
            );
            return Err(TokenError::Rejected(token.error));
        }
        if token.access_token.is_empty() {
            return Err(TokenError::InvalidResponse);
        }

        log::debug!(
            target: log_channels::AUTH,
            "token acquired for '{}', expires_in={}s",
            login,
            token.expires_in
        );
        Ok((token.access_token, token.expires_in))
    }

    /// drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = std::time::Instant::now();
        let mut entries = self.entries.lock().expect("token cache poisoned");
        let before = entries.len();
        entries.retain(|_, cached| now < cached.expires_at);
        before - entries.len()
    }

    /// Periodic sweep of expired entries, running until shutdown.
    pub fn start_sweeper(
        self: std::sync::Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            // the first tick of an interval is immediate
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let deleted = self.sweep();
                        if deleted > 0 {
                            log::debug!(
                                target: log_channels::AUTH,
                                "token cache sweep removed {} entries",
                                deleted
                            );
                        }
                    }
                    _ = shutdown.changed() => {
                        log::debug!(target: log_channels::AUTH, "token cache sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}
