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
use secrecy::SecretString;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 26_214_400;
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;
pub const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_RETRY_ATTEMPTS: i64 = 3;
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// where the relay accepts SMTP clients; loopback unless you know better
    #[serde(default = "Config::default_listen_addr")]
    pub listen_addr: std::net::SocketAddr,
    pub oauth2: ConfigOAuth2,
    /// identity substituted when the client authenticates with empty
    /// credentials, or for anonymous submission
    #[serde(default)]
    pub fallback_user: Option<String>,
    #[serde(default, serialize_with = "serialize_redacted_opt")]
    pub fallback_pass: Option<SecretString>,
    /// accept MAIL FROM without AUTH, mapped to the fallback identity
    #[serde(default)]
    pub allow_anonymous: bool,
    /// forwarded as `saveToSentItems` on every submission
    #[serde(default)]
    pub save_to_sent: bool,
    #[serde(default = "Config::default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "Config::default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "Config::default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,
    /// fail the whole message when one attachment cannot be decoded
    #[serde(default)]
    pub strict_attachments: bool,
    #[serde(default = "Config::default_retry_attempts")]
    pub retry_attempts: i64,
    #[serde(default = "Config::default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    /// override for sovereign clouds, https mandatory in production
    #[serde(default = "Config::default_graph_endpoint")]
    pub graph_endpoint: String,
    #[serde(default)]
    pub logs: ConfigLogs,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOAuth2 {
    pub client_id: String,
    #[serde(serialize_with = "serialize_redacted")]
    pub client_secret: SecretString,
    pub tenant_id: String,
    #[serde(default = "ConfigOAuth2::default_scopes")]
    pub scopes: Vec<String>,
    /// override for sovereign clouds, https mandatory in production
    #[serde(default = "ConfigOAuth2::default_authority")]
    pub authority: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLogs {
    /// stdout when unset
    #[serde(default)]
    pub filepath: Option<std::path::PathBuf>,
    #[serde(default = "ConfigLogs::default_level")]
    pub level: log::LevelFilter,
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for ConfigLogs {
    fn default() -> Self {
        Self {
            filepath: None,
            level: Self::default_level(),
            format: None,
        }
    }
}

impl ConfigLogs {
    const fn default_level() -> log::LevelFilter {
        log::LevelFilter::Info
    }
}

impl ConfigOAuth2 {
    fn default_scopes() -> Vec<String> {
        vec!["https://graph.microsoft.com/.default".to_string()]
    }

    fn default_authority() -> String {
        "https://login.microsoftonline.com".to_string()
    }
}

impl Config {
    fn default_listen_addr() -> std::net::SocketAddr {
        "127.0.0.1:2526".parse().expect("default listen address")
    }

    const fn default_max_message_size() -> usize {
        DEFAULT_MAX_MESSAGE_SIZE
    }

    const fn default_max_connections() -> usize {
        DEFAULT_MAX_CONNECTIONS
    }

    const fn default_connection_timeout_seconds() -> u64 {
        DEFAULT_CONNECTION_TIMEOUT_SECONDS
    }

    const fn default_retry_attempts() -> i64 {
        DEFAULT_RETRY_ATTEMPTS
    }

    const fn default_retry_initial_delay_ms() -> u64 {
        DEFAULT_RETRY_INITIAL_DELAY_MS
    }

    fn default_graph_endpoint() -> String {
        "https://graph.microsoft.com/v1.0".to_string()
    }

    /// Load a configuration, normalizing out-of-range values the way the
    /// deployment expects: an absent or non-positive knob falls back to its
    /// default instead of failing startup.
    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        let mut config = toml::from_str::<Self>(data)?;

        if config.retry_attempts < 1 {
            config.retry_attempts = DEFAULT_RETRY_ATTEMPTS;
        }
        if config.max_message_size == 0 {
            config.max_message_size = DEFAULT_MAX_MESSAGE_SIZE;
        }
        if config.max_connections == 0 {
            config.max_connections = DEFAULT_MAX_CONNECTIONS;
        }
        if config.connection_timeout_seconds == 0 {
            config.connection_timeout_seconds = DEFAULT_CONNECTION_TIMEOUT_SECONDS;
        }
        if config.retry_initial_delay_ms == 0 {
            config.retry_initial_delay_ms = DEFAULT_RETRY_INITIAL_DELAY_MS;
        }

        Ok(config)
    }

    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_timeout_seconds)
    }

    #[cfg(test)]
    pub fn for_tests(authority: &str, graph_endpoint: &str) -> Self {
        Self {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            oauth2: ConfigOAuth2 {
                client_id: "test-client".to_string(),
                client_secret: SecretString::new("test-secret".to_string()),
                tenant_id: "contoso".to_string(),
                scopes: ConfigOAuth2::default_scopes(),
                authority: authority.to_string(),
            },
            fallback_user: None,
            fallback_pass: None,
            allow_anonymous: false,
            save_to_sent: false,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout_seconds: DEFAULT_CONNECTION_TIMEOUT_SECONDS,
            strict_attachments: false,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_initial_delay_ms: 100,
            graph_endpoint: graph_endpoint.to_string(),
            logs: ConfigLogs::default(),
        }
    }
}

/// helper to initialize the log4rs config
///
/// # Errors
///
/// * if log4rs rejects the appender or the root configuration
pub fn get_logger_config(config: &Config) -> anyhow::Result<log4rs::Config> {
    use log4rs::{append, config as log_config, encode};

    let pattern = config
        .logs
        .format
        .as_deref()
        .unwrap_or("{d} {h({l:<5})} {t} $ {m}{n}");

    let appender: Box<dyn append::Append> = match &config.logs.filepath {
        Some(filepath) => Box::new(
            append::file::FileAppender::builder()
                .encoder(Box::new(encode::pattern::PatternEncoder::new(pattern)))
                .build(filepath)?,
        ),
        None => Box::new(
            append::console::ConsoleAppender::builder()
                .encoder(Box::new(encode::pattern::PatternEncoder::new(pattern)))
                .build(),
        ),
    };

    log_config::Config::builder()
        .appender(log_config::Appender::builder().build("relay", appender))
        .build(
            log_config::Root::builder()
                .appender("relay")
                .build(config.logs.level),
        )
        .map_err(|e| anyhow::anyhow!(e))
}

fn serialize_redacted<S: serde::Serializer>(
    _: &SecretString,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("<redacted>")
}

fn serialize_redacted_opt<S: serde::Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("<redacted>"),
        None => serializer.serialize_none(),
    }
}
