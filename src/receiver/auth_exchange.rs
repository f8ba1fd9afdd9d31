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
use base64::Engine;
use secrecy::ExposeSecret;

use super::connection::{Connection, Credentials};
use crate::{
    auth::TokenCache, log_channels, message::helpers::PERMISSIVE_BASE64,
    smtp::code::SMTPReplyCode, smtp::mechanism::Mechanism,
};

/// answers during the exchange arrive within this deadline
const AUTH_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Outcome of a failed AUTH command
#[must_use]
#[derive(Debug)]
pub enum AuthExchangeError {
    /// the identity provider rejected the credentials
    Failed,
    /// no credentials supplied and no fallback configured
    NoCredentials,
    /// the client sent `*` to stop the exchange
    Canceled,
    /// a challenge answer was not decodable base64
    InvalidBase64,
    /// the channel broke while waiting for a challenge answer
    ReadError(std::io::Error),
    ///
    Other(anyhow::Error),
}

/// Drive one AUTH LOGIN / AUTH PLAIN exchange to completion.
///
/// On success the connection is flagged authenticated, carries the
/// credentials for later token refreshes, and the `235` reply has been
/// sent. Every error path leaves the reply to the caller.
pub async fn on_authentication<S>(
    conn: &mut Connection<S>,
    cache: std::sync::Arc<TokenCache>,
    mechanism: Mechanism,
    initial_response: Option<String>,
) -> Result<(), AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let (login, secret) = match mechanism {
        Mechanism::Login => exchange_login(conn, initial_response).await?,
        Mechanism::Plain => exchange_plain(conn, initial_response).await?,
    };

    let (login, secret) = if login.is_empty() || secret.is_empty() {
        // substitute the configured fallback identity, if any
        match (&conn.config.fallback_user, &conn.config.fallback_pass) {
            (Some(user), Some(pass)) => {
                log::warn!(
                    target: log_channels::AUTH,
                    "client {} sent empty credentials, using fallback account: per-user auditing bypassed",
                    conn.client_addr
                );
                (user.clone(), pass.expose_secret().clone())
            }
            _ => return Err(AuthExchangeError::NoCredentials),
        }
    } else {
        (login, secret)
    };

    // the password is only good if it buys a token
    if let Err(e) = cache.get(&login, &secret).await {
        log::warn!(
            target: log_channels::AUTH,
            "authentication of '{}' from {} failed: {}",
            login,
            conn.client_addr,
            e
        );
        return Err(AuthExchangeError::Failed);
    }

    conn.send_code(SMTPReplyCode::AuthSucceeded)
        .await
        .map_err(AuthExchangeError::Other)?;
    conn.is_authenticated = true;
    conn.credentials = Some(Credentials { login, secret });

    Ok(())
}

async fn exchange_login<S>(
    conn: &mut Connection<S>,
    initial_response: Option<String>,
) -> Result<(String, String), AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let login_b64 = match initial_response {
        Some(inline) => inline,
        None => {
            conn.send_code(SMTPReplyCode::AuthUsernameChallenge)
                .await
                .map_err(AuthExchangeError::Other)?;
            read_challenge_answer(conn).await?
        }
    };
    let login = decode_base64(&login_b64)?;

    conn.send_code(SMTPReplyCode::AuthPasswordChallenge)
        .await
        .map_err(AuthExchangeError::Other)?;
    let secret = decode_base64(&read_challenge_answer(conn).await?)?;

    Ok((login, secret))
}

async fn exchange_plain<S>(
    conn: &mut Connection<S>,
    initial_response: Option<String>,
) -> Result<(String, String), AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    let payload_b64 = match initial_response {
        Some(inline) => inline,
        None => {
            conn.send_code(SMTPReplyCode::AuthPlainChallenge)
                .await
                .map_err(AuthExchangeError::Other)?;
            read_challenge_answer(conn).await?
        }
    };
    let payload = decode_base64(&payload_b64)?;

    // `authzid \0 authcid \0 password`, the authzid is ignored
    let mut fields = payload.split('\0');
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(_authzid), Some(authcid), Some(password), None) => {
            Ok((authcid.to_string(), password.to_string()))
        }
        _ => Err(AuthExchangeError::InvalidBase64),
    }
}

async fn read_challenge_answer<S>(
    conn: &mut Connection<S>,
) -> Result<String, AuthExchangeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    match conn.read(AUTH_READ_TIMEOUT).await {
        Ok(Some(answer)) => {
            let answer = answer.trim().to_string();
            if answer == "*" {
                return Err(AuthExchangeError::Canceled);
            }
            Ok(answer)
        }
        Ok(None) => Err(AuthExchangeError::ReadError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream closed during authentication",
        ))),
        Err(e) => Err(AuthExchangeError::ReadError(e)),
    }
}

fn decode_base64(input: &str) -> Result<String, AuthExchangeError> {
    let bytes = PERMISSIVE_BASE64
        .decode(input)
        .map_err(|_| AuthExchangeError::InvalidBase64)?;
    String::from_utf8(bytes).map_err(|_| AuthExchangeError::InvalidBase64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_and_unpadded_forms_decode() {
        assert_eq!(decode_base64("dXNlckBleC5jb20=").unwrap(), "user@ex.com");
        assert_eq!(decode_base64("dXNlckBleC5jb20").unwrap(), "user@ex.com");
        assert!(matches!(
            decode_base64("not base64 !"),
            Err(AuthExchangeError::InvalidBase64)
        ));
    }
}
