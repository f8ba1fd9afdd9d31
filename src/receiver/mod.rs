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
mod auth_exchange;
/// per-connection state and io
pub mod connection;
/// line framing over the raw stream
pub mod io;
/// the smtp state machine
pub mod transaction;

#[cfg(test)]
pub mod test_helpers;
#[cfg(test)]
mod tests;

pub use connection::{Connection, Credentials};
pub use transaction::{Transaction, TransactionResult};

use crate::{auth::TokenCache, log_channels, smtp::code::SMTPReplyCode, smtp::envelop::MailContext};
use auth_exchange::AuthExchangeError;

/// Consumer of completed transactions.
///
/// The production implementation submits through the Graph API; tests
/// substitute their own to observe the parsed envelope.
#[async_trait::async_trait]
pub trait OnMail {
    async fn on_mail<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &mut Connection<S>,
        mail: Box<MailContext>,
    ) -> anyhow::Result<()>;
}

/// Serve one connection until QUIT, EOF or a fatal channel error.
///
/// # Errors
///
/// * the stream broke mid-session
/// * a command deadline elapsed
pub async fn handle_connection<S, M>(
    conn: &mut Connection<S>,
    cache: std::sync::Arc<TokenCache>,
    mail_handler: &mut M,
) -> anyhow::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    M: OnMail + Send,
{
    let mut helo_domain = None;

    conn.send_code(SMTPReplyCode::Greetings).await?;

    while conn.is_alive {
        match Transaction::receive(conn, &helo_domain).await? {
            TransactionResult::Nothing => {}
            TransactionResult::Mail(mail) => {
                helo_domain = Some(mail.envelop.helo.clone());
                // the submission pipeline inherits the outermost per-socket
                // deadline, renewed for each completed DATA
                tokio::time::timeout(
                    conn.config.connection_timeout(),
                    mail_handler.on_mail(conn, mail),
                )
                .await
                .map_err(|_| anyhow::anyhow!("submission deadline exceeded"))??;
            }
            TransactionResult::Authentication(mechanism, initial_response) => {
                conn.authentication_attempt += 1;
                match auth_exchange::on_authentication(
                    conn,
                    cache.clone(),
                    mechanism,
                    initial_response,
                )
                .await
                {
                    Ok(()) => {
                        log::info!(
                            target: log_channels::RECEIVER,
                            "client {} authenticated as '{}'",
                            conn.client_addr,
                            conn.credentials
                                .as_ref()
                                .map_or("<fallback>", |credentials| credentials.login.as_str())
                        );
                    }
                    Err(AuthExchangeError::InvalidBase64) => {
                        conn.send_code(SMTPReplyCode::Code501InvalidBase64).await?;
                    }
                    Err(AuthExchangeError::Canceled) => {
                        conn.send_code(SMTPReplyCode::Code501AuthCanceled).await?;
                    }
                    Err(AuthExchangeError::NoCredentials) => {
                        conn.send_code(SMTPReplyCode::Code535CredentialsInvalid)
                            .await?;
                        conn.is_alive = false;
                    }
                    Err(AuthExchangeError::Failed) => {
                        conn.send_code(SMTPReplyCode::Code535AuthFailed).await?;
                        conn.is_alive = false;
                    }
                    Err(AuthExchangeError::ReadError(e)) => {
                        let _ = conn.send_code(SMTPReplyCode::Code421AuthError).await;
                        anyhow::bail!("channel failed during authentication: {}", e)
                    }
                    Err(AuthExchangeError::Other(e)) => return Err(e),
                }
            }
        }
    }

    Ok(())
}
