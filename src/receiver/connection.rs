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
use super::io::AbstractIO;
use crate::{config::Config, log_channels, smtp::code::SMTPReplyCode};

/// what AUTH left behind, exchanged for a token on every submission
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub secret: String,
}

// the secret stays out of traces
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// Instance containing connection to the server's information
pub struct Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    /// connection timestamp
    pub timestamp: std::time::SystemTime,
    /// is still alive
    pub is_alive: bool,
    /// server's configuration
    pub config: std::sync::Arc<Config>,
    /// peer socket address
    pub client_addr: std::net::SocketAddr,
    /// number of errors the client made so far
    pub error_count: i64,
    /// has completed an AUTH exchange
    pub is_authenticated: bool,
    /// number of times the AUTH command has been received
    pub authentication_attempt: i64,
    /// present once authenticated
    pub credentials: Option<Credentials>,
    /// abstraction of the stream
    pub io_stream: AbstractIO<S>,
}

impl<S> Connection<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    ///
    pub fn new(
        client_addr: std::net::SocketAddr,
        config: std::sync::Arc<Config>,
        stream: S,
    ) -> Self {
        Self {
            timestamp: std::time::SystemTime::now(),
            is_alive: true,
            config,
            client_addr,
            error_count: 0,
            is_authenticated: false,
            authentication_attempt: 0,
            credentials: None,
            io_stream: AbstractIO::new(stream),
        }
    }

    /// send a reply code to the client
    ///
    /// # Errors
    ///
    /// * the underlying stream is no longer writable
    pub async fn send_code(&mut self, reply_to_send: SMTPReplyCode) -> anyhow::Result<()> {
        if reply_to_send.is_error() {
            self.error_count += 1;
        }
        self.send(reply_to_send.as_str()).await
    }

    /// send a raw reply, already CRLF terminated
    ///
    /// # Errors
    ///
    /// * the underlying stream is no longer writable
    pub async fn send(&mut self, reply: &str) -> anyhow::Result<()> {
        log::info!(target: log_channels::CONNECTION, "send=\"{}\"", reply.trim_end());

        tokio::io::AsyncWriteExt::write_all(&mut self.io_stream.inner, reply.as_bytes()).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.io_stream.inner).await?;

        Ok(())
    }

    /// read a line from the client
    ///
    /// # Errors
    ///
    /// * timed-out (`std::io::ErrorKind::TimedOut`)
    /// * stream's error
    pub async fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> std::io::Result<Option<String>> {
        self.io_stream.next_line(timeout).await
    }
}
