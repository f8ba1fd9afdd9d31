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
use crate::{
    auth::TokenCache,
    config::Config,
    delivery::{GraphMailHandler, GraphSender},
    log_channels,
    receiver::{handle_connection, Connection},
    smtp::code::SMTPReplyCode,
};

/// in-flight sessions get this long to finish after the shutdown signal
const SHUTDOWN_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// The relay's TCP front: accepts clients, enforces the connection
/// ceiling and supervises one task per session.
pub struct ServerRelay {
    listener: tokio::net::TcpListener,
    config: std::sync::Arc<Config>,
    cache: std::sync::Arc<TokenCache>,
    sender: std::sync::Arc<GraphSender>,
    connection_limit: std::sync::Arc<tokio::sync::Semaphore>,
}

impl ServerRelay {
    /// bind the listen address and prepare the shared upstream clients.
    pub async fn new(config: std::sync::Arc<Config>) -> anyhow::Result<Self> {
        Ok(Self {
            listener: tokio::net::TcpListener::bind(&config.listen_addr).await?,
            cache: std::sync::Arc::new(TokenCache::new(config.clone())?),
            sender: std::sync::Arc::new(GraphSender::new(config.clone())?),
            connection_limit: std::sync::Arc::new(tokio::sync::Semaphore::new(
                config.max_connections,
            )),
            config,
        })
    }

    pub fn addr(&self) -> std::net::SocketAddr {
        self.listener
            .local_addr()
            .expect("cannot retrieve local address")
    }

    pub fn token_cache(&self) -> std::sync::Arc<TokenCache> {
        self.cache.clone()
    }

    /// Accept until the shutdown signal, then drain.
    ///
    /// Sessions still running [`SHUTDOWN_DRAIN_TIMEOUT`] after the signal
    /// are abandoned; the wait is logged either way.
    pub async fn listen_and_serve(
        self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut sessions = tokio::task::JoinSet::<()>::new();

        log::info!(
            target: log_channels::SERVER,
            "listening on {}, max_connections={}",
            self.addr(),
            self.config.max_connections
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                Some(ended) = sessions.join_next() => log_session_end(ended),

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, client_addr)) => {
                        self.serve(&mut sessions, stream, client_addr);
                    }
                    Err(e) => {
                        log::error!(target: log_channels::SERVER, "accept failed: {}", e);
                    }
                },
            }
        }

        // stop accepting before draining
        drop(self.listener);
        log::info!(
            target: log_channels::SERVER,
            "shutdown signal received, draining {} session(s)",
            sessions.len()
        );

        let drain = async {
            while let Some(ended) = sessions.join_next().await {
                log_session_end(ended);
            }
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            log::warn!(
                target: log_channels::SERVER,
                "drain deadline ({}s) reached, abandoning {} session(s)",
                SHUTDOWN_DRAIN_TIMEOUT.as_secs(),
                sessions.len()
            );
        } else {
            log::info!(target: log_channels::SERVER, "all sessions closed cleanly");
        }

        Ok(())
    }

    fn serve(
        &self,
        sessions: &mut tokio::task::JoinSet<()>,
        mut stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
    ) {
        let permit = match self.connection_limit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                log::warn!(
                    target: log_channels::SERVER,
                    "connection from {} rejected: at capacity ({})",
                    client_addr,
                    self.config.max_connections
                );
                sessions.spawn(async move {
                    let _ = tokio::io::AsyncWriteExt::write_all(
                        &mut stream,
                        SMTPReplyCode::Code421TooManyConnections.as_str().as_bytes(),
                    )
                    .await;
                });
                return;
            }
        };

        let config = self.config.clone();
        let cache = self.cache.clone();
        let mut mail_handler = GraphMailHandler {
            config: config.clone(),
            cache: cache.clone(),
            sender: self.sender.clone(),
        };

        sessions.spawn(async move {
            // held for the whole session, released on every exit path
            let _permit = permit;
            let begin = std::time::SystemTime::now();

            log::info!(
                target: log_channels::SERVER,
                "handling client {}",
                client_addr
            );

            let mut conn = Connection::new(client_addr, config, stream);
            match handle_connection(&mut conn, cache, &mut mail_handler).await {
                Ok(()) => log::info!(
                    target: log_channels::SERVER,
                    "{{ elapsed: {:?} }} connection {} closed cleanly",
                    begin.elapsed(),
                    client_addr,
                ),
                Err(error) => log::error!(
                    target: log_channels::SERVER,
                    "{{ elapsed: {:?} }} connection {} closed with an error: {}",
                    begin.elapsed(),
                    client_addr,
                    error,
                ),
            }
        });
    }
}

/// one session's fault never reaches the others; a panic surfaces here as
/// a join error and the permit was released by unwinding.
fn log_session_end(ended: Result<(), tokio::task::JoinError>) {
    match ended {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            log::error!(target: log_channels::SERVER, "session panicked: {}", e);
        }
        Err(e) => {
            log::error!(target: log_channels::SERVER, "session aborted: {}", e);
        }
    }
}
