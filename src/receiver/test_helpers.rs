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
    receiver::{handle_connection, Connection, OnMail},
    smtp::code::SMTPReplyCode,
    smtp::envelop::MailContext,
};

/// A type implementing AsyncRead+AsyncWrite to emulate sockets
pub struct Mock<'a, T: AsRef<[u8]> + Unpin> {
    read_cursor: std::io::Cursor<T>,
    write_cursor: std::io::Cursor<&'a mut Vec<u8>>,
}

impl<'a, T: AsRef<[u8]> + Unpin> Mock<'a, T> {
    pub fn new(read: T, write: &'a mut Vec<u8>) -> Self {
        Self {
            read_cursor: std::io::Cursor::new(read),
            write_cursor: std::io::Cursor::new(write),
        }
    }
}

impl<T: AsRef<[u8]> + Unpin> tokio::io::AsyncRead for Mock<'_, T> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        std::pin::Pin::new(&mut self.read_cursor).poll_read(cx, buf)
    }
}

impl<T: AsRef<[u8]> + Unpin> tokio::io::AsyncWrite for Mock<'_, T> {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        std::task::Poll::Ready(std::io::Write::write(&mut self.write_cursor, buf))
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(std::io::Write::flush(&mut self.write_cursor))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// accepts every message without submitting anything
pub struct DefaultMailHandler;

#[async_trait::async_trait]
impl OnMail for DefaultMailHandler {
    async fn on_mail<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &mut Connection<S>,
        _: Box<MailContext>,
    ) -> anyhow::Result<()> {
        conn.send_code(SMTPReplyCode::Code250Queued).await
    }
}

/// keeps every completed transaction around for the test to inspect
#[derive(Default)]
pub struct CapturingMailHandler {
    pub mails: Vec<MailContext>,
}

#[async_trait::async_trait]
impl OnMail for CapturingMailHandler {
    async fn on_mail<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &mut Connection<S>,
        mail: Box<MailContext>,
    ) -> anyhow::Result<()> {
        self.mails.push(*mail);
        conn.send_code(SMTPReplyCode::Code250Queued).await
    }
}

/// a config whose upstream endpoints cannot answer, for sessions that never
/// reach AUTH or delivery
pub fn unreachable_config() -> Config {
    Config::for_tests("http://127.0.0.1:9", "http://127.0.0.1:9")
}

/// mount a token endpoint answering every ROPC exchange
pub async fn mount_token_endpoint(server: &wiremock::MockServer) {
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/contoso/oauth2/v2.0/token"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "test-token",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

/// Feed `smtp_input` through a full session and compare the transcript.
pub async fn test_receiver<M: OnMail + Send>(
    config: std::sync::Arc<Config>,
    mail_handler: &mut M,
    smtp_input: &[u8],
    expected_output: &[u8],
) -> anyhow::Result<()> {
    let cache = std::sync::Arc::new(TokenCache::new(config.clone())?);

    let mut written_data = Vec::new();
    let mock = Mock::new(smtp_input.to_vec(), &mut written_data);
    let mut conn = Connection::new("127.0.0.1:53844".parse().unwrap(), config, mock);

    let result = handle_connection(&mut conn, cache, mail_handler).await;
    drop(conn);

    pretty_assertions::assert_eq!(
        std::str::from_utf8(&written_data),
        std::str::from_utf8(expected_output)
    );

    result
}
