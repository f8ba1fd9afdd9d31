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

use crate::config::Config;
use crate::receiver::test_helpers::{
    mount_token_endpoint, test_receiver, CapturingMailHandler, DefaultMailHandler,
};

fn auth_line() -> String {
    format!(
        "AUTH PLAIN {}\r\n",
        base64::engine::general_purpose::STANDARD.encode("\0user@contoso.com\0pw")
    )
}

async fn config_with_token_endpoint() -> (wiremock::MockServer, Config) {
    let server = wiremock::MockServer::start().await;
    mount_token_endpoint(&server).await;
    let config = Config::for_tests(&server.uri(), &server.uri());
    (server, config)
}

#[tokio::test]
async fn data_without_recipients_is_refused() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut DefaultMailHandler,
        [
            auth_line().as_str(),
            "MAIL FROM:<a@b.example>\r\n",
            "DATA\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "250 2.1.0 Ok\r\n",
            "503 5.5.1 No recipients specified\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn invalid_addresses_get_the_matching_code() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut DefaultMailHandler,
        [
            auth_line().as_str(),
            "MAIL FROM:<not-a-mailbox>\r\n",
            "MAIL FROM:<a@b.example>\r\n",
            "RCPT TO:<no-domain@>\r\n",
            "RCPT TO:<r@x.example>\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "501 5.1.7 Invalid sender address\r\n",
            "250 2.1.0 Ok\r\n",
            "553 5.1.3 Invalid recipient address\r\n",
            "250 2.1.5 Ok\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

/// scenario: max_message_size=10, the oversized DATA is drained, the
/// session survives and the next envelope is accepted.
#[tokio::test]
async fn oversized_message_is_drained_and_the_session_survives() {
    let (_server, mut config) = config_with_token_endpoint().await;
    config.max_message_size = 10;

    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut DefaultMailHandler,
        [
            auth_line().as_str(),
            "MAIL FROM:<a@b.example>\r\n",
            "RCPT TO:<r@x.example>\r\n",
            "DATA\r\n",
            "twenty bytes of payload over the limit\r\n",
            "still draining\r\n",
            ".\r\n",
            "MAIL FROM:<a@b.example>\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "552 5.3.4 Message too large (max 10 bytes)\r\n",
            "250 2.1.0 Ok\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn dot_stuffing_is_reversed() {
    let (_server, config) = config_with_token_endpoint().await;
    let mut handler = CapturingMailHandler::default();

    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut handler,
        [
            auth_line().as_str(),
            "MAIL FROM:<a@b.example>\r\n",
            "RCPT TO:<r@x.example>\r\n",
            "DATA\r\n",
            "Subject: domains\r\n",
            "\r\n",
            "..example.com is a domain\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "250 2.0.0 Ok: queued as graphapi\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());

    assert_eq!(handler.mails.len(), 1);
    let body = &handler.mails[0].body;
    assert!(
        body.contains("\r\n.example.com is a domain"),
        "unstuffing failed: {body:?}"
    );
    assert!(!body.contains(".."), "{body:?}");
}

/// a client-stuffed buffer and its plain original normalize identically
#[tokio::test]
async fn dot_stuffing_round_trip_is_idempotent() {
    let (_server, config) = config_with_token_endpoint().await;
    let config = std::sync::Arc::new(config);

    let plain_lines = ["Subject: t", "", ".example.com is a domain", "no dots here"];

    // what a conforming client sends for `plain_lines`
    let stuffed = plain_lines
        .iter()
        .map(|line| {
            if line.starts_with('.') {
                format!(".{line}\r\n")
            } else {
                format!("{line}\r\n")
            }
        })
        .collect::<String>();

    let mut handler = CapturingMailHandler::default();
    let input = [
        auth_line().as_str(),
        "MAIL FROM:<a@b.example>\r\n",
        "RCPT TO:<r@x.example>\r\n",
        "DATA\r\n",
        stuffed.as_str(),
        ".\r\n",
        "QUIT\r\n",
    ]
    .concat();

    test_receiver(
        config,
        &mut handler,
        input.as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "250 2.0.0 Ok: queued as graphapi\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .unwrap();

    let expected = plain_lines
        .iter()
        .map(|line| format!("{line}\r\n"))
        .collect::<String>();
    assert_eq!(handler.mails[0].body, expected);
}

#[tokio::test]
async fn the_five_hundred_first_recipient_is_refused() {
    let (_server, config) = config_with_token_endpoint().await;

    let mut input = String::new();
    input.push_str(&auth_line());
    input.push_str("MAIL FROM:<a@b.example>\r\n");
    for i in 0..501 {
        input.push_str(&format!("RCPT TO:<rcpt{i}@x.example>\r\n"));
    }
    input.push_str("QUIT\r\n");

    let mut expected = String::new();
    expected.push_str("220 SMTP Relay Ready\r\n");
    expected.push_str("235 2.7.0 Authentication successful\r\n");
    expected.push_str("250 2.1.0 Ok\r\n");
    for _ in 0..500 {
        expected.push_str("250 2.1.5 Ok\r\n");
    }
    expected.push_str("452 4.5.3 Too many recipients\r\n");
    expected.push_str("221 2.0.0 Bye\r\n");

    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut DefaultMailHandler,
        input.as_bytes(),
        expected.as_bytes(),
    )
    .await
    .is_ok());
}

/// whatever bytes land in DATA, the session answers with a defined code
/// instead of hanging or dying
#[tokio::test]
async fn garbage_data_gets_a_parse_failure() {
    let (_server, config) = config_with_token_endpoint().await;
    let config = std::sync::Arc::new(config);
    let mut handler = crate::delivery::GraphMailHandler {
        config: config.clone(),
        cache: std::sync::Arc::new(crate::auth::TokenCache::new(config.clone()).unwrap()),
        sender: std::sync::Arc::new(crate::delivery::GraphSender::new(config.clone()).unwrap()),
    };

    assert!(test_receiver(
        config,
        &mut handler,
        [
            auth_line().as_str(),
            "MAIL FROM:<a@b.example>\r\n",
            "RCPT TO:<r@x.example>\r\n",
            "DATA\r\n",
            "\x01\x02 binary garbage without any header\r\n",
            "\x03\x04 more of it\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "550 5.6.0 Message parsing failed\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn rset_clears_the_envelope() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut DefaultMailHandler,
        [
            auth_line().as_str(),
            "MAIL FROM:<a@b.example>\r\n",
            "RCPT TO:<r@x.example>\r\n",
            "RSET\r\n",
            // the envelope is gone, DATA is out of sequence again
            "DATA\r\n",
            "MAIL FROM:<c@d.example>\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
            "250 2.0.0 Ok\r\n",
            "502 5.5.2 Command not implemented\r\n",
            "250 2.1.0 Ok\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn two_messages_in_one_session() {
    let (_server, config) = config_with_token_endpoint().await;
    let mut handler = CapturingMailHandler::default();

    test_receiver(
        std::sync::Arc::new(config),
        &mut handler,
        [
            auth_line().as_str(),
            "MAIL FROM:<first@b.example>\r\n",
            "RCPT TO:<r@x.example>\r\n",
            "DATA\r\n",
            "Subject: one\r\n\r\nfirst\r\n.\r\n",
            "MAIL FROM:<second@b.example>\r\n",
            "RCPT TO:<r2@x.example>\r\n",
            "DATA\r\n",
            "Subject: two\r\n\r\nsecond\r\n.\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "250 2.0.0 Ok: queued as graphapi\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
            "354 End data with <CR><LF>.<CR><LF>\r\n",
            "250 2.0.0 Ok: queued as graphapi\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .unwrap();

    assert_eq!(handler.mails.len(), 2);
    assert_eq!(
        handler.mails[0].envelop.mail_from.as_ref().unwrap().full(),
        "first@b.example"
    );
    assert_eq!(
        handler.mails[1].envelop.mail_from.as_ref().unwrap().full(),
        "second@b.example"
    );
    assert_ne!(handler.mails[0].message_id, handler.mails[1].message_id);
}
