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
use secrecy::SecretString;

use crate::config::Config;
use crate::receiver::test_helpers::{
    mount_token_endpoint, test_receiver, unreachable_config, DefaultMailHandler,
};

fn b64(input: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(input)
}

async fn config_with_token_endpoint() -> (wiremock::MockServer, std::sync::Arc<Config>) {
    let server = wiremock::MockServer::start().await;
    mount_token_endpoint(&server).await;
    let config = std::sync::Arc::new(Config::for_tests(&server.uri(), &server.uri()));
    (server, config)
}

#[tokio::test]
async fn auth_login_with_prompts() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            "EHLO client\r\n",
            "AUTH LOGIN\r\n",
            format!("{}\r\n", b64("user@contoso.com")).as_str(),
            format!("{}\r\n", b64("hunter2")).as_str(),
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "250-smtpRelay\r\n250 AUTH LOGIN PLAIN\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn auth_login_with_inline_username_skips_the_first_prompt() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            "AUTH LOGIN dXNlckBleC5jb20=\r\n",
            format!("{}\r\n", b64("pw")).as_str(),
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn auth_plain_inline() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            format!("AUTH PLAIN {}\r\n", b64("\0user@contoso.com\0hunter2")).as_str(),
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn auth_plain_with_challenge() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            "AUTH PLAIN\r\n",
            format!("{}\r\n", b64("\0user@contoso.com\0hunter2")).as_str(),
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "334 \r\n",
            "235 2.7.0 Authentication successful\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn invalid_base64_keeps_the_session_alive() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            "AUTH LOGIN\r\n",
            "!!! not base64 !!!\r\n",
            format!("AUTH PLAIN {}\r\n", b64("\0user@contoso.com\0pw")).as_str(),
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "501 5.5.4 Invalid base64 encoding\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn client_can_cancel_the_exchange() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        ["AUTH LOGIN\r\n", "*\r\n", "QUIT\r\n"].concat().as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "501 5.7.0 Authentication canceled\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn empty_credentials_without_fallback_close_the_session() {
    let (_server, config) = config_with_token_endpoint().await;

    // the trailing NOOP must never be answered
    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            "AUTH LOGIN\r\n",
            "\r\n", // empty username
            "\r\n", // empty password
            "NOOP\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "535 5.7.8 Authentication credentials invalid\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn empty_credentials_use_the_fallback_account() {
    let (server, config) = config_with_token_endpoint().await;
    let mut config = (*config).clone();
    config.fallback_user = Some("relay@contoso.com".to_string());
    config.fallback_pass = Some(SecretString::new("fallback-pw".to_string()));

    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut DefaultMailHandler,
        [
            "AUTH LOGIN\r\n",
            "\r\n",
            "\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());

    // the exchange ran under the fallback identity
    let requests = server.received_requests().await.unwrap();
    let form = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(form.contains("username=relay%40contoso.com"), "{form}");
}

#[tokio::test]
async fn rejected_credentials_close_the_session() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/contoso/oauth2/v2.0/token"))
        .respond_with(wiremock::ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "bad password",
        })))
        .mount(&server)
        .await;
    let config = std::sync::Arc::new(Config::for_tests(&server.uri(), &server.uri()));

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            format!("AUTH PLAIN {}\r\n", b64("\0user@contoso.com\0wrong")).as_str(),
            "NOOP\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "535 5.7.8 Authentication failed\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn a_second_auth_is_out_of_sequence() {
    let (_server, config) = config_with_token_endpoint().await;

    assert!(test_receiver(
        config,
        &mut DefaultMailHandler,
        [
            format!("AUTH PLAIN {}\r\n", b64("\0user@contoso.com\0pw")).as_str(),
            "AUTH LOGIN\r\n",
            "QUIT\r\n",
        ]
        .concat()
        .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "235 2.7.0 Authentication successful\r\n",
            "502 5.5.2 Command not implemented\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn anonymous_submission_needs_the_explicit_flag() {
    // flag off: MAIL without AUTH stays rejected even with fallbacks
    let mut config = unreachable_config();
    config.fallback_user = Some("relay@contoso.com".to_string());
    config.fallback_pass = Some(SecretString::new("pw".to_string()));

    assert!(test_receiver(
        std::sync::Arc::new(config.clone()),
        &mut DefaultMailHandler,
        ["EHLO x\r\n", "MAIL FROM:<a@b.c>\r\n", "QUIT\r\n"]
            .concat()
            .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "250-smtpRelay\r\n250 AUTH LOGIN PLAIN\r\n",
            "530 5.7.0 Authentication required\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());

    // flag on: the envelope is accepted without AUTH
    config.allow_anonymous = true;
    assert!(test_receiver(
        std::sync::Arc::new(config),
        &mut DefaultMailHandler,
        ["EHLO x\r\n", "MAIL FROM:<a@b.c>\r\n", "QUIT\r\n"]
            .concat()
            .as_bytes(),
        [
            "220 SMTP Relay Ready\r\n",
            "250-smtpRelay\r\n250 AUTH LOGIN PLAIN\r\n",
            "250 2.1.0 Ok\r\n",
            "221 2.0.0 Bye\r\n",
        ]
        .concat()
        .as_bytes(),
    )
    .await
    .is_ok());
}
