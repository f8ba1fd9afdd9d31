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
use super::address::Address;

/// the envelope built from HELO, MAIL FROM and RCPT TO
#[derive(Debug, Clone, Default)]
pub struct Envelop {
    pub helo: String,
    pub mail_from: Option<Address>,
    pub rcpt: Vec<Address>,
}

/// A completed transaction, handed over when the final `.` is received.
///
/// `body` is the dot-unstuffed message with CRLF line endings, ready for
/// the message parser.
#[derive(Debug)]
pub struct MailContext {
    pub client_addr: std::net::SocketAddr,
    pub envelop: Envelop,
    pub body: String,
    pub timestamp: std::time::SystemTime,
    /// format: {mail timestamp}{connection timestamp}{random}{process id}
    pub message_id: String,
}

impl MailContext {
    pub(crate) fn new(client_addr: std::net::SocketAddr) -> Self {
        Self {
            client_addr,
            envelop: Envelop::default(),
            body: String::new(),
            timestamp: std::time::SystemTime::now(),
            message_id: String::new(),
        }
    }

    pub(crate) fn generate_message_id(connection_timestamp: std::time::SystemTime) -> String {
        let now = std::time::SystemTime::now();
        format!(
            "{}{}{}{}",
            now.duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap_or(std::time::Duration::ZERO)
                .as_micros(),
            connection_timestamp
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap_or(std::time::Duration::ZERO)
                .as_millis(),
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(16)
                .collect::<String>(),
            std::process::id()
        )
    }
}
