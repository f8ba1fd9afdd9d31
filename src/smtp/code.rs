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

/// Replies the relay can produce.
///
/// The message-too-large reply carries the configured limit and is
/// formatted by the transaction instead of being listed here.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum SMTPReplyCode {
    /// service ready
    Greetings,
    /// ehlo/helo reply, advertises the AUTH mechanisms
    Code250Esmtp,
    /// authentication succeeded, session is authenticated
    AuthSucceeded,
    /// base64 "Username:" prompt of AUTH LOGIN
    AuthUsernameChallenge,
    /// base64 "Password:" prompt of AUTH LOGIN
    AuthPasswordChallenge,
    /// empty challenge of AUTH PLAIN
    AuthPlainChallenge,
    /// service closing transmission channel
    Code221,
    /// requested action okay (RSET / NOOP)
    Code250,
    /// sender accepted
    Code250SenderOk,
    /// recipient accepted
    Code250RecipientOk,
    /// message accepted and handed to the Graph API
    Code250Queued,
    /// start mail input
    Code354,
    /// per-command read deadline reached
    Code421Timeout,
    /// unexpected channel failure
    Code421Unavailable,
    /// connection dropped while reading an AUTH response
    Code421AuthError,
    /// listener is at max_connections
    Code421TooManyConnections,
    /// token endpoint unreachable while the session holds a message
    Code451TokenFailure,
    /// recipient ceiling reached
    Code452TooManyRecipients,
    /// command line longer than 512 bytes
    Code500LineTooLong,
    /// sender address failed validation
    Code501InvalidSender,
    /// AUTH payload is not decodable base64
    Code501InvalidBase64,
    /// client aborted the AUTH exchange
    Code501AuthCanceled,
    /// command unknown or not acceptable in the current state
    Code502Unimplemented,
    /// DATA issued before any RCPT TO
    Code503NoRecipients,
    /// command requires a completed AUTH
    Code530AuthRequired,
    /// client supplied no credentials and no fallback is configured
    Code535CredentialsInvalid,
    /// the identity provider rejected the credentials
    Code535AuthFailed,
    /// the message body could not be decomposed
    Code550ParsingFailed,
    /// the Graph API refused the message
    Code550DeliveryFailed,
    /// recipient address failed validation
    Code553InvalidRecipient,
}

impl SMTPReplyCode {
    /// wire representation, CRLF terminated
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Greetings => "220 SMTP Relay Ready\r\n",
            Self::Code250Esmtp => "250-smtpRelay\r\n250 AUTH LOGIN PLAIN\r\n",
            Self::AuthSucceeded => "235 2.7.0 Authentication successful\r\n",
            Self::AuthUsernameChallenge => "334 VXNlcm5hbWU6\r\n",
            Self::AuthPasswordChallenge => "334 UGFzc3dvcmQ6\r\n",
            Self::AuthPlainChallenge => "334 \r\n",
            Self::Code221 => "221 2.0.0 Bye\r\n",
            Self::Code250 => "250 2.0.0 Ok\r\n",
            Self::Code250SenderOk => "250 2.1.0 Ok\r\n",
            Self::Code250RecipientOk => "250 2.1.5 Ok\r\n",
            Self::Code250Queued => "250 2.0.0 Ok: queued as graphapi\r\n",
            Self::Code354 => "354 End data with <CR><LF>.<CR><LF>\r\n",
            Self::Code421Timeout => "421 4.4.2 Connection timeout\r\n",
            Self::Code421Unavailable => "421 4.7.0 Service not available\r\n",
            Self::Code421AuthError => "421 4.7.0 Connection error during authentication\r\n",
            Self::Code421TooManyConnections => {
                "421 4.7.0 Too many connections, try again later\r\n"
            }
            Self::Code451TokenFailure => "451 4.7.0 Temporary authentication failure\r\n",
            Self::Code452TooManyRecipients => "452 4.5.3 Too many recipients\r\n",
            Self::Code500LineTooLong => "500 5.5.1 Line too long\r\n",
            Self::Code501InvalidSender => "501 5.1.7 Invalid sender address\r\n",
            Self::Code501InvalidBase64 => "501 5.5.4 Invalid base64 encoding\r\n",
            Self::Code501AuthCanceled => "501 5.7.0 Authentication canceled\r\n",
            Self::Code502Unimplemented => "502 5.5.2 Command not implemented\r\n",
            Self::Code503NoRecipients => "503 5.5.1 No recipients specified\r\n",
            Self::Code530AuthRequired => "530 5.7.0 Authentication required\r\n",
            Self::Code535CredentialsInvalid => {
                "535 5.7.8 Authentication credentials invalid\r\n"
            }
            Self::Code535AuthFailed => "535 5.7.8 Authentication failed\r\n",
            Self::Code550ParsingFailed => "550 5.6.0 Message parsing failed\r\n",
            Self::Code550DeliveryFailed => "550 5.7.0 Delivery failed\r\n",
            Self::Code553InvalidRecipient => "553 5.1.3 Invalid recipient address\r\n",
        }
    }

    pub(crate) const fn is_error(self) -> bool {
        !matches!(
            self,
            Self::Greetings
                | Self::Code250Esmtp
                | Self::AuthSucceeded
                | Self::AuthUsernameChallenge
                | Self::AuthPasswordChallenge
                | Self::AuthPlainChallenge
                | Self::Code221
                | Self::Code250
                | Self::Code250SenderOk
                | Self::Code250RecipientOk
                | Self::Code250Queued
                | Self::Code354
        )
    }
}

impl std::fmt::Display for SMTPReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str().trim_end())
    }
}

/// the one reply that embeds a configured value.
#[must_use]
pub fn message_too_large(max_message_size: usize) -> String {
    format!("552 5.3.4 Message too large (max {max_message_size} bytes)\r\n")
}
