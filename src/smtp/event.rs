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
use super::{code::SMTPReplyCode, mechanism::Mechanism};

/// Maximum accepted command line length, RFC 5321 §4.5.3.1.6.
const COMMAND_LINE_MAX: usize = 512;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    HeloCmd(String),
    EhloCmd(String),
    /// mechanism and, for the inline form, the base64 initial response
    AuthCmd(Mechanism, Option<String>),
    /// raw address text, validated by the transaction
    MailCmd(String),
    RcptCmd(String),
    DataCmd,
    DataLine(String),
    DataEnd,
    RsetCmd,
    NoopCmd,
    QuitCmd,
}

impl Event {
    /// Create a command event from a received line OR return the reply code
    /// for the client.
    ///
    /// Parsing mirrors what legacy submission agents actually send rather
    /// than the full RFC 5321 grammar: verbs are case-insensitive, trailing
    /// arguments of NOOP/RSET/QUIT/DATA are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use grelay::smtp::{code::SMTPReplyCode, event::Event, mechanism::Mechanism};
    ///
    /// assert_eq!(Event::parse_cmd("HELO client"), Ok(Event::HeloCmd("client".to_string())));
    /// assert_eq!(Event::parse_cmd("ehlo x"), Ok(Event::EhloCmd("x".to_string())));
    /// assert_eq!(
    ///     Event::parse_cmd("MAIL FROM:<a@b.c> SIZE=12345"),
    ///     Ok(Event::MailCmd("a@b.c".to_string()))
    /// );
    /// assert_eq!(
    ///     Event::parse_cmd("rcpt to: r@x.y"),
    ///     Ok(Event::RcptCmd("r@x.y".to_string()))
    /// );
    /// assert_eq!(
    ///     Event::parse_cmd("AUTH LOGIN"),
    ///     Ok(Event::AuthCmd(Mechanism::Login, None))
    /// );
    /// assert_eq!(
    ///     Event::parse_cmd("AUTH PLAIN dGVzdA=="),
    ///     Ok(Event::AuthCmd(Mechanism::Plain, Some("dGVzdA==".to_string())))
    /// );
    /// assert_eq!(Event::parse_cmd("DATA"), Ok(Event::DataCmd));
    /// assert_eq!(Event::parse_cmd("noop anything"), Ok(Event::NoopCmd));
    /// assert_eq!(Event::parse_cmd("QUIT"), Ok(Event::QuitCmd));
    /// assert_eq!(
    ///     Event::parse_cmd("STARTTLS"),
    ///     Err(SMTPReplyCode::Code502Unimplemented)
    /// );
    /// assert_eq!(
    ///     Event::parse_cmd(&"X".repeat(513)),
    ///     Err(SMTPReplyCode::Code500LineTooLong)
    /// );
    /// ```
    pub fn parse_cmd(input: &str) -> Result<Event, SMTPReplyCode> {
        if input.len() > COMMAND_LINE_MAX {
            return Err(SMTPReplyCode::Code500LineTooLong);
        }

        let upper = input.to_ascii_uppercase();
        let mut words = input.split_whitespace();
        let verb = match words.next() {
            Some(verb) => verb.to_ascii_uppercase(),
            None => return Err(SMTPReplyCode::Code502Unimplemented),
        };

        match verb.as_str() {
            "HELO" => Ok(Event::HeloCmd(words.next().unwrap_or("").to_string())),
            "EHLO" => Ok(Event::EhloCmd(words.next().unwrap_or("").to_string())),
            "AUTH" => Self::parse_arg_auth(&words.collect::<Vec<_>>()),
            "MAIL" if upper.starts_with("MAIL FROM:") => {
                Ok(Event::MailCmd(extract_address(input)))
            }
            "RCPT" if upper.starts_with("RCPT TO:") => Ok(Event::RcptCmd(extract_address(input))),
            "DATA" => Ok(Event::DataCmd),
            "RSET" => Ok(Event::RsetCmd),
            "NOOP" => Ok(Event::NoopCmd),
            "QUIT" => Ok(Event::QuitCmd),
            _ => Err(SMTPReplyCode::Code502Unimplemented),
        }
    }

    fn parse_arg_auth(args: &[&str]) -> Result<Event, SMTPReplyCode> {
        match args {
            [mechanism] => match mechanism.to_ascii_uppercase().parse::<Mechanism>() {
                Ok(mechanism) => Ok(Event::AuthCmd(mechanism, None)),
                Err(_) => Err(SMTPReplyCode::Code502Unimplemented),
            },
            [mechanism, initial_response] => {
                match mechanism.to_ascii_uppercase().parse::<Mechanism>() {
                    Ok(mechanism) => Ok(Event::AuthCmd(
                        mechanism,
                        Some((*initial_response).to_string()),
                    )),
                    Err(_) => Err(SMTPReplyCode::Code502Unimplemented),
                }
            }
            _ => Err(SMTPReplyCode::Code502Unimplemented),
        }
    }

    /// Create a content event from a line received after a `354` reply.
    ///
    /// Dot-stuffing (RFC 5321 §4.5.2) is reversed here, before the line
    /// reaches size accounting or the message parser.
    ///
    /// # Examples
    ///
    /// ```
    /// use grelay::smtp::event::Event;
    ///
    /// assert_eq!(Event::parse_data("."), Event::DataEnd);
    /// assert_eq!(Event::parse_data(""), Event::DataLine("".to_string()));
    /// assert_eq!(
    ///     Event::parse_data("..example.com is a domain"),
    ///     Event::DataLine(".example.com is a domain".to_string())
    /// );
    /// assert_eq!(
    ///     Event::parse_data("plain content"),
    ///     Event::DataLine("plain content".to_string())
    /// );
    /// ```
    #[must_use]
    pub fn parse_data(input: &str) -> Event {
        match input {
            "." => Event::DataEnd,
            stuffed if stuffed.starts_with('.') => Event::DataLine(stuffed[1..].to_string()),
            _ => Event::DataLine(input.to_string()),
        }
    }
}

/// Extract the address part of a MAIL FROM / RCPT TO line.
///
/// The text between `<` and `>` wins; without brackets, everything after the
/// first `:` is taken, trimmed, and cut at the first whitespace so trailing
/// ESMTP parameters (`SIZE=...`) are dropped.
///
/// ```
/// use grelay::smtp::event::extract_address;
///
/// assert_eq!(extract_address("MAIL FROM:<a@b.c>"), "a@b.c");
/// assert_eq!(extract_address("MAIL FROM: a@b.c SIZE=204800"), "a@b.c");
/// assert_eq!(extract_address("RCPT TO:"), "");
/// assert_eq!(extract_address("no separator"), "");
/// ```
#[must_use]
pub fn extract_address(line: &str) -> String {
    if let (Some(start), Some(end)) = (line.find('<'), line.find('>')) {
        if end > start {
            return line[start + 1..end].to_string();
        }
    }
    match line.split_once(':') {
        Some((_, forward_path)) => forward_path
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string(),
        None => String::new(),
    }
}
