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

/// Where a session stands in the command sequence.
///
/// Authentication is not a state of its own: the exchange is driven by the
/// connection loop and the outcome is recorded on the connection, so a
/// session restarts in [`StateSMTP::Helo`] once authenticated.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum StateSMTP {
    /// greeting sent, nothing received yet
    Connect,
    /// EHLO/HELO received, or AUTH completed
    Helo,
    /// a valid MAIL FROM is set
    MailFrom,
    /// at least one valid RCPT TO is set
    RcptTo,
    /// accumulating message content
    Data,
    /// QUIT received or channel no longer usable
    Stop,
}

impl std::fmt::Display for StateSMTP {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StateSMTP::Connect => "Connect",
            StateSMTP::Helo => "Helo",
            StateSMTP::MailFrom => "MailFrom",
            StateSMTP::RcptTo => "RcptTo",
            StateSMTP::Data => "Data",
            StateSMTP::Stop => "Stop",
        })
    }
}
