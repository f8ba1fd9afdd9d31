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

#[derive(Debug)]
pub enum ParserError {
    /// a line of the top-level header block is neither a header nor a fold
    InvalidHeader(String),
    /// end of input reached before the blank line closing the headers
    UnterminatedHeaders,
    /// the transfer encoding of a non-multipart body could not be reversed
    BodyDecoding(String),
    /// strict mode only: an attachment could not be transfer-decoded
    AttachmentDecoding { filename: String, reason: String },
}

impl std::error::Error for ParserError {}

pub type ParserResult<T> = Result<T, ParserError>;

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParserError::InvalidHeader(line) => {
                write!(f, "malformed header line: '{line}'")
            }
            ParserError::UnterminatedHeaders => {
                write!(f, "message ended inside the header block")
            }
            ParserError::BodyDecoding(reason) => {
                write!(f, "decoding message body failed: {reason}")
            }
            ParserError::AttachmentDecoding { filename, reason } => {
                write!(f, "decoding attachment '{filename}' failed: {reason}")
            }
        }
    }
}
