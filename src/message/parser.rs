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
use crate::log_channels;

use super::{
    error::{ParserError, ParserResult},
    helpers::{decode_rfc2047, decode_transfer, find_header, parse_mime_value, read_header},
    Attachment, ParsedMail,
};

use base64::Engine;

/// Hard cap on parts across the whole tree, so a malformed nesting cannot
/// keep the walk busy forever.
const MAX_PARTS: usize = 100;

const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// a boundary line delimits mime parts within a multipart section
enum BoundaryType {
    Delimiter,
    End,
}

/// Instance decomposing one received message.
///
/// The walk tolerates what legacy clients actually emit: a mime error in
/// the middle of the tree ends the walk with whatever was collected so far
/// instead of failing the message. Only the top-level header block (and,
/// with `strict_attachments`, an undecodable attachment) is fatal.
pub struct MessageParser {
    strict_attachments: bool,
    part_count: usize,
}

impl MessageParser {
    #[must_use]
    pub fn new(strict_attachments: bool) -> Self {
        Self {
            strict_attachments,
            part_count: 0,
        }
    }

    /// decompose a message into subject, body and attachments.
    pub fn parse(&mut self, message: &str) -> ParserResult<ParsedMail> {
        let lines = message.lines().collect::<Vec<_>>();
        let mut content = &lines[..];

        let headers = read_header_block(&mut content)?;

        let subject_raw = find_header(&headers, "subject").unwrap_or("").to_string();
        let subject = decode_rfc2047(&subject_raw).unwrap_or(subject_raw);

        let content_type = find_header(&headers, "content-type").unwrap_or("text/plain");
        let (media_type, parameters) = parse_mime_value(content_type);
        let transfer_encoding = find_header(&headers, "content-transfer-encoding")
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        let mut parsed = ParsedMail {
            subject,
            is_html: media_type.contains("html"),
            ..ParsedMail::default()
        };

        if media_type.starts_with("multipart/") {
            match parameters.get("boundary") {
                Some(boundary) => self.walk_multipart(&mut content, boundary, &mut parsed)?,
                None => log::warn!(
                    target: log_channels::RECEIVER,
                    "multipart message without boundary parameter, no parts extracted"
                ),
            }
        } else {
            let decoded = decode_transfer(&transfer_encoding, &content.join("\r\n"))
                .map_err(|e| ParserError::BodyDecoding(e.to_string()))?;
            parsed.body = String::from_utf8_lossy(&decoded).into_owned();
        }

        Ok(parsed)
    }

    /// walk the parts delimited by `boundary`, depth-first.
    ///
    /// returns `Ok` on every mime shape that is merely malformed; the
    /// collected output is whatever was readable up to that point.
    fn walk_multipart(
        &mut self,
        content: &mut &[&str],
        boundary: &str,
        out: &mut ParsedMail,
    ) -> ParserResult<()> {
        // preamble
        loop {
            if content.is_empty() {
                log::debug!(
                    target: log_channels::RECEIVER,
                    "no '{}' boundary found, nothing to extract",
                    boundary
                );
                return Ok(());
            }
            match boundary_type(content[0], boundary) {
                Some(BoundaryType::Delimiter) => {
                    *content = &content[1..];
                    break;
                }
                Some(BoundaryType::End) => {
                    *content = &content[1..];
                    return Ok(());
                }
                None => *content = &content[1..],
            }
        }

        loop {
            self.part_count += 1;
            if self.part_count > MAX_PARTS {
                log::warn!(
                    target: log_channels::RECEIVER,
                    "message exceeded the {} parts limit, walk stopped",
                    MAX_PARTS
                );
                return Ok(());
            }

            let headers = match read_header_block(content) {
                Ok(headers) => headers,
                Err(e) => {
                    log::warn!(
                        target: log_channels::RECEIVER,
                        "mime walk stopped on a malformed part: {}",
                        e
                    );
                    return Ok(());
                }
            };

            let mut body_lines = Vec::new();
            let mut terminator = None;
            while !content.is_empty() {
                match boundary_type(content[0], boundary) {
                    Some(t) => {
                        terminator = Some(t);
                        *content = &content[1..];
                        break;
                    }
                    None => {
                        body_lines.push(content[0]);
                        *content = &content[1..];
                    }
                }
            }

            self.process_part(&headers, &body_lines, out)?;

            match terminator {
                Some(BoundaryType::Delimiter) => continue,
                // end boundary, or EOF on a truncated message
                _ => return Ok(()),
            }
        }
    }

    fn process_part(
        &mut self,
        headers: &[(String, String)],
        body_lines: &[&str],
        out: &mut ParsedMail,
    ) -> ParserResult<()> {
        let content_type_raw = find_header(headers, "content-type").unwrap_or("");
        let (media_type, parameters) = parse_mime_value(content_type_raw);
        let transfer_encoding = find_header(headers, "content-transfer-encoding")
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if media_type.starts_with("multipart/") {
            return match parameters.get("boundary") {
                Some(inner_boundary) => {
                    let mut inner = body_lines;
                    self.walk_multipart(&mut inner, inner_boundary, out)
                }
                None => {
                    log::warn!(
                        target: log_channels::RECEIVER,
                        "nested multipart without boundary parameter, skipped"
                    );
                    Ok(())
                }
            };
        }

        let (disposition, disposition_params) =
            parse_mime_value(find_header(headers, "content-disposition").unwrap_or(""));
        let content_id = find_header(headers, "content-id").map(|id| {
            id.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        });
        let raw_content = body_lines.join("\r\n");

        if disposition.starts_with("attachment") {
            let filename = disposition_params
                .get("filename")
                .or_else(|| parameters.get("name"))
                .cloned()
                .unwrap_or_default();
            if let Some(content) =
                self.decode_attachment(&filename, &transfer_encoding, &raw_content)?
            {
                if filename.is_empty() || content.is_empty() {
                    log::warn!(
                        target: log_channels::RECEIVER,
                        "attachment without filename or content dropped (filename='{}')",
                        filename
                    );
                } else {
                    out.attachments.push(Attachment {
                        filename,
                        content_type: attachment_content_type(content_type_raw),
                        content: base64::engine::general_purpose::STANDARD.encode(content),
                        is_inline: false,
                        content_id: None,
                    });
                }
            }
        } else if disposition.starts_with("inline") && content_id.is_some() {
            let content_id = content_id.unwrap_or_default();
            let filename = disposition_params
                .get("filename")
                .or_else(|| parameters.get("name"))
                .cloned()
                .unwrap_or_else(|| content_id.clone());
            if let Some(content) =
                self.decode_attachment(&filename, &transfer_encoding, &raw_content)?
            {
                if content.is_empty() {
                    log::warn!(
                        target: log_channels::RECEIVER,
                        "inline part '{}' has no content, dropped",
                        content_id
                    );
                } else {
                    out.attachments.push(Attachment {
                        filename,
                        content_type: attachment_content_type(content_type_raw),
                        content: base64::engine::general_purpose::STANDARD.encode(content),
                        is_inline: true,
                        content_id: Some(content_id),
                    });
                }
            }
        } else {
            match decode_transfer(&transfer_encoding, &raw_content) {
                Ok(decoded) => {
                    if media_type.contains("html") {
                        out.is_html = true;
                        out.body = String::from_utf8_lossy(&decoded).into_owned();
                    } else if !out.is_html {
                        // within an alternative set, html already seen wins
                        out.body = String::from_utf8_lossy(&decoded).into_owned();
                    }
                }
                Err(e) => log::warn!(
                    target: log_channels::RECEIVER,
                    "body part could not be decoded, skipped: {}",
                    e
                ),
            }
        }

        Ok(())
    }

    /// `Ok(None)` is an attachment skipped under the lenient policy.
    fn decode_attachment(
        &self,
        filename: &str,
        transfer_encoding: &str,
        raw_content: &str,
    ) -> ParserResult<Option<Vec<u8>>> {
        match decode_transfer(transfer_encoding, raw_content) {
            Ok(content) => Ok(Some(content)),
            Err(e) if self.strict_attachments => Err(ParserError::AttachmentDecoding {
                filename: filename.to_string(),
                reason: e.to_string(),
            }),
            Err(e) => {
                log::warn!(
                    target: log_channels::RECEIVER,
                    "attachment '{}' could not be decoded, skipped: {}",
                    filename,
                    e
                );
                Ok(None)
            }
        }
    }
}

/// read headers until the separating blank line, which is consumed.
fn read_header_block(content: &mut &[&str]) -> ParserResult<Vec<(String, String)>> {
    let mut headers = Vec::with_capacity(10);

    // an empty message is a valid, headerless message
    if content.is_empty() {
        return Ok(headers);
    }

    while !content.is_empty() {
        if content[0].is_empty() {
            *content = &content[1..];
            return Ok(headers);
        }
        match read_header(content) {
            Some(header) => headers.push(header),
            None => return Err(ParserError::InvalidHeader(content[0].to_string())),
        }
        *content = &content[1..];
    }

    Err(ParserError::UnterminatedHeaders)
}

fn attachment_content_type(raw: &str) -> String {
    if raw.trim().is_empty() {
        DEFAULT_ATTACHMENT_TYPE.to_string()
    } else {
        raw.trim().to_string()
    }
}

fn boundary_type(line: &str, boundary: &str) -> Option<BoundaryType> {
    let line = line.trim_end();
    let rest = line.strip_prefix("--")?;
    if let Some(closed) = rest.strip_suffix("--") {
        if closed == boundary {
            return Some(BoundaryType::End);
        }
    }
    (rest == boundary).then_some(BoundaryType::Delimiter)
}
