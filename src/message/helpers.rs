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

/// Decoder for base64 produced by mail clients: padded and unpadded forms
/// are both in the wild, so padding is not enforced.
pub(crate) const PERMISSIVE_BASE64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        base64::engine::general_purpose::GeneralPurposeConfig::new()
            .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent),
    );

#[inline]
pub(super) fn has_fws(input: &str) -> bool {
    input.starts_with(|c| c == ' ' || c == '\t')
}

/// read the current line or folded content and extract a header if there is
/// any. the name is lowercased, folded continuations are joined with a
/// single space and the buffer is advanced past them.
pub(super) fn read_header(content: &mut &[&str]) -> Option<(String, String)> {
    let mut split = content[0].splitn(2, ':');

    match (split.next(), split.next()) {
        (Some(name), Some(field)) if !name.is_empty() => {
            let mut value = field.trim().to_string();
            while content.len() > 1 && has_fws(content[1]) {
                value.push(' ');
                value.push_str(content[1].trim());
                *content = &content[1..];
            }
            Some((name.trim().to_ascii_lowercase(), value))
        }
        _ => None,
    }
}

pub(super) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(header, _)| header == name)
        .map(|(_, value)| value.as_str())
}

/// split a structured header value (Content-Type, Content-Disposition) into
/// its lowercased leading token and its parameters. quotes around parameter
/// values are dropped, bad parameters are omitted.
pub(super) fn parse_mime_value(
    raw: &str,
) -> (String, std::collections::HashMap<String, String>) {
    let mut args = raw.split(';');
    let value = args.next().unwrap_or("").trim().to_ascii_lowercase();

    let params = args
        .filter_map(|arg| {
            let mut split = arg.splitn(2, '=');
            match (split.next(), split.next()) {
                (Some(key), Some(value)) => Some((
                    key.trim().to_ascii_lowercase(),
                    value.trim().trim_matches('"').to_string(),
                )),
                _ => None,
            }
        })
        .collect();

    (value, params)
}

/// reverse a Content-Transfer-Encoding. anything that is not base64 or
/// quoted-printable (7bit, 8bit, binary, empty) passes through unchanged.
pub(super) fn decode_transfer(encoding: &str, content: &str) -> anyhow::Result<Vec<u8>> {
    match encoding {
        "base64" => {
            let compact = content
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect::<String>();
            PERMISSIVE_BASE64
                .decode(compact)
                .map_err(|e| anyhow::anyhow!("invalid base64 content: {e}"))
        }
        "quoted-printable" => decode_quoted_printable(content.as_bytes()),
        _ => Ok(content.as_bytes().to_vec()),
    }
}

fn decode_quoted_printable(input: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut output = Vec::with_capacity(input.len());
    let mut bytes = input.iter().copied().peekable();

    while let Some(byte) = bytes.next() {
        if byte != b'=' {
            output.push(byte);
            continue;
        }
        match (bytes.next(), bytes.peek().copied()) {
            // soft line break, CRLF or bare LF
            (Some(b'\r'), Some(b'\n')) => {
                bytes.next();
            }
            (Some(b'\n'), _) => {}
            (Some(high), Some(low)) => {
                let decoded = u8::from_str_radix(
                    std::str::from_utf8(&[high, low]).map_err(|_| {
                        anyhow::anyhow!("invalid quoted-printable escape")
                    })?,
                    16,
                )
                .map_err(|_| anyhow::anyhow!("invalid quoted-printable escape"))?;
                bytes.next();
                output.push(decoded);
            }
            _ => anyhow::bail!("truncated quoted-printable escape"),
        }
    }

    Ok(output)
}

/// Decode the RFC 2047 encoded words of a header value.
///
/// Any malformed word or unsupported charset fails the whole decode so the
/// caller can fall back to the raw value. Whitespace between two adjacent
/// encoded words is transparent per the RFC.
pub(super) fn decode_rfc2047(raw: &str) -> anyhow::Result<String> {
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut previous_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (decoded, consumed) = decode_encoded_word(&rest[start..])?;
        let gap = &rest[..start];
        if !(previous_was_encoded && gap.chars().all(char::is_whitespace)) {
            output.push_str(gap);
        }
        output.push_str(&decoded);
        rest = &rest[start + consumed..];
        previous_was_encoded = true;
    }
    output.push_str(rest);

    Ok(output)
}

/// decode one `=?charset?enc?payload?=` token, returning the text and the
/// byte length of the token.
fn decode_encoded_word(word: &str) -> anyhow::Result<(String, usize)> {
    let inner = &word[2..];
    let charset_end = inner
        .find('?')
        .ok_or_else(|| anyhow::anyhow!("unterminated encoded word"))?;
    let charset = inner[..charset_end].to_ascii_lowercase();

    let mut after_charset = inner[charset_end + 1..].chars();
    let encoding = after_charset
        .next()
        .ok_or_else(|| anyhow::anyhow!("unterminated encoded word"))?;
    if !encoding.is_ascii() || after_charset.next() != Some('?') {
        anyhow::bail!("malformed encoded word");
    }

    let payload_start = charset_end + 3;
    let payload_end = inner[payload_start..]
        .find("?=")
        .ok_or_else(|| anyhow::anyhow!("unterminated encoded word"))?;
    let payload = &inner[payload_start..payload_start + payload_end];

    let bytes = match encoding {
        'B' | 'b' => PERMISSIVE_BASE64
            .decode(payload)
            .map_err(|e| anyhow::anyhow!("invalid base64 encoded word: {e}"))?,
        'Q' | 'q' => decode_quoted_printable(
            payload.replace('_', " ").as_bytes(),
        )?,
        _ => anyhow::bail!("unknown encoded word encoding '{encoding}'"),
    };

    let text = match charset.as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8(bytes)
            .map_err(|_| anyhow::anyhow!("encoded word is not valid {charset}"))?,
        "iso-8859-1" | "latin1" => bytes.into_iter().map(char::from).collect(),
        other => anyhow::bail!("unsupported charset '{other}'"),
    };

    // "=?" + charset + "?" + enc + "?" + payload + "?="
    Ok((text, 2 + payload_start + payload_end + 2))
}
