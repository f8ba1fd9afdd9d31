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

/// A validated mailbox address.
///
/// Validation is deliberately loose compared to the full RFC 5321 grammar;
/// the Graph API is the authority on deliverability. Accepted addresses are
/// non-empty, at most 254 bytes, contain exactly one `@`, a local part of
/// 1 to 64 bytes and a domain of 1 to 253 bytes holding at least one dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    full: String,
}

impl Address {
    /// the full mailbox string
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// the part after the `@`
    #[must_use]
    pub fn domain(&self) -> &str {
        self.full
            .split_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("")
    }
}

impl TryFrom<String> for Address {
    type Error = anyhow::Error;

    fn try_from(addr: String) -> Result<Self, Self::Error> {
        if addr.is_empty() || addr.len() > 254 {
            anyhow::bail!("'{}' is empty or exceeds 254 characters", addr);
        }
        let mut parts = addr.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None)
                if !local.is_empty()
                    && local.len() <= 64
                    && !domain.is_empty()
                    && domain.len() <= 253
                    && domain.contains('.') =>
            {
                Ok(Self { full: addr })
            }
            _ => anyhow::bail!("'{}' is not a valid mailbox", addr),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}
