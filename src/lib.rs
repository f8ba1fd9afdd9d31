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

//! grelay is a locally-hosted SMTP relay for legacy clients.
//!
//! It accepts plain-TCP submissions with `AUTH LOGIN` / `AUTH PLAIN`,
//! exchanges the client's password for an OAuth2 access token (ROPC grant)
//! and re-submits the message through the Microsoft Graph `sendMail`
//! endpoint.

/// token acquisition and caching
pub mod auth;
/// the rust representation of the configuration
pub mod config;
/// Graph API submission and its retry executor
pub mod delivery;
/// decomposition of the raw message into subject / body / attachments
pub mod message;
/// per-connection SMTP handling
pub mod receiver;
/// tcp listener and session supervision
pub mod server;
/// SMTP protocol types
pub mod smtp;

/// log targets of the relay's subsystems
pub mod log_channels {
    pub const AUTH: &str = "auth";
    pub const CONNECTION: &str = "connection";
    pub const DELIVERY: &str = "delivery";
    pub const RECEIVER: &str = "receiver";
    pub const SERVER: &str = "server";
}
