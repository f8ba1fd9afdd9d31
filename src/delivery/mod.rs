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
pub mod retry;

use secrecy::ExposeSecret;

use crate::{
    config::Config,
    log_channels,
    message::{Attachment, MessageParser, ParsedMail},
    receiver::{Connection, OnMail},
    smtp::{code::SMTPReplyCode, envelop::MailContext},
};

/// deadline of one submission attempt
const SUBMIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// final non-2xx answer; the body went to the logs, not in here
    #[error("the submission endpoint answered with status {status}")]
    Status { status: reqwest::StatusCode },
    #[error("the submission request could not be delivered")]
    Transport(#[from] reqwest::Error),
    #[error("the submission payload could not be serialized")]
    Serialize(#[from] serde_json::Error),
    #[error("the submission request body cannot be replayed")]
    NotReplayable,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest {
    message: OutboundMessage,
    save_to_sent_items: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundMessage {
    subject: String,
    body: MessageBody,
    /// may be empty, the service accepts it
    to_recipients: Vec<Recipient>,
    from: Recipient,
    /// always present, possibly empty
    attachments: Vec<FileAttachment>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    content_type: &'static str,
    content: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, serde::Serialize)]
struct EmailAddress {
    address: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct FileAttachment {
    #[serde(rename = "@odata.type")]
    odata_type: &'static str,
    name: String,
    content_type: String,
    content_bytes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_inline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<String>,
}

impl From<&Attachment> for FileAttachment {
    fn from(attachment: &Attachment) -> Self {
        Self {
            odata_type: "#microsoft.graph.fileAttachment",
            name: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            content_bytes: attachment.content.clone(),
            is_inline: attachment.is_inline.then_some(true),
            content_id: attachment.content_id.clone(),
        }
    }
}

/// Submits parsed messages through the Graph `sendMail` endpoint.
pub struct GraphSender {
    config: std::sync::Arc<Config>,
    client: reqwest::Client,
    policy: retry::RetryPolicy,
}

impl GraphSender {
    pub fn new(config: std::sync::Arc<Config>) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(SUBMIT_TIMEOUT)
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(std::time::Duration::from_secs(90))
                .build()?,
            policy: retry::RetryPolicy::from_config(&config),
            config,
        })
    }

    /// submit one message as `sender`, authenticated by `token`.
    pub async fn send(
        &self,
        token: &str,
        sender: &str,
        mail: &MailContext,
        parsed: &ParsedMail,
    ) -> Result<(), SendError> {
        let url = format!(
            "{}/users/{}/sendMail",
            self.config.graph_endpoint.trim_end_matches('/'),
            urlencoding::encode(sender)
        );

        let mail_from = mail
            .envelop
            .mail_from
            .as_ref()
            .map_or(sender, |from| from.full());

        let payload = SendMailRequest {
            message: OutboundMessage {
                subject: parsed.subject.clone(),
                body: MessageBody {
                    content_type: if parsed.is_html { "html" } else { "text" },
                    content: parsed.body.clone(),
                },
                to_recipients: mail
                    .envelop
                    .rcpt
                    .iter()
                    .map(|rcpt| Recipient {
                        email_address: EmailAddress {
                            address: rcpt.full().to_string(),
                        },
                    })
                    .collect(),
                from: Recipient {
                    email_address: EmailAddress {
                        address: mail_from.to_string(),
                    },
                },
                attachments: parsed.attachments.iter().map(FileAttachment::from).collect(),
            },
            save_to_sent_items: self.config.save_to_sent,
        };

        let request = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&payload)?)
            .build()?;

        let response = retry::send_with_retry(&self.client, request, &self.policy).await?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                target: log_channels::DELIVERY,
                "graph api refused message '{}': status={} body={}",
                mail.message_id,
                status,
                body
            );
            return Err(SendError::Status { status });
        }

        log::info!(
            target: log_channels::DELIVERY,
            "message '{}' submitted, from='{}' recipients={} attachments={}",
            mail.message_id,
            mail_from,
            mail.envelop.rcpt.len(),
            parsed.attachments.len()
        );
        Ok(())
    }
}

/// The production mail handler: decompose, fetch a token, submit.
pub struct GraphMailHandler {
    pub config: std::sync::Arc<Config>,
    pub cache: std::sync::Arc<crate::auth::TokenCache>,
    pub sender: std::sync::Arc<GraphSender>,
}

#[async_trait::async_trait]
impl OnMail for GraphMailHandler {
    async fn on_mail<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin>(
        &mut self,
        conn: &mut Connection<S>,
        mail: Box<MailContext>,
    ) -> anyhow::Result<()> {
        let parsed = match MessageParser::new(self.config.strict_attachments).parse(&mail.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::error!(
                    target: log_channels::DELIVERY,
                    "message '{}' could not be decomposed: {}",
                    mail.message_id,
                    e
                );
                return conn.send_code(SMTPReplyCode::Code550ParsingFailed).await;
            }
        };

        let (login, secret) = match &conn.credentials {
            Some(credentials) => (credentials.login.clone(), credentials.secret.clone()),
            // anonymous submission runs under the fallback identity
            None => match (&self.config.fallback_user, &self.config.fallback_pass) {
                (Some(user), Some(pass)) => {
                    log::warn!(
                        target: log_channels::DELIVERY,
                        "anonymous submission from {} mapped to the fallback account",
                        conn.client_addr
                    );
                    (user.clone(), pass.expose_secret().clone())
                }
                _ => {
                    log::error!(
                        target: log_channels::DELIVERY,
                        "no credentials available for message '{}'",
                        mail.message_id
                    );
                    return conn.send_code(SMTPReplyCode::Code451TokenFailure).await;
                }
            },
        };

        let token = match self.cache.get(&login, &secret).await {
            Ok(token) => token,
            Err(e) => {
                log::error!(
                    target: log_channels::DELIVERY,
                    "token acquisition failed for '{}': {}",
                    login,
                    e
                );
                return conn.send_code(SMTPReplyCode::Code451TokenFailure).await;
            }
        };

        match self.sender.send(&token, &login, &mail, &parsed).await {
            Ok(()) => conn.send_code(SMTPReplyCode::Code250Queued).await,
            Err(e) => {
                log::error!(
                    target: log_channels::DELIVERY,
                    "delivery of message '{}' failed: {}",
                    mail.message_id,
                    e
                );
                conn.send_code(SMTPReplyCode::Code550DeliveryFailed).await
            }
        }
    }
}
