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
use super::connection::Connection;
use crate::{
    log_channels,
    smtp::{
        address::Address,
        code::{message_too_large, SMTPReplyCode},
        envelop::MailContext,
        event::Event,
        mechanism::Mechanism,
        state::StateSMTP,
    },
};

/// per-command read deadline, also applied to every DATA line
const COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// ceiling on RCPT TO entries per envelope
const RCPT_COUNT_MAX: usize = 500;

pub struct Transaction {
    state: StateSMTP,
    mail: MailContext,
    /// bytes accumulated by DATA, dot-unstuffed, CRLF included
    data_bytes: usize,
    /// the size ceiling was crossed, remaining input is drained
    data_overflow: bool,
}

#[allow(clippy::module_name_repetitions)]
pub enum TransactionResult {
    /// the session ended (QUIT or EOF)
    Nothing,
    /// a complete message is ready for submission
    Mail(Box<MailContext>),
    /// the client started an AUTH exchange
    Authentication(Mechanism, Option<String>),
}

// Generated from a string received
enum ProcessedEvent {
    Nothing,
    Reply(SMTPReplyCode),
    ReplyChangeState(StateSMTP, SMTPReplyCode),
    StartAuthentication(Mechanism, Option<String>),
    MessageTooLarge,
    TransactionCompleted(Box<MailContext>),
}

impl Transaction {
    fn parse_and_apply<S>(&mut self, conn: &Connection<S>, client_message: &str) -> ProcessedEvent
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        if self.state == StateSMTP::Data {
            return self.process_event(conn, Event::parse_data(client_message));
        }

        // AUTH lines may carry credentials, only the verb is traced
        if client_message.len() >= 4
            && client_message.as_bytes()[..4].eq_ignore_ascii_case(b"auth")
        {
            log::trace!(target: log_channels::RECEIVER, "buffer=\"AUTH ...\"");
        } else {
            log::trace!(target: log_channels::RECEIVER, "buffer=\"{}\"", client_message);
        }

        match Event::parse_cmd(client_message) {
            Ok(event) => self.process_event(conn, event),
            Err(reply_code) => ProcessedEvent::Reply(reply_code),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn process_event<S>(&mut self, conn: &Connection<S>, event: Event) -> ProcessedEvent
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        match (self.state, event) {
            (_, Event::NoopCmd) => ProcessedEvent::Reply(SMTPReplyCode::Code250),

            (_, Event::QuitCmd) => {
                ProcessedEvent::ReplyChangeState(StateSMTP::Stop, SMTPReplyCode::Code221)
            }

            (_, Event::RsetCmd) => {
                self.reset_envelop();
                ProcessedEvent::ReplyChangeState(StateSMTP::Helo, SMTPReplyCode::Code250)
            }

            (_, Event::HeloCmd(helo) | Event::EhloCmd(helo)) => {
                self.set_helo(helo);
                ProcessedEvent::ReplyChangeState(StateSMTP::Helo, SMTPReplyCode::Code250Esmtp)
            }

            (StateSMTP::Connect | StateSMTP::Helo, Event::AuthCmd(mechanism, initial_response))
                if !conn.is_authenticated =>
            {
                ProcessedEvent::StartAuthentication(mechanism, initial_response)
            }

            // a second AUTH on an authenticated session is out of sequence
            (_, Event::AuthCmd(..)) => {
                ProcessedEvent::Reply(SMTPReplyCode::Code502Unimplemented)
            }

            (_, Event::MailCmd(..) | Event::RcptCmd(..) | Event::DataCmd)
                if !conn.is_authenticated && !anonymous_allowed(conn) =>
            {
                ProcessedEvent::Reply(SMTPReplyCode::Code530AuthRequired)
            }

            (StateSMTP::Helo, Event::MailCmd(mail_from)) => {
                match Address::try_from(mail_from) {
                    Ok(mail_from) => {
                        self.set_mail_from(mail_from, conn);
                        ProcessedEvent::ReplyChangeState(
                            StateSMTP::MailFrom,
                            SMTPReplyCode::Code250SenderOk,
                        )
                    }
                    Err(_) => ProcessedEvent::Reply(SMTPReplyCode::Code501InvalidSender),
                }
            }

            (StateSMTP::MailFrom | StateSMTP::RcptTo, Event::RcptCmd(rcpt_to)) => {
                match Address::try_from(rcpt_to) {
                    Ok(rcpt_to) if self.mail.envelop.rcpt.len() >= RCPT_COUNT_MAX => {
                        log::warn!(
                            target: log_channels::RECEIVER,
                            "client {} exceeded {} recipients, '{}' refused",
                            conn.client_addr,
                            RCPT_COUNT_MAX,
                            rcpt_to
                        );
                        ProcessedEvent::Reply(SMTPReplyCode::Code452TooManyRecipients)
                    }
                    Ok(rcpt_to) => {
                        self.mail.envelop.rcpt.push(rcpt_to);
                        ProcessedEvent::ReplyChangeState(
                            StateSMTP::RcptTo,
                            SMTPReplyCode::Code250RecipientOk,
                        )
                    }
                    Err(_) => ProcessedEvent::Reply(SMTPReplyCode::Code553InvalidRecipient),
                }
            }

            (StateSMTP::MailFrom, Event::DataCmd) => {
                ProcessedEvent::Reply(SMTPReplyCode::Code503NoRecipients)
            }

            (StateSMTP::RcptTo, Event::DataCmd) => {
                self.mail.body.reserve(16 * 1024);
                self.data_bytes = 0;
                self.data_overflow = false;
                ProcessedEvent::ReplyChangeState(StateSMTP::Data, SMTPReplyCode::Code354)
            }

            (StateSMTP::Data, Event::DataLine(line)) => {
                if !self.data_overflow {
                    self.data_bytes += line.len() + 2;
                    if self.data_bytes > conn.config.max_message_size {
                        log::warn!(
                            target: log_channels::RECEIVER,
                            "message from {} exceeded max_message_size={}, draining",
                            conn.client_addr,
                            conn.config.max_message_size
                        );
                        self.data_overflow = true;
                        self.mail.body.clear();
                    } else {
                        self.mail.body.push_str(&line);
                        self.mail.body.push_str("\r\n");
                    }
                }
                ProcessedEvent::Nothing
            }

            (StateSMTP::Data, Event::DataEnd) => {
                if self.data_overflow {
                    self.reset_envelop();
                    return ProcessedEvent::MessageTooLarge;
                }

                let mut output = MailContext::new(conn.client_addr);
                output.envelop.helo = self.mail.envelop.helo.clone();
                std::mem::swap(&mut self.mail, &mut output);

                ProcessedEvent::TransactionCompleted(Box::new(output))
            }

            _ => ProcessedEvent::Reply(SMTPReplyCode::Code502Unimplemented),
        }
    }

    fn set_helo(&mut self, helo: String) {
        self.mail = MailContext::new(self.mail.client_addr);
        self.mail.envelop.helo = helo;
    }

    fn set_mail_from<S>(&mut self, mail_from: Address, conn: &Connection<S>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        self.mail.body.clear();
        self.mail.envelop.rcpt.clear();
        self.mail.envelop.mail_from = Some(mail_from);
        self.mail.timestamp = std::time::SystemTime::now();
        self.mail.message_id = MailContext::generate_message_id(conn.timestamp);

        log::trace!(
            target: log_channels::RECEIVER,
            "envelop=\"{:?}\"",
            self.mail.envelop
        );
    }

    fn reset_envelop(&mut self) {
        let helo = self.mail.envelop.helo.clone();
        self.mail = MailContext::new(self.mail.client_addr);
        self.mail.envelop.helo = helo;
        self.data_bytes = 0;
        self.data_overflow = false;
    }
}

fn anonymous_allowed<S>(conn: &Connection<S>) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
{
    conn.config.allow_anonymous
        && conn.config.fallback_user.is_some()
        && conn.config.fallback_pass.is_some()
}

impl Transaction {
    pub async fn receive<S>(
        conn: &mut Connection<S>,
        helo_domain: &Option<String>,
    ) -> anyhow::Result<TransactionResult>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        let mut transaction = Transaction {
            // an authenticated (or already announced) session needs no new
            // EHLO to start a mail
            state: if conn.is_authenticated || helo_domain.is_some() {
                StateSMTP::Helo
            } else {
                StateSMTP::Connect
            },
            mail: MailContext::new(conn.client_addr),
            data_bytes: 0,
            data_overflow: false,
        };

        if let Some(helo) = helo_domain {
            transaction.mail.envelop.helo = helo.clone();
        }

        loop {
            if transaction.state == StateSMTP::Stop {
                conn.is_alive = false;
                return Ok(TransactionResult::Nothing);
            }

            match conn.read(COMMAND_TIMEOUT).await {
                Ok(Some(client_message)) => {
                    // empty lines between commands are silently discarded
                    if transaction.state != StateSMTP::Data && client_message.is_empty() {
                        continue;
                    }

                    match transaction.parse_and_apply(conn, &client_message) {
                        ProcessedEvent::Nothing => {}
                        ProcessedEvent::Reply(reply_to_send) => {
                            conn.send_code(reply_to_send).await?;
                        }
                        ProcessedEvent::ReplyChangeState(new_state, reply_to_send) => {
                            log::info!(
                                target: log_channels::RECEIVER,
                                "================ STATE: /{}/ => /{}/",
                                transaction.state,
                                new_state
                            );
                            transaction.state = new_state;
                            conn.send_code(reply_to_send).await?;
                        }
                        ProcessedEvent::StartAuthentication(mechanism, initial_response) => {
                            return Ok(TransactionResult::Authentication(
                                mechanism,
                                initial_response,
                            ));
                        }
                        ProcessedEvent::MessageTooLarge => {
                            log::info!(
                                target: log_channels::RECEIVER,
                                "================ STATE: /{}/ => /{}/",
                                transaction.state,
                                StateSMTP::Helo
                            );
                            transaction.state = StateSMTP::Helo;
                            conn.send(&message_too_large(conn.config.max_message_size))
                                .await?;
                            conn.error_count += 1;
                        }
                        ProcessedEvent::TransactionCompleted(mail) => {
                            return Ok(TransactionResult::Mail(mail));
                        }
                    }
                }
                Ok(None) => {
                    log::info!(target: log_channels::RECEIVER, "eof from {}", conn.client_addr);
                    transaction.state = StateSMTP::Stop;
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    conn.send_code(SMTPReplyCode::Code421Timeout).await?;
                    anyhow::bail!("command deadline exceeded for {}", conn.client_addr)
                }
                Err(e) => {
                    let _ = conn.send_code(SMTPReplyCode::Code421Unavailable).await;
                    anyhow::bail!(e)
                }
            }
        }
    }
}
