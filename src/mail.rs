//! Outgoing notification mail.

use anyhow::{Context, Result};
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::warn;

use crate::config::{MailConfig, MailTransportConfig};

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

pub struct Mailer {
    transport: Transport,
    from: Mailbox,
}

impl Mailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let transport = match &config.transport {
            MailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    warn!("SMTP TLS is disabled");
                }
                let builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                        .with_context(|| format!("creating SMTP transport for {host}"))?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                };
                let mut builder = builder.port(*port);
                if !username.is_empty() {
                    builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
                }
                Transport::Smtp(builder.build())
            }
            MailTransportConfig::File { path } => {
                std::fs::create_dir_all(path)
                    .with_context(|| format!("creating mail directory: {}", path.display()))?;
                Transport::File(AsyncFileTransport::<Tokio1Executor>::new(path))
            }
        };

        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .context("parsing mail sender address")?;

        Ok(Self { transport, from })
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let to = to.parse::<Mailbox>().with_context(|| format!("parsing recipient '{to}'"))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("building mail message")?;

        match &self.transport {
            Transport::Smtp(smtp) => {
                smtp.send(message).await.context("sending mail over SMTP")?;
            }
            Transport::File(file) => {
                file.send(message).await.context("writing mail file")?;
            }
        }
        Ok(())
    }
}
