//! Out-of-band delivery of codes and links by email and SMS.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use crate::config::{DeliveryConfig, SmtpConfig, TwilioConfig};
use crate::models::DeliveryChannel;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01/Accounts";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("No provider configured for {0:?} delivery")]
    ChannelUnavailable(DeliveryChannel),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_otp(
        &self,
        target: &str,
        channel: DeliveryChannel,
        code: &str,
    ) -> Result<(), DeliveryError>;

    async fn send_magic_link(&self, email: &str, link: &str) -> Result<(), DeliveryError>;

    async fn send_password_reset(&self, email: &str, link: &str) -> Result<(), DeliveryError>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

fn otp_body(code: &str) -> String {
    format!("Your verification code is {}. It expires in a few minutes.", code)
}

#[derive(Clone)]
struct SmtpMailer {
    mailer: SmtpTransport,
    from: String,
}

impl SmtpMailer {
    fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| DeliveryError::Provider(e.to_string()))?
            .credentials(creds)
            .port(587)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP mailer initialized");

        Ok(Self {
            mailer,
            from: config.from.clone(),
        })
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), DeliveryError> {
        let email = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e: lettre::address::AddressError| {
                        DeliveryError::Provider(e.to_string())
                    })?,
            )
            .to(to
                .parse()
                .map_err(|e: lettre::address::AddressError| {
                    DeliveryError::InvalidRecipient(e.to_string())
                })?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| DeliveryError::Provider(e.to_string()))?;

        // SmtpTransport is synchronous.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| DeliveryError::Provider(e.to_string()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                Err(DeliveryError::Provider(e.to_string()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    #[serde(default)]
    message: Option<String>,
}

struct TwilioSender {
    client: Client,
    account_sid: String,
    auth_token: Secret<String>,
    from: String,
}

impl TwilioSender {
    fn new(config: &TwilioConfig) -> Self {
        Self {
            client: Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: Secret::new(config.auth_token.expose_secret().clone()),
            from: config.from.clone(),
        }
    }

    async fn send(&self, to: &str, body: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/{}/Messages.json", TWILIO_API_BASE, self.account_sid);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[("To", to), ("From", self.from.as_str()), ("Body", body)])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| DeliveryError::Provider(format!("Failed to reach Twilio: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<TwilioError>()
                .await
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_default();
            tracing::error!(status = %status, detail = %detail, "Twilio rejected SMS");
            return Err(DeliveryError::Provider(format!(
                "Twilio returned {}: {}",
                status, detail
            )));
        }

        tracing::info!("SMS sent via Twilio");
        Ok(())
    }
}

/// SMTP for email, Twilio for SMS. A channel without configuration fails
/// with `ChannelUnavailable`.
pub struct OutboundNotifier {
    smtp: Option<SmtpMailer>,
    sms: Option<TwilioSender>,
}

impl OutboundNotifier {
    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let smtp = config.smtp.as_ref().map(SmtpMailer::new).transpose()?;
        let sms = config.twilio.as_ref().map(TwilioSender::new);
        if sms.is_none() {
            tracing::warn!("Twilio is not configured; SMS delivery is unavailable");
        }
        Ok(Self { smtp, sms })
    }

    fn mailer(&self) -> Result<&SmtpMailer, DeliveryError> {
        self.smtp
            .as_ref()
            .ok_or(DeliveryError::ChannelUnavailable(DeliveryChannel::Email))
    }
}

#[async_trait]
impl Notifier for OutboundNotifier {
    async fn send_otp(
        &self,
        target: &str,
        channel: DeliveryChannel,
        code: &str,
    ) -> Result<(), DeliveryError> {
        match channel {
            DeliveryChannel::Sms => {
                let sms = self
                    .sms
                    .as_ref()
                    .ok_or(DeliveryError::ChannelUnavailable(DeliveryChannel::Sms))?;
                sms.send(target, &otp_body(code)).await
            }
            DeliveryChannel::Email => {
                let html_body = format!(
                    r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Your verification code</h2>
        <p style="font-size: 24px; letter-spacing: 4px;"><strong>{}</strong></p>
        <p style="color: #666; font-size: 12px;">If you didn't request this, please ignore this email.</p>
    </body>
</html>"#,
                    code
                );
                self.mailer()?
                    .send(target, "Your verification code", otp_body(code), html_body)
                    .await
            }
        }
    }

    async fn send_magic_link(&self, email: &str, link: &str) -> Result<(), DeliveryError> {
        let html_body = format!(
            r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Sign in</h2>
        <p>Click the link below to sign in:</p>
        <p><a href="{}" style="background-color: #4CAF50; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">Sign in</a></p>
        <p style="color: #666; font-size: 12px;">If you didn't request this, please ignore this email.</p>
    </body>
</html>"#,
            link
        );
        let plain_body = format!("Sign in\n\nVisit the following link to sign in:\n\n{}", link);
        self.mailer()?
            .send(email, "Your sign-in link", plain_body, html_body)
            .await
    }

    async fn send_password_reset(&self, email: &str, link: &str) -> Result<(), DeliveryError> {
        let html_body = format!(
            r#"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Password Reset Request</h2>
        <p>We received a request to reset your password. Click the link below to set a new password:</p>
        <p><a href="{}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">Reset Password</a></p>
        <p style="color: #666; font-size: 12px;">If you didn't request this, please ignore this email.</p>
    </body>
</html>"#,
            link
        );
        let plain_body = format!(
            "Password Reset Request\n\nVisit the following link to set a new password:\n\n{}",
            link
        );
        self.mailer()?
            .send(email, "Reset Your Password", plain_body, html_body)
            .await
    }
}

/// Development notifier: records that a message would have gone out without
/// writing the code or link anywhere.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_otp(
        &self,
        _target: &str,
        channel: DeliveryChannel,
        _code: &str,
    ) -> Result<(), DeliveryError> {
        tracing::info!(channel = ?channel, "One-time code delivery skipped (log notifier)");
        Ok(())
    }

    async fn send_magic_link(&self, _email: &str, _link: &str) -> Result<(), DeliveryError> {
        tracing::info!("Magic link delivery skipped (log notifier)");
        Ok(())
    }

    async fn send_password_reset(&self, _email: &str, _link: &str) -> Result<(), DeliveryError> {
        tracing::info!("Password reset delivery skipped (log notifier)");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Otp {
        target: String,
        channel: DeliveryChannel,
        code: String,
    },
    MagicLink {
        email: String,
        link: String,
    },
    PasswordReset {
        email: String,
        link: String,
    },
}

/// Captures outgoing messages in memory. Used by tests to read back codes and links.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with a provider error.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    fn sent_guard(&self) -> MutexGuard<'_, Vec<SentMessage>> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent_guard().clone()
    }

    pub fn last_otp(&self) -> Option<String> {
        self.sent_guard().iter().rev().find_map(|m| match m {
            SentMessage::Otp { code, .. } => Some(code.clone()),
            _ => None,
        })
    }

    pub fn last_link(&self) -> Option<String> {
        self.sent_guard().iter().rev().find_map(|m| match m {
            SentMessage::MagicLink { link, .. } | SentMessage::PasswordReset { link, .. } => {
                Some(link.clone())
            }
            _ => None,
        })
    }

    fn record(&self, message: SentMessage) -> Result<(), DeliveryError> {
        if self.failing {
            return Err(DeliveryError::Provider("provider unavailable".to_string()));
        }
        self.sent_guard().push(message);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_otp(
        &self,
        target: &str,
        channel: DeliveryChannel,
        code: &str,
    ) -> Result<(), DeliveryError> {
        self.record(SentMessage::Otp {
            target: target.to_string(),
            channel,
            code: code.to_string(),
        })
    }

    async fn send_magic_link(&self, email: &str, link: &str) -> Result<(), DeliveryError> {
        self.record(SentMessage::MagicLink {
            email: email.to_string(),
            link: link.to_string(),
        })
    }

    async fn send_password_reset(&self, email: &str, link: &str) -> Result<(), DeliveryError> {
        self.record(SentMessage::PasswordReset {
            email: email.to_string(),
            link: link.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sms_without_twilio_is_unavailable() {
        let notifier = OutboundNotifier::from_config(&DeliveryConfig {
            public_base_url: "http://localhost:8080".to_string(),
            smtp: None,
            twilio: None,
        })
        .unwrap();

        let err = notifier
            .send_otp("+15551234567", DeliveryChannel::Sms, "4821")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::ChannelUnavailable(DeliveryChannel::Sms)
        ));

        let err = notifier
            .send_magic_link("jane@example.com", "http://localhost/magic-link?token=t")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::ChannelUnavailable(DeliveryChannel::Email)
        ));
    }

    #[tokio::test]
    async fn test_recording_notifier_captures_codes_and_links() {
        let notifier = RecordingNotifier::new();
        notifier
            .send_otp("+15551234567", DeliveryChannel::Sms, "4821")
            .await
            .unwrap();
        notifier
            .send_magic_link("jane@example.com", "http://x/magic-link?token=abc")
            .await
            .unwrap();

        assert_eq!(notifier.last_otp().as_deref(), Some("4821"));
        assert_eq!(
            notifier.last_link().as_deref(),
            Some("http://x/magic-link?token=abc")
        );
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_notifier_records_nothing() {
        let notifier = RecordingNotifier::failing();
        assert!(notifier
            .send_password_reset("jane@example.com", "http://x")
            .await
            .is_err());
        assert!(notifier.sent().is_empty());
    }
}
