use std::time::Duration;

use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use service_core::axum::async_trait;
use service_core::error::AppError;

use crate::config::SmtpConfig;
use crate::models::OtpPurpose;

/// Outbound mail boundary. The OTP engine only depends on this trait so
/// tests and local development can capture codes instead of sending them.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_otp_email(
        &self,
        to_email: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<(), AppError>;
}

fn subject_for(purpose: OtpPurpose) -> &'static str {
    match purpose {
        OtpPurpose::Registration => "Complete your registration",
        OtpPurpose::Login => "Your login code",
        OtpPurpose::PasswordReset => "Reset your password",
        OtpPurpose::EmailVerification => "Verify your email address",
    }
}

fn bodies_for(code: &str, purpose: OtpPurpose, expiry_minutes: i64) -> (String, String) {
    let plain = format!(
        "Your verification code is {code}. It expires in {expiry_minutes} minutes.\n\n\
         If you did not request this code, you can ignore this email."
    );
    let html = format!(
        r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>{subject}</h2>
    <p>Your verification code is:</p>
    <p style="font-size: 28px; letter-spacing: 6px; font-weight: bold;">{code}</p>
    <p>It expires in {expiry_minutes} minutes.</p>
    <p style="color: #666;">If you did not request this code, you can ignore this email.</p>
  </body>
</html>"#,
        subject = subject_for(purpose),
    );
    (plain, html)
}

/// SMTP-backed mailer.
#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from_email: String,
    expiry_minutes: i64,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, expiry_minutes: i64) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP mailer initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
            expiry_minutes,
        })
    }
}

#[async_trait]
impl EmailProvider for SmtpMailer {
    async fn send_otp_email(
        &self,
        to_email: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> Result<(), AppError> {
        let subject = subject_for(purpose);
        let (plain_body, html_body) = bodies_for(code, purpose, self.expiry_minutes);

        let email = Message::builder()
            .from(self.from_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // Send in the blocking pool to keep the async runtime free.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "OTP email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), to = %to_email, "Failed to send OTP email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

/// Mailer that logs instead of sending. Used when SMTP is not configured.
/// Codes are never included in the log line.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl EmailProvider for LogMailer {
    async fn send_otp_email(
        &self,
        to_email: &str,
        _code: &str,
        purpose: OtpPurpose,
    ) -> Result<(), AppError> {
        tracing::info!(
            to = %to_email,
            purpose = %purpose.as_str(),
            "SMTP disabled, skipping OTP email delivery"
        );
        Ok(())
    }
}
