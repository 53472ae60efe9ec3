use lettre::{
    Message, SmtpTransport, Transport,
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use rust_decimal::Decimal;
use std::env;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("SMTP configuration error: {0}")]
    Config(String),
    #[error("Email sending failed: {0}")]
    Send(#[from] lettre::transport::smtp::Error),
    #[error("Message building failed: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("Address parsing failed: {0}")]
    Address(#[from] lettre::address::AddressError),
}

#[derive(Debug, Clone)]
pub struct EmailTemplate {
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, EmailError> {
        Ok(Self {
            smtp_server: env::var("SMTP_SERVER")
                .map_err(|_| EmailError::Config("SMTP_SERVER not set".to_string()))?,
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .map_err(|_| EmailError::Config("Invalid SMTP_PORT".to_string()))?,
            username: env::var("SMTP_USERNAME")
                .map_err(|_| EmailError::Config("SMTP_USERNAME not set".to_string()))?,
            password: env::var("SMTP_PASSWORD")
                .map_err(|_| EmailError::Config("SMTP_PASSWORD not set".to_string()))?,
            from_email: env::var("FROM_EMAIL")
                .map_err(|_| EmailError::Config("FROM_EMAIL not set".to_string()))?,
            from_name: env::var("FROM_NAME").unwrap_or_else(|_| "Jamii Pay".to_string()),
        })
    }
}

/// Outcome notifications for approval decisions. Strictly best-effort: the
/// money path never depends on a mail going out.
pub struct EmailService {
    mailer: SmtpTransport,
    config: EmailConfig,
}

impl EmailService {
    pub fn new() -> Result<Self, EmailError> {
        let config = EmailConfig::from_env()?;

        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.smtp_server)
            .map_err(|e| EmailError::Config(format!("SMTP relay error: {}", e)))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self { mailer, config })
    }

    pub fn send_email(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        template: EmailTemplate,
    ) -> Result<(), EmailError> {
        let to_address = match to_name {
            Some(name) => format!("{} <{}>", name, to_email),
            None => to_email.to_string(),
        };

        let from_address = format!("{} <{}>", self.config.from_name, self.config.from_email);

        let message = Message::builder()
            .from(from_address.parse()?)
            .to(to_address.parse()?)
            .subject(&template.subject)
            .header(ContentType::TEXT_HTML)
            .body(template.html_body)?;

        info!("Sending email to: {}", to_email);
        self.mailer.send(&message)?;

        Ok(())
    }

    pub fn approval_outcome_template(
        &self,
        member_name: &str,
        amount: &Decimal,
        receipt_number: Option<&str>,
        approved: bool,
        notes: Option<&str>,
    ) -> EmailTemplate {
        let outcome = if approved { "approved" } else { "rejected" };
        let receipt_line = receipt_number
            .map(|r| format!("<p>Receipt: <strong>{}</strong></p>", r))
            .unwrap_or_default();
        let notes_line = notes
            .map(|n| format!("<p>Treasurer's note: {}</p>", n))
            .unwrap_or_default();

        let html_body = format!(
            r#"
            <html>
            <body style="font-family: Arial, sans-serif; color: #333;">
                <h2>Hi {}!</h2>
                <p>Your payment of KES {} has been <strong>{}</strong> by the treasury.</p>
                {}
                {}
                <p>You can view the payment under your contributions in the portal.</p>
            </body>
            </html>
            "#,
            member_name, amount, outcome, receipt_line, notes_line
        );

        EmailTemplate {
            subject: format!("Your payment has been {}", outcome),
            html_body,
        }
    }
}
