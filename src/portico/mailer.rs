//! Outgoing mail: the contact form and password reset notices.
//!
//! The default sender for local dev is `LogMailer`, which logs and returns `Ok(())`.

use anyhow::Result;
use tracing::info;

/// Sender address for mail the application writes itself.
pub const NOREPLY_FROM: &str = "Portico <noreply@portico.dev>";

#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
}

impl MailMessage {
    /// Message sent by the contact form on behalf of a visitor.
    #[must_use]
    pub fn from_visitor(to: &str, name: &str, email: &str, message: &str) -> Self {
        Self {
            to: to.to_string(),
            from: format!("{name} <{email}>"),
            subject: "Contact Form".to_string(),
            text: message.to_string(),
        }
    }

    /// Link to choose a new password.
    #[must_use]
    pub fn password_reset(to: &str, link: &str) -> Self {
        Self {
            to: to.to_string(),
            from: NOREPLY_FROM.to_string(),
            subject: "Reset your password on Portico".to_string(),
            text: format!(
                "You are receiving this email because you (or someone else) have requested \
                 the reset of the password for your account.\n\n\
                 Please click on the following link, or paste it into your browser to \
                 complete the process:\n\n{link}\n\n\
                 If you did not request this, please ignore this email and your password \
                 will remain unchanged.\n"
            ),
        }
    }

    /// Confirmation that a reset went through.
    #[must_use]
    pub fn password_changed(to: &str) -> Self {
        Self {
            to: to.to_string(),
            from: NOREPLY_FROM.to_string(),
            subject: "Your Portico password has been changed".to_string(),
            text: format!(
                "Hello,\n\nThis is a confirmation that the password for your account {to} \
                 has just been changed.\n"
            ),
        }
    }
}

/// Mail delivery abstraction.
pub trait Mailer: Send + Sync {
    /// Deliver a message or return an error so the visitor sees a failure notice.
    fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Local dev mailer that logs the message instead of sending it.
#[derive(Clone, Debug)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to = %message.to,
            from = %message.from,
            subject = %message.subject,
            bytes = message.text.len(),
            "mail send stub"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visitor_message_uses_name_and_address() {
        let message =
            MailMessage::from_visitor("your@email.com", "Ada", "ada@example.com", "Hello");
        assert_eq!(message.from, "Ada <ada@example.com>");
        assert_eq!(message.subject, "Contact Form");
        assert!(LogMailer.send(&message).is_ok());
    }

    #[test]
    fn reset_message_carries_link() {
        let message = MailMessage::password_reset(
            "ada@example.com",
            "https://portico.test/app/reset/abc",
        );
        assert_eq!(message.from, NOREPLY_FROM);
        assert!(message.text.contains("https://portico.test/app/reset/abc"));
    }
}
