//! Outbound mail capability.
//!
//! The core never talks to a mail transport; it hands fully described
//! messages to a caller-provided sender.

use anyhow::Result;
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub subject: String,
    pub to: String,
    /// Template name the host's renderer understands, e.g. `"welcome"`.
    pub template: String,
    pub context: Value,
}

pub trait MailSender {
    /// # Errors
    ///
    /// Returns an error when delivery hand-off fails.
    fn send(&self, message: MailMessage) -> Result<()>;
}

/// Sender that records messages instead of delivering them.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }
}

impl MailSender for RecordingMailer {
    fn send(&self, message: MailMessage) -> Result<()> {
        self.sent.lock().expect("mailer lock poisoned").push(message);
        Ok(())
    }
}
