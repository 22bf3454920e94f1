//! Copy notifications
//!
//! Builds the message announcing a finished copy. Delivery is behind
//! [`NotificationSink`]; the crate ships a sink that writes to the log.

use crate::copy::flattened_name;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// One `- name` line per file. Files that land flattened on the plain
/// destination are shown by file name only.
pub fn format_file_list<S: AsRef<str>, R: AsRef<str>>(files: &[S], without_rules: &[R]) -> String {
    files
        .iter()
        .map(|file| {
            let file = file.as_ref();
            let shown = flattened_name(file, without_rules).unwrap_or(file);
            format!("- {}", shown)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Message sent after a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyNotification {
    pub username: String,
    pub system: String,
    pub description: String,
    pub file_list: String,
}

impl CopyNotification {
    /// A blank description falls back to the system name.
    pub fn new<S: AsRef<str>, R: AsRef<str>>(
        username: &str,
        system: &str,
        description: Option<&str>,
        files: &[S],
        without_rules: &[R],
    ) -> Self {
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(system);

        Self {
            username: username.to_string(),
            system: system.to_string(),
            description: description.to_string(),
            file_list: format_file_list(files, without_rules),
        }
    }

    pub fn title(&self) -> String {
        format!(
            "<code>{}: {}</code>",
            escape_html(&self.username),
            escape_html(&self.description)
        )
    }

    /// Title, blank line, file list
    pub fn message(&self) -> String {
        format!("{}\n\n{}", self.title(), self.file_list)
    }
}

/// Outbound notification transport
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &CopyNotification) -> Result<()>;
}

/// Writes notifications to the log instead of a remote service
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, notification: &CopyNotification) -> Result<()> {
        info!(
            "{}: notification\n{}",
            notification.system,
            notification.message()
        );
        Ok(())
    }
}
