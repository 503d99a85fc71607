use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::telegram::Update;

/// Messages must start with this to be treated as script commands.
pub const COMMAND_PREFIX: char = '!';

/// Telegram rejects messages past ~4096 characters; stay under that.
const MAX_OUTPUT_CHARS: usize = 4000;
const TRUNCATED_LINES: usize = 20;

/// Outbound side of the control channel. Production code sends to Telegram;
/// tests substitute a recording fake.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Maps authorized chat commands to scripts on disk and runs them.
pub struct Dispatcher<N: Notifier> {
    notifier: N,
    chat_id: String,
    scripts_dir: PathBuf,
}

impl<N: Notifier> Dispatcher<N> {
    pub fn new(notifier: N, chat_id: &str, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            notifier,
            chat_id: chat_id.to_string(),
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Run one update through the per-message state machine: authorization,
    /// prefix check, script lookup, execution, outcome report.
    pub async fn dispatch(&self, update: &Update) {
        let Some(message) = &update.message else {
            return;
        };
        let Some(text) = &message.text else {
            return;
        };
        // Only the configured chat may issue commands; everything else is
        // dropped without a reply.
        if message.chat.id.to_string() != self.chat_id {
            return;
        }

        let Some(name) = text.trim().strip_prefix(COMMAND_PREFIX) else {
            return;
        };
        let username = message
            .from
            .as_ref()
            .and_then(|u| u.username.as_deref())
            .unwrap_or("unknown");

        self.run_script(name, username).await;
    }

    async fn run_script(&self, name: &str, username: &str) {
        // Script names must stay inside the scripts directory.
        if name.contains('/') || name.contains("..") {
            warn!("Rejected script name: {}", name);
            self.notifier
                .notify(&format!("\u{274c} Invalid script name '{}'", name))
                .await;
            return;
        }

        let path = self.scripts_dir.join(format!("{}.sh", name));
        if !path.exists() {
            self.notifier
                .notify(&format!(
                    "\u{274c} Script '{}' not found\n\u{1f4c1} Available scripts: {}",
                    name,
                    self.available_scripts().await
                ))
                .await;
            return;
        }

        let start = format!(
            "\u{1f680} Running script '{}' requested by @{}...",
            name, username
        );
        info!("{}", start);
        self.notifier.notify(&start).await;

        let output = match tokio::process::Command::new("bash")
            .arg(&path)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to spawn script {}: {}", path.display(), e);
                self.notifier
                    .notify(&format!("\u{274c} Failed to start '{}': {}", name, e))
                    .await;
                return;
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            info!("Script '{}' finished successfully", name);
        } else {
            warn!("Script '{}' exited with {}", name, output.status);
        }
        self.notifier
            .notify(&render_outcome(name, &combined, output.status.success()))
            .await;
    }

    /// Names of the `.sh` entries in the scripts directory, sorted.
    async fn available_scripts(&self) -> String {
        let mut entries = match tokio::fs::read_dir(&self.scripts_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cannot read scripts directory {}: {}",
                    self.scripts_dir.display(),
                    e
                );
                return "none".to_string();
            }
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_string_lossy().strip_suffix(".sh") {
                names.push(name.to_string());
            }
        }

        if names.is_empty() {
            return "none".to_string();
        }
        names.sort();
        names.join(", ")
    }
}

/// Format the outcome report, clamping oversized output to its tail so the
/// push API accepts it.
fn render_outcome(name: &str, output: &str, success: bool) -> String {
    let headline = if success {
        format!("\u{2705} Script '{}' finished successfully", name)
    } else {
        format!("\u{274c} Script '{}' failed", name)
    };

    let full = format!("{}\n```\n{}\n```", headline, output);
    if full.len() <= MAX_OUTPUT_CHARS {
        return full;
    }

    format!(
        "{}\n\u{1f4c4} Output too long, showing the last {} lines:\n```\n{}\n```",
        headline,
        TRUNCATED_LINES,
        last_lines(output, TRUNCATED_LINES)
    )
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Notifier;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Captures everything that would have been pushed to the chat.
    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNotifier {
        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, text: &str) {
            self.sent.lock().unwrap().push(text.to_string());
        }
    }
}
