use std::time::Duration;

use tracing::warn;

use crate::commands::{Dispatcher, Notifier};
use crate::telegram::{TelegramClient, Update};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Long-polls the Telegram API and feeds new messages to the dispatcher.
/// Owns the last-seen update id; no other task touches it.
pub struct Poller<N: Notifier> {
    client: TelegramClient,
    dispatcher: Dispatcher<N>,
    last_update_id: i64,
}

impl<N: Notifier> Poller<N> {
    pub fn new(client: TelegramClient, dispatcher: Dispatcher<N>) -> Self {
        Self {
            client,
            dispatcher,
            last_update_id: 0,
        }
    }

    /// Poll forever. Cycle errors are logged and retried after a longer
    /// pause; only process termination stops the loop.
    pub async fn run(mut self) {
        loop {
            match self.client.get_updates(self.last_update_id + 1).await {
                Ok(updates) => {
                    self.process_batch(updates).await;
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Poll cycle failed: {:#}", e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Dispatch one batch in arrival order, advancing the last-seen id past
    /// each update before acting on it. Stale ids are skipped so a repeated
    /// batch never re-executes a command.
    async fn process_batch(&mut self, updates: Vec<Update>) {
        for update in updates {
            if update.update_id <= self.last_update_id {
                continue;
            }
            self.last_update_id = update.update_id;
            self.dispatcher.dispatch(&update).await;
        }
    }
}
