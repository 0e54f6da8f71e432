use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::AccountNumber;

/// Frames a connection receives without asking, alongside the replies to its
/// own commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum UpdateNotice {
    /// First frame on a connection. Updates are delivered from here on.
    Welcome { version: u16 },
    AccountChanged { number: AccountNumber },
}

/// Fan-out of "this account changed" notifications, so connected clients can
/// refresh their view of an account.
#[derive(Default)]
pub struct UpdateFeed {
    subscribers: Mutex<Vec<Sender<AccountNumber>>>,
}

impl UpdateFeed {
    pub fn subscribe(&self) -> Receiver<AccountNumber> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, number: AccountNumber) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(number).is_ok());
        debug!(%number, subscribers = subscribers.len(), "account update published");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let feed = UpdateFeed::default();
        let first = feed.subscribe();
        let second = feed.subscribe();
        feed.publish(AccountNumber(7));
        assert_eq!(first.try_recv(), Ok(AccountNumber(7)));
        assert_eq!(second.try_recv(), Ok(AccountNumber(7)));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = UpdateFeed::default();
        let kept = feed.subscribe();
        drop(feed.subscribe());
        assert_eq!(feed.subscriber_count(), 2);
        feed.publish(AccountNumber(1));
        assert_eq!(feed.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok(AccountNumber(1)));
    }
}
