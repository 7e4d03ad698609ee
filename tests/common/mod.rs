//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pollwatch::{
    ContentSource, DeliveryError, ItemId, Journal, Messenger, ParseMode, Rating, RecentActivity,
    SourceError, Store, StoreConfig, Submission, SubscriberId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;

pub fn open_store(dir: &TempDir) -> Arc<Store> {
    Arc::new(Store::open(StoreConfig::at(dir.path().join("pollwatch.db"))).unwrap())
}

pub fn submission(id: u64, author: &str) -> Submission {
    Submission {
        id: ItemId(id),
        title: format!("Piece {id}"),
        author: author.to_string(),
        rating: Rating::General,
    }
}

pub fn journal(id: u64, author: &str) -> Journal {
    Journal {
        id: ItemId(id),
        title: format!("Entry {id}"),
        author: author.to_string(),
    }
}

/// Pages are served most-recent-first, exactly as stored.
#[derive(Default)]
pub struct FakeSource {
    searches: Mutex<HashMap<String, Vec<Submission>>>,
    accounts: Mutex<HashMap<String, RecentActivity>>,
    previews: Mutex<HashMap<ItemId, Vec<u8>>>,
    failing_previews: Mutex<HashSet<ItemId>>,
    unavailable: Mutex<bool>,
    fetches: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_search(&self, query: &str, page: Vec<Submission>) {
        self.searches.lock().insert(query.to_string(), page);
    }

    pub fn set_account(&self, account: &str, activity: RecentActivity) {
        self.accounts.lock().insert(account.to_string(), activity);
    }

    pub fn set_preview(&self, id: u64, bytes: Vec<u8>) {
        self.previews.lock().insert(ItemId(id), bytes);
    }

    pub fn fail_preview(&self, id: u64) {
        self.failing_previews.lock().insert(ItemId(id));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// Queries and accounts fetched so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if *self.unavailable.lock() {
            Err(SourceError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_search_page(&self, query: &str) -> Result<Vec<Submission>, SourceError> {
        self.check_available()?;
        self.fetches.lock().push(query.to_string());
        Ok(self.searches.lock().get(query).cloned().unwrap_or_default())
    }

    async fn fetch_recent(&self, account: &str) -> Result<RecentActivity, SourceError> {
        self.check_available()?;
        self.fetches.lock().push(account.to_string());
        Ok(self.accounts.lock().get(account).cloned().unwrap_or_default())
    }

    async fn fetch_preview(&self, submission: &Submission) -> Result<Option<Vec<u8>>, SourceError> {
        if self.failing_previews.lock().contains(&submission.id) {
            return Err(SourceError::PreviewUnavailable(submission.id));
        }
        Ok(self.previews.lock().get(&submission.id).cloned())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Text {
        to: SubscriberId,
        text: String,
    },
    Media {
        to: SubscriberId,
        bytes: usize,
        caption: String,
    },
}

impl Sent {
    pub fn recipient(&self) -> SubscriberId {
        match self {
            Sent::Text { to, .. } | Sent::Media { to, .. } => *to,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Sent::Text { text, .. } => text,
            Sent::Media { caption, .. } => caption,
        }
    }
}

/// Records every message. Recipients in `blocked` fail the way a front end
/// reports a user who blocked the bot.
#[derive(Default)]
pub struct FakeMessenger {
    sent: Mutex<Vec<Sent>>,
    blocked: Mutex<HashSet<SubscriberId>>,
    flaky: Mutex<HashSet<SubscriberId>>,
    attempts: Mutex<usize>,
}

impl FakeMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn block(&self, id: SubscriberId) {
        self.blocked.lock().insert(id);
    }

    /// Fail with a transient error for `id`.
    pub fn make_flaky(&self, id: SubscriberId) {
        self.flaky.lock().insert(id);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, id: SubscriberId) -> Vec<Sent> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.recipient() == id)
            .cloned()
            .collect()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    fn check(&self, recipient: SubscriberId) -> Result<(), DeliveryError> {
        *self.attempts.lock() += 1;
        if self.blocked.lock().contains(&recipient) {
            return Err(DeliveryError::classify(
                "Forbidden: bot was blocked by the user",
            ));
        }
        if self.flaky.lock().contains(&recipient) {
            return Err(DeliveryError::classify("Too Many Requests: retry after 5"));
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_text(
        &self,
        recipient: SubscriberId,
        text: &str,
        _mode: ParseMode,
    ) -> Result<(), DeliveryError> {
        self.check(recipient)?;
        self.sent.lock().push(Sent::Text {
            to: recipient,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_media(
        &self,
        recipient: SubscriberId,
        media: &[u8],
        caption: &str,
        _mode: ParseMode,
    ) -> Result<(), DeliveryError> {
        self.check(recipient)?;
        self.sent.lock().push(Sent::Media {
            to: recipient,
            bytes: media.len(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}
