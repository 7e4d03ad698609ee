//! Content source contract and the items it returns.

use crate::detect::FeedItem;
use crate::error::SourceError;
use crate::types::ItemId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-sensitivity rating of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rating {
    General,
    Mature,
    Adult,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::General => f.write_str("General"),
            Rating::Mature => f.write_str("Mature"),
            Rating::Adult => f.write_str("Adult"),
        }
    }
}

/// A submission as listed in search results or an account's recent activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: ItemId,
    pub title: String,
    pub author: String,
    pub rating: Rating,
}

impl FeedItem for Submission {
    type Id = ItemId;

    fn id(&self) -> ItemId {
        self.id
    }
}

/// A journal entry from an account's recent activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: ItemId,
    pub title: String,
    pub author: String,
}

impl FeedItem for Journal {
    type Id = ItemId;

    fn id(&self) -> ItemId {
        self.id
    }
}

/// Latest items of one account, each list most-recent-first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecentActivity {
    pub submissions: Vec<Submission>,
    pub journals: Vec<Journal>,
}

/// Content-source adapter. Every list it returns is ordered
/// most-recent-first and holds at most one page.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// First page of results for a saved search.
    async fn fetch_search_page(&self, query: &str) -> Result<Vec<Submission>, SourceError>;

    /// Recent submissions and journals of an account.
    async fn fetch_recent(&self, account: &str) -> Result<RecentActivity, SourceError>;

    /// Preview image bytes for a submission, if it has one.
    async fn fetch_preview(&self, submission: &Submission) -> Result<Option<Vec<u8>>, SourceError>;

    /// Permalink of a submission.
    fn submission_url(&self, id: ItemId) -> String {
        format!("https://www.furaffinity.net/view/{}/", id)
    }

    /// Permalink of a journal.
    fn journal_url(&self, id: ItemId) -> String {
        format!("https://www.furaffinity.net/journal/{}/", id)
    }
}
