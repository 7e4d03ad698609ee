//! Delivering one item to every subscriber of the entity that produced it.

use super::alerted::AlertedSet;
use super::templates::{render_journal, render_submission, Trigger};
use crate::error::DeliveryError;
use crate::messenger::{truncate_html, Messenger, ParseMode};
use crate::source::{ContentSource, Journal, Submission};
use crate::store::Store;
use crate::types::{ItemId, ItemKey, SubscriberId};
use std::collections::{BTreeSet, HashMap};
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Default caption limit, in visible characters.
pub const DEFAULT_CAPTION_LIMIT: usize = 200;

/// One rendered message ready to fan out.
#[derive(Clone, Debug)]
pub struct Notification {
    pub item: ItemKey,
    pub text: String,
    /// Markup of `text`. Rendered templates are HTML.
    pub mode: ParseMode,
    pub preview: Option<Arc<Vec<u8>>>,
}

/// What happened to each recipient of one or more fan-outs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    /// Already notified about this item.
    pub duplicates: usize,
    /// Not started, or no longer has a record.
    pub skipped_inactive: usize,
    pub skipped_unreachable: usize,
    pub failed: usize,
    /// Recipients found unreachable during this delivery.
    pub newly_unreachable: usize,
}

impl AddAssign for FanOutReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.duplicates += other.duplicates;
        self.skipped_inactive += other.skipped_inactive;
        self.skipped_unreachable += other.skipped_unreachable;
        self.failed += other.failed;
        self.newly_unreachable += other.newly_unreachable;
    }
}

/// Dedupes, formats, and sends notifications.
pub struct Notifier {
    store: Arc<Store>,
    source: Arc<dyn ContentSource>,
    messenger: Arc<dyn Messenger>,
    alerted: AlertedSet,
    caption_limit: usize,
}

impl Notifier {
    pub fn new(
        store: Arc<Store>,
        source: Arc<dyn ContentSource>,
        messenger: Arc<dyn Messenger>,
        alerted_capacity: usize,
        caption_limit: usize,
    ) -> Self {
        Self {
            store,
            source,
            messenger,
            alerted: AlertedSet::new(alerted_capacity),
            caption_limit,
        }
    }

    pub fn alerted(&self) -> &AlertedSet {
        &self.alerted
    }

    /// Deliver `notification` to every recipient that has not seen the item.
    ///
    /// A failure for one recipient never stops delivery to the others.
    pub async fn fan_out(
        &self,
        notification: &Notification,
        recipients: &BTreeSet<SubscriberId>,
    ) -> FanOutReport {
        let mut report = FanOutReport::default();

        for &id in recipients {
            if !self.alerted.check_and_record(id, notification.item) {
                report.duplicates += 1;
                continue;
            }

            let subscriber = match self.store.get_subscriber(id) {
                Ok(Some(subscriber)) => subscriber,
                Ok(None) => {
                    warn!(subscriber = %id, "Recipient has no subscriber record");
                    report.skipped_inactive += 1;
                    continue;
                }
                Err(e) => {
                    error!(subscriber = %id, error = %e, "Unable to load recipient");
                    report.failed += 1;
                    continue;
                }
            };
            if !subscriber.accepts_notifications() {
                if subscriber.started {
                    report.skipped_unreachable += 1;
                } else {
                    report.skipped_inactive += 1;
                }
                continue;
            }

            match self.send(id, notification).await {
                Ok(()) => {
                    debug!(subscriber = %id, item = %notification.item.id, "Delivered");
                    report.delivered += 1;
                }
                Err(DeliveryError::Unreachable(reason)) => {
                    warn!(subscriber = %id, reason = %reason, "Recipient unreachable");
                    report.failed += 1;
                    match self.store.blocking(move |store| store.mark_unreachable(id)).await {
                        Ok(true) => report.newly_unreachable += 1,
                        Ok(false) => {}
                        Err(e) => error!(
                            subscriber = %id,
                            error = %e,
                            "Unable to persist unreachable status"
                        ),
                    }
                }
                Err(DeliveryError::Failed(reason)) => {
                    error!(
                        subscriber = %id,
                        item = %notification.item.id,
                        reason = %reason,
                        "Delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn send(&self, id: SubscriberId, notification: &Notification) -> Result<(), DeliveryError> {
        let mode = notification.mode;
        match &notification.preview {
            Some(preview) => {
                let caption = match mode {
                    ParseMode::Html => truncate_html(&notification.text, self.caption_limit),
                    ParseMode::Plain => {
                        notification.text.chars().take(self.caption_limit).collect()
                    }
                };
                self.messenger.send_media(id, preview, &caption, mode).await
            }
            None => self.messenger.send_text(id, &notification.text, mode).await,
        }
    }

    /// Announce new submissions (oldest first) to `recipients`. Previews are
    /// fetched concurrently before the first message goes out.
    pub async fn announce_submissions(
        &self,
        trigger: Trigger<'_>,
        submissions: &[&Submission],
        recipients: &BTreeSet<SubscriberId>,
    ) -> FanOutReport {
        let mut report = FanOutReport::default();
        if submissions.is_empty() || recipients.is_empty() {
            return report;
        }

        let mut previews = prefetch_previews(&self.source, submissions).await;
        for submission in submissions {
            let url = self.source.submission_url(submission.id);
            let notification = Notification {
                item: ItemKey::submission(submission.id),
                text: render_submission(trigger, submission, &url),
                mode: ParseMode::Html,
                preview: previews.remove(&submission.id),
            };
            report += self.fan_out(&notification, recipients).await;
        }
        report
    }

    /// Announce new journals (oldest first) to `recipients`.
    pub async fn announce_journals(
        &self,
        journals: &[&Journal],
        recipients: &BTreeSet<SubscriberId>,
    ) -> FanOutReport {
        let mut report = FanOutReport::default();
        for journal in journals {
            let url = self.source.journal_url(journal.id);
            let notification = Notification {
                item: ItemKey::journal(journal.id),
                text: render_journal(journal, &url),
                mode: ParseMode::Html,
                preview: None,
            };
            report += self.fan_out(&notification, recipients).await;
        }
        report
    }
}

/// Fetch previews for every submission at once and wait for all of them.
/// Items whose fetch fails or has no preview are left out.
pub async fn prefetch_previews(
    source: &Arc<dyn ContentSource>,
    submissions: &[&Submission],
) -> HashMap<ItemId, Arc<Vec<u8>>> {
    let mut tasks = JoinSet::new();
    for submission in submissions {
        let source = Arc::clone(source);
        let submission = (*submission).clone();
        tasks.spawn(async move {
            let result = source.fetch_preview(&submission).await;
            (submission.id, result)
        });
    }

    let mut previews = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, Ok(Some(bytes)))) => {
                previews.insert(id, Arc::new(bytes));
            }
            Ok((_, Ok(None))) => {}
            Ok((id, Err(e))) => {
                warn!(item = %id, error = %e, "Unable to obtain preview image");
            }
            Err(e) => {
                warn!(error = %e, "Preview task failed");
            }
        }
    }
    previews
}
