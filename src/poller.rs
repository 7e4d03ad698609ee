//! Poll scheduler.
//!
//! One background task runs cycles back to back on a fixed interval, the
//! first one immediately. A cycle walks every tracked search, then every
//! tracked account. Each entity gets its own fetch, its own store
//! transaction, and then its notifications.

use crate::detect::{detect_new, Detection};
use crate::error::{Result, StoreError};
use crate::notify::{FanOutReport, Notifier, Trigger};
use crate::source::{ContentSource, Journal, RecentActivity, Submission};
use crate::store::{Entity, EntityScope, Store};
use crate::types::{ItemId, SubscriberId, Timestamp};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default time between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Lifecycle of a poller. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

/// Summary of one polling cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 1-based cycle number; 0 before the first cycle finishes.
    pub cycle: u64,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub entities_checked: usize,
    /// Entities whose cursor was set for the first time.
    pub entities_seeded: usize,
    /// Entities deleted between listing and update.
    pub entities_vanished: usize,
    /// Entities skipped because their record could not be decoded.
    pub entities_failed: usize,
    pub new_items: usize,
    pub source_failures: usize,
    /// Entities where a whole page was new.
    pub gap_warnings: usize,
    pub delivery: FanOutReport,
    /// Store failures seen during the cycle. A failure that is not confined
    /// to one record ends the rest of that pass (searches or accounts).
    pub store_errors: Vec<String>,
}

/// Drives detection and fan-out over every tracked entity.
pub struct Poller {
    store: Arc<Store>,
    source: Arc<dyn ContentSource>,
    notifier: Arc<Notifier>,
    interval: Duration,
    state: Arc<Mutex<PollerState>>,
    cycles: u64,
}

/// New items of one stream and the subscribers to tell, as committed by the
/// entity's transaction.
struct Found<T> {
    new_items: Vec<T>,
    seeded: bool,
    possible_gap: bool,
    recipients: BTreeSet<SubscriberId>,
}

impl<T: Clone> Found<T> {
    fn new<E: Entity>(
        detection: Detection<'_, T, ItemId>,
        scope: &EntityScope<'_, '_, E>,
        subscribers: &BTreeSet<SubscriberId>,
    ) -> Result<Self> {
        let recipients = if detection.is_empty() {
            BTreeSet::new()
        } else {
            resolve_recipients(scope, subscribers)?
        };
        Ok(Self {
            new_items: detection.new_items.into_iter().cloned().collect(),
            seeded: detection.seeded,
            possible_gap: detection.possible_gap,
            recipients,
        })
    }

    fn items(&self) -> Vec<&T> {
        self.new_items.iter().collect()
    }
}

impl Poller {
    pub fn new(
        store: Arc<Store>,
        source: Arc<dyn ContentSource>,
        notifier: Arc<Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            interval: interval.max(Duration::from_millis(1)),
            state: Arc::new(Mutex::new(PollerState::Idle)),
            cycles: 0,
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    /// Spawn the polling task. The first cycle starts right away.
    pub fn start(mut self) -> PollerHandle {
        let cancel = CancellationToken::new();
        let (reports_tx, reports_rx) = watch::channel(CycleReport::default());
        let state = Arc::clone(&self.state);
        *state.lock() = PollerState::Running;

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs_f64(), "Poller started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let report = self.run_cycle().await;
                // No receivers is not an error.
                let _ = reports_tx.send(report);
            }

            *self.state.lock() = PollerState::Stopped;
            info!(cycles = self.cycles, "Poller stopped");
        });

        PollerHandle {
            cancel,
            task,
            reports: reports_rx,
            state,
        }
    }

    /// Run one full cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport {
            cycle: self.cycles,
            started_at: Timestamp::now(),
            ..CycleReport::default()
        };
        debug!(cycle = self.cycles, "Starting cycle");

        // Accounts are polled even when the search pass fails.
        if let Err(e) = self.poll_searches(&mut report).await {
            record_store_failure(&mut report, "searches", &e);
        }
        if let Err(e) = self.poll_accounts(&mut report).await {
            record_store_failure(&mut report, "accounts", &e);
        }

        report.finished_at = Timestamp::now();
        debug!(
            cycle = report.cycle,
            checked = report.entities_checked,
            new_items = report.new_items,
            delivered = report.delivery.delivered,
            store_errors = report.store_errors.len(),
            "Finished cycle"
        );
        report
    }

    async fn poll_searches(&self, report: &mut CycleReport) -> Result<()> {
        for key in self.store.search_keys()? {
            let page = match self.source.fetch_search_page(&key).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(search = %key, error = %e, "Unable to fetch search results");
                    report.source_failures += 1;
                    continue;
                }
            };

            let committed = {
                let key = key.clone();
                self.store
                    .blocking(move |store| commit_search(store, &key, &page))
                    .await
            };
            let found = match committed {
                Ok(Some(found)) => found,
                Ok(None) => {
                    debug!(search = %key, "Search removed during cycle");
                    report.entities_vanished += 1;
                    continue;
                }
                Err(e) if e.is_record_local() => {
                    skip_entity(report, "search", &key, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.entities_checked += 1;
            record_detection(report, "search", &key, &found);

            report.delivery += self
                .notifier
                .announce_submissions(Trigger::Search(&key), &found.items(), &found.recipients)
                .await;
        }
        Ok(())
    }

    async fn poll_accounts(&self, report: &mut CycleReport) -> Result<()> {
        for key in self.store.account_keys()? {
            let recent = match self.source.fetch_recent(&key).await {
                Ok(recent) => recent,
                Err(e) => {
                    warn!(account = %key, error = %e, "Unable to fetch recent activity");
                    report.source_failures += 1;
                    continue;
                }
            };

            let committed = {
                let key = key.clone();
                self.store
                    .blocking(move |store| commit_account(store, &key, &recent))
                    .await
            };
            let (submissions, journals) = match committed {
                Ok(Some(found)) => found,
                Ok(None) => {
                    debug!(account = %key, "Account removed during cycle");
                    report.entities_vanished += 1;
                    continue;
                }
                Err(e) if e.is_record_local() => {
                    skip_entity(report, "account", &key, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.entities_checked += 1;
            record_detection(report, "account submissions", &key, &submissions);
            record_detection(report, "account journals", &key, &journals);

            report.delivery += self
                .notifier
                .announce_submissions(
                    Trigger::AccountSubmissions(&key),
                    &submissions.items(),
                    &submissions.recipients,
                )
                .await;
            report.delivery += self
                .notifier
                .announce_journals(&journals.items(), &journals.recipients)
                .await;
        }
        Ok(())
    }
}

/// Advance one search's cursor over `page` in a single transaction.
fn commit_search(
    store: &Store,
    key: &str,
    page: &[Submission],
) -> Result<Option<Found<Submission>>> {
    store.update_search(key, |search, scope| {
        let detection = detect_new(page, search.last_id.as_ref());
        search.last_id = detection.cursor;
        search.last_run = Timestamp::now();
        scope.save(search)?;
        Found::new(detection, scope, &search.subscribers)
    })
}

/// Advance both cursors of one account in a single transaction.
fn commit_account(
    store: &Store,
    key: &str,
    recent: &RecentActivity,
) -> Result<Option<(Found<Submission>, Found<Journal>)>> {
    store.update_account(key, |account, scope| {
        let submissions: Detection<'_, Submission, ItemId> =
            detect_new(&recent.submissions, account.last_submission_id.as_ref());
        let journals: Detection<'_, Journal, ItemId> =
            detect_new(&recent.journals, account.last_journal_id.as_ref());
        account.last_submission_id = submissions.cursor;
        account.last_journal_id = journals.cursor;
        account.last_run = Timestamp::now();
        scope.save(account)?;

        Ok((
            Found::new(submissions, scope, &account.submission_subscribers)?,
            Found::new(journals, scope, &account.journal_subscribers)?,
        ))
    })
}

/// Subscribers of an entity that still have a record, checked inside the
/// entity's transaction. A missing record is logged and skipped.
fn resolve_recipients<E: Entity>(
    scope: &EntityScope<'_, '_, E>,
    ids: &BTreeSet<SubscriberId>,
) -> Result<BTreeSet<SubscriberId>> {
    let mut recipients = BTreeSet::new();
    for &id in ids {
        if scope.has_subscriber(id)? {
            recipients.insert(id);
        } else {
            warn!(entity = %scope.key(), subscriber = %id, "Subscriber record missing");
        }
    }
    Ok(recipients)
}

fn record_detection<T>(report: &mut CycleReport, stream: &str, key: &str, found: &Found<T>) {
    if found.seeded {
        debug!(stream, key, "Seeded cursor");
        report.entities_seeded += 1;
    }
    if found.possible_gap {
        warn!(
            stream,
            key,
            count = found.new_items.len(),
            "Entire page was new, some items may have been missed"
        );
        report.gap_warnings += 1;
    }
    report.new_items += found.new_items.len();
}

fn skip_entity(report: &mut CycleReport, stream: &str, key: &str, e: &StoreError) {
    error!(stream, key, error = %e, "Unreadable entity, skipping it this cycle");
    report.entities_failed += 1;
    report.store_errors.push(format!("{} {}: {}", stream, key, e));
}

fn record_store_failure(report: &mut CycleReport, pass: &str, e: &StoreError) {
    error!(cycle = report.cycle, pass, error = %e, "Store failure, ending pass early");
    report.store_errors.push(format!("{}: {}", pass, e));
}

/// Handle to a running poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    reports: watch::Receiver<CycleReport>,
    state: Arc<Mutex<PollerState>>,
}

impl PollerHandle {
    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    /// Receiver of the latest cycle report.
    pub fn reports(&self) -> watch::Receiver<CycleReport> {
        self.reports.clone()
    }

    /// Ask the poller to stop and wait until the task has exited. A cycle in
    /// progress finishes first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Poller task ended abnormally");
        }
        *self.state.lock() = PollerState::Stopped;
    }
}
