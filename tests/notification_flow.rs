//! Fan-out behavior across triggers, recipients, and failures.

mod common;

use common::{journal, open_store, submission, FakeMessenger, FakeSource, Sent};
use pollwatch::{
    ContentSource, ItemId, ItemKey, Messenger, Notification, Notifier, ParseMode, Store,
    SubscriberId, SubscriptionKind, Trigger,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: Arc<Store>,
    source: Arc<FakeSource>,
    messenger: Arc<FakeMessenger>,
    notifier: Notifier,
}

fn fixture(caption_limit: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let source = FakeSource::new();
    let messenger = FakeMessenger::new();
    let notifier = Notifier::new(
        Arc::clone(&store),
        Arc::clone(&source) as Arc<dyn ContentSource>,
        Arc::clone(&messenger) as Arc<dyn Messenger>,
        1000,
        caption_limit,
    );
    Fixture {
        _dir: dir,
        store,
        source,
        messenger,
        notifier,
    }
}

fn recipients(ids: &[i64]) -> BTreeSet<SubscriberId> {
    ids.iter().copied().map(SubscriberId).collect()
}

#[tokio::test]
async fn test_same_submission_from_search_and_account_sent_once() {
    let f = fixture(200);
    let id = SubscriberId(1);
    f.store.activate_subscriber(id, "amy").unwrap();
    f.store
        .add_subscriber(SubscriptionKind::Search, id, "fox")
        .unwrap();
    f.store
        .add_subscriber(SubscriptionKind::AccountSubmissions, id, "artist")
        .unwrap();

    let item = submission(77, "artist");
    let report = f
        .notifier
        .announce_submissions(Trigger::Search("fox"), &[&item], &recipients(&[1]))
        .await;
    assert_eq!(report.delivered, 1);

    let report = f
        .notifier
        .announce_submissions(
            Trigger::AccountSubmissions("artist"),
            &[&item],
            &recipients(&[1]),
        )
        .await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.duplicates, 1);
    assert_eq!(f.messenger.sent_to(id).len(), 1);
}

#[tokio::test]
async fn test_journal_and_submission_ids_do_not_collide() {
    let f = fixture(200);
    let id = SubscriberId(1);
    f.store.activate_subscriber(id, "amy").unwrap();

    let s = submission(5, "artist");
    let j = journal(5, "artist");
    f.notifier
        .announce_submissions(Trigger::AccountSubmissions("artist"), &[&s], &recipients(&[1]))
        .await;
    let report = f.notifier.announce_journals(&[&j], &recipients(&[1])).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(f.messenger.sent_to(id).len(), 2);
}

#[tokio::test]
async fn test_blocked_recipient_marked_unreachable_and_others_still_served() {
    let f = fixture(200);
    for (raw, name) in [(1, "amy"), (2, "bo"), (3, "cy")] {
        f.store.activate_subscriber(SubscriberId(raw), name).unwrap();
    }
    f.messenger.block(SubscriberId(2));

    let first = submission(10, "artist");
    let report = f
        .notifier
        .announce_submissions(Trigger::Search("fox"), &[&first], &recipients(&[1, 2, 3]))
        .await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.newly_unreachable, 1);

    let stored = f.store.get_subscriber(SubscriberId(2)).unwrap().unwrap();
    assert!(stored.is_unreachable());
    assert!(stored.started);

    // Later items skip the unreachable recipient without trying.
    let attempts = f.messenger.attempts();
    let second = submission(11, "artist");
    let report = f
        .notifier
        .announce_submissions(Trigger::Search("fox"), &[&second], &recipients(&[1, 2, 3]))
        .await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.skipped_unreachable, 1);
    assert_eq!(f.messenger.attempts(), attempts + 2);
}

#[tokio::test]
async fn test_transient_failure_does_not_mark_unreachable() {
    let f = fixture(200);
    let id = SubscriberId(4);
    f.store.activate_subscriber(id, "dee").unwrap();
    f.messenger.make_flaky(id);

    let item = submission(1, "artist");
    let report = f
        .notifier
        .announce_submissions(Trigger::Search("fox"), &[&item], &recipients(&[4]))
        .await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.newly_unreachable, 0);
    assert!(!f.store.get_subscriber(id).unwrap().unwrap().is_unreachable());
}

#[tokio::test]
async fn test_stopped_and_unknown_recipients_skipped() {
    let f = fixture(200);
    f.store.activate_subscriber(SubscriberId(1), "amy").unwrap();
    f.store.activate_subscriber(SubscriberId(2), "bo").unwrap();
    f.store.deactivate_subscriber(SubscriberId(2)).unwrap();

    let item = submission(1, "artist");
    let report = f
        .notifier
        .announce_submissions(Trigger::Search("fox"), &[&item], &recipients(&[1, 2, 99]))
        .await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped_inactive, 2);
    assert_eq!(f.messenger.sent().len(), 1);
}

#[tokio::test]
async fn test_preview_sent_as_media_with_truncated_caption() {
    let f = fixture(20);
    let id = SubscriberId(1);
    f.store.activate_subscriber(id, "amy").unwrap();

    let mut item = submission(3, "artist");
    item.title = "A rather long title that will not fit".to_string();
    f.source.set_preview(3, vec![0u8; 64]);

    f.notifier
        .announce_submissions(Trigger::Search("fox"), &[&item], &recipients(&[1]))
        .await;

    let sent = f.messenger.sent_to(id);
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        Sent::Media { bytes, caption, .. } => {
            assert_eq!(*bytes, 64);
            assert!(caption.starts_with("<b>Search:</b>"));
            assert!(caption.len() < 60);
        }
        other => panic!("expected media, got {other:?}"),
    }
}

#[tokio::test]
async fn test_preview_failure_falls_back_to_full_text() {
    let f = fixture(20);
    let id = SubscriberId(1);
    f.store.activate_subscriber(id, "amy").unwrap();

    let with_preview = submission(1, "artist");
    let broken = submission(2, "artist");
    f.source.set_preview(1, vec![1, 2, 3]);
    f.source.fail_preview(2);

    let report = f
        .notifier
        .announce_submissions(
            Trigger::AccountSubmissions("artist"),
            &[&with_preview, &broken],
            &recipients(&[1]),
        )
        .await;
    assert_eq!(report.delivered, 2);

    let sent = f.messenger.sent_to(id);
    assert!(matches!(sent[0], Sent::Media { .. }));
    match &sent[1] {
        Sent::Text { text, .. } => {
            assert!(text.contains("Piece 2"));
            assert!(text.contains("https://www.furaffinity.net/view/2/"));
        }
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn test_items_delivered_in_given_order() {
    let f = fixture(200);
    let id = SubscriberId(1);
    f.store.activate_subscriber(id, "amy").unwrap();

    let older = submission(52, "artist");
    let newer = submission(55, "artist");
    f.notifier
        .announce_submissions(
            Trigger::AccountSubmissions("artist"),
            &[&older, &newer],
            &recipients(&[1]),
        )
        .await;

    let bodies: Vec<String> = f
        .messenger
        .sent_to(id)
        .iter()
        .map(|s| s.body().to_string())
        .collect();
    assert!(bodies[0].contains("Piece 52"));
    assert!(bodies[1].contains("Piece 55"));
}

#[tokio::test]
async fn test_html_in_titles_escaped() {
    let f = fixture(200);
    let id = SubscriberId(1);
    f.store.activate_subscriber(id, "amy").unwrap();

    let mut item = submission(9, "a<b");
    item.title = "Cats & <dogs>".to_string();
    f.notifier
        .announce_submissions(Trigger::Search("fox"), &[&item], &recipients(&[1]))
        .await;

    let sent = f.messenger.sent_to(id);
    let body = sent[0].body();
    assert!(body.contains("Cats &amp; &lt;dogs&gt;"));
    assert!(body.contains("a&lt;b"));
}

#[tokio::test]
async fn test_plain_caption_cut_by_characters() {
    let f = fixture(10);
    let id = SubscriberId(1);
    f.store.activate_subscriber(id, "amy").unwrap();

    let notification = Notification {
        item: ItemKey::submission(ItemId(4)),
        text: "<b>not markup</b> here".to_string(),
        mode: ParseMode::Plain,
        preview: Some(Arc::new(vec![0u8; 8])),
    };
    let report = f.notifier.fan_out(&notification, &recipients(&[1])).await;
    assert_eq!(report.delivered, 1);

    match &f.messenger.sent_to(id)[0] {
        Sent::Media { caption, .. } => assert_eq!(caption, "<b>not mar"),
        other => panic!("expected media, got {other:?}"),
    }
}
