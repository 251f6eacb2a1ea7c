// 端到端捕获流水线：内存剪贴板 → 监听器 → SQLite 历史库
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use clipboard_keeper::clipboard::classifier::ContentType;
use clipboard_keeper::clipboard::listener::{CaptureOutcome, PasteboardWatcher, WatcherConfig};
use clipboard_keeper::clipboard::{ClipboardPayload, ClipboardSnapshot};
use clipboard_keeper::clock::{Clock, ManualClock};
use clipboard_keeper::db::{ClipboardEntry, EntryQuery, EntryScope, HistoryStore, SqliteRepository};
use clipboard_keeper::fakes::{FlakyRepository, MemoryClipboard};

struct Harness {
    clipboard: Arc<MemoryClipboard>,
    clock: Arc<ManualClock>,
    store: Arc<HistoryStore>,
    watcher: PasteboardWatcher,
}

fn harness() -> Harness {
    let clipboard = Arc::new(MemoryClipboard::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    let repo = Arc::new(SqliteRepository::open_in_memory().expect("open db"));
    let store = Arc::new(HistoryStore::new(repo, clock.clone()));
    let watcher = PasteboardWatcher::new(clipboard.clone(), store.clone(), WatcherConfig::default());
    Harness { clipboard, clock, store, watcher }
}

fn visible(store: &HistoryStore) -> Vec<ClipboardEntry> {
    store.query(&EntryQuery::visible()).expect("query")
}

#[test]
fn link_capture_records_source_app() {
    let h = harness();
    h.clipboard.copy(
        ClipboardSnapshot::new(ClipboardPayload::Text("https://example.com".into()))
            .with_source("Safari", "com.apple.Safari"),
    );

    let outcome = h.watcher.poll_once();
    let CaptureOutcome::Inserted(id) = outcome else {
        panic!("expected insert, got {:?}", outcome);
    };

    let entry = h.store.get(&id).expect("entry");
    assert_eq!(entry.content_type, ContentType::Link);
    assert_eq!(entry.source_app.as_deref(), Some("Safari"));
    assert_eq!(entry.title.as_deref(), Some("example.com"));
    assert!(!entry.is_trashed());
}

#[test]
fn color_recapture_refreshes_single_entry() {
    let h = harness();
    h.clipboard.copy_text("#1A2b3C");
    assert!(matches!(h.watcher.poll_once(), CaptureOutcome::Inserted(_)));

    h.clock.advance(Duration::seconds(2));
    let second_capture = h.clock.now();
    h.clipboard.copy_text("#1a2b3c");
    assert!(matches!(h.watcher.poll_once(), CaptureOutcome::Refreshed(_)));

    let entries = visible(&h.store);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content_type, ContentType::Color);
    assert_eq!(entries[0].title.as_deref(), Some("#1a2b3c"));
    assert_eq!(entries[0].theme_color, "#1a2b3c");
    assert_eq!(entries[0].last_captured_at, second_capture);
    assert!(entries[0].created_at < entries[0].last_captured_at);
}

#[test]
fn denylisted_source_never_reaches_history() {
    let h = harness();
    for secret in ["hunter2", "https://vault.example.com", "#ffffff"] {
        h.clipboard.copy(
            ClipboardSnapshot::new(ClipboardPayload::Text(secret.into()))
                .with_source("1Password", "com.1password.1password"),
        );
        assert_eq!(h.watcher.poll_once(), CaptureOutcome::PrivacyBlocked);
    }

    let all = EntryQuery { scope: EntryScope::All, ..EntryQuery::default() };
    assert!(h.store.query(&all).expect("query").is_empty());
}

#[test]
fn identical_capture_twice_yields_one_entry() {
    let h = harness();
    h.clipboard.copy_text("meeting at 10");
    let first = h.watcher.poll_once();
    h.clock.advance(Duration::milliseconds(300));
    h.clipboard.copy_text("meeting at 10");
    let second = h.watcher.poll_once();

    let (CaptureOutcome::Inserted(a), CaptureOutcome::Refreshed(b)) = (first, second) else {
        panic!("expected insert then refresh");
    };
    assert_eq!(a, b);
    assert_eq!(visible(&h.store).len(), 1);
}

#[test]
fn unchanged_counter_does_nothing() {
    let h = harness();
    h.clipboard.copy_text("hello");
    h.watcher.poll_once();
    assert_eq!(h.watcher.poll_once(), CaptureOutcome::Unchanged);
}

#[test]
fn trashed_content_copied_again_creates_fresh_entry() {
    let h = harness();
    h.clipboard.copy_text("draft text");
    let CaptureOutcome::Inserted(original) = h.watcher.poll_once() else {
        panic!("expected insert");
    };
    h.clock.advance(Duration::seconds(1));
    h.store.trash(&original).expect("trash");

    h.clock.advance(Duration::seconds(1));
    h.clipboard.copy_text("draft text");
    let CaptureOutcome::Inserted(fresh) = h.watcher.poll_once() else {
        panic!("expected a fresh insert");
    };

    assert_ne!(original, fresh);
    assert!(h.store.get(&original).expect("trashed entry").is_trashed());
    assert_eq!(visible(&h.store).len(), 1);
}

#[test]
fn unreadable_clipboard_is_retried_next_tick() {
    let h = harness();
    h.clipboard.copy_text("busy");
    h.clipboard.set_unreadable(true);
    assert_eq!(h.watcher.poll_once(), CaptureOutcome::Unreadable);

    h.clipboard.set_unreadable(false);
    assert!(matches!(h.watcher.poll_once(), CaptureOutcome::Inserted(_)));
}

#[test]
fn clipboard_without_representation_is_not_persisted() {
    let h = harness();
    h.clipboard.clear();
    assert_eq!(h.watcher.poll_once(), CaptureOutcome::NoContent);
    assert!(visible(&h.store).is_empty());
}

#[test]
fn empty_and_blank_text_share_one_text_entry() {
    let h = harness();
    h.clipboard.copy_text("");
    let CaptureOutcome::Inserted(id) = h.watcher.poll_once() else {
        panic!("expected empty text to be inserted");
    };
    let entry = h.store.get(&id).expect("entry");
    assert_eq!(entry.content_type, ContentType::Text);
    assert_eq!(entry.payload, ClipboardPayload::Text(String::new()));

    h.clock.advance(Duration::seconds(1));
    h.clipboard.copy_text("   ");
    assert_eq!(h.watcher.poll_once(), CaptureOutcome::Refreshed(id.clone()));

    let entries = visible(&h.store);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, id);
    assert_eq!(entries[0].last_captured_at, h.clock.now());
}

#[test]
fn persistence_failure_aborts_only_that_cycle() {
    let clipboard = Arc::new(MemoryClipboard::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    let repo = Arc::new(FlakyRepository::new().expect("repo"));
    let store = Arc::new(HistoryStore::new(repo.clone(), clock));
    let watcher = PasteboardWatcher::new(clipboard.clone(), store.clone(), WatcherConfig::default());

    clipboard.copy_text("important");
    repo.set_failing(true);
    assert_eq!(watcher.poll_once(), CaptureOutcome::Failed);

    repo.set_failing(false);
    assert!(matches!(watcher.poll_once(), CaptureOutcome::Inserted(_)));
    assert_eq!(store.list_recent(10).expect("recent").len(), 1);
}

#[test]
fn files_and_images_are_classified_by_payload_kind() {
    let h = harness();
    h.clipboard.copy(ClipboardSnapshot::new(ClipboardPayload::Files(vec![
        "/tmp/a.txt".into(),
        "/tmp/b.txt".into(),
    ])));
    let CaptureOutcome::Inserted(files_id) = h.watcher.poll_once() else {
        panic!("expected insert");
    };
    assert_eq!(h.store.get(&files_id).expect("files").content_type, ContentType::File);

    h.clipboard.copy(ClipboardSnapshot::new(ClipboardPayload::Image(
        clipboard_keeper::clipboard::ImagePayload {
            bytes: vec![255, 0, 0, 255].repeat(4),
            width: 2,
            height: 2,
            encoding: clipboard_keeper::clipboard::ImageEncoding::RawRgba,
        },
    )));
    let CaptureOutcome::Inserted(image_id) = h.watcher.poll_once() else {
        panic!("expected insert");
    };
    let image = h.store.get(&image_id).expect("image");
    assert_eq!(image.content_type, ContentType::Image);
    assert_eq!(image.theme_color, "#ff0000");
}
