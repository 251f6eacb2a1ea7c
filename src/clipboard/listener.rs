//! 剪贴板监听器
//!
//! # 设计思路
//!
//! 按固定间隔轮询宿主的变化计数，计数变化时串行执行整条流水线：
//! 隐私过滤 → 分类 → 去重 → 写入存储。
//!
//! 状态机：`Idle → Polling → Detected → Dispatching → Polling`，`stop` 进入 `Stopped`，
//! 再次 `start` 回到 `Polling`。
//!
//! # 实现思路
//!
//! - 流水线状态（上次计数、最近窗口）由一把互斥锁保护，同一时刻只有一轮在处理。
//! - 轮询任务逐个等待每一轮完成后才进入下一次 tick，长耗时的一轮只会推迟后续 tick。
//! - 读取失败或存储失败时不推进计数，下一次 tick 自然重试。
//! - 本应用自身写入剪贴板（粘贴注入）的内容照常捕获，由去重合并为一次刷新。

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::{ClipboardEntry, HistoryStore, WriteOutcome};
use crate::error::AppError;
use crate::settings::{self, EngineSettings};

use super::classifier::{Classification, ContentClassifier};
use super::code_detection::CodeDetector;
use super::dedup::{Candidate, CanonicalKey, DedupDecision, Deduplicator, RecentEntry, RecentWindow, canonical_key};
use super::theme::derive_theme_color;
use super::{ClipboardHost, ClipboardSnapshot};

/// 监听器配置
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub recapture_tolerance: chrono::Duration,
    pub recent_window_size: usize,
    pub code_detection_threshold: usize,
    pub privacy_denylist: BTreeSet<String>,
}

impl WatcherConfig {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            recapture_tolerance: settings.recapture_tolerance(),
            recent_window_size: settings.recent_window_size,
            code_detection_threshold: settings.code_detection_threshold,
            privacy_denylist: settings.privacy_denylist.clone(),
        }
    }

    fn is_denylisted(&self, app_id: Option<&str>) -> bool {
        settings::denylist_contains(&self.privacy_denylist, app_id)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Polling,
    Detected,
    Dispatching,
    Stopped,
}

/// 单轮轮询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// 变化计数未变
    Unchanged,
    /// 剪贴板暂不可读，本轮跳过
    Unreadable,
    /// 计数变化但没有可用表示
    NoContent,
    /// 来源应用在隐私名单中，内容未分类、未持久化
    PrivacyBlocked,
    /// 去重判定跳过（过期的重复通知）
    Skipped,
    Inserted(String),
    Refreshed(String),
    /// 存储失败，下一次 tick 重试
    Failed,
}

struct PipelineState {
    last_change_count: Option<i64>,
    window: RecentWindow,
}

struct WatcherCore {
    host: Arc<dyn ClipboardHost>,
    store: Arc<HistoryStore>,
    classifier: ContentClassifier,
    dedup: Deduplicator,
    config: WatcherConfig,
    state: Mutex<WatcherState>,
    pipeline: Mutex<PipelineState>,
}

fn lock_recover<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("{}锁中毒，继续使用恢复数据", name);
        poisoned.into_inner()
    })
}

impl WatcherCore {
    fn state(&self) -> WatcherState {
        *lock_recover(&self.state, "监听状态")
    }

    fn set_state(&self, next: WatcherState) {
        *lock_recover(&self.state, "监听状态") = next;
    }

    /// 仅在运行中切换处理阶段，`Idle` / `Stopped` 保持不变
    fn enter_stage(&self, stage: WatcherState) {
        let mut state = lock_recover(&self.state, "监听状态");
        if matches!(*state, WatcherState::Polling | WatcherState::Detected | WatcherState::Dispatching) {
            *state = stage;
        }
    }

    fn poll_once(&self) -> CaptureOutcome {
        let mut pipeline = lock_recover(&self.pipeline, "流水线");

        let change_count = match self.host.current_change_count() {
            Ok(count) => count,
            Err(e) => {
                log::debug!("读取剪贴板变化计数失败: {}", e);
                return CaptureOutcome::Unreadable;
            }
        };
        if pipeline.last_change_count == Some(change_count) {
            return CaptureOutcome::Unchanged;
        }

        self.enter_stage(WatcherState::Detected);
        let snapshot = match self.host.current_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                pipeline.last_change_count = Some(change_count);
                self.enter_stage(WatcherState::Polling);
                return CaptureOutcome::NoContent;
            }
            Err(e) => {
                log::debug!("剪贴板暂不可读，跳过本轮: {}", e);
                self.enter_stage(WatcherState::Polling);
                return CaptureOutcome::Unreadable;
            }
        };

        self.enter_stage(WatcherState::Dispatching);
        let outcome = match self.dispatch(&mut pipeline.window, snapshot) {
            Ok(outcome) => {
                pipeline.last_change_count = Some(change_count);
                outcome
            }
            Err(e) => {
                log::warn!("处理剪贴板内容失败，等待下一轮重试: {}", e);
                CaptureOutcome::Failed
            }
        };
        self.enter_stage(WatcherState::Polling);
        outcome
    }

    fn dispatch(&self, window: &mut RecentWindow, snapshot: ClipboardSnapshot) -> Result<CaptureOutcome, AppError> {
        if self.config.is_denylisted(snapshot.source_app_id.as_deref()) {
            log::debug!(
                "🔒 来源应用在隐私名单中，忽略: {}",
                snapshot.source_app_id.as_deref().unwrap_or_default()
            );
            return Ok(CaptureOutcome::PrivacyBlocked);
        }

        let classification = self.classifier.classify(&snapshot.payload);
        let key = canonical_key(&snapshot.payload, &classification);
        let now = self.store.now();

        if !window.contains(&key) {
            if let Some(existing) = self.store.find_live_by_key(&key)? {
                window.remember(
                    key.clone(),
                    RecentEntry { id: existing.id, last_captured_at: existing.last_captured_at },
                );
            }
        }

        let candidate = Candidate { key: key.clone(), captured_at: now };
        match self.dedup.consider(&candidate, window) {
            DedupDecision::Skip => Ok(CaptureOutcome::Skipped),
            DedupDecision::Insert => self.insert_new(window, snapshot, &classification, key, now),
            DedupDecision::RefreshTimestamp { existing_id, within_tolerance } => {
                match self.store.refresh_timestamp(&existing_id, now) {
                    Ok(WriteOutcome::Applied(entry)) => {
                        if within_tolerance {
                            log::trace!("重复通知合并: {}", entry.id);
                        } else {
                            log::debug!("🔁 再次捕获，刷新条目: {}", entry.id);
                        }
                        window.remember(
                            key,
                            RecentEntry { id: entry.id.clone(), last_captured_at: entry.last_captured_at },
                        );
                        Ok(CaptureOutcome::Refreshed(entry.id))
                    }
                    Ok(WriteOutcome::Superseded(_)) | Err(AppError::NotFound(_)) => {
                        window.forget(&key);
                        self.insert_new(window, snapshot, &classification, key, now)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn insert_new(
        &self,
        window: &mut RecentWindow,
        snapshot: ClipboardSnapshot,
        classification: &Classification,
        key: CanonicalKey,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<CaptureOutcome, AppError> {
        let theme_color = derive_theme_color(&snapshot.payload, classification, &key.hash);
        let entry = ClipboardEntry::from_capture(snapshot, classification, &key, theme_color, now);

        match self.store.insert(entry) {
            Ok(stored) => {
                log::info!(
                    "📋 捕获新条目: {} [{}] {}",
                    stored.id,
                    stored.content_type,
                    stored.source_app.as_deref().unwrap_or("未知来源")
                );
                window.remember(key, RecentEntry { id: stored.id.clone(), last_captured_at: stored.last_captured_at });
                Ok(CaptureOutcome::Inserted(stored.id))
            }
            Err(AppError::DuplicateEntry(_)) => {
                // 窗口未命中期间已有其他写入者插入同内容
                let existing = self
                    .store
                    .find_live_by_key(&key)?
                    .ok_or_else(|| AppError::Persistence("唯一约束冲突但未找到同内容条目".to_string()))?;
                let refreshed = self.store.refresh_timestamp(&existing.id, now)?;
                let entry = refreshed.entry();
                window.remember(key, RecentEntry { id: entry.id.clone(), last_captured_at: entry.last_captured_at });
                Ok(CaptureOutcome::Refreshed(entry.id.clone()))
            }
            Err(e) => Err(e),
        }
    }
}

struct PollTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// 剪贴板监听器
pub struct PasteboardWatcher {
    core: Arc<WatcherCore>,
    task: Mutex<Option<PollTask>>,
}

impl PasteboardWatcher {
    pub fn new(host: Arc<dyn ClipboardHost>, store: Arc<HistoryStore>, config: WatcherConfig) -> Self {
        let core = WatcherCore {
            host,
            store,
            classifier: ContentClassifier::new(CodeDetector::new(config.code_detection_threshold)),
            dedup: Deduplicator::new(config.recapture_tolerance),
            pipeline: Mutex::new(PipelineState {
                last_change_count: None,
                window: RecentWindow::new(config.recent_window_size),
            }),
            state: Mutex::new(WatcherState::Idle),
            config,
        };
        Self { core: Arc::new(core), task: Mutex::new(None) }
    }

    pub fn state(&self) -> WatcherState {
        self.core.state()
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state(), WatcherState::Idle | WatcherState::Stopped)
    }

    /// 立即执行一轮（与后台任务互斥）
    pub fn poll_once(&self) -> CaptureOutcome {
        self.core.poll_once()
    }

    /// 条目被删除或清除后调用，使其不再参与去重
    pub fn forget_entry(&self, id: &str) {
        lock_recover(&self.core.pipeline, "流水线").window.forget_id(id);
    }

    /// 在当前 tokio 运行时中启动轮询；已在运行时为空操作
    pub fn start(&self) -> Result<(), AppError> {
        let mut task = lock_recover(&self.task, "轮询任务");
        if let Some(existing) = task.as_ref() {
            if !existing.stop.load(Ordering::Acquire) && !existing.handle.is_finished() {
                log::debug!("剪贴板监听已在运行");
                return Ok(());
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::Config(format!("剪贴板监听需要 tokio 运行时: {}", e)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let core = Arc::clone(&self.core);
        let stop_flag = Arc::clone(&stop);
        let interval = self.core.config.poll_interval;

        self.core.set_state(WatcherState::Polling);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                let core = Arc::clone(&core);
                let cycle_stop = Arc::clone(&stop_flag);
                let result = tokio::task::spawn_blocking(move || {
                    if cycle_stop.load(Ordering::Acquire) {
                        return None;
                    }
                    Some(core.poll_once())
                })
                .await;
                match result {
                    Ok(Some(outcome)) => log::trace!("轮询结果: {:?}", outcome),
                    Ok(None) => break,
                    Err(e) => log::error!("剪贴板轮询任务异常: {}", e),
                }
            }
        });

        *task = Some(PollTask { stop, handle });
        log::info!("👀 剪贴板监听已启动，间隔 {}ms", interval.as_millis());
        Ok(())
    }

    /// 停止轮询，下一次 tick 之前生效；可再次 `start`
    pub fn stop(&self) {
        let mut task = lock_recover(&self.task, "轮询任务");
        if let Some(running) = task.take() {
            running.stop.store(true, Ordering::Release);
            running.handle.abort();
            log::info!("剪贴板监听已停止");
        }
        self.core.set_state(WatcherState::Stopped);
    }
}

impl Drop for PasteboardWatcher {
    fn drop(&mut self) {
        if let Some(running) = lock_recover(&self.task, "轮询任务").take() {
            running.stop.store(true, Ordering::Release);
            running.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clipboard::ClipboardPayload;
    use crate::clipboard::classifier::ContentType;
    use crate::clock::{Clock, ManualClock};
    use crate::db::{EntryQuery, SqliteRepository};
    use crate::fakes::{FlakyRepository, MemoryClipboard};

    fn setup() -> (PasteboardWatcher, Arc<MemoryClipboard>, Arc<HistoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).single().expect("valid time"),
        ));
        let repo = Arc::new(SqliteRepository::open_in_memory().expect("open repo"));
        let store = Arc::new(HistoryStore::new(repo, clock.clone()));
        let clipboard = Arc::new(MemoryClipboard::new());
        let config = WatcherConfig { poll_interval: Duration::from_millis(10), ..WatcherConfig::default() };
        let watcher = PasteboardWatcher::new(clipboard.clone(), store.clone(), config);
        (watcher, clipboard, store, clock)
    }

    #[test]
    fn new_content_is_inserted_once() {
        let (watcher, clipboard, store, _) = setup();
        clipboard.copy_text("hello");

        assert!(matches!(watcher.poll_once(), CaptureOutcome::Inserted(_)));
        assert_eq!(watcher.poll_once(), CaptureOutcome::Unchanged);
        assert_eq!(store.query(&EntryQuery::visible()).expect("query").len(), 1);
    }

    #[test]
    fn recopy_refreshes_existing_entry() {
        let (watcher, clipboard, store, clock) = setup();
        clipboard.copy_text("hello");
        let CaptureOutcome::Inserted(id) = watcher.poll_once() else {
            panic!("expected insert");
        };

        clock.advance(chrono::Duration::seconds(30));
        clipboard.copy_text("  hello \n");
        assert_eq!(watcher.poll_once(), CaptureOutcome::Refreshed(id.clone()));

        let entry = store.get(&id).expect("entry");
        assert_eq!(entry.last_captured_at, clock.now());
        assert!(entry.created_at < entry.last_captured_at);
    }

    #[test]
    fn denylisted_source_is_never_stored() {
        let (watcher, clipboard, store, _) = setup();
        clipboard.copy(
            ClipboardSnapshot::new(ClipboardPayload::Text("hunter2".into()))
                .with_source("1Password", "com.1password.1password"),
        );

        assert_eq!(watcher.poll_once(), CaptureOutcome::PrivacyBlocked);
        assert!(store.query(&EntryQuery::visible()).expect("query").is_empty());
    }

    #[test]
    fn empty_source_id_is_not_blocked_by_empty_denylist_item() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).single().expect("valid time"),
        ));
        let repo = Arc::new(SqliteRepository::open_in_memory().expect("open repo"));
        let store = Arc::new(HistoryStore::new(repo, clock));
        let clipboard = Arc::new(MemoryClipboard::new());
        let mut config = WatcherConfig::default();
        config.privacy_denylist.insert(String::new());
        let watcher = PasteboardWatcher::new(clipboard.clone(), store, config.clone());

        clipboard.copy(ClipboardSnapshot::new(ClipboardPayload::Text("note".into())).with_source("Unknown", ""));
        assert!(matches!(watcher.poll_once(), CaptureOutcome::Inserted(_)));

        let mut settings = EngineSettings::default();
        settings.privacy_denylist = config.privacy_denylist.clone();
        assert_eq!(settings.is_denylisted(Some("")), config.is_denylisted(Some("")));
    }

    #[test]
    fn unreadable_clipboard_retries_next_tick() {
        let (watcher, clipboard, _, _) = setup();
        clipboard.copy_text("hello");
        clipboard.set_unreadable(true);
        assert_eq!(watcher.poll_once(), CaptureOutcome::Unreadable);

        clipboard.set_unreadable(false);
        assert!(matches!(watcher.poll_once(), CaptureOutcome::Inserted(_)));
    }

    #[test]
    fn blank_text_is_stored_like_any_text() {
        let (watcher, clipboard, store, _) = setup();
        clipboard.clear();
        assert_eq!(watcher.poll_once(), CaptureOutcome::NoContent);

        clipboard.copy_text("   ");
        let CaptureOutcome::Inserted(id) = watcher.poll_once() else {
            panic!("expected insert");
        };
        let entry = store.get(&id).expect("entry");
        assert_eq!(entry.content_type, ContentType::Text);
        assert_eq!(entry.payload, ClipboardPayload::Text("   ".into()));
    }

    #[test]
    fn trashed_content_is_captured_as_new_entry() {
        let (watcher, clipboard, store, clock) = setup();
        clipboard.copy_text("hello");
        let CaptureOutcome::Inserted(first) = watcher.poll_once() else {
            panic!("expected insert");
        };

        clock.advance(chrono::Duration::seconds(5));
        store.trash(&first).expect("trash");
        clock.advance(chrono::Duration::seconds(5));
        clipboard.copy_text("hello");

        let CaptureOutcome::Inserted(second) = watcher.poll_once() else {
            panic!("expected fresh insert");
        };
        assert_ne!(first, second);
        assert!(store.get(&first).expect("old").is_trashed());
    }

    #[test]
    fn persistence_failure_is_retried() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).single().expect("valid time"),
        ));
        let repo = Arc::new(FlakyRepository::new().expect("open repo"));
        let store = Arc::new(HistoryStore::new(repo.clone(), clock));
        let clipboard = Arc::new(MemoryClipboard::new());
        let watcher = PasteboardWatcher::new(clipboard.clone(), store.clone(), WatcherConfig::default());

        repo.set_failing(true);
        clipboard.copy_text("hello");
        assert_eq!(watcher.poll_once(), CaptureOutcome::Failed);

        repo.set_failing(false);
        assert!(matches!(watcher.poll_once(), CaptureOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn start_stop_restart() {
        let (watcher, clipboard, store, _) = setup();
        assert_eq!(watcher.state(), WatcherState::Idle);

        watcher.start().expect("start");
        watcher.start().expect("second start is a no-op");
        assert!(watcher.is_running());

        clipboard.copy_text("first");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.query(&EntryQuery::visible()).expect("query").len(), 1);

        watcher.stop();
        assert_eq!(watcher.state(), WatcherState::Stopped);
        clipboard.copy_text("second");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.query(&EntryQuery::visible()).expect("query").len(), 1);

        watcher.start().expect("restart");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.query(&EntryQuery::visible()).expect("query").len(), 2);
        watcher.stop();
    }
}
