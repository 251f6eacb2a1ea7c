//! 生命周期管理
//!
//! # 设计思路
//!
//! 周期性扫描历史，执行两类保留策略：
//! - **清除**：在回收站中超过保留期、且未锁定未置顶的条目永久删除
//! - **自动回收**（可选）：超过宽限期未再捕获的普通条目移入回收站，
//!   收藏、置顶、锁定的条目不受影响
//!
//! 扫描永远不会删除锁定条目，也不会作用于未删除条目（自动回收只是移入回收站）。
//!
//! # 实现思路
//!
//! - 先按时间条件查询候选，再对每条在删除事务内复核资格，
//!   与并发的锁定、恢复操作交错时以事务内的最新状态为准。
//! - 单条失败只记录日志并继续，整轮扫描失败等待下一次调度。
//! - 调度任务跑在 tokio 上，扫描本身通过 `spawn_blocking` 执行。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::{ClipboardEntry, EntryQuery, EntryScope, HistoryStore, NoteEntry};
use crate::error::AppError;
use crate::settings::EngineSettings;

/// 保留策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// 回收站条目的保留期，从 `trashed_at` 起算
    pub retention_period: chrono::Duration,
    /// 未再捕获多久后自动移入回收站；`None` 表示关闭
    pub trash_grace_period: Option<chrono::Duration>,
}

impl RetentionPolicy {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            retention_period: chrono::Duration::days(i64::from(settings.retention_period_days)),
            trash_grace_period: settings
                .trash_grace_period_days
                .map(|days| chrono::Duration::days(i64::from(days))),
        }
    }

    /// 可永久删除：在回收站中、未锁定、未置顶，且已超过保留期
    pub fn is_purge_eligible(&self, entry: &ClipboardEntry, now: DateTime<Utc>) -> bool {
        match entry.trashed_at {
            Some(trashed_at) => {
                !entry.is_locked && !entry.is_pinned && now - trashed_at >= self.retention_period
            }
            None => false,
        }
    }

    /// 可自动回收：未删除的普通条目，且超过宽限期未再捕获
    pub fn is_auto_trash_eligible(&self, entry: &ClipboardEntry, now: DateTime<Utc>) -> bool {
        let Some(grace) = self.trash_grace_period else {
            return false;
        };
        !entry.is_trashed()
            && !entry.is_locked
            && !entry.is_pinned
            && !entry.is_favorite
            && now - entry.last_captured_at >= grace
    }

    pub fn is_note_purge_eligible(&self, note: &NoteEntry, now: DateTime<Utc>) -> bool {
        match note.trashed_at {
            Some(trashed_at) => !note.is_locked && !note.is_pinned && now - trashed_at >= self.retention_period,
            None => false,
        }
    }
}

/// 单轮扫描统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub purged: Vec<String>,
    pub auto_trashed: Vec<String>,
    pub notes_purged: usize,
    /// 单条处理失败的数量
    pub failures: usize,
}

pub struct LifecycleManager {
    store: Arc<HistoryStore>,
    policy: RetentionPolicy,
    on_removed: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl LifecycleManager {
    pub fn new(store: Arc<HistoryStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy, on_removed: None }
    }

    /// 条目被移入回收站或清除后的通知（监听器据此更新去重窗口）
    pub fn with_removal_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_removed = Some(Box::new(hook));
        self
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// 当前可永久删除的条目
    pub fn purge_candidates(&self, now: DateTime<Utc>) -> Result<Vec<ClipboardEntry>, AppError> {
        let query = EntryQuery {
            scope: EntryScope::Trashed,
            exclude_locked: true,
            exclude_pinned: true,
            trashed_before: Some(now - self.policy.retention_period),
            ..EntryQuery::default()
        };
        let candidates = self.store.query(&query)?;
        Ok(candidates
            .into_iter()
            .filter(|entry| self.policy.is_purge_eligible(entry, now))
            .collect())
    }

    /// 当前可自动回收的条目；宽限期关闭时为空
    pub fn auto_trash_candidates(&self, now: DateTime<Utc>) -> Result<Vec<ClipboardEntry>, AppError> {
        let Some(grace) = self.policy.trash_grace_period else {
            return Ok(Vec::new());
        };
        let query = EntryQuery {
            scope: EntryScope::Visible,
            exclude_locked: true,
            exclude_pinned: true,
            exclude_favorites: true,
            captured_before: Some(now - grace),
            ..EntryQuery::default()
        };
        let candidates = self.store.query(&query)?;
        Ok(candidates
            .into_iter()
            .filter(|entry| self.policy.is_auto_trash_eligible(entry, now))
            .collect())
    }

    /// 执行一轮扫描
    pub fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport, AppError> {
        let mut report = ScanReport::default();
        let policy = self.policy;

        for entry in self.purge_candidates(now)? {
            match self.store.purge_if(&entry.id, &|current| policy.is_purge_eligible(current, now)) {
                Ok(true) => {
                    self.notify_removed(&entry.id);
                    report.purged.push(entry.id);
                }
                Ok(false) => log::debug!("条目 {} 在扫描期间状态变化，跳过清除", entry.id),
                Err(e) => {
                    log::warn!("清除条目 {} 失败: {}", entry.id, e);
                    report.failures += 1;
                }
            }
        }

        for entry in self.auto_trash_candidates(now)? {
            let guard = |current: &ClipboardEntry| policy.is_auto_trash_eligible(current, now);
            match self.store.trash_if(&entry.id, now, &guard) {
                Ok(Some(outcome)) if outcome.is_applied() => {
                    self.notify_removed(&entry.id);
                    report.auto_trashed.push(entry.id);
                }
                Ok(_) => log::debug!("条目 {} 在扫描期间状态变化，跳过自动回收", entry.id),
                Err(e) => {
                    log::warn!("自动回收条目 {} 失败: {}", entry.id, e);
                    report.failures += 1;
                }
            }
        }

        for note in self.store.list_notes(EntryScope::Trashed)? {
            if !policy.is_note_purge_eligible(&note, now) {
                continue;
            }
            match self.store.purge_note_if(&note.id, &|current| policy.is_note_purge_eligible(current, now)) {
                Ok(true) => report.notes_purged += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("清除笔记 {} 失败: {}", note.id, e);
                    report.failures += 1;
                }
            }
        }

        if !report.purged.is_empty() || !report.auto_trashed.is_empty() || report.notes_purged > 0 {
            log::info!(
                "🧹 生命周期扫描: 清除 {} 条, 自动回收 {} 条, 清除笔记 {} 条",
                report.purged.len(),
                report.auto_trashed.len(),
                report.notes_purged
            );
        }
        Ok(report)
    }

    /// 调度入口：失败只记录日志，等待下一次调度
    pub fn run_scheduled_scan(&self) -> Option<ScanReport> {
        let now = self.store.now();
        match self.scan(now) {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!("生命周期扫描失败，等待下一次调度: {}", e);
                None
            }
        }
    }

    /// 在当前 tokio 运行时中按固定间隔调度扫描，首轮立即执行
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> Result<LifecycleHandle, AppError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::Config(format!("生命周期调度需要 tokio 运行时: {}", e)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let manager = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                let manager = Arc::clone(&manager);
                if let Err(e) = tokio::task::spawn_blocking(move || manager.run_scheduled_scan()).await {
                    log::error!("生命周期扫描任务异常: {}", e);
                }
            }
        });

        log::info!("生命周期扫描已调度，间隔 {}s", interval.as_secs());
        Ok(LifecycleHandle { stop, handle: Mutex::new(Some(handle)) })
    }

    fn notify_removed(&self, id: &str) {
        if let Some(hook) = &self.on_removed {
            hook(id);
        }
    }
}

/// 调度任务句柄；`stop` 后不再触发新的扫描
pub struct LifecycleHandle {
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            log::info!("生命周期扫描已停止");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl Drop for LifecycleHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
