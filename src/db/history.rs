//! 历史存储
//!
//! ## 职责
//! - 条目状态的唯一权威：插入、刷新、标记、回收站、清除与查询
//! - 笔记的增删改查，与条目共享回收站语义
//!
//! ## 并发写入
//! 每次写入都在仓储事务内“读取 → 判定 → 写回”，同一条目的并发写入按
//! 时间戳裁决（最后写入者胜出），落败方得到 `WriteOutcome::Superseded`：
//! - 刷新只作用于未删除条目，且时间戳只前进不后退；
//!   条目已进入回收站时刷新落败，由调用方改为插入新条目
//! - 删除请求早于条目最近一次捕获时落败
//!
//! ## 错误语义
//! - 条目不存在：`AppError::NotFound`
//! - 恢复时已有同内容的未删除条目：`AppError::DuplicateEntry`

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clipboard::dedup::CanonicalKey;
use crate::clock::Clock;
use crate::error::AppError;

use super::repository::{EntryRepository, ModifyOutcome};
use super::{
    ClipboardEntry, EntryQuery, EntryScope, EntrySort, FlagUpdate, NoteEntry, StoreStats, truncate_to_millis,
};

/// 带时间戳写入的裁决结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(ClipboardEntry),
    /// 被更晚的写入覆盖，携带当前状态
    Superseded(ClipboardEntry),
}

impl WriteOutcome {
    pub fn entry(&self) -> &ClipboardEntry {
        match self {
            WriteOutcome::Applied(entry) | WriteOutcome::Superseded(entry) => entry,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }
}

pub struct HistoryStore {
    repo: Arc<dyn EntryRepository>,
    clock: Arc<dyn Clock>,
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("条目 {}", id))
}

impl HistoryStore {
    pub fn new(repo: Arc<dyn EntryRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        truncate_to_millis(self.clock.now())
    }

    // ========================================================================
    // 条目
    // ========================================================================

    /// 插入新条目；同键已有未删除条目时返回 `DuplicateEntry`
    pub fn insert(&self, mut entry: ClipboardEntry) -> Result<ClipboardEntry, AppError> {
        entry.created_at = truncate_to_millis(entry.created_at);
        entry.last_captured_at = truncate_to_millis(entry.last_captured_at);
        entry.trashed_at = entry.trashed_at.map(truncate_to_millis);

        let stored = self.repo.insert_entry(&entry)?;
        log::debug!("新增条目 {} ({}, seq={})", stored.id, stored.content_type, stored.seq);
        Ok(stored)
    }

    /// 再次捕获同内容：`last_captured_at` 取较大值，不改变其他字段
    pub fn refresh_timestamp(&self, id: &str, at: DateTime<Utc>) -> Result<WriteOutcome, AppError> {
        let at = truncate_to_millis(at);
        let mut superseded = false;

        let outcome = self.repo.modify_entry(id, &mut |entry| {
            if entry.is_trashed() {
                superseded = true;
                return false;
            }
            if at <= entry.last_captured_at {
                return false;
            }
            entry.last_captured_at = at;
            true
        })?;

        match outcome {
            ModifyOutcome::NotFound => Err(not_found(id)),
            ModifyOutcome::Unchanged(entry) if superseded => {
                log::debug!("条目 {} 已在回收站，刷新被覆盖", id);
                Ok(WriteOutcome::Superseded(entry))
            }
            ModifyOutcome::Unchanged(entry) | ModifyOutcome::Updated(entry) => Ok(WriteOutcome::Applied(entry)),
        }
    }

    pub fn get(&self, id: &str) -> Result<ClipboardEntry, AppError> {
        self.repo.get_entry(id)?.ok_or_else(|| not_found(id))
    }

    pub fn find_live_by_key(&self, key: &CanonicalKey) -> Result<Option<ClipboardEntry>, AppError> {
        self.repo.find_live_entry(key.content_type, &key.hash)
    }

    pub fn query(&self, query: &EntryQuery) -> Result<Vec<ClipboardEntry>, AppError> {
        self.repo.query_entries(query)
    }

    /// 默认历史列表：未删除、置顶优先、最近优先
    pub fn list_recent(&self, limit: usize) -> Result<Vec<ClipboardEntry>, AppError> {
        self.repo.query_entries(&EntryQuery::visible().with_limit(limit))
    }

    /// 最近一次捕获的未删除条目，不考虑置顶
    pub fn latest(&self) -> Result<Option<ClipboardEntry>, AppError> {
        let query = EntryQuery::visible().with_sort(EntrySort::Recent).with_limit(1);
        Ok(self.repo.query_entries(&query)?.into_iter().next())
    }

    /// 更新收藏 / 置顶 / 锁定；回收站中的条目同样允许
    pub fn set_flags(&self, id: &str, update: FlagUpdate) -> Result<ClipboardEntry, AppError> {
        let outcome = self.repo.modify_entry(id, &mut |entry| {
            let before = (entry.is_favorite, entry.is_pinned, entry.is_locked);
            if let Some(favorite) = update.favorite {
                entry.is_favorite = favorite;
            }
            if let Some(pinned) = update.pinned {
                entry.is_pinned = pinned;
            }
            if let Some(locked) = update.locked {
                entry.is_locked = locked;
            }
            before != (entry.is_favorite, entry.is_pinned, entry.is_locked)
        })?;

        match outcome {
            ModifyOutcome::NotFound => Err(not_found(id)),
            ModifyOutcome::Unchanged(entry) | ModifyOutcome::Updated(entry) => Ok(entry),
        }
    }

    /// 以当前时间移入回收站
    pub fn trash(&self, id: &str) -> Result<WriteOutcome, AppError> {
        self.trash_at(id, self.now())
    }

    /// 在 `at` 时刻移入回收站；已在回收站时保持原 `trashed_at`
    pub fn trash_at(&self, id: &str, at: DateTime<Utc>) -> Result<WriteOutcome, AppError> {
        self.trash_if(id, at, &|_| true)?.ok_or_else(|| not_found(id))
    }

    /// 守卫在事务内复核，拒绝时视为被覆盖；条目不存在时返回 `Ok(None)`
    pub(crate) fn trash_if(
        &self,
        id: &str,
        at: DateTime<Utc>,
        guard: &dyn Fn(&ClipboardEntry) -> bool,
    ) -> Result<Option<WriteOutcome>, AppError> {
        let at = truncate_to_millis(at);
        let mut superseded = false;

        let outcome = self.repo.modify_entry(id, &mut |entry| {
            if entry.is_trashed() {
                return false;
            }
            if !guard(entry) || at < entry.last_captured_at {
                superseded = true;
                return false;
            }
            entry.trashed_at = Some(at);
            true
        })?;

        Ok(match outcome {
            ModifyOutcome::NotFound => None,
            ModifyOutcome::Unchanged(entry) if superseded => {
                log::debug!("条目 {} 的删除请求被更晚的写入覆盖", id);
                Some(WriteOutcome::Superseded(entry))
            }
            ModifyOutcome::Unchanged(entry) => Some(WriteOutcome::Applied(entry)),
            ModifyOutcome::Updated(entry) => {
                log::debug!("条目 {} 已移入回收站", id);
                Some(WriteOutcome::Applied(entry))
            }
        })
    }

    /// 从回收站恢复，保留原 `created_at`
    pub fn restore(&self, id: &str) -> Result<ClipboardEntry, AppError> {
        let outcome = self.repo.modify_entry(id, &mut |entry| {
            if !entry.is_trashed() {
                return false;
            }
            entry.trashed_at = None;
            true
        })?;

        match outcome {
            ModifyOutcome::NotFound => Err(not_found(id)),
            ModifyOutcome::Unchanged(entry) => Ok(entry),
            ModifyOutcome::Updated(entry) => {
                log::debug!("条目 {} 已恢复", id);
                Ok(entry)
            }
        }
    }

    /// 永久删除，返回是否删除
    pub fn purge(&self, id: &str) -> Result<bool, AppError> {
        self.purge_if(id, &|_| true)
    }

    /// 守卫在删除事务内复核，避免与并发的锁定/恢复交错
    pub(crate) fn purge_if(&self, id: &str, guard: &dyn Fn(&ClipboardEntry) -> bool) -> Result<bool, AppError> {
        let purged = self.repo.delete_entry(id, guard)?;
        if purged {
            log::debug!("条目 {} 已永久删除", id);
        }
        Ok(purged)
    }

    /// 清空回收站（跳过已锁定条目），返回删除数量
    pub fn empty_trash(&self) -> Result<usize, AppError> {
        let trashed = self.repo.query_entries(&EntryQuery { exclude_locked: true, ..EntryQuery::trashed() })?;
        let mut purged = 0;
        for entry in trashed {
            if self.purge_if(&entry.id, &|current| current.is_trashed() && !current.is_locked)? {
                purged += 1;
            }
        }
        log::info!("🗑️ 清空回收站: 删除 {} 条", purged);
        Ok(purged)
    }

    pub fn stats(&self) -> Result<StoreStats, AppError> {
        self.repo.entry_stats()
    }

    // ========================================================================
    // 笔记
    // ========================================================================

    pub fn create_note(&self, content: impl Into<String>, color_theme: impl Into<String>) -> Result<NoteEntry, AppError> {
        let now = self.now();
        let note = NoteEntry {
            id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            content: content.into(),
            color_theme: color_theme.into(),
            is_pinned: false,
            is_locked: false,
            created_at: now,
            updated_at: now,
            trashed_at: None,
        };
        self.repo.insert_note(&note)
    }

    pub fn get_note(&self, id: &str) -> Result<NoteEntry, AppError> {
        self.repo.get_note(id)?.ok_or_else(|| AppError::NotFound(format!("笔记 {}", id)))
    }

    pub fn list_notes(&self, scope: EntryScope) -> Result<Vec<NoteEntry>, AppError> {
        self.repo.query_notes(scope)
    }

    pub fn update_note(&self, id: &str, content: impl Into<String>) -> Result<NoteEntry, AppError> {
        let content = content.into();
        let now = self.now();
        self.modify_note(id, &mut |note| {
            if note.content == content {
                return false;
            }
            note.content = content.clone();
            note.updated_at = now;
            true
        })
    }

    pub fn set_note_flags(&self, id: &str, pinned: Option<bool>, locked: Option<bool>) -> Result<NoteEntry, AppError> {
        self.modify_note(id, &mut |note| {
            let before = (note.is_pinned, note.is_locked);
            note.is_pinned = pinned.unwrap_or(note.is_pinned);
            note.is_locked = locked.unwrap_or(note.is_locked);
            before != (note.is_pinned, note.is_locked)
        })
    }

    pub fn trash_note(&self, id: &str) -> Result<NoteEntry, AppError> {
        let now = self.now();
        self.modify_note(id, &mut |note| {
            if note.is_trashed() {
                return false;
            }
            note.trashed_at = Some(now);
            true
        })
    }

    pub fn restore_note(&self, id: &str) -> Result<NoteEntry, AppError> {
        self.modify_note(id, &mut |note| note.trashed_at.take().is_some())
    }

    pub fn purge_note(&self, id: &str) -> Result<bool, AppError> {
        self.repo.delete_note(id, &|_| true)
    }

    pub(crate) fn purge_note_if(&self, id: &str, guard: &dyn Fn(&NoteEntry) -> bool) -> Result<bool, AppError> {
        self.repo.delete_note(id, guard)
    }

    fn modify_note(&self, id: &str, mutation: &mut dyn FnMut(&mut NoteEntry) -> bool) -> Result<NoteEntry, AppError> {
        match self.repo.modify_note(id, mutation)? {
            ModifyOutcome::NotFound => Err(AppError::NotFound(format!("笔记 {}", id))),
            ModifyOutcome::Unchanged(note) | ModifyOutcome::Updated(note) => Ok(note),
        }
    }
}
