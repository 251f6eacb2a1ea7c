//! 历史数据模块
//!
//! # 设计思路
//!
//! 历史记录的一切读写都经由 `HistoryStore`，它是条目状态的唯一权威：
//! - **数据模型**：`ClipboardEntry` / `NoteEntry` 及查询条件，定义在本文件
//! - **仓储抽象**：`repository::EntryRepository`，持久化协作方的类型化接口
//! - **SQLite 实现**：`sqlite::SqliteRepository`，`schema` 负责建表与迁移
//! - **历史存储**：`history::HistoryStore`，实现插入、刷新、回收站、
//!   标记与查询，并落实“同内容仅一条未删除记录”与并发写入的最后写入者胜出
//!
//! # 实现思路
//!
//! - 条目 id 使用 UUID v4 字符串；`seq` 为自增插入序号，用于排序兜底。
//! - 时间戳以毫秒精度持久化，内存中的条目在写入前先截断到毫秒。
//! - `trashed_at` 非空即表示在回收站中，不再单独维护布尔位。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clipboard::classifier::{Classification, ContentType};
use crate::clipboard::dedup::CanonicalKey;
use crate::clipboard::{ClipboardPayload, ClipboardSnapshot};

mod history;
mod repository;
mod schema;
mod sqlite;

pub use history::{HistoryStore, WriteOutcome};
pub use repository::{EntryRepository, ModifyOutcome};
pub use sqlite::SqliteRepository;

// ============================================================================
// 数据模型
// ============================================================================

/// 剪贴板历史条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardEntry {
    pub id: String,
    /// 插入序号，插入前为 0
    pub seq: i64,
    pub payload: ClipboardPayload,
    pub content_type: ContentType,
    /// 规范键哈希（与 `content_type` 共同构成去重键）
    pub content_hash: String,
    pub preview: String,
    /// 链接主机名或颜色值，作为展示标题
    pub title: Option<String>,
    pub source_app: Option<String>,
    pub source_app_id: Option<String>,
    pub theme_color: String,
    pub created_at: DateTime<Utc>,
    pub last_captured_at: DateTime<Utc>,
    pub is_favorite: bool,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub trashed_at: Option<DateTime<Utc>>,
}

impl ClipboardEntry {
    /// 由一次捕获构造新条目，`created_at == last_captured_at == now`
    pub fn from_capture(
        snapshot: ClipboardSnapshot,
        classification: &Classification,
        key: &CanonicalKey,
        theme_color: String,
        now: DateTime<Utc>,
    ) -> Self {
        let now = truncate_to_millis(now);
        let title = classification
            .metadata
            .normalized_hex
            .clone()
            .or_else(|| classification.metadata.link_host.clone());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq: 0,
            preview: snapshot.payload.preview(),
            payload: snapshot.payload,
            content_type: key.content_type,
            content_hash: key.hash.clone(),
            title,
            source_app: snapshot.source_app,
            source_app_id: snapshot.source_app_id,
            theme_color,
            created_at: now,
            last_captured_at: now,
            is_favorite: false,
            is_pinned: false,
            is_locked: false,
            trashed_at: None,
        }
    }

    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }

    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey { content_type: self.content_type, hash: self.content_hash.clone() }
    }
}

/// 用户笔记：与剪贴板条目共享回收站与保留期策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEntry {
    pub id: String,
    pub seq: i64,
    pub content: String,
    pub color_theme: String,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub trashed_at: Option<DateTime<Utc>>,
}

impl NoteEntry {
    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }
}

// ============================================================================
// 查询条件
// ============================================================================

/// 查询范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryScope {
    /// 未删除条目
    #[default]
    Visible,
    /// 回收站
    Trashed,
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntrySort {
    /// 置顶优先，其次按最近捕获时间倒序
    #[default]
    PinnedThenRecent,
    /// 仅按最近捕获时间倒序
    Recent,
    /// 按创建时间正序
    CreatedAsc,
}

/// 条目查询；时间相同的条目按插入序号正序排列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryQuery {
    pub scope: EntryScope,
    pub content_type: Option<ContentType>,
    pub favorites_only: bool,
    pub pinned_only: bool,
    pub exclude_locked: bool,
    pub exclude_pinned: bool,
    pub exclude_favorites: bool,
    /// 预览文本包含（大小写不敏感）
    pub search: Option<String>,
    pub trashed_before: Option<DateTime<Utc>>,
    pub captured_before: Option<DateTime<Utc>>,
    pub sort: EntrySort,
    pub limit: Option<usize>,
}

impl EntryQuery {
    /// 默认历史列表：未删除、置顶优先、最近优先
    pub fn visible() -> Self {
        Self::default()
    }

    pub fn trashed() -> Self {
        Self { scope: EntryScope::Trashed, ..Self::default() }
    }

    pub fn with_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn with_sort(mut self, sort: EntrySort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn favorites(mut self) -> Self {
        self.favorites_only = true;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned_only = true;
        self
    }
}

/// 标记更新；`None` 表示保持不变
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagUpdate {
    pub favorite: Option<bool>,
    pub pinned: Option<bool>,
    pub locked: Option<bool>,
}

impl FlagUpdate {
    pub fn favorite(value: bool) -> Self {
        Self { favorite: Some(value), ..Self::default() }
    }

    pub fn pinned(value: bool) -> Self {
        Self { pinned: Some(value), ..Self::default() }
    }

    pub fn locked(value: bool) -> Self {
        Self { locked: Some(value), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.favorite.is_none() && self.pinned.is_none() && self.locked.is_none()
    }
}

/// 历史统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub visible: i64,
    pub trashed: i64,
    pub pinned: i64,
    pub favorites: i64,
    pub locked: i64,
    pub notes: i64,
}

/// 毫秒精度截断，保证内存条目与持久化结果一致
pub(crate) fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
