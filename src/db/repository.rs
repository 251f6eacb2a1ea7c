//! 持久化协作方接口
//!
//! ## 职责
//! - 定义条目与笔记的类型化 CRUD，`HistoryStore` 只依赖此接口
//! - `modify_*` 在单个事务内完成“读取 → 修改 → 写回”，保证单条记录的读改写原子性
//! - `delete_*` 接收守卫谓词，在同一事务内复核条件后再删除
//!
//! ## 错误语义
//! - 存储不可用统一映射为 `AppError::Persistence`
//! - 违反“同内容仅一条未删除记录”约束映射为 `AppError::DuplicateEntry`

use crate::clipboard::classifier::ContentType;
use crate::error::AppError;

use super::{ClipboardEntry, EntryQuery, EntryScope, NoteEntry, StoreStats};

/// 修改结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifyOutcome<T> {
    NotFound,
    /// 修改函数返回 `false`，未写回
    Unchanged(T),
    Updated(T),
}

pub type EntryMutation<'a> = &'a mut dyn FnMut(&mut ClipboardEntry) -> bool;
pub type NoteMutation<'a> = &'a mut dyn FnMut(&mut NoteEntry) -> bool;

pub trait EntryRepository: Send + Sync {
    /// 插入新条目，返回带 `seq` 的记录
    fn insert_entry(&self, entry: &ClipboardEntry) -> Result<ClipboardEntry, AppError>;

    fn get_entry(&self, id: &str) -> Result<Option<ClipboardEntry>, AppError>;

    /// 同键的未删除条目
    fn find_live_entry(&self, content_type: ContentType, content_hash: &str) -> Result<Option<ClipboardEntry>, AppError>;

    fn query_entries(&self, query: &EntryQuery) -> Result<Vec<ClipboardEntry>, AppError>;

    fn modify_entry(&self, id: &str, mutation: EntryMutation<'_>) -> Result<ModifyOutcome<ClipboardEntry>, AppError>;

    /// 守卫返回 `true` 时删除，返回是否删除
    fn delete_entry(&self, id: &str, guard: &dyn Fn(&ClipboardEntry) -> bool) -> Result<bool, AppError>;

    fn entry_stats(&self) -> Result<StoreStats, AppError>;

    fn insert_note(&self, note: &NoteEntry) -> Result<NoteEntry, AppError>;

    fn get_note(&self, id: &str) -> Result<Option<NoteEntry>, AppError>;

    /// 置顶优先、最近更新优先
    fn query_notes(&self, scope: EntryScope) -> Result<Vec<NoteEntry>, AppError>;

    fn modify_note(&self, id: &str, mutation: NoteMutation<'_>) -> Result<ModifyOutcome<NoteEntry>, AppError>;

    fn delete_note(&self, id: &str, guard: &dyn Fn(&NoteEntry) -> bool) -> Result<bool, AppError>;
}
