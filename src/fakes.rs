//! 内存宿主实现
//!
//! 剪贴板、输入注入、全局快捷键与持久化的内存替身，用于无桌面环境的
//! 集成测试与嵌入方的冒烟验证。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clipboard::classifier::ContentType;
use crate::clipboard::{ClipboardHost, ClipboardPayload, ClipboardSnapshot};
use crate::db::{
    ClipboardEntry, EntryQuery, EntryRepository, EntryScope, ModifyOutcome, NoteEntry, SqliteRepository,
    StoreStats,
};
use crate::error::AppError;
use crate::hotkey::{HostBindingId, HostCallback, HotKeyHost, KeyState};
use crate::input::InputHost;
use crate::keys::{Key, KeyCombo, Modifiers};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// 剪贴板
// ============================================================================

/// 本进程写入剪贴板时使用的来源标识
pub const SELF_SOURCE_ID: &str = "clipboard-keeper";

#[derive(Default)]
struct ClipboardState {
    change_count: i64,
    snapshot: Option<ClipboardSnapshot>,
}

/// 内存剪贴板：每次写入变化计数加一
#[derive(Default)]
pub struct MemoryClipboard {
    state: Mutex<ClipboardState>,
    unreadable: AtomicBool,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟其他应用复制
    pub fn copy(&self, snapshot: ClipboardSnapshot) {
        let mut state = lock(&self.state);
        state.change_count += 1;
        state.snapshot = Some(snapshot);
    }

    pub fn copy_text(&self, text: &str) {
        self.copy(ClipboardSnapshot::new(ClipboardPayload::Text(text.to_string())));
    }

    /// 变化计数增加但没有可用表示
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.change_count += 1;
        state.snapshot = None;
    }

    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }

    pub fn change_count(&self) -> i64 {
        lock(&self.state).change_count
    }
}

impl ClipboardHost for MemoryClipboard {
    fn current_change_count(&self) -> Result<i64, AppError> {
        Ok(lock(&self.state).change_count)
    }

    fn current_snapshot(&self) -> Result<Option<ClipboardSnapshot>, AppError> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(AppError::ClipboardUnreadable("剪贴板被占用".to_string()));
        }
        Ok(lock(&self.state).snapshot.clone())
    }

    fn set_content(&self, payload: &ClipboardPayload) -> Result<(), AppError> {
        self.copy(ClipboardSnapshot::new(payload.clone()).with_source("Clipboard Keeper", SELF_SOURCE_ID));
        Ok(())
    }
}

// ============================================================================
// 输入注入
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
    pub is_down: bool,
}

/// 记录合成事件的输入宿主
#[derive(Default)]
pub struct RecordingInput {
    trusted: AtomicBool,
    fail_key_down: AtomicBool,
    prompts: AtomicUsize,
    events: Mutex<Vec<KeyEvent>>,
}

impl RecordingInput {
    pub fn trusted() -> Self {
        let input = Self::default();
        input.set_trusted(true);
        input
    }

    pub fn untrusted() -> Self {
        Self::default()
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.trusted.store(trusted, Ordering::SeqCst);
    }

    /// 按下事件合成失败（不记录）
    pub fn fail_key_down(&self, fail: bool) {
        self.fail_key_down.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<KeyEvent> {
        lock(&self.events).clone()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl InputHost for RecordingInput {
    fn is_trusted(&self) -> Result<bool, AppError> {
        Ok(self.trusted.load(Ordering::SeqCst))
    }

    fn request_trust_prompt(&self) -> Result<(), AppError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn synthesize_key_event(&self, key: Key, modifiers: Modifiers, is_down: bool) -> Result<(), AppError> {
        if is_down && self.fail_key_down.load(Ordering::SeqCst) {
            return Err(AppError::InjectionFailed("事件源不可用".to_string()));
        }
        lock(&self.events).push(KeyEvent { key, modifiers, is_down });
        Ok(())
    }
}

// ============================================================================
// 全局快捷键
// ============================================================================

/// 手动触发的快捷键宿主
#[derive(Default)]
pub struct ManualHotKeys {
    bindings: Mutex<HashMap<HostBindingId, (KeyCombo, HostCallback)>>,
    occupied: Mutex<Vec<KeyCombo>>,
    next_id: AtomicU64,
}

impl ManualHotKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟组合键已被其他应用占用
    pub fn occupy(&self, combo: KeyCombo) {
        lock(&self.occupied).push(combo);
    }

    pub fn callback_for(&self, combo: KeyCombo) -> Option<HostCallback> {
        lock(&self.bindings)
            .values()
            .find(|(bound, _)| *bound == combo)
            .map(|(_, callback)| Arc::clone(callback))
    }

    pub fn press(&self, combo: KeyCombo) -> bool {
        self.emit(combo, KeyState::Pressed)
    }

    pub fn release(&self, combo: KeyCombo) -> bool {
        self.emit(combo, KeyState::Released)
    }

    pub fn binding_count(&self) -> usize {
        lock(&self.bindings).len()
    }

    fn emit(&self, combo: KeyCombo, state: KeyState) -> bool {
        // 回调在锁外执行
        match self.callback_for(combo) {
            Some(callback) => {
                callback(state);
                true
            }
            None => false,
        }
    }
}

impl HotKeyHost for ManualHotKeys {
    fn bind(&self, combo: KeyCombo, callback: HostCallback) -> Result<HostBindingId, AppError> {
        if lock(&self.occupied).contains(&combo) {
            return Err(AppError::AlreadyBound);
        }
        let mut bindings = lock(&self.bindings);
        if bindings.values().any(|(bound, _)| *bound == combo) {
            return Err(AppError::AlreadyBound);
        }
        let id = HostBindingId(self.next_id.fetch_add(1, Ordering::SeqCst));
        bindings.insert(id, (combo, callback));
        Ok(id)
    }

    fn unbind(&self, id: HostBindingId) -> Result<(), AppError> {
        lock(&self.bindings)
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("宿主绑定 {:?}", id)))
    }
}

// ============================================================================
// 持久化
// ============================================================================

/// 可注入故障的仓储：故障开启时所有操作返回 `Persistence`
pub struct FlakyRepository {
    inner: SqliteRepository,
    failing: AtomicBool,
}

impl FlakyRepository {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self { inner: SqliteRepository::open_in_memory()?, failing: AtomicBool::new(false) })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("存储不可用".to_string()));
        }
        Ok(())
    }
}

impl EntryRepository for FlakyRepository {
    fn insert_entry(&self, entry: &ClipboardEntry) -> Result<ClipboardEntry, AppError> {
        self.check()?;
        self.inner.insert_entry(entry)
    }

    fn get_entry(&self, id: &str) -> Result<Option<ClipboardEntry>, AppError> {
        self.check()?;
        self.inner.get_entry(id)
    }

    fn find_live_entry(&self, content_type: ContentType, content_hash: &str) -> Result<Option<ClipboardEntry>, AppError> {
        self.check()?;
        self.inner.find_live_entry(content_type, content_hash)
    }

    fn query_entries(&self, query: &EntryQuery) -> Result<Vec<ClipboardEntry>, AppError> {
        self.check()?;
        self.inner.query_entries(query)
    }

    fn modify_entry(
        &self,
        id: &str,
        mutation: &mut dyn FnMut(&mut ClipboardEntry) -> bool,
    ) -> Result<ModifyOutcome<ClipboardEntry>, AppError> {
        self.check()?;
        self.inner.modify_entry(id, mutation)
    }

    fn delete_entry(&self, id: &str, guard: &dyn Fn(&ClipboardEntry) -> bool) -> Result<bool, AppError> {
        self.check()?;
        self.inner.delete_entry(id, guard)
    }

    fn entry_stats(&self) -> Result<StoreStats, AppError> {
        self.check()?;
        self.inner.entry_stats()
    }

    fn insert_note(&self, note: &NoteEntry) -> Result<NoteEntry, AppError> {
        self.check()?;
        self.inner.insert_note(note)
    }

    fn get_note(&self, id: &str) -> Result<Option<NoteEntry>, AppError> {
        self.check()?;
        self.inner.get_note(id)
    }

    fn query_notes(&self, scope: EntryScope) -> Result<Vec<NoteEntry>, AppError> {
        self.check()?;
        self.inner.query_notes(scope)
    }

    fn modify_note(
        &self,
        id: &str,
        mutation: &mut dyn FnMut(&mut NoteEntry) -> bool,
    ) -> Result<ModifyOutcome<NoteEntry>, AppError> {
        self.check()?;
        self.inner.modify_note(id, mutation)
    }

    fn delete_note(&self, id: &str, guard: &dyn Fn(&NoteEntry) -> bool) -> Result<bool, AppError> {
        self.check()?;
        self.inner.delete_note(id, guard)
    }
}
