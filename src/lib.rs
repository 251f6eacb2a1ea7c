//! # 剪贴板历史引擎 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                宿主能力 (feature = "native")              │
//! │  NativeClipboard (arboard) · NativeInput (enigo)         │
//! │  NativeHotKeys (global-hotkey)                           │
//! └───────┬──────────────────┬───────────────────┬───────────┘
//!         ↕ ClipboardHost    ↕ InputHost         ↕ HotKeyHost
//! ┌───────┼──────────────────┼───────────────────┼───────────┐
//! │       ↓                  │                   │           │
//! │  clipboard::listener ── PasteboardWatcher    │           │
//! │   ├─ classifier     内容分类 (Color/Link/Code/...)       │
//! │   ├─ dedup          规范化键 + 最近窗口 (LRU)            │
//! │   └─ theme          主题色                               │
//! │       ↓                  ↑                   ↓           │
//! │  db::HistoryStore ←── input::PasteInjector   hotkey::    │
//! │   └─ EntryRepository (SQLite)                HotKey-     │
//! │       ↑                                      Dispatcher  │
//! │  lifecycle::LifecycleManager  保留期清除 / 自动移入回收站 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` |
//! | [`clock`] | 可注入时钟，测试中手动推进 |
//! | [`settings`] | 引擎设置的加载、归一化与保存 |
//! | [`keys`] | 按键与组合键模型、字符串解析 |
//! | [`clipboard`] | 快照模型、分类、去重、轮询监听、系统剪贴板 |
//! | [`db`] | 条目模型、仓储抽象、SQLite 实现、历史存储 |
//! | [`lifecycle`] | 回收站保留期与自动清理调度 |
//! | [`input`] | 粘贴注入与输入权限 |
//! | [`hotkey`] | 全局快捷键调度 |
//! | `fakes` | 内存宿主，供测试与嵌入方冒烟验证（`test-util` 特性） |

pub mod clipboard;
pub mod clock;
pub mod db;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fakes;
pub mod hotkey;
pub mod input;
pub mod keys;
pub mod lifecycle;
pub mod settings;

pub use error::AppError;
