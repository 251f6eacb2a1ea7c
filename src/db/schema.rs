//! 历史库表结构
//!
//! ## 职责
//! - 按 `user_version` 逐级升级：v1 剪贴板条目，v2 便签
//! - 以部分唯一索引落实“同一 (类型, 哈希) 仅一条未删除记录”
//! - 开启 WAL 与外键约束
//!
//! DDL 失败统一映射为 `AppError::Persistence`。

use rusqlite::Connection;

use crate::error::AppError;

pub(super) const SCHEMA_VERSION: i64 = 2;

fn get_user_version(conn: &Connection) -> Result<i64, AppError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| AppError::Persistence(format!("读取数据库版本失败: {}", e)))
}

fn set_user_version(conn: &Connection, version: i64) -> Result<(), AppError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| AppError::Persistence(format!("写入数据库版本失败: {}", e)))
}

fn create_entry_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS clipboard_entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            payload_kind TEXT NOT NULL,
            payload_text TEXT,
            payload_blob BLOB,
            image_width INTEGER,
            image_height INTEGER,
            image_encoding TEXT,
            content_type TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            preview TEXT NOT NULL DEFAULT '',
            title TEXT,
            source_app TEXT,
            source_app_id TEXT,
            theme_color TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_captured_at INTEGER NOT NULL,
            is_favorite INTEGER NOT NULL DEFAULT 0 CHECK (is_favorite IN (0, 1)),
            is_pinned INTEGER NOT NULL DEFAULT 0 CHECK (is_pinned IN (0, 1)),
            is_locked INTEGER NOT NULL DEFAULT 0 CHECK (is_locked IN (0, 1)),
            trashed_at INTEGER
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_live_content
            ON clipboard_entries(content_type, content_hash) WHERE trashed_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_entries_pinned_captured
            ON clipboard_entries(is_pinned, last_captured_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entries_trashed_at ON clipboard_entries(trashed_at);"
    ).map_err(|e| AppError::Persistence(format!("创建条目表失败: {}", e)))
}

fn create_note_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS notes (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            color_theme TEXT NOT NULL,
            is_pinned INTEGER NOT NULL DEFAULT 0 CHECK (is_pinned IN (0, 1)),
            is_locked INTEGER NOT NULL DEFAULT 0 CHECK (is_locked IN (0, 1)),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            trashed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_notes_trashed_at ON notes(trashed_at);"
    ).map_err(|e| AppError::Persistence(format!("创建笔记表失败: {}", e)))
}

pub(super) fn initialize_schema(conn: &Connection) -> Result<(), AppError> {
    // 内存数据库不支持 WAL，失败时忽略
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .ok();

    let mut version = get_user_version(conn)?;
    if version < 1 {
        create_entry_tables(conn)?;
        set_user_version(conn, 1)?;
        version = 1;
    }

    if version < 2 {
        create_note_tables(conn)?;
        set_user_version(conn, 2)?;
        version = 2;
    }

    if version != SCHEMA_VERSION {
        return Err(AppError::Persistence(format!(
            "历史库版本 {} 高于支持的版本 {}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}
