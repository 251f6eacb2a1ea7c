//! SQLite 仓储实现
//!
//! ## 职责
//! - 以 `Mutex<Connection>` 串行化所有数据库访问
//! - 负载按种类拆分到 `payload_text` / `payload_blob` 等列
//! - 时间戳以毫秒整数存储
//!
//! ## 错误语义
//! - 部分唯一索引冲突映射为 `AppError::DuplicateEntry`，其他约束失败为 `Persistence`
//! - 其余 SQLite 错误映射为 `AppError::Persistence`

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::clipboard::classifier::ContentType;
use crate::clipboard::{ClipboardPayload, ImageEncoding, ImagePayload};
use crate::error::AppError;

use super::repository::{EntryMutation, EntryRepository, ModifyOutcome, NoteMutation};
use super::{ClipboardEntry, EntryQuery, EntryScope, EntrySort, NoteEntry, StoreStats, schema};

const ENTRY_COLUMNS: &str = "seq, id, payload_kind, payload_text, payload_blob, image_width, image_height, \
     image_encoding, content_type, content_hash, preview, title, source_app, source_app_id, theme_color, \
     created_at, last_captured_at, is_favorite, is_pinned, is_locked, trashed_at";

const NOTE_COLUMNS: &str =
    "seq, id, content, color_theme, is_pinned, is_locked, created_at, updated_at, trashed_at";

/// SQLite 仓储
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// 打开（必要时创建）数据库文件并初始化 Schema
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::Persistence(format!("创建数据库目录失败: {}", e)))?;
        }
        log::info!("数据库路径: {}", path.display());

        let conn = Connection::open(path)
            .map_err(|e| AppError::Persistence(format!("打开数据库失败: {}", e)))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Persistence(format!("打开内存数据库失败: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, AppError> {
        schema::initialize_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> Result<T, AppError>) -> Result<T, AppError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AppError::Persistence(format!("获取数据库锁失败: {}", e)))?;
        op(&conn)
    }
}

// ============================================================================
// 行映射
// ============================================================================

fn persistence(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Persistence(format!("{}: {}", context, e))
}

/// `idx_entries_live_content` 冲突时 SQLite 报出的列名
const LIVE_CONTENT_COLUMNS: &str = "clipboard_entries.content_type, clipboard_entries.content_hash";

/// 写入错误映射：只有未删除内容的唯一索引冲突算作重复，其余约束失败仍是持久化错误
fn write_error(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| match &e {
        rusqlite::Error::SqliteFailure(code, Some(message))
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && message.contains(LIVE_CONTENT_COLUMNS) =>
        {
            AppError::DuplicateEntry(format!("{}: {}", context, e))
        }
        _ => AppError::Persistence(format!("{}: {}", context, e)),
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::Persistence(format!("时间戳越界: {}", millis)))
}

struct EntryRow {
    seq: i64,
    id: String,
    payload_kind: String,
    payload_text: Option<String>,
    payload_blob: Option<Vec<u8>>,
    image_width: Option<i64>,
    image_height: Option<i64>,
    image_encoding: Option<String>,
    content_type: String,
    content_hash: String,
    preview: String,
    title: Option<String>,
    source_app: Option<String>,
    source_app_id: Option<String>,
    theme_color: String,
    created_at: i64,
    last_captured_at: i64,
    is_favorite: bool,
    is_pinned: bool,
    is_locked: bool,
    trashed_at: Option<i64>,
}

fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        payload_kind: row.get(2)?,
        payload_text: row.get(3)?,
        payload_blob: row.get(4)?,
        image_width: row.get(5)?,
        image_height: row.get(6)?,
        image_encoding: row.get(7)?,
        content_type: row.get(8)?,
        content_hash: row.get(9)?,
        preview: row.get(10)?,
        title: row.get(11)?,
        source_app: row.get(12)?,
        source_app_id: row.get(13)?,
        theme_color: row.get(14)?,
        created_at: row.get(15)?,
        last_captured_at: row.get(16)?,
        is_favorite: row.get(17)?,
        is_pinned: row.get(18)?,
        is_locked: row.get(19)?,
        trashed_at: row.get(20)?,
    })
}

impl EntryRow {
    fn into_entry(self) -> Result<ClipboardEntry, AppError> {
        let content_type = ContentType::parse(&self.content_type)
            .ok_or_else(|| AppError::Persistence(format!("未知内容类型: {}", self.content_type)))?;
        let payload = decode_payload(&self)?;

        Ok(ClipboardEntry {
            id: self.id,
            seq: self.seq,
            payload,
            content_type,
            content_hash: self.content_hash,
            preview: self.preview,
            title: self.title,
            source_app: self.source_app,
            source_app_id: self.source_app_id,
            theme_color: self.theme_color,
            created_at: from_millis(self.created_at)?,
            last_captured_at: from_millis(self.last_captured_at)?,
            is_favorite: self.is_favorite,
            is_pinned: self.is_pinned,
            is_locked: self.is_locked,
            trashed_at: self.trashed_at.map(from_millis).transpose()?,
        })
    }
}

struct PayloadColumns {
    kind: &'static str,
    text: Option<String>,
    blob: Option<Vec<u8>>,
    width: Option<i64>,
    height: Option<i64>,
    encoding: Option<&'static str>,
}

fn encode_payload(payload: &ClipboardPayload) -> Result<PayloadColumns, AppError> {
    let columns = match payload {
        ClipboardPayload::Text(text) => PayloadColumns {
            kind: "text",
            text: Some(text.clone()),
            blob: None,
            width: None,
            height: None,
            encoding: None,
        },
        ClipboardPayload::RichText { rtf, plain } => PayloadColumns {
            kind: "rich_text",
            text: Some(plain.clone()),
            blob: Some(rtf.clone()),
            width: None,
            height: None,
            encoding: None,
        },
        ClipboardPayload::Image(image) => PayloadColumns {
            kind: "image",
            text: None,
            blob: Some(image.bytes.clone()),
            width: Some(i64::from(image.width)),
            height: Some(i64::from(image.height)),
            encoding: Some(match image.encoding {
                ImageEncoding::RawRgba => "raw_rgba",
                ImageEncoding::Encoded => "encoded",
            }),
        },
        ClipboardPayload::Files(paths) => PayloadColumns {
            kind: "files",
            text: Some(
                serde_json::to_string(paths)
                    .map_err(|e| AppError::Persistence(format!("序列化文件列表失败: {}", e)))?,
            ),
            blob: None,
            width: None,
            height: None,
            encoding: None,
        },
    };
    Ok(columns)
}

fn decode_payload(row: &EntryRow) -> Result<ClipboardPayload, AppError> {
    let missing = |column: &str| AppError::Persistence(format!("条目 {} 缺少 {} 列", row.id, column));

    match row.payload_kind.as_str() {
        "text" => Ok(ClipboardPayload::Text(row.payload_text.clone().ok_or_else(|| missing("payload_text"))?)),
        "rich_text" => Ok(ClipboardPayload::RichText {
            rtf: row.payload_blob.clone().ok_or_else(|| missing("payload_blob"))?,
            plain: row.payload_text.clone().ok_or_else(|| missing("payload_text"))?,
        }),
        "image" => {
            let encoding = match row.image_encoding.as_deref() {
                Some("raw_rgba") => ImageEncoding::RawRgba,
                Some("encoded") => ImageEncoding::Encoded,
                _ => return Err(missing("image_encoding")),
            };
            let dimension = |value: Option<i64>, column: &str| {
                value
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| missing(column))
            };
            Ok(ClipboardPayload::Image(ImagePayload {
                bytes: row.payload_blob.clone().ok_or_else(|| missing("payload_blob"))?,
                width: dimension(row.image_width, "image_width")?,
                height: dimension(row.image_height, "image_height")?,
                encoding,
            }))
        }
        "files" => {
            let raw = row.payload_text.as_deref().ok_or_else(|| missing("payload_text"))?;
            let paths: Vec<String> = serde_json::from_str(raw)
                .map_err(|e| AppError::Persistence(format!("解析文件列表失败: {}", e)))?;
            Ok(ClipboardPayload::Files(paths))
        }
        other => Err(AppError::Persistence(format!("未知负载类型: {}", other))),
    }
}

fn select_entry(conn: &Connection, id: &str) -> Result<Option<ClipboardEntry>, AppError> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM clipboard_entries WHERE id = ?1"),
        params![id],
        read_entry_row,
    )
    .optional()
    .map_err(persistence("查询条目失败"))?
    .map(EntryRow::into_entry)
    .transpose()
}

fn update_entry(conn: &Connection, entry: &ClipboardEntry) -> Result<(), AppError> {
    conn.execute(
        "UPDATE clipboard_entries SET
            preview = ?2, title = ?3, theme_color = ?4, last_captured_at = ?5,
            is_favorite = ?6, is_pinned = ?7, is_locked = ?8, trashed_at = ?9
         WHERE id = ?1",
        params![
            entry.id,
            entry.preview,
            entry.title,
            entry.theme_color,
            to_millis(entry.last_captured_at),
            entry.is_favorite,
            entry.is_pinned,
            entry.is_locked,
            entry.trashed_at.map(to_millis),
        ],
    )
    .map_err(write_error("更新条目失败"))?;
    Ok(())
}

fn read_note_row(row: &Row<'_>) -> rusqlite::Result<(NoteEntry, i64, i64, Option<i64>)> {
    let placeholder = DateTime::<Utc>::UNIX_EPOCH;
    Ok((
        NoteEntry {
            seq: row.get(0)?,
            id: row.get(1)?,
            content: row.get(2)?,
            color_theme: row.get(3)?,
            is_pinned: row.get(4)?,
            is_locked: row.get(5)?,
            created_at: placeholder,
            updated_at: placeholder,
            trashed_at: None,
        },
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_note(raw: (NoteEntry, i64, i64, Option<i64>)) -> Result<NoteEntry, AppError> {
    let (mut note, created_at, updated_at, trashed_at) = raw;
    note.created_at = from_millis(created_at)?;
    note.updated_at = from_millis(updated_at)?;
    note.trashed_at = trashed_at.map(from_millis).transpose()?;
    Ok(note)
}

fn select_note(conn: &Connection, id: &str) -> Result<Option<NoteEntry>, AppError> {
    conn.query_row(
        &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
        params![id],
        read_note_row,
    )
    .optional()
    .map_err(persistence("查询笔记失败"))?
    .map(into_note)
    .transpose()
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// 由查询条件构建 WHERE / ORDER BY / LIMIT
fn build_entry_query(query: &EntryQuery) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    match query.scope {
        EntryScope::Visible => clauses.push("trashed_at IS NULL"),
        EntryScope::Trashed => clauses.push("trashed_at IS NOT NULL"),
        EntryScope::All => {}
    }
    if let Some(content_type) = query.content_type {
        clauses.push("content_type = ?");
        values.push(Value::Text(content_type.as_str().to_string()));
    }
    if query.favorites_only {
        clauses.push("is_favorite = 1");
    }
    if query.pinned_only {
        clauses.push("is_pinned = 1");
    }
    if query.exclude_locked {
        clauses.push("is_locked = 0");
    }
    if query.exclude_pinned {
        clauses.push("is_pinned = 0");
    }
    if query.exclude_favorites {
        clauses.push("is_favorite = 0");
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(
            "(preview LIKE ? ESCAPE '\\' OR payload_text LIKE ? ESCAPE '\\' OR title LIKE ? ESCAPE '\\')",
        );
        let pattern = escape_like(search);
        values.extend(std::iter::repeat_n(Value::Text(pattern), 3));
    }
    if let Some(before) = query.trashed_before {
        clauses.push("trashed_at IS NOT NULL AND trashed_at <= ?");
        values.push(Value::Integer(to_millis(before)));
    }
    if let Some(before) = query.captured_before {
        clauses.push("last_captured_at <= ?");
        values.push(Value::Integer(to_millis(before)));
    }

    let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM clipboard_entries");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(match query.sort {
        EntrySort::PinnedThenRecent => " ORDER BY is_pinned DESC, last_captured_at DESC, seq ASC",
        EntrySort::Recent => " ORDER BY last_captured_at DESC, seq ASC",
        EntrySort::CreatedAsc => " ORDER BY created_at ASC, seq ASC",
    });
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    (sql, values)
}

// ============================================================================
// EntryRepository 实现
// ============================================================================

impl EntryRepository for SqliteRepository {
    fn insert_entry(&self, entry: &ClipboardEntry) -> Result<ClipboardEntry, AppError> {
        let columns = encode_payload(&entry.payload)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO clipboard_entries (
                    id, payload_kind, payload_text, payload_blob, image_width, image_height, image_encoding,
                    content_type, content_hash, preview, title, source_app, source_app_id, theme_color,
                    created_at, last_captured_at, is_favorite, is_pinned, is_locked, trashed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    entry.id,
                    columns.kind,
                    columns.text,
                    columns.blob,
                    columns.width,
                    columns.height,
                    columns.encoding,
                    entry.content_type.as_str(),
                    entry.content_hash,
                    entry.preview,
                    entry.title,
                    entry.source_app,
                    entry.source_app_id,
                    entry.theme_color,
                    to_millis(entry.created_at),
                    to_millis(entry.last_captured_at),
                    entry.is_favorite,
                    entry.is_pinned,
                    entry.is_locked,
                    entry.trashed_at.map(to_millis),
                ],
            )
            .map_err(write_error("插入条目失败"))?;

            let mut stored = entry.clone();
            stored.seq = conn.last_insert_rowid();
            Ok(stored)
        })
    }

    fn get_entry(&self, id: &str) -> Result<Option<ClipboardEntry>, AppError> {
        self.with_conn(|conn| select_entry(conn, id))
    }

    fn find_live_entry(&self, content_type: ContentType, content_hash: &str) -> Result<Option<ClipboardEntry>, AppError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM clipboard_entries
                     WHERE content_type = ?1 AND content_hash = ?2 AND trashed_at IS NULL"
                ),
                params![content_type.as_str(), content_hash],
                read_entry_row,
            )
            .optional()
            .map_err(persistence("按内容查询条目失败"))?
            .map(EntryRow::into_entry)
            .transpose()
        })
    }

    fn query_entries(&self, query: &EntryQuery) -> Result<Vec<ClipboardEntry>, AppError> {
        let (sql, values) = build_entry_query(query);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(persistence("准备查询失败"))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), read_entry_row)
                .map_err(persistence("查询历史失败"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(persistence("读取行失败"))?;
            rows.into_iter().map(EntryRow::into_entry).collect()
        })
    }

    fn modify_entry(&self, id: &str, mutation: EntryMutation<'_>) -> Result<ModifyOutcome<ClipboardEntry>, AppError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(persistence("开始事务失败"))?;
            let Some(mut entry) = select_entry(&tx, id)? else {
                return Ok(ModifyOutcome::NotFound);
            };
            if !mutation(&mut entry) {
                return Ok(ModifyOutcome::Unchanged(entry));
            }
            update_entry(&tx, &entry)?;
            tx.commit().map_err(persistence("提交事务失败"))?;
            Ok(ModifyOutcome::Updated(entry))
        })
    }

    fn delete_entry(&self, id: &str, guard: &dyn Fn(&ClipboardEntry) -> bool) -> Result<bool, AppError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(persistence("开始事务失败"))?;
            let Some(entry) = select_entry(&tx, id)? else {
                return Ok(false);
            };
            if !guard(&entry) {
                return Ok(false);
            }
            tx.execute("DELETE FROM clipboard_entries WHERE id = ?1", params![id])
                .map_err(persistence("删除条目失败"))?;
            tx.commit().map_err(persistence("提交事务失败"))?;
            Ok(true)
        })
    }

    fn entry_stats(&self) -> Result<StoreStats, AppError> {
        self.with_conn(|conn| {
            let mut stats = conn
                .query_row(
                    "SELECT
                        COALESCE(SUM(CASE WHEN trashed_at IS NULL THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN trashed_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN trashed_at IS NULL AND is_pinned = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN trashed_at IS NULL AND is_favorite = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN is_locked = 1 THEN 1 ELSE 0 END), 0)
                     FROM clipboard_entries",
                    [],
                    |row| {
                        Ok(StoreStats {
                            visible: row.get(0)?,
                            trashed: row.get(1)?,
                            pinned: row.get(2)?,
                            favorites: row.get(3)?,
                            locked: row.get(4)?,
                            notes: 0,
                        })
                    },
                )
                .map_err(persistence("查询统计失败"))?;

            stats.notes = conn
                .query_row("SELECT COUNT(*) FROM notes WHERE trashed_at IS NULL", [], |row| row.get(0))
                .map_err(persistence("查询笔记数失败"))?;
            Ok(stats)
        })
    }

    fn insert_note(&self, note: &NoteEntry) -> Result<NoteEntry, AppError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notes (id, content, color_theme, is_pinned, is_locked, created_at, updated_at, trashed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    note.id,
                    note.content,
                    note.color_theme,
                    note.is_pinned,
                    note.is_locked,
                    to_millis(note.created_at),
                    to_millis(note.updated_at),
                    note.trashed_at.map(to_millis),
                ],
            )
            .map_err(write_error("插入笔记失败"))?;

            let mut stored = note.clone();
            stored.seq = conn.last_insert_rowid();
            Ok(stored)
        })
    }

    fn get_note(&self, id: &str) -> Result<Option<NoteEntry>, AppError> {
        self.with_conn(|conn| select_note(conn, id))
    }

    fn query_notes(&self, scope: EntryScope) -> Result<Vec<NoteEntry>, AppError> {
        let filter = match scope {
            EntryScope::Visible => " WHERE trashed_at IS NULL",
            EntryScope::Trashed => " WHERE trashed_at IS NOT NULL",
            EntryScope::All => "",
        };
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes{filter} ORDER BY is_pinned DESC, updated_at DESC, seq ASC");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(persistence("准备笔记查询失败"))?;
            let rows = stmt
                .query_map([], read_note_row)
                .map_err(persistence("查询笔记失败"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(persistence("读取笔记行失败"))?;
            rows.into_iter().map(into_note).collect()
        })
    }

    fn modify_note(&self, id: &str, mutation: NoteMutation<'_>) -> Result<ModifyOutcome<NoteEntry>, AppError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(persistence("开始事务失败"))?;
            let Some(mut note) = select_note(&tx, id)? else {
                return Ok(ModifyOutcome::NotFound);
            };
            if !mutation(&mut note) {
                return Ok(ModifyOutcome::Unchanged(note));
            }
            tx.execute(
                "UPDATE notes SET content = ?2, color_theme = ?3, is_pinned = ?4, is_locked = ?5,
                    updated_at = ?6, trashed_at = ?7
                 WHERE id = ?1",
                params![
                    note.id,
                    note.content,
                    note.color_theme,
                    note.is_pinned,
                    note.is_locked,
                    to_millis(note.updated_at),
                    note.trashed_at.map(to_millis),
                ],
            )
            .map_err(write_error("更新笔记失败"))?;
            tx.commit().map_err(persistence("提交事务失败"))?;
            Ok(ModifyOutcome::Updated(note))
        })
    }

    fn delete_note(&self, id: &str, guard: &dyn Fn(&NoteEntry) -> bool) -> Result<bool, AppError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(persistence("开始事务失败"))?;
            let Some(note) = select_note(&tx, id)? else {
                return Ok(false);
            };
            if !guard(&note) {
                return Ok(false);
            }
            tx.execute("DELETE FROM notes WHERE id = ?1", params![id])
                .map_err(persistence("删除笔记失败"))?;
            tx.commit().map_err(persistence("提交事务失败"))?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid time")
    }

    fn entry(id: &str, hash: &str, payload: ClipboardPayload, captured: i64) -> ClipboardEntry {
        ClipboardEntry {
            id: id.to_string(),
            seq: 0,
            preview: payload.preview(),
            payload,
            content_type: ContentType::Text,
            content_hash: hash.to_string(),
            title: None,
            source_app: None,
            source_app_id: None,
            theme_color: "#5b8def".to_string(),
            created_at: at(captured),
            last_captured_at: at(captured),
            is_favorite: false,
            is_pinned: false,
            is_locked: false,
            trashed_at: None,
        }
    }

    #[test]
    fn payload_variants_survive_storage() {
        let repo = SqliteRepository::open_in_memory().expect("open repo");
        let payloads = [
            ClipboardPayload::Text("plain".into()),
            ClipboardPayload::RichText { rtf: b"{\\rtf1 x}".to_vec(), plain: "x".into() },
            ClipboardPayload::Image(ImagePayload {
                bytes: vec![1, 2, 3, 4],
                width: 1,
                height: 1,
                encoding: ImageEncoding::RawRgba,
            }),
            ClipboardPayload::Files(vec!["/tmp/a b".into(), "/tmp/c".into()]),
        ];

        for (i, payload) in payloads.into_iter().enumerate() {
            let original = entry(&format!("e{i}"), &format!("h{i}"), payload, i as i64);
            let stored = repo.insert_entry(&original).expect("insert");
            assert!(stored.seq > 0);
            let loaded = repo.get_entry(&stored.id).expect("get").expect("exists");
            assert_eq!(loaded, stored);
        }
    }

    #[test]
    fn live_duplicate_maps_to_duplicate_entry() {
        let repo = SqliteRepository::open_in_memory().expect("open repo");
        repo.insert_entry(&entry("a", "same", ClipboardPayload::Text("x".into()), 0)).expect("insert");
        let err = repo
            .insert_entry(&entry("b", "same", ClipboardPayload::Text("x".into()), 1))
            .expect_err("duplicate should fail");
        assert!(matches!(err, AppError::DuplicateEntry(_)));
    }

    #[test]
    fn other_constraint_failures_are_persistence_errors() {
        let repo = SqliteRepository::open_in_memory().expect("open repo");
        repo.insert_entry(&entry("a", "h1", ClipboardPayload::Text("x".into()), 0)).expect("insert");

        let reused_id = repo
            .insert_entry(&entry("a", "h2", ClipboardPayload::Text("y".into()), 1))
            .expect_err("id is unique");
        assert!(matches!(reused_id, AppError::Persistence(_)), "{reused_id:?}");

        let bad_flag = repo
            .with_conn(|conn| {
                conn.execute("UPDATE clipboard_entries SET is_pinned = 7 WHERE id = 'a'", [])
                    .map_err(write_error("更新条目失败"))
            })
            .expect_err("check constraint");
        assert!(matches!(bad_flag, AppError::Persistence(_)), "{bad_flag:?}");
    }

    #[test]
    fn query_orders_by_recency_then_insertion() {
        let repo = SqliteRepository::open_in_memory().expect("open repo");
        repo.insert_entry(&entry("first", "h1", ClipboardPayload::Text("one".into()), 5)).expect("insert");
        repo.insert_entry(&entry("second", "h2", ClipboardPayload::Text("two".into()), 5)).expect("insert");
        repo.insert_entry(&entry("newest", "h3", ClipboardPayload::Text("three".into()), 9)).expect("insert");

        let ids: Vec<String> = repo
            .query_entries(&EntryQuery::visible())
            .expect("query")
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, ["newest", "first", "second"]);
    }

    #[test]
    fn search_escapes_like_wildcards() {
        let repo = SqliteRepository::open_in_memory().expect("open repo");
        repo.insert_entry(&entry("pct", "h1", ClipboardPayload::Text("100% done".into()), 0)).expect("insert");
        repo.insert_entry(&entry("other", "h2", ClipboardPayload::Text("100 done".into()), 1)).expect("insert");

        let found = repo.query_entries(&EntryQuery::visible().with_search("0%")).expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "pct");

        let found = repo.query_entries(&EntryQuery::visible().with_search("DONE")).expect("query");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn modify_without_change_does_not_write() {
        let repo = SqliteRepository::open_in_memory().expect("open repo");
        repo.insert_entry(&entry("a", "h", ClipboardPayload::Text("x".into()), 0)).expect("insert");

        let outcome = repo
            .modify_entry("a", &mut |e| {
                e.is_pinned = true;
                false
            })
            .expect("modify");
        assert!(matches!(outcome, ModifyOutcome::Unchanged(_)));
        let loaded = repo.get_entry("a").expect("get").expect("exists");
        assert!(!loaded.is_pinned);

        assert_eq!(repo.modify_entry("missing", &mut |_| true).expect("modify"), ModifyOutcome::NotFound);
    }

    #[test]
    fn guarded_delete_respects_guard() {
        let repo = SqliteRepository::open_in_memory().expect("open repo");
        repo.insert_entry(&entry("a", "h", ClipboardPayload::Text("x".into()), 0)).expect("insert");

        assert!(!repo.delete_entry("a", &|e| e.is_trashed()).expect("delete"));
        assert!(repo.delete_entry("a", &|_| true).expect("delete"));
        assert!(repo.get_entry("a").expect("get").is_none());
    }
}
