//! 去重模块
//!
//! # 设计思路
//!
//! 去重键为 `(语义类型, 规范化负载的 SHA-256)`。同一内容只允许存在一条未删除记录，
//! 再次捕获时刷新其 `last_captured_at`，不新增条目。
//!
//! # 实现思路
//!
//! - 规范化：文本与代码统一换行并去掉首尾及行尾空白；颜色取小写色值；
//!   链接取规范化 URL；图片直接哈希字节；文件列表按换行拼接路径。
//! - 最近窗口：`lru::LruCache` 缓存最近的规范键 → 条目，只记录未删除条目；
//!   窗口未命中时由监听器回落到存储查询再写回窗口。
//! - 回收站中的条目从不参与去重：被删除或被清除时从窗口移除。

use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use sha2::{Digest, Sha256};

use super::ClipboardPayload;
use super::classifier::{Classification, ContentType};

/// 规范去重键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey {
    pub content_type: ContentType,
    /// 十六进制 SHA-256
    pub hash: String,
}

/// 计算规范键
pub fn canonical_key(payload: &ClipboardPayload, classification: &Classification) -> CanonicalKey {
    let content_type = classification.content_type;
    let normalized: Vec<u8> = match (content_type, payload) {
        (_, ClipboardPayload::Image(image)) => image.bytes.clone(),
        (_, ClipboardPayload::Files(paths)) => paths.join("\n").into_bytes(),
        (ContentType::Color, _) => classification
            .metadata
            .normalized_hex
            .clone()
            .unwrap_or_else(|| normalize_text(&payload.canonical_text().unwrap_or_default()))
            .into_bytes(),
        (ContentType::Link, _) => classification
            .metadata
            .canonical_url
            .clone()
            .unwrap_or_else(|| normalize_text(&payload.canonical_text().unwrap_or_default()))
            .into_bytes(),
        _ => normalize_text(&payload.canonical_text().unwrap_or_default()).into_bytes(),
    };

    let mut hasher = Sha256::new();
    hasher.update(content_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(&normalized);

    CanonicalKey { content_type, hash: hex::encode(hasher.finalize()) }
}

/// 去掉无意义空白：统一换行、去掉行尾空白与首尾空白
fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// 窗口中记录的条目信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEntry {
    pub id: String,
    pub last_captured_at: DateTime<Utc>,
}

/// 最近条目窗口，仅包含未删除条目
pub struct RecentWindow {
    cache: LruCache<CanonicalKey, RecentEntry>,
}

impl RecentWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { cache: LruCache::new(capacity) }
    }

    pub fn get(&mut self, key: &CanonicalKey) -> Option<&RecentEntry> {
        self.cache.get(key)
    }

    pub fn contains(&self, key: &CanonicalKey) -> bool {
        self.cache.contains(key)
    }

    pub fn remember(&mut self, key: CanonicalKey, entry: RecentEntry) {
        self.cache.put(key, entry);
    }

    pub fn forget(&mut self, key: &CanonicalKey) {
        self.cache.pop(key);
    }

    /// 按条目 id 移除（条目被删除或清除时调用）
    pub fn forget_id(&mut self, id: &str) {
        let key = self
            .cache
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(key, _)| key.clone());
        if let Some(key) = key {
            self.cache.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// 待判定的新捕获
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: CanonicalKey,
    pub captured_at: DateTime<Utc>,
}

/// 去重判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    Insert,
    /// 刷新已有条目；`within_tolerance` 表示属于同一次复制事件的重复通知
    RefreshTimestamp { existing_id: String, within_tolerance: bool },
    Skip,
}

/// 去重器：纯判定逻辑，永不失败
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    recapture_tolerance: Duration,
}

impl Deduplicator {
    pub fn new(recapture_tolerance: Duration) -> Self {
        Self { recapture_tolerance }
    }

    pub fn recapture_tolerance(&self) -> Duration {
        self.recapture_tolerance
    }

    /// 判定：窗口中存在同键条目则刷新，否则插入；空文本与普通文本一视同仁。
    /// 捕获时间不晚于已有记录的重复通知跳过。
    pub fn consider(&self, candidate: &Candidate, window: &mut RecentWindow) -> DedupDecision {
        match window.get(&candidate.key) {
            None => DedupDecision::Insert,
            Some(existing) if candidate.captured_at <= existing.last_captured_at => DedupDecision::Skip,
            Some(existing) => DedupDecision::RefreshTimestamp {
                existing_id: existing.id.clone(),
                within_tolerance: candidate.captured_at - existing.last_captured_at
                    <= self.recapture_tolerance,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clipboard::classifier::ContentClassifier;

    fn key_of(text: &str) -> CanonicalKey {
        let payload = ClipboardPayload::Text(text.to_string());
        let classification = ContentClassifier::default().classify(&payload);
        canonical_key(&payload, &classification)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid time")
    }

    #[test]
    fn insignificant_whitespace_does_not_change_key() {
        assert_eq!(key_of("hello world"), key_of("  hello world  \r\n"));
        assert_ne!(key_of("hello world"), key_of("hello  world"));
    }

    #[test]
    fn color_case_does_not_change_key() {
        let upper = key_of("#AABBCC");
        assert_eq!(upper, key_of("#aabbcc"));
        assert_eq!(upper.content_type, ContentType::Color);
    }

    #[test]
    fn same_text_different_type_has_different_key() {
        let payload = ClipboardPayload::Text("fn main() {}".to_string());
        let code = ContentClassifier::default().classify(&payload);
        let as_text = Classification { content_type: ContentType::Text, metadata: Default::default() };
        assert_ne!(canonical_key(&payload, &code), canonical_key(&payload, &as_text));
    }

    #[test]
    fn consider_inserts_refreshes_and_skips() {
        let dedup = Deduplicator::new(Duration::milliseconds(1500));
        let mut window = RecentWindow::new(4);
        let key = key_of("hello");

        let first = Candidate { key: key.clone(), captured_at: at(0) };
        assert_eq!(dedup.consider(&first, &mut window), DedupDecision::Insert);

        window.remember(key.clone(), RecentEntry { id: "a".into(), last_captured_at: at(0) });

        let echo = Candidate { key: key.clone(), captured_at: at(1) };
        assert_eq!(
            dedup.consider(&echo, &mut window),
            DedupDecision::RefreshTimestamp { existing_id: "a".into(), within_tolerance: true }
        );

        let later = Candidate { key: key.clone(), captured_at: at(60) };
        assert_eq!(
            dedup.consider(&later, &mut window),
            DedupDecision::RefreshTimestamp { existing_id: "a".into(), within_tolerance: false }
        );

        let stale = Candidate { key, captured_at: at(0) };
        assert_eq!(dedup.consider(&stale, &mut window), DedupDecision::Skip);
    }

    #[test]
    fn empty_text_is_inserted_then_refreshed() {
        let dedup = Deduplicator::new(Duration::zero());
        let mut window = RecentWindow::new(1);
        let key = key_of("");
        assert_eq!(key, key_of("   "));

        let first = Candidate { key: key.clone(), captured_at: at(0) };
        assert_eq!(dedup.consider(&first, &mut window), DedupDecision::Insert);

        window.remember(key.clone(), RecentEntry { id: "blank".into(), last_captured_at: at(0) });
        let again = Candidate { key, captured_at: at(5) };
        assert_eq!(
            dedup.consider(&again, &mut window),
            DedupDecision::RefreshTimestamp { existing_id: "blank".into(), within_tolerance: false }
        );
    }

    #[test]
    fn window_evicts_and_forgets_by_id() {
        let mut window = RecentWindow::new(2);
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            window.remember(key_of(text), RecentEntry { id: text.to_string(), last_captured_at: at(i as i64) });
        }
        assert_eq!(window.len(), 2);
        assert!(!window.contains(&key_of("a")));

        window.forget_id("c");
        assert!(!window.contains(&key_of("c")));
        assert!(window.contains(&key_of("b")));
    }
}
