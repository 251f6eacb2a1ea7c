//! 剪贴板管理模块
//!
//! # 设计思路
//!
//! 统一管理剪贴板捕获链路的核心能力：
//! - **宿主能力**：`ClipboardHost` 抽象“读取变化计数 / 读取快照 / 写入内容”，
//!   具体平台实现（arboard）放在 `platform`，测试使用内存实现
//! - **分类**：`classifier` 以规则表把原始负载映射为语义类型与派生元数据
//! - **代码检测**：`code_detection` 基于正则集合与结构启发式打分
//! - **主题色**：`theme` 从内容确定性地派生展示强调色
//! - **去重**：`dedup` 计算规范键并决定插入 / 刷新 / 跳过
//! - **监听**：`listener` 轮询变化计数，串行驱动整条流水线
//!
//! # 实现思路
//!
//! - 每个条目只有一种规范表示；富文本同时保留纯文本作为去重键。
//! - 分类与去重是纯函数，不做 I/O，永不失败。

pub mod classifier;
pub mod code_detection;
pub mod dedup;
pub mod listener;
#[cfg(feature = "native")]
pub mod platform;
pub mod theme;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const PREVIEW_MAX_CHARS: usize = 200;

/// 图片字节的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageEncoding {
    /// 未压缩 RGBA8，长度为 `width * height * 4`
    RawRgba,
    /// PNG / JPEG 等编码后的文件字节
    Encoded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub encoding: ImageEncoding,
}

/// 剪贴板原始负载，每个条目只有一种规范表示
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardPayload {
    Text(String),
    /// 富文本，`plain` 作为去重键
    RichText { rtf: Vec<u8>, plain: String },
    Image(ImagePayload),
    Files(Vec<String>),
}

impl ClipboardPayload {
    /// 去重与检索使用的文本表示；图片没有文本表示
    pub fn canonical_text(&self) -> Option<String> {
        match self {
            ClipboardPayload::Text(text) => Some(text.clone()),
            ClipboardPayload::RichText { plain, .. } => Some(plain.clone()),
            ClipboardPayload::Files(paths) => Some(paths.join("\n")),
            ClipboardPayload::Image(_) => None,
        }
    }

    /// 列表展示用的截断预览
    pub fn preview(&self) -> String {
        match self {
            ClipboardPayload::Image(image) => format!("图片 {}×{}", image.width, image.height),
            other => {
                let text = other.canonical_text().unwrap_or_default();
                text.chars().take(PREVIEW_MAX_CHARS).collect()
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ClipboardPayload::Text(_) => "text",
            ClipboardPayload::RichText { .. } => "rich_text",
            ClipboardPayload::Image(_) => "image",
            ClipboardPayload::Files(_) => "files",
        }
    }

    /// 负载大小（字节），仅用于日志
    pub fn byte_len(&self) -> usize {
        match self {
            ClipboardPayload::Text(text) => text.len(),
            ClipboardPayload::RichText { rtf, plain } => rtf.len() + plain.len(),
            ClipboardPayload::Image(image) => image.bytes.len(),
            ClipboardPayload::Files(paths) => paths.iter().map(String::len).sum(),
        }
    }
}

/// 一次剪贴板读取的快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub payload: ClipboardPayload,
    pub source_app: Option<String>,
    pub source_app_id: Option<String>,
}

impl ClipboardSnapshot {
    pub fn new(payload: ClipboardPayload) -> Self {
        Self { payload, source_app: None, source_app_id: None }
    }

    pub fn with_source(mut self, app: impl Into<String>, app_id: impl Into<String>) -> Self {
        self.source_app = Some(app.into());
        self.source_app_id = Some(app_id.into());
        self
    }
}

/// 宿主剪贴板能力
pub trait ClipboardHost: Send + Sync {
    /// 单调递增的变化计数
    fn current_change_count(&self) -> Result<i64, AppError>;

    /// 当前内容；没有可用表示时返回 `Ok(None)`
    fn current_snapshot(&self) -> Result<Option<ClipboardSnapshot>, AppError>;

    fn set_content(&self, payload: &ClipboardPayload) -> Result<(), AppError>;
}
