//! 内容分类模块
//!
//! # 设计思路
//!
//! 分类规则是一张有序的“谓词 + 提取器”表，按顺序匹配，首个命中者生效：
//! 图片 > 文件列表 > 颜色 > 链接 > 代码 > 纯文本。
//! 每条规则都是纯函数，可以单独测试，调整顺序不需要改动分发逻辑。
//!
//! # 实现思路
//!
//! - 文本类规则对纯文本与富文本的纯文本部分生效。
//! - 链接解析使用 `url` crate，只接受带主机名的绝对 http/https 地址。
//! - 图片格式通过 `infer` 识别文件头。
//! - 最后一条规则恒为真，保证分类永远有确定结果。

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::code_detection::CodeDetector;
use super::{ClipboardPayload, ImageEncoding};

static HEX_COLOR: Lazy<Option<Regex>> = Lazy::new(|| match Regex::new(r"^#[0-9A-Fa-f]{6}$") {
    Ok(re) => Some(re),
    Err(e) => {
        log::error!("颜色正则编译失败: {}", e);
        None
    }
});

/// 语义类型，由分类器派生，不可由用户编辑
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentType {
    Text,
    Code,
    Link,
    Color,
    Image,
    File,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Code => "code",
            ContentType::Link => "link",
            ContentType::Color => "color",
            ContentType::Image => "image",
            ContentType::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ContentType::Text),
            "code" => Some(ContentType::Code),
            "link" => Some(ContentType::Link),
            "color" => Some(ContentType::Color),
            "image" => Some(ContentType::Image),
            "file" => Some(ContentType::File),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分类派生的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedMetadata {
    /// 颜色：小写 `#rrggbb`
    pub normalized_hex: Option<String>,
    /// 链接：主机名，用作兜底标题
    pub link_host: Option<String>,
    /// 链接：规范化后的 URL
    pub canonical_url: Option<String>,
    /// 代码：特征得分
    pub code_score: Option<usize>,
    /// 图片：MIME 类型
    pub image_format: Option<String>,
    pub image_size: Option<(u32, u32)>,
    pub file_count: Option<usize>,
    /// 空文本标记，仅供展示层使用
    pub is_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub content_type: ContentType,
    pub metadata: DerivedMetadata,
}

type RulePredicate = fn(&ClipboardPayload, &CodeDetector) -> bool;
type RuleExtractor = fn(&ClipboardPayload, &CodeDetector) -> DerivedMetadata;

/// 单条分类规则
#[derive(Clone, Copy)]
pub struct ClassifierRule {
    pub name: &'static str,
    pub content_type: ContentType,
    pub matches: RulePredicate,
    pub extract: RuleExtractor,
}

impl fmt::Debug for ClassifierRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierRule")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .finish()
    }
}

pub const IMAGE_RULE: ClassifierRule = ClassifierRule {
    name: "image",
    content_type: ContentType::Image,
    matches: |payload, _| matches!(payload, ClipboardPayload::Image(_)),
    extract: extract_image,
};

pub const FILE_RULE: ClassifierRule = ClassifierRule {
    name: "file",
    content_type: ContentType::File,
    matches: |payload, _| matches!(payload, ClipboardPayload::Files(paths) if !paths.is_empty()),
    extract: |payload, _| DerivedMetadata {
        file_count: match payload {
            ClipboardPayload::Files(paths) => Some(paths.len()),
            _ => None,
        },
        ..DerivedMetadata::default()
    },
};

pub const COLOR_RULE: ClassifierRule = ClassifierRule {
    name: "color",
    content_type: ContentType::Color,
    matches: |payload, _| text_of(payload).and_then(normalize_hex_color).is_some(),
    extract: |payload, _| DerivedMetadata {
        normalized_hex: text_of(payload).and_then(normalize_hex_color),
        ..DerivedMetadata::default()
    },
};

pub const LINK_RULE: ClassifierRule = ClassifierRule {
    name: "link",
    content_type: ContentType::Link,
    matches: |payload, _| text_of(payload).and_then(parse_http_url).is_some(),
    extract: |payload, _| match text_of(payload).and_then(parse_http_url) {
        Some(url) => DerivedMetadata {
            link_host: url.host_str().map(str::to_string),
            canonical_url: Some(url.to_string()),
            ..DerivedMetadata::default()
        },
        None => DerivedMetadata::default(),
    },
};

pub const CODE_RULE: ClassifierRule = ClassifierRule {
    name: "code",
    content_type: ContentType::Code,
    matches: |payload, detector| text_of(payload).is_some_and(|text| detector.is_code(text)),
    extract: |payload, detector| DerivedMetadata {
        code_score: text_of(payload).map(|text| detector.score(text)),
        ..DerivedMetadata::default()
    },
};

pub const TEXT_RULE: ClassifierRule = ClassifierRule {
    name: "text",
    content_type: ContentType::Text,
    matches: |_, _| true,
    extract: |payload, _| DerivedMetadata {
        is_empty: payload.canonical_text().is_none_or(|text| text.trim().is_empty()),
        ..DerivedMetadata::default()
    },
};

/// 默认规则顺序
pub const DEFAULT_RULES: [ClassifierRule; 6] =
    [IMAGE_RULE, FILE_RULE, COLOR_RULE, LINK_RULE, CODE_RULE, TEXT_RULE];

/// 内容分类器
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    rules: Vec<ClassifierRule>,
    code_detector: CodeDetector,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new(CodeDetector::default())
    }
}

impl ContentClassifier {
    pub fn new(code_detector: CodeDetector) -> Self {
        Self::with_rules(DEFAULT_RULES.to_vec(), code_detector)
    }

    /// 使用自定义规则表；表尾总会补上纯文本兜底规则
    pub fn with_rules(mut rules: Vec<ClassifierRule>, code_detector: CodeDetector) -> Self {
        if rules.last().map(|rule| rule.content_type) != Some(ContentType::Text) {
            rules.push(TEXT_RULE);
        }
        Self { rules, code_detector }
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// 分类：确定性、无副作用，永不失败
    pub fn classify(&self, payload: &ClipboardPayload) -> Classification {
        for rule in &self.rules {
            if (rule.matches)(payload, &self.code_detector) {
                log::trace!("分类命中规则: {}", rule.name);
                return Classification {
                    content_type: rule.content_type,
                    metadata: (rule.extract)(payload, &self.code_detector),
                };
            }
        }

        Classification {
            content_type: ContentType::Text,
            metadata: (TEXT_RULE.extract)(payload, &self.code_detector),
        }
    }
}

fn text_of(payload: &ClipboardPayload) -> Option<&str> {
    match payload {
        ClipboardPayload::Text(text) => Some(text),
        ClipboardPayload::RichText { plain, .. } => Some(plain),
        _ => None,
    }
}

/// `#` 加 6 位十六进制（允许首尾空白）→ 小写形式
pub fn normalize_hex_color(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let re = HEX_COLOR.as_ref()?;
    if re.is_match(trimmed) {
        Some(trimmed.to_ascii_lowercase())
    } else {
        None
    }
}

/// 绝对 http/https 地址，且带主机名、不含内部空白
pub fn parse_http_url(text: &str) -> Option<url::Url> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }

    let lower = trimmed.get(..8).unwrap_or(trimmed).to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return None;
    }

    let parsed = url::Url::parse(trimmed).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(parsed),
        _ => None,
    }
}

fn extract_image(payload: &ClipboardPayload, _: &CodeDetector) -> DerivedMetadata {
    let ClipboardPayload::Image(image) = payload else {
        return DerivedMetadata::default();
    };

    let image_format = match image.encoding {
        ImageEncoding::RawRgba => Some("image/x-raw-rgba".to_string()),
        ImageEncoding::Encoded => infer::get(&image.bytes).map(|kind| kind.mime_type().to_string()),
    };

    DerivedMetadata {
        image_format,
        image_size: Some((image.width, image.height)),
        ..DerivedMetadata::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ImagePayload;

    fn classify_text(text: &str) -> Classification {
        ContentClassifier::default().classify(&ClipboardPayload::Text(text.to_string()))
    }

    #[test]
    fn color_rule_normalizes_hex() {
        let result = classify_text("  #1A2b3C \n");
        assert_eq!(result.content_type, ContentType::Color);
        assert_eq!(result.metadata.normalized_hex.as_deref(), Some("#1a2b3c"));
    }

    #[test]
    fn color_rule_rejects_short_or_long_hex() {
        assert_eq!(classify_text("#fff").content_type, ContentType::Text);
        assert_eq!(classify_text("#1234567").content_type, ContentType::Text);
        assert_eq!(classify_text("1a2b3c").content_type, ContentType::Text);
    }

    #[test]
    fn link_rule_extracts_host() {
        let result = classify_text("https://Example.com/path?q=1");
        assert_eq!(result.content_type, ContentType::Link);
        assert_eq!(result.metadata.link_host.as_deref(), Some("example.com"));
        assert_eq!(result.metadata.canonical_url.as_deref(), Some("https://example.com/path?q=1"));
    }

    #[test]
    fn link_rule_rejects_other_schemes_and_sentences() {
        assert_eq!(classify_text("ftp://example.com").content_type, ContentType::Text);
        assert_eq!(classify_text("see https://example.com now").content_type, ContentType::Text);
        assert_eq!(classify_text("mailto:a@b.c").content_type, ContentType::Text);
    }

    #[test]
    fn code_rule_uses_detector() {
        let result = classify_text("fn main() {\n    println!(\"hi\");\n}");
        assert_eq!(result.content_type, ContentType::Code);
        assert!(result.metadata.code_score.unwrap_or(0) >= 2);
    }

    #[test]
    fn empty_text_is_marked() {
        let result = classify_text("");
        assert_eq!(result.content_type, ContentType::Text);
        assert!(result.metadata.is_empty);
    }

    #[test]
    fn image_and_file_take_priority() {
        let classifier = ContentClassifier::default();
        let image = ClipboardPayload::Image(ImagePayload {
            bytes: vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0],
            width: 1,
            height: 1,
            encoding: ImageEncoding::Encoded,
        });
        let result = classifier.classify(&image);
        assert_eq!(result.content_type, ContentType::Image);
        assert_eq!(result.metadata.image_format.as_deref(), Some("image/png"));

        let files = ClipboardPayload::Files(vec!["/tmp/#1a2b3c".to_string()]);
        let result = classifier.classify(&files);
        assert_eq!(result.content_type, ContentType::File);
        assert_eq!(result.metadata.file_count, Some(1));
    }

    #[test]
    fn rich_text_classified_by_plain_part() {
        let payload = ClipboardPayload::RichText {
            rtf: b"{\\rtf1 https://example.com}".to_vec(),
            plain: "https://example.com".to_string(),
        };
        let result = ContentClassifier::default().classify(&payload);
        assert_eq!(result.content_type, ContentType::Link);
    }

    #[test]
    fn custom_rule_order_is_respected() {
        let classifier = ContentClassifier::with_rules(vec![CODE_RULE, COLOR_RULE], CodeDetector::new(1));
        assert_eq!(classifier.rules().len(), 3);
        let result = classifier.classify(&ClipboardPayload::Text("#aabbcc".to_string()));
        assert_eq!(result.content_type, ContentType::Color);

        let result = classifier.classify(&ClipboardPayload::Text("std::io".to_string()));
        assert_eq!(result.content_type, ContentType::Code);
    }

    #[test]
    fn content_type_string_roundtrip() {
        for content_type in [
            ContentType::Text,
            ContentType::Code,
            ContentType::Link,
            ContentType::Color,
            ContentType::Image,
            ContentType::File,
        ] {
            assert_eq!(ContentType::parse(content_type.as_str()), Some(content_type));
        }
        assert_eq!(ContentType::parse("bogus"), None);
    }
}
