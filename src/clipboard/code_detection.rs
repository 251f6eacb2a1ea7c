//! 代码特征检测模块
//!
//! # 设计思路
//!
//! 单条正则命中容易误判（例如普通英文以 `use ` 开头），因此这里采用打分制：
//! 每命中一类代码特征记一分，总分达到阈值才判定为代码。阈值来自配置。
//!
//! # 实现思路
//!
//! - 使用 `RegexSet` 一次性多模式匹配，命中的每个模式各记一分。
//! - 结构启发式：括号成对且平衡、语句结束符、多行一致缩进，各记一分。
//! - 通过 `once_cell::sync::Lazy` 在首次调用时编译正则，后续零成本复用。

use once_cell::sync::Lazy;
use regex::RegexSet;

/// 默认阈值
pub const DEFAULT_CODE_THRESHOLD: usize = 2;

/// 预编译的代码特征集合
///
/// 检测的模式包括：
/// 1. 行首语言关键字（fn, function, const, let, class, def, import 等）
/// 2. Rust 属性（#![], #[...]）与常见宏调用
/// 3. 闭包语法（|x|）
/// 4. C/C++ 预处理器（#include, #define 等）
/// 5. 类型箭头 / 匹配箭头（->, =>）与作用域解析（::）
/// 6. 可变引用、Result 方法、函数调用后接分号、赋值语句
static CODE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?m)^[\s]*(fn|function|const|let|var|class|struct|impl|mod|use|import|export|def|async|pub|private|static|interface|type|enum|trait|return|if|for|while)\s",
        r"#!\[",
        r"#\[[\w\s:(),=]+\]",
        r"\b(format|println|eprintln|vec|assert|assert_eq)!\(",
        r"\|\s*\w+\s*\|",
        r"(?m)^[\s]*#(include|define|ifdef|ifndef|endif|pragma)\b",
        r"->",
        r"=>",
        r"\w::\w",
        r"&mut\s+\w+",
        r"let\s+mut\s+",
        r"\b(Ok|Err|Some)\(",
        r"\.(unwrap|expect|map_err|then|catch)\(",
        r"\w+\([^()\n]*\)\s*;",
        r"(?m)^\s*(console\.log|print|System\.out\.println)\(",
        r"(?m)^\s*[A-Za-z_][\w.]*\s*(=|\+=|-=|:=)\s*[^=\s]",
    ])
    .unwrap_or_else(|e| {
        log::error!("代码特征正则编译失败: {}", e);
        RegexSet::empty()
    })
});

/// 可配置阈值的代码检测器
#[derive(Debug, Clone, Copy)]
pub struct CodeDetector {
    threshold: usize,
}

impl Default for CodeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_THRESHOLD)
    }
}

impl CodeDetector {
    pub fn new(threshold: usize) -> Self {
        Self { threshold: threshold.max(1) }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// 计算代码特征得分
    pub fn score(&self, text: &str) -> usize {
        if text.trim().len() < 5 && !text.contains('\n') {
            return 0;
        }

        let pattern_hits = CODE_PATTERNS.matches(text).iter().count();
        let structural = [
            has_balanced_braces(text),
            has_statement_terminators(text),
            has_consistent_indentation(text),
        ]
        .iter()
        .filter(|hit| **hit)
        .count();

        pattern_hits + structural
    }

    pub fn is_code(&self, text: &str) -> bool {
        self.score(text) >= self.threshold
    }
}

/// 使用默认阈值判断文本是否可能为代码
pub fn is_likely_code(text: &str) -> bool {
    CodeDetector::default().is_code(text)
}

/// 花括号或方括号成对出现且平衡
fn has_balanced_braces(text: &str) -> bool {
    let mut depth: i64 = 0;
    let mut pairs = 0usize;
    for ch in text.chars() {
        match ch {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
                pairs += 1;
            }
            _ => {}
        }
    }
    depth == 0 && pairs > 0
}

/// 有行以 `;`、`{` 或 `}` 结尾
fn has_statement_terminators(text: &str) -> bool {
    text.lines()
        .map(str::trim_end)
        .any(|line| line.ends_with(';') || line.ends_with('{') || line.ends_with('}'))
}

/// 多行文本中至少两行使用缩进，且缩进字符一致
fn has_consistent_indentation(text: &str) -> bool {
    let indents: Vec<char> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let first = line.chars().next()?;
            if first == '\t' || line.starts_with("  ") {
                Some(first)
            } else {
                None
            }
        })
        .collect();

    indents.len() >= 2 && indents.iter().all(|c| *c == indents[0])
}
