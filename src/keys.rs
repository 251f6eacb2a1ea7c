//! 按键与组合键模型
//!
//! 解析 `"Ctrl+Shift+V"` 形式的组合键描述，供粘贴注入与全局快捷键共用。
//! 至少需要一个修饰键，避免与普通输入冲突。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    pub control: bool,
    pub alt: bool,
    pub shift: bool,
    /// macOS Command / Windows 徽标键
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers { control: false, alt: false, shift: false, meta: false };
    pub const CONTROL: Modifiers = Modifiers { control: true, alt: false, shift: false, meta: false };
    pub const META: Modifiers = Modifiers { control: false, alt: false, shift: false, meta: true };

    pub fn is_empty(&self) -> bool {
        !(self.control || self.alt || self.shift || self.meta)
    }

    /// 当前平台的主修饰键（macOS 为 Command，其余为 Control）
    pub fn primary() -> Modifiers {
        if cfg!(target_os = "macos") {
            Modifiers::META
        } else {
            Modifiers::CONTROL
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// 字母（统一为小写）或数字
    Char(char),
    /// F1-F12
    Function(u8),
    Space,
    Enter,
    Tab,
    Escape,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
            Key::Function(n) => write!(f, "F{}", n),
            Key::Space => f.write_str("Space"),
            Key::Enter => f.write_str("Enter"),
            Key::Tab => f.write_str("Tab"),
            Key::Escape => f.write_str("Escape"),
        }
    }
}

/// 组合键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyCombo {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl KeyCombo {
    pub fn new(modifiers: Modifiers, key: Key) -> Self {
        Self { modifiers, key }
    }

    /// 平台标准粘贴组合键：主修饰键 + V
    pub fn paste() -> Self {
        Self::new(Modifiers::primary(), Key::Char('v'))
    }

    /// 校验：至少包含一个修饰键
    pub fn validate(&self) -> Result<(), AppError> {
        if self.modifiers.is_empty() {
            return Err(AppError::InvalidHotKeyCombo(format!("缺少修饰键: {}", self)));
        }
        Ok(())
    }

    /// 解析 `Modifier[+Modifier...]+Key`
    ///
    /// 修饰键：`Ctrl`/`Control`、`Alt`/`Option`、`Shift`、`Super`/`Cmd`/`Command`/`Meta`；
    /// 按键：A-Z、0-9、F1-F12、Space、Enter/Return、Tab、Escape/Esc。
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = text.split('+').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(AppError::InvalidHotKeyCombo(format!("格式错误: {text:?}")));
        }
        if parts.len() < 2 {
            return Err(AppError::InvalidHotKeyCombo(format!("缺少修饰键: {text:?}")));
        }

        let (modifier_parts, key_part) = parts.split_at(parts.len() - 1);
        let mut modifiers = Modifiers::NONE;
        for name in modifier_parts {
            match name.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.control = true,
                "alt" | "option" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                "super" | "cmd" | "command" | "meta" | "win" => modifiers.meta = true,
                other => {
                    return Err(AppError::InvalidHotKeyCombo(format!("未知修饰键: {other:?}")));
                }
            }
        }

        let key = parse_key(key_part[0])
            .ok_or_else(|| AppError::InvalidHotKeyCombo(format!("未知按键: {:?}", key_part[0])))?;

        let combo = KeyCombo::new(modifiers, key);
        combo.validate()?;
        Ok(combo)
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.modifiers;
        for (on, name) in [(m.control, "Ctrl"), (m.alt, "Alt"), (m.shift, "Shift"), (m.meta, "Super")] {
            if on {
                write!(f, "{}+", name)?;
            }
        }
        write!(f, "{}", self.key)
    }
}

fn parse_key(name: &str) -> Option<Key> {
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        if ch.is_ascii_alphanumeric() {
            return Some(Key::Char(ch.to_ascii_lowercase()));
        }
        return None;
    }

    if let Some(rest) = name.strip_prefix('F').or_else(|| name.strip_prefix('f')) {
        if let Ok(n) = rest.parse::<u8>() {
            if (1..=12).contains(&n) {
                return Some(Key::Function(n));
            }
        }
    }

    match name.to_ascii_lowercase().as_str() {
        "space" => Some(Key::Space),
        "enter" | "return" => Some(Key::Enter),
        "tab" => Some(Key::Tab),
        "escape" | "esc" => Some(Key::Escape),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modifier_combo() {
        let combo = KeyCombo::parse("Ctrl+Shift+V").expect("valid combo");
        assert!(combo.modifiers.control && combo.modifiers.shift);
        assert!(!combo.modifiers.alt && !combo.modifiers.meta);
        assert_eq!(combo.key, Key::Char('v'));
        assert_eq!(combo.to_string(), "Ctrl+Shift+V");
    }

    #[test]
    fn parse_aliases_and_named_keys() {
        let combo = KeyCombo::parse("cmd + option + F5").expect("valid combo");
        assert!(combo.modifiers.meta && combo.modifiers.alt);
        assert_eq!(combo.key, Key::Function(5));

        assert_eq!(KeyCombo::parse("Alt+Space").map(|c| c.key).ok(), Some(Key::Space));
    }

    #[test]
    fn bare_key_is_rejected() {
        assert!(matches!(KeyCombo::parse("V"), Err(AppError::InvalidHotKeyCombo(_))));
        assert!(matches!(
            KeyCombo::new(Modifiers::NONE, Key::Char('v')).validate(),
            Err(AppError::InvalidHotKeyCombo(_))
        ));
    }

    #[test]
    fn unknown_parts_are_rejected() {
        assert!(KeyCombo::parse("Hyper+V").is_err());
        assert!(KeyCombo::parse("Ctrl+F13").is_err());
        assert!(KeyCombo::parse("Ctrl+").is_err());
        assert!(KeyCombo::parse("Ctrl+PageUp").is_err());
    }

    #[test]
    fn paste_combo_uses_primary_modifier() {
        let combo = KeyCombo::paste();
        assert_eq!(combo.key, Key::Char('v'));
        assert_eq!(combo.modifiers, Modifiers::primary());
        assert!(combo.validate().is_ok());
    }
}
