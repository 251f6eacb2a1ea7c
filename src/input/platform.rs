//! 系统输入注入（enigo）
//!
//! 每次合成事件都新建 `Enigo` 实例，不跨调用持有输入源。
//! 按下：先按修饰键再按主键；抬起：先抬主键再抬修饰键。

use enigo::{
    Direction::{Press, Release},
    Enigo, Key as EnigoKey, Keyboard, Settings,
};

use crate::error::AppError;
use crate::keys::{Key, Modifiers};

use super::InputHost;

#[cfg(target_os = "macos")]
const ACCESSIBILITY_SETTINGS_URL: &str = "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility";

#[cfg(target_os = "macos")]
#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn AXIsProcessTrusted() -> bool;
}

/// 基于 enigo 的输入宿主
#[derive(Debug, Default)]
pub struct NativeInput;

impl NativeInput {
    pub fn new() -> Self {
        Self
    }
}

fn to_enigo_key(key: Key) -> EnigoKey {
    match key {
        Key::Char(c) => EnigoKey::Unicode(c),
        Key::Function(n) => match n {
            1 => EnigoKey::F1,
            2 => EnigoKey::F2,
            3 => EnigoKey::F3,
            4 => EnigoKey::F4,
            5 => EnigoKey::F5,
            6 => EnigoKey::F6,
            7 => EnigoKey::F7,
            8 => EnigoKey::F8,
            9 => EnigoKey::F9,
            10 => EnigoKey::F10,
            11 => EnigoKey::F11,
            _ => EnigoKey::F12,
        },
        Key::Space => EnigoKey::Space,
        Key::Enter => EnigoKey::Return,
        Key::Tab => EnigoKey::Tab,
        Key::Escape => EnigoKey::Escape,
    }
}

fn modifier_keys(modifiers: Modifiers) -> Vec<EnigoKey> {
    let mut keys = Vec::with_capacity(4);
    if modifiers.control {
        keys.push(EnigoKey::Control);
    }
    if modifiers.alt {
        keys.push(EnigoKey::Alt);
    }
    if modifiers.shift {
        keys.push(EnigoKey::Shift);
    }
    if modifiers.meta {
        keys.push(EnigoKey::Meta);
    }
    keys
}

impl InputHost for NativeInput {
    #[cfg(target_os = "macos")]
    fn is_trusted(&self) -> Result<bool, AppError> {
        // SAFETY: 无参数的系统查询函数
        Ok(unsafe { AXIsProcessTrusted() })
    }

    #[cfg(not(target_os = "macos"))]
    fn is_trusted(&self) -> Result<bool, AppError> {
        Ok(true)
    }

    #[cfg(target_os = "macos")]
    fn request_trust_prompt(&self) -> Result<(), AppError> {
        std::process::Command::new("open")
            .arg(ACCESSIBILITY_SETTINGS_URL)
            .spawn()
            .map_err(|e| AppError::InjectionFailed(format!("打开辅助功能设置失败: {}", e)))?;
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    fn request_trust_prompt(&self) -> Result<(), AppError> {
        log::info!("当前平台无需授权输入注入");
        Ok(())
    }

    fn synthesize_key_event(&self, key: Key, modifiers: Modifiers, is_down: bool) -> Result<(), AppError> {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| AppError::InjectionFailed(format!("初始化输入模拟失败: {}", e)))?;

        let mods = modifier_keys(modifiers);
        let main = to_enigo_key(key);

        let result = if is_down {
            mods.iter()
                .try_for_each(|m| enigo.key(*m, Press))
                .and_then(|_| enigo.key(main, Press))
        } else {
            enigo
                .key(main, Release)
                .and_then(|_| mods.iter().rev().try_for_each(|m| enigo.key(*m, Release)))
        };

        result.map_err(|e| AppError::InjectionFailed(format!("模拟按键失败: {}", e)))
    }
}
