use std::sync::Arc;
use std::time::Duration;

use crate::clipboard::{ClipboardHost, ClipboardPayload};
use crate::db::ClipboardEntry;
use crate::error::AppError;
use crate::keys::KeyCombo;

use super::InputHost;

/// 粘贴注入器
///
/// 把内容放上剪贴板，再向当前焦点应用合成一次“主修饰键 + V”。
/// 权限不足时不合成任何事件，直接返回 `PermissionDenied`。
pub struct PasteInjector {
    input: Arc<dyn InputHost>,
    clipboard: Arc<dyn ClipboardHost>,
    settle_delay: Duration,
    chord: KeyCombo,
}

impl PasteInjector {
    pub fn new(input: Arc<dyn InputHost>, clipboard: Arc<dyn ClipboardHost>, settle_delay: Duration) -> Self {
        Self { input, clipboard, settle_delay, chord: KeyCombo::paste() }
    }

    /// 替换粘贴组合键（默认随平台：macOS 为 Command+V，其余为 Ctrl+V）
    pub fn with_chord(mut self, chord: KeyCombo) -> Self {
        self.chord = chord;
        self
    }

    pub fn chord(&self) -> KeyCombo {
        self.chord
    }

    /// 当前是否已获得注入权限；检查失败视为未授权
    pub fn has_permission(&self) -> bool {
        match self.input.is_trusted() {
            Ok(trusted) => trusted,
            Err(e) => {
                log::warn!("检查输入注入权限失败: {}", e);
                false
            }
        }
    }

    /// 请求授权；已授权时不再提示
    pub fn request_permission(&self) -> Result<bool, AppError> {
        if self.has_permission() {
            return Ok(true);
        }
        log::info!("🔐 请求输入注入权限");
        self.input.request_trust_prompt()?;
        Ok(false)
    }

    /// 粘贴历史条目的内容
    pub async fn paste_entry(&self, entry: &ClipboardEntry) -> Result<(), AppError> {
        self.paste(&entry.payload).await
    }

    /// 写入剪贴板并合成粘贴按键
    ///
    /// 按下与抬起之间等待 `settle_delay`，让目标应用观察到按键状态。
    /// 按下失败时仍尽力发送抬起，避免修饰键残留。
    pub async fn paste(&self, content: &ClipboardPayload) -> Result<(), AppError> {
        if !self.has_permission() {
            log::warn!("未获得输入注入权限，放弃粘贴");
            return Err(AppError::PermissionDenied);
        }

        self.ensure_clipboard(content)?;

        let KeyCombo { modifiers, key } = self.chord;
        if let Err(e) = self.input.synthesize_key_event(key, modifiers, true) {
            if let Err(release_err) = self.input.synthesize_key_event(key, modifiers, false) {
                log::debug!("补发抬起事件失败: {}", release_err);
            }
            return Err(AppError::InjectionFailed(format!("合成按下事件失败: {}", e)));
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        self.input
            .synthesize_key_event(key, modifiers, false)
            .map_err(|e| AppError::InjectionFailed(format!("合成抬起事件失败: {}", e)))?;

        log::debug!("已注入粘贴: {} ({} 字节)", self.chord, content.byte_len());
        Ok(())
    }

    /// 剪贴板已是目标内容时不重复写入
    fn ensure_clipboard(&self, content: &ClipboardPayload) -> Result<(), AppError> {
        let current = match self.clipboard.current_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::debug!("读取剪贴板失败，直接覆盖写入: {}", e);
                None
            }
        };
        if current.as_ref().is_some_and(|snapshot| &snapshot.payload == content) {
            return Ok(());
        }

        self.clipboard
            .set_content(content)
            .map_err(|e| AppError::InjectionFailed(format!("写入剪贴板失败: {}", e)))
    }
}
