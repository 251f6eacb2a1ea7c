//! 输入注入模块（分层门面）
//!
//! - `InputHost`：宿主输入能力（权限检查、授权提示、合成按键事件）
//! - `injector`：粘贴注入编排，与平台无关
//! - `platform`：基于 enigo 的真实实现（`native` 特性）

#[path = "input/injector.rs"]
mod injector;
#[cfg(feature = "native")]
#[path = "input/platform.rs"]
mod platform;

pub use injector::PasteInjector;
#[cfg(feature = "native")]
pub use platform::NativeInput;

use crate::error::AppError;
use crate::keys::{Key, Modifiers};

/// 宿主输入能力
pub trait InputHost: Send + Sync {
    /// 进程是否已获得输入注入权限
    fn is_trusted(&self) -> Result<bool, AppError>;

    /// 触发系统授权提示（不阻塞等待用户操作）
    fn request_trust_prompt(&self) -> Result<(), AppError>;

    /// 合成一次按下或抬起事件，`modifiers` 作为事件的修饰键标志
    fn synthesize_key_event(&self, key: Key, modifiers: Modifiers, is_down: bool) -> Result<(), AppError>;
}
