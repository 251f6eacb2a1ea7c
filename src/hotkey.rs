//! 全局快捷键调度
//!
//! # 设计思路
//!
//! 调度器同一时刻最多持有一个绑定。宿主只负责“组合键 → 按下/抬起通知”，
//! 调度器负责：
//! - 组合键校验（至少一个修饰键）
//! - 长按自动重复的抑制：按下后直到抬起只触发一次
//! - 注销后的静默：注销返回后不再调用回调，即使宿主仍有排队中的事件
//!
//! # 实现思路
//!
//! - 每个绑定持有一个 `RwLock<bool>` 闸门：包装后的回调持读锁完成“检查 + 触发”，
//!   注销持写锁关闭闸门，因此注销返回时不存在仍在执行的回调。
//! - `on_trigger` 内不得同步调用 `unregister`，否则会等待自身持有的读锁。

#[cfg(feature = "native")]
#[path = "hotkey/platform.rs"]
mod platform;

#[cfg(feature = "native")]
pub use platform::{HotKeyEventLoop, NativeHotKeys};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::AppError;
use crate::keys::KeyCombo;

/// 宿主上报的按键状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

pub type HostCallback = Arc<dyn Fn(KeyState) + Send + Sync>;

/// 宿主侧绑定句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostBindingId(pub u64);

/// 宿主全局快捷键能力
pub trait HotKeyHost: Send + Sync {
    /// 绑定组合键；组合键已被占用时返回 `AlreadyBound`
    fn bind(&self, combo: KeyCombo, callback: HostCallback) -> Result<HostBindingId, AppError>;

    fn unbind(&self, id: HostBindingId) -> Result<(), AppError>;
}

/// 注册凭证，注销时交回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(u64);

struct ActiveBinding {
    token: RegistrationToken,
    combo: KeyCombo,
    host_id: HostBindingId,
    gate: Arc<RwLock<bool>>,
}

/// 关闭闸门；等待正在执行的回调结束后返回
fn close_gate(gate: &RwLock<bool>) {
    let mut open = gate.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *open = false;
}

pub struct HotKeyDispatcher {
    host: Arc<dyn HotKeyHost>,
    on_trigger: Arc<dyn Fn() + Send + Sync>,
    binding: Mutex<Option<ActiveBinding>>,
    next_token: AtomicU64,
}

impl HotKeyDispatcher {
    pub fn new(host: Arc<dyn HotKeyHost>, on_trigger: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            host,
            on_trigger: Arc::new(on_trigger),
            binding: Mutex::new(None),
            next_token: AtomicU64::new(1),
        }
    }

    /// 解析并注册，例如 `"Ctrl+Shift+V"`
    pub fn register_str(&self, combo: &str) -> Result<RegistrationToken, AppError> {
        self.register(KeyCombo::parse(combo)?)
    }

    pub fn register(&self, combo: KeyCombo) -> Result<RegistrationToken, AppError> {
        combo.validate()?;

        let mut binding = self.lock_binding();
        if binding.is_some() {
            return Err(AppError::AlreadyBound);
        }

        let gate = Arc::new(RwLock::new(true));
        let held = Arc::new(AtomicBool::new(false));
        let callback: HostCallback = {
            let gate = Arc::clone(&gate);
            let on_trigger = Arc::clone(&self.on_trigger);
            Arc::new(move |state| {
                let open = gate.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                if !*open {
                    return;
                }
                match state {
                    KeyState::Pressed => {
                        if !held.swap(true, Ordering::AcqRel) {
                            on_trigger();
                        }
                    }
                    KeyState::Released => held.store(false, Ordering::Release),
                }
            })
        };

        let host_id = self.host.bind(combo, callback)?;
        let token = RegistrationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        *binding = Some(ActiveBinding { token, combo, host_id, gate });

        log::info!("⌨️ 已注册全局快捷键: {}", combo);
        Ok(token)
    }

    /// 注销；返回后回调不会再被调用
    pub fn unregister(&self, token: RegistrationToken) -> Result<(), AppError> {
        let mut binding = self.lock_binding();
        let current = match binding.as_ref() {
            Some(current) if current.token == token => current,
            _ => return Err(AppError::NotFound(format!("快捷键注册 {:?}", token))),
        };

        close_gate(&current.gate);
        let host_id = current.host_id;
        let combo = current.combo;
        *binding = None;

        if let Err(e) = self.host.unbind(host_id) {
            log::warn!("宿主解绑快捷键 {} 失败: {}", combo, e);
        }
        log::info!("已注销全局快捷键: {}", combo);
        Ok(())
    }

    pub fn current_combo(&self) -> Option<KeyCombo> {
        self.lock_binding().as_ref().map(|binding| binding.combo)
    }

    fn lock_binding(&self) -> std::sync::MutexGuard<'_, Option<ActiveBinding>> {
        self.binding.lock().unwrap_or_else(|poisoned| {
            log::warn!("快捷键绑定锁中毒，继续使用恢复数据");
            poisoned.into_inner()
        })
    }
}

impl Drop for HotKeyDispatcher {
    fn drop(&mut self) {
        if let Some(binding) = self.lock_binding().take() {
            close_gate(&binding.gate);
            if let Err(e) = self.host.unbind(binding.host_id) {
                log::debug!("释放快捷键绑定失败: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::fakes::ManualHotKeys;

    fn dispatcher(host: Arc<ManualHotKeys>) -> (HotKeyDispatcher, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let dispatcher = HotKeyDispatcher::new(host, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (dispatcher, fired)
    }

    #[test]
    fn press_fires_once_until_release() {
        let host = Arc::new(ManualHotKeys::new());
        let (dispatcher, fired) = dispatcher(host.clone());
        let combo = KeyCombo::parse("Ctrl+Shift+V").expect("combo");
        dispatcher.register(combo).expect("register");

        host.press(combo);
        host.press(combo);
        host.press(combo);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        host.release(combo);
        host.press(combo);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn second_registration_is_rejected() {
        let host = Arc::new(ManualHotKeys::new());
        let (dispatcher, _) = dispatcher(host);
        dispatcher.register_str("Alt+Space").expect("first");
        assert!(matches!(dispatcher.register_str("Ctrl+K"), Err(AppError::AlreadyBound)));
    }

    #[test]
    fn combo_without_modifier_is_invalid() {
        let host = Arc::new(ManualHotKeys::new());
        let (dispatcher, _) = dispatcher(host.clone());
        assert!(matches!(dispatcher.register_str("V"), Err(AppError::InvalidHotKeyCombo(_))));
        assert_eq!(host.binding_count(), 0);
    }

    #[test]
    fn unregister_silences_callback() {
        let host = Arc::new(ManualHotKeys::new());
        let (dispatcher, fired) = dispatcher(host.clone());
        let combo = KeyCombo::parse("Super+C").expect("combo");
        let token = dispatcher.register(combo).expect("register");

        let stale = host.callback_for(combo).expect("bound callback");
        dispatcher.unregister(token).expect("unregister");
        stale(KeyState::Pressed);

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(host.binding_count(), 0);
        assert!(dispatcher.current_combo().is_none());
        assert!(matches!(dispatcher.unregister(token), Err(AppError::NotFound(_))));
    }

    #[test]
    fn no_trigger_runs_after_unregister_returns() {
        let combo = KeyCombo::parse("Ctrl+Shift+V").expect("combo");
        for _ in 0..500 {
            let host = Arc::new(ManualHotKeys::new());
            let unregistered = Arc::new(AtomicBool::new(false));
            let late = Arc::new(AtomicUsize::new(0));
            let dispatcher = {
                let unregistered = Arc::clone(&unregistered);
                let late = Arc::clone(&late);
                HotKeyDispatcher::new(host.clone(), move || {
                    if unregistered.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                })
            };
            let token = dispatcher.register(combo).expect("register");
            let callback = host.callback_for(combo).expect("bound callback");
            let stop = AtomicBool::new(false);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    while !stop.load(Ordering::SeqCst) {
                        callback(KeyState::Pressed);
                        callback(KeyState::Released);
                    }
                });
                dispatcher.unregister(token).expect("unregister");
                unregistered.store(true, Ordering::SeqCst);
                stop.store(true, Ordering::SeqCst);
            });

            assert_eq!(late.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn host_conflict_is_reported() {
        let host = Arc::new(ManualHotKeys::new());
        let combo = KeyCombo::parse("Ctrl+Alt+H").expect("combo");
        host.occupy(combo);

        let (dispatcher, _) = dispatcher(host);
        assert!(matches!(dispatcher.register(combo), Err(AppError::AlreadyBound)));
        assert!(dispatcher.current_combo().is_none());
    }
}
