//! 系统全局快捷键宿主（global-hotkey）
//!
//! ## 实现思路
//!
//! - `GlobalHotKeyManager` 依赖所在线程的系统事件循环：Windows 上热键消息投递到
//!   创建线程的消息队列，macOS 上由主线程 run loop 派发。因此管理器在调用
//!   `NativeHotKeys::new` 的线程上创建，并由返回的 `HotKeyEventLoop` 在同一线程上
//!   驱动；macOS 上该线程必须是主线程。
//! - 事件循环每一轮：泵一次系统消息，处理注册/注销命令，派发热键事件。
//! - `NativeHotKeys` 可在任意其他线程使用，注册/注销经命令通道转交并等待应答；
//!   在事件循环线程上同步调用会返回错误而不是死锁。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::Duration;

use global_hotkey::hotkey::{Code, HotKey, Modifiers as HotKeyModifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};

use crate::error::AppError;
use crate::keys::{Key, KeyCombo, Modifiers};

use super::{HostBindingId, HostCallback, HotKeyHost, KeyState};

/// 每轮等待系统消息的时长
const PUMP_INTERVAL: Duration = Duration::from_millis(20);

type Reply = mpsc::Sender<Result<(), global_hotkey::Error>>;

enum ManagerCommand {
    Register(HotKey, Reply),
    Unregister(HotKey, Reply),
}

type CallbackMap = HashMap<u32, (HotKey, HostCallback)>;

pub struct NativeHotKeys {
    commands: mpsc::Sender<ManagerCommand>,
    callbacks: Arc<Mutex<CallbackMap>>,
    loop_thread: ThreadId,
}

/// 拥有管理器的事件循环，只能在创建它的线程上运行
pub struct HotKeyEventLoop {
    manager: GlobalHotKeyManager,
    commands: mpsc::Receiver<ManagerCommand>,
    callbacks: Arc<Mutex<CallbackMap>>,
}

fn lock(callbacks: &Mutex<CallbackMap>) -> MutexGuard<'_, CallbackMap> {
    callbacks.lock().unwrap_or_else(|poisoned| {
        log::warn!("快捷键回调表锁中毒，继续使用恢复数据");
        poisoned.into_inner()
    })
}

impl NativeHotKeys {
    /// 在当前线程创建管理器；系统不支持全局快捷键时返回错误
    pub fn new() -> Result<(Self, HotKeyEventLoop), AppError> {
        let manager =
            GlobalHotKeyManager::new().map_err(|e| AppError::Config(format!("初始化全局快捷键失败: {}", e)))?;
        let (commands, command_rx) = mpsc::channel::<ManagerCommand>();
        let callbacks: Arc<Mutex<CallbackMap>> = Arc::new(Mutex::new(HashMap::new()));

        log::info!("⌨️ 全局快捷键宿主已就绪");
        Ok((
            Self { commands, callbacks: Arc::clone(&callbacks), loop_thread: std::thread::current().id() },
            HotKeyEventLoop { manager, commands: command_rx, callbacks },
        ))
    }

    fn send(&self, command: impl FnOnce(Reply) -> ManagerCommand) -> Result<(), AppError> {
        if std::thread::current().id() == self.loop_thread {
            return Err(AppError::Config("不能在快捷键事件循环线程上同步注册或注销".to_string()));
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| AppError::Config("快捷键事件循环已退出".to_string()))?;
        match reply_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(map_hotkey_error(e)),
            Err(_) => Err(AppError::Config("快捷键事件循环未应答".to_string())),
        }
    }
}

impl HotKeyEventLoop {
    /// 阻塞运行直到 `stop` 置位
    pub fn run_until(self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            os_loop::pump(PUMP_INTERVAL);
            self.turn();
        }
        log::debug!("快捷键事件循环退出");
    }

    fn turn(&self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ManagerCommand::Register(hotkey, reply) => {
                    let _ = reply.send(self.manager.register(hotkey));
                }
                ManagerCommand::Unregister(hotkey, reply) => {
                    let _ = reply.send(self.manager.unregister(hotkey));
                }
            }
        }

        let receiver = GlobalHotKeyEvent::receiver();
        while let Ok(event) = receiver.try_recv() {
            let callback = lock(&self.callbacks).get(&event.id).map(|(_, cb)| Arc::clone(cb));
            let Some(callback) = callback else {
                continue;
            };
            let state = match event.state {
                HotKeyState::Pressed => KeyState::Pressed,
                HotKeyState::Released => KeyState::Released,
            };
            callback(state);
        }
    }
}

#[cfg(target_os = "windows")]
mod os_loop {
    use std::ffi::c_void;
    use std::time::Duration;

    #[repr(C)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[repr(C)]
    struct Msg {
        hwnd: *mut c_void,
        message: u32,
        wparam: usize,
        lparam: isize,
        time: u32,
        pt: Point,
    }

    const PM_REMOVE: u32 = 0x0001;

    #[link(name = "user32")]
    unsafe extern "system" {
        fn PeekMessageW(msg: *mut Msg, hwnd: *mut c_void, min: u32, max: u32, remove: u32) -> i32;
        fn TranslateMessage(msg: *const Msg) -> i32;
        fn DispatchMessageW(msg: *const Msg) -> isize;
    }

    /// 取空本线程消息队列后短暂休眠
    pub fn pump(wait: Duration) {
        // SAFETY: 标准 Win32 消息泵，Msg 与 MSG 布局一致
        unsafe {
            let mut msg: Msg = std::mem::zeroed();
            while PeekMessageW(&mut msg, std::ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        std::thread::sleep(wait);
    }
}

#[cfg(target_os = "macos")]
mod os_loop {
    use std::ffi::c_void;
    use std::time::Duration;

    const RUN_FINISHED: i32 = 1;

    #[link(name = "CoreFoundation", kind = "framework")]
    unsafe extern "C" {
        static kCFRunLoopDefaultMode: *const c_void;
        fn CFRunLoopRunInMode(mode: *const c_void, seconds: f64, return_after_source_handled: u8) -> i32;
    }

    /// 在当前（主）线程的 run loop 上运行一段时间
    pub fn pump(wait: Duration) {
        // SAFETY: kCFRunLoopDefaultMode 是 CoreFoundation 导出的常量
        let result = unsafe { CFRunLoopRunInMode(kCFRunLoopDefaultMode, wait.as_secs_f64(), 0) };
        // 没有任何输入源时 run loop 立即返回
        if result == RUN_FINISHED {
            std::thread::sleep(wait);
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
mod os_loop {
    use std::time::Duration;

    /// X11 后端自带事件线程，这里只需让出时间片
    pub fn pump(wait: Duration) {
        std::thread::sleep(wait);
    }
}

fn map_hotkey_error(error: global_hotkey::Error) -> AppError {
    match error {
        global_hotkey::Error::AlreadyRegistered(_) | global_hotkey::Error::FailedToRegister(_) => {
            log::warn!("组合键已被占用: {}", error);
            AppError::AlreadyBound
        }
        other => AppError::InvalidHotKeyCombo(other.to_string()),
    }
}

fn to_code(key: Key) -> Result<Code, AppError> {
    let code = match key {
        Key::Char(c) => match c {
            'a' => Code::KeyA,
            'b' => Code::KeyB,
            'c' => Code::KeyC,
            'd' => Code::KeyD,
            'e' => Code::KeyE,
            'f' => Code::KeyF,
            'g' => Code::KeyG,
            'h' => Code::KeyH,
            'i' => Code::KeyI,
            'j' => Code::KeyJ,
            'k' => Code::KeyK,
            'l' => Code::KeyL,
            'm' => Code::KeyM,
            'n' => Code::KeyN,
            'o' => Code::KeyO,
            'p' => Code::KeyP,
            'q' => Code::KeyQ,
            'r' => Code::KeyR,
            's' => Code::KeyS,
            't' => Code::KeyT,
            'u' => Code::KeyU,
            'v' => Code::KeyV,
            'w' => Code::KeyW,
            'x' => Code::KeyX,
            'y' => Code::KeyY,
            'z' => Code::KeyZ,
            '0' => Code::Digit0,
            '1' => Code::Digit1,
            '2' => Code::Digit2,
            '3' => Code::Digit3,
            '4' => Code::Digit4,
            '5' => Code::Digit5,
            '6' => Code::Digit6,
            '7' => Code::Digit7,
            '8' => Code::Digit8,
            '9' => Code::Digit9,
            other => return Err(AppError::InvalidHotKeyCombo(format!("不支持的按键: {}", other))),
        },
        Key::Function(n) => match n {
            1 => Code::F1,
            2 => Code::F2,
            3 => Code::F3,
            4 => Code::F4,
            5 => Code::F5,
            6 => Code::F6,
            7 => Code::F7,
            8 => Code::F8,
            9 => Code::F9,
            10 => Code::F10,
            11 => Code::F11,
            12 => Code::F12,
            other => return Err(AppError::InvalidHotKeyCombo(format!("不支持的功能键: F{}", other))),
        },
        Key::Space => Code::Space,
        Key::Enter => Code::Enter,
        Key::Tab => Code::Tab,
        Key::Escape => Code::Escape,
    };
    Ok(code)
}

fn to_modifiers(modifiers: Modifiers) -> HotKeyModifiers {
    let mut mods = HotKeyModifiers::empty();
    if modifiers.control {
        mods |= HotKeyModifiers::CONTROL;
    }
    if modifiers.alt {
        mods |= HotKeyModifiers::ALT;
    }
    if modifiers.shift {
        mods |= HotKeyModifiers::SHIFT;
    }
    if modifiers.meta {
        mods |= HotKeyModifiers::META;
    }
    mods
}

fn to_hotkey(combo: KeyCombo) -> Result<HotKey, AppError> {
    Ok(HotKey::new(Some(to_modifiers(combo.modifiers)), to_code(combo.key)?))
}

impl HotKeyHost for NativeHotKeys {
    fn bind(&self, combo: KeyCombo, callback: HostCallback) -> Result<HostBindingId, AppError> {
        let hotkey = to_hotkey(combo)?;
        if lock(&self.callbacks).contains_key(&hotkey.id()) {
            return Err(AppError::AlreadyBound);
        }

        self.send(|reply| ManagerCommand::Register(hotkey, reply))?;
        lock(&self.callbacks).insert(hotkey.id(), (hotkey, callback));
        Ok(HostBindingId(u64::from(hotkey.id())))
    }

    fn unbind(&self, id: HostBindingId) -> Result<(), AppError> {
        let key = u32::try_from(id.0).map_err(|_| AppError::NotFound(format!("宿主绑定 {:?}", id)))?;
        let (hotkey, _) = lock(&self.callbacks)
            .remove(&key)
            .ok_or_else(|| AppError::NotFound(format!("宿主绑定 {:?}", id)))?;
        self.send(|reply| ManagerCommand::Unregister(hotkey, reply))
    }
}
