//! # 剪贴板历史守护进程 — 应用入口
//!
//! 本文件只负责组装：加载设置、打开历史库、接入系统宿主、启动监听与清理调度，
//! 直到收到 Ctrl-C。业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。
//!
//! 用法：`clipboard-keeper [数据目录]`，缺省使用系统数据目录。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clipboard_keeper::clipboard::listener::{PasteboardWatcher, WatcherConfig};
use clipboard_keeper::clipboard::platform::NativeClipboard;
use clipboard_keeper::clock::SystemClock;
use clipboard_keeper::db::{HistoryStore, SqliteRepository};
use clipboard_keeper::error::AppError;
use clipboard_keeper::hotkey::{HotKeyDispatcher, NativeHotKeys};
use clipboard_keeper::input::{NativeInput, PasteInjector};
use clipboard_keeper::lifecycle::{LifecycleManager, RetentionPolicy};
use clipboard_keeper::settings::{self, EngineSettings};
use tokio::runtime::Runtime;

const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "history.db";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("创建异步运行时失败: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&runtime) {
        log::error!("启动失败: {err}");
        std::process::exit(1);
    }
}

/// 主线程留给快捷键事件循环，其余工作都在运行时的线程池上
fn run(runtime: &Runtime) -> Result<(), AppError> {
    let _context = runtime.enter();

    let data_dir = match std::env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => settings::default_data_dir()?,
    };
    log::info!("setup: 数据目录 {}", data_dir.display());

    let settings: EngineSettings = settings::load_settings_from_path(&data_dir.join(SETTINGS_FILE));

    let repo = Arc::new(SqliteRepository::open(&data_dir.join(DATABASE_FILE))?);
    let store = Arc::new(HistoryStore::new(repo, Arc::new(SystemClock)));
    log::info!("setup: 历史库已打开");

    let clipboard = Arc::new(NativeClipboard::new());
    let watcher = Arc::new(PasteboardWatcher::new(
        clipboard.clone(),
        Arc::clone(&store),
        WatcherConfig::from_settings(&settings),
    ));

    // 清除的条目同步移出去重窗口
    let lifecycle = {
        let watcher = Arc::clone(&watcher);
        Arc::new(
            LifecycleManager::new(Arc::clone(&store), RetentionPolicy::from_settings(&settings))
                .with_removal_hook(move |id| watcher.forget_entry(id)),
        )
    };

    let injector = Arc::new(PasteInjector::new(
        Arc::new(NativeInput::new()),
        clipboard,
        settings.paste_settle_delay(),
    ));
    if !injector.request_permission()? {
        log::warn!("未获得输入注入权限，快捷键粘贴将不可用，授权后无需重启");
    }

    watcher.start()?;
    let lifecycle_handle = lifecycle.spawn(settings.lifecycle_scan_interval())?;

    // 快捷键不可用时守护进程仍继续运行
    let hotkeys = match settings.hotkey.clone() {
        Some(combo) => match NativeHotKeys::new() {
            Ok(pair) => Some((combo, pair)),
            Err(err) => {
                log::warn!("全局快捷键不可用: {err}");
                None
            }
        },
        None => None,
    };

    match hotkeys {
        Some((combo, (host, event_loop))) => {
            let stop = Arc::new(AtomicBool::new(false));
            let loop_stop = Arc::clone(&stop);
            runtime.spawn(async move {
                let host = Arc::new(host);
                let dispatcher = tokio::task::spawn_blocking(move || bind_hotkey(&combo, host, store, injector))
                    .await
                    .ok()
                    .flatten();

                log::info!("✅ 剪贴板历史引擎已启动，Ctrl-C 退出");
                wait_for_shutdown().await;

                // 注销要由仍在运行的事件循环应答
                if let Some(dispatcher) = dispatcher {
                    let _ = tokio::task::spawn_blocking(move || drop(dispatcher)).await;
                }
                stop.store(true, Ordering::SeqCst);
            });
            event_loop.run_until(&loop_stop);
        }
        None => {
            log::info!("✅ 剪贴板历史引擎已启动，Ctrl-C 退出");
            runtime.block_on(wait_for_shutdown());
        }
    }

    lifecycle_handle.stop();
    watcher.stop();
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("监听退出信号失败: {err}");
    }
    log::info!("收到退出信号，正在停止");
}

/// 绑定唤起快捷键：触发时把最近捕获的条目粘贴到当前焦点应用
fn bind_hotkey(
    combo: &str,
    host: Arc<NativeHotKeys>,
    store: Arc<HistoryStore>,
    injector: Arc<PasteInjector>,
) -> Option<HotKeyDispatcher> {
    let runtime = tokio::runtime::Handle::current();
    let dispatcher = HotKeyDispatcher::new(host, move || {
        let store = Arc::clone(&store);
        let injector = Arc::clone(&injector);
        runtime.spawn(async move {
            let entry = match store.latest() {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    log::info!("快捷键触发：历史为空");
                    return;
                }
                Err(err) => {
                    log::warn!("读取最近条目失败: {err}");
                    return;
                }
            };
            log::info!("快捷键触发：粘贴条目 {} ({})", entry.id, entry.content_type);
            if let Err(err) = injector.paste_entry(&entry).await {
                log::warn!("快捷键粘贴失败: {err}");
            }
        });
    });

    match dispatcher.register_str(combo) {
        Ok(_) => Some(dispatcher),
        Err(err) => {
            log::warn!("注册快捷键 {combo} 失败: {err}");
            None
        }
    }
}
