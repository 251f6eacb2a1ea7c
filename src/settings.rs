//! 引擎配置
//!
//! # 设计思路
//!
//! 配置由外部设置模块写入 JSON 文件，引擎只负责读取、归一化与回写。
//! 经验调优的时间参数（重复捕获容差、自动移入回收站宽限期等）全部暴露为配置，
//! 不写死为常量。
//!
//! # 实现思路
//!
//! - 字段使用 camelCase 序列化，缺省字段走 `Default`。
//! - 文件不存在返回默认配置；内容损坏时记录警告并回退默认配置。
//! - `normalized()` 把各项数值钳制到安全范围，防止配置写错拖垮轮询。

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const POLL_INTERVAL_MIN_MS: u64 = 50;
const POLL_INTERVAL_MAX_MS: u64 = 5_000;
const SETTLE_DELAY_MAX_MS: u64 = 200;
const RECAPTURE_TOLERANCE_MAX_MS: u64 = 60_000;
const SCAN_INTERVAL_MIN_SECS: u64 = 10;
const RECENT_WINDOW_MIN: usize = 1;
const RECENT_WINDOW_MAX: usize = 4_096;

/// 默认隐私黑名单：常见密码管理器的应用标识
pub const DEFAULT_PRIVACY_DENYLIST: &[&str] = &[
    "com.agilebits.onepassword7",
    "com.1password.1password",
    "com.bitwarden.desktop",
    "org.keepassxc.keepassxc",
    "com.lastpass.LastPass",
    "com.apple.keychainaccess",
    "com.dashlane.dashlanephonefinal",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    pub recapture_tolerance_ms: u64,
    pub paste_settle_delay_ms: u64,
    pub retention_period_days: u32,
    /// `None` 表示关闭自动移入回收站
    pub trash_grace_period_days: Option<u32>,
    pub privacy_denylist: BTreeSet<String>,
    pub lifecycle_scan_interval_secs: u64,
    pub recent_window_size: usize,
    pub code_detection_threshold: usize,
    /// 唤起快捷键，例如 `"Ctrl+Shift+V"`
    pub hotkey: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            recapture_tolerance_ms: 1_500,
            paste_settle_delay_ms: 5,
            retention_period_days: 30,
            trash_grace_period_days: None,
            privacy_denylist: DEFAULT_PRIVACY_DENYLIST.iter().map(|s| s.to_string()).collect(),
            lifecycle_scan_interval_secs: 3_600,
            recent_window_size: 64,
            code_detection_threshold: 2,
            hotkey: None,
        }
    }
}

impl EngineSettings {
    /// 返回数值已钳制到合法范围的副本
    pub fn normalized(mut self) -> Self {
        self.poll_interval_ms = self.poll_interval_ms.clamp(POLL_INTERVAL_MIN_MS, POLL_INTERVAL_MAX_MS);
        self.paste_settle_delay_ms = self.paste_settle_delay_ms.min(SETTLE_DELAY_MAX_MS);
        self.recapture_tolerance_ms = self.recapture_tolerance_ms.min(RECAPTURE_TOLERANCE_MAX_MS);
        self.retention_period_days = self.retention_period_days.max(1);
        self.trash_grace_period_days = self.trash_grace_period_days.map(|days| days.max(1));
        self.lifecycle_scan_interval_secs = self.lifecycle_scan_interval_secs.max(SCAN_INTERVAL_MIN_SECS);
        self.recent_window_size = self.recent_window_size.clamp(RECENT_WINDOW_MIN, RECENT_WINDOW_MAX);
        self.code_detection_threshold = self.code_detection_threshold.max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn paste_settle_delay(&self) -> Duration {
        Duration::from_millis(self.paste_settle_delay_ms)
    }

    pub fn recapture_tolerance(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.recapture_tolerance_ms as i64)
    }

    pub fn lifecycle_scan_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle_scan_interval_secs)
    }

    pub fn is_denylisted(&self, app_id: Option<&str>) -> bool {
        denylist_contains(&self.privacy_denylist, app_id)
    }
}

/// 来源应用是否在隐私黑名单中；缺失或空的来源标识永不命中
pub fn denylist_contains(denylist: &BTreeSet<String>, app_id: Option<&str>) -> bool {
    match app_id {
        Some(id) if !id.is_empty() => denylist.contains(id),
        _ => false,
    }
}

/// 默认数据目录：`<data_dir>/clipboard-keeper`
pub fn default_data_dir() -> Result<PathBuf, AppError> {
    dirs::data_dir()
        .map(|dir| dir.join("clipboard-keeper"))
        .ok_or_else(|| AppError::Config("无法确定应用数据目录".to_string()))
}

/// 从文件加载配置；文件缺失或损坏时回退默认值
pub fn load_settings_from_path(path: &Path) -> EngineSettings {
    if !path.exists() {
        return EngineSettings::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<EngineSettings>(&content) {
            Ok(settings) => settings.normalized(),
            Err(e) => {
                log::warn!("解析设置文件失败，使用默认配置: {}", e);
                EngineSettings::default()
            }
        },
        Err(e) => {
            log::warn!("读取设置文件失败，使用默认配置: {}", e);
            EngineSettings::default()
        }
    }
}

pub fn save_settings_to_path(path: &Path, settings: &EngineSettings) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| AppError::Config(format!("序列化设置失败: {}", e)))?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{denylist_contains, load_settings_from_path, save_settings_to_path, EngineSettings};
    use std::collections::BTreeSet;

    fn unique_temp_dir() -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock error")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("clipboard-keeper-settings-test-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = unique_temp_dir();
        let loaded = load_settings_from_path(&dir.join("settings.json"));
        assert_eq!(loaded, EngineSettings::default());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn bad_file_falls_back_to_defaults() {
        let dir = unique_temp_dir();
        let path = dir.join("settings.json");
        std::fs::write(&path, "not-json").expect("write invalid settings");

        assert_eq!(load_settings_from_path(&path), EngineSettings::default());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn save_and_load_roundtrip_with_partial_fields() {
        let dir = unique_temp_dir();
        let path = dir.join("nested").join("settings.json");

        let mut settings = EngineSettings::default();
        settings.trash_grace_period_days = Some(7);
        settings.hotkey = Some("Ctrl+Shift+V".to_string());
        save_settings_to_path(&path, &settings).expect("save settings");
        assert_eq!(load_settings_from_path(&path), settings);

        std::fs::write(&path, r#"{"pollIntervalMs": 1}"#).expect("write partial");
        let loaded = load_settings_from_path(&path);
        assert_eq!(loaded.poll_interval_ms, 50);
        assert_eq!(loaded.retention_period_days, 30);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn normalized_clamps_bounds() {
        let settings = EngineSettings {
            poll_interval_ms: 60_000,
            paste_settle_delay_ms: 1_000,
            retention_period_days: 0,
            trash_grace_period_days: Some(0),
            recent_window_size: 0,
            ..EngineSettings::default()
        }
        .normalized();

        assert_eq!(settings.poll_interval_ms, 5_000);
        assert_eq!(settings.paste_settle_delay_ms, 200);
        assert_eq!(settings.retention_period_days, 1);
        assert_eq!(settings.trash_grace_period_days, Some(1));
        assert_eq!(settings.recent_window_size, 1);
    }

    #[test]
    fn denylist_matches_only_known_ids() {
        let settings = EngineSettings::default();
        assert!(settings.is_denylisted(Some("com.bitwarden.desktop")));
        assert!(!settings.is_denylisted(Some("com.apple.Safari")));
        assert!(!settings.is_denylisted(None));
        assert!(!settings.is_denylisted(Some("")));
    }

    #[test]
    fn empty_denylist_item_never_matches() {
        let denylist: BTreeSet<String> = ["".to_string(), "com.agilebits.onepassword7".to_string()].into();
        assert!(!denylist_contains(&denylist, Some("")));
        assert!(!denylist_contains(&denylist, None));
        assert!(denylist_contains(&denylist, Some("com.agilebits.onepassword7")));
    }
}
