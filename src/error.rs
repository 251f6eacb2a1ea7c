//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 引擎内所有可能失败的操作（持久化、剪贴板读取、按键合成、权限检查、
//! 快捷键注册）统一返回 `Result<T, AppError>`，每个变体对应一种具体的
//! 错误语义，调用方可以按分支决定是否提示用户或等待下一次触发。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - `rusqlite::Error` 不做 `From` 自动转换，而是在调用点映射为
//!   `AppError::Persistence`，消息中写明失败的具体操作。
//! - 分类与去重永不失败，因此这里没有对应的错误变体。

/// 引擎级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 宿主未授予输入注入（辅助功能）权限，由调用方负责提示用户
    #[error("未获得输入注入权限")]
    PermissionDenied,

    /// 剪贴板暂时不可读（瞬时错误，跳过本轮即可）
    #[error("剪贴板暂不可读: {0}")]
    ClipboardUnreadable(String),

    /// 写入系统剪贴板失败
    #[error("写入剪贴板失败: {0}")]
    ClipboardWrite(String),

    /// 持久化层不可用或写入失败
    #[error("持久化失败: {0}")]
    Persistence(String),

    /// 非去重写入违反了“同内容仅一条未删除记录”约束
    #[error("重复内容: {0}")]
    DuplicateEntry(String),

    /// 记录不存在
    #[error("记录不存在: {0}")]
    NotFound(String),

    /// 快捷键组合不合法（缺少修饰键、未知按键等）
    #[error("快捷键组合不合法: {0}")]
    InvalidHotKeyCombo(String),

    /// 调度器已有绑定（需先注销），或宿主报告该组合键已被占用
    #[error("快捷键已绑定或被占用")]
    AlreadyBound,

    /// 合成按键事件失败
    #[error("输入注入失败: {0}")]
    InjectionFailed(String),

    /// 配置文件读取或解析失败
    #[error("配置错误: {0}")]
    Config(String),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// 是否为瞬时错误（下一次自然触发时可能恢复）
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::ClipboardUnreadable(_) | AppError::Persistence(_))
    }
}
