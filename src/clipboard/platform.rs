//! 系统剪贴板宿主（arboard）
//!
//! ## 设计思路
//!
//! arboard 不提供变化计数，这里以“当前内容摘要是否变化”合成一个单调计数：
//! 每次读取计数时取内容的 SHA-256，与上次不同则计数加一。
//! arboard 也无法报告来源应用，快照的来源字段为空，隐私名单对此宿主不生效。
//!
//! ## 实现思路
//!
//! - 写入前先完成图片解码等耗时准备，打开剪贴板后只做一次写入调用。
//! - 剪贴板被其他进程占用时有限重试，退避间隔指数增长。

use std::borrow::Cow;
use std::sync::Mutex;
use std::time::Duration;

use arboard::{Clipboard, ImageData};
use sha2::{Digest, Sha256};

use crate::error::AppError;

use super::{ClipboardHost, ClipboardPayload, ClipboardSnapshot, ImageEncoding, ImagePayload};

const WRITE_MAX_ATTEMPTS: u32 = 3;
const WRITE_RETRY_BASE_DELAY_MS: u64 = 20;
const WRITE_RETRY_MAX_DELAY_MS: u64 = 200;

#[derive(Default)]
struct ChangeTracker {
    last_digest: Option<Vec<u8>>,
    count: i64,
}

/// 基于 arboard 的系统剪贴板
#[derive(Default)]
pub struct NativeClipboard {
    tracker: Mutex<ChangeTracker>,
}

/// 写入前准备好的数据
enum PreparedWrite {
    Text(String),
    Image { width: usize, height: usize, rgba: Vec<u8> },
}

impl NativeClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_clipboard() -> Result<Clipboard, AppError> {
    Clipboard::new().map_err(|e| AppError::ClipboardUnreadable(format!("打开系统剪贴板失败: {}", e)))
}

fn read_payload() -> Result<Option<ClipboardPayload>, AppError> {
    let mut clipboard = open_clipboard()?;

    match clipboard.get_text() {
        Ok(text) => return Ok(Some(ClipboardPayload::Text(text))),
        Err(arboard::Error::ContentNotAvailable) => {}
        Err(e) => return Err(AppError::ClipboardUnreadable(format!("读取文本失败: {}", e))),
    }

    match clipboard.get_image() {
        Ok(image) => Ok(Some(ClipboardPayload::Image(ImagePayload {
            width: u32::try_from(image.width).unwrap_or(u32::MAX),
            height: u32::try_from(image.height).unwrap_or(u32::MAX),
            bytes: image.bytes.into_owned(),
            encoding: ImageEncoding::RawRgba,
        }))),
        Err(arboard::Error::ContentNotAvailable) => Ok(None),
        Err(e) => Err(AppError::ClipboardUnreadable(format!("读取图片失败: {}", e))),
    }
}

fn digest(payload: Option<&ClipboardPayload>) -> Vec<u8> {
    let mut hasher = Sha256::new();
    match payload {
        Some(payload) => {
            hasher.update(payload.kind_name().as_bytes());
            match payload {
                ClipboardPayload::Image(image) => hasher.update(&image.bytes),
                other => hasher.update(other.canonical_text().unwrap_or_default().as_bytes()),
            }
        }
        None => hasher.update(b"empty"),
    }
    hasher.finalize().to_vec()
}

fn prepare_write(payload: &ClipboardPayload) -> Result<PreparedWrite, AppError> {
    let prepared = match payload {
        ClipboardPayload::Text(text) => PreparedWrite::Text(text.clone()),
        // arboard 无法写入 RTF，退化为纯文本
        ClipboardPayload::RichText { plain, .. } => PreparedWrite::Text(plain.clone()),
        ClipboardPayload::Files(paths) => PreparedWrite::Text(paths.join("\n")),
        ClipboardPayload::Image(image) => match image.encoding {
            ImageEncoding::RawRgba => PreparedWrite::Image {
                width: image.width as usize,
                height: image.height as usize,
                rgba: image.bytes.clone(),
            },
            ImageEncoding::Encoded => {
                let decoded = image::load_from_memory(&image.bytes)
                    .map_err(|e| AppError::ClipboardWrite(format!("图片解码失败: {}", e)))?
                    .to_rgba8();
                PreparedWrite::Image {
                    width: decoded.width() as usize,
                    height: decoded.height() as usize,
                    rgba: decoded.into_raw(),
                }
            }
        },
    };
    Ok(prepared)
}

fn write_once(prepared: &PreparedWrite) -> Result<(), arboard::Error> {
    let mut clipboard = Clipboard::new()?;
    match prepared {
        PreparedWrite::Text(text) => clipboard.set_text(text.as_str()),
        PreparedWrite::Image { width, height, rgba } => clipboard.set_image(ImageData {
            width: *width,
            height: *height,
            bytes: Cow::Borrowed(rgba.as_slice()),
        }),
    }
}

fn compute_retry_delay_ms(attempt: u32) -> u64 {
    let exp = 1_u64 << attempt.saturating_sub(1).min(6);
    WRITE_RETRY_BASE_DELAY_MS.saturating_mul(exp).min(WRITE_RETRY_MAX_DELAY_MS)
}

impl ClipboardHost for NativeClipboard {
    fn current_change_count(&self) -> Result<i64, AppError> {
        let payload = read_payload()?;
        let current = digest(payload.as_ref());

        let mut tracker = self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if tracker.last_digest.as_deref() != Some(current.as_slice()) {
            tracker.last_digest = Some(current);
            tracker.count += 1;
        }
        Ok(tracker.count)
    }

    fn current_snapshot(&self) -> Result<Option<ClipboardSnapshot>, AppError> {
        Ok(read_payload()?.map(ClipboardSnapshot::new))
    }

    fn set_content(&self, payload: &ClipboardPayload) -> Result<(), AppError> {
        let prepared = prepare_write(payload)?;

        let mut attempt = 1;
        loop {
            match write_once(&prepared) {
                Ok(()) => return Ok(()),
                Err(arboard::Error::ClipboardOccupied) if attempt < WRITE_MAX_ATTEMPTS => {
                    let delay = compute_retry_delay_ms(attempt);
                    log::debug!("剪贴板被占用，{}ms 后重试（第 {} 次）", delay, attempt);
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => return Err(AppError::ClipboardWrite(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        assert_eq!(compute_retry_delay_ms(1), 20);
        assert_eq!(compute_retry_delay_ms(2), 40);
        assert_eq!(compute_retry_delay_ms(10), WRITE_RETRY_MAX_DELAY_MS);
    }

    #[test]
    fn digest_distinguishes_kinds() {
        let text = ClipboardPayload::Text("a".into());
        let files = ClipboardPayload::Files(vec!["a".into()]);
        assert_ne!(digest(Some(&text)), digest(Some(&files)));
        assert_eq!(digest(Some(&text)), digest(Some(&ClipboardPayload::Text("a".into()))));
        assert_ne!(digest(None), digest(Some(&text)));
    }

    #[test]
    fn encoded_image_is_decoded_before_write() {
        let mut png = Vec::new();
        image::RgbaImage::from_pixel(2, 3, image::Rgba([1, 2, 3, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .expect("encode png");
        let payload = ClipboardPayload::Image(ImagePayload {
            bytes: png,
            width: 2,
            height: 3,
            encoding: ImageEncoding::Encoded,
        });

        match prepare_write(&payload).expect("prepare") {
            PreparedWrite::Image { width, height, rgba } => {
                assert_eq!((width, height), (2, 3));
                assert_eq!(rgba.len(), 2 * 3 * 4);
            }
            PreparedWrite::Text(_) => panic!("expected image"),
        }
    }
}
