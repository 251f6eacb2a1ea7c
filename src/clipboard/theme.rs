//! 主题色派生
//!
//! 颜色条目直接使用规范化后的色值；图片条目取缩略图的平均色；
//! 其余内容按内容哈希从固定色板中取色。同一内容总是得到同一颜色。

use image::RgbaImage;

use super::classifier::{Classification, ContentType};
use super::{ClipboardPayload, ImageEncoding, ImagePayload};

/// 兜底色板
pub const PALETTE: [&str; 8] = [
    "#5b8def", "#f2994a", "#27ae60", "#eb5757", "#9b51e0", "#2d9cdb", "#f2c94c", "#6fcf97",
];

const SAMPLE_EDGE: u32 = 16;

pub fn derive_theme_color(
    payload: &ClipboardPayload,
    classification: &Classification,
    content_hash: &str,
) -> String {
    match classification.content_type {
        ContentType::Color => classification
            .metadata
            .normalized_hex
            .clone()
            .unwrap_or_else(|| palette_color(content_hash).to_string()),
        ContentType::Image => match payload {
            ClipboardPayload::Image(image) => average_color(image)
                .unwrap_or_else(|| palette_color(content_hash).to_string()),
            _ => palette_color(content_hash).to_string(),
        },
        _ => palette_color(content_hash).to_string(),
    }
}

/// 按十六进制哈希的前两位字节选色
pub fn palette_color(content_hash: &str) -> &'static str {
    let index = content_hash
        .get(..2)
        .and_then(|prefix| u8::from_str_radix(prefix, 16).ok())
        .unwrap_or(0) as usize;
    PALETTE[index % PALETTE.len()]
}

fn average_color(image: &ImagePayload) -> Option<String> {
    let rgba = match image.encoding {
        ImageEncoding::RawRgba => RgbaImage::from_raw(image.width, image.height, image.bytes.clone())?,
        ImageEncoding::Encoded => match image::load_from_memory(&image.bytes) {
            Ok(decoded) => decoded.thumbnail(SAMPLE_EDGE, SAMPLE_EDGE).to_rgba8(),
            Err(e) => {
                log::debug!("图片解码失败，主题色回退色板: {}", e);
                return None;
            }
        },
    };

    let (mut r, mut g, mut b, mut count) = (0u64, 0u64, 0u64, 0u64);
    for pixel in rgba.pixels() {
        let [pr, pg, pb, pa] = pixel.0;
        if pa == 0 {
            continue;
        }
        r += pr as u64;
        g += pg as u64;
        b += pb as u64;
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some(format!("#{:02x}{:02x}{:02x}", r / count, g / count, b / count))
}
