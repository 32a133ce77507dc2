use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaGroup {
    Document,
    Image,
    Audio,
    Video,
    Other,
}

const DOCUMENT_EXTS: &[&str] = &[
    "pdf", "doc", "docx", "odt", "pages", "txt", "rtf", "md", "numbers", "xlsx", "xls", "ods",
    "csv", "ppt", "pptx", "key", "epub",
];
const IMAGE_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "heic", "webp", "gif", "tiff", "tif", "bmp", "svg",
];
const AUDIO_EXTS: &[&str] = &["mp3", "flac", "wav", "aac", "m4a", "ogg", "opus"];
const VIDEO_EXTS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "m4v", "wmv"];

/// Lowercased extension without the dot, empty when there is none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn classify(path: &Path) -> MediaGroup {
    let ext = extension_of(path);
    let ext = ext.as_str();
    if DOCUMENT_EXTS.contains(&ext) {
        MediaGroup::Document
    } else if IMAGE_EXTS.contains(&ext) {
        MediaGroup::Image
    } else if AUDIO_EXTS.contains(&ext) {
        MediaGroup::Audio
    } else if VIDEO_EXTS.contains(&ext) {
        MediaGroup::Video
    } else {
        MediaGroup::Other
    }
}

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
/// Bytes scanned for the header and an early transparency chunk.
const PNG_HEAD_BYTES: u64 = 4096;

/// True when a PNG looks like an icon, sticker or UI asset rather than a
/// photo or screenshot: tiny, or small with an alpha channel. Only the
/// header is read; unreadable or non-PNG files are never assets.
pub fn png_asset_hint(path: &Path) -> bool {
    if extension_of(path) != "png" {
        return false;
    }
    let mut head = Vec::new();
    let read = File::open(path).and_then(|f| f.take(PNG_HEAD_BYTES).read_to_end(&mut head));
    if read.is_err() || head.len() < 26 {
        return false;
    }
    if &head[..8] != PNG_SIGNATURE || &head[12..16] != b"IHDR" {
        return false;
    }

    let width = u32::from_be_bytes([head[16], head[17], head[18], head[19]]) as u64;
    let height = u32::from_be_bytes([head[20], head[21], head[22], head[23]]) as u64;
    let color_type = head[25];
    let has_alpha = matches!(color_type, 4 | 6) || head.windows(4).any(|w| w == b"tRNS");

    let longest = width.max(height);
    let area = width * height;
    let very_small = longest <= 256 || area <= 128 * 128;
    let smallish = longest <= 1024 || area <= 512 * 512;
    very_small || (smallish && has_alpha)
}
