//! File name normalization and collision-free name selection.

use crate::error::ToolError;
use std::fs;
use std::path::Path;

pub const DEFAULT_MAX_NAME_LEN: usize = 180;

const MAX_SUFFIX_ATTEMPTS: usize = 10_000;
const MAX_EXTENSION_LEN: usize = 16;

fn is_legal(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '(' | ')' | ' ')
}

/// Transliterates to ASCII and collapses every run of illegal characters to `_`.
pub fn safe_ascii(name: &str) -> String {
    let transliterated = deunicode::deunicode(name);

    let mut replaced = String::with_capacity(transliterated.len());
    let mut in_illegal_run = false;
    for c in transliterated.chars() {
        if c.is_whitespace() {
            replaced.push(' ');
            in_illegal_run = false;
        } else if is_legal(c) {
            replaced.push(c);
            in_illegal_run = false;
        } else if !in_illegal_run {
            replaced.push('_');
            in_illegal_run = true;
        }
    }

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = collapsed.trim().to_string();

    // Never produce a hidden entry
    if out.starts_with('.') {
        out.replace_range(0..1, "_");
    }

    if out.is_empty() {
        return "unnamed".to_string();
    }
    out
}

/// Splits `report.final.pdf` into (`report.final`, `.pdf`).
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && name.len() - idx <= MAX_EXTENSION_LEN + 1 => {
            (&name[..idx], &name[idx..])
        }
        _ => (name, ""),
    }
}

/// Shortens an ASCII name to `max_len` bytes while keeping its extension.
pub fn truncate_preserving_extension(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    if ext.len() >= max_len {
        return name[..max_len].to_string();
    }
    let keep = (max_len - ext.len()).min(stem.len());
    let mut short = stem[..keep].trim_end_matches([' ', '.']).to_string();
    if short.is_empty() {
        short.push('_');
    }
    short.push_str(ext);
    short
}

pub fn normalize_file_name(name: &str, max_len: usize) -> String {
    // safe_ascii output is pure ASCII so byte slicing is char-safe
    truncate_preserving_extension(&safe_ascii(name), max_len)
}

/// Normalizes one directory segment of a destination subpath.
pub fn sanitize_segment(segment: &str) -> String {
    match segment.trim() {
        "" | "." | ".." => "_".to_string(),
        trimmed => truncate_preserving_extension(&safe_ascii(trimmed), DEFAULT_MAX_NAME_LEN),
    }
}

/// `name` for attempt 0, `stem (n).ext` afterwards.
pub fn candidate_name(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    format!("{} ({}){}", stem, attempt, ext)
}

/// First candidate that does not exist in `dir`. Dangling symlinks count as taken.
pub fn first_free_name(dir: &Path, name: &str) -> Result<String, ToolError> {
    for attempt in 0..MAX_SUFFIX_ATTEMPTS {
        let candidate = candidate_name(name, attempt);
        if fs::symlink_metadata(dir.join(&candidate)).is_err() {
            return Ok(candidate);
        }
    }
    Err(ToolError::DestinationUnavailable(format!(
        "No free name for {} in {}",
        name,
        dir.display()
    )))
}
