use crate::errors::{AppError, Result};
use log::info;

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Sanitizes one path segment, substituting `fallback` when nothing usable is left.
pub fn sanitize_segment(segment: &str, fallback: &str) -> String {
    let cleaned = sanitize_filename(segment);
    let cleaned = cleaned.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Sanitizes track filename in "Artist - Title" format
pub fn sanitize_track_filename(artist: &str, title: &str) -> String {
    sanitize_segment(&format!("{} - {}", artist.trim(), title.trim()), "Unknown Track")
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| AppError::io(format!("create directory {:?}", path), e))?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}
