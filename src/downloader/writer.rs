use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::io::{AsyncWriteExt, BufWriter};
use crate::api::Song;
use crate::downloader::http_pool::HttpPool;
use crate::downloader::{SongWriter, WriteOutcome};
use crate::errors::{AppError, Result};
use crate::utils::{ensure_dir_exists, sanitize_segment, sanitize_track_filename};

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";
const DEFAULT_EXT: &str = "mp3";
const COVER_FILE: &str = "cover.jpg";

/// `{base}/{Artist}/{Album}`
pub fn album_dir(base_dir: &Path, song: &Song) -> PathBuf {
    base_dir
        .join(sanitize_segment(&song.artist, UNKNOWN_ARTIST))
        .join(sanitize_segment(&song.album, UNKNOWN_ALBUM))
}

/// `{base}/{Artist}/{Album}/{Artist - Name}.{ext}`
pub fn song_path(base_dir: &Path, song: &Song) -> PathBuf {
    let artist = if song.artist.trim().is_empty() { UNKNOWN_ARTIST } else { song.artist.as_str() };
    let ext = song.ext.trim().trim_start_matches('.');
    let ext = if ext.is_empty() {
        DEFAULT_EXT.to_string()
    } else {
        sanitize_segment(ext, DEFAULT_EXT)
    };
    let file_name = format!("{}.{}", sanitize_track_filename(artist, &song.name), ext);
    album_dir(base_dir, song).join(file_name)
}

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary sibling unique to one write, so overlapping writes of the
/// same song never share a partial file.
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let nonce = PART_COUNTER.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".{}-{}.part", std::process::id(), nonce));
    path.with_file_name(name)
}

enum Finished {
    Written(u64),
    /// Another writer put the file in place while this one was streaming.
    AlreadyThere(u64),
}

async fn existing_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

async fn discard(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        debug!("No partial file to remove at {:?}: {}", part, e);
    }
}

/// Streams songs from HTTP into the music directory.
pub struct DiskWriter {
    pool: Arc<HttpPool>,
}

impl DiskWriter {
    pub fn new(pool: Arc<HttpPool>) -> Self {
        Self { pool }
    }

    /// Downloads into a `.part` sibling and renames on success, so a failed
    /// transfer never leaves a file that looks complete.
    async fn stream_to_file(
        &self,
        url: &str,
        path: &Path,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<Finished> {
        let part = part_path(path);
        let written = match self.download_into(url, &part, progress).await {
            Ok(written) => written,
            Err(e) => {
                discard(&part).await;
                return Err(e);
            }
        };

        if let Some(size) = existing_size(path).await {
            discard(&part).await;
            return Ok(Finished::AlreadyThere(size));
        }

        if let Err(e) = tokio::fs::rename(&part, path).await {
            discard(&part).await;
            return Err(AppError::io("finalize downloaded file", e));
        }
        Ok(Finished::Written(written))
    }

    async fn download_into(
        &self,
        url: &str,
        part: &Path,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<u64> {
        let response = self.pool.get(url).await?;
        let file = tokio::fs::File::create(part)
            .await
            .map_err(|e| AppError::io("create audio file", e))?;
        let mut out = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Download(format!("read audio stream: {}", e)))?;
            out.write_all(&chunk)
                .await
                .map_err(|e| AppError::io("write audio file", e))?;
            written += chunk.len() as u64;
            progress(written);
        }

        out.flush().await.map_err(|e| AppError::io("flush audio file", e))?;

        if written == 0 {
            return Err(AppError::Download(format!("empty audio stream from {}", url)));
        }
        Ok(written)
    }
}

#[async_trait::async_trait]
impl SongWriter for DiskWriter {
    async fn write(
        &self,
        base_dir: &Path,
        song: &Song,
        url: &str,
        lyrics: Option<&str>,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<WriteOutcome> {
        let path = song_path(base_dir, song);

        if let Some(size) = existing_size(&path).await {
            info!("⏭️ Already on disk, skipping: {:?}", path);
            progress(size);
            return Ok(WriteOutcome {
                path,
                skipped: true,
                bytes: size,
            });
        }

        if let Some(dir) = path.parent() {
            ensure_dir_exists(dir).await?;
        }

        let bytes = match self.stream_to_file(url, &path, progress).await? {
            Finished::Written(bytes) => bytes,
            Finished::AlreadyThere(size) => {
                info!("⏭️ {} was saved by another task meanwhile: {:?}", song, path);
                return Ok(WriteOutcome {
                    path,
                    skipped: true,
                    bytes: size,
                });
            }
        };
        info!("✅ Saved {} ({} bytes) to {:?}", song, bytes, path);

        if let Some(text) = lyrics.filter(|t| !t.trim().is_empty()) {
            let lrc = path.with_extension("lrc");
            if let Err(e) = tokio::fs::write(&lrc, text).await {
                warn!("Could not write lyrics to {:?}: {}", lrc, e);
            }
        }

        Ok(WriteOutcome {
            path,
            skipped: false,
            bytes,
        })
    }

    async fn write_cover(&self, base_dir: &Path, song: &Song) -> Result<Option<PathBuf>> {
        if song.cover.trim().is_empty() {
            return Ok(None);
        }

        let path = album_dir(base_dir, song).join(COVER_FILE);
        if existing_size(&path).await.is_some() {
            return Ok(Some(path));
        }
        if let Some(dir) = path.parent() {
            ensure_dir_exists(dir).await?;
        }

        let mut ignore = |_: u64| {};
        self.stream_to_file(song.cover.trim(), &path, &mut ignore).await?;
        debug!("Saved cover art to {:?}", path);
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::http_pool::HttpPoolOptions;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn writer() -> DiskWriter {
        let pool = HttpPool::new(HttpPoolOptions {
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            user_agent: "music-dl-test".to_string(),
            proxy: None,
            use_system_proxy: false,
        })
        .unwrap();
        DiskWriter::new(Arc::new(pool))
    }

    fn song() -> Song {
        Song {
            source: "netease".to_string(),
            id: "186016".to_string(),
            name: "晴天".to_string(),
            artist: "周杰伦".to_string(),
            album: "叶惠美".to_string(),
            ext: "flac".to_string(),
            ..Song::default()
        }
    }

    /// Serves `connections` canned HTTP responses and returns the URL. The body is
    /// sent in two halves with `pause` in between, so transfers can overlap.
    async fn serve(
        status: &'static str,
        body: &'static [u8],
        connections: usize,
        pause: Duration,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..connections {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let (first, rest) = body.split_at(body.len() / 2);
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(first).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(pause).await;
                    let _ = socket.write_all(rest).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/audio", addr)
    }

    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        serve(status, body, 1, Duration::ZERO).await
    }

    fn leftover_parts(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.to_string_lossy().ends_with(".part") {
                    found.push(path);
                }
            }
        }
        found
    }

    #[test]
    fn test_song_path_layout() {
        let path = song_path(Path::new("/music"), &song());
        assert_eq!(path, PathBuf::from("/music/周杰伦/叶惠美/周杰伦 - 晴天.flac"));
    }

    #[test]
    fn test_song_path_placeholders() {
        let bare = Song {
            name: "A/B?".to_string(),
            ..Song::default()
        };
        let path = song_path(Path::new("/music"), &bare);
        assert_eq!(
            path,
            PathBuf::from("/music/Unknown Artist/Unknown Album/Unknown Artist - A_B_.mp3")
        );
        let part = part_path(&path);
        assert_ne!(part, part_path(&path));
        let name = part.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Unknown Artist - A_B_.mp3."));
        assert!(name.ends_with(".part"));
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let song = song();
        let path = song_path(dir.path(), &song);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"already here").unwrap();

        let writer = writer();
        for _ in 0..2 {
            let mut reports = Vec::new();
            let mut progress = |n: u64| reports.push(n);
            // Unroutable URL: any fetch attempt would fail the test.
            let outcome = writer
                .write(dir.path(), &song, "http://127.0.0.1:9/never", None, &mut progress)
                .await
                .unwrap();
            assert!(outcome.skipped);
            assert_eq!(outcome.path, path);
            assert_eq!(reports, vec![12]);
        }
    }

    #[tokio::test]
    async fn test_streams_audio_and_lyrics() {
        let url = serve_once("200 OK", b"ID3fake-audio-bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let song = song();

        let mut last = 0;
        let mut progress = |n: u64| last = n;
        let outcome = writer()
            .write(dir.path(), &song, &url, Some("[00:01.00]故事的小黄花"), &mut progress)
            .await
            .unwrap();

        assert!(!outcome.skipped);
        assert_eq!(outcome.bytes, 19);
        assert_eq!(last, 19);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), b"ID3fake-audio-bytes");
        let lrc = std::fs::read_to_string(outcome.path.with_extension("lrc")).unwrap();
        assert!(lrc.contains("小黄花"));
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_non_200_leaves_no_file() {
        let url = serve_once("404 Not Found", b"gone").await;
        let dir = tempfile::tempdir().unwrap();
        let song = song();

        let mut progress = |_: u64| {};
        let err = writer()
            .write(dir.path(), &song, &url, Some("lyrics"), &mut progress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
        let path = song_path(dir.path(), &song);
        assert!(!path.exists());
        assert!(leftover_parts(dir.path()).is_empty());
        assert!(!path.with_extension("lrc").exists());
    }

    #[tokio::test]
    async fn test_overlapping_writes_of_same_song() {
        let body: &'static [u8] = b"ID3-overlapping-audio-body";
        let url = serve("200 OK", body, 2, Duration::from_millis(150)).await;
        let dir = tempfile::tempdir().unwrap();
        let song = song();
        let writer = writer();

        let mut first_progress = |_: u64| {};
        let mut second_progress = |_: u64| {};
        let (first, second) = tokio::join!(
            writer.write(dir.path(), &song, &url, None, &mut first_progress),
            writer.write(dir.path(), &song, &url, None, &mut second_progress),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.path, second.path);
        assert!(!(first.skipped && second.skipped));
        assert_eq!(first.bytes, body.len() as u64);
        assert_eq!(second.bytes, body.len() as u64);
        assert_eq!(std::fs::read(&first.path).unwrap(), body);
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_lyrics_write_failure_keeps_audio() {
        let url = serve_once("200 OK", b"ID3fake-audio-bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let song = song();
        // A directory sitting on the .lrc path makes the sidecar write fail.
        let lrc = song_path(dir.path(), &song).with_extension("lrc");
        std::fs::create_dir_all(&lrc).unwrap();

        let mut progress = |_: u64| {};
        let outcome = writer()
            .write(dir.path(), &song, &url, Some("[00:01.00]歌词"), &mut progress)
            .await
            .unwrap();

        assert!(!outcome.skipped);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), b"ID3fake-audio-bytes");
        assert!(lrc.is_dir());
    }

    #[tokio::test]
    async fn test_cover_written_once() {
        let url = serve_once("200 OK", b"\xff\xd8jpeg").await;
        let dir = tempfile::tempdir().unwrap();
        let mut song = song();
        song.cover = url;

        let writer = writer();
        let path = writer.write_cover(dir.path(), &song).await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("周杰伦").join("叶惠美").join("cover.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\xff\xd8jpeg");

        // The one-shot server is gone; a second fetch would fail.
        let again = writer.write_cover(dir.path(), &song).await.unwrap();
        assert_eq!(again, Some(path));
    }

    #[tokio::test]
    async fn test_cover_without_url() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(writer().write_cover(dir.path(), &song()).await.unwrap(), None);
    }
}
