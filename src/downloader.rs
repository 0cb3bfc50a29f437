//! Download manager: owns the managed directory, names downloads, and asks the
//! extractor to fill them.

use crate::extractor::{ExtractedInfo, Extractor};
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const DEFAULT_TITLE: &str = "TikTok Video";
pub const DEFAULT_UPLOADER: &str = "Unknown";

/// Sent with every download so TikTok treats the request like a browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoInfo {
    pub title: String,
    pub duration: u64,
    pub thumbnail: String,
    pub uploader: String,
    pub view_count: u64,
}

impl From<ExtractedInfo> for VideoInfo {
    fn from(info: ExtractedInfo) -> Self {
        Self {
            title: info.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            duration: whole_seconds(info.duration),
            thumbnail: info.thumbnail.unwrap_or_default(),
            uploader: info.uploader.unwrap_or_else(|| DEFAULT_UPLOADER.to_string()),
            view_count: info.view_count.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// `<id>.<ext>`, relative to the managed directory.
    pub filename: String,
    pub filepath: PathBuf,
    pub title: String,
    pub duration: u64,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Failed to extract video info: {0}")]
    Extraction(String),
    #[error("Failed to download video: {0}")]
    Download(String),
    #[error("Failed to download video: no output file found for {0}")]
    MissingOutput(String),
    #[error("Download directory error: {0}")]
    Io(#[from] io::Error),
}

pub struct DownloadManager {
    downloads_dir: PathBuf,
    extractor: Arc<dyn Extractor>,
}

impl DownloadManager {
    /// Creates the managed directory if needed. The stored path is absolute so
    /// reported file paths are too.
    pub fn new(
        downloads_dir: impl AsRef<Path>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, DownloadError> {
        let downloads_dir = downloads_dir.as_ref();
        fs::create_dir_all(downloads_dir)?;
        let downloads_dir = fs::canonicalize(downloads_dir)?;
        Ok(Self {
            downloads_dir,
            extractor,
        })
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn get_video_info(&self, url: &str) -> Result<VideoInfo, DownloadError> {
        let info = self
            .extractor
            .extract_info(url)
            .map_err(|err| DownloadError::Extraction(err.to_string()))?;
        Ok(info.into())
    }

    pub fn download_video(&self, url: &str) -> Result<DownloadResult, DownloadError> {
        let video_id = generate_id();
        let template = self.downloads_dir.join(format!("{video_id}.%(ext)s"));

        let info = self
            .extractor
            .download(url, &template, &[("User-Agent", BROWSER_USER_AGENT)])
            .map_err(|err| DownloadError::Download(err.to_string()))?;

        let filepath = self
            .locate_output(&video_id, info.ext.as_deref())
            .ok_or_else(|| DownloadError::MissingOutput(video_id.clone()))?;
        let filename = filepath
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| DownloadError::MissingOutput(video_id.clone()))?;

        info!(%url, %filename, "download complete");
        Ok(DownloadResult {
            filename,
            filepath,
            title: info.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            duration: whole_seconds(info.duration),
        })
    }

    /// Removes `filename` from the managed directory. Returns whether a file
    /// was actually removed; removal errors are logged and reported as `false`.
    pub fn cleanup_file(&self, filename: &str) -> bool {
        let Some(path) = self.resolve_file(filename) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(%filename, "removed download");
                true
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to remove download");
                false
            }
        }
    }

    /// Path of an existing file named `filename` directly inside the managed
    /// directory. Names that could escape the directory never resolve.
    pub fn resolve_file(&self, filename: &str) -> Option<PathBuf> {
        if !is_plain_filename(filename) {
            return None;
        }
        let path = self.downloads_dir.join(filename);
        path.is_file().then_some(path)
    }

    /// Finds the file the extractor wrote for `video_id`. The reported
    /// extension is tried first; otherwise the first `<id>.<ext>` entry in the
    /// directory wins.
    fn locate_output(&self, video_id: &str, reported_ext: Option<&str>) -> Option<PathBuf> {
        if let Some(ext) = reported_ext.filter(|ext| !ext.is_empty()) {
            let candidate = self.downloads_dir.join(format!("{video_id}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        let prefix = format!("{video_id}.");
        WalkDir::new(&self.downloads_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix(&prefix))
                    .is_some_and(|ext| !ext.is_empty())
            })
            .map(|entry| entry.into_path())
    }
}

/// Eight lowercase hex characters from the OS random source.
pub fn generate_id() -> String {
    format!("{:08x}", OsRng.next_u32())
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

fn whole_seconds(duration: Option<f64>) -> u64 {
    match duration {
        Some(value) if value.is_finite() && value > 0.0 => value as u64,
        _ => 0,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fake::FakeExtractor;
    use tempfile::tempdir;

    /// In-process stand-in for yt-dlp shared with the server tests.
    pub(crate) mod fake {
        use super::super::*;
        use crate::extractor::ExtractorError;
        use std::sync::Mutex;
        use std::sync::atomic::{AtomicUsize, Ordering};

        pub(crate) struct FakeExtractor {
            /// Extension actually written to disk; `None` writes nothing.
            pub written_ext: Option<&'static str>,
            /// Extension reported back in the metadata.
            pub reported_ext: Option<&'static str>,
            pub body: Vec<u8>,
            pub info: ExtractedInfo,
            pub fail_with: Option<&'static str>,
            pub calls: AtomicUsize,
            pub seen_headers: Mutex<Vec<(String, String)>>,
        }

        impl FakeExtractor {
            pub(crate) fn working() -> Self {
                Self {
                    written_ext: Some("mp4"),
                    reported_ext: Some("mp4"),
                    body: b"fake video bytes".to_vec(),
                    info: ExtractedInfo {
                        id: Some("123".into()),
                        title: Some("Dance clip".into()),
                        duration: Some(15.0),
                        thumbnail: Some("https://p16.tiktokcdn.com/t.jpeg".into()),
                        uploader: Some("someone".into()),
                        view_count: Some(42),
                        ext: None,
                    },
                    fail_with: None,
                    calls: AtomicUsize::new(0),
                    seen_headers: Mutex::new(Vec::new()),
                }
            }

            pub(crate) fn failing(message: &'static str) -> Self {
                Self {
                    fail_with: Some(message),
                    ..Self::working()
                }
            }

            pub(crate) fn calls(&self) -> usize {
                self.calls.load(Ordering::SeqCst)
            }

            fn check(&self) -> Result<(), ExtractorError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                match self.fail_with {
                    Some(message) => Err(ExtractorError::Failed(message.to_string())),
                    None => Ok(()),
                }
            }
        }

        impl Extractor for FakeExtractor {
            fn extract_info(&self, _url: &str) -> Result<ExtractedInfo, ExtractorError> {
                self.check()?;
                Ok(self.info.clone())
            }

            fn download(
                &self,
                _url: &str,
                output_template: &Path,
                headers: &[(&str, &str)],
            ) -> Result<ExtractedInfo, ExtractorError> {
                self.check()?;
                self.seen_headers.lock().unwrap().extend(
                    headers
                        .iter()
                        .map(|(name, value)| (name.to_string(), value.to_string())),
                );
                if let Some(ext) = self.written_ext {
                    let target = output_template.to_string_lossy().replace("%(ext)s", ext);
                    fs::write(target, &self.body).map_err(|err| {
                        ExtractorError::Failed(format!("write failed: {err}"))
                    })?;
                }
                let mut info = self.info.clone();
                info.ext = self.reported_ext.map(str::to_string);
                Ok(info)
            }
        }
    }

    fn manager_with(extractor: FakeExtractor) -> (tempfile::TempDir, DownloadManager) {
        let dir = tempdir().unwrap();
        let manager = DownloadManager::new(dir.path().join("downloads"), Arc::new(extractor))
            .unwrap();
        (dir, manager)
    }

    #[test]
    fn new_creates_missing_directory() {
        let (dir, manager) = manager_with(FakeExtractor::working());
        assert!(dir.path().join("downloads").is_dir());
        assert!(manager.downloads_dir().is_absolute());
    }

    #[test]
    fn info_maps_fields_and_defaults() {
        let (_dir, manager) = manager_with(FakeExtractor::working());
        let info = manager.get_video_info("https://www.tiktok.com/@u/video/1").unwrap();
        assert_eq!(info.title, "Dance clip");
        assert_eq!(info.duration, 15);
        assert_eq!(info.view_count, 42);

        let mut bare = FakeExtractor::working();
        bare.info = ExtractedInfo::default();
        let (_dir, manager) = manager_with(bare);
        let info = manager.get_video_info("https://www.tiktok.com/@u/video/1").unwrap();
        assert_eq!(
            info,
            VideoInfo {
                title: DEFAULT_TITLE.into(),
                duration: 0,
                thumbnail: String::new(),
                uploader: DEFAULT_UPLOADER.into(),
                view_count: 0,
            }
        );
    }

    #[test]
    fn info_failure_keeps_extractor_message() {
        let (_dir, manager) = manager_with(FakeExtractor::failing("ERROR: Unsupported URL"));
        let err = manager.get_video_info("https://www.tiktok.com/").unwrap_err();
        assert!(matches!(err, DownloadError::Extraction(ref msg) if msg == "ERROR: Unsupported URL"));
        assert_eq!(
            err.to_string(),
            "Failed to extract video info: ERROR: Unsupported URL"
        );
    }

    #[test]
    fn download_uses_reported_extension() {
        let (_dir, manager) = manager_with(FakeExtractor::working());
        let result = manager.download_video("https://www.tiktok.com/@u/video/1").unwrap();
        assert!(result.filename.ends_with(".mp4"));
        assert_eq!(result.filename.len(), "abcdef12.mp4".len());
        assert!(result.filepath.is_file());
        assert!(result.filepath.starts_with(manager.downloads_dir()));
        assert_eq!(fs::read(&result.filepath).unwrap(), b"fake video bytes");
        assert_eq!(result.title, "Dance clip");
        assert_eq!(result.duration, 15);
    }

    #[test]
    fn download_sends_browser_user_agent() {
        let extractor = Arc::new(FakeExtractor::working());
        let dir = tempdir().unwrap();
        let manager = DownloadManager::new(dir.path(), extractor.clone()).unwrap();
        manager.download_video("https://www.tiktok.com/@u/video/1").unwrap();
        let headers = extractor.seen_headers.lock().unwrap();
        assert_eq!(
            headers.as_slice(),
            &[("User-Agent".to_string(), BROWSER_USER_AGENT.to_string())]
        );
    }

    #[test]
    fn download_scans_directory_when_extension_unreported() {
        let mut extractor = FakeExtractor::working();
        extractor.written_ext = Some("webm");
        extractor.reported_ext = None;
        let (_dir, manager) = manager_with(extractor);
        let result = manager.download_video("https://www.tiktok.com/@u/video/1").unwrap();
        assert!(result.filename.ends_with(".webm"));
        assert!(result.filepath.is_file());
    }

    #[test]
    fn download_scans_directory_when_reported_extension_is_wrong() {
        let mut extractor = FakeExtractor::working();
        extractor.written_ext = Some("mkv");
        extractor.reported_ext = Some("mp4");
        let (_dir, manager) = manager_with(extractor);
        let result = manager.download_video("https://www.tiktok.com/@u/video/1").unwrap();
        assert!(result.filename.ends_with(".mkv"));
    }

    #[test]
    fn download_without_output_file_fails() {
        let mut extractor = FakeExtractor::working();
        extractor.written_ext = None;
        let (_dir, manager) = manager_with(extractor);
        let err = manager.download_video("https://www.tiktok.com/@u/video/1").unwrap_err();
        assert!(matches!(err, DownloadError::MissingOutput(_)));
    }

    #[test]
    fn download_failure_keeps_extractor_message() {
        let (_dir, manager) = manager_with(FakeExtractor::failing("HTTP Error 429"));
        let err = manager.download_video("https://www.tiktok.com/@u/video/1").unwrap_err();
        assert_eq!(err.to_string(), "Failed to download video: HTTP Error 429");
    }

    #[test]
    fn downloads_never_share_a_filename() {
        let (_dir, manager) = manager_with(FakeExtractor::working());
        let first = manager.download_video("https://www.tiktok.com/@a/video/1").unwrap();
        let second = manager.download_video("https://www.tiktok.com/@b/video/2").unwrap();
        assert_ne!(first.filename, second.filename);
        assert!(first.filepath.is_file());
        assert!(second.filepath.is_file());
    }

    #[test]
    fn cleanup_reports_whether_file_existed() {
        let (_dir, manager) = manager_with(FakeExtractor::working());
        let result = manager.download_video("https://www.tiktok.com/@u/video/1").unwrap();
        assert!(manager.cleanup_file(&result.filename));
        assert!(!result.filepath.exists());
        assert!(!manager.cleanup_file(&result.filename));
        assert!(manager.resolve_file(&result.filename).is_none());
    }

    #[test]
    fn traversal_names_never_resolve() {
        let dir = tempdir().unwrap();
        let managed = dir.path().join("downloads");
        let manager =
            DownloadManager::new(&managed, Arc::new(FakeExtractor::working())).unwrap();
        fs::write(dir.path().join("secret.txt"), "keep").unwrap();

        for name in ["../secret.txt", "..", ".", "", "a/b", "..\\secret.txt"] {
            assert!(manager.resolve_file(name).is_none(), "{name:?} resolved");
            assert!(!manager.cleanup_file(name));
        }
        assert!(dir.path().join("secret.txt").exists());
    }

    #[test]
    fn generated_ids_are_short_hex() {
        let id = generate_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fractional_and_negative_durations_round_down_to_seconds() {
        assert_eq!(whole_seconds(Some(14.9)), 14);
        assert_eq!(whole_seconds(Some(-3.0)), 0);
        assert_eq!(whole_seconds(Some(f64::NAN)), 0);
        assert_eq!(whole_seconds(None), 0);
    }
}
