use crate::core::delegate::DelegateDownloader;
use crate::core::input::{AcquisitionMode, RunConfig, Secret};
use crate::core::record::ProcessingMethod;
use crate::core::video;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use tokio::process::Command;
use tracing::{debug, info, warn};

const ARTIFACT_DIR_PREFIX: &str = "vidlens_";
const COOKIE_FILE_PREFIX: &str = "cookies_";
const NETSCAPE_COOKIE_HEADER: &str = "# Netscape HTTP Cookie File";

/// One configured attempt to obtain media bytes from a source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Constrained,
    FallbackClient,
    AudioOnly,
}

impl Strategy {
    pub const ORDER: [Strategy; 3] = [
        Strategy::Constrained,
        Strategy::FallbackClient,
        Strategy::AudioOnly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Constrained => "constrained",
            Strategy::FallbackClient => "fallback_client",
            Strategy::AudioOnly => "audio_only",
        }
    }

    fn ytdlp_args(self) -> &'static [&'static str] {
        match self {
            Strategy::Constrained => &["-f", "best[height<=720][ext=mp4]/best[height<=720]"],
            Strategy::FallbackClient => &[
                "-f",
                "best",
                "--extractor-args",
                "youtube:player_client=android,web",
            ],
            Strategy::AudioOnly => &["-f", "bestaudio[ext=m4a]/bestaudio"],
        }
    }
}

pub struct ExtractRequest<'a> {
    pub url: &'a str,
    pub strategy: Strategy,
    pub cookies_file: Option<&'a Path>,
    pub output_dir: &'a Path,
    pub file_stem: &'a str,
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Run one strategy, returning the path of the produced file.
    async fn extract(&self, request: &ExtractRequest<'_>) -> Result<PathBuf>;
}

/// Transient media file on disk. The owning temporary directory (and anything
/// else left inside it) is removed on `cleanup` or when the value is dropped.
#[derive(Debug)]
pub struct LocalMedia {
    dir: Option<TempDir>,
    path: PathBuf,
    mime_type: String,
}

impl LocalMedia {
    fn new(dir: TempDir, path: PathBuf) -> Self {
        let mime_type = mime_for_path(&path).to_string();
        Self {
            dir: Some(dir),
            path,
            mime_type,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("media")
            .to_string()
    }

    /// Safe to call any number of times.
    pub fn cleanup(&mut self) {
        if let Some(dir) = self.dir.take() {
            let dir_path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                debug!(path = %dir_path.display(), error = %e, "Ignoring cleanup error");
            }
        }
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Playable media resolved from a source reference.
#[derive(Debug)]
pub enum MediaSource {
    Reference { uri: String },
    Local {
        media: LocalMedia,
        method: ProcessingMethod,
    },
}

impl MediaSource {
    pub fn processing_method(&self) -> ProcessingMethod {
        match self {
            MediaSource::Reference { .. } => ProcessingMethod::DirectYoutubeUrl,
            MediaSource::Local { method, .. } => *method,
        }
    }
}

pub struct MediaAcquirer {
    extractor: Arc<dyn MediaExtractor>,
    delegate: Option<Arc<dyn DelegateDownloader>>,
    work_root: PathBuf,
}

impl MediaAcquirer {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        delegate: Option<Arc<dyn DelegateDownloader>>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor,
            delegate,
            work_root: work_root.into(),
        }
    }

    pub async fn acquire(&self, config: &RunConfig) -> Result<MediaSource> {
        let stem = format!("video_{}", video::file_stem_for(&config.source_url));

        match &config.acquisition {
            AcquisitionMode::Direct => {
                if config.cookies.is_some() {
                    warn!("Cookies are only used when downloading; ignoring them for direct URL mode");
                }
                info!(url = %config.source_url, "Using direct URL reference");
                Ok(MediaSource::Reference {
                    uri: config.source_url.clone(),
                })
            }
            AcquisitionMode::Download => {
                let media = self
                    .download_with_fallback(&config.source_url, config.cookies.as_ref(), &stem)
                    .await?;
                Ok(MediaSource::Local {
                    media,
                    method: ProcessingMethod::LocalDownload,
                })
            }
            AcquisitionMode::Delegate(target) => {
                let delegate = self.delegate.as_ref().ok_or_else(|| {
                    Error::acquisition("External downloader requested but not configured")
                })?;
                let dir = self.artifact_dir()?;

                info!(url = %config.source_url, bucket = %target.bucket, "Delegating download");
                let path = delegate
                    .download(&config.source_url, target, dir.path(), &stem)
                    .await
                    .map_err(into_acquisition)?;

                Ok(MediaSource::Local {
                    media: LocalMedia::new(dir, path),
                    method: ProcessingMethod::ExternalDelegateDownload,
                })
            }
        }
    }

    /// Try each strategy in order and stop at the first success.
    pub async fn download_with_fallback(
        &self,
        url: &str,
        cookies: Option<&Secret>,
        file_stem: &str,
    ) -> Result<LocalMedia> {
        let dir = self.artifact_dir()?;
        let mut last_error: Option<Error> = None;

        for strategy in Strategy::ORDER {
            info!(strategy = strategy.name(), "Attempting download");

            // every attempt writes into its own empty directory
            let attempt_dir = dir.path().join(strategy.name());
            tokio::fs::create_dir_all(&attempt_dir).await?;

            let cookie_file = match cookies {
                Some(cookies) => Some(write_cookie_file(dir.path(), cookies)?),
                None => None,
            };

            let result = self
                .extractor
                .extract(&ExtractRequest {
                    url,
                    strategy,
                    cookies_file: cookie_file.as_ref().map(|f| f.path()),
                    output_dir: &attempt_dir,
                    file_stem,
                })
                .await;

            // credentials never outlive the attempt
            drop(cookie_file);

            match result {
                Ok(path) => {
                    info!(strategy = strategy.name(), path = %path.display(), "Download succeeded");
                    return Ok(LocalMedia::new(dir, path));
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Download strategy failed");
                    if let Err(io) = tokio::fs::remove_dir_all(&attempt_dir).await {
                        debug!(path = %attempt_dir.display(), error = %io, "Ignoring cleanup error");
                    }
                    last_error = Some(e);
                }
            }
        }

        let detail = last_error
            .map(|e| match e {
                Error::Acquisition(message) => message,
                other => other.to_string(),
            })
            .unwrap_or_else(|| "no strategies configured".to_string());

        Err(Error::acquisition(format!(
            "All download strategies failed; last error: {detail}"
        )))
    }

    fn artifact_dir(&self) -> Result<TempDir> {
        std::fs::create_dir_all(&self.work_root)?;
        Ok(tempfile::Builder::new()
            .prefix(ARTIFACT_DIR_PREFIX)
            .tempdir_in(&self.work_root)?)
    }
}

fn into_acquisition(e: Error) -> Error {
    match e {
        Error::Acquisition(_) => e,
        other => Error::acquisition(other.to_string()),
    }
}

fn write_cookie_file(dir: &Path, cookies: &Secret) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(COOKIE_FILE_PREFIX)
        .suffix(".txt")
        .tempfile_in(dir)?;

    let text = cookies.expose().trim_start();
    if !text.starts_with(NETSCAPE_COOKIE_HEADER) {
        writeln!(file, "{NETSCAPE_COOKIE_HEADER}")?;
    }
    file.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        writeln!(file)?;
    }
    file.flush()?;

    Ok(file)
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("m4a") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("opus") | Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        _ => "video/mp4",
    }
}

/// Extractor backed by the `yt-dlp` binary.
pub struct YtDlp {
    bin: String,
}

impl YtDlp {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    async fn extract(&self, request: &ExtractRequest<'_>) -> Result<PathBuf> {
        let template = request
            .output_dir
            .join(format!("{}.%(ext)s", request.file_stem));

        let mut command = Command::new(&self.bin);
        command
            .args(["--no-playlist", "--no-part", "--no-progress"])
            .args(["--print", "after_move:filepath"])
            .args(request.strategy.ytdlp_args())
            .arg("-o")
            .arg(&template);

        if let Some(cookies) = request.cookies_file {
            command.arg("--cookies").arg(cookies);
        }

        command
            .arg(request.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(bin = %self.bin, strategy = request.strategy.name(), "Spawning yt-dlp");
        let output = command.output().await.map_err(|e| {
            Error::acquisition(format!("Failed to run {}: {e}", self.bin))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostic = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("yt-dlp exited without output")
                .trim()
                .to_string();
            return Err(Error::acquisition(format!(
                "{} ({}): {diagnostic}",
                request.strategy.name(),
                output.status
            )));
        }

        if let Some(path) = reported_path(&String::from_utf8_lossy(&output.stdout))
            && path.is_file()
        {
            return Ok(path);
        }

        find_downloaded_file(request.output_dir, request.file_stem)
            .await?
            .ok_or_else(|| {
                Error::acquisition(format!(
                    "{}: yt-dlp reported success but produced no file",
                    request.strategy.name()
                ))
            })
    }
}

/// Final file path printed by `--print after_move:filepath`.
fn reported_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Largest finished file in `dir` whose name starts with `stem`.
pub async fn find_downloaded_file(dir: &Path, stem: &str) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut best: Option<(u64, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(stem) || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        if best.as_ref().is_none_or(|(size, _)| metadata.len() > *size) {
            best = Some((metadata.len(), path));
        }
    }

    Ok(best.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::input::StorageTarget;
    use std::sync::Mutex;

    /// Fails for every strategy listed in `failing`, writes a file otherwise.
    struct ScriptedExtractor {
        failing: Vec<Strategy>,
        attempts: Mutex<Vec<Strategy>>,
        cookie_paths: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedExtractor {
        fn new(failing: Vec<Strategy>) -> Self {
            Self {
                failing,
                attempts: Mutex::new(Vec::new()),
                cookie_paths: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaExtractor for ScriptedExtractor {
        async fn extract(&self, request: &ExtractRequest<'_>) -> Result<PathBuf> {
            self.attempts.lock().unwrap().push(request.strategy);
            if let Some(cookies) = request.cookies_file {
                assert!(cookies.exists(), "cookie file must exist during the attempt");
                let content = std::fs::read_to_string(cookies).unwrap();
                assert!(content.starts_with(NETSCAPE_COOKIE_HEADER));
                self.cookie_paths.lock().unwrap().push(cookies.to_path_buf());
            }

            if self.failing.contains(&request.strategy) {
                return Err(Error::acquisition(format!(
                    "{} refused",
                    request.strategy.name()
                )));
            }

            let ext = match request.strategy {
                Strategy::AudioOnly => "m4a",
                _ => "mp4",
            };
            let path = request
                .output_dir
                .join(format!("{}.{ext}", request.file_stem));
            std::fs::write(&path, b"media bytes").unwrap();
            Ok(path)
        }
    }

    fn acquirer(extractor: Arc<ScriptedExtractor>, root: &Path) -> MediaAcquirer {
        MediaAcquirer::new(extractor, None, root)
    }

    #[tokio::test]
    async fn falls_back_until_a_strategy_succeeds() {
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![
            Strategy::Constrained,
            Strategy::FallbackClient,
        ]));

        let media = acquirer(extractor.clone(), root.path())
            .download_with_fallback("https://youtu.be/dQw4w9WgXcQ", None, "video_x")
            .await
            .expect("audio strategy succeeds");

        assert_eq!(
            *extractor.attempts.lock().unwrap(),
            vec![
                Strategy::Constrained,
                Strategy::FallbackClient,
                Strategy::AudioOnly
            ]
        );
        assert!(media.path().ends_with("video_x.m4a"));
        assert_eq!(media.mime_type(), "audio/mp4");
    }

    #[tokio::test]
    async fn stops_after_first_success() {
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![]));

        let media = acquirer(extractor.clone(), root.path())
            .download_with_fallback("https://youtu.be/dQw4w9WgXcQ", None, "video_x")
            .await
            .unwrap();

        assert_eq!(*extractor.attempts.lock().unwrap(), vec![Strategy::Constrained]);
        assert_eq!(media.mime_type(), "video/mp4");
    }

    #[tokio::test]
    async fn exhausted_strategies_report_last_diagnostic_and_leave_nothing() {
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(Strategy::ORDER.to_vec()));

        let err = acquirer(extractor, root.path())
            .download_with_fallback(
                "https://youtu.be/dQw4w9WgXcQ",
                Some(&Secret::new(".youtube.com\tTRUE\t/\tTRUE\t0\tSID\tabc")),
                "video_x",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Acquisition(_)));
        assert!(err.to_string().contains("audio_only refused"));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cookie_files_are_removed_after_every_attempt() {
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![Strategy::Constrained]));
        let cookies = Secret::new(".youtube.com\tTRUE\t/\tTRUE\t0\tSID\tabc");

        let media = acquirer(extractor.clone(), root.path())
            .download_with_fallback("https://youtu.be/dQw4w9WgXcQ", Some(&cookies), "video_x")
            .await
            .unwrap();

        let cookie_paths = extractor.cookie_paths.lock().unwrap().clone();
        assert_eq!(cookie_paths.len(), 2);
        assert!(cookie_paths.iter().all(|p| !p.exists()));
        assert!(media.path().exists());
    }

    #[tokio::test]
    async fn local_media_cleanup_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![]));

        let mut media = acquirer(extractor, root.path())
            .download_with_fallback("https://youtu.be/dQw4w9WgXcQ", None, "video_x")
            .await
            .unwrap();
        let path = media.path().to_path_buf();

        media.cleanup();
        media.cleanup();
        assert!(!path.exists());
        drop(media);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn delegate_mode_without_delegate_is_an_acquisition_error() {
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::new(vec![]));
        let config = RunConfig {
            source_url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            video_id: Some("dQw4w9WgXcQ".to_string()),
            api_key: Secret::new("k"),
            num_timestamps: 0,
            custom_prompt: None,
            cookies: None,
            acquisition: AcquisitionMode::Delegate(StorageTarget {
                bucket: "b".to_string(),
                region: "us-east-1".to_string(),
                access_key_id: "a".to_string(),
                secret_access_key: Secret::new("s"),
            }),
        };

        let err = acquirer(extractor, root.path())
            .acquire(&config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Acquisition(_)));
    }

    #[tokio::test]
    async fn picks_finished_file_matching_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video_x.mp4.part"), b"partial data here").unwrap();
        std::fs::write(dir.path().join("cookies_abc.txt"), b"c").unwrap();
        std::fs::write(dir.path().join("video_x.webm"), b"done").unwrap();

        let found = find_downloaded_file(dir.path(), "video_x").await.unwrap();
        assert_eq!(found, Some(dir.path().join("video_x.webm")));
    }

    #[test]
    fn reported_path_is_the_last_printed_line() {
        assert_eq!(
            reported_path("[info] x\n/tmp/a/video_x.m4a\n\n"),
            Some(PathBuf::from("/tmp/a/video_x.m4a"))
        );
        assert_eq!(reported_path("  \n"), None);
    }

    /// Stand-in yt-dlp: leaves a truncated mp4 behind and fails for the
    /// video formats, succeeds with an m4a for the audio format.
    #[cfg(unix)]
    fn fake_ytdlp(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("yt-dlp");
        std::fs::write(
            &script,
            r#"#!/bin/sh
fmt=""
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -f) fmt="$2"; shift ;;
    -o) out="$2"; shift ;;
  esac
  shift
done
base="$(dirname "$out")/$(basename "$out" '.%(ext)s')"
case "$fmt" in
  bestaudio*)
    printf 'audio' > "$base.m4a"
    echo "$base.m4a"
    exit 0 ;;
  *)
    dd if=/dev/zero of="$base.mp4" bs=1000 count=5 2>/dev/null
    echo "ERROR: [youtube] Requested format is not available" >&2
    exit 1 ;;
esac
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ytdlp_fallback_uses_the_successful_strategys_file() {
        let bin_dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let extractor = Arc::new(YtDlp::new(
            fake_ytdlp(bin_dir.path()).to_string_lossy().into_owned(),
        ));

        let media = MediaAcquirer::new(extractor, None, root.path())
            .download_with_fallback("https://youtu.be/dQw4w9WgXcQ", None, "video_x")
            .await
            .unwrap();

        assert!(media.path().ends_with("video_x.m4a"));
        assert_eq!(media.mime_type(), "audio/mp4");
        assert_eq!(std::fs::read(media.path()).unwrap(), b"audio");

        // failed attempts leave no partial files behind
        let artifact_dir = media.path().parent().unwrap().parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(artifact_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("audio_only")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ytdlp_failure_reports_last_stderr_line() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let ytdlp = YtDlp::new(fake_ytdlp(bin_dir.path()).to_string_lossy().into_owned());

        let err = ytdlp
            .extract(&ExtractRequest {
                url: "https://youtu.be/dQw4w9WgXcQ",
                strategy: Strategy::Constrained,
                cookies_file: None,
                output_dir: out.path(),
                file_stem: "video_x",
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Acquisition(_)));
        assert!(err.to_string().contains("Requested format is not available"));
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_for_path(Path::new("a.WEBM")), "video/webm");
        assert_eq!(mime_for_path(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(mime_for_path(Path::new("a")), "video/mp4");
    }
}
