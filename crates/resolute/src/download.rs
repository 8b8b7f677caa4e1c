//! Download and export validation.
//!
//! Listeners are always registered before the trigger runs, so a download fired
//! synchronously by the triggering click is still captured.
//!
//! Exports that may download, open a popup, or render inline are classified by
//! racing all three signals; the first to arrive wins.
//!
//! Artifacts are validated by their leading bytes, not their extension:
//!
//! | Kind | Signature            | Default floor |
//! |------|----------------------|---------------|
//! | PDF  | `%PDF`               | 10 000 bytes  |
//! | XLSX | `PK` (ZIP container) | 1 000 bytes   |
//! | CSV  | none; needs a delimiter and no binary content | 16 bytes |

use crate::config::{DownloadConfig, SizeFloors, DEFAULT_SETTLE_POLL_MS};
use crate::driver::{DownloadPayload, PageDriver, PageEvent, PageEventKind};
use crate::result::{ResoluteError, ResoluteResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B];
const SIGNATURE_LEN: usize = 8;

// =============================================================================
// FORMATS
// =============================================================================

/// Expected artifact format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// PDF document
    Pdf,
    /// Excel workbook (ZIP container)
    Xlsx,
    /// Delimited text
    Csv,
}

impl ArtifactKind {
    /// Conventional file extension
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }

    /// Size the artifact must exceed
    #[must_use]
    pub const fn floor(&self, floors: &SizeFloors) -> u64 {
        match self {
            Self::Pdf => floors.pdf,
            Self::Xlsx => floors.xlsx,
            Self::Csv => floors.csv,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => write!(f, "PDF"),
            Self::Xlsx => write!(f, "XLSX"),
            Self::Csv => write!(f, "CSV"),
        }
    }
}

/// Format implied by the leading bytes; CSV has no signature
#[must_use]
pub fn detect_signature(bytes: &[u8]) -> Option<ArtifactKind> {
    if bytes.starts_with(PDF_MAGIC) {
        Some(ArtifactKind::Pdf)
    } else if bytes.starts_with(ZIP_MAGIC) {
        Some(ArtifactKind::Xlsx)
    } else {
        None
    }
}

fn describe_leading(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(SIGNATURE_LEN)];
    let hex: Vec<String> = head.iter().map(|b| format!("{b:02x}")).collect();
    let text: String = head
        .iter()
        .map(|b| if b.is_ascii_graphic() || *b == b' ' { char::from(*b) } else { '.' })
        .collect();
    format!("'{text}' ({})", hex.join(" "))
}

/// Check `bytes` against `kind`: signature first, then the size floor
pub fn validate_bytes(
    filename: &str,
    bytes: &[u8],
    kind: ArtifactKind,
    floors: &SizeFloors,
) -> ResoluteResult<()> {
    let size = bytes.len() as u64;
    let minimum = kind.floor(floors);
    let too_small = || ResoluteError::EmptyOrTooSmall {
        kind: kind.to_string(),
        filename: filename.to_string(),
        size,
        minimum,
    };
    let wrong = |found: String| ResoluteError::WrongFormat {
        expected: kind.to_string(),
        found,
        filename: filename.to_string(),
    };

    if bytes.is_empty() {
        return Err(too_small());
    }
    match kind {
        ArtifactKind::Pdf | ArtifactKind::Xlsx => {
            if detect_signature(bytes) != Some(kind) {
                return Err(wrong(describe_leading(bytes)));
            }
            if size <= minimum {
                return Err(too_small());
            }
        }
        ArtifactKind::Csv => {
            if let Some(binary) = detect_signature(bytes) {
                return Err(wrong(format!("{binary} signature {}", describe_leading(bytes))));
            }
            let text_start = bytes
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .map_or(bytes, |i| &bytes[i..]);
            if text_start.starts_with(b"<") {
                return Err(wrong(format!("markup {}", describe_leading(text_start))));
            }
            if bytes.contains(&0) {
                return Err(wrong("binary content (NUL byte)".to_string()));
            }
            if size <= minimum {
                return Err(too_small());
            }
            if !bytes.iter().any(|b| matches!(b, b',' | b';' | b'\t')) {
                return Err(wrong("text without a delimiter".to_string()));
            }
        }
    }
    Ok(())
}

// =============================================================================
// ARTIFACTS
// =============================================================================

/// A download persisted to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadArtifact {
    /// Filename suggested by the server
    pub suggested_filename: String,
    /// Source URL
    pub url: String,
    /// Size in bytes
    pub byte_len: u64,
    /// Leading bytes
    pub signature: Vec<u8>,
    /// Where the bytes were written
    pub path: PathBuf,
    /// Hex SHA-256 of the contents
    pub sha256: String,
    /// Kept on cleanup
    pub retained: bool,
}

impl DownloadArtifact {
    /// Format implied by the signature
    #[must_use]
    pub fn detected_kind(&self) -> Option<ArtifactKind> {
        detect_signature(&self.signature)
    }

    /// Read the stored bytes back
    pub async fn read(&self) -> ResoluteResult<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// Reduce a scenario name to `[a-z0-9-]`
#[must_use]
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "scenario".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Per-scenario artifact directory with collision-free file names
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    scenario: String,
    stored: Mutex<Vec<DownloadArtifact>>,
}

impl ArtifactStore {
    /// Store under `root` for scenario `name`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            root: root.into(),
            scenario: slug(name),
            stored: Mutex::new(Vec::new()),
        }
    }

    /// Directory files are written to
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scenario slug used in file names
    #[must_use]
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// `<stem>-<scenario>-<utc timestamp>-<short id>.<ext>`
    #[must_use]
    pub fn unique_name(&self, suggested: &str) -> String {
        let file = Path::new(suggested)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = Path::new(&file);
        let stem = path
            .file_stem()
            .map(|s| slug(&s.to_string_lossy()))
            .unwrap_or_else(|| "download".to_string());
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let id = Uuid::new_v4().simple().to_string();
        let short = &id[..8];
        match path.extension() {
            Some(ext) => format!(
                "{stem}-{}-{timestamp}-{short}.{}",
                self.scenario,
                ext.to_string_lossy().to_lowercase()
            ),
            None => format!("{stem}-{}-{timestamp}-{short}", self.scenario),
        }
    }

    fn stored(&self) -> ResoluteResult<std::sync::MutexGuard<'_, Vec<DownloadArtifact>>> {
        self.stored
            .lock()
            .map_err(|_| ResoluteError::driver("artifact store lock poisoned"))
    }

    /// Write a download to disk and record it
    pub async fn persist(&self, payload: &DownloadPayload) -> ResoluteResult<DownloadArtifact> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(self.unique_name(&payload.suggested_filename));
        tokio::fs::write(&path, &payload.bytes).await?;

        let mut hasher = Sha256::new();
        hasher.update(&payload.bytes);
        let digest = hasher.finalize();

        let artifact = DownloadArtifact {
            suggested_filename: payload.suggested_filename.clone(),
            url: payload.url.clone(),
            byte_len: payload.bytes.len() as u64,
            signature: payload.bytes.iter().take(SIGNATURE_LEN).copied().collect(),
            path,
            sha256: format!("{digest:x}"),
            retained: false,
        };
        debug!(
            file = %artifact.path.display(),
            bytes = artifact.byte_len,
            sha256 = %artifact.sha256,
            "artifact stored"
        );
        self.stored()?.push(artifact.clone());
        Ok(artifact)
    }

    /// Keep `artifact` on cleanup
    pub fn retain(&self, artifact: &DownloadArtifact) -> ResoluteResult<()> {
        let mut stored = self.stored()?;
        match stored.iter_mut().find(|a| a.path == artifact.path) {
            Some(entry) => {
                entry.retained = true;
                Ok(())
            }
            None => Err(ResoluteError::config(format!(
                "{} is not managed by this store",
                artifact.path.display()
            ))),
        }
    }

    /// Every artifact stored so far
    pub fn artifacts(&self) -> ResoluteResult<Vec<DownloadArtifact>> {
        Ok(self.stored()?.clone())
    }

    /// Delete every artifact not retained; returns how many were removed
    pub async fn cleanup(&self) -> ResoluteResult<usize> {
        let doomed: Vec<DownloadArtifact> = {
            let mut stored = self.stored()?;
            let (keep, doomed): (Vec<_>, Vec<_>) = stored.drain(..).partition(|a| a.retained);
            *stored = keep;
            doomed
        };
        let mut removed = 0;
        for artifact in &doomed {
            match tokio::fs::remove_file(&artifact.path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(file = %artifact.path.display(), error = %err, "artifact cleanup failed");
                }
            }
        }
        Ok(removed)
    }
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// How an export resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportOutcome {
    /// A file was downloaded and stored
    Downloaded(DownloadArtifact),
    /// The export opened in a new tab or popup
    OpenedInPopup {
        /// Popup URL
        url: String,
    },
    /// The export replaced the current page
    RenderedInline {
        /// New URL
        url: String,
        /// URL or content indicate a PDF viewer
        looks_like_pdf: bool,
    },
}

/// Awaits downloads and exports and checks what they produced
#[derive(Clone, Copy)]
pub struct DownloadValidator<'a> {
    driver: &'a dyn PageDriver,
    store: &'a ArtifactStore,
    timeout: Duration,
    floors: SizeFloors,
    poll_interval: Duration,
}

impl fmt::Debug for DownloadValidator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadValidator")
            .field("store", &self.store.root())
            .field("timeout", &self.timeout)
            .field("floors", &self.floors)
            .finish_non_exhaustive()
    }
}

impl<'a> DownloadValidator<'a> {
    /// Create a validator writing into `store`
    #[must_use]
    pub fn new(driver: &'a dyn PageDriver, store: &'a ArtifactStore, config: &DownloadConfig) -> Self {
        Self {
            driver,
            store,
            timeout: config.timeout(),
            floors: config.floors,
            poll_interval: Duration::from_millis(DEFAULT_SETTLE_POLL_MS),
        }
    }

    /// Override how often the page is polled for inline navigation
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Configured timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `trigger` and wait for the download it causes
    #[instrument(level = "debug", skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn await_download<F, Fut>(&self, trigger: F, timeout: Duration) -> ResoluteResult<DownloadArtifact>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResoluteResult<()>>,
    {
        let mut stream = self.driver.subscribe(&[PageEventKind::Download]).await?;
        trigger().await?;
        let waited = tokio::time::timeout(timeout, async {
            while let Some(event) = stream.next().await {
                if let PageEvent::Download(payload) = event {
                    return Some(payload);
                }
            }
            None
        })
        .await;
        match waited {
            Ok(Some(payload)) => {
                let artifact = self.store.persist(&payload).await?;
                info!(file = %artifact.suggested_filename, bytes = artifact.byte_len, "download captured");
                Ok(artifact)
            }
            Ok(None) => Err(ResoluteError::driver("page closed while waiting for a download")),
            Err(_) => Err(ResoluteError::timeout("download", timeout.as_millis() as u64)),
        }
    }

    /// [`DownloadValidator::await_download`] with the configured timeout, then
    /// validate the artifact as `kind`
    pub async fn download_as<F, Fut>(&self, trigger: F, kind: ArtifactKind) -> ResoluteResult<DownloadArtifact>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResoluteResult<()>>,
    {
        let artifact = self.await_download(trigger, self.timeout).await?;
        self.validate_format(&artifact, kind).await?;
        Ok(artifact)
    }

    /// Run `trigger` and classify the export by whichever signal arrives first:
    /// a download, a popup, or the current page navigating
    #[instrument(level = "debug", skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn await_export<F, Fut>(&self, trigger: F, timeout: Duration) -> ResoluteResult<ExportOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResoluteResult<()>>,
    {
        let mut stream = self
            .driver
            .subscribe(&[
                PageEventKind::Download,
                PageEventKind::Popup,
                PageEventKind::Navigation,
            ])
            .await?;
        let epoch = self.driver.navigation_epoch().await?;
        let url = self.driver.current_url().await?;
        trigger().await?;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                biased;
                event = stream.next() => match event {
                    Some(PageEvent::Download(payload)) => {
                        let artifact = self.store.persist(&payload).await?;
                        info!(file = %artifact.suggested_filename, "export downloaded");
                        return Ok(ExportOutcome::Downloaded(artifact));
                    }
                    Some(PageEvent::Popup { url }) => {
                        info!(%url, "export opened in popup");
                        return Ok(ExportOutcome::OpenedInPopup { url });
                    }
                    Some(PageEvent::Navigated { url }) => return self.inline(url).await,
                    Some(PageEvent::Dialog(_)) => {}
                    None => return Err(ResoluteError::driver("page closed while waiting for an export")),
                },
                _ = poll.tick() => {
                    let now_epoch = self.driver.navigation_epoch().await?;
                    let now_url = self.driver.current_url().await?;
                    if now_epoch != epoch || now_url != url {
                        return self.inline(now_url).await;
                    }
                }
                () = &mut deadline => {
                    return Err(ResoluteError::timeout(
                        "download, popup or in-page navigation after export",
                        timeout.as_millis() as u64,
                    ));
                }
            }
        }
    }

    async fn inline(&self, url: String) -> ResoluteResult<ExportOutcome> {
        let content = self.driver.page_content().await.unwrap_or_default();
        let looks_like_pdf = url.to_lowercase().contains(".pdf")
            || content.starts_with("%PDF")
            || content.contains("application/pdf");
        info!(%url, looks_like_pdf, "export rendered inline");
        Ok(ExportOutcome::RenderedInline { url, looks_like_pdf })
    }

    /// Validate a stored artifact as `kind`
    pub async fn validate_format(&self, artifact: &DownloadArtifact, kind: ArtifactKind) -> ResoluteResult<()> {
        let bytes = artifact.read().await?;
        validate_bytes(&artifact.suggested_filename, &bytes, kind, &self.floors)
    }
}
