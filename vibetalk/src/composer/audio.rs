//! Audio capture sources.
//!
//! Device access lives behind [`AudioSource`]: opening a source is
//! asynchronous (permission prompts, device start-up) and yields a
//! [`CaptureStream`] whose chunks arrive over a channel in capture order.
//! Dropping the stream's receiver stops the producer.

use std::future::Future;
use std::path::PathBuf;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use vibetalk_proto::data_uri;

/// Default size of the chunks a [`FileAudioSource`] emits.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Number of chunks buffered between producer and composer.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Errors raised while capturing or encoding audio.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The user or OS refused access to the input.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The input device does not exist or could not start.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The input is not in a supported audio format.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    /// A capture is already acquiring or recording.
    #[error("a recording is already in progress")]
    AlreadyActive,
    /// Stop was requested with no capture running.
    #[error("no recording in progress")]
    NotActive,
    /// The recording could not be turned into a data URI.
    #[error("failed to encode recording: {0}")]
    Encoding(String),
}

/// A live capture: its MIME type and the chunk channel.
#[derive(Debug)]
pub struct CaptureStream {
    /// MIME type of the concatenated chunks.
    pub mime_type: String,
    /// Chunks in capture order; closes when the source is exhausted.
    pub chunks: mpsc::Receiver<Vec<u8>>,
}

/// Something that can produce recorded audio.
pub trait AudioSource: Send + Sync {
    /// Start capturing.
    ///
    /// Resolves once the device is ready; chunks then flow through the
    /// returned stream until the source ends or the receiver is dropped.
    fn open(&self) -> impl Future<Output = Result<CaptureStream, CaptureError>> + Send;
}

/// Streams a pre-recorded audio file as if it came from a microphone.
#[derive(Debug, Clone)]
pub struct FileAudioSource {
    path: PathBuf,
    chunk_size: usize,
}

impl FileAudioSource {
    /// Create a source for `path`, emitting chunks of `chunk_size` bytes.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }
}

impl AudioSource for FileAudioSource {
    async fn open(&self) -> Result<CaptureStream, CaptureError> {
        let path_str = self.path.display().to_string();
        let mime_type = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(data_uri::mime_for_extension)
            .filter(|mime| mime.starts_with("audio/"))
            .ok_or_else(|| CaptureError::UnsupportedFormat(path_str.clone()))?;

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(path_str.clone()),
                _ => CaptureError::DeviceUnavailable(format!("{path_str}: {e}")),
            })?;

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let chunk_size = self.chunk_size;
        tokio::spawn(async move {
            let mut buf = vec![0u8; chunk_size];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).await.is_err() {
                            tracing::debug!(path = %path_str, "capture cancelled, stopping reader");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path_str, err = %e, "audio file read failed");
                        break;
                    }
                }
            }
        });

        tracing::info!(path = %self.path.display(), mime_type, "audio capture started");
        Ok(CaptureStream {
            mime_type: mime_type.to_string(),
            chunks: rx,
        })
    }
}
