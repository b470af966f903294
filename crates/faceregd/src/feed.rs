//! Frame feed from the detector sidecar.
//!
//! The sidecar owns the camera and the face model. For every captured frame
//! it saves a still and appends one JSON line:
//!
//! ```text
//! {"image": "frames/000123.png", "faces": [{"embedding": [..], "region": {"top": 10, "right": 90, "bottom": 110, "left": 20}}]}
//! ```
//!
//! Relative image paths resolve against the feed file's directory. The daemon
//! follows the file: on reaching the end it waits for the sidecar to append
//! more, and only a stop request ends the feed.

use facereg_core::{
    CancelFlag, CaptureError, Embedding, EmbeddingProvider, FaceProbe, FaceRegion, Frame, FrameSource,
    ProviderError,
};
use image::ImageFormat;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a followed feed waits before re-reading after catching up.
pub const FOLLOW_POLL: Duration = Duration::from_millis(50);

#[derive(Deserialize)]
struct FeedLine {
    image: PathBuf,
    #[serde(default)]
    faces: Vec<FeedFace>,
}

#[derive(Deserialize)]
struct FeedFace {
    embedding: Vec<f32>,
    region: FaceRegion,
}

/// Faces of the most recently read frame, keyed by frame sequence.
type FaceSlot = Arc<Mutex<Option<(u64, Vec<FaceProbe>)>>>;

/// Reads frames from the feed.
pub struct FeedReader<R> {
    lines: R,
    base_dir: PathBuf,
    sequence: u64,
    slot: FaceSlot,
    /// Bytes of a line the sidecar has not finished writing.
    partial: String,
    follow: Option<Follow>,
}

struct Follow {
    poll: Duration,
    stop: CancelFlag,
}

/// Hands out the embeddings the sidecar computed for each frame.
pub struct FeedEncoder {
    slot: FaceSlot,
}

/// Open a feed file (or FIFO).
pub fn open(path: &Path) -> Result<(FeedReader<BufReader<File>>, FeedEncoder), CaptureError> {
    let file = File::open(path)
        .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {e}", path.display())))?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    tracing::info!(path = %path.display(), "frame feed opened");
    Ok(from_reader(BufReader::new(file), base_dir))
}

pub fn from_reader<R: BufRead>(lines: R, base_dir: PathBuf) -> (FeedReader<R>, FeedEncoder) {
    let slot: FaceSlot = Arc::default();
    (
        FeedReader {
            lines,
            base_dir,
            sequence: 0,
            slot: Arc::clone(&slot),
            partial: String::new(),
            follow: None,
        },
        FeedEncoder { slot },
    )
}

impl<R: BufRead> FeedReader<R> {
    /// Keep reading past the end of input, polling every `poll` for appended
    /// lines, until `stop` is raised.
    pub fn follow(mut self, poll: Duration, stop: CancelFlag) -> Self {
        self.follow = Some(Follow { poll, stop });
        self
    }

    fn load_still(&self, image: &Path) -> Result<(u32, u32, Vec<u8>), image::ImageError> {
        let path = if image.is_absolute() {
            image.to_path_buf()
        } else {
            self.base_dir.join(image)
        };
        let rgb = image::open(path)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
        Ok((width, height, jpeg))
    }
}

impl<R: BufRead> FrameSource for FeedReader<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        loop {
            let n = self
                .lines
                .read_line(&mut self.partial)
                .map_err(|e| CaptureError::CaptureFailed(format!("feed read: {e}")))?;
            if n == 0 || !self.partial.ends_with('\n') {
                match &self.follow {
                    Some(follow) => {
                        if follow.stop.is_cancelled() {
                            tracing::info!("feed follow stopped");
                            return Ok(None);
                        }
                        std::thread::sleep(follow.poll);
                        continue;
                    }
                    // Unterminated last line of a finite feed.
                    None if n > 0 => {}
                    None => return Ok(None),
                }
            }

            let line = std::mem::take(&mut self.partial);
            if line.trim().is_empty() {
                continue;
            }

            let parsed: FeedLine = match serde_json::from_str(&line) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed feed line; frame dropped");
                    continue;
                }
            };

            let (width, height, still) = match self.load_still(&parsed.image) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(image = %parsed.image.display(), error = %e, "frame still unreadable; frame dropped");
                    continue;
                }
            };

            self.sequence += 1;
            let faces = parsed
                .faces
                .into_iter()
                .map(|f| FaceProbe {
                    embedding: Embedding::new(f.embedding),
                    region: f.region,
                })
                .collect();
            if let Ok(mut slot) = self.slot.lock() {
                *slot = Some((self.sequence, faces));
            }

            return Ok(Some(Frame {
                sequence: self.sequence,
                width,
                height,
                still,
            }));
        }
    }
}

impl EmbeddingProvider for FeedEncoder {
    fn detect_and_encode(&mut self, frame: &Frame) -> Result<Vec<FaceProbe>, ProviderError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ProviderError::ExtractionFailed("feed slot poisoned".into()))?;
        match slot.take() {
            Some((seq, faces)) if seq == frame.sequence => Ok(faces),
            Some((seq, _)) => Err(ProviderError::ExtractionFailed(format!(
                "feed holds faces for frame {seq}, asked for {}",
                frame.sequence
            ))),
            None => Ok(Vec::new()),
        }
    }
}
