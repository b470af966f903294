//! The recognition session: one dedicated thread owns the gallery, pulls
//! frames, routes every face and drives enrollment.
//!
//! Profile collection runs on its own thread so frames keep flowing while a
//! stranger types. Its answer comes back over a oneshot channel that the
//! session polls once per frame. Only one enrollment is in flight at a time.

use facereg_core::{
    classify, BlobStore, CancelFlag, CaptureError, DialogOutcome, Display, EmbeddingProvider,
    EnrollmentCoordinator, FaceEvent, FaceProbe, Frame, FrameSource, Gallery, GalleryStore,
    Matcher, PendingEnrollment, ProfileDialog, ProfileStore, ThresholdMatcher, Voice,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};

/// How often the session checks on a dialog once the feed has ended.
const DIALOG_POLL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("failed to start session thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("session thread exited")]
    ChannelClosed,
}

/// Counters reported when the session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub frames: u64,
    pub faces: u64,
    pub recognized: u64,
    pub enrolled: u64,
    /// Enrollments abandoned by the person, by the face leaving, or by shutdown.
    pub cancelled: u64,
    /// Faces not acted on: missing profile, or another enrollment in flight.
    pub skipped: u64,
    /// Enrollments that failed to commit.
    pub failed: u64,
}

pub struct SessionOptions {
    pub cancel_after_absent_frames: u32,
    pub confirmation: String,
}

/// External collaborators owned by the session thread.
pub struct Collaborators {
    pub profiles: Box<dyn ProfileStore + Send>,
    pub blobs: Box<dyn BlobStore + Send>,
    pub voice: Box<dyn Voice + Send>,
    pub gallery_store: Box<dyn GalleryStore + Send>,
    pub dialog: Arc<dyn ProfileDialog>,
    pub display: Box<dyn Display + Send>,
}

struct InFlight {
    pending: PendingEnrollment,
    cancel: CancelFlag,
    answer: oneshot::Receiver<DialogOutcome>,
    absent_frames: u32,
    seen_this_frame: bool,
}

pub struct Session {
    gallery: Gallery,
    matcher: ThresholdMatcher,
    collab: Collaborators,
    options: SessionOptions,
    inflight: Option<InFlight>,
    report: SessionReport,
}

impl Session {
    pub fn new(
        gallery: Gallery,
        matcher: ThresholdMatcher,
        collab: Collaborators,
        options: SessionOptions,
    ) -> Self {
        Self {
            gallery,
            matcher,
            collab,
            options,
            inflight: None,
            report: SessionReport::default(),
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Process frames until the source ends or `stop` is raised.
    ///
    /// Only a capture failure ends the session with an error.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        provider: &mut dyn EmbeddingProvider,
        stop: &CancelFlag,
    ) -> Result<SessionReport, SessionError> {
        loop {
            if stop.is_cancelled() {
                self.abandon_enrollment("shutdown");
                break;
            }
            self.poll_enrollment();

            let Some(frame) = source.next_frame()? else {
                tracing::info!("frame source exhausted");
                self.finish_enrollment(stop);
                break;
            };
            self.process_frame(&frame, provider);
        }
        Ok(self.report.clone())
    }

    fn process_frame(&mut self, frame: &Frame, provider: &mut dyn EmbeddingProvider) {
        self.report.frames += 1;

        let probes = provider.detect_and_encode(frame).unwrap_or_else(|e| {
            tracing::warn!(frame = frame.sequence, error = %e, "embedding failed; frame treated as empty");
            Vec::new()
        });

        if let Some(f) = self.inflight.as_mut() {
            f.seen_this_frame = false;
        }

        let mut recognized = Vec::new();
        for probe in probes {
            self.report.faces += 1;
            let event = classify(
                &self.matcher,
                &self.gallery,
                self.collab.profiles.as_ref(),
                self.collab.blobs.as_ref(),
                probe,
            );
            match event {
                FaceEvent::Recognized(r) => {
                    self.report.recognized += 1;
                    recognized.push(r);
                }
                FaceEvent::ProfileMissing { .. } => self.report.skipped += 1,
                FaceEvent::Unknown(probe) => self.on_unknown(probe, frame),
            }
        }

        self.track_absence();
        self.collab.display.show(frame, &recognized);
    }

    fn on_unknown(&mut self, probe: FaceProbe, frame: &Frame) {
        match self.inflight.as_mut() {
            Some(f) if self.matcher.same_face(&f.pending.probe, &probe.embedding) => {
                f.seen_this_frame = true;
            }
            Some(f) => {
                tracing::debug!(pending = %f.pending.key, "enrollment in flight; other stranger skipped");
                self.report.skipped += 1;
            }
            None => self.start_enrollment(probe, frame),
        }
    }

    fn start_enrollment(&mut self, probe: FaceProbe, frame: &Frame) {
        let pending = EnrollmentCoordinator::new(
            self.collab.profiles.as_ref(),
            self.collab.blobs.as_ref(),
            self.collab.voice.as_ref(),
            self.collab.gallery_store.as_ref(),
        )
        .begin(probe.embedding, frame.still.clone());

        let (tx, rx) = oneshot::channel();
        let cancel = CancelFlag::new();
        let dialog = Arc::clone(&self.collab.dialog);
        let flag = cancel.clone();

        let spawned = std::thread::Builder::new()
            .name("facereg-dialog".into())
            .spawn(move || {
                let outcome = dialog.collect_profile(&flag);
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            tracing::warn!(key = %pending.key, error = %e, "could not start profile dialog");
            self.report.failed += 1;
            return;
        }

        tracing::info!(key = %pending.key, frame = frame.sequence, "unknown face; collecting profile");
        self.inflight = Some(InFlight {
            pending,
            cancel,
            answer: rx,
            absent_frames: 0,
            seen_this_frame: true,
        });
    }

    /// Cancel the in-flight enrollment once its face has been gone too long.
    fn track_absence(&mut self) {
        let Some(f) = self.inflight.as_mut() else {
            return;
        };
        if f.seen_this_frame {
            f.absent_frames = 0;
            return;
        }
        f.absent_frames += 1;
        if f.absent_frames > self.options.cancel_after_absent_frames {
            self.abandon_enrollment("face left frame");
        }
    }

    fn abandon_enrollment(&mut self, reason: &str) {
        let Some(mut f) = self.inflight.take() else {
            return;
        };
        // An answer that arrived since the last poll still counts.
        if let Ok(outcome) = f.answer.try_recv() {
            self.resolve(f.pending, Some(outcome));
            return;
        }
        f.cancel.cancel();
        tracing::info!(key = %f.pending.key, reason, "enrollment cancelled");
        self.report.cancelled += 1;
    }

    /// Pick up a finished dialog without blocking.
    fn poll_enrollment(&mut self) {
        let answer = match self.inflight.as_mut().map(|f| f.answer.try_recv()) {
            None | Some(Err(TryRecvError::Empty)) => return,
            Some(Err(TryRecvError::Closed)) => None,
            Some(Ok(outcome)) => Some(outcome),
        };
        if let Some(f) = self.inflight.take() {
            self.resolve(f.pending, answer);
        }
    }

    /// Wait for the in-flight dialog, if any, unless `stop` is raised first.
    /// Used once the feed has ended.
    fn finish_enrollment(&mut self, stop: &CancelFlag) {
        if let Some(f) = self.inflight.as_ref() {
            tracing::info!(key = %f.pending.key, "waiting for profile dialog");
        }
        loop {
            self.poll_enrollment();
            if self.inflight.is_none() {
                return;
            }
            if stop.is_cancelled() {
                self.abandon_enrollment("shutdown");
                return;
            }
            std::thread::sleep(DIALOG_POLL);
        }
    }

    fn resolve(&mut self, pending: PendingEnrollment, answer: Option<DialogOutcome>) {
        match answer {
            Some(DialogOutcome::Completed(profile)) => {
                let coordinator = EnrollmentCoordinator::new(
                    self.collab.profiles.as_ref(),
                    self.collab.blobs.as_ref(),
                    self.collab.voice.as_ref(),
                    self.collab.gallery_store.as_ref(),
                )
                .with_confirmation(&self.options.confirmation);

                match coordinator.commit(&mut self.gallery, pending, &profile) {
                    Ok(_) => self.report.enrolled += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, "enrollment failed");
                        self.report.failed += 1;
                    }
                }
            }
            Some(DialogOutcome::Cancelled) => {
                tracing::debug!(key = %pending.key, "profile dialog cancelled");
                self.report.cancelled += 1;
            }
            None => {
                tracing::warn!(key = %pending.key, "profile dialog ended without an answer");
                self.report.failed += 1;
            }
        }
    }
}

/// Handle to a session running on its own thread.
pub struct SessionHandle {
    stop: CancelFlag,
    pub done: oneshot::Receiver<Result<SessionReport, SessionError>>,
}

impl SessionHandle {
    /// Ask the session to stop at the next frame boundary.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// Spawn `session` on a dedicated OS thread. Raising `stop` (directly or via
/// [`SessionHandle::stop`]) ends it at the next frame boundary.
pub fn spawn_session<S, P>(
    mut session: Session,
    mut source: S,
    mut provider: P,
    stop: CancelFlag,
) -> Result<SessionHandle, SessionError>
where
    S: FrameSource + Send + 'static,
    P: EmbeddingProvider + Send + 'static,
{
    let thread_stop = stop.clone();
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("facereg-session".into())
        .spawn(move || {
            tracing::info!(gallery = session.gallery().len(), "session thread started");
            let result = session.run(&mut source, &mut provider, &thread_stop);
            tracing::info!("session thread exiting");
            let _ = tx.send(result);
        })
        .map_err(SessionError::Spawn)?;

    Ok(SessionHandle { stop, done: rx })
}
