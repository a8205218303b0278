//! One attendance session: pipeline -> tracker -> smoother -> ledger.

use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{
    FaceTracker, FramePipeline, Identity, Ledger, Recognition, RecognitionSmoother, StorageError,
    TrackId,
};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("frame pipeline: {0}")]
    Pipeline(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// How a face on screen stands with respect to today's attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceStatus {
    /// The recognizer could not name this face.
    Unknown,
    /// Named, but not recorded today yet.
    Recognized,
    /// Already recorded today.
    Present,
}

/// A face in the current frame, annotated with the raw per-frame verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub track: TrackId,
    pub recognition: Recognition,
    pub identity: Identity,
    pub status: FaceStatus,
}

/// Result of processing one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub annotations: Vec<Annotation>,
    /// People whose attendance row was written during this frame.
    pub recorded: Vec<Identity>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub quorum_window: usize,
    pub track_iou_threshold: f32,
    pub track_max_missed: u32,
}

/// State of a running attendance session.
pub struct AttendanceSession<P> {
    pipeline: P,
    tracker: FaceTracker,
    smoother: RecognitionSmoother<TrackId>,
    ledger: Ledger,
}

impl<P: FramePipeline> AttendanceSession<P> {
    pub fn new(pipeline: P, ledger: Ledger, options: SessionOptions) -> Result<Self, SessionError> {
        if options.quorum_window == 0 {
            return Err(SessionError::Configuration(
                "quorum window must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            pipeline,
            tracker: FaceTracker::new(options.track_iou_threshold, options.track_max_missed),
            smoother: RecognitionSmoother::new(options.quorum_window),
            ledger,
        })
    }

    /// Open (or create) the ledger at `path` for `today` and start a session on it.
    pub fn open(
        pipeline: P,
        ledger_path: &Path,
        today: NaiveDate,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let ledger = Ledger::open(ledger_path, today)?;
        Self::new(pipeline, ledger, options)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one grayscale frame through the session.
    ///
    /// Storage failures are logged and do not fail the frame; the person is
    /// simply not marked present and will be retried on a later quorum.
    pub fn process_frame(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        now: NaiveDateTime,
    ) -> Result<FrameOutcome, SessionError> {
        let recognitions = self
            .pipeline
            .detect_and_classify(frame, width, height)
            .map_err(|e| SessionError::Pipeline(Box::new(e)))?;

        let boxes: Vec<_> = recognitions.iter().map(|r| r.bbox).collect();
        let update = self.tracker.update(&boxes);
        for track in &update.expired {
            self.smoother.forget(track);
        }

        let mut outcome = FrameOutcome::default();
        for (recognition, track) in recognitions.into_iter().zip(update.assigned) {
            let stable = self
                .smoother
                .observe(track, &recognition.key, recognition.confidence);
            if let Some(stable) = stable {
                tracing::debug!(
                    %track,
                    key = %stable.key,
                    confidence = stable.confidence,
                    "stable recognition"
                );
                match self.ledger.record(&stable.key, stable.confidence, now) {
                    Ok(true) => outcome.recorded.push(Identity::decode(&stable.key)),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            key = %stable.key,
                            "failed to record attendance"
                        );
                    }
                }
            }

            let identity = Identity::decode(&recognition.key);
            let status = if identity.is_unknown() {
                FaceStatus::Unknown
            } else if self.ledger.is_present(&recognition.key) {
                FaceStatus::Present
            } else {
                FaceStatus::Recognized
            };
            outcome.annotations.push(Annotation {
                track,
                recognition,
                identity,
                status,
            });
        }
        Ok(outcome)
    }

    /// Reload who is present on `today` from the ledger.
    pub fn reload(&mut self, today: NaiveDate) -> usize {
        self.ledger.load_today(today)
    }

    pub fn summary(&self) -> Vec<Identity> {
        self.ledger.summary()
    }
}

/// Print today's attendance in the same layout as the `summary` command.
pub fn print_summary(date: NaiveDate, people: &[Identity]) {
    println!("Attendance for {date}: {} present", people.len());
    for person in people {
        println!("  {person}");
    }
}
