//! rollcall-core: attendance bookkeeping.
//!
//! Turns noisy per-frame face recognitions into at most one attendance
//! record per person per day: identity keys, a quorum smoother, an IoU
//! face tracker that gives the smoother stable slots, and the CSV ledger.

pub mod identity;
pub mod ledger;
pub mod smoother;
pub mod tracker;
pub mod types;

pub use identity::{DecodeError, Identity, UNKNOWN_KEY};
pub use ledger::{AttendanceRecord, Ledger, StorageError};
pub use smoother::{RecognitionSmoother, StableRecognition};
pub use tracker::{FaceTracker, TrackId, TrackUpdate};
pub use types::{BoundingBox, FramePipeline, Recognition};
