//! rollcall-vision: the recognition pipeline behind `FramePipeline`.
//!
//! Faces are found with SCRFD running on ONNX Runtime and identified with a
//! Local Binary Patterns Histogram (LBPH) model trained from a labeled
//! image directory. Recognizer distances are "lower is better".

pub mod detector;
pub mod labels;
pub mod lbph;
pub mod pipeline;
pub mod trainer;

pub use detector::{DetectorError, DetectorOptions, FaceDetector};
pub use labels::{LabelMap, ModelError};
pub use lbph::{LbphParams, LbphRecognizer, Prediction, FACE_SIZE};
pub use pipeline::{Classifier, PipelineError, VisionPipeline, DEFAULT_CONFIDENCE_THRESHOLD};
pub use trainer::{save_artifacts, train_from_dir, TrainError, TrainingSummary};
