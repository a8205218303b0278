//! Detector + recognizer wired behind [`FramePipeline`].

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::labels::{LabelMap, ModelError};
use crate::lbph::{LbphRecognizer, FACE_SIZE};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use rollcall_core::{BoundingBox, FramePipeline, Recognition, UNKNOWN_KEY};
use std::path::Path;
use thiserror::Error;

/// Default chi-square distance above which a face is reported as unknown.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 100.0;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("model: {0}")]
    Model(#[from] ModelError),
    #[error("frame is {actual} bytes, expected {expected} for {width}x{height}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Turns a face crop into an identity key using the LBPH model and label map.
pub struct Classifier {
    recognizer: LbphRecognizer,
    labels: LabelMap,
    threshold: f32,
}

impl Classifier {
    pub fn new(recognizer: LbphRecognizer, labels: LabelMap, threshold: f32) -> Self {
        Self {
            recognizer,
            labels,
            threshold,
        }
    }

    /// Load both artifacts and check that they were trained together.
    pub fn load(model_path: &Path, labels_path: &Path, threshold: f32) -> Result<Self, ModelError> {
        let recognizer = LbphRecognizer::load(model_path)?;
        let labels = LabelMap::load(labels_path)?;
        labels.verify_model(model_path)?;
        Ok(Self::new(recognizer, labels, threshold))
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Classify the face inside `bbox` of a grayscale frame.
    ///
    /// The frame must hold at least `width * height` bytes.
    pub fn classify(
        &self,
        frame: &[u8],
        width: u32,
        height: u32,
        bbox: &BoundingBox,
    ) -> Recognition {
        let unknown = |confidence: f32| Recognition {
            bbox: *bbox,
            key: UNKNOWN_KEY.to_string(),
            confidence,
        };

        let Some((x, y, w, h)) = bbox.clamp_to(width, height) else {
            return unknown(f32::INFINITY);
        };
        let Some(image) = ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(width, height, frame.to_vec()) else {
            return unknown(f32::INFINITY);
        };

        let crop = imageops::crop_imm(&image, x, y, w, h).to_image();
        let face = imageops::resize(&crop, FACE_SIZE, FACE_SIZE, FilterType::Triangle);

        let Some(prediction) = self.recognizer.predict(&face) else {
            return unknown(f32::INFINITY);
        };
        if prediction.distance > self.threshold {
            return unknown(prediction.distance);
        }
        match self.labels.get(prediction.label) {
            Some(key) => Recognition {
                bbox: *bbox,
                key: key.to_string(),
                confidence: prediction.distance,
            },
            None => {
                tracing::debug!(
                    label = prediction.label,
                    "predicted label has no entry in the label map"
                );
                unknown(prediction.distance)
            }
        }
    }
}

/// SCRFD detection followed by LBPH classification of every face.
pub struct VisionPipeline {
    detector: FaceDetector,
    classifier: Classifier,
}

impl VisionPipeline {
    pub fn new(detector: FaceDetector, classifier: Classifier) -> Self {
        Self {
            detector,
            classifier,
        }
    }

    pub fn load(
        detector_model: &Path,
        detector_options: DetectorOptions,
        model_path: &Path,
        labels_path: &Path,
        threshold: f32,
    ) -> Result<Self, PipelineError> {
        let classifier = Classifier::load(model_path, labels_path, threshold)?;
        let detector = FaceDetector::load(detector_model, detector_options)?;
        tracing::info!(
            people = classifier.label_count(),
            threshold,
            "vision pipeline ready"
        );
        Ok(Self::new(detector, classifier))
    }
}

impl FramePipeline for VisionPipeline {
    type Error = PipelineError;

    fn detect_and_classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Recognition>, Self::Error> {
        let expected = (width * height) as usize;
        if frame.len() < expected {
            return Err(PipelineError::InvalidFrame {
                width,
                height,
                expected,
                actual: frame.len(),
            });
        }

        let faces = self.detector.detect(frame, width, height)?;
        Ok(faces
            .iter()
            .map(|bbox| self.classifier.classify(frame, width, height, bbox))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbph::tests::{checker, stripes};
    use image::GrayImage;

    /// 400x300 frame with a striped patch at (50, 50) and a checkered patch at (250, 100).
    fn scene() -> GrayImage {
        let mut frame = GrayImage::from_pixel(400, 300, Luma([128]));
        imageops::replace(&mut frame, &stripes(100), 50, 50);
        imageops::replace(&mut frame, &checker(100), 250, 100);
        frame
    }

    fn trained(threshold: f32) -> Classifier {
        let mut recognizer = LbphRecognizer::default();
        let mut labels = LabelMap::default();
        recognizer.add(labels.push("Alice_001"), &stripes(100));
        recognizer.add(labels.push("Bob_002"), &checker(100));
        Classifier::new(recognizer, labels, threshold)
    }

    fn face_at(x: f32, y: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: 100.0,
            height: 100.0,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_classify_known_faces() {
        let classifier = trained(1000.0);
        let frame = scene();

        let alice = classifier.classify(frame.as_raw(), 400, 300, &face_at(50.0, 50.0));
        assert_eq!(alice.key, "Alice_001");
        let bob = classifier.classify(frame.as_raw(), 400, 300, &face_at(250.0, 100.0));
        assert_eq!(bob.key, "Bob_002");
        assert!(bob.confidence < 1e-3, "identical crop should be ~0, got {}", bob.confidence);
    }

    #[test]
    fn test_classify_above_threshold_is_unknown() {
        let classifier = trained(-1.0);
        let frame = scene();
        let r = classifier.classify(frame.as_raw(), 400, 300, &face_at(50.0, 50.0));
        assert_eq!(r.key, UNKNOWN_KEY);
        assert!(r.confidence.is_finite());
    }

    #[test]
    fn test_classify_unmapped_label_is_unknown() {
        let mut recognizer = LbphRecognizer::default();
        recognizer.add(7, &stripes(100));
        let classifier = Classifier::new(recognizer, LabelMap::default(), 1000.0);
        let frame = scene();
        let r = classifier.classify(frame.as_raw(), 400, 300, &face_at(50.0, 50.0));
        assert_eq!(r.key, UNKNOWN_KEY);
    }

    #[test]
    fn test_classify_box_outside_frame() {
        let classifier = trained(1000.0);
        let frame = scene();
        let r = classifier.classify(frame.as_raw(), 400, 300, &face_at(500.0, 500.0));
        assert_eq!(r.key, UNKNOWN_KEY);
        assert_eq!(r.confidence, f32::INFINITY);
    }

    #[test]
    fn test_classify_short_frame() {
        let classifier = trained(1000.0);
        let r = classifier.classify(&[0u8; 10], 400, 300, &face_at(50.0, 50.0));
        assert_eq!(r.key, UNKNOWN_KEY);
    }

    #[test]
    fn test_load_rejects_stale_labels() {
        let dir = tempfile::TempDir::new().unwrap();
        let model_path = dir.path().join("face_model.json");
        let labels_path = dir.path().join("labels.json");

        let mut recognizer = LbphRecognizer::default();
        let mut labels = LabelMap::default();
        recognizer.add(labels.push("Alice_001"), &stripes(32));
        recognizer.save(&model_path).unwrap();
        labels.model_sha256 = Some("0".repeat(64));
        labels.save(&labels_path).unwrap();

        let err = Classifier::load(&model_path, &labels_path, 100.0).err().unwrap();
        assert!(matches!(err, ModelError::ModelMismatch { .. }));
    }
}
