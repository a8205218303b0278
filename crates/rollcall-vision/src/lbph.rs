//! Local Binary Patterns Histogram face recognizer.
//!
//! Each face crop is resized to [`FACE_SIZE`] square, turned into 8-neighbour
//! LBP codes, split into a `grid_x` x `grid_y` grid and summarised as one
//! normalized 256-bin histogram per cell. Prediction is nearest neighbour
//! under the chi-square distance, so 0.0 is a perfect match.

use crate::labels::{read_artifact, write_json, ModelError};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Side length faces are resized to before encoding.
pub const FACE_SIZE: u32 = 200;
pub const MODEL_FORMAT_VERSION: u32 = 1;

const LBP_BINS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self { grid_x: 8, grid_y: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    label: u32,
    histogram: Vec<f32>,
}

/// Best match for a probe face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    /// Chi-square distance to the closest training sample.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbphRecognizer {
    format_version: u32,
    params: LbphParams,
    face_size: u32,
    samples: Vec<Sample>,
}

impl Default for LbphRecognizer {
    fn default() -> Self {
        Self::new(LbphParams::default())
    }
}

impl LbphRecognizer {
    pub fn new(params: LbphParams) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            params: LbphParams {
                grid_x: params.grid_x.max(1),
                grid_y: params.grid_y.max(1),
            },
            face_size: FACE_SIZE,
            samples: Vec::new(),
        }
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Add one training face under `label`.
    pub fn add(&mut self, label: u32, face: &GrayImage) {
        let histogram = self.histogram(face);
        self.samples.push(Sample { label, histogram });
    }

    /// Nearest training sample for `face`, or `None` if the model is empty.
    pub fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        let probe = self.histogram(face);

        let mut best: Option<Prediction> = None;
        for sample in &self.samples {
            let distance = chi_square(&probe, &sample.histogram);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction {
                    label: sample.label,
                    distance,
                });
            }
        }
        best
    }

    /// Spatial LBP histogram of a face, after resizing it to the model's face size.
    fn histogram(&self, face: &GrayImage) -> Vec<f32> {
        let resized;
        let face = if face.dimensions() == (self.face_size, self.face_size) {
            face
        } else {
            resized = imageops::resize(face, self.face_size, self.face_size, FilterType::Triangle);
            &resized
        };

        let codes = lbp_codes(face);
        let code_w = face.width().saturating_sub(2) as usize;
        let code_h = face.height().saturating_sub(2) as usize;
        spatial_histogram(&codes, code_w, code_h, self.params)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = read_artifact(path)?;
        let model: LbphRecognizer =
            serde_json::from_slice(&bytes).map_err(|e| ModelError::Json {
                path: path.to_path_buf(),
                source: e,
            })?;
        if model.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: model.format_version,
                expected: MODEL_FORMAT_VERSION,
            });
        }
        tracing::info!(
            path = %path.display(),
            samples = model.samples.len(),
            grid_x = model.params.grid_x,
            grid_y = model.params.grid_y,
            "loaded LBPH model"
        );
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_json(path, self)
    }
}

/// 8-neighbour LBP code for every interior pixel, row-major, `(w-2) x (h-2)`.
///
/// Neighbours are read clockwise from the top-left; a bit is set when the
/// neighbour is at least as bright as the centre.
fn lbp_codes(img: &GrayImage) -> Vec<u8> {
    const OFFSETS: [(i32, i32); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return Vec::new();
    }

    let mut codes = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = img.get_pixel(x, y)[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in OFFSETS.iter().enumerate() {
                let nx = (x as i32 + dx) as u32;
                let ny = (y as i32 + dy) as u32;
                if img.get_pixel(nx, ny)[0] >= center {
                    code |= 1 << bit;
                }
            }
            codes.push(code);
        }
    }
    codes
}

/// Concatenated per-cell histograms, each normalized to sum to 1.
fn spatial_histogram(codes: &[u8], width: usize, height: usize, params: LbphParams) -> Vec<f32> {
    let gx = params.grid_x as usize;
    let gy = params.grid_y as usize;
    let mut histogram = vec![0f32; gx * gy * LBP_BINS];

    let cell_w = width / gx;
    let cell_h = height / gy;
    if cell_w == 0 || cell_h == 0 {
        return histogram;
    }
    let cell_pixels = (cell_w * cell_h) as f32;

    for row in 0..gy {
        for col in 0..gx {
            let offset = (row * gx + col) * LBP_BINS;
            let cell = &mut histogram[offset..offset + LBP_BINS];
            for y in row * cell_h..(row + 1) * cell_h {
                for x in col * cell_w..(col + 1) * cell_w {
                    cell[codes[y * width + x] as usize] += 1.0;
                }
            }
            for bin in cell.iter_mut() {
                *bin /= cell_pixels;
            }
        }
    }
    histogram
}

/// Alternative chi-square distance: sum of 2(a-b)^2 / (a+b).
fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&p, &q)| {
            let sum = p + q;
            if sum > 0.0 {
                2.0 * (p - q) * (p - q) / sum
            } else {
                0.0
            }
        })
        .sum()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Horizontal stripes.
    pub(crate) fn stripes(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |_, y| {
            image::Luma([if (y / 4) % 2 == 0 { 40 } else { 220 }])
        })
    }

    /// Checkerboard.
    pub(crate) fn checker(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            image::Luma([if ((x / 6) + (y / 6)) % 2 == 0 { 30 } else { 200 }])
        })
    }

    /// Diagonal gradient.
    pub(crate) fn gradient(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| image::Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn test_lbp_codes_flat_image() {
        // Every neighbour equals the centre, so every bit is set.
        let img = GrayImage::from_pixel(4, 4, image::Luma([100]));
        assert_eq!(lbp_codes(&img), vec![0xFF; 4]);
    }

    #[test]
    fn test_lbp_codes_bright_centre() {
        let mut img = GrayImage::from_pixel(3, 3, image::Luma([10]));
        img.put_pixel(1, 1, image::Luma([200]));
        assert_eq!(lbp_codes(&img), vec![0]);
    }

    #[test]
    fn test_lbp_codes_single_bright_neighbour() {
        let mut img = GrayImage::from_pixel(3, 3, image::Luma([10]));
        img.put_pixel(1, 1, image::Luma([100]));
        // Right neighbour is bit 3.
        img.put_pixel(2, 1, image::Luma([150]));
        assert_eq!(lbp_codes(&img), vec![1 << 3]);
    }

    #[test]
    fn test_lbp_codes_too_small() {
        assert!(lbp_codes(&GrayImage::new(2, 2)).is_empty());
    }

    #[test]
    fn test_spatial_histogram_cells_are_normalized() {
        let codes = vec![7u8; 16];
        let hist = spatial_histogram(&codes, 4, 4, LbphParams { grid_x: 2, grid_y: 2 });
        assert_eq!(hist.len(), 4 * LBP_BINS);
        for cell in hist.chunks(LBP_BINS) {
            assert!((cell.iter().sum::<f32>() - 1.0).abs() < 1e-6);
            assert_eq!(cell[7], 1.0);
        }
    }

    #[test]
    fn test_chi_square() {
        assert_eq!(chi_square(&[0.5, 0.5], &[0.5, 0.5]), 0.0);
        // 2*(1-0)^2/1 + 2*(0-1)^2/1 = 4
        assert!((chi_square(&[1.0, 0.0], &[0.0, 1.0]) - 4.0).abs() < 1e-6);
        assert_eq!(chi_square(&[0.0], &[0.0]), 0.0);
    }

    #[test]
    fn test_empty_model_predicts_nothing() {
        assert_eq!(LbphRecognizer::default().predict(&stripes(64)), None);
    }

    #[test]
    fn test_predict_nearest_label() {
        let mut model = LbphRecognizer::default();
        model.add(0, &stripes(FACE_SIZE));
        model.add(1, &checker(FACE_SIZE));
        model.add(2, &gradient(FACE_SIZE));

        let p = model.predict(&checker(FACE_SIZE)).unwrap();
        assert_eq!(p.label, 1);
        assert!(p.distance < 1e-3, "identical face should be ~0, got {}", p.distance);

        assert_eq!(model.predict(&stripes(FACE_SIZE)).unwrap().label, 0);
        assert_eq!(model.predict(&gradient(FACE_SIZE)).unwrap().label, 2);
    }

    #[test]
    fn test_predict_resizes_probe() {
        let mut model = LbphRecognizer::default();
        model.add(0, &GrayImage::from_pixel(FACE_SIZE, FACE_SIZE, image::Luma([128])));
        model.add(1, &stripes(FACE_SIZE));
        // A larger striped crop is still far closer to stripes than to a flat face.
        assert_eq!(model.predict(&stripes(FACE_SIZE * 2)).unwrap().label, 1);
        assert_eq!(model.sample_count(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("face_model.json");
        let mut model = LbphRecognizer::new(LbphParams { grid_x: 4, grid_y: 4 });
        model.add(3, &gradient(32));
        model.save(&path).unwrap();

        let loaded = LbphRecognizer::load(&path).unwrap();
        assert_eq!(loaded, model);
        assert_eq!(loaded.params(), LbphParams { grid_x: 4, grid_y: 4 });
    }

    #[test]
    fn test_load_missing_model() {
        let dir = TempDir::new().unwrap();
        let err = LbphRecognizer::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }
}
