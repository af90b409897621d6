//! ExamGate - Descriptor Extractor
//!
//! Turns an image into a fixed-length face embedding, as a single pipeline:
//! face localization, alignment crop, pooled features, learned projection.
//!
//! Localization is a deterministic, recall-biased classical pre-filter
//! (window contrast, bilateral symmetry and dark-feature mass over a scale
//! pyramid). It exists to find where a face-shaped region is, not to prove
//! identity - the embedding match is the identity gate. The embedding
//! projection is learned weight data, loaded once per process.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::descriptor::{FaceDescriptor, DESCRIPTOR_LEN};
use crate::error::{GateError, GateResult};

/// Side of the aligned face crop fed to the embedding stage
pub const ALIGN_SIZE: u32 = 112;

/// Average-pool block size applied to the aligned crop
const POOL: u32 = 4;

/// Embedding input length: (ALIGN_SIZE / POOL)^2 pooled intensities
pub const EMBED_INPUT: usize = ((ALIGN_SIZE / POOL) * (ALIGN_SIZE / POOL)) as usize;

/// Long-side cap for the detection copy of the input image
const DETECT_MAX_DIM: u32 = 256;

/// Window scales relative to the short image side
const DETECT_SCALES: [f32; 3] = [1.0, 0.62, 0.38];

/// Weight file magic bytes
const WEIGHT_MAGIC: &[u8; 8] = b"EXAMGATE";

/// Weight file header: magic + rows + cols
const WEIGHT_HEADER_LEN: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════
// EXTRACTION OUTCOME
// ═══════════════════════════════════════════════════════════════════════════

/// Outcome of an extraction. `NotFound` is a normal result, not an error -
/// the caller prompts for a re-capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A face was localized and embedded
    Face(FaceDescriptor),
    /// No face could be localized in the image
    NotFound,
}

/// A proposed face region, in detection-image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    /// Square window side
    pub size: u32,
    /// Localizer confidence in [0, 1]
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> u64 {
        self.size as u64 * self.size as u64
    }

    /// Intersection-over-union with another box
    fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x) as i64;
        let y1 = self.y.max(other.y) as i64;
        let x2 = ((self.x + self.size).min(other.x + other.size)) as i64;
        let y2 = ((self.y + self.size).min(other.y + other.size)) as i64;

        let inter = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
        let union = (self.area() + other.area()) as f32 - inter;

        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Deterministic primary-face policy: when several faces are proposed, the
/// largest bounding box wins; equal areas are broken by the higher
/// confidence score.
pub fn primary_face(faces: &[FaceBox]) -> Option<FaceBox> {
    faces.iter().copied().max_by(|a, b| {
        a.area().cmp(&b.area()).then(
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(Ordering::Equal),
        )
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// EMBEDDING MODEL
// ═══════════════════════════════════════════════════════════════════════════

/// Learned projection from pooled face features to the descriptor space.
///
/// Weight file layout:
/// ```text
/// [MAGIC 8B]["EXAMGATE"]
/// [ROWS  4B][u32 LE, descriptor length]
/// [COLS  4B][u32 LE, embedding input length]
/// [DATA  NB][rows * cols f32 LE, row-major]
/// ```
pub struct EmbeddingModel {
    projection: Array2<f32>,
}

impl EmbeddingModel {
    /// Build a model from an in-memory projection matrix
    pub fn from_weights(projection: Array2<f32>) -> GateResult<Self> {
        let (rows, cols) = projection.dim();
        if rows != DESCRIPTOR_LEN || cols != EMBED_INPUT {
            return Err(GateError::ModelLoadFailure(format!(
                "projection shape {}x{} does not match {}x{}",
                rows, cols, DESCRIPTOR_LEN, EMBED_INPUT
            )));
        }
        Ok(Self { projection })
    }

    /// Parse a weight file
    pub fn from_bytes(bytes: &[u8]) -> GateResult<Self> {
        if bytes.len() < WEIGHT_HEADER_LEN {
            return Err(GateError::ModelLoadFailure(
                "weight file shorter than header".into(),
            ));
        }
        if &bytes[0..8] != WEIGHT_MAGIC {
            return Err(GateError::ModelLoadFailure("bad weight file magic".into()));
        }

        let rows = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let cols = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
        if rows != DESCRIPTOR_LEN || cols != EMBED_INPUT {
            return Err(GateError::ModelLoadFailure(format!(
                "weight dimensions {}x{} do not match {}x{}",
                rows, cols, DESCRIPTOR_LEN, EMBED_INPUT
            )));
        }

        let payload = &bytes[WEIGHT_HEADER_LEN..];
        if payload.len() != rows * cols * 4 {
            return Err(GateError::ModelLoadFailure(format!(
                "weight payload is {} bytes, expected {}",
                payload.len(),
                rows * cols * 4
            )));
        }

        let data: Vec<f32> = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let projection = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| GateError::ModelLoadFailure(e.to_string()))?;

        Self::from_weights(projection)
    }

    /// Load a weight file from disk
    pub fn load(path: &Path) -> GateResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| GateError::ModelLoadFailure(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }

    /// Write the weight file to disk
    pub fn save(&self, path: &Path) -> GateResult<()> {
        let mut out = Vec::with_capacity(WEIGHT_HEADER_LEN + self.projection.len() * 4);
        out.extend_from_slice(WEIGHT_MAGIC);
        out.extend_from_slice(&(DESCRIPTOR_LEN as u32).to_le_bytes());
        out.extend_from_slice(&(EMBED_INPUT as u32).to_le_bytes());
        for v in self.projection.iter() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Deterministic random projection for demos and tests.
    ///
    /// Not a trained model - it preserves relative distances (random
    /// projection), which is all the demo and the test suite rely on.
    pub fn synthetic(seed: u64) -> Self {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(seed);
        let scale = 1.0 / (EMBED_INPUT as f32).sqrt();
        let projection = Array2::from_shape_fn((DESCRIPTOR_LEN, EMBED_INPUT), |_| {
            rng.gen_range(-1.0f32..1.0) * scale
        });
        Self { projection }
    }

    /// Project pooled features into a L2-normalized descriptor
    pub fn embed(&self, features: &Array1<f32>) -> FaceDescriptor {
        let mean = features.mean().unwrap_or(0.0);
        let variance = features
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f32>()
            / features.len().max(1) as f32;
        let std = variance.sqrt().max(1e-6);
        let normalized = features.mapv(|v| (v - mean) / std);

        let mut embedding = self.projection.dot(&normalized);
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-6 {
            embedding.mapv_inplace(|v| v / norm);
        }

        FaceDescriptor::from_raw(embedding.to_vec())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PROCESS-WIDE MODEL
// ═══════════════════════════════════════════════════════════════════════════

static MODEL: OnceCell<Arc<EmbeddingModel>> = OnceCell::const_new();

/// Load the process-wide embedding model from a weight file.
///
/// Lazy, memoized, never reloaded. Concurrent first calls share a single
/// in-flight load; later calls return the cached model and ignore `path`.
pub async fn init_model(path: impl AsRef<Path>) -> GateResult<Arc<EmbeddingModel>> {
    let path = path.as_ref();
    let model = MODEL
        .get_or_try_init(|| async {
            log::info!("loading embedding model from {}", path.display());
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| GateError::ModelLoadFailure(format!("{}: {}", path.display(), e)))?;
            Ok::<_, GateError>(Arc::new(EmbeddingModel::from_bytes(&bytes)?))
        })
        .await?;
    Ok(Arc::clone(model))
}

// ═══════════════════════════════════════════════════════════════════════════
// EXTRACTOR
// ═══════════════════════════════════════════════════════════════════════════

/// Tuning for the classical face localizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum window confidence to propose a face
    pub confidence_threshold: f32,
    /// Pixel variance (on [0,1] intensities) at which contrast saturates
    pub variance_ref: f32,
    /// Smallest face window in detection pixels
    pub min_face_px: u32,
    /// Overlap above which candidate windows collapse into one face
    pub nms_iou: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            variance_ref: 0.01,
            min_face_px: 24,
            nms_iou: 0.3,
        }
    }
}

/// Face descriptor extractor. Pure over pixel data; the embedding model is
/// shared, read-only state.
pub struct FaceExtractor {
    model: Arc<EmbeddingModel>,
    config: DetectorConfig,
}

impl FaceExtractor {
    /// Create an extractor over a loaded embedding model
    pub fn new(model: Arc<EmbeddingModel>) -> Self {
        Self {
            model,
            config: DetectorConfig::default(),
        }
    }

    /// Create an extractor with custom localizer tuning
    pub fn with_detector(model: Arc<EmbeddingModel>, config: DetectorConfig) -> Self {
        Self { model, config }
    }

    /// Run the full pipeline on encoded image bytes (still upload or a
    /// grabbed video frame)
    pub fn extract(&self, image_bytes: &[u8]) -> GateResult<Extraction> {
        let decoded = image::load_from_memory(image_bytes)?;
        let gray = decoded.to_luma8();
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return Ok(Extraction::NotFound);
        }

        // Detection runs on a bounded-size copy; boxes map back via `factor`
        let long_side = w.max(h);
        let (detect, factor) = if long_side > DETECT_MAX_DIM {
            let f = DETECT_MAX_DIM as f32 / long_side as f32;
            let dw = ((w as f32 * f).round() as u32).max(1);
            let dh = ((h as f32 * f).round() as u32).max(1);
            let scaled = imageops::resize(&gray, dw, dh, FilterType::Triangle);
            (scaled, w as f32 / dw as f32)
        } else {
            (gray.clone(), 1.0)
        };

        let faces = self.detect_faces(&detect);
        let primary = match primary_face(&faces) {
            Some(face) => face,
            None => return Ok(Extraction::NotFound),
        };

        let aligned = align_crop(&gray, &primary, factor);
        let features = pooled_features(&aligned);
        Ok(Extraction::Face(self.model.embed(&features)))
    }

    /// Propose face regions in a detection-sized grayscale image
    fn detect_faces(&self, gray: &GrayImage) -> Vec<FaceBox> {
        let (w, h) = gray.dimensions();
        let min_dim = w.min(h);
        let mut candidates = Vec::new();

        for &scale in DETECT_SCALES.iter() {
            let win = (min_dim as f32 * scale) as u32;
            if win < self.config.min_face_px || win == 0 {
                continue;
            }
            let stride = (win / 4).max(1);

            let mut y = 0;
            while y + win <= h {
                let mut x = 0;
                while x + win <= w {
                    let confidence = self.score_window(gray, x, y, win);
                    if confidence >= self.config.confidence_threshold {
                        candidates.push(FaceBox {
                            x,
                            y,
                            size: win,
                            confidence,
                        });
                    }
                    x += stride;
                }
                y += stride;
            }
        }

        non_max_suppression(candidates, self.config.nms_iou)
    }

    /// Score one window on three cues: contrast (variance against a
    /// saturation reference), bilateral symmetry, and dark-feature mass
    /// (pixels far below the window mean - eyes, brows, mouth). Flat
    /// regions fail contrast, laterally-unbalanced regions fail symmetry,
    /// smooth ramps and unstructured noise fail the dark-feature cue.
    fn score_window(&self, gray: &GrayImage, x0: u32, y0: u32, win: u32) -> f32 {
        let step = (win / 32).max(1);

        let mut samples = Vec::with_capacity(32 * 32);
        let mut sym_err = 0.0f32;
        let mut sym_n = 0.0f32;

        let mut dy = 0;
        while dy < win {
            let mut dx = 0;
            while dx < win {
                let v = gray.get_pixel(x0 + dx, y0 + dy).0[0] as f32 / 255.0;
                samples.push(v);

                if dx < win / 2 {
                    let mirrored = gray.get_pixel(x0 + (win - 1 - dx), y0 + dy).0[0] as f32 / 255.0;
                    sym_err += (v - mirrored).abs();
                    sym_n += 1.0;
                }

                dx += step;
            }
            dy += step;
        }

        if samples.is_empty() {
            return 0.0;
        }

        let n = samples.len() as f32;
        let mean = samples.iter().sum::<f32>() / n;
        let variance = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let std = variance.sqrt().max(1e-6);

        let dark = samples.iter().filter(|&&v| (v - mean) / std < -2.0).count() as f32;

        let contrast = (variance / self.config.variance_ref).min(1.0);
        let symmetry = (1.0 - (sym_err / sym_n.max(1.0)) * 2.0).max(0.0);
        let feature_mass = (dark / n / 0.01).min(1.0);

        contrast * symmetry * feature_mass
    }
}

/// Greedy non-maximum suppression on confidence order
fn non_max_suppression(mut candidates: Vec<FaceBox>, iou_limit: f32) -> Vec<FaceBox> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<FaceBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_limit) {
            kept.push(candidate);
        }
    }
    kept
}

/// Crop the winning box out of the full-resolution image and resize it to
/// the aligned input size
fn align_crop(gray: &GrayImage, face: &FaceBox, factor: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let size = ((face.size as f32 * factor).round() as u32).clamp(1, w.min(h));
    let x = ((face.x as f32 * factor).round() as u32).min(w - size);
    let y = ((face.y as f32 * factor).round() as u32).min(h - size);

    let crop = imageops::crop_imm(gray, x, y, size, size).to_image();
    imageops::resize(&crop, ALIGN_SIZE, ALIGN_SIZE, FilterType::Triangle)
}

/// Average-pool the aligned crop into the embedding input vector
fn pooled_features(aligned: &GrayImage) -> Array1<f32> {
    let grid = (ALIGN_SIZE / POOL) as usize;
    let mut features = Vec::with_capacity(grid * grid);

    for gy in 0..grid as u32 {
        for gx in 0..grid as u32 {
            let mut sum = 0.0f32;
            for dy in 0..POOL {
                for dx in 0..POOL {
                    sum += aligned.get_pixel(gx * POOL + dx, gy * POOL + dy).0[0] as f32 / 255.0;
                }
            }
            features.push(sum / (POOL * POOL) as f32);
        }
    }

    Array1::from_vec(features)
}

// ═══════════════════════════════════════════════════════════════════════════
// TEST FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{DynamicImage, GrayImage, Luma};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::io::Cursor;

    /// Encode a grayscale buffer as PNG bytes
    pub(crate) fn png_bytes(gray: GrayImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    /// A mirror-symmetric high-contrast face stand-in: two dark eyes and a
    /// mouth on a light background, 128x128
    pub(crate) fn face_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(128, 128, Luma([204]));

        // Eyes, mirrored about the vertical axis
        for y in 40..52 {
            for x in 32..44 {
                img.put_pixel(x, y, Luma([26]));
                img.put_pixel(127 - x, y, Luma([26]));
            }
        }
        // Mouth, centered
        for y in 88..96 {
            for x in 48..80 {
                img.put_pixel(x, y, Luma([26]));
            }
        }
        img
    }

    pub(crate) fn face_png() -> Vec<u8> {
        png_bytes(face_image())
    }

    /// The same face with sparse low-amplitude sensor noise, the shape of a
    /// second capture of the same person
    pub(crate) fn noisy_face_png(seed: u64) -> Vec<u8> {
        let mut img = face_image();
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..200 {
            let x = rng.gen_range(0..128);
            let y = rng.gen_range(0..128);
            let p = img.get_pixel(x, y).0[0];
            img.put_pixel(x, y, Luma([p.saturating_add(rng.gen_range(0..3))]));
        }
        png_bytes(img)
    }

    /// Uniform frame with no detectable structure
    pub(crate) fn blank_png() -> Vec<u8> {
        png_bytes(GrayImage::from_pixel(128, 128, Luma([160])))
    }
}
