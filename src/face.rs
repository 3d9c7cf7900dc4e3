//! Face detection and gallery matching used when marking attendance
//!
//! Detection is abstracted behind [`FaceDetector`]; the shipped
//! [`PrecroppedDetector`] expects the caller to supply a frame that already
//! shows just the face. [`GalleryMatcher`] compares an equalized grayscale
//! face against every `student_{id}.jpg` in the gallery directory.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::FaceConfig;

#[derive(Debug, Error)]
pub enum FaceError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("gallery io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A detected face and where it sits in the source frame.
#[derive(Debug, Clone)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Grayscale crop of the face
    pub image: GrayImage,
}

pub trait FaceDetector {
    fn detect(&self, frame: &DynamicImage) -> Option<FaceRegion>;
}

/// Best gallery match for a face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatch {
    pub student_id: u32,
    pub mean_squared_error: f64,
}

pub trait FaceMatcher {
    fn identify(&self, face: &FaceRegion, gallery_dir: &Path) -> Result<Option<FaceMatch>, FaceError>;
}

/// Treats the whole frame as the face, rejecting frames that are too small.
#[derive(Debug, Clone)]
pub struct PrecroppedDetector {
    min_size: u32,
}

impl PrecroppedDetector {
    pub fn new(min_size: u32) -> Self {
        Self { min_size }
    }
}

impl Default for PrecroppedDetector {
    fn default() -> Self {
        Self::new(30)
    }
}

impl FaceDetector for PrecroppedDetector {
    fn detect(&self, frame: &DynamicImage) -> Option<FaceRegion> {
        if frame.width() < self.min_size || frame.height() < self.min_size {
            debug!(width = frame.width(), height = frame.height(), "frame too small for a face");
            return None;
        }
        Some(FaceRegion {
            x: 0,
            y: 0,
            width: frame.width(),
            height: frame.height(),
            image: frame.to_luma8(),
        })
    }
}

/// Nearest-neighbour matcher on mean squared pixel difference.
#[derive(Debug, Clone)]
pub struct GalleryMatcher {
    comparison_size: u32,
    max_mean_squared_error: f64,
}

impl GalleryMatcher {
    pub fn new(comparison_size: u32, max_mean_squared_error: f64) -> Self {
        Self {
            comparison_size: comparison_size.max(1),
            max_mean_squared_error,
        }
    }

    pub fn from_config(config: &FaceConfig) -> Self {
        Self::new(config.comparison_size, config.max_mean_squared_error)
    }

    /// Equalize then resize to the comparison square.
    pub fn normalize(&self, gray: &GrayImage) -> GrayImage {
        let equalized = equalize_histogram(gray);
        imageops::resize(
            &equalized,
            self.comparison_size,
            self.comparison_size,
            FilterType::Triangle,
        )
    }
}

impl Default for GalleryMatcher {
    fn default() -> Self {
        Self::from_config(&FaceConfig::default())
    }
}

impl FaceMatcher for GalleryMatcher {
    fn identify(&self, face: &FaceRegion, gallery_dir: &Path) -> Result<Option<FaceMatch>, FaceError> {
        if !gallery_dir.exists() {
            return Ok(None);
        }

        let probe = self.normalize(&face.image);
        let mut best: Option<FaceMatch> = None;

        for entry in fs::read_dir(gallery_dir)? {
            let path = entry?.path();
            let Some(student_id) = gallery_student_id(&path) else {
                continue;
            };

            let candidate = match image::open(&path) {
                Ok(img) => self.normalize(&img.to_luma8()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable gallery image");
                    continue;
                }
            };

            let score = mean_squared_error(&probe, &candidate);
            let better = best.is_none_or(|b| score < b.mean_squared_error);
            if score < self.max_mean_squared_error && better {
                best = Some(FaceMatch {
                    student_id,
                    mean_squared_error: score,
                });
            }
        }

        Ok(best)
    }
}

/// Gallery file for a student.
pub fn gallery_path(gallery_dir: &Path, student_id: u32) -> PathBuf {
    gallery_dir.join(format!("student_{student_id}.jpg"))
}

fn gallery_student_id(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("student_")?
        .strip_suffix(".jpg")?
        .parse()
        .ok()
}

/// Store a face as the student's gallery image.
pub fn save_face(face: &FaceRegion, student_id: u32, gallery_dir: &Path) -> Result<PathBuf, FaceError> {
    fs::create_dir_all(gallery_dir)?;
    let path = gallery_path(gallery_dir, student_id);
    face.image.save(&path)?;
    Ok(path)
}

/// Global histogram equalization of an 8-bit grayscale image.
pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    let mut cdf = [0u64; 256];
    let mut running = 0;
    for (level, count) in histogram.iter().enumerate() {
        running += count;
        cdf[level] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == cdf_min {
        return gray.clone();
    }

    let scale = 255.0 / (total - cdf_min) as f64;
    let mut lut = [0u8; 256];
    for (level, value) in lut.iter_mut().enumerate() {
        let shifted = cdf[level].saturating_sub(cdf_min) as f64;
        *value = (shifted * scale).round().clamp(0.0, 255.0) as u8;
    }

    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
    out
}

/// Mean squared difference of two same-sized grayscale images.
pub fn mean_squared_error(a: &GrayImage, b: &GrayImage) -> f64 {
    let n = a.as_raw().len().min(b.as_raw().len());
    if n == 0 {
        return f64::INFINITY;
    }
    let total: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&p, &q)| {
            let d = f64::from(p) - f64::from(q);
            d * d
        })
        .sum();
    total / n as f64
}
