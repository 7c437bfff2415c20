//! Pixel kernels and the helpers that compose their outputs.
//!
//! Every kernel is synchronous and CPU-bound; the processor runs them on the
//! [`WorkerPool`](crate::pool::WorkerPool), never on the async runtime.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::error::TransformError;

/// One pluggable "apply transform to frame" capability.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// `seconds` is the frame's presentation time, for time-dependent
    /// kernels.
    fn apply(&self, image: &RgbImage, seconds: f64) -> Result<RgbImage, TransformError>;
}

/// The kernels a processor draws from, one slot per pipeline role.
#[derive(Clone)]
pub struct KernelSet {
    /// Cartoon colour channel.
    pub color: Arc<dyn Kernel>,
    /// Cartoon edge-mask channel.
    pub edge_mask: Arc<dyn Kernel>,
    pub edges: Arc<dyn Kernel>,
    pub rotate: Arc<dyn Kernel>,
}

impl Default for KernelSet {
    fn default() -> Self {
        Self {
            color: Arc::new(SmoothColor),
            edge_mask: Arc::new(EdgeMask),
            edges: Arc::new(GradientEdges::default()),
            rotate: Arc::new(TimedRotation::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in kernels
// ---------------------------------------------------------------------------

/// Flattened colour: quarter-size pyramid, smoothing, then back up.
pub struct SmoothColor;

const COLOR_PYRAMID_FACTOR: u32 = 4;
const COLOR_BLUR_SIGMA: f32 = 2.0;

impl Kernel for SmoothColor {
    fn name(&self) -> &'static str {
        "smooth_color"
    }

    fn apply(&self, image: &RgbImage, _seconds: f64) -> Result<RgbImage, TransformError> {
        let (width, height) = image.dimensions();
        let small = imageops::resize(
            image,
            (width / COLOR_PYRAMID_FACTOR).max(1),
            (height / COLOR_PYRAMID_FACTOR).max(1),
            FilterType::Triangle,
        );
        let smoothed = imageops::blur(&small, COLOR_BLUR_SIGMA);
        Ok(imageops::resize(&smoothed, width, height, FilterType::Triangle))
    }
}

/// Binary outline mask: median blur then adaptive mean threshold.
pub struct EdgeMask;

const MEDIAN_RADIUS: u32 = 3;
const THRESHOLD_RADIUS: u32 = 4;
const THRESHOLD_OFFSET: i64 = 2;

impl Kernel for EdgeMask {
    fn name(&self) -> &'static str {
        "edge_mask"
    }

    fn apply(&self, image: &RgbImage, _seconds: f64) -> Result<RgbImage, TransformError> {
        let gray = imageops::grayscale(image);
        let blurred = median_filter(&gray, MEDIAN_RADIUS);
        let mask = adaptive_mean_threshold(&blurred, THRESHOLD_RADIUS, THRESHOLD_OFFSET);
        Ok(gray_to_rgb(&mask))
    }
}

/// White where the Sobel gradient magnitude exceeds `threshold`.
pub struct GradientEdges {
    pub threshold: f32,
}

impl Default for GradientEdges {
    fn default() -> Self {
        Self { threshold: 100.0 }
    }
}

impl Kernel for GradientEdges {
    fn name(&self) -> &'static str {
        "gradient_edges"
    }

    fn apply(&self, image: &RgbImage, _seconds: f64) -> Result<RgbImage, TransformError> {
        let gray = imageops::grayscale(image);
        let (width, height) = gray.dimensions();
        let mut out = GrayImage::new(width, height);

        if width >= 3 && height >= 3 {
            for y in 1..height - 1 {
                for x in 1..width - 1 {
                    let p = |dx: u32, dy: u32| f32::from(gray.get_pixel(x + dx - 1, y + dy - 1)[0]);
                    let gx = (p(2, 0) + 2.0 * p(2, 1) + p(2, 2)) - (p(0, 0) + 2.0 * p(0, 1) + p(0, 2));
                    let gy = (p(0, 2) + 2.0 * p(1, 2) + p(2, 2)) - (p(0, 0) + 2.0 * p(1, 0) + p(2, 0));
                    if (gx * gx + gy * gy).sqrt() > self.threshold {
                        out.put_pixel(x, y, Luma([255]));
                    }
                }
            }
        }
        Ok(gray_to_rgb(&out))
    }
}

/// Rotation about the centre by `degrees_per_second * t`.
pub struct TimedRotation {
    pub degrees_per_second: f64,
}

impl Default for TimedRotation {
    fn default() -> Self {
        Self {
            degrees_per_second: 45.0,
        }
    }
}

impl Kernel for TimedRotation {
    fn name(&self) -> &'static str {
        "timed_rotation"
    }

    fn apply(&self, image: &RgbImage, seconds: f64) -> Result<RgbImage, TransformError> {
        let (width, height) = image.dimensions();
        let (sin, cos) = (self.degrees_per_second * seconds).to_radians().sin_cos();
        let cx = f64::from(width) / 2.0;
        let cy = f64::from(height) / 2.0;

        // Inverse mapping with nearest-neighbour sampling; uncovered pixels
        // stay black.
        Ok(RgbImage::from_fn(width, height, |x, y| {
            let dx = f64::from(x) + 0.5 - cx;
            let dy = f64::from(y) + 0.5 - cy;
            let sx = (cos * dx - sin * dy + cx).floor();
            let sy = (sin * dx + cos * dy + cy).floor();
            if sx >= 0.0 && sy >= 0.0 && sx < f64::from(width) && sy < f64::from(height) {
                *image.get_pixel(sx as u32, sy as u32)
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Composition helpers
// ---------------------------------------------------------------------------

/// Pixel-wise bitwise AND of a colour image with a mask.
pub fn combine_and(color: &RgbImage, mask: &RgbImage) -> Result<RgbImage, TransformError> {
    ensure_same_size(color, mask)?;
    Ok(RgbImage::from_fn(color.width(), color.height(), |x, y| {
        let c = color.get_pixel(x, y).0;
        let m = mask.get_pixel(x, y).0;
        Rgb([c[0] & m[0], c[1] & m[1], c[2] & m[2]])
    }))
}

/// Per-channel average of two frames.
pub fn blend(previous: &RgbImage, current: &RgbImage) -> Result<RgbImage, TransformError> {
    ensure_same_size(previous, current)?;
    Ok(RgbImage::from_fn(current.width(), current.height(), |x, y| {
        let a = previous.get_pixel(x, y).0;
        let b = current.get_pixel(x, y).0;
        Rgb(std::array::from_fn(|i| ((u16::from(a[i]) + u16::from(b[i])) / 2) as u8))
    }))
}

/// Resize to exactly `width` x `height`, or clone if already that size.
pub fn scale_to(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width.max(1), height.max(1), FilterType::Triangle)
}

fn ensure_same_size(left: &RgbImage, right: &RgbImage) -> Result<(), TransformError> {
    if left.dimensions() != right.dimensions() {
        return Err(TransformError::mismatch(left.dimensions(), right.dimensions()));
    }
    Ok(())
}

fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

fn median_filter(gray: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let r = radius as i64;
    let mut window = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            window.clear();
            for dy in -r..=r {
                for dx in -r..=r {
                    let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                    window.push(gray.get_pixel(sx, sy)[0]);
                }
            }
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable(mid);
            out.put_pixel(x, y, Luma([*median]));
        }
    }
    out
}

/// 255 where a pixel exceeds the mean of its neighbourhood minus `offset`.
fn adaptive_mean_threshold(gray: &GrayImage, radius: u32, offset: i64) -> GrayImage {
    let (width, height) = gray.dimensions();
    let stride = width as usize + 1;

    // Summed-area table with a zero row and column.
    let mut integral = vec![0u64; stride * (height as usize + 1)];
    for y in 0..height as usize {
        let mut row = 0u64;
        for x in 0..width as usize {
            row += u64::from(gray.get_pixel(x as u32, y as u32)[0]);
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let x0 = x.saturating_sub(radius) as usize;
        let y0 = y.saturating_sub(radius) as usize;
        let x1 = (x + radius + 1).min(width) as usize;
        let y1 = (y + radius + 1).min(height) as usize;
        let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
            - integral[y0 * stride + x1]
            - integral[y1 * stride + x0];
        let area = ((x1 - x0) * (y1 - y0)) as i64;
        let mean = sum as i64 / area;
        if i64::from(gray.get_pixel(x, y)[0]) > mean - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
