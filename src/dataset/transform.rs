//! Image transforms for the two data pipelines
//!
//! - **Training**: random resized crop to `image_size`, then a random
//!   horizontal flip
//! - **Evaluation**: resize the shorter side to `resize_size`, then center crop
//!   to `image_size`
//!
//! Both end with a conversion to a flattened CHW `f32` buffer in `[0, 1]`.
//! Normalization with the ImageNet statistics happens in the batcher.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use rand::Rng;

/// Area fraction range sampled by the random resized crop
pub const CROP_SCALE: (f64, f64) = (0.08, 1.0);
/// Aspect ratio range sampled by the random resized crop
pub const CROP_RATIO: (f64, f64) = (3.0 / 4.0, 4.0 / 3.0);
/// Sampling attempts before falling back to a center crop
const CROP_ATTEMPTS: usize = 10;
/// Probability of a horizontal flip during training
pub const FLIP_PROB: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    Train,
    Eval,
}

/// Per-split image preprocessing
#[derive(Debug, Clone)]
pub struct ImageTransform {
    mode: TransformMode,
    image_size: u32,
    resize_size: u32,
}

/// Crop window as (x, y, width, height)
pub type CropWindow = (u32, u32, u32, u32);

impl ImageTransform {
    pub fn train(image_size: u32) -> Self {
        Self {
            mode: TransformMode::Train,
            image_size,
            resize_size: image_size,
        }
    }

    pub fn eval(image_size: u32, resize_size: u32) -> Self {
        Self {
            mode: TransformMode::Eval,
            image_size,
            resize_size,
        }
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Apply the geometric part of the pipeline.
    ///
    /// The evaluation pipeline never draws from `rng`.
    pub fn apply<R: Rng + ?Sized>(&self, img: DynamicImage, rng: &mut R) -> DynamicImage {
        match self.mode {
            TransformMode::Train => {
                let (x, y, w, h) = random_resized_crop_window(img.width(), img.height(), rng);
                let cropped = img
                    .crop_imm(x, y, w, h)
                    .resize_exact(self.image_size, self.image_size, FilterType::Triangle);
                if rng.gen_bool(FLIP_PROB) {
                    cropped.fliph()
                } else {
                    cropped
                }
            }
            TransformMode::Eval => {
                let resized = resize_shorter_side(&img, self.resize_size);
                center_crop(&resized, self.image_size)
            }
        }
    }

    /// Full pipeline: geometry then CHW conversion
    pub fn process<R: Rng + ?Sized>(&self, img: DynamicImage, rng: &mut R) -> Vec<f32> {
        let img = self.apply(img, rng);
        to_chw(&img)
    }
}

/// Sample a crop window covering a random area fraction and aspect ratio.
///
/// Falls back to the largest centered window whose ratio is inside
/// `CROP_RATIO` when no sample fits in the image.
pub fn random_resized_crop_window<R: Rng + ?Sized>(
    width: u32,
    height: u32,
    rng: &mut R,
) -> CropWindow {
    let area = (width * height) as f64;
    let log_ratio = (CROP_RATIO.0.ln(), CROP_RATIO.1.ln());

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * rng.gen_range(CROP_SCALE.0..=CROP_SCALE.1);
        let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }

    let in_ratio = width as f64 / height as f64;
    let (w, h) = if in_ratio < CROP_RATIO.0 {
        (width, ((width as f64 / CROP_RATIO.0).round() as u32).min(height))
    } else if in_ratio > CROP_RATIO.1 {
        (((height as f64 * CROP_RATIO.1).round() as u32).min(width), height)
    } else {
        (width, height)
    };
    ((width - w) / 2, (height - h) / 2, w, h)
}

/// Resize so the shorter side equals `size`, keeping the aspect ratio
pub fn resize_shorter_side(img: &DynamicImage, size: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let (new_w, new_h) = if w <= h {
        (size, ((size as u64 * h as u64) / w as u64) as u32)
    } else {
        (((size as u64 * w as u64) / h as u64) as u32, size)
    };
    if (new_w, new_h) == (w, h) {
        return img.clone();
    }
    img.resize_exact(new_w, new_h, FilterType::Triangle)
}

/// Take the centered `size` x `size` window.
///
/// Callers resize first so both sides are at least `size`.
pub fn center_crop(img: &DynamicImage, size: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let crop_w = size.min(w);
    let crop_h = size.min(h);
    let x = ((w - crop_w) as f64 / 2.0).round() as u32;
    let y = ((h - crop_h) as f64 / 2.0).round() as u32;
    let cropped = img.crop_imm(x, y, crop_w, crop_h);
    if (crop_w, crop_h) != (size, size) {
        cropped.resize_exact(size, size, FilterType::Triangle)
    } else {
        cropped
    }
}

/// Flatten to CHW `f32` values in `[0, 1]`
pub fn to_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        data[offset] = pixel[0] as f32 / 255.0;
        data[plane + offset] = pixel[1] as f32 / 255.0;
        data[2 * plane + offset] = pixel[2] as f32 / 255.0;
    }

    data
}
