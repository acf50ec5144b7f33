//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` for an image folder and the `Batcher` that
//! stacks items into normalized `[N, 3, H, W]` tensors.
//!
//! Images are decoded lazily in `get`, so each dataloader worker reads and
//! transforms its own items. Every call to `get` draws a fresh random
//! transform for the training split.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{DynamicImage, ImageReader};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::error;

use crate::dataset::loader::{ImageFolder, ImageSample};
use crate::dataset::transform::ImageTransform;
use crate::dataset::{IMAGENET_MEAN, IMAGENET_STD};
use crate::utils::error::{FinetuneError, Result};

/// A single decoded and transformed image
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Flattened CHW image data in `[0, 1]`
    pub image: Vec<f32>,
    /// Class label index
    pub label: usize,
}

/// Decode an image file into RGB
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .map_err(|e| FinetuneError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| FinetuneError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| FinetuneError::ImageLoad(path.to_path_buf(), e.to_string()))?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Lazily loaded image folder dataset
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    samples: Vec<ImageSample>,
    transform: ImageTransform,
}

impl ImageFolderDataset {
    pub fn new(folder: &ImageFolder, transform: ImageTransform) -> Self {
        Self {
            samples: folder.samples.clone(),
            transform,
        }
    }

    /// Load and transform one sample with the given RNG
    pub fn load_item(&self, index: usize, rng: &mut ChaCha8Rng) -> Result<ImageItem> {
        let sample = self.samples.get(index).ok_or_else(|| {
            FinetuneError::Dataset(format!(
                "index {} out of range for {} samples",
                index,
                self.samples.len()
            ))
        })?;
        let img = load_image(&sample.path)?;
        Ok(ImageItem {
            image: self.transform.process(img, rng),
            label: sample.label,
        })
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        if index >= self.samples.len() {
            return None;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(rand::random::<u64>());
        match self.load_item(index, &mut rng) {
            Ok(item) => Some(item),
            Err(e) => {
                error!("Dropping sample {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images ready for the model
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Normalized images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    /// Number of rows in this batch
    pub fn num_rows(&self) -> usize {
        self.targets.dims()[0]
    }
}

/// Stacks items and applies ImageNet normalization
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );

        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let images = (images - mean) / std;

        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use std::fs;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn write_png(path: &Path, width: u32, height: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_dataset_loads_and_transforms() {
        let temp = TempDir::new().unwrap();
        write_png(&temp.path().join("a/0.png"), 40, 30);
        write_png(&temp.path().join("b/0.png"), 30, 40);

        let folder = ImageFolder::scan(temp.path()).unwrap();
        let dataset = ImageFolderDataset::new(&folder, ImageTransform::eval(16, 18));

        assert_eq!(dataset.len(), 2);
        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 1);
        assert_eq!(item.image.len(), 3 * 16 * 16);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn test_corrupt_image_yields_none() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/broken.jpg");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not an image").unwrap();

        let folder = ImageFolder::scan(temp.path()).unwrap();
        let dataset = ImageFolderDataset::new(&folder, ImageTransform::train(16));

        assert!(dataset.get(0).is_none());
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            dataset.load_item(0, &mut rng),
            Err(FinetuneError::ImageLoad(_, _))
        ));
    }

    #[test]
    fn test_batcher_normalizes() {
        let device = Default::default();
        let batcher = ImageBatcher::new(2);
        let items = vec![
            ImageItem { image: vec![0.485; 12], label: 3 },
            ImageItem { image: vec![1.0; 12], label: 0 },
        ];

        let batch: ImageBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.num_rows(), 2);
        let values: Vec<f32> = batch.images.into_data().to_vec().unwrap();
        // Red channel of the first image sits exactly at the mean
        assert!(values[0].abs() < 1e-5);
        // Red channel of the second image: (1 - 0.485) / 0.229
        assert!((values[12] - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        let targets: Vec<i64> = batch.targets.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![3, 0]);
    }
}
