//! Image preprocessing: resize shorter side, center crop, CHW float, per-channel normalize.

use crate::types::{DatasetError, DatasetResult};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Target length of the shorter image side after resizing (aspect ratio preserved).
    pub resize: u32,
    /// Side of the square center crop taken after resizing.
    pub crop: u32,
    /// Per-channel mean subtracted from the `[0, 1]` pixel values.
    pub mean: [f32; 3],
    /// Per-channel divisor applied after mean subtraction.
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            resize: 227,
            crop: 227,
            mean: [1.0, 1.0, 1.0],
            std: [1.0 / 127.0, 1.0 / 127.0, 1.0 / 127.0],
        }
    }
}

impl PreprocessConfig {
    /// Square config with the default normalization.
    pub fn square(side: u32) -> Self {
        Self {
            resize: side,
            crop: side,
            ..Default::default()
        }
    }

    pub fn side(&self) -> usize {
        self.crop as usize
    }

    /// Number of f32 values per preprocessed image.
    pub fn image_len(&self) -> usize {
        3 * self.side() * self.side()
    }

    pub fn describe(&self) -> String {
        format!(
            "resize={} crop={} mean=[{:.4},{:.4},{:.4}] std=[{:.5},{:.5},{:.5}]",
            self.resize,
            self.crop,
            self.mean[0],
            self.mean[1],
            self.mean[2],
            self.std[0],
            self.std[1],
            self.std[2]
        )
    }

    /// Load an image from disk, convert to RGB and run the full pipeline.
    pub fn load(&self, path: &Path) -> DatasetResult<Vec<f32>> {
        if !path.exists() {
            return Err(DatasetError::MissingImage {
                path: path.to_path_buf(),
            });
        }
        let img = image::open(path)
            .map_err(|source| DatasetError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        self.apply(&img).map_err(|msg| DatasetError::Shape {
            path: path.to_path_buf(),
            msg,
        })
    }

    /// Run the pipeline on an already-decoded RGB image.
    pub fn apply(&self, img: &RgbImage) -> Result<Vec<f32>, String> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err("image has zero width or height".to_string());
        }
        if self.std.iter().any(|s| *s == 0.0) {
            return Err("normalization std contains zero".to_string());
        }
        let (rw, rh) = resized_dims(w, h, self.resize);
        if rw < self.crop || rh < self.crop {
            return Err(format!(
                "resized image {rw}x{rh} is smaller than crop {}",
                self.crop
            ));
        }
        let resized = if (rw, rh) == (w, h) {
            img.clone()
        } else {
            image::imageops::resize(img, rw, rh, FilterType::Triangle)
        };
        let left = center_offset(rw, self.crop);
        let top = center_offset(rh, self.crop);
        let cropped =
            image::imageops::crop_imm(&resized, left, top, self.crop, self.crop).to_image();
        Ok(self.to_chw(&cropped))
    }

    fn to_chw(&self, img: &RgbImage) -> Vec<f32> {
        let side = self.side();
        let mut out = Vec::with_capacity(self.image_len());
        for c in 0..3 {
            let mean = self.mean[c];
            let std = self.std[c];
            for y in 0..side as u32 {
                for x in 0..side as u32 {
                    let v = img.get_pixel(x, y)[c] as f32 / 255.0;
                    out.push((v - mean) / std);
                }
            }
        }
        out
    }
}

/// Shorter side becomes `size`; the longer side is scaled and truncated.
pub fn resized_dims(w: u32, h: u32, size: u32) -> (u32, u32) {
    if w <= h {
        let nh = (size as u64 * h as u64 / w as u64) as u32;
        (size, nh.max(size))
    } else {
        let nw = (size as u64 * w as u64 / h as u64) as u32;
        (nw.max(size), size)
    }
}

fn center_offset(len: u32, crop: u32) -> u32 {
    ((len - crop) as f32 / 2.0).round() as u32
}
