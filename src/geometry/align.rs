//! Inverse of the segmentation model's input transform.
//!
//! The model sees the largest centred square of the radiograph, resized to
//! its native resolution. Masks come back in that square space and are
//! mapped back like this:
//!
//! ```text
//!   model space (R x R)        crop (C x C)              original (W x H)
//!   ┌──────┐   nearest     ┌────────────┐   paste at  ┌──────────────────┐
//!   │ mask │ ────────────▶ │  resized   │ ──────────▶ │ 0 │  resized │ 0 │
//!   └──────┘   neighbour   └────────────┘ (top,left)  └──────────────────┘
//!
//!   C = min(W, H), top = (H - C) / 2, left = (W - C) / 2
//! ```
//!
//! Pixels outside the crop were never seen by the model and stay zero.

use image::{imageops, ImageBuffer, Luma};

/// Probability / activation map for one organ.
pub type Mask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// The centred square a model input was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    /// Side length of the square
    pub size: u32,
    /// Row offset of the square in the original image
    pub top: u32,
    /// Column offset of the square in the original image
    pub left: u32,
}

impl CropWindow {
    /// Largest centred square of a `width` x `height` image.
    pub fn center_square(width: u32, height: u32) -> Self {
        let size = width.min(height);
        Self {
            size,
            top: (height - size) / 2,
            left: (width - size) / 2,
        }
    }

    /// Whether `(row, col)` falls inside the square.
    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.top..self.top + self.size).contains(&row)
            && (self.left..self.left + self.size).contains(&col)
    }
}

/// Resize with plain nearest-neighbour sampling.
///
/// No filtering of any kind: every output value is a copy of exactly one
/// input value, so activations never bleed across organ boundaries.
pub fn resize_nearest(mask: &Mask, width: u32, height: u32) -> Mask {
    let (src_w, src_h) = mask.dimensions();
    if (src_w, src_h) == (width, height) {
        return mask.clone();
    }
    if src_w == 0 || src_h == 0 {
        return Mask::new(width, height);
    }

    let col_map: Vec<u32> = (0..width).map(|x| nearest_index(x, width, src_w)).collect();
    let row_map: Vec<u32> = (0..height).map(|y| nearest_index(y, height, src_h)).collect();

    Mask::from_fn(width, height, |x, y| {
        *mask.get_pixel(col_map[x as usize], row_map[y as usize])
    })
}

/// Source index whose pixel centre is closest to destination pixel `dst`.
fn nearest_index(dst: u32, dst_len: u32, src_len: u32) -> u32 {
    let scale = src_len as f64 / dst_len as f64;
    let src = ((dst as f64 + 0.5) * scale).floor() as u32;
    src.min(src_len - 1)
}

/// Map a model-space mask back onto a `width` x `height` canvas.
///
/// The returned mask always has exactly the original dimensions.
pub fn align_to_original(mask: &Mask, width: u32, height: u32) -> Mask {
    let crop = CropWindow::center_square(width, height);
    align_with_crop(mask, crop, width, height)
}

/// Same as [`align_to_original`] with a precomputed crop window, so every
/// organ of one image shares identical offsets.
pub fn align_with_crop(mask: &Mask, crop: CropWindow, width: u32, height: u32) -> Mask {
    let resized = resize_nearest(mask, crop.size, crop.size);
    let mut canvas = Mask::new(width, height);
    imageops::replace(&mut canvas, &resized, crop.left as i64, crop.top as i64);
    canvas
}
