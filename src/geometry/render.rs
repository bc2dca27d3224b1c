//! Overlay compositing for segmentation results.
//!
//! One raster per call: the grayscale original as background, a
//! semi-transparent colour fill per organ footprint, and a label at each
//! region centroid. Labels use the bundled DejaVu Sans unless another font
//! is configured.

use std::io::Cursor;
use std::path::Path;
use ab_glyph::{FontArc, PxScale};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, GrayImage, ImageFormat, ImageResult, Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use super::align::Mask;

/// Default fill opacity.
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.3;

const LABEL_SCALE: f32 = 14.0;
const LABEL_PADDING: i32 = 3;
const MARKER_RADIUS: i32 = 5;

static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// One organ to draw.
pub struct OverlayLayer<'a> {
    pub name: &'a str,
    pub mask: &'a Mask,
    /// Label anchor as (row, col), usually the region centroid
    pub anchor: Option<[f64; 2]>,
}

/// Renders segmentation overlays.
#[derive(Clone)]
pub struct Compositor {
    alpha: f32,
    activation_threshold: f32,
    font: Option<FontArc>,
}

impl Compositor {
    pub fn new(alpha: f32, activation_threshold: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            activation_threshold,
            font: bundled_font(),
        }
    }

    /// Draw labels with this font instead of the bundled one.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Composite all layers over `background`.
    ///
    /// Each layer's colour is decided by its position. Layers whose mask
    /// has no activated pixel are skipped but still consume their colour,
    /// so colouring depends only on the requested ordering.
    pub fn render(&self, background: &GrayImage, layers: &[OverlayLayer<'_>]) -> RgbImage {
        let mut canvas = DynamicImage::ImageLuma8(background.clone()).to_rgb8();
        let total = layers.len();

        for (index, layer) in layers.iter().enumerate() {
            let color = organ_color(index, total);
            if !self.blend(&mut canvas, layer.mask, color) {
                continue;
            }
            if let Some([row, col]) = layer.anchor {
                self.label(&mut canvas, layer.name, row, col, color);
            }
        }

        canvas
    }

    /// Render and encode as a base64 PNG.
    pub fn render_base64(
        &self,
        background: &GrayImage,
        layers: &[OverlayLayer<'_>],
    ) -> ImageResult<String> {
        let canvas = self.render(background, layers);
        encode_png_base64(&canvas)
    }

    /// Alpha-blend `color` over the activated pixels. Returns whether
    /// anything was drawn.
    fn blend(&self, canvas: &mut RgbImage, mask: &Mask, color: Rgb<u8>) -> bool {
        let mut drawn = false;
        for (x, y, value) in mask.enumerate_pixels() {
            if value.0[0] <= self.activation_threshold {
                continue;
            }
            let Some(pixel) = canvas.get_pixel_mut_checked(x, y) else {
                continue;
            };
            for c in 0..3 {
                let base = pixel.0[c] as f32;
                let over = color.0[c] as f32;
                pixel.0[c] = ((1.0 - self.alpha) * base + self.alpha * over).round() as u8;
            }
            drawn = true;
        }
        drawn
    }

    fn label(&self, canvas: &mut RgbImage, name: &str, row: f64, col: f64, color: Rgb<u8>) {
        let (cx, cy) = (col.round() as i32, row.round() as i32);

        match &self.font {
            Some(font) => {
                let scale = PxScale::from(LABEL_SCALE);
                let (w, h) = text_size(scale, font, name);
                let x = cx - w as i32 / 2;
                let y = cy - h as i32 / 2;

                let backdrop = Rect::at(x - LABEL_PADDING, y - LABEL_PADDING).of_size(
                    w + 2 * LABEL_PADDING as u32,
                    h + 2 * LABEL_PADDING as u32,
                );
                draw_filled_rect_mut(canvas, backdrop, Rgb([255, 255, 255]));
                draw_text_mut(canvas, color, x, y, scale, font, name);
            }
            None => {
                draw_hollow_circle_mut(canvas, (cx, cy), MARKER_RADIUS, Rgb([255, 255, 255]));
                draw_cross_mut(canvas, color, cx, cy);
            }
        }
    }
}

/// The label font shipped with the crate.
pub fn bundled_font() -> Option<FontArc> {
    FontArc::try_from_slice(BUNDLED_FONT).ok()
}

/// Load a TrueType/OpenType font for organ labels.
pub fn load_font(path: &Path) -> std::io::Result<FontArc> {
    let bytes = std::fs::read(path)?;
    FontArc::try_from_vec(bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Colour of the `index`-th of `total` organs: evenly spaced hues at full
/// saturation and value.
pub fn organ_color(index: usize, total: usize) -> Rgb<u8> {
    let hue = if total == 0 {
        0.0
    } else {
        360.0 * index as f32 / total as f32
    };
    hsv_to_rgb(hue, 1.0, 1.0)
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Rgb<u8> {
    let c = value * saturation;
    let h = (hue % 360.0) / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

/// PNG-encode an RGB image and return it as standard base64.
pub fn encode_png_base64(image: &RgbImage) -> ImageResult<String> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(STANDARD.encode(buf.into_inner()))
}
