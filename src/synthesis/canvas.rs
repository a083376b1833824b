use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Fixed-size RGBA drawing surface that every frame is fitted onto.
pub struct Canvas {
    width: u32,
    height: u32,
    current: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            current: RgbaImage::from_pixel(width, height, BACKGROUND),
        }
    }

    pub fn set(&mut self, rendered: RgbaImage) {
        if rendered.dimensions() == (self.width, self.height) {
            self.current = rendered;
        }
    }

    pub fn pixels(&self) -> &[u8] {
        self.current.as_raw()
    }
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("failed to decode frame image")
}

/// Scales `image` to fit inside `width`x`height` keeping its aspect ratio and
/// centres it on a black background.
pub fn letterbox(image: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);
    let (src_w, src_h) = (image.width(), image.height());
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return canvas;
    }

    let scale = f64::min(width as f64 / src_w as f64, height as f64 / src_h as f64);
    let fit_w = ((src_w as f64 * scale).round() as u32).clamp(1, width);
    let fit_h = ((src_h as f64 * scale).round() as u32).clamp(1, height);

    let scaled = if (fit_w, fit_h) == (src_w, src_h) {
        image.to_rgba8()
    } else {
        imageops::resize(&image.to_rgba8(), fit_w, fit_h, FilterType::Triangle)
    };

    let x = (width - fit_w) / 2;
    let y = (height - fit_h) / 2;
    imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
    canvas
}
