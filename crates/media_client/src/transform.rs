//! Shape post-processing applied to decoded images before delivery.
//!
//! Each transform paints its mask into a fresh transparent buffer, then
//! composites the source with a source-in blend so only the masked region
//! survives. The source buffer is consumed and dropped as soon as the result
//! exists.

use image::{imageops, Rgba, RgbaImage};

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeTransform {
    /// Center-cropped circle. The label only separates cache keys.
    Circle { label: &'static str },
    Rounded { radius: f32 },
}

impl ShapeTransform {
    pub const SINGLE_AVATAR: Self = Self::Circle { label: "single" };
    pub const MULTI_AVATAR: Self = Self::Circle { label: "multi" };

    pub fn rounded(radius: f32) -> Self {
        Self::Rounded {
            radius: radius.max(0.0),
        }
    }

    /// Identity of this transform inside a backend's request cache.
    pub fn key(&self) -> String {
        match self {
            Self::Circle { label } => format!("circle.{label}"),
            Self::Rounded { radius } => format!("rounded.{radius}"),
        }
    }

    pub fn apply(&self, source: RgbaImage) -> RgbaImage {
        match self {
            Self::Circle { .. } => circle(source),
            Self::Rounded { radius } => rounded(source, *radius),
        }
    }
}

fn circle(source: RgbaImage) -> RgbaImage {
    let side = source.width().min(source.height());
    if side == 0 {
        return source;
    }
    let x = (source.width() - side) / 2;
    let y = (source.height() - side) / 2;
    let square = imageops::crop_imm(&source, x, y, side, side).to_image();
    drop(source);

    let radius = side as f32 / 2.0;
    let mask = paint_mask(side, side, |px, py| {
        let dx = px - radius;
        let dy = py - radius;
        (dx * dx + dy * dy).sqrt() - radius
    });
    source_in(mask, square)
}

fn rounded(source: RgbaImage, radius: f32) -> RgbaImage {
    let (width, height) = source.dimensions();
    if radius == 0.0 || width == 0 || height == 0 {
        return source;
    }

    let half_w = width as f32 / 2.0;
    let half_h = height as f32 / 2.0;
    let radius = radius.min(half_w).min(half_h);
    let mask = paint_mask(width, height, |px, py| {
        let qx = (px - half_w).abs() - (half_w - radius);
        let qy = (py - half_h).abs() - (half_h - radius);
        let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
        outside + qx.max(qy).min(0.0) - radius
    });
    source_in(mask, source)
}

/// First pass: transparent buffer whose alpha is the anti-aliased coverage of
/// the shape described by `distance` (negative inside, positive outside).
fn paint_mask(width: u32, height: u32, distance: impl Fn(f32, f32) -> f32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let d = distance(x as f32 + 0.5, y as f32 + 0.5);
        let coverage = (0.5 - d).clamp(0.0, 1.0);
        Rgba([0, 0, 0, (coverage * 255.0).round() as u8])
    })
}

/// Second pass: keep the source color, scaled by the mask's alpha.
fn source_in(mut mask: RgbaImage, source: RgbaImage) -> RgbaImage {
    for (dst, src) in mask.pixels_mut().zip(source.pixels()) {
        let Rgba([r, g, b, a]) = *src;
        let alpha = (u16::from(a) * u16::from(dst.0[3]) + 127) / 255;
        *dst = Rgba([r, g, b, alpha as u8]);
    }
    mask
}

#[cfg(test)]
#[path = "tests/transform_tests.rs"]
mod tests;
