//! Avatar cluster layout: pure arithmetic over member count and bounds.

use crate::{config::MediaSettings, transform::ShapeTransform};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub width: f32,
    pub height: f32,
    pub padding_left: f32,
    pub padding_top: f32,
    pub padding_right: f32,
    pub padding_bottom: f32,
}

impl Bounds {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_padding(mut self, left: f32, top: f32, right: f32, bottom: f32) -> Self {
        self.padding_left = left;
        self.padding_top = top;
        self.padding_right = right;
        self.padding_bottom = bottom;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryParams {
    pub density: f32,
    pub border_size_dp: f32,
    pub single_text_size_dp: f32,
    pub multi_fraction: f32,
}

impl From<&MediaSettings> for GeometryParams {
    fn from(settings: &MediaSettings) -> Self {
        Self {
            density: settings.display_density,
            border_size_dp: settings.border_size_dp,
            single_text_size_dp: settings.single_text_size_dp,
            multi_fraction: settings.multi_fraction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterGeometry {
    pub count: usize,
    pub outer_radius: f32,
    pub inner_radius: f32,
    pub center_x: f32,
    pub center_y: f32,
    pub delta_x: f32,
    pub delta_y: f32,
    pub text_size: f32,
}

impl ClusterGeometry {
    /// `None` when there is nothing to draw: no members or no drawable area.
    pub fn compute(count: usize, bounds: &Bounds, params: &GeometryParams) -> Option<Self> {
        if count == 0 {
            return None;
        }
        let drawable_width = bounds.width - (bounds.padding_left + bounds.padding_right);
        let drawable_height = bounds.height - (bounds.padding_top + bounds.padding_bottom);
        let dimension = drawable_width.min(drawable_height);
        if dimension <= 0.0 {
            return None;
        }

        let fraction = if count > 1 { params.multi_fraction } else { 1.0 };
        let outer_radius = fraction * (dimension / 2.0);
        let inner_radius = (outer_radius - params.density * params.border_size_dp).max(0.0);
        let outer_size = fraction * dimension;
        let (delta_x, delta_y) = if count > 1 {
            let steps = (count - 1) as f32;
            (
                (drawable_width - outer_size) / steps,
                (drawable_height - outer_size) / steps,
            )
        } else {
            (0.0, 0.0)
        };

        Some(Self {
            count,
            outer_radius,
            inner_radius,
            center_x: bounds.padding_left + outer_radius,
            center_y: bounds.padding_top + outer_radius,
            delta_x,
            delta_y,
            text_size: fraction * params.density * params.single_text_size_dp,
        })
    }

    /// Square pixel size requested from the backend for each avatar.
    pub fn pixel_size(&self) -> u32 {
        (self.inner_radius * 2.0).round().max(1.0) as u32
    }

    pub fn center_of(&self, index: usize) -> (f32, f32) {
        let step = index as f32;
        (
            self.center_x + step * self.delta_x,
            self.center_y + step * self.delta_y,
        )
    }

    pub fn transform(&self) -> ShapeTransform {
        if self.count > 1 {
            ShapeTransform::MULTI_AVATAR
        } else {
            ShapeTransform::SINGLE_AVATAR
        }
    }
}
