//! Image preparation for the detection strategies.
//!
//! Every operation that changes the pixel grid returns a [`SourceMapping`]
//! so landmarks found on the prepared image can be mapped back to the
//! original image's coordinates.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::CropPadding;
use crate::types::{BoundingBox, ImageSize, LandmarkSet, Point};

/// How prepared-image coordinates relate to the source image:
/// `prepared = (source - offset) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    pub offset: Point,
    pub scale: f32,
}

impl Default for SourceMapping {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SourceMapping {
    pub const IDENTITY: SourceMapping = SourceMapping {
        offset: Point::zero(),
        scale: 1.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Mapping for an image that was first prepared by `self` and then by `next`.
    pub fn then(&self, next: &SourceMapping) -> SourceMapping {
        SourceMapping {
            offset: self.offset + next.offset * (1.0 / self.scale),
            scale: self.scale * next.scale,
        }
    }

    pub fn to_source_point(&self, p: Point) -> Point {
        Point::new(
            p.x / self.scale + self.offset.x,
            p.y / self.scale + self.offset.y,
        )
    }

    /// Map a landmark set found on the prepared image back to the source.
    /// Depth is scaled like x so it stays relative to face size.
    pub fn to_source(&self, set: &LandmarkSet) -> LandmarkSet {
        if self.is_identity() {
            return set.clone();
        }
        let (s, o) = (self.scale, self.offset);
        set.map_coordinates(|x, y, z| (x / s + o.x, y / s + o.y, z / s))
    }
}

/// An image prepared for detection plus its mapping back to the source.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub image: DynamicImage,
    pub mapping: SourceMapping,
}

impl PreparedImage {
    pub fn unchanged(image: DynamicImage) -> Self {
        Self {
            image,
            mapping: SourceMapping::IDENTITY,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.image.width(), self.image.height())
    }
}

/// Resize by `factor`. `None` when either side would collapse to zero.
pub fn rescale(image: &DynamicImage, factor: f32) -> Option<PreparedImage> {
    if !(factor.is_finite() && factor > 0.0) {
        return None;
    }
    let width = (image.width() as f32 * factor).round() as u32;
    let height = (image.height() as f32 * factor).round() as u32;
    if width == 0 || height == 0 {
        return None;
    }
    let resized = if width == image.width() && height == image.height() {
        image.clone()
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    };
    Some(PreparedImage {
        image: resized,
        mapping: SourceMapping {
            offset: Point::zero(),
            scale: width as f32 / image.width() as f32,
        },
    })
}

/// Downscale so the longest side is at most `max_dimension`.
pub fn cap_size(image: DynamicImage, max_dimension: u32) -> PreparedImage {
    let longest = image.width().max(image.height());
    if max_dimension == 0 || longest <= max_dimension {
        return PreparedImage::unchanged(image);
    }
    let factor = max_dimension as f32 / longest as f32;
    rescale(&image, factor).unwrap_or_else(|| PreparedImage::unchanged(image))
}

/// Pixel rectangle around `face` grown by `padding`, clipped to the image.
pub fn padded_crop_rect(
    face: &BoundingBox,
    padding: &CropPadding,
    image_size: ImageSize,
) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = (image_size.width as f32, image_size.height as f32);
    let x0 = (face.x - padding.horizontal * face.width).max(0.0).floor();
    let y0 = (face.y - padding.top * face.height).max(0.0).floor();
    let x1 = (face.right() + padding.horizontal * face.width).min(w).ceil();
    let y1 = (face.bottom() + padding.bottom * face.height).min(h).ceil();
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Crop the padded face region, upscaling it when its shorter side is below
/// `min_working_size`.
pub fn crop_face(
    image: &DynamicImage,
    face: &BoundingBox,
    padding: &CropPadding,
    min_working_size: u32,
) -> Option<PreparedImage> {
    let size = ImageSize::new(image.width(), image.height());
    let (x, y, width, height) = padded_crop_rect(face, padding, size)?;
    let crop = image.crop_imm(x, y, width, height);
    let cropped = SourceMapping {
        offset: Point::new(x as f32, y as f32),
        scale: 1.0,
    };

    let shorter = width.min(height);
    if shorter >= min_working_size {
        return Some(PreparedImage {
            image: crop,
            mapping: cropped,
        });
    }
    let upscaled = rescale(&crop, min_working_size as f32 / shorter as f32)?;
    Some(PreparedImage {
        image: upscaled.image,
        mapping: cropped.then(&upscaled.mapping),
    })
}

/// Fixed contrast/brightness boost for poorly lit images.
pub fn enhance(image: &DynamicImage, contrast: f32, brightness: i32) -> DynamicImage {
    image.adjust_contrast(contrast).brighten(brightness)
}
