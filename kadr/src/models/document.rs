use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, ImageFormat};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

use crate::error::{KadrError, Result};

/// Clockwise rotation to apply to an image before reading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    UpsideDown,
    Clockwise270,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::UpsideDown => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    pub fn from_degrees(degrees: i32) -> Rotation {
        match degrees.rem_euclid(360) {
            45..=134 => Rotation::Clockwise90,
            135..=224 => Rotation::UpsideDown,
            225..=314 => Rotation::Clockwise270,
            _ => Rotation::None,
        }
    }

    /// Rotation composed of `self` followed by `other`.
    pub fn then(&self, other: Rotation) -> Rotation {
        Rotation::from_degrees(i32::from(self.degrees()) + i32::from(other.degrees()))
    }

    pub fn apply(&self, bitmap: &GrayImage) -> GrayImage {
        match self {
            Rotation::None => bitmap.clone(),
            Rotation::Clockwise90 => image::imageops::rotate90(bitmap),
            Rotation::UpsideDown => image::imageops::rotate180(bitmap),
            Rotation::Clockwise270 => image::imageops::rotate270(bitmap),
        }
    }
}

/// Facts about the source image gathered while normalizing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    /// Dimensions of the decoded source, before resizing.
    pub source_width: u32,
    pub source_height: u32,
    /// Dimensions of the canonical bitmap.
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
    /// Rotation applied to reach the canonical orientation.
    pub rotation: Rotation,
    /// Skew corrected by deskewing, in degrees.
    pub skew_degrees: f32,
}

/// Grayscale, upright, contrast-stretched bitmap every later stage works on.
///
/// Cloning is cheap; the pixel buffer is shared.
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    bitmap: Arc<GrayImage>,
    pub metadata: ImageMetadata,
}

impl CanonicalImage {
    pub fn new(bitmap: GrayImage, metadata: ImageMetadata) -> Self {
        Self {
            bitmap: Arc::new(bitmap),
            metadata,
        }
    }

    pub fn bitmap(&self) -> &GrayImage {
        &self.bitmap
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    /// Copy of this image turned by `rotation`, with metadata updated.
    pub fn rotated(&self, rotation: Rotation) -> CanonicalImage {
        if rotation == Rotation::None {
            return self.clone();
        }
        let bitmap = rotation.apply(&self.bitmap);
        let mut metadata = self.metadata.clone();
        metadata.width = bitmap.width();
        metadata.height = bitmap.height();
        metadata.rotation = metadata.rotation.then(rotation);
        CanonicalImage::new(bitmap, metadata)
    }

    /// PNG encoding handed to external engines.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        DynamicImage::ImageLuma8(self.bitmap.as_ref().clone())
            .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .map_err(|e| KadrError::Internal(format!("Failed to encode image: {e}")))?;
        Ok(output)
    }
}

/// One image submitted for recognition.
///
/// The payload is owned by the pipeline while it is processed and dropped afterwards.
#[derive(Debug)]
pub struct ImageDocument {
    pub id: String,
    pub payload: Vec<u8>,
}

impl ImageDocument {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: nanoid!(),
            payload,
        }
    }

    pub fn with_id(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}
