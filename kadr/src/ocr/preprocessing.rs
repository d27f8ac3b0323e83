use std::io::Cursor;

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, GrayImage, ImageDecoder, ImageReader, Luma};
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{KadrError, Result};
use crate::models::{CanonicalImage, ImageMetadata, Rotation, ScriptHypothesis};

/// Longest side of the binarised copy the skew search runs on.
const DESKEW_DIMENSION: u32 = 800;
const DESKEW_RANGE_DEGREES: f32 = 5.0;
const DESKEW_STEP_DEGREES: f32 = 0.5;
/// Estimated skews below this are left alone.
const DESKEW_MIN_DEGREES: f32 = 0.5;
const DESKEW_MIN_POINTS: usize = 20;

/// Turns raw upload bytes into the [`CanonicalImage`] every later stage reads.
///
/// Steps, in order:
/// 1. Rejects empty or oversized payloads and unknown formats
/// 2. Validates dimensions from the header before decoding pixels
/// 3. Applies the EXIF orientation reported by the decoder
/// 4. Downscales to the target dimension (aspect ratio kept)
/// 5. Flattens alpha onto white and converts to grayscale
/// 6. Stretches contrast
/// 7. Deskews small rotations (optional)
///
/// Pure transform; it never touches the engine or the index.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    max_dimension: u32,
    target_dimension: u32,
    min_dimension: u32,
    max_bytes: usize,
    deskew: bool,
}

impl ImageNormalizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            max_dimension: config.max_image_dimension.max(1),
            target_dimension: config
                .target_image_dimension
                .clamp(1, config.max_image_dimension.max(1)),
            min_dimension: config.min_image_dimension,
            max_bytes: config.max_image_bytes,
            deskew: config.deskew,
        }
    }

    pub fn normalize(&self, bytes: &[u8]) -> Result<CanonicalImage> {
        if bytes.is_empty() {
            return Err(KadrError::Decode("Empty image payload".to_string()));
        }
        if bytes.len() > self.max_bytes {
            return Err(KadrError::CorruptImage(format!(
                "Image payload is {} bytes, maximum {}",
                bytes.len(),
                self.max_bytes
            )));
        }

        let reader = open(bytes)?;
        let format = reader
            .format()
            .ok_or_else(|| KadrError::Decode("Unsupported image format".to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| KadrError::Decode(format!("Failed to read image header: {e}")))?;
        self.check_dimensions(width, height)?;

        let img = decode_oriented(bytes)?;
        let (source_width, source_height) = img.dimensions();
        self.check_dimensions(source_width, source_height)?;

        let img = resize_if_needed(img, self.target_dimension);
        let gray = enhance_contrast(flatten_to_gray(img));

        let (bitmap, skew_degrees) = if self.deskew {
            deskew(gray)
        } else {
            (gray, 0.0)
        };

        debug!(
            format = ?format,
            source_width,
            source_height,
            width = bitmap.width(),
            height = bitmap.height(),
            skew_degrees,
            "Normalized image"
        );

        let metadata = ImageMetadata {
            source_width,
            source_height,
            width: bitmap.width(),
            height: bitmap.height(),
            format: format.extensions_str().first().map(|ext| ext.to_string()),
            rotation: Rotation::None,
            skew_degrees,
        };
        Ok(CanonicalImage::new(bitmap, metadata))
    }

    /// Rotate to the detected orientation, but only when the detector is sure enough.
    ///
    /// Below `threshold` the image passes through untouched and the attempt queue covers
    /// the upside-down case instead.
    pub fn correct_orientation(
        &self,
        image: CanonicalImage,
        hypothesis: &ScriptHypothesis,
        threshold: f32,
    ) -> CanonicalImage {
        if hypothesis.rotation == Rotation::None || hypothesis.rotation_confidence < threshold {
            return image;
        }
        debug!(
            rotation = hypothesis.rotation.degrees(),
            confidence = hypothesis.rotation_confidence,
            "Applying detected rotation"
        );
        image.rotated(hypothesis.rotation)
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(KadrError::CorruptImage(format!(
                "Image has a zero-sized side: {width}x{height}"
            )));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(KadrError::CorruptImage(format!(
                "Image too large: {}x{}, maximum {}x{}",
                width, height, self.max_dimension, self.max_dimension
            )));
        }
        if width < self.min_dimension || height < self.min_dimension {
            return Err(KadrError::CorruptImage(format!(
                "Image too small: {}x{}, minimum {}x{}",
                width, height, self.min_dimension, self.min_dimension
            )));
        }
        Ok(())
    }
}

fn open(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| KadrError::Decode(format!("Failed to read image: {e}")))
}

/// Decode pixels and apply the EXIF orientation the decoder reports.
fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
    let mut decoder = open(bytes)?
        .into_decoder()
        .map_err(|e| KadrError::Decode(format!("Failed to decode image: {e}")))?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)
        .map_err(|e| KadrError::Decode(format!("Failed to decode image: {e}")))?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Downscale so neither side exceeds `max_dim`, keeping the aspect ratio.
fn resize_if_needed(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_dim && height <= max_dim {
        return img;
    }

    let ratio = max_dim as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * ratio) as u32).max(1);
    let new_height = ((height as f32 * ratio) as u32).max(1);

    img.resize(new_width, new_height, FilterType::Lanczos3)
}

/// Grayscale with transparent regions composited onto white.
fn flatten_to_gray(img: DynamicImage) -> GrayImage {
    if !img.color().has_alpha() {
        return img.to_luma8();
    }
    let luma_alpha = img.to_luma_alpha8();
    GrayImage::from_fn(luma_alpha.width(), luma_alpha.height(), |x, y| {
        let pixel = luma_alpha.get_pixel(x, y);
        let alpha = pixel[1] as u32;
        let value = (pixel[0] as u32 * alpha + 255 * (255 - alpha)) / 255;
        Luma([value as u8])
    })
}

/// Histogram stretch: darkest pixel to 0, lightest to 255.
fn enhance_contrast(gray: GrayImage) -> GrayImage {
    let (min_val, max_val) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

    if max_val <= min_val {
        return gray;
    }

    let range = (max_val - min_val) as f32;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0];
        Luma([((value - min_val) as f32 / range * 255.0).round() as u8])
    })
}

fn deskew(gray: GrayImage) -> (GrayImage, f32) {
    let skew = estimate_skew(&gray);
    if skew.abs() < DESKEW_MIN_DEGREES {
        return (gray, 0.0);
    }
    debug!(skew_degrees = skew, "Deskewing image");
    (rotate_about_center(&gray, skew), skew)
}

/// Skew of the text lines in degrees, positive when lines fall to the right.
///
/// Projection-profile search: the angle whose row histogram of foreground pixels is
/// the most peaked wins. Returns 0 when there is too little foreground to judge.
pub fn estimate_skew(gray: &GrayImage) -> f32 {
    let (width, height) = gray.dimensions();
    let sample = if width.max(height) > DESKEW_DIMENSION {
        let ratio = DESKEW_DIMENSION as f32 / width.max(height) as f32;
        image::imageops::resize(
            gray,
            ((width as f32 * ratio) as u32).max(1),
            ((height as f32 * ratio) as u32).max(1),
            FilterType::Triangle,
        )
    } else {
        gray.clone()
    };

    let (width, height) = sample.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    let dark: Vec<(f32, f32)> = sample
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] < 128)
        .map(|(x, y, _)| (x as f32 - cx, y as f32 - cy))
        .collect();
    let total = (width as usize) * (height as usize);
    // Light text on a dark page
    let points = if dark.len() * 2 > total {
        sample
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] >= 128)
            .map(|(x, y, _)| (x as f32 - cx, y as f32 - cy))
            .collect()
    } else {
        dark
    };

    if points.len() < DESKEW_MIN_POINTS {
        return 0.0;
    }

    let diagonal = ((width * width + height * height) as f32).sqrt().ceil() as usize;
    let offset = diagonal as f32 / 2.0;
    let mut bins = vec![0u32; diagonal + 2];

    let mut best_angle = 0.0f32;
    let mut best_score = 0u64;
    for angle in candidate_angles() {
        let (sin, cos) = angle.to_radians().sin_cos();
        bins.iter_mut().for_each(|b| *b = 0);
        for (x, y) in &points {
            let row = (y * cos - x * sin + offset).round();
            if row >= 0.0 && (row as usize) < bins.len() {
                bins[row as usize] += 1;
            }
        }
        let score: u64 = bins.iter().map(|&c| u64::from(c) * u64::from(c)).sum();
        // Angles arrive smallest magnitude first, so ties keep the gentler correction.
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }

    best_angle
}

/// 0, then ±step, ±2·step, ... up to the search range.
fn candidate_angles() -> Vec<f32> {
    let steps = (DESKEW_RANGE_DEGREES / DESKEW_STEP_DEGREES).round() as i32;
    let mut angles = vec![0.0];
    for i in 1..=steps {
        let angle = i as f32 * DESKEW_STEP_DEGREES;
        angles.push(angle);
        angles.push(-angle);
    }
    angles
}

/// Rotate by `-degrees` about the centre so lines skewed by `degrees` become level.
/// Uncovered corners are filled with white.
fn rotate_about_center(gray: &GrayImage, degrees: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let (sin, cos) = degrees.to_radians().sin_cos();

    GrayImage::from_fn(width, height, |x, y| {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let sx = (dx * cos - dy * sin + cx).floor();
        let sy = (dx * sin + dy * cos + cy).floor();
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < width && (sy as u32) < height {
            *gray.get_pixel(sx as u32, sy as u32)
        } else {
            Luma([255])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Script, ScriptScore};
    use image::ImageFormat;

    fn create_test_config() -> OcrConfig {
        OcrConfig {
            max_image_dimension: 4096,
            target_image_dimension: 2048,
            min_image_dimension: 50,
            deskew: false,
            ..OcrConfig::default()
        }
    }

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut output = Vec::new();
        img.write_to(&mut Cursor::new(&mut output), format).unwrap();
        output
    }

    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        encode(DynamicImage::new_rgb8(width, height), ImageFormat::Png)
    }

    /// White page with dark lines falling by `degrees` to the right.
    fn skewed_lines(width: u32, height: u32, degrees: f32) -> GrayImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([255]));
        let slope = degrees.to_radians().tan();
        for line in 0..5 {
            let y0 = 40.0 + line as f32 * 30.0;
            for x in 20..width - 20 {
                let y = (y0 + (x as f32 - width as f32 / 2.0) * slope).round() as i64;
                for dy in 0..3 {
                    let yy = y + dy;
                    if yy >= 0 && (yy as u32) < height {
                        img.put_pixel(x, yy as u32, Luma([0]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn test_normalize_valid_image() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        let result = normalizer.normalize(&create_test_png(100, 80));
        assert!(result.is_ok(), "Normalizing should succeed: {:?}", result.err());

        let image = result.unwrap();
        assert_eq!((image.width(), image.height()), (100, 80));
        assert_eq!(image.metadata.source_width, 100);
        assert_eq!(image.metadata.format.as_deref(), Some("png"));
        assert_eq!(image.metadata.rotation, Rotation::None);
    }

    #[test]
    fn test_reject_tiny_image() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        let err = normalizer.normalize(&create_test_png(10, 10)).unwrap_err();

        assert!(matches!(err, KadrError::CorruptImage(_)));
        let msg = err.to_string();
        assert!(msg.contains("too small"), "Error should say too small: {msg}");
        assert!(msg.contains("10x10"), "Error should mention dimensions: {msg}");
    }

    #[test]
    fn test_reject_one_side_too_small() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        assert!(normalizer.normalize(&create_test_png(40, 200)).is_err());
        assert!(normalizer.normalize(&create_test_png(200, 40)).is_err());
    }

    #[test]
    fn test_reject_above_hard_maximum() {
        let config = OcrConfig {
            max_image_dimension: 300,
            target_image_dimension: 200,
            ..create_test_config()
        };
        let normalizer = ImageNormalizer::new(&config);
        let err = normalizer.normalize(&create_test_png(400, 100)).unwrap_err();
        assert!(matches!(err, KadrError::CorruptImage(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_resize_to_target_keeps_aspect() {
        let config = OcrConfig {
            target_image_dimension: 500,
            ..create_test_config()
        };
        let normalizer = ImageNormalizer::new(&config);

        let wide = normalizer.normalize(&create_test_png(1000, 200)).unwrap();
        assert_eq!((wide.width(), wide.height()), (500, 100));
        assert_eq!(wide.metadata.source_width, 1000);

        let tall = normalizer.normalize(&create_test_png(200, 1000)).unwrap();
        assert_eq!((tall.width(), tall.height()), (100, 500));
    }

    #[test]
    fn test_reject_invalid_bytes() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        let err = normalizer.normalize(b"this is not an image").unwrap_err();
        assert!(matches!(err, KadrError::Decode(_)));
        assert!(err.is_unreadable_image());
    }

    #[test]
    fn test_reject_empty_payload() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        assert!(matches!(
            normalizer.normalize(&[]),
            Err(KadrError::Decode(_))
        ));
    }

    #[test]
    fn test_reject_truncated_png() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        let png = create_test_png(100, 100);
        let err = normalizer.normalize(&png[..png.len() / 2]).unwrap_err();
        assert!(err.is_unreadable_image(), "Truncated PNG: {err}");
    }

    #[test]
    fn test_reject_payload_over_byte_limit() {
        let config = OcrConfig {
            max_image_bytes: 64,
            ..create_test_config()
        };
        let normalizer = ImageNormalizer::new(&config);
        let err = normalizer.normalize(&create_test_png(100, 100)).unwrap_err();
        assert!(matches!(err, KadrError::CorruptImage(_)));
    }

    #[test]
    fn test_jpeg_is_accepted() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        let jpeg = encode(DynamicImage::new_rgb8(120, 90), ImageFormat::Jpeg);
        let image = normalizer.normalize(&jpeg).unwrap();
        assert_eq!(image.metadata.format.as_deref(), Some("jpg"));
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        let mut rgba = image::RgbaImage::new(60, 60);
        rgba.put_pixel(0, 0, image::Rgba([0, 0, 0, 255]));
        let png = encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png);

        let image = normalizer.normalize(&png).unwrap();
        assert_eq!(image.bitmap().get_pixel(0, 0)[0], 0);
        assert_eq!(image.bitmap().get_pixel(30, 30)[0], 255);
    }

    #[test]
    fn test_contrast_stretch() {
        let gray = GrayImage::from_fn(4, 1, |x, _| Luma([100 + x as u8 * 10]));
        let stretched = enhance_contrast(gray);
        assert_eq!(stretched.get_pixel(0, 0)[0], 0);
        assert_eq!(stretched.get_pixel(3, 0)[0], 255);
    }

    #[test]
    fn test_contrast_flat_image_unchanged() {
        let gray = GrayImage::from_pixel(3, 3, Luma([77]));
        assert_eq!(enhance_contrast(gray.clone()), gray);
    }

    #[test]
    fn test_estimate_skew_finds_angle() {
        let skew = estimate_skew(&skewed_lines(400, 220, 3.0));
        assert!((skew - 3.0).abs() <= 0.5, "estimated {skew}");

        let skew = estimate_skew(&skewed_lines(400, 220, -2.0));
        assert!((skew + 2.0).abs() <= 0.5, "estimated {skew}");
    }

    #[test]
    fn test_estimate_skew_level_text() {
        assert_eq!(estimate_skew(&skewed_lines(400, 220, 0.0)), 0.0);
    }

    #[test]
    fn test_estimate_skew_blank_page() {
        assert_eq!(estimate_skew(&GrayImage::from_pixel(100, 100, Luma([255]))), 0.0);
    }

    #[test]
    fn test_normalize_deskews_and_records_estimate() {
        let config = OcrConfig {
            deskew: true,
            ..create_test_config()
        };
        let normalizer = ImageNormalizer::new(&config);
        let png = encode(
            DynamicImage::ImageLuma8(skewed_lines(400, 220, 3.0)),
            ImageFormat::Png,
        );

        let image = normalizer.normalize(&png).unwrap();
        assert!((image.metadata.skew_degrees - 3.0).abs() <= 0.5);
        // Once corrected the lines read level
        assert!(estimate_skew(image.bitmap()).abs() < DESKEW_MIN_DEGREES);
    }

    #[test]
    fn test_correct_orientation_respects_threshold() {
        let normalizer = ImageNormalizer::new(&create_test_config());
        let image = normalizer.normalize(&create_test_png(100, 60)).unwrap();
        let scores = vec![ScriptScore {
            script: Script::Cyrillic,
            confidence: 1.0,
        }];

        let unsure = ScriptHypothesis::new(scores.clone(), Rotation::Clockwise90, 0.5);
        let kept = normalizer.correct_orientation(image.clone(), &unsure, 0.8);
        assert_eq!(kept.metadata.rotation, Rotation::None);
        assert_eq!((kept.width(), kept.height()), (100, 60));

        let sure = ScriptHypothesis::new(scores, Rotation::Clockwise90, 0.9);
        let turned = normalizer.correct_orientation(image, &sure, 0.8);
        assert_eq!(turned.metadata.rotation, Rotation::Clockwise90);
        assert_eq!((turned.width(), turned.height()), (60, 100));
    }
}
