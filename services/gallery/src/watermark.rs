use crate::config::WatermarkConfig;
use crate::error::GalleryError;
use crate::font::BitmapFont;
use crate::mime::Codec;
use image::{DynamicImage, RgbaImage};
use std::io::Cursor;
use tracing::{debug, instrument};

/// Where and how large the label is drawn on an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkPlacement {
    pub font_size: u32,
    pub text_width: u32,
    pub text_height: u32,
    pub ascent: u32,
    /// Left edge of the label; negative when the label is wider than the image
    pub x: i64,
    /// Baseline of the label
    pub baseline_y: i64,
    font: BitmapFont,
}

impl WatermarkPlacement {
    /// Bottom-right placement: font size is `width / font_divisor`, the label ends
    /// `margin` pixels from the right edge and its line box sits on the bottom edge.
    pub fn compute(width: u32, height: u32, label: &str, font_divisor: u32, margin: u32) -> Self {
        let font_size = width / font_divisor.max(1);
        let font = BitmapFont::for_size(font_size);
        let text_width = font.text_width(label);
        let text_height = font.height();
        let ascent = font.ascent();

        Self {
            font_size,
            text_width,
            text_height,
            ascent,
            x: i64::from(width) - i64::from(text_width) - i64::from(margin),
            baseline_y: i64::from(height) - i64::from(text_height) + i64::from(ascent),
            font,
        }
    }

    /// Top edge of the glyphs
    pub fn top(&self) -> i64 {
        self.baseline_y - i64::from(self.ascent)
    }
}

/// Decode `bytes`, burn `label` into the bottom-right corner and re-encode with the same codec
#[instrument(skip(bytes, config), fields(codec = codec.tag(), size_bytes = bytes.len()))]
pub fn apply_watermark(
    bytes: &[u8],
    codec: Codec,
    label: &str,
    config: &WatermarkConfig,
) -> Result<Vec<u8>, GalleryError> {
    let original = image::load_from_memory_with_format(bytes, codec.image_format())?;
    let keep_alpha = original.color().has_alpha() && codec != Codec::Jpg;

    let mut canvas = original.to_rgba8();
    let placement = WatermarkPlacement::compute(
        canvas.width(),
        canvas.height(),
        label,
        config.font_divisor,
        config.margin_px,
    );
    draw_label(&mut canvas, &placement, label, config.opacity);

    debug!(
        width = canvas.width(),
        height = canvas.height(),
        font_size = placement.font_size,
        x = placement.x,
        baseline_y = placement.baseline_y,
        "Watermark drawn"
    );

    let output = if keep_alpha {
        DynamicImage::ImageRgba8(canvas)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
    };

    let mut encoded = Cursor::new(Vec::with_capacity(bytes.len()));
    output.write_to(&mut encoded, codec.image_format())?;
    Ok(encoded.into_inner())
}

/// Blend white at `opacity` over every inked pixel that lands on the canvas
fn draw_label(canvas: &mut RgbaImage, placement: &WatermarkPlacement, label: &str, opacity: f32) {
    let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));
    let opacity = opacity.clamp(0.0, 1.0);

    placement
        .font
        .for_each_pixel(label, placement.x, placement.top(), width, height, |x, y| {
            let pixel = canvas.get_pixel_mut(x as u32, y as u32);
            for channel in pixel.0.iter_mut().take(3) {
                let blended = f32::from(*channel) * (1.0 - opacity) + 255.0 * opacity;
                *channel = blended.round() as u8;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn black_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)
    }

    #[test]
    fn test_placement_formula() {
        // 400 / 20 = 20px font -> scale 2, cells of 12x16
        let placement = WatermarkPlacement::compute(400, 300, "Ada", 20, 10);
        assert_eq!(placement.font_size, 20);
        assert_eq!(placement.text_width, 36);
        assert_eq!(placement.text_height, 16);
        assert_eq!(placement.ascent, 14);
        assert_eq!(placement.x, 400 - 36 - 10);
        assert_eq!(placement.baseline_y, 300 - 16 + 14);
        assert_eq!(placement.top(), 284);
    }

    #[test]
    fn test_placement_allows_label_wider_than_image() {
        let placement = WatermarkPlacement::compute(40, 40, "Very Long Display Name", 20, 10);
        assert!(placement.x < 0);
    }

    #[test]
    fn test_watermark_preserves_dimensions_and_format() {
        let bytes = black_png(200, 100);
        let output = apply_watermark(&bytes, Codec::Png, "ADA", &WatermarkConfig::default()).unwrap();

        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
    }

    #[test]
    fn test_watermark_only_touches_label_box() {
        let bytes = black_png(200, 100);
        let output = apply_watermark(&bytes, Codec::Png, "ADA", &WatermarkConfig::default()).unwrap();
        let decoded = image::load_from_memory(&output).unwrap().to_rgb8();

        // 200 / 20 = 10px font -> scale 1, label box x 172..190, y 92..100
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(decoded.get_pixel(100, 50), &Rgb([0, 0, 0]));
        // top row of 'A' is 0b01110
        assert_eq!(decoded.get_pixel(173, 92), &Rgb([128, 128, 128]));
        assert_eq!(decoded.get_pixel(172, 92), &Rgb([0, 0, 0]));

        let inked = (172..190)
            .flat_map(|x| (92..100).map(move |y| (x, y)))
            .filter(|&(x, y)| decoded.get_pixel(x, y)[0] > 0)
            .count();
        assert!(inked > 10);
    }

    #[test]
    fn test_watermark_keeps_alpha_channel() {
        let image = RgbaImage::from_pixel(120, 60, Rgba([10, 20, 30, 40]));
        let bytes = encode(DynamicImage::ImageRgba8(image), ImageFormat::Png);
        let output = apply_watermark(&bytes, Codec::Png, "x", &WatermarkConfig::default()).unwrap();

        let decoded = image::load_from_memory(&output).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0)[3], 40);
    }

    #[test]
    fn test_watermark_jpeg() {
        let image = RgbImage::from_pixel(160, 90, Rgb([40, 40, 40]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg);
        let output = apply_watermark(&bytes, Codec::Jpg, "Ada", &WatermarkConfig::default()).unwrap();

        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 90));
    }

    #[test]
    fn test_oversized_label_stays_on_canvas() {
        let bytes = black_png(200, 100);
        let label = "A".repeat(500_000);
        let output = apply_watermark(&bytes, Codec::Png, &label, &WatermarkConfig::default()).unwrap();

        let decoded = image::load_from_memory(&output).unwrap().to_rgb8();
        assert_eq!((decoded.width(), decoded.height()), (200, 100));
        assert_eq!(decoded.get_pixel(100, 50), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_undecodable_bytes_are_processing_errors() {
        let err = apply_watermark(b"not an image", Codec::Png, "Ada", &WatermarkConfig::default())
            .unwrap_err();
        assert!(matches!(err, GalleryError::Processing(_)));
        assert!(err.is_retryable());
    }
}
