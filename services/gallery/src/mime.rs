use crate::error::GalleryError;
use image::ImageFormat;

/// Image codecs the watermark pipeline can decode and re-encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Jpg,
    Png,
    Gif,
    Bmp,
    Webp,
}

impl Codec {
    /// Short codec tag
    pub fn tag(self) -> &'static str {
        match self {
            Codec::Jpg => "jpg",
            Codec::Png => "png",
            Codec::Gif => "gif",
            Codec::Bmp => "bmp",
            Codec::Webp => "webp",
        }
    }

    /// Canonical content type for this codec
    pub fn content_type(self) -> &'static str {
        match self {
            Codec::Jpg => "image/jpeg",
            Codec::Png => "image/png",
            Codec::Gif => "image/gif",
            Codec::Bmp => "image/bmp",
            Codec::Webp => "image/webp",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Codec::Jpg => ImageFormat::Jpeg,
            Codec::Png => ImageFormat::Png,
            Codec::Gif => ImageFormat::Gif,
            Codec::Bmp => ImageFormat::Bmp,
            Codec::Webp => ImageFormat::WebP,
        }
    }
}

/// Map a declared content type to its codec
pub fn resolve_codec(content_type: &str) -> Result<Codec, GalleryError> {
    // Parameters such as "; charset=binary" are ignored
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/jpeg" => Ok(Codec::Jpg),
        "image/png" => Ok(Codec::Png),
        "image/gif" => Ok(Codec::Gif),
        "image/bmp" => Ok(Codec::Bmp),
        "image/webp" => Ok(Codec::Webp),
        _ => Err(GalleryError::Validation(format!(
            "unsupported image content type {content_type:?}"
        ))),
    }
}

/// Sniff the content type of raw upload bytes
pub fn detect_content_type(bytes: &[u8]) -> Result<&'static str, GalleryError> {
    let format = image::guess_format(bytes).map_err(|_| {
        GalleryError::Validation("unable to detect content type of upload".to_string())
    })?;
    let content_type = format.to_mime_type();

    if !content_type.starts_with("image/") {
        return Err(GalleryError::Validation(format!(
            "invalid file type {content_type}, only images are allowed"
        )));
    }
    Ok(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_supported_types() {
        assert_eq!(resolve_codec("image/jpeg").unwrap(), Codec::Jpg);
        assert_eq!(resolve_codec("image/png").unwrap().tag(), "png");
        assert_eq!(resolve_codec("image/gif").unwrap().tag(), "gif");
        assert_eq!(resolve_codec("image/bmp").unwrap().tag(), "bmp");
        assert_eq!(resolve_codec("image/webp").unwrap().tag(), "webp");
    }

    #[test]
    fn test_resolve_ignores_case_and_parameters() {
        assert_eq!(resolve_codec("IMAGE/PNG").unwrap(), Codec::Png);
        assert_eq!(resolve_codec("image/jpeg; q=0.9").unwrap(), Codec::Jpg);
    }

    #[test]
    fn test_resolve_rejects_unknown_types() {
        assert!(matches!(
            resolve_codec("application/pdf"),
            Err(GalleryError::Validation(_))
        ));
        assert!(resolve_codec("image/tiff").is_err());
        assert!(resolve_codec("").is_err());
    }

    #[test]
    fn test_content_type_round_trips_through_resolver() {
        for codec in [Codec::Jpg, Codec::Png, Codec::Gif, Codec::Bmp, Codec::Webp] {
            assert_eq!(resolve_codec(codec.content_type()).unwrap(), codec);
        }
    }

    #[test]
    fn test_detect_content_type() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_content_type(&png_magic).unwrap(), "image/png");

        let jpeg_magic = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];
        assert_eq!(detect_content_type(&jpeg_magic).unwrap(), "image/jpeg");

        assert!(detect_content_type(b"%PDF-1.7").is_err());
    }
}
