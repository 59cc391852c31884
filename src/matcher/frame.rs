use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use thiserror::Error;

pub const JPEG: &str = "image/jpeg";
pub const PNG: &str = "image/png";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image data is empty")]
    Empty,

    #[error("unsupported image type {0}")]
    UnsupportedType(String),

    #[error("image data is not valid base64")]
    InvalidBase64,

    #[error("cannot decode image: {0}")]
    Decode(String),

    #[error("cannot encode image: {0}")]
    Encode(String),
}

/// Base64 image payload with its MIME type, as carried in data URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime: String,
    data: String,
}

impl EncodedImage {
    /// Accepts `data:<mime>;base64,<data>` or bare base64. The MIME type is
    /// taken from the payload's magic bytes, so only JPEG and PNG pass.
    pub fn parse(raw: &str) -> Result<Self, ImageError> {
        let mut img = Self::from_stored(raw);
        if img.data.is_empty() {
            return Err(ImageError::Empty);
        }
        let labelled = raw.trim_start().starts_with("data:");
        if labelled && img.mime != JPEG && img.mime != PNG {
            return Err(ImageError::UnsupportedType(img.mime));
        }
        let bytes = img.decode()?;
        img.mime = sniff_mime(&bytes)?.to_string();
        Ok(img)
    }

    /// Splits a stored reference without validating the payload.
    pub fn from_stored(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("data:") {
            if let Some((meta, data)) = rest.split_once(',') {
                let mime = meta.split(';').next().unwrap_or(JPEG);
                let mime = if mime.is_empty() { JPEG } else { mime };
                return EncodedImage {
                    mime: mime.to_ascii_lowercase(),
                    data: data.to_string(),
                };
            }
        }
        EncodedImage {
            mime: JPEG.to_string(),
            data: raw.to_string(),
        }
    }

    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        EncodedImage {
            mime: mime.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn base64(&self) -> &str {
        &self.data
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>, ImageError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|_| ImageError::InvalidBase64)
    }
}

fn sniff_mime(bytes: &[u8]) -> Result<&'static str, ImageError> {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => Ok(JPEG),
        Ok(image::ImageFormat::Png) => Ok(PNG),
        Ok(other) => Err(ImageError::UnsupportedType(format!("{other:?}"))),
        Err(_) => Err(ImageError::Decode("payload is not a JPEG or PNG image".to_string())),
    }
}

/// Scales (width, height) so the long edge is at most `max_dim`.
pub fn fit_within(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= max_dim || long == 0 {
        return (width, height);
    }
    let scale = max_dim as f64 / long as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Decodes a frame, shrinks it to the `max_dim` budget and re-encodes it as
/// JPEG at `quality` (1..=100).
pub fn downsample(frame: &[u8], max_dim: u32, quality: u8) -> Result<EncodedImage, ImageError> {
    if frame.is_empty() {
        return Err(ImageError::Empty);
    }
    let img = image::load_from_memory(frame).map_err(|e| ImageError::Decode(e.to_string()))?;
    let (w, h) = fit_within(img.width(), img.height(), max_dim);
    let img = if (w, h) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Triangle)
    };
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(EncodedImage::from_bytes(JPEG, &out))
}
