//! Rasterization of QR symbols to PNG.
//!
//! A symbol is drawn onto a square grayscale canvas at the largest integer
//! scale that fits, centered, with a light quiet zone, then encoded as PNG.

use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, Luma};

use crate::{
    error::{QrApiError, Result},
    qrcode::QrCode,
};

/// Dark module value in the grayscale output.
pub const DARK: u8 = 0;
/// Light module and background value in the grayscale output.
pub const LIGHT: u8 = 255;

/// Geometry of the rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Width and height of the output, in pixels.
    pub size: u32,
    /// Quiet zone around the symbol, in modules.
    pub border: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { size: 200, border: 4 }
    }
}

/// A PNG-encoded QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl RasterImage {
    /// Media type of the encoded bytes.
    pub const CONTENT_TYPE: &'static str = "image/png";

    /// The PNG file contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.png
    }

    /// Consumes the image, returning the PNG file contents.
    pub fn into_bytes(self) -> Vec<u8> {
        self.png
    }

    /// Size of the PNG in bytes.
    pub fn len(&self) -> usize {
        self.png.len()
    }

    /// Whether the PNG is empty.
    pub fn is_empty(&self) -> bool {
        self.png.is_empty()
    }

    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Scales a QR code onto a square grayscale canvas.
///
/// Each module (quiet zone included) becomes a `factor x factor` block, where
/// `factor` is the largest integer that fits the symbol into `options.size`.
/// The symbol is centered and the leftover margin is light. No interpolation is
/// applied, so every pixel is either [`DARK`] or [`LIGHT`].
///
/// # Errors
///
/// Returns `EncodingFailure` if the symbol plus quiet zone is larger than the canvas.
///
/// # Example
///
/// ```rust
/// use qrcode_api::qrcode::{QrCode, QrCodeEcc};
/// use qrcode_api::render::{scale, RenderOptions};
///
/// let qr = QrCode::encode_text("Hello, World!", QrCodeEcc::High).unwrap();
/// let img = scale(&qr, RenderOptions::default()).unwrap();
/// assert_eq!(img.dimensions(), (200, 200));
/// ```
pub fn scale(qr: &QrCode, options: RenderOptions) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
    let (factor, offset) = layout(qr, options)?;
    let border = options.border as i64;

    let img = ImageBuffer::from_fn(options.size, options.size, |x, y| {
        let (x, y) = (i64::from(x) - offset, i64::from(y) - offset);
        if x < 0 || y < 0 {
            return Luma([LIGHT]);
        }
        let qr_x = x / factor - border;
        let qr_y = y / factor - border;
        // get_module is light outside the symbol, which also covers the right and bottom margins.
        match (i32::try_from(qr_x), i32::try_from(qr_y)) {
            (Ok(qx), Ok(qy)) if qr.get_module(qx, qy) => Luma([DARK]),
            _ => Luma([LIGHT]),
        }
    });
    Ok(img)
}

/// Module scale factor and top-left offset for the given options.
pub fn layout(qr: &QrCode, options: RenderOptions) -> Result<(i64, i64)> {
    let modules = i64::from(qr.size()) + 2 * i64::from(options.border);
    let factor = i64::from(options.size) / modules;
    if factor == 0 {
        return Err(QrApiError::encoding(format!(
            "symbol needs {modules} modules but the image is {} pixels wide",
            options.size
        )));
    }
    let offset = (i64::from(options.size) - modules * factor) / 2;
    Ok((factor, offset))
}

/// Renders a QR code to PNG bytes.
///
/// The output only depends on the symbol and the options, so rendering the
/// same symbol twice yields byte-identical images.
pub fn rasterize(qr: &QrCode, options: RenderOptions) -> Result<RasterImage> {
    let img = scale(qr, options)?;
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| QrApiError::internal(format!("png encoding failed: {e}")))?;
    Ok(RasterImage { png, width: img.width(), height: img.height() })
}
