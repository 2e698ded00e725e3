use std::io::Cursor;

use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;

const MIN_DIMENSION: u32 = 256;

/// Encodes `data` as a QR code and returns it as PNG bytes.
pub fn render_png(data: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| anyhow!("can't encode qr code: {:?}", e))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .build();

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image).write_to(&mut png, ImageFormat::Png)?;
    Ok(png.into_inner())
}
