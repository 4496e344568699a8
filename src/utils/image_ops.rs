use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Decode an image from request bytes on the blocking pool. Decoding large
/// scans synchronously would stall the async runtime.
pub async fn load_image_from_memory_async(bytes: &[u8]) -> Result<DynamicImage> {
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).context("Failed to load image from memory")
    })
    .await
    .context("Failed to spawn blocking task for image loading")?
}

/// Encode an RGBA raster to PNG bytes on the blocking pool.
pub async fn encode_png_async(img: RgbaImage) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_png_sync(&img))
        .await
        .context("Failed to spawn blocking task for PNG encoding")?
}

/// Synchronous PNG encode, for debug snapshots captured mid-pipeline.
pub fn encode_png_sync(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    let mut cursor = Cursor::new(&mut png_bytes);
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut cursor, ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[tokio::test]
    async fn png_roundtrip() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]));
        let png = encode_png_async(img).await.unwrap();
        assert!(!png.is_empty());

        let decoded = load_image_from_memory_async(&png).await.unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0)[0], 255);
    }
}
