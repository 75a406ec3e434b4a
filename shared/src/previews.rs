use image::{imageops::FilterType, ImageFormat};
use std::io::Cursor;

/// Thresholds for generating page-image previews
const MIN_FILE_SIZE_BYTES: usize = 500_000; // 500KB
const MIN_DIMENSION_PX: u32 = 1024;

/// Longest edge of a generated preview
const MAX_PREVIEW_DIMENSION: u32 = 768;

/// Determine if a rendered page image needs a downscaled preview
pub fn needs_preview(file_size: usize, width: u32, height: u32) -> bool {
    file_size >= MIN_FILE_SIZE_BYTES || width >= MIN_DIMENSION_PX || height >= MIN_DIMENSION_PX
}

/// Generate a preview fitting within MAX_PREVIEW_DIMENSION
/// Returns (width, height, jpeg_bytes)
pub fn generate_preview(image_bytes: &[u8]) -> Result<(u32, u32, Vec<u8>), String> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| format!("Failed to load image: {}", e))?;

    // Resize with high-quality Lanczos3 filter, preserving aspect ratio
    let resized = img.resize(
        MAX_PREVIEW_DIMENSION,
        MAX_PREVIEW_DIMENSION,
        FilterType::Lanczos3,
    );

    let mut buf = Cursor::new(Vec::new());
    resized
        .write_to(&mut buf, ImageFormat::Jpeg)
        .map_err(|e| format!("Failed to encode JPEG: {}", e))?;

    Ok((resized.width(), resized.height(), buf.into_inner()))
}

/// Get image dimensions
pub fn get_dimensions(image_bytes: &[u8]) -> Result<(u32, u32), String> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| format!("Failed to load image: {}", e))?;
    Ok((img.width(), img.height()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_preview() {
        // Small file, small dimensions → No
        assert_eq!(needs_preview(100_000, 512, 512), false);

        // Large file, small dimensions → Yes
        assert_eq!(needs_preview(2_000_000, 512, 512), true);

        // Small file, large dimensions → Yes
        assert_eq!(needs_preview(100_000, 2048, 2048), true);
    }

    #[test]
    fn preview_fits_within_max_dimension() {
        let img = image::DynamicImage::new_rgb8(1600, 1200);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();

        let (width, height, jpeg) = generate_preview(buf.get_ref()).unwrap();
        assert!(width <= MAX_PREVIEW_DIMENSION && height <= MAX_PREVIEW_DIMENSION);
        // Aspect ratio preserved (4:3)
        assert_eq!((width, height), (768, 576));
        assert_eq!(get_dimensions(&jpeg).unwrap(), (width, height));
    }
}
