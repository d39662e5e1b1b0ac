//! Utility functions for vision processing

use crate::error::VisionError;
use crate::models::Letterbox;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;

/// Grey used by YOLOv5 to pad letterboxed inputs.
pub const LETTERBOX_FILL: u8 = 114;

/// Resize `frame` into a `size` x `size` canvas keeping its aspect ratio, padding the rest.
pub fn letterbox(frame: &RgbImage, size: u32) -> Result<(RgbImage, Letterbox), VisionError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(VisionError::Processing("Invalid image dimensions".to_string()));
    }
    if size == 0 {
        return Err(VisionError::Processing("Target dimensions cannot be zero".to_string()));
    }

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_width) / 2;
    let pad_y = (size - new_height) / 2;

    let resized = imageops::resize(frame, new_width, new_height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Ok((
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            width,
            height,
        },
    ))
}

/// Convert an RGB image to a normalized `[1, 3, H, W]` float tensor.
pub fn rgb_to_chw_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }
    tensor
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, VisionError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(buffer)
}

/// Convert an OpenCV BGR Mat to an RGB image.
#[cfg(feature = "opencv")]
pub fn mat_to_rgb(mat: &opencv::core::Mat) -> Result<RgbImage, VisionError> {
    use opencv::prelude::*;

    let (width, height) = (mat.cols(), mat.rows());
    if width <= 0 || height <= 0 {
        return Err(VisionError::Processing("Invalid image dimensions".to_string()));
    }
    if mat.channels() != 3 {
        return Err(VisionError::Processing(format!(
            "Expected a 3-channel frame, got {}",
            mat.channels()
        )));
    }

    let mut rgb = opencv::core::Mat::default();
    opencv::imgproc::cvt_color(mat, &mut rgb, opencv::imgproc::COLOR_BGR2RGB, 0)?;
    let continuous = if rgb.is_continuous() { rgb } else { rgb.try_clone()? };
    let data = continuous.data_bytes()?.to_vec();

    RgbImage::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| VisionError::Processing("Frame buffer size mismatch".to_string()))
}

/// Convert an RGB image to an OpenCV BGR Mat.
#[cfg(feature = "opencv")]
pub fn rgb_to_mat(image: &RgbImage) -> Result<opencv::core::Mat, VisionError> {
    use opencv::prelude::*;

    let flat = opencv::core::Mat::from_slice(image.as_raw())?;
    let shaped = flat.reshape(3, image.height() as i32)?;
    let mut bgr = opencv::core::Mat::default();
    opencv::imgproc::cvt_color(&shaped, &mut bgr, opencv::imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_landscape_frame() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
        let (canvas, letterbox) = letterbox(&frame, 320).unwrap();

        assert_eq!(canvas.dimensions(), (320, 320));
        assert!((letterbox.scale - 0.5).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 40.0);
        // padding band and image area
        assert_eq!(*canvas.get_pixel(160, 10), Rgb([LETTERBOX_FILL; 3]));
        assert_eq!(*canvas.get_pixel(160, 160), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_letterbox_rejects_empty_frame() {
        let frame = RgbImage::new(0, 0);
        assert!(letterbox(&frame, 640).is_err());
    }

    #[test]
    fn test_rgb_to_chw_tensor() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(1, 0, Rgb([255, 0, 51]));
        let tensor = rgb_to_chw_tensor(&image);

        assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
        assert_eq!(tensor[[0, 0, 0, 1]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 1]], 0.0);
        assert!((tensor[[0, 2, 0, 1]] - 0.2).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_encode_jpeg() {
        let image = RgbImage::from_pixel(32, 24, Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&image, 90).unwrap();

        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }
}
