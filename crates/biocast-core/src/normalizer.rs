//! Crop a located face and resize it to the embedding model's input square.

use crate::types::{BoundingBox, NORMALIZED_FACE_SIZE};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("face region {width}x{height} at ({x}, {y}) is empty within a {image_width}x{image_height} image")]
    EmptyRegion {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
}

/// Crop `image` to `face` and resize to 160×160.
///
/// The box is intersected with the image bounds first. Aspect ratio is not
/// preserved; a bilinear filter is used for the resize.
pub fn normalize_face(image: &RgbImage, face: &BoundingBox) -> Result<RgbImage, NormalizeError> {
    let (image_width, image_height) = image.dimensions();

    let x = face.x.min(image_width);
    let y = face.y.min(image_height);
    let width = face.width.min(image_width - x);
    let height = face.height.min(image_height - y);

    if width == 0 || height == 0 {
        return Err(NormalizeError::EmptyRegion {
            x: face.x,
            y: face.y,
            width: face.width,
            height: face.height,
            image_width,
            image_height,
        });
    }

    let crop = imageops::crop_imm(image, x, y, width, height).to_image();
    Ok(imageops::resize(
        &crop,
        NORMALIZED_FACE_SIZE,
        NORMALIZED_FACE_SIZE,
        FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: u32, y: u32, width: u32, height: u32) -> BoundingBox {
        BoundingBox { x, y, width, height, confidence: 0.99 }
    }

    #[test]
    fn test_output_is_always_160_square() {
        let image = RgbImage::from_pixel(640, 480, Rgb([10, 20, 30]));
        for b in [face(0, 0, 640, 480), face(100, 50, 20, 300), face(300, 200, 7, 3), face(0, 0, 1, 1)] {
            let out = normalize_face(&image, &b).unwrap();
            assert_eq!(out.dimensions(), (160, 160), "box {b:?}");
        }
    }

    #[test]
    fn test_crop_uses_only_face_region() {
        let mut image = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        for y in 20..40 {
            for x in 30..60 {
                image.put_pixel(x, y, Rgb([200, 100, 50]));
            }
        }
        let out = normalize_face(&image, &face(30, 20, 30, 20)).unwrap();
        assert!(out.pixels().all(|p| *p == Rgb([200, 100, 50])));
    }

    #[test]
    fn test_box_past_edge_is_clipped() {
        let image = RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]));
        let out = normalize_face(&image, &face(40, 40, 100, 100)).unwrap();
        assert_eq!(out.dimensions(), (160, 160));
    }

    #[test]
    fn test_empty_region_is_error() {
        let image = RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]));
        let err = normalize_face(&image, &face(60, 10, 10, 10)).unwrap_err();
        assert!(matches!(err, NormalizeError::EmptyRegion { .. }));
        assert!(normalize_face(&image, &face(10, 10, 0, 10)).is_err());
    }
}
