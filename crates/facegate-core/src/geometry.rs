//! Letterbox preprocessing and box overlap shared by the ONNX detectors.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Aspect-preserving fit of an image into a square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub new_w: u32,
    pub new_h: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            size,
            scale,
            pad_x: (size - new_w) as f32 / 2.0,
            pad_y: (size - new_h) as f32 / 2.0,
            new_w,
            new_h,
        }
    }

    /// Map a point in model-input space back to original image space.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    /// Resize, pad and normalise into a `[1, 3, size, size]` RGB tensor:
    /// `(pixel - mean) * inv_std`, padding filled with `pad_pixel`.
    pub fn to_tensor(&self, image: &RgbImage, mean: f32, inv_std: f32, pad_pixel: f32) -> Array4<f32> {
        let size = self.size as usize;
        let resized = imageops::resize(image, self.new_w, self.new_h, FilterType::Triangle);
        let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), (pad_pixel - mean) * inv_std);

        let x0 = self.pad_x.floor() as usize;
        let y0 = self.pad_y.floor() as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x0 + x as usize, y0 + y as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - mean) * inv_std;
            }
        }
        tensor
    }
}

/// Intersection-over-union of two `(x, y, width, height)` boxes.
pub fn iou_xywh(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> f32 {
    let x1 = a.0.max(b.0);
    let y1 = a.1.max(b.1);
    let x2 = (a.0 + a.2).min(b.0 + b.2);
    let y2 = (a.1 + a.3).min(b.1 + b.3);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.2 * a.3 + b.2 * b.3 - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_iou_identical() {
        let a = (0.0, 0.0, 100.0, 100.0);
        assert!((iou_xywh(a, a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        let iou = iou_xywh((0.0, 0.0, 10.0, 10.0), (5.0, 0.0, 10.0, 10.0));
        assert!((iou - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        assert_eq!(iou_xywh((0.0, 0.0, 10.0, 10.0), (20.0, 20.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, 640);
        assert_eq!((lb.new_w, lb.new_h), (640, 480));
        assert!((lb.pad_y - 80.0).abs() < 1e-6);

        let (x, y) = (100.0f32, 50.0f32);
        let (rx, ry) = lb.unmap(x * lb.scale + lb.pad_x, y * lb.scale + lb.pad_y);
        assert!((rx - x).abs() < 0.1 && (ry - y).abs() < 0.1);
    }

    #[test]
    fn test_to_tensor_pads_and_normalises() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 128]));
        let lb = Letterbox::fit(4, 2, 8);
        let t = lb.to_tensor(&image, 0.0, 1.0 / 255.0, 114.0);

        assert_eq!(t.shape(), &[1, 3, 8, 8]);
        // top padding row
        assert!((t[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        // image content starts at row 2
        assert!((t[[0, 0, 4, 4]] - 1.0).abs() < 1e-6);
        assert!(t[[0, 1, 4, 4]].abs() < 1e-6);
    }
}
