//! Deterministic stand-ins for the face models.

use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::types::{BoundingBox, Embedding};
use image::{Rgb, RgbImage};
use std::path::Path;

const CELL: u32 = 8;

/// Colour that makes [`ColorExtractor`] fail embedding extraction.
pub const POISON: Rgb<u8> = Rgb([255, 0, 255]);

pub fn face_box(x: u32, size: u32) -> BoundingBox {
    BoundingBox {
        x: x as f32,
        y: 0.0,
        width: size as f32,
        height: size as f32,
        confidence: 0.99,
        landmarks: None,
    }
}

/// Treats an image as a row of square cells. Every non-black cell is a face
/// whose embedding is its centre colour scaled to [0, 1].
pub struct ColorExtractor;

impl ColorExtractor {
    pub fn embedding_of(color: Rgb<u8>) -> Embedding {
        Embedding::new(color.0.iter().map(|&c| c as f32 / 255.0).collect())
    }

    fn centre(image: &RgbImage, face: &BoundingBox) -> Rgb<u8> {
        let cx = (face.x + face.width / 2.0) as u32;
        let cy = (face.y + face.height / 2.0) as u32;
        *image.get_pixel(cx.min(image.width() - 1), cy.min(image.height() - 1))
    }
}

impl EmbeddingExtractor for ColorExtractor {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ExtractError> {
        let size = image.height();
        if size == 0 {
            return Ok(Vec::new());
        }
        let cells = image.width() / size;
        Ok((0..cells)
            .map(|i| face_box(i * size, size))
            .filter(|face| Self::centre(image, face) != Rgb([0, 0, 0]))
            .collect())
    }

    fn extract_embeddings(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, ExtractError> {
        boxes
            .iter()
            .map(|face| match Self::centre(image, face) {
                c if c == POISON => Err(ExtractError::Other("poisoned face".into())),
                c => Ok(Self::embedding_of(c)),
            })
            .collect()
    }
}

/// Write an image with one cell per colour. Black cells hold no face.
pub fn write_faces(path: &Path, colors: &[Rgb<u8>]) {
    let mut image = RgbImage::new(CELL * colors.len().max(1) as u32, CELL);
    for (i, color) in colors.iter().enumerate() {
        for y in 0..CELL {
            for x in 0..CELL {
                image.put_pixel(i as u32 * CELL + x, y, *color);
            }
        }
    }
    image.save(path).unwrap();
}

pub fn write_face(path: &Path, color: Rgb<u8>) {
    write_faces(path, &[color]);
}

/// PNG bytes of a single-face image.
pub fn encoded_face(color: Rgb<u8>) -> Vec<u8> {
    let image = RgbImage::from_pixel(CELL, CELL, color);
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}
