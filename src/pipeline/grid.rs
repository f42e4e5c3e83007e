//! Contact sheet composition

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};

use crate::capture::Frame;
use crate::error::ComposeError;
use crate::pipeline::rank::TOP_K;

/// Cells per row and per column.
pub const GRID_DIM: u32 = 3;
/// Edge length of one cell in pixels.
pub const CELL_SIZE: u32 = 300;
/// Edge length of the whole sheet.
pub const SHEET_SIZE: u32 = GRID_DIM * CELL_SIZE;

/// 900x900 RGB grid of the selected frames.
#[derive(Debug, Clone)]
pub struct ContactSheet {
    image: RgbImage,
}

impl ContactSheet {
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Pixel origin `(x, y)` of cell `index`, row-major.
    pub fn cell_origin(index: usize) -> (u32, u32) {
        let index = index as u32;
        let row = index / GRID_DIM;
        let col = index % GRID_DIM;
        (col * CELL_SIZE, row * CELL_SIZE)
    }
}

/// Resize each frame to a 300x300 cell and place frame `i` at row `i / 3`,
/// column `i % 3`.
///
/// # Panics
/// If `frames` does not hold exactly nine frames. Callers check the count
/// with [`select_top_k`](crate::pipeline::select_top_k) first.
pub fn compose(frames: &[Frame]) -> Result<ContactSheet, ComposeError> {
    assert_eq!(
        frames.len(),
        TOP_K,
        "contact sheet needs exactly {TOP_K} frames"
    );

    let mut canvas = RgbImage::new(SHEET_SIZE, SHEET_SIZE);
    for (index, frame) in frames.iter().enumerate() {
        let malformed = || ComposeError::MalformedFrame {
            sequence: frame.meta.sequence,
            len: frame.data.len(),
            expected: frame.expected_len(),
        };
        if frame.data.len() != frame.expected_len() || frame.expected_len() == 0 {
            return Err(malformed());
        }

        // Borrow the payload in place; only the resized tile is allocated
        let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(
            frame.meta.width,
            frame.meta.height,
            &frame.data[..],
        )
        .ok_or_else(malformed)?;

        let tile = imageops::resize(&view, CELL_SIZE, CELL_SIZE, FilterType::Triangle);
        let (x, y) = ContactSheet::cell_origin(index);
        imageops::replace(&mut canvas, &tile, i64::from(x), i64::from(y));
    }

    Ok(ContactSheet { image: canvas })
}
