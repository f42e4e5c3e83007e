pub mod buffer;
pub mod grid;
pub mod rank;

pub use buffer::{BufferStats, StreamBuffer, BUFFER_CAPACITY};
pub use grid::{compose, ContactSheet, CELL_SIZE, GRID_DIM, SHEET_SIZE};
pub use rank::{select_top_k, TOP_K};
