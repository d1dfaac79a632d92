//! Streaming reader and writer for the coordinate MatrixMarket text format.
//!
//! ```text
//! %%MatrixMarket matrix coordinate real general
//! <rows> <columns> <elements>
//! <row> <column> <value>
//! ```
//!
//! Indices are 1-based on the wire and 0-based everywhere else.

mod reader;
mod writer;

pub use reader::MatrixMarketReader;
pub use writer::MatrixMarketWriter;

pub const MATRIX_MARKET_HEADER: &str = "%%MatrixMarket matrix coordinate real general";

/// Blank lines and `%` comments are skipped between the header and the data.
fn is_skippable(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('%')
}
