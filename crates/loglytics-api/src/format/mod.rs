//! Format detector + parser bank (C2).
//!
//! [`detector::FormatDetector`] samples a batch's lines and picks the best
//! matching [`detector::Format`]; [`parsers`] then turns each line of that
//! format into a [`parsers::ParsedLine`] the normalizer (C3) consumes.

pub mod detector;
pub mod parsers;

pub use detector::{Format, FormatDetector};
pub use parsers::{parse_line, ParsedLine};
