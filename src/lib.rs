//! qr_align - Sub-pixel QR code alignment pattern localization
//!
//! Locates the concentric square alignment marker of QR codes (versions 2
//! and up) inside a caller-supplied search region of a binarized image.
//! Meant to run after finder pattern detection has produced a module size
//! estimate and a likely region for the marker; the refined center feeds
//! the perspective transform downstream.

#![warn(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

/// Alignment pattern search (row scan, vertical cross-check, confirmation)
pub mod detector;
/// Core data structures (BitMatrix, Point)
pub mod models;

pub use detector::alignment::{AlignmentFinder, AlignmentPattern, SearchRegion};
pub use models::{BitMatrix, Point};

/// Locate the alignment pattern inside a rectangular search region.
///
/// `module_size` is the module size in pixels estimated from the finder
/// patterns. The caller guarantees the region lies within the image.
/// Returns `None` when nothing in the region resembles the marker.
pub fn find_alignment_pattern(
    matrix: &BitMatrix,
    start_x: usize,
    start_y: usize,
    width: usize,
    height: usize,
    module_size: f32,
) -> Option<AlignmentPattern> {
    AlignmentFinder::find(matrix, start_x, start_y, width, height, module_size)
}
