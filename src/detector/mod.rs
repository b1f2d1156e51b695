//! Alignment pattern detection
//!
//! The alignment pattern is the small concentric square marker of QR
//! versions 2 and up. Upstream finder-pattern detection supplies a module
//! size estimate and a likely region; this module pins down the marker's
//! center to sub-pixel precision inside that region.

/// Run-length search for the alignment pattern center
pub mod alignment;
