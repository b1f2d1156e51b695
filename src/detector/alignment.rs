/// Alignment pattern localization
/// A horizontal cross-section through the marker's center reads as three
/// runs of roughly one module each; candidates are verified by a vertical
/// re-scan and confirmed once two rows agree on the same center.
use crate::models::{BitMatrix, Point};

use rayon::prelude::*;

/// Run-length counters for one directional scan; always exactly three runs
type RunCounts = [usize; 3];

/// A located alignment pattern: sub-pixel center plus refined module size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentPattern {
    /// Sub-pixel center of the marker
    pub center: Point,
    /// Module size averaged from the runs that produced this estimate
    pub module_size: f32,
}

impl AlignmentPattern {
    /// Create a new pattern estimate
    pub fn new(x: f32, y: f32, module_size: f32) -> Self {
        Self {
            center: Point::new(x, y),
            module_size,
        }
    }

    /// True if a new sighting is close enough in position and module size
    /// to be the same physical marker
    fn matches(&self, module_size: f32, x: f32, y: f32) -> bool {
        if (y - self.center.y).abs() <= module_size && (x - self.center.x).abs() <= module_size {
            let size_diff = (module_size - self.module_size).abs();
            return size_diff <= 1.0 || size_diff <= self.module_size;
        }
        false
    }

    /// Average this estimate with a second sighting of the same marker
    fn merged_with(&self, x: f32, y: f32, module_size: f32) -> AlignmentPattern {
        AlignmentPattern::new(
            (self.center.x + x) / 2.0,
            (self.center.y + y) / 2.0,
            (self.module_size + module_size) / 2.0,
        )
    }
}

/// A rectangular search window in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRegion {
    /// Left edge of the window
    pub start_x: usize,
    /// Top edge of the window
    pub start_y: usize,
    /// Window width in pixels
    pub width: usize,
    /// Window height in pixels
    pub height: usize,
}

impl SearchRegion {
    /// Create a new search window
    pub fn new(start_x: usize, start_y: usize, width: usize, height: usize) -> Self {
        Self {
            start_x,
            start_y,
            width,
            height,
        }
    }
}

/// Locates one alignment pattern inside a search region
pub struct AlignmentFinder;

impl AlignmentFinder {
    /// Search the region for the alignment pattern center.
    ///
    /// Rows are visited outward from the vertical middle of the region so
    /// the rows most likely to cross the marker are tried first, and the
    /// scan stops at the first center confirmed by two separate rows. If
    /// the region is exhausted without a confirmation, the earliest
    /// unconfirmed sighting is returned as a best guess.
    ///
    /// The caller guarantees the region lies within the image; the
    /// vertical cross-check re-validates row bounds on its own.
    pub fn find(
        matrix: &BitMatrix,
        start_x: usize,
        start_y: usize,
        width: usize,
        height: usize,
        module_size: f32,
    ) -> Option<AlignmentPattern> {
        let max_x = start_x + width;
        let middle_y = start_y + height / 2;
        let mut candidates: Vec<AlignmentPattern> = Vec::with_capacity(5);

        for row_gen in 0..height {
            // middle, middle-1, middle+1, middle-2, ...
            let offset = (row_gen + 1) / 2;
            let y = if row_gen & 1 == 0 {
                middle_y + offset
            } else {
                middle_y - offset
            };
            if let Some(confirmed) =
                Self::scan_row(matrix, y, start_x, max_x, module_size, &mut candidates)
            {
                return Some(confirmed);
            }
        }

        // Nothing was sighted twice; fall back to the earliest sighting.
        if let Some(&guess) = candidates.first() {
            #[cfg(debug_assertions)]
            eprintln!(
                "ALIGN: no confirmed center, guessing first of {} candidate(s)",
                candidates.len()
            );
            return Some(guess);
        }
        None
    }

    /// Search several regions of one image in parallel, one independent
    /// `find` per region, results in input order. Symbols of version 7 and
    /// up carry several alignment patterns; the image is never mutated, so
    /// the regions need no coordination.
    pub fn find_in_regions(
        matrix: &BitMatrix,
        regions: &[SearchRegion],
        module_size: f32,
    ) -> Vec<Option<AlignmentPattern>> {
        regions
            .par_iter()
            .map(|region| {
                Self::find(
                    matrix,
                    region.start_x,
                    region.start_y,
                    region.width,
                    region.height,
                    module_size,
                )
            })
            .collect()
    }

    /// Scan one row left to right with a three-run state machine, judging
    /// every completed triple. Returns as soon as a cross-checked center
    /// matches a previous sighting.
    fn scan_row(
        matrix: &BitMatrix,
        y: usize,
        start_x: usize,
        max_x: usize,
        module_size: f32,
        candidates: &mut Vec<AlignmentPattern>,
    ) -> Option<AlignmentPattern> {
        let mut runs: RunCounts = [0; 3];
        let mut x = start_x;

        // A light run cut off by the region edge has an unknown true
        // length and cannot be counted; skip ahead to the first dark pixel.
        while x < max_x && !matrix.get(x, y) {
            x += 1;
        }

        let mut state: usize = 0;
        while x < max_x {
            if matrix.get(x, y) {
                if state == 1 {
                    runs[1] += 1;
                } else if state == 2 {
                    // A dark pixel while the last run was still open closes
                    // the triple; judge it, then roll the counters so the
                    // new dark run starts a fresh triple mid-row.
                    if Self::plausible_ratio(&runs, module_size) {
                        if let Some(confirmed) =
                            Self::check_center(matrix, &runs, y, x, module_size, candidates)
                        {
                            return Some(confirmed);
                        }
                    }
                    runs[0] = runs[2];
                    runs[1] = 1;
                    runs[2] = 0;
                    state = 1;
                } else {
                    state += 1;
                    runs[state] += 1;
                }
            } else {
                if state == 1 {
                    state += 1;
                }
                runs[state] += 1;
            }
            x += 1;
        }

        // The region edge closes the final triple too.
        if Self::plausible_ratio(&runs, module_size) {
            return Self::check_center(matrix, &runs, y, max_x, module_size, candidates);
        }
        None
    }

    /// Judge a horizontal candidate: cross-check its column vertically and
    /// merge with a previous sighting when both position and module size
    /// agree. Unmatched sightings are recorded for later confirmation.
    fn check_center(
        matrix: &BitMatrix,
        runs: &RunCounts,
        y: usize,
        end_x: usize,
        module_size: f32,
        candidates: &mut Vec<AlignmentPattern>,
    ) -> Option<AlignmentPattern> {
        let horizontal_total = runs[0] + runs[1] + runs[2];
        let center_x = Self::center_from_end(runs, end_x);
        let center_y = Self::cross_check_vertical(
            matrix,
            y,
            center_x as usize,
            2 * runs[1],
            horizontal_total,
            module_size,
        )?;

        let estimated_module_size = horizontal_total as f32 / 3.0;
        for candidate in candidates.iter() {
            if candidate.matches(estimated_module_size, center_x, center_y) {
                return Some(candidate.merged_with(center_x, center_y, estimated_module_size));
            }
        }

        // First sighting at this spot; remember it and keep scanning.
        candidates.push(AlignmentPattern::new(center_x, center_y, estimated_module_size));
        None
    }

    /// Re-scan the column of a horizontal candidate, walking up through the
    /// middle run and the run above it, then down through the rest of the
    /// middle run and the run below. The vertical center is accepted only
    /// when the runs keep the 1:1:1 shape, stay under `max_run` pixels
    /// each, and the vertical extent agrees with the horizontal one to
    /// within 40%.
    fn cross_check_vertical(
        matrix: &BitMatrix,
        start_y: usize,
        center_x: usize,
        max_run: usize,
        horizontal_total: usize,
        module_size: f32,
    ) -> Option<f32> {
        let max_y = matrix.height();
        let mut runs: RunCounts = [0; 3];

        let mut up = start_y as isize;
        while up >= 0 && matrix.get(center_x, up as usize) && runs[1] <= max_run {
            runs[1] += 1;
            up -= 1;
        }
        if up < 0 || runs[1] > max_run {
            return None;
        }
        while up >= 0 && !matrix.get(center_x, up as usize) && runs[0] <= max_run {
            runs[0] += 1;
            up -= 1;
        }
        if runs[0] > max_run {
            return None;
        }

        let mut down = start_y + 1;
        while down < max_y && matrix.get(center_x, down) && runs[1] <= max_run {
            runs[1] += 1;
            down += 1;
        }
        if down == max_y || runs[1] > max_run {
            return None;
        }
        while down < max_y && !matrix.get(center_x, down) && runs[2] <= max_run {
            runs[2] += 1;
            down += 1;
        }
        if runs[2] > max_run {
            return None;
        }

        // Stretched or squashed columns are unrelated structure even when
        // the run proportions happen to fit.
        let vertical_total = runs[0] + runs[1] + runs[2];
        if 5 * vertical_total.abs_diff(horizontal_total) >= 2 * horizontal_total {
            return None;
        }

        if Self::plausible_ratio(&runs, module_size) {
            Some(Self::center_from_end(&runs, down))
        } else {
            None
        }
    }

    /// Sub-pixel center of a run triple from the offset one past its end
    fn center_from_end(runs: &RunCounts, end: usize) -> f32 {
        (end - runs[2]) as f32 - runs[1] as f32 / 2.0
    }

    /// Loose 1:1:1 proportion test: every run must sit strictly within
    /// half a module of the expected module size. Tight confirmation is
    /// left to the cross-check and the two-sighting rule.
    fn plausible_ratio(runs: &RunCounts, module_size: f32) -> bool {
        let max_variance = module_size / 2.0;
        runs.iter()
            .all(|&run| (module_size - run as f32).abs() < max_variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Paint a full alignment pattern: a dark 5x5-module square, a light
    /// 3x3 inside it, and a dark single module at the center. `x` and `y`
    /// are the top-left corner, `module` the module size in pixels.
    fn paint_pattern(matrix: &mut BitMatrix, x: usize, y: usize, module: usize) {
        matrix.fill_rect(x, y, 5 * module, 5 * module, true);
        matrix.fill_rect(x + module, y + module, 3 * module, 3 * module, false);
        matrix.fill_rect(x + 2 * module, y + 2 * module, module, module, true);
    }

    #[test]
    fn test_finds_centered_pattern() {
        let mut matrix = BitMatrix::new(60, 60);
        // Pattern spans [20, 35); true center at 27.5
        paint_pattern(&mut matrix, 20, 20, 3);

        let found = AlignmentFinder::find(&matrix, 10, 10, 40, 40, 3.0)
            .expect("pattern should be found");

        assert!(
            (found.center.x - 27.5).abs() < 3.0,
            "center x {} too far from 27.5",
            found.center.x
        );
        assert!(
            (found.center.y - 27.5).abs() < 3.0,
            "center y {} too far from 27.5",
            found.center.y
        );
        assert!(
            (found.module_size - 3.0).abs() < 1.0,
            "module size {} too far from 3.0",
            found.module_size
        );
    }

    #[test]
    fn test_empty_region_not_found() {
        let matrix = BitMatrix::new(50, 50);
        assert!(AlignmentFinder::find(&matrix, 5, 5, 40, 40, 3.0).is_none());
    }

    #[test]
    fn test_implausible_structure_not_found() {
        // A solid dark block has no 1:1:1 cross-section anywhere.
        let mut matrix = BitMatrix::new(50, 50);
        matrix.fill_rect(10, 10, 30, 30, true);
        assert!(AlignmentFinder::find(&matrix, 5, 5, 40, 40, 3.0).is_none());
    }

    #[test]
    fn test_vertical_cross_check_rejects_bars() {
        // Full-height vertical bars produce plausible horizontal triples in
        // every row, but the middle run never terminates vertically.
        let mut matrix = BitMatrix::new(40, 40);
        matrix.fill_rect(10, 0, 3, 40, true);
        matrix.fill_rect(16, 0, 3, 40, true);

        // Region ends three pixels past the second bar so the row-end
        // triple reads dark/light/dark with a light tail of one module.
        assert!(AlignmentFinder::find(&matrix, 5, 5, 17, 30, 3.0).is_none());
    }

    #[test]
    fn test_single_row_sighting_falls_back_to_guess() {
        // A one-pixel module makes the center dot visible from exactly one
        // row, so the sighting is never confirmed and becomes the guess.
        let mut matrix = BitMatrix::new(30, 30);
        paint_pattern(&mut matrix, 12, 12, 1);

        let found = AlignmentFinder::find(&matrix, 8, 8, 14, 14, 1.0)
            .expect("single sighting should still be returned");
        assert!(
            (found.center.x - 14.5).abs() <= 1.0,
            "guess x {} too far from 14.5",
            found.center.x
        );
        assert!(
            (found.center.y - 14.5).abs() <= 1.0,
            "guess y {} too far from 14.5",
            found.center.y
        );
    }

    #[test]
    fn test_cross_check_off_edge_rejected() {
        // The marker column continues dark to the top of the image, so the
        // upward walk leaves the image before the middle run completes.
        let mut matrix = BitMatrix::new(30, 30);
        paint_pattern(&mut matrix, 10, 0, 3);
        // Extend the center dot's column to the image top edge
        matrix.fill_rect(16, 0, 3, 9, true);

        assert!(AlignmentFinder::find(&matrix, 5, 0, 20, 18, 3.0).is_none());
    }

    #[test]
    fn test_plausible_ratio_tolerance_is_strict() {
        // Variance of exactly half a module fails; anything under passes.
        assert!(AlignmentFinder::plausible_ratio(&[3, 3, 3], 3.0));
        assert!(AlignmentFinder::plausible_ratio(&[2, 3, 4], 3.0));
        assert!(!AlignmentFinder::plausible_ratio(&[2, 3, 3], 4.0));
        assert!(!AlignmentFinder::plausible_ratio(&[3, 3, 5], 3.0));
        assert!(!AlignmentFinder::plausible_ratio(&[0, 3, 3], 3.0));
    }

    #[test]
    fn test_center_from_end() {
        // End offset 15, trailing run 3, middle run 3: center at 10.5.
        assert_eq!(AlignmentFinder::center_from_end(&[3, 3, 3], 15), 10.5);
    }

    #[test]
    fn test_merge_averages_both_estimates() {
        let first = AlignmentPattern::new(10.0, 20.0, 3.0);
        assert!(first.matches(3.4, 11.0, 19.0));

        let merged = first.merged_with(11.0, 19.0, 3.4);
        assert_eq!(merged.center.x, 10.5);
        assert_eq!(merged.center.y, 19.5);
        assert!((merged.module_size - 3.2).abs() < 1e-6);
    }

    #[test]
    fn test_matches_rejects_distant_or_resized() {
        let pattern = AlignmentPattern::new(10.0, 20.0, 3.0);
        // Too far in x for the claimed module size
        assert!(!pattern.matches(3.0, 14.0, 20.0));
        // Close by, but the module size estimate more than doubled
        assert!(!pattern.matches(7.5, 10.0, 20.0));
    }

    #[test]
    fn test_find_in_regions_keeps_order() {
        let mut matrix = BitMatrix::new(100, 50);
        paint_pattern(&mut matrix, 20, 15, 3);

        let regions = [
            SearchRegion::new(60, 10, 30, 30), // empty
            SearchRegion::new(12, 8, 35, 35),  // contains the pattern
        ];
        let results = AlignmentFinder::find_in_regions(&matrix, &regions, 3.0);

        assert_eq!(results.len(), 2);
        assert!(results[0].is_none());
        let found = results[1].expect("second region holds the pattern");
        assert!((found.center.x - 27.5).abs() < 3.0);
    }

    #[test]
    fn test_determinism() {
        let mut matrix = BitMatrix::new(60, 60);
        paint_pattern(&mut matrix, 21, 19, 3);

        let first = AlignmentFinder::find(&matrix, 10, 10, 40, 40, 3.0);
        for _ in 0..3 {
            assert_eq!(AlignmentFinder::find(&matrix, 10, 10, 40, 40, 3.0), first);
        }
    }
}
