//! Regression analysis and the per-segment anti-regression solver.
//!
//! A Bezier segment is parameterized: the time function is x(t), where t is
//! the curve parameter and x is time.  When x'(t) has two zeroes inside the
//! segment there are two vertical tangents and the curve runs backward
//! between them; that is regression.  One zero (a single vertical) or none
//! means the curve never goes backward.
//!
//! Working in tangent widths normalized to the segment width, the boundary
//! between the regressive and non-regressive regions is the ellipse
//!
//!   w1^2 + w2^2 + w1*w2 - 2*w1 - 2*w2 + 1 = 0
//!
//! with the w1 maximum at (4/3, 1/3), the w2 maximum at (1/3, 4/3), and the
//! balance point at (1, 1).  Pairs outside the ellipse and outside the unit
//! square are regressive.  The solver moves a width pair onto the ellipse
//! edge (or into the unit square, for Contain), choosing the landing point
//! per the requested mode.

use crate::{
    knot::KnotData,
    types::{AntiRegressionMode, CurveFamily, Interp, Time},
};

/// Amount by which a fix overshoots the exact ellipse solution.  Keeps the
/// written widths strictly non-regressive under imprecise re-processing.
pub(crate) const WRITE_PADDING: Time = 1e-5;

/// Padding applied when testing for regression.  Smaller than
/// `WRITE_PADDING` so that our own output always reads as non-regressive.
pub(crate) const READ_PADDING: Time = 1e-6;

const CONTAINED_MAX: Time = 1.0;
const VERT_MAX: Time = 4.0 / 3.0;
const VERT_MIN: Time = 1.0 / 3.0;

/// Whether a pair of normalized tangent widths produces a regressive
/// segment (two interior vertical tangents).
pub fn are_tan_widths_regressive(width1: Time, width2: Time) -> bool {
    // If contained, then not regressive.  This is a fast path, but also a
    // correctness requirement: there are non-regressive points outside the
    // ellipse but inside the unit square, and Contain writes exactly 1.0.
    if width1 <= CONTAINED_MAX && width2 <= CONTAINED_MAX {
        return false;
    }

    let w1 = width1 + READ_PADDING;
    let w2 = width2 + READ_PADDING;

    // Outside the ellipse?
    (w1 * w1) + (w2 * w2) - 2.0 * (w1 + w2) + (w1 * w2) + 1.0 > 0.0
}

/// Given one normalized width, solve the ellipse for the other width that
/// yields a single vertical.  Of the two solutions, take the one closer to
/// `hint` (the width's prior value), for continuity across drags.
fn other_width_for_vertical(width: Time, hint: Time) -> Time {
    if width > VERT_MAX {
        tracing::warn!(width, "unexpectedly long tangent");
        return VERT_MIN;
    }

    // Power form in the unknown width: w^2 + (width - 2) w + (width - 1)^2.
    let b = width - 2.0;
    let c = (width - 1.0) * (width - 1.0);
    let root_base = -b / 2.0;
    let root_offset = (b * b - 4.0 * c).sqrt() / 2.0;

    if hint > root_base {
        root_base + root_offset
    } else {
        root_base - root_offset
    }
}

/// Which neighbor segment of the active knot is being solved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WhichSegment {
    /// The segment ending at the active knot.
    Pre,
    /// The segment starting at the active knot.
    Post,
}

/// Outcome of one segment solve, in raw (unnormalized) widths.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SegmentAdjustment {
    pub active_width: Time,
    pub active_adjusted: bool,
    pub opposite_width: Time,
    pub opposite_adjusted: bool,
}

impl SegmentAdjustment {
    pub fn adjusted(&self) -> bool {
        self.active_adjusted || self.opposite_adjusted
    }
}

/// Solves one segment in normalized width space.
///
/// The "active" knot is the one being edited; the "opposite" knot is its
/// neighbor across the segment.  Geometrically the segment also has a
/// "start" (earlier) and "end" (later) side; for a pre-segment the opposite
/// knot is the start, for a post-segment the active knot is.
pub(crate) struct SegmentSolver {
    which: WhichSegment,
    mode: AntiRegressionMode,
    segment_width: Time,
    proposed_active: Time,
    proposed_opposite: Time,
    working_active: Time,
    working_opposite: Time,
    active_adjusted: bool,
    opposite_adjusted: bool,
}

impl SegmentSolver {
    pub fn new(
        which: WhichSegment,
        mode: AntiRegressionMode,
        active: &KnotData,
        opposite: &KnotData,
    ) -> Self {
        let mut segment_width = match which {
            WhichSegment::Pre => active.time - opposite.time,
            WhichSegment::Post => opposite.time - active.time,
        };
        if segment_width <= 0.0 {
            tracing::warn!(segment_width, "non-positive segment width");
            segment_width = 1.0;
        }

        let (active_raw, opposite_raw) = match which {
            WhichSegment::Pre => (active.pre_tan_width, opposite.post_tan_width),
            WhichSegment::Post => (active.post_tan_width, opposite.pre_tan_width),
        };

        let proposed_active = active_raw / segment_width;
        let proposed_opposite = opposite_raw / segment_width;
        Self {
            which,
            mode,
            segment_width,
            proposed_active,
            proposed_opposite,
            working_active: proposed_active,
            working_opposite: proposed_opposite,
            active_adjusted: false,
            opposite_adjusted: false,
        }
    }

    pub fn adjust(mut self) -> SegmentAdjustment {
        // Contain adjusts tangents even when non-regressive.
        if self.mode == AntiRegressionMode::Contain {
            self.adjust_with_contain();
            return self.finish();
        }

        if !are_tan_widths_regressive(self.proposed_active, self.proposed_opposite) {
            return self.finish();
        }

        match self.mode {
            AntiRegressionMode::KeepRatio => self.adjust_with_keep_ratio(),
            AntiRegressionMode::KeepStart => self.adjust_with_keep_start(),
            AntiRegressionMode::LimitActive => self.adjust_with_limit_active(),
            AntiRegressionMode::LimitOpposite => self.adjust_with_limit_opposite(),
            AntiRegressionMode::None | AntiRegressionMode::Contain => {
                tracing::warn!(mode = ?self.mode, "unexpected anti-regression mode");
            }
        }

        self.finish()
    }

    fn finish(self) -> SegmentAdjustment {
        SegmentAdjustment {
            active_width: self.working_active * self.segment_width,
            active_adjusted: self.active_adjusted,
            opposite_width: self.working_opposite * self.segment_width,
            opposite_adjusted: self.opposite_adjusted,
        }
    }

    fn adjust_with_contain(&mut self) {
        // No write padding here: Contain's maximum is exactly the segment
        // width, and the regression test treats the unit square as
        // unconditionally non-regressive.
        if self.proposed_active > CONTAINED_MAX {
            self.set_active(CONTAINED_MAX);
        }
        if self.proposed_opposite > CONTAINED_MAX {
            self.set_opposite(CONTAINED_MAX);
        }
    }

    fn adjust_with_keep_ratio(&mut self) {
        if self.proposed_active < READ_PADDING {
            // Zero active width.  Clamp opposite to the segment width.
            self.set_opposite(CONTAINED_MAX - WRITE_PADDING);
        } else if self.proposed_opposite < READ_PADDING {
            // Zero opposite width.  Clamp active to the segment width.
            self.set_active(CONTAINED_MAX - WRITE_PADDING);
        } else {
            let ratio = self.proposed_active / self.proposed_opposite;

            // Intersection of the constant-ratio line through the origin
            // with the ellipse, on the longer-tangent side.
            let adjusted_opposite =
                (ratio.sqrt() + ratio + 1.0) / (ratio * ratio + ratio + 1.0);
            self.set_active(ratio * adjusted_opposite - WRITE_PADDING);
            self.set_opposite(adjusted_opposite - WRITE_PADDING);
        }
    }

    fn adjust_with_keep_start(&mut self) {
        if self.proposed_start() >= VERT_MAX {
            // Clamp to the longest possible start width.
            self.set_start(VERT_MAX - WRITE_PADDING);
            self.set_end(VERT_MIN - WRITE_PADDING);
        } else {
            // Keep the start width; solve for the end width.
            let adjusted = other_width_for_vertical(self.proposed_start(), self.proposed_end());
            self.set_end(adjusted - WRITE_PADDING);
        }
    }

    fn adjust_with_limit_active(&mut self) {
        if self.proposed_opposite >= VERT_MAX {
            // Clamp to the longest possible opposite width.
            self.set_opposite(VERT_MAX - WRITE_PADDING);
            self.set_active((VERT_MIN - WRITE_PADDING).min(self.proposed_active));
        } else {
            // Keep the opposite width; solve for the active width.
            let adjusted =
                other_width_for_vertical(self.proposed_opposite, self.proposed_active);
            self.set_active(adjusted - WRITE_PADDING);
        }
    }

    fn adjust_with_limit_opposite(&mut self) {
        if self.proposed_opposite <= VERT_MIN {
            // The non-regressive limit is in the ellipse fringe.  Leave the
            // opposite width alone and clamp only the active width, so a
            // short neighbor tangent is never forced longer.
            let adjusted =
                other_width_for_vertical(self.proposed_opposite, self.proposed_active);
            self.set_active(adjusted - WRITE_PADDING);
        } else if self.proposed_active >= VERT_MAX {
            // Clamp to the longest possible active width.
            self.set_active(VERT_MAX - WRITE_PADDING);
            self.set_opposite(VERT_MIN - WRITE_PADDING);
        } else {
            // Keep the active width; solve for the opposite width.
            let adjusted =
                other_width_for_vertical(self.proposed_active, self.proposed_opposite);
            self.set_opposite(adjusted - WRITE_PADDING);
        }
    }

    fn set_active(&mut self, width: Time) {
        self.active_adjusted |= width != self.proposed_active;
        self.working_active = width;
    }

    fn set_opposite(&mut self, width: Time) {
        self.opposite_adjusted |= width != self.proposed_opposite;
        self.working_opposite = width;
    }

    fn proposed_start(&self) -> Time {
        match self.which {
            WhichSegment::Pre => self.proposed_opposite,
            WhichSegment::Post => self.proposed_active,
        }
    }

    fn proposed_end(&self) -> Time {
        match self.which {
            WhichSegment::Pre => self.proposed_active,
            WhichSegment::Post => self.proposed_opposite,
        }
    }

    fn set_start(&mut self, width: Time) {
        match self.which {
            WhichSegment::Pre => self.set_opposite(width),
            WhichSegment::Post => self.set_active(width),
        }
    }

    fn set_end(&mut self, width: Time) {
        match self.which {
            WhichSegment::Pre => self.set_active(width),
            WhichSegment::Post => self.set_opposite(width),
        }
    }
}

/// Whether the Bezier segment from `start` to `end` is regressive under the
/// given mode's definition.
pub(crate) fn is_segment_regressive(
    start: &KnotData,
    end: &KnotData,
    mode: AntiRegressionMode,
) -> bool {
    if start.next_interp != Interp::Curve || start.curve_family != CurveFamily::Bezier {
        return false;
    }

    let interval = end.time - start.time;
    let start_width = start.post_tan_width / interval;
    let end_width = end.pre_tan_width / interval;

    // In Contain mode, regressive simply means uncontained.
    if mode == AntiRegressionMode::Contain {
        return start_width > CONTAINED_MAX || end_width > CONTAINED_MAX;
    }

    are_tan_widths_regressive(start_width, end_width)
}

/// State-free batch entry point: de-regress one segment in place.  Returns
/// whether either width changed.  Non-Bezier segments and `None` mode are
/// no-ops.
pub(crate) fn process_segment(
    start: &mut KnotData,
    end: &mut KnotData,
    mode: AntiRegressionMode,
) -> bool {
    if mode == AntiRegressionMode::None {
        return false;
    }
    if start.next_interp != Interp::Curve || start.curve_family != CurveFamily::Bezier {
        return false;
    }

    // Treat the start knot as active and the end knot as opposite.
    let solver = SegmentSolver::new(WhichSegment::Post, mode, start, end);
    let adjustment = solver.adjust();

    if adjustment.active_adjusted {
        start.post_tan_width = adjustment.active_width;
    }
    if adjustment.opposite_adjusted {
        end.pre_tan_width = adjustment.opposite_width;
    }

    adjustment.adjusted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn segment(start_width: Time, end_width: Time) -> (KnotData, KnotData) {
        let start = KnotData {
            time: 0.0,
            post_tan_width: start_width,
            ..KnotData::default()
        };
        let end = KnotData {
            time: 1.0,
            value: 1.0,
            pre_tan_width: end_width,
            ..KnotData::default()
        };
        (start, end)
    }

    #[test]
    fn contained_square_is_never_regressive() {
        assert!(!are_tan_widths_regressive(1.0, 1.0));
        assert!(!are_tan_widths_regressive(0.0, 0.0));
        assert!(!are_tan_widths_regressive(1.0, 0.0));
    }

    #[test]
    fn double_vertical_is_regressive() {
        assert!(are_tan_widths_regressive(4.0 / 3.0, 4.0 / 3.0));
        assert!(are_tan_widths_regressive(2.0, 2.0));
        assert!(are_tan_widths_regressive(1.3, 1.3));
    }

    #[test]
    fn long_but_balanced_widths_are_not_regressive() {
        // (1.2, 0.2) is outside the unit square but inside the ellipse.
        assert!(!are_tan_widths_regressive(1.2, 0.2));
    }

    #[test]
    fn non_regressive_pairs_are_untouched() {
        for mode in [
            AntiRegressionMode::KeepRatio,
            AntiRegressionMode::KeepStart,
            AntiRegressionMode::LimitActive,
            AntiRegressionMode::LimitOpposite,
        ] {
            let (mut start, mut end) = segment(0.6, 0.9);
            assert!(!process_segment(&mut start, &mut end, mode));
            assert_eq!(start.post_tan_width, 0.6);
            assert_eq!(end.pre_tan_width, 0.9);
        }
    }

    #[test]
    fn contain_clamps_to_segment_width_exactly() {
        let (mut start, mut end) = segment(4.0 / 3.0, 4.0 / 3.0);
        assert!(process_segment(
            &mut start,
            &mut end,
            AntiRegressionMode::Contain
        ));
        assert_eq!(start.post_tan_width, 1.0);
        assert_eq!(end.pre_tan_width, 1.0);
    }

    #[test]
    fn solved_pairs_read_as_non_regressive() {
        let cases = [(1.5, 1.5), (2.0, 0.5), (0.5, 2.0), (4.0, 4.0), (1.4, 1.2)];
        for mode in [
            AntiRegressionMode::KeepRatio,
            AntiRegressionMode::KeepStart,
            AntiRegressionMode::LimitActive,
            AntiRegressionMode::LimitOpposite,
        ] {
            for (w1, w2) in cases {
                let (mut start, mut end) = segment(w1, w2);
                assert!(process_segment(&mut start, &mut end, mode));
                assert!(
                    !are_tan_widths_regressive(start.post_tan_width, end.pre_tan_width),
                    "mode {mode:?} left ({}, {}) regressive",
                    start.post_tan_width,
                    end.pre_tan_width,
                );
            }
        }
    }

    #[test]
    fn keep_ratio_preserves_width_ratio() {
        let (mut start, mut end) = segment(2.0, 1.0);
        process_segment(&mut start, &mut end, AntiRegressionMode::KeepRatio);
        // Padding skews the ratio by at most a few parts in 1e4.
        assert_relative_eq!(
            start.post_tan_width / end.pre_tan_width,
            2.0,
            max_relative = 1e-3
        );
    }

    #[test]
    fn keep_ratio_balanced_pair_lands_at_balance_point() {
        let (mut start, mut end) = segment(1.5, 1.5);
        process_segment(&mut start, &mut end, AntiRegressionMode::KeepRatio);
        assert_relative_eq!(start.post_tan_width, 1.0, epsilon = 1e-4);
        assert_relative_eq!(end.pre_tan_width, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn keep_start_clamps_overlong_start() {
        let (mut start, mut end) = segment(2.0, 0.5);
        process_segment(&mut start, &mut end, AntiRegressionMode::KeepStart);
        assert_relative_eq!(start.post_tan_width, VERT_MAX, epsilon = 1e-4);
        assert_relative_eq!(end.pre_tan_width, VERT_MIN, epsilon = 1e-4);
    }

    #[test]
    fn keep_start_holds_start_width() {
        let (mut start, mut end) = segment(1.2, 1.2);
        process_segment(&mut start, &mut end, AntiRegressionMode::KeepStart);
        assert_eq!(start.post_tan_width, 1.2);
        assert!(end.pre_tan_width < 1.2);
    }

    #[test]
    fn limit_opposite_never_lengthens_short_neighbor() {
        // Opposite (end) width is short; only the active (start) width may
        // change, even though the fringe solution would lengthen the end.
        let (mut start, mut end) = segment(2.0, 0.2);
        process_segment(&mut start, &mut end, AntiRegressionMode::LimitOpposite);
        assert_eq!(end.pre_tan_width, 0.2);
        assert!(start.post_tan_width < 2.0);
    }

    #[test]
    fn non_curve_segments_are_ignored() {
        let (mut start, mut end) = segment(4.0, 4.0);
        start.next_interp = Interp::Linear;
        assert!(!process_segment(
            &mut start,
            &mut end,
            AntiRegressionMode::KeepRatio
        ));
        assert_eq!(start.post_tan_width, 4.0);
    }

    #[test]
    fn vertical_solution_tracks_hint() {
        let near = other_width_for_vertical(1.0, 1.1);
        let far = other_width_for_vertical(1.0, 0.1);
        assert!(near > far);
        assert!(!are_tan_widths_regressive(1.0 - WRITE_PADDING, near - WRITE_PADDING));
        assert!(!are_tan_widths_regressive(1.0 - WRITE_PADDING, far - WRITE_PADDING));
    }
}
