//! Interactive anti-regression: keeps a spline non-regressive while one
//! knot is being dragged.

use crate::{
    error::{SplineError, SplineResult},
    knot::Knot,
    regression::{SegmentSolver, WhichSegment},
    spline::Spline,
    types::{AntiRegressionMode, CurveFamily, Interp, Time},
    value::Sample,
};

/// Report of what one `set` call did to tangent widths.
///
/// Width fields are always filled in: if a tangent was not adjusted, the
/// field holds the proposed (or neighbor's existing) width.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SetResult {
    /// Whether any tangent was adjusted.
    pub adjusted: bool,

    /// Whether a Bezier segment precedes the active knot.
    pub have_pre_segment: bool,
    pub pre_active_adjusted: bool,
    pub pre_active_adjusted_width: Time,
    pub pre_opposite_adjusted: bool,
    pub pre_opposite_adjusted_width: Time,

    /// Whether a Bezier segment follows the active knot.
    pub have_post_segment: bool,
    pub post_active_adjusted: bool,
    pub post_active_adjusted_width: Time,
    pub post_opposite_adjusted: bool,
    pub post_opposite_adjusted_width: Time,
}

/// Lifecycle of a preventer.
///
/// `Uninitialized` until the first `set` call, which runs a corrective pass
/// over the starting neighborhood and moves to `Active`.  A proposal that
/// moves the active knot in time enters `TimeChanged` while the tracked
/// neighborhood is restored and reacquired, then returns to `Active`.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Uninitialized,
    Active,
    TimeChanged,
}

/// Tracks one knot across an edit: the state it had when first seen, and
/// the state currently written to the spline.
#[derive(Clone, Copy, Debug)]
struct KnotState<T: Sample> {
    original: Knot<T>,
    current: Knot<T>,
}

impl<T: Sample> KnotState<T> {
    fn new(knot: Knot<T>) -> Self {
        Self {
            original: knot,
            current: knot,
        }
    }
}

/// Prevents regression during an interactive edit of one knot.
///
/// Create one preventer per drag, naming the knot being edited (the
/// "active" knot).  Call [`set`](Self::set) with each proposed state of
/// that knot, typically once per mouse position; the preventer writes the
/// knot into the spline, adjusting tangent widths as the mode requires, and
/// restores neighbors to their original state when the edit moves away from
/// them.
///
/// With `limit` set, adjusted tangents are written to the spline, so the
/// spline is non-regressive after every call.  Without it, the proposed
/// knot is written verbatim and the adjustments are only reported in the
/// [`SetResult`], which suits interfaces that show a live preview but defer
/// the fix until the drag ends.
pub struct RegressionPreventer<'a, T: Sample> {
    spline: &'a mut Spline<T>,
    mode: AntiRegressionMode,
    limit: bool,
    phase: Phase,
    active: KnotState<T>,
    pre: Option<KnotState<T>>,
    post: Option<KnotState<T>>,
    overwritten: Option<KnotState<T>>,
}

impl<'a, T: Sample> RegressionPreventer<'a, T> {
    /// Begin an edit of the knot at `active_knot_time`.
    ///
    /// Fails if there is no knot at that time, if the spline is not a
    /// Bezier spline, or if the time falls in an inner-loop echo region
    /// (echoed knots are not editable; edit the prototype instead).
    pub fn new(
        spline: &'a mut Spline<T>,
        active_knot_time: Time,
        mode: AntiRegressionMode,
        limit: bool,
    ) -> SplineResult<Self> {
        let Some(active_knot) = spline.knot_at(active_knot_time).copied() else {
            return Err(SplineError::validation(format!(
                "no knot at time {active_knot_time}"
            )));
        };

        if spline.curve_family() != CurveFamily::Bezier {
            return Err(SplineError::validation(
                "anti-regression applies only to Bezier splines",
            ));
        }

        if spline.is_time_echoed(active_knot_time) {
            return Err(SplineError::validation(format!(
                "cannot edit echoed knot at time {active_knot_time}"
            )));
        }

        // Track the neighbor knots, where a Bezier segment connects them to
        // the active knot.
        let knots = spline.knots();
        let idx = knots.partition_point(|k| k.time < active_knot_time);
        let pre = idx
            .checked_sub(1)
            .map(|i| knots[i])
            .filter(|k| k.next_interp == Interp::Curve)
            .map(KnotState::new);
        let post = knots
            .get(idx + 1)
            .copied()
            .filter(|_| active_knot.next_interp == Interp::Curve)
            .map(KnotState::new);

        Ok(Self {
            spline,
            mode,
            limit,
            phase: Phase::Uninitialized,
            active: KnotState::new(active_knot),
            pre,
            post,
            overwritten: None,
        })
    }

    /// Apply one proposed state of the active knot.
    #[tracing::instrument(level = "trace", skip(self, proposed), fields(time = proposed.time))]
    pub fn set(&mut self, proposed: Knot<T>) -> SplineResult<SetResult> {
        proposed.validate()?;

        let mut result = self.init_set_result(&proposed);

        // If anti-regression is disabled, just write the knot as proposed.
        if self.mode == AntiRegressionMode::None {
            self.write_active(proposed)?;
            return Ok(result);
        }

        // Perform initial anti-regression if needed.
        self.handle_initial_adjustment(&mut result)?;

        // If the active knot's time has changed, update state.
        self.handle_time_change(proposed.time)?;

        // Solve the segments.
        self.do_set(proposed, self.mode, &mut result)?;
        Ok(result)
    }

    /// A result indicating unadjusted tangents.
    fn init_set_result(&self, proposed: &Knot<T>) -> SetResult {
        let mut result = SetResult {
            have_pre_segment: self.pre.is_some(),
            have_post_segment: self.post.is_some(),
            pre_active_adjusted_width: proposed.pre_tan_width,
            post_active_adjusted_width: proposed.post_tan_width,
            ..SetResult::default()
        };
        if let Some(pre) = &self.pre {
            result.pre_opposite_adjusted_width = pre.current.post_tan_width;
        }
        if let Some(post) = &self.post {
            result.post_opposite_adjusted_width = post.current.pre_tan_width;
        }
        result
    }

    /// On the first `set`, perform a no-op change to the active knot, using
    /// Contain or Limit Opposite.  Pre-existing regression is fixed; a
    /// non-regressive spline is untouched.  Any widths changed here are
    /// latched as the neighbors' original state, so later restores never
    /// restore a regressive state.
    fn handle_initial_adjustment(&mut self, result: &mut SetResult) -> SplineResult<()> {
        if self.phase != Phase::Uninitialized {
            return Ok(());
        }
        self.phase = Phase::Active;

        let initial_mode = if self.mode == AntiRegressionMode::Contain {
            AntiRegressionMode::Contain
        } else {
            AntiRegressionMode::LimitOpposite
        };
        let original = self.active.original;
        self.do_set(original, initial_mode, result)?;

        if let Some(pre) = &mut self.pre {
            let mut knot = pre.original;
            knot.post_tan_width = pre.current.post_tan_width;
            *pre = KnotState::new(knot);
        }
        if let Some(post) = &mut self.post {
            let mut knot = post.original;
            knot.pre_tan_width = post.current.pre_tan_width;
            *post = KnotState::new(knot);
        }
        Ok(())
    }

    /// Update tracked state when the active knot's time changes.  There is
    /// no primitive to move a knot in time; we remove the old and add the
    /// new.  When the edit crosses a neighbor, previously modified knots
    /// are restored and the neighborhood is reacquired.
    fn handle_time_change(&mut self, proposed_time: Time) -> SplineResult<()> {
        if proposed_time == self.active.current.time {
            return Ok(());
        }
        self.phase = Phase::TimeChanged;

        self.spline.remove_knot(self.active.current.time);

        // Nothing further if we haven't crossed either neighbor.
        let crossed_pre = self
            .pre
            .as_ref()
            .is_some_and(|pre| proposed_time <= pre.original.time);
        let crossed_post = self
            .post
            .as_ref()
            .is_some_and(|post| proposed_time >= post.original.time);
        if self.overwritten.is_some() || crossed_pre || crossed_post {
            // Restore a tentatively overwritten knot, if any.
            if let Some(overwritten) = self.overwritten.take() {
                self.spline.set_knot(overwritten.original)?;
            }

            // Restore original neighbors, since we may have modified one.
            if let Some(pre) = self.pre.take() {
                self.spline.set_knot(pre.original)?;
            }
            if let Some(post) = self.post.take() {
                self.spline.set_knot(post.original)?;
            }

            // Reacquire the neighborhood at the new time.
            let knots = self.spline.knots();
            let lb = knots.partition_point(|k| k.time < proposed_time);

            // If we're tentatively overwriting a knot at this time, store
            // its original state for possible restoration.
            if lb < knots.len() && knots[lb].time == proposed_time {
                self.overwritten = Some(KnotState::new(knots[lb]));
            }

            if let Some(i) = lb.checked_sub(1) {
                self.pre = Some(KnotState::new(knots[i]));
            }

            let post_offset = usize::from(self.overwritten.is_some());
            if lb + post_offset < knots.len() {
                self.post = Some(KnotState::new(knots[lb + post_offset]));
            }
        }

        self.phase = Phase::Active;
        Ok(())
    }

    fn do_set(
        &mut self,
        proposed: Knot<T>,
        mode: AntiRegressionMode,
        result: &mut SetResult,
    ) -> SplineResult<()> {
        let mut active_working = proposed;
        let mut pre_working = self.pre.as_ref().map(|s| s.current);
        let mut post_working = self.post.as_ref().map(|s| s.current);

        // Adjust pre-segment, if it exists.
        if let Some(pre) = &mut pre_working {
            let solver = SegmentSolver::new(
                WhichSegment::Pre,
                mode,
                &active_working.data(),
                &pre.data(),
            );
            let adj = solver.adjust();
            if adj.active_adjusted {
                active_working.pre_tan_width = adj.active_width;
                result.pre_active_adjusted = true;
                result.adjusted = true;
            }
            if adj.opposite_adjusted {
                pre.post_tan_width = adj.opposite_width;
                result.pre_opposite_adjusted = true;
                result.adjusted = true;
            }
            result.pre_active_adjusted_width = active_working.pre_tan_width;
            result.pre_opposite_adjusted_width = pre.post_tan_width;
        }

        // Adjust post-segment, if it exists.
        if let Some(post) = &mut post_working {
            let solver = SegmentSolver::new(
                WhichSegment::Post,
                mode,
                &active_working.data(),
                &post.data(),
            );
            let adj = solver.adjust();
            if adj.active_adjusted {
                active_working.post_tan_width = adj.active_width;
                result.post_active_adjusted = true;
                result.adjusted = true;
            }
            if adj.opposite_adjusted {
                post.pre_tan_width = adj.opposite_width;
                result.post_opposite_adjusted = true;
                result.adjusted = true;
            }
            result.post_active_adjusted_width = active_working.post_tan_width;
            result.post_opposite_adjusted_width = post.pre_tan_width;
        }

        if self.limit {
            // Write possibly adjusted knots to the spline.
            self.write_active(active_working)?;
            if let Some(pre) = pre_working {
                self.spline.set_knot(pre)?;
                if let Some(state) = &mut self.pre {
                    state.current = pre;
                }
            }
            if let Some(post) = post_working {
                self.spline.set_knot(post)?;
                if let Some(state) = &mut self.post {
                    state.current = post;
                }
            }
        } else {
            // Write the active knot as proposed.  The adjustments above
            // weren't pointless; their results are reported in `result`.
            self.write_active(proposed)?;
        }
        Ok(())
    }

    fn write_active(&mut self, knot: Knot<T>) -> SplineResult<()> {
        self.spline.set_knot(knot)?;
        self.active.current = knot;
        Ok(())
    }

    /// The spline being edited.
    pub fn spline(&self) -> &Spline<T> {
        self.spline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bezier_knot(time: Time, value: f64, pre_width: Time, post_width: Time) -> Knot<f64> {
        let mut k = Knot::new(time, value);
        k.pre_tan_width = pre_width;
        k.post_tan_width = post_width;
        k
    }

    fn three_knot_spline() -> Spline<f64> {
        let mut spline = Spline::new();
        spline.set_knot(bezier_knot(0.0, 0.0, 0.0, 0.3)).unwrap();
        spline.set_knot(bezier_knot(1.0, 1.0, 0.3, 0.3)).unwrap();
        spline.set_knot(bezier_knot(2.0, 2.0, 0.3, 0.0)).unwrap();
        spline
    }

    #[test]
    fn rejects_missing_and_echoed_knots() {
        let mut spline = three_knot_spline();
        assert!(
            RegressionPreventer::new(&mut spline, 0.5, AntiRegressionMode::KeepRatio, true)
                .is_err()
        );

        let mut looped = three_knot_spline();
        looped.set_knot(bezier_knot(3.0, 9.0, 0.0, 0.0)).unwrap();
        looped
            .set_loop_params(Some(crate::types::LoopParams {
                proto_start: 0.0,
                proto_end: 2.0,
                num_pre_loops: 0,
                num_post_loops: 1,
                value_offset: 0.0,
            }))
            .unwrap();
        // The authored knot at time 3 is shadowed by an echo; editing it is
        // refused.
        assert!(
            RegressionPreventer::new(&mut looped, 3.0, AntiRegressionMode::KeepRatio, true)
                .is_err()
        );
        // The prototype itself is editable.
        assert!(
            RegressionPreventer::new(&mut looped, 1.0, AntiRegressionMode::KeepRatio, true)
                .is_ok()
        );
    }

    #[test]
    fn rejects_hermite_splines() {
        let mut spline: Spline<f64> = Spline::new();
        spline.set_curve_family(CurveFamily::Hermite).unwrap();
        let mut k = Knot::new(1.0, 1.0);
        k.curve_family = CurveFamily::Hermite;
        spline.set_knot(k).unwrap();

        assert!(
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::KeepRatio, true)
                .is_err()
        );
    }

    #[test]
    fn non_regressive_proposal_writes_verbatim() {
        let mut spline = three_knot_spline();
        let mut preventer =
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::KeepRatio, true)
                .unwrap();

        let proposed = bezier_knot(1.0, 1.5, 0.4, 0.4);
        let result = preventer.set(proposed).unwrap();
        assert!(!result.adjusted);
        assert!(result.have_pre_segment);
        assert!(result.have_post_segment);
        assert_eq!(spline.knot_at(1.0).unwrap().value, 1.5);
        assert_eq!(spline.knot_at(1.0).unwrap().pre_tan_width, 0.4);
    }

    #[test]
    fn overlong_proposal_is_limited_when_limit_is_set() {
        let mut spline = three_knot_spline();
        let mut preventer =
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::LimitActive, true)
                .unwrap();

        // Both of the active knot's tangents far too long for their unit
        // segments.
        let proposed = bezier_knot(1.0, 1.0, 3.0, 3.0);
        let result = preventer.set(proposed).unwrap();
        assert!(result.adjusted);
        assert!(result.pre_active_adjusted);
        assert!(result.post_active_adjusted);

        let written = *spline.knot_at(1.0).unwrap();
        assert!(written.pre_tan_width < 3.0);
        assert!(written.post_tan_width < 3.0);
        assert!(!spline.has_regressive_tangents(AntiRegressionMode::KeepRatio));
    }

    #[test]
    fn without_limit_the_proposal_is_written_and_fix_reported() {
        let mut spline = three_knot_spline();
        let mut preventer =
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::KeepRatio, false)
                .unwrap();

        let proposed = bezier_knot(1.0, 1.0, 2.0, 0.3);
        let result = preventer.set(proposed).unwrap();
        assert!(result.adjusted);
        assert!(result.pre_active_adjusted);
        assert!(result.pre_active_adjusted_width < 2.0);

        // The spline holds the proposal verbatim.
        assert_eq!(spline.knot_at(1.0).unwrap().pre_tan_width, 2.0);
    }

    #[test]
    fn initial_regression_is_fixed_on_first_set() {
        let mut spline = Spline::new();
        spline.set_knot(bezier_knot(0.0, 0.0, 0.0, 1.8)).unwrap();
        spline.set_knot(bezier_knot(1.0, 1.0, 1.8, 0.0)).unwrap();
        assert!(spline.has_regressive_tangents(AntiRegressionMode::KeepRatio));

        let mut preventer =
            RegressionPreventer::new(&mut spline, 0.0, AntiRegressionMode::LimitActive, true)
                .unwrap();
        let original = *preventer.spline().knot_at(0.0).unwrap();
        preventer.set(original).unwrap();

        assert!(!spline.has_regressive_tangents(AntiRegressionMode::KeepRatio));
    }

    #[test]
    fn contain_mode_clamps_each_tangent() {
        let mut spline = three_knot_spline();
        let mut preventer =
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::Contain, true)
                .unwrap();

        let proposed = bezier_knot(1.0, 1.0, 2.5, 0.4);
        let result = preventer.set(proposed).unwrap();
        assert!(result.pre_active_adjusted);
        assert!(!result.post_active_adjusted);
        assert_relative_eq!(spline.knot_at(1.0).unwrap().pre_tan_width, 1.0);
        assert_eq!(spline.knot_at(1.0).unwrap().post_tan_width, 0.4);
    }

    #[test]
    fn neighbor_restored_after_crossing_and_returning() {
        let mut spline = Spline::new();
        spline.set_knot(bezier_knot(0.0, 0.0, 0.0, 0.8)).unwrap();
        spline.set_knot(bezier_knot(1.0, 1.0, 0.3, 0.3)).unwrap();
        spline.set_knot(bezier_knot(2.0, 2.0, 0.3, 0.0)).unwrap();
        let mut preventer =
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::LimitOpposite, true)
                .unwrap();

        // Drag a long pre-tangent, forcing the pre neighbor's post-tangent
        // to shorten.
        let result = preventer.set(bezier_knot(1.0, 1.0, 1.2, 0.3)).unwrap();
        assert!(result.pre_opposite_adjusted);
        let shortened = preventer.spline().knot_at(0.0).unwrap().post_tan_width;
        assert!(shortened < 0.8);

        // Drag past the post neighbor.  The pre neighbor must come back to
        // its pre-drag width (as latched after initial adjustment).
        preventer.set(bezier_knot(2.5, 1.0, 0.1, 0.1)).unwrap();
        assert_eq!(spline.knot_at(0.0).unwrap().post_tan_width, 0.8);
        assert!(spline.knot_at(2.5).is_some());
        assert!(spline.knot_at(1.0).is_none());
    }

    #[test]
    fn overwritten_knot_is_restored_when_drag_moves_on() {
        let mut spline = three_knot_spline();
        let mut preventer =
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::KeepRatio, true)
                .unwrap();

        // Drag exactly onto the post neighbor, overwriting it.
        preventer.set(bezier_knot(2.0, 5.0, 0.1, 0.1)).unwrap();
        assert_eq!(preventer.spline().knot_at(2.0).unwrap().value, 5.0);
        assert_eq!(preventer.spline().len(), 2);

        // Drag away again.  The overwritten knot reappears.
        preventer.set(bezier_knot(1.5, 5.0, 0.1, 0.1)).unwrap();
        assert_eq!(spline.knot_at(2.0).unwrap().value, 2.0);
        assert_eq!(spline.len(), 3);
    }

    #[test]
    fn disabled_mode_writes_regressive_proposal() {
        let mut spline = three_knot_spline();
        let mut preventer =
            RegressionPreventer::new(&mut spline, 1.0, AntiRegressionMode::None, true).unwrap();

        let result = preventer.set(bezier_knot(1.0, 1.0, 3.0, 3.0)).unwrap();
        assert!(!result.adjusted);
        assert_eq!(spline.knot_at(1.0).unwrap().pre_tan_width, 3.0);
        assert!(spline.has_regressive_tangents(AntiRegressionMode::KeepRatio));
    }
}
