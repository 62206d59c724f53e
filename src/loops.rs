//! Loop resolution: mapping evaluation times in echo regions back into the
//! authored knots, and synthesizing the boundary knots that looping implies.

use crate::{
    eval::{EvalAspect, EvalLocation},
    knot::KnotData,
    spline::SplineData,
    types::{Extrapolation, Interval, LoopMode, LoopParams, Time},
    value::Sample,
};

/// Resolves inner and extrapolating loops for one evaluation.
///
/// Construction performs all computation.  The resolver yields a shifted
/// eval time and location, a value offset to add to the result (always zero
/// for derivatives), whether the result must be negated (derivatives in
/// reflected oscillation iterations), and replacement knots for the
/// interpolation cases where the bracketing knot is an echo rather than an
/// authored knot.
///
/// When both kinds of looping are active, extrapolating loops are resolved
/// first, then inner loops.  This reverses the conceptual order of knot
/// copying, which echoes inner loops first and extrapolates from the result.
pub(crate) struct LoopResolver<'a, T: Sample> {
    data: &'a SplineData<T>,
    aspect: EvalAspect,

    eval_time: Time,
    location: EvalLocation,

    value_offset: f64,
    negate: bool,
    between_last_proto_and_end: bool,

    have_inner_loops: bool,
    first_inner_proto_index: usize,
    have_pre_extrap_loops: bool,
    have_post_extrap_loops: bool,
    first_time: Time,
    last_time: Time,
    first_time_looped: bool,
    last_time_looped: bool,
    between_pre_unlooped_and_looped: bool,
    between_looped_and_post_unlooped: bool,
    extrap_knot1: KnotData,
    extrap_knot2: KnotData,
}

impl<'a, T: Sample> LoopResolver<'a, T> {
    pub fn new(
        data: &'a SplineData<T>,
        time: Time,
        aspect: EvalAspect,
        location: EvalLocation,
    ) -> Self {
        let mut res = Self {
            data,
            aspect,
            eval_time: time,
            location,
            value_offset: 0.0,
            negate: false,
            between_last_proto_and_end: false,
            have_inner_loops: false,
            first_inner_proto_index: 0,
            have_pre_extrap_loops: false,
            have_post_extrap_loops: false,
            first_time: 0.0,
            last_time: 0.0,
            first_time_looped: false,
            last_time_looped: false,
            between_pre_unlooped_and_looped: false,
            between_looped_and_post_unlooped: false,
            extrap_knot1: KnotData::default(),
            extrap_knot2: KnotData::default(),
        };

        // Is inner looping enabled?
        if let Some(first_proto) = data.inner_loop_proto_index() {
            res.have_inner_loops = true;
            res.first_inner_proto_index = first_proto;
        }

        // We have multiple knots if there are multiple authored.  Valid
        // inner looping also always yields at least two.
        let have_multiple_knots = res.have_inner_loops || data.len() > 1;

        res.have_pre_extrap_loops =
            have_multiple_knots && data.pre_extrapolation().is_looping();
        res.have_post_extrap_loops =
            have_multiple_knots && data.post_extrapolation().is_looping();

        if !res.have_inner_loops && !res.have_pre_extrap_loops && !res.have_post_extrap_loops
        {
            return res;
        }

        // Find first and last knot times.  These may be authored, or they
        // may be echoed.
        let raw_first_time = data.knot_time(0);
        let raw_last_time = data.knot_time(data.len() - 1);
        res.first_time = raw_first_time;
        res.last_time = raw_last_time;
        if res.have_inner_loops {
            let looped = res.loop_params().looped_interval();
            if looped.min < raw_first_time {
                res.first_time = looped.min;
                res.first_time_looped = true;
            }
            if looped.max > raw_last_time {
                res.last_time = looped.max;
                res.last_time_looped = true;
            }
        }

        tracing::trace!(
            eval_time = res.eval_time,
            have_inner_loops = res.have_inner_loops,
            have_pre_extrap_loops = res.have_pre_extrap_loops,
            have_post_extrap_loops = res.have_post_extrap_loops,
            first_time_looped = res.first_time_looped,
            last_time_looped = res.last_time_looped,
            "loop resolver constructed"
        );

        if res.have_pre_extrap_loops || res.have_post_extrap_loops {
            res.resolve_extrap();
        }
        if res.have_inner_loops {
            res.resolve_inner();
        }

        res
    }

    pub fn eval_time(&self) -> Time {
        self.eval_time
    }

    pub fn eval_location(&self) -> EvalLocation {
        self.location
    }

    pub fn is_between_last_proto_and_end(&self) -> bool {
        self.between_last_proto_and_end
    }

    /// Amount to add to the value obtained at the shifted evaluation time.
    /// Always zero when evaluating derivatives.
    pub fn value_offset(&self) -> f64 {
        self.value_offset
    }

    /// Whether the result should be negated.  Occurs for derivatives in
    /// reflected iterations of oscillating loops.
    pub fn negate(&self) -> bool {
        self.negate
    }

    fn loop_params(&self) -> &LoopParams {
        // Only called when have_inner_loops, which implies presence.
        self.data.loop_params_unchecked()
    }

    fn resolve_inner(&mut self) {
        let lp = *self.loop_params();
        let looped_interval = lp.looped_interval();
        let proto_interval = lp.prototype_interval();

        // Handle evaluation in echo regions.
        if looped_interval.contains(self.eval_time)
            && !proto_interval.contains(self.eval_time)
        {
            let proto_span = proto_interval.size();

            if self.eval_time < lp.proto_start {
                // Pre-echo.  Figure out which pre-iteration we're in, and
                // hop forward to the prototype region.
                let loop_offset = lp.proto_start - self.eval_time;
                let iter_num = (loop_offset / proto_span).ceil() as i64;
                self.eval_time += iter_num as f64 * proto_span;

                if self.aspect != EvalAspect::Derivative {
                    self.value_offset -= iter_num as f64 * lp.value_offset;
                }
            } else {
                // Post-echo.  Hop backward to the prototype region.
                let loop_offset = self.eval_time - lp.proto_end;
                let iter_num = (loop_offset / proto_span) as i64 + 1;
                self.eval_time -= iter_num as f64 * proto_span;

                if self.aspect != EvalAspect::Derivative {
                    self.value_offset += iter_num as f64 * lp.value_offset;
                }
            }
        }

        // Look for special interpolation and extrapolation cases.

        let first_proto = self.first_inner_proto_index;

        if proto_interval.contains(self.eval_time) {
            // Case 1: between last prototype knot and prototype end, after
            // shifting out of any echo region.
            //
            // Find the first knot at or after the prototype end, then
            // unconditionally take the preceding knot as the last in the
            // prototype.  A knot exactly at the prototype end is not part
            // of the prototype.  It is fine if the last prototype knot is
            // also the first and only one.
            let lb = self.data.lower_bound_from(first_proto, lp.proto_end);
            let last_proto_knot_time = self.data.knot_time(lb - 1);

            if self.eval_time > last_proto_knot_time {
                self.between_last_proto_and_end = true;
            }
        } else if self.eval_time < self.first_time {
            // Case 2: pre-extrapolating, and the first knots are copies
            // made by inner looping.
            if self.first_time_looped {
                let num_pre = i64::from(lp.num_pre_loops);

                // First knot is always a copy of the first prototype knot.
                self.extrap_knot1 = self.copy_proto_knot_data(first_proto, -num_pre);

                if self.data.len() > first_proto + 1
                    && proto_interval.contains(self.data.knot_time(first_proto + 1))
                {
                    // Second knot is a copy of the second prototype knot.
                    self.extrap_knot2 =
                        self.copy_proto_knot_data(first_proto + 1, -num_pre);
                } else {
                    // There are no knots after the first prototype knot, so
                    // the second is another copy of the first.
                    self.extrap_knot2 =
                        self.copy_proto_knot_data(first_proto, -num_pre + 1);
                }
            }
        } else if self.eval_time > self.last_time {
            // Case 3: post-extrapolating, and the last knots are copies
            // made by inner looping.
            if self.last_time_looped {
                let num_post = i64::from(lp.num_post_loops);

                // Last knot is always a copy of the first prototype knot.
                self.extrap_knot1 =
                    self.copy_proto_knot_data(first_proto, num_post + 1);

                // Find the last authored prototype knot, which may also be
                // the first.  See Case 1.
                let last_proto_index =
                    self.data.lower_bound_from(first_proto, lp.proto_end) - 1;

                // Second-to-last knot is a copy of the last prototype knot.
                self.extrap_knot2 =
                    self.copy_proto_knot_data(last_proto_index, num_post);
            }
        } else if self.eval_time < looped_interval.min {
            // Case 4: between the last knot before the looping region and
            // the start of the looping region.
            //
            // Find the first authored knot at or after the start of the
            // looping region.  This may be a shadowed knot or a prototype
            // knot.
            let lb = self.data.lower_bound_in(0, first_proto, looped_interval.min);

            // If the first knot in the looping region isn't the overall
            // first knot, take the preceding one as the last pre-unlooped
            // knot.
            if lb != 0 {
                let last_pre_unlooped_knot_time = self.data.knot_time(lb - 1);
                if self.eval_time > last_pre_unlooped_knot_time {
                    self.between_pre_unlooped_and_looped = true;
                }
            }
        } else if self.eval_time > looped_interval.max {
            // Case 5: between the end of the looping region and the first
            // knot after the looping region.  (Note upper bound here rather
            // than lower bound.)
            let ub = self.data.upper_bound_from(first_proto + 1, looped_interval.max);

            if ub != self.data.len() {
                let first_post_unlooped_knot_time = self.data.knot_time(ub);
                if self.eval_time < first_post_unlooped_knot_time {
                    self.between_looped_and_post_unlooped = true;
                }
            }
        }

        tracing::trace!(
            eval_time = self.eval_time,
            value_offset = self.value_offset,
            between_last_proto_and_end = self.between_last_proto_and_end,
            between_pre_unlooped_and_looped = self.between_pre_unlooped_and_looped,
            between_looped_and_post_unlooped = self.between_looped_and_post_unlooped,
            "inner loops resolved"
        );
    }

    fn resolve_extrap(&mut self) {
        // Determine the interval that doesn't require extrapolation.  One
        // end is closed, the other open; which one depends on the eval
        // location.
        let knot_interval = Interval::new(
            self.first_time,
            self.last_time,
            self.location != EvalLocation::Pre,
            self.location == EvalLocation::Pre,
        );

        // Are we extrapolating?
        if knot_interval.contains(self.eval_time) {
            return;
        }

        // Is the extrapolation looped?
        let do_pre = self.have_pre_extrap_loops && self.eval_time < self.last_time;
        let do_post = self.have_post_extrap_loops && self.eval_time > self.first_time;
        if !do_pre && !do_post {
            return;
        }

        if do_pre {
            let extrap = *self.data.pre_extrapolation();
            self.do_extrap(&extrap, self.first_time - self.eval_time, true);
        } else {
            let extrap = *self.data.post_extrapolation();
            self.do_extrap(&extrap, self.eval_time - self.last_time, false);
        }

        tracing::trace!(
            eval_time = self.eval_time,
            value_offset = self.value_offset,
            do_pre,
            do_post,
            negate = self.negate,
            "extrapolating loops resolved"
        );
    }

    // `offset` is the distance between the evaluation time and the
    // non-extrapolating region.  Always non-negative.
    fn do_extrap(&mut self, extrapolation: &Extrapolation, offset: Time, is_pre: bool) {
        // Figure out how many whole iterations the extrapolation distance
        // covers, and whether we're exactly at an iteration boundary.
        let proto_span = self.last_time - self.first_time;
        let num_iters_frac = offset / proto_span;
        let num_iters_trunc = num_iters_frac as i64;
        let boundary = num_iters_trunc as f64 == num_iters_frac;

        // Typically we hop one more than the number of whole iterations.
        // But exactly at an iteration boundary, evaluating on the short
        // side takes up one iteration less.
        let short_offset = boundary
            && ((is_pre && self.location != EvalLocation::Pre)
                || (!is_pre && self.location == EvalLocation::Pre));
        let num_iters = if short_offset {
            num_iters_trunc
        } else {
            num_iters_trunc + 1
        };

        // Signed hop, forward or back into the non-extrapolating region.
        let iter_hop = if is_pre { num_iters } else { -num_iters };
        self.eval_time += iter_hop as f64 * proto_span;

        match extrapolation {
            // Repeat mode: each extrapolating iteration begins with the
            // value from the end of the previous one, and the offsets
            // accumulate.  The value offset moves opposite to the eval
            // time, because we hop forward to evaluate, then apply the
            // offset backward to obtain the value at the original time.
            Extrapolation::Loop(LoopMode::Repeat)
                if self.aspect != EvalAspect::Derivative =>
            {
                let extrap_value_offset = self.compute_extrap_value_offset();
                self.value_offset -= iter_hop as f64 * extrap_value_offset;
            }

            // Oscillate mode: every other iteration is reflected in time.
            Extrapolation::Loop(LoopMode::Oscillate) if iter_hop % 2 != 0 => {
                self.eval_time =
                    self.first_time + (proto_span - (self.eval_time - self.first_time));
                self.location = if self.location == EvalLocation::Pre {
                    EvalLocation::AtOrPost
                } else {
                    EvalLocation::Pre
                };
                if self.aspect == EvalAspect::Derivative {
                    self.negate = true;
                }
            }

            // Nothing special for Reset mode.  There is no value offset,
            // and each iteration resets to the start value with a
            // discontinuity, which falls out of the short-offset shifts at
            // iteration boundaries.
            _ => {}
        }
    }

    /// The value difference between the first and last knots, counting
    /// inner-loop echoes, which is the per-iteration offset of Repeat
    /// extrapolation.
    fn compute_extrap_value_offset(&self) -> f64 {
        let lp = *self.data.loop_params_unchecked();

        let first_value = if !self.first_time_looped {
            // Earliest knot is not from inner loops.  Read its value.
            self.data.knot_data(0).pre_value()
        } else {
            // Earliest knot is from inner loops.  Compute its value.
            self.data.knot_data(self.first_inner_proto_index).pre_value()
                - f64::from(lp.num_pre_loops) * lp.value_offset
        };

        let last_value = if !self.last_time_looped {
            self.data.knot_data(self.data.len() - 1).value
        } else {
            // Latest knot is the final echo of the prototype start knot.
            self.data.knot_data(self.first_inner_proto_index).value
                + f64::from(lp.num_post_loops + 1) * lp.value_offset
        };

        last_value - first_value
    }

    /// Handle the oddball interpolation cases arising from inner loops,
    /// replacing a bracketing knot with an echo copy where one applies.
    /// Extrapolating loops don't cause these cases, because their prototype
    /// region (the set of all authored knots) always includes knots at the
    /// start and end, and nothing comes before or after them.
    pub fn replace_boundary_knots(&self, prev_data: &mut KnotData, next_data: &mut KnotData) {
        if !self.have_inner_loops {
            return;
        }
        let lp = *self.loop_params();

        if self.between_last_proto_and_end {
            // Between last prototype knot and prototype end: the next knot
            // is a copy of the first prototype knot, one span later.
            *next_data =
                self.copy_proto_knot_data(self.first_inner_proto_index, 1);
        } else if self.between_pre_unlooped_and_looped {
            // Between last pre-unlooped knot and the looping region: the
            // next knot is the earliest echo of the first prototype knot.
            *next_data = self.copy_proto_knot_data(
                self.first_inner_proto_index,
                -i64::from(lp.num_pre_loops),
            );
        } else if self.between_looped_and_post_unlooped {
            // Between the looping region and the first post-unlooped knot:
            // the previous knot is the final echo of the first prototype
            // knot.
            *prev_data = self.copy_proto_knot_data(
                self.first_inner_proto_index,
                i64::from(lp.num_post_loops) + 1,
            );
        }
    }

    pub fn replace_pre_extrap_knots(&self, next_data: &mut KnotData, next_data2: &mut KnotData) {
        if !self.first_time_looped {
            return;
        }
        *next_data = self.extrap_knot1;
        *next_data2 = self.extrap_knot2;
    }

    pub fn replace_post_extrap_knots(&self, prev_data: &mut KnotData, prev_data2: &mut KnotData) {
        if !self.last_time_looped {
            return;
        }
        *prev_data = self.extrap_knot1;
        *prev_data2 = self.extrap_knot2;
    }

    /// Copy an authored knot, shifted by whole prototype spans in time and
    /// by the per-iteration value offset.
    fn copy_proto_knot_data(&self, index: usize, shift_iters: i64) -> KnotData {
        let lp = self.loop_params();
        let proto_span = lp.prototype_span();

        let mut knot_copy = self.data.knot_data(index);
        knot_copy.time += shift_iters as f64 * proto_span;

        if self.aspect != EvalAspect::Derivative {
            let offset = shift_iters as f64 * lp.value_offset;
            knot_copy.value += offset;
            if knot_copy.dual_valued {
                knot_copy.pre_value += offset;
            }
        }

        knot_copy
    }
}
