//! Segment evaluation: Bezier cubic math, closed-form root finding, and the
//! main position analysis over a spline's knot sequence.

use crate::{
    knot::KnotData,
    loops::LoopResolver,
    regression,
    spline::SplineData,
    types::{AntiRegressionMode, CurveFamily, Extrapolation, Interp, Time},
    value::Sample,
};

/// What quantity an evaluation computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EvalAspect {
    Value,
    /// Value as if every segment were held.
    HeldValue,
    Derivative,
}

/// Which side of a discontinuity to evaluate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EvalLocation {
    Pre,
    AtOrPost,
}

////////////////////////////////////////////////////////////////////////////
// Bezier math

/// Quadratic in power form, f(t) = at^2 + bt + c.  May be a cubic's
/// derivative, or a degenerate cubic.
#[derive(Clone, Copy, Debug, Default)]
struct Quadratic {
    a: f64,
    b: f64,
    c: f64,
}

impl Quadratic {
    fn eval(&self, t: f64) -> f64 {
        t * (t * self.a + self.b) + self.c
    }
}

/// Cubic in power form, f(t) = at^3 + bt^2 + ct + d.  One of a Bezier's two
/// parametric functions, either time x(t) or value y(t).
#[derive(Clone, Copy, Debug, Default)]
struct Cubic {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl Cubic {
    /// Coefficients from Bezier control points: segment start, start
    /// tangent endpoint, end tangent endpoint, segment end.
    fn from_points(p0: f64, p1: f64, p2: f64, p3: f64) -> Self {
        Self {
            a: -p0 + 3.0 * p1 - 3.0 * p2 + p3,
            b: 3.0 * p0 - 6.0 * p1 + 3.0 * p2,
            c: -3.0 * p0 + 3.0 * p1,
            d: p0,
        }
    }

    fn eval(&self, t: f64) -> f64 {
        t * (t * (t * self.a + self.b) + self.c) + self.d
    }

    fn derivative(&self) -> Quadratic {
        // Power rule.
        Quadratic {
            a: 3.0 * self.a,
            b: 2.0 * self.b,
            c: self.c,
        }
    }
}

fn real_cube_root(x: f64) -> f64 {
    const ONE_THIRD: f64 = 1.0 / 3.0;
    if x >= 0.0 {
        x.powf(ONE_THIRD)
    } else {
        -(-x).powf(ONE_THIRD)
    }
}

/// Of the candidate roots, return the one in [0, 1].  The monotonic
/// assumption guarantees exactly one; if that is violated we have a modeling
/// bug, so log and fall back rather than crash.
fn filter_zeroes(candidates: &[f64]) -> f64 {
    let mut result = 0.0;
    let mut num_found = 0;

    for &c in candidates {
        if (0.0..=1.0).contains(&c) {
            result = c;
            num_found += 1;
        }
    }

    if num_found != 1 {
        tracing::warn!(?candidates, num_found, "expected exactly one root in [0, 1]");
    }
    result
}

/// Find the unique t in [0, 1] where the quadratic is zero, given that the
/// caller has ensured the function is monotonically increasing on [0, 1]
/// and its range includes zero.  Quadratic formula.
fn monotonic_zero_quadratic(quad: &Quadratic) -> f64 {
    let discrim = (quad.b * quad.b - 4.0 * quad.a * quad.c).sqrt();
    let root0 = (-quad.b - discrim) / (2.0 * quad.a);
    let root1 = (-quad.b + discrim) / (2.0 * quad.a);
    filter_zeroes(&[root0, root1])
}

/// Find the unique real t in [0, 1] satisfying t^3 + bt^2 + ct + d = 0,
/// given that the function is monotonically increasing.  Cardano's
/// algorithm; see e.g. https://pomax.github.io/bezierinfo/#yforx (what that
/// reference calls (a, b, c, d), we call (b, c, d, a)).
fn monotonic_zero_normalized(b: f64, c: f64, d: f64) -> f64 {
    let p = (3.0 * c - b * b) / 3.0;
    let p3 = p / 3.0;
    let p33 = p3 * p3 * p3;
    let q = (2.0 * b * b * b - 9.0 * b * c + 27.0 * d) / 27.0;
    let q2 = q / 2.0;
    let discrim = q2 * q2 + p33;
    let b3 = b / 3.0;

    if discrim < 0.0 {
        // Three real roots, via the trigonometric method.
        let r = (-p33).sqrt();
        let t = -q / (2.0 * r);
        let phi = t.clamp(-1.0, 1.0).acos();
        let t1 = 2.0 * real_cube_root(r);
        let root1 = t1 * (phi / 3.0).cos() - b3;
        let root2 = t1 * ((phi + 2.0 * std::f64::consts::PI) / 3.0).cos() - b3;
        let root3 = t1 * ((phi + 4.0 * std::f64::consts::PI) / 3.0).cos() - b3;
        filter_zeroes(&[root1, root2, root3])
    } else if discrim == 0.0 {
        // Two real roots (one repeated).
        let u1 = -real_cube_root(q2);
        let root1 = 2.0 * u1 - b3;
        let root2 = -u1 - b3;
        filter_zeroes(&[root1, root2])
    } else {
        // One real root, via Cardano radicals.
        let sd = discrim.sqrt();
        let u1 = real_cube_root(sd - q2);
        let v1 = real_cube_root(sd + q2);
        u1 - v1 - b3
    }
}

/// Find the unique t in [0, 1] where the cubic is zero, given that the
/// caller has ensured the function is monotonically increasing on [0, 1]
/// and its range includes zero.
fn monotonic_zero(cubic: &Cubic) -> f64 {
    // Fairly arbitrary tininess constant, not tuned carefully.  We can lose
    // precision in some cases if this is too small or too big.
    const EPSILON: f64 = 1e-10;

    let a_zero = cubic.a.abs() <= EPSILON;
    let b_zero = cubic.b.abs() <= EPSILON;
    let c_zero = cubic.c.abs() <= EPSILON;

    // A constant function has no zeroes.  Should never happen.
    if a_zero && b_zero && c_zero {
        tracing::warn!("cannot find zero of constant function");
        return 0.0;
    }

    // Linearity makes the cubic and quadratic formulas degenerate.
    if a_zero && b_zero {
        return -cubic.d / cubic.c;
    }

    // Quadraticity makes the cubic formula degenerate.
    if a_zero {
        return monotonic_zero_quadratic(&Quadratic {
            a: cubic.b,
            b: cubic.c,
            c: cubic.d,
        });
    }

    // Scale the curve to force the t^3 coefficient to 1, which simplifies
    // the math without changing the roots.
    monotonic_zero_normalized(cubic.b / cubic.a, cubic.c / cubic.a, cubic.d / cubic.a)
}

fn eval_bezier(
    begin_in: &KnotData,
    end_in: &KnotData,
    time: Time,
    aspect: EvalAspect,
) -> f64 {
    // If the segment is regressive, de-regress it.  Eval-time behavior
    // always uses the Keep Ratio strategy; the stored knots are untouched.
    let mut begin = *begin_in;
    let mut end = *end_in;
    regression::process_segment(&mut begin, &mut end, AntiRegressionMode::KeepRatio);

    // Coefficients for x = f(t), offset by the eval time so that we can
    // just find a zero.
    let time_cubic = Cubic::from_points(
        begin.time - time,
        begin.time + begin.post_tan_width - time,
        end.time - end.pre_tan_width - time,
        end.time - time,
    );

    // The t-value at which we reach the eval time.
    let t = monotonic_zero(&time_cubic);

    // t should always be in [0, 1], but tolerate some slight imprecision.
    const EPSILON: f64 = 1e-10;
    if t <= 0.0 {
        if t <= -EPSILON {
            tracing::warn!(t, "solved parameter below range");
        }
        return begin.value;
    } else if t >= 1.0 {
        if t >= 1.0 + EPSILON {
            tracing::warn!(t, "solved parameter above range");
        }
        return end.value;
    }

    // Coefficients for y = f(t).
    let value_cubic = Cubic::from_points(
        begin.value,
        begin.value + begin.post_tan_height(),
        end.pre_value() + end.pre_tan_height(),
        end.pre_value(),
    );

    if aspect == EvalAspect::Value {
        value_cubic.eval(t)
    } else {
        // dy/dx as the quotient of parametric derivatives dy/dt / dx/dt.
        let value_deriv = value_cubic.derivative();
        let time_deriv = time_cubic.derivative();
        value_deriv.eval(t) / time_deriv.eval(t)
    }
}

fn eval_hermite(
    _begin: &KnotData,
    _end: &KnotData,
    _time: Time,
    _aspect: EvalAspect,
) -> f64 {
    tracing::warn!("Hermite evaluation is not yet implemented");
    0.0
}

////////////////////////////////////////////////////////////////////////////
// Eval helpers

/// Implicit slope from one knot to another in a linear segment, based on
/// times and values rather than tangents.
fn segment_slope(begin: &KnotData, end: &KnotData) -> f64 {
    (end.pre_value() - begin.value) / (end.time - begin.time)
}

/// Slope in an extrapolation region.  `end_knot` is the first or last knot;
/// `adjacent` is its inward neighbor (ignored unless extrapolation is
/// Linear and there are multiple knots).
fn extrapolation_slope(
    extrap: &Extrapolation,
    have_multiple_knots: bool,
    end_knot: &KnotData,
    adjacent: &KnotData,
    location: EvalLocation,
) -> Option<f64> {
    match extrap {
        Extrapolation::ValueBlock => return None,
        Extrapolation::Held => return Some(0.0),
        Extrapolation::Sloped(slope) => return Some(*slope),
        _ => {}
    }

    // With a single knot, the slope is flat.
    if !have_multiple_knots {
        return Some(0.0);
    }

    // Otherwise extrapolation is Linear (extrapolating loops are resolved
    // before we get here), and the slope depends on the adjacent segment.
    if *extrap != Extrapolation::Linear {
        tracing::warn!(?extrap, "unexpected extrapolation mode");
        return Some(0.0);
    }

    // A dual-valued boundary knot gives a flat slope.
    if end_knot.dual_valued {
        return Some(0.0);
    }

    if location == EvalLocation::Pre {
        match end_knot.next_interp {
            // Held first segment: flat.
            Interp::Held => Some(0.0),
            // Linear first segment: the straight line between the first two
            // knots.
            Interp::Linear => Some(segment_slope(end_knot, adjacent)),
            // Curved: continue the inward-facing side of the first knot.
            _ => Some(end_knot.post_tan_slope),
        }
    } else {
        match adjacent.next_interp {
            Interp::Held => Some(0.0),
            Interp::Linear => Some(segment_slope(adjacent, end_knot)),
            _ => Some(end_knot.pre_tan_slope),
        }
    }
}

/// Extrapolate a straight line from a knot.
fn extrapolate_linear(knot: &KnotData, slope: f64, time: Time, location: EvalLocation) -> f64 {
    if location == EvalLocation::Pre {
        knot.pre_value() - slope * (knot.time - time)
    } else {
        knot.value + slope * (time - knot.time)
    }
}

////////////////////////////////////////////////////////////////////////////
// Main evaluation

/// Interpolate between two knots.
fn interpolate(
    begin: &KnotData,
    end: &KnotData,
    time: Time,
    aspect: EvalAspect,
) -> Option<f64> {
    // Held evaluation treats every segment as held.
    if aspect == EvalAspect::HeldValue {
        return Some(begin.value);
    }

    match begin.next_interp {
        Interp::Curve => {
            if begin.curve_family == CurveFamily::Bezier {
                Some(eval_bezier(begin, end, time, aspect))
            } else {
                Some(eval_hermite(begin, end, time, aspect))
            }
        }
        Interp::Held => Some(if aspect == EvalAspect::Value {
            begin.value
        } else {
            0.0
        }),
        Interp::Linear => {
            let slope = segment_slope(begin, end);
            if aspect == EvalAspect::Derivative {
                return Some(slope);
            }
            Some(extrapolate_linear(begin, slope, time, EvalLocation::AtOrPost))
        }
        Interp::ValueBlock => None,
    }
}

fn eval_main<T: Sample>(
    data: &SplineData<T>,
    loop_res: &LoopResolver<'_, T>,
    aspect: EvalAspect,
) -> Option<f64> {
    let time = loop_res.eval_time();
    let location = loop_res.eval_location();
    let n = data.len();

    // Binary search for the first knot at or after the eval time, then
    // classify the position: at a knot, before the first, after the last,
    // or between two knots.
    let lb = data.lower_bound(time);
    let prev_idx = lb.checked_sub(1);
    let at_knot = lb < n && data.knot_time(lb) == time;
    let knot_idx = if at_knot { Some(lb) } else { None };
    let next_idx_raw = if at_knot { lb + 1 } else { lb };
    let next_idx = (next_idx_raw < n).then_some(next_idx_raw);
    let before_start = next_idx_raw == 0;
    let after_end = !loop_res.is_between_last_proto_and_end() && prev_idx == Some(n - 1);
    let at_first = knot_idx == Some(0);
    let at_last = knot_idx == Some(n - 1);
    let have_multiple_knots = n > 1;

    let knot_data = knot_idx.map(|i| data.knot_data(i)).unwrap_or_default();
    let prev_data = prev_idx.map(|i| data.knot_data(i)).unwrap_or_default();
    let next_data = next_idx.map(|i| data.knot_data(i)).unwrap_or_default();

    // Exactly at a knot.
    if at_knot {
        if aspect == EvalAspect::Value || aspect == EvalAspect::HeldValue {
            // Pre-value after a held segment is the previous knot's value.
            if location == EvalLocation::Pre
                && !at_first
                && prev_data.next_interp == Interp::Held
            {
                return Some(prev_data.value);
            }

            // Not a special case.  Return what's stored in the knot.
            return Some(if location == EvalLocation::Pre {
                knot_data.pre_value()
            } else {
                knot_data.value
            });
        }

        // Derivatives.
        if location == EvalLocation::Pre {
            // Pre-derivative at the first knot is the extrapolation slope.
            if at_first {
                return extrapolation_slope(
                    data.pre_extrapolation(),
                    have_multiple_knots,
                    &knot_data,
                    &next_data,
                    EvalLocation::Pre,
                );
            }
            if prev_data.next_interp == Interp::Held {
                return Some(0.0);
            }
            if prev_data.next_interp == Interp::Linear {
                return Some(segment_slope(&prev_data, &knot_data));
            }
            return Some(knot_data.pre_tan_slope);
        } else {
            // Post-derivative at the last knot is the extrapolation slope.
            if at_last {
                return extrapolation_slope(
                    data.post_extrapolation(),
                    have_multiple_knots,
                    &knot_data,
                    &prev_data,
                    EvalLocation::AtOrPost,
                );
            }
            if knot_data.next_interp == Interp::Held {
                return Some(0.0);
            }
            if knot_data.next_interp == Interp::Linear {
                return Some(segment_slope(&knot_data, &next_data));
            }
            return Some(knot_data.post_tan_slope);
        }
    }

    // Extrapolate before the first knot.
    if before_start {
        // next_data is the first knot; we also need the one after, if any.
        let mut next_data = next_data;
        let mut next_data2 = (n > 1).then(|| data.knot_data(1)).unwrap_or_default();
        loop_res.replace_pre_extrap_knots(&mut next_data, &mut next_data2);

        if aspect == EvalAspect::HeldValue {
            return Some(next_data.pre_value());
        }

        let slope = extrapolation_slope(
            data.pre_extrapolation(),
            have_multiple_knots,
            &next_data,
            &next_data2,
            EvalLocation::Pre,
        )?;

        if aspect == EvalAspect::Derivative {
            return Some(slope);
        }
        return Some(extrapolate_linear(&next_data, slope, time, EvalLocation::Pre));
    }

    // Extrapolate after the last knot.
    if after_end {
        // prev_data is the last knot; we also need the one before, if any.
        let mut prev_data = prev_data;
        let mut prev_data2 = (n > 1).then(|| data.knot_data(n - 2)).unwrap_or_default();
        loop_res.replace_post_extrap_knots(&mut prev_data, &mut prev_data2);

        if aspect == EvalAspect::HeldValue {
            return Some(prev_data.value);
        }

        let slope = extrapolation_slope(
            data.post_extrapolation(),
            have_multiple_knots,
            &prev_data,
            &prev_data2,
            EvalLocation::AtOrPost,
        )?;

        if aspect == EvalAspect::Derivative {
            return Some(slope);
        }
        return Some(extrapolate_linear(
            &prev_data,
            slope,
            time,
            EvalLocation::AtOrPost,
        ));
    }

    // Otherwise we are between knots.  Account for loop-boundary cases,
    // then interpolate.
    let mut prev_data = prev_data;
    let mut next_data = next_data;
    loop_res.replace_boundary_knots(&mut prev_data, &mut next_data);
    interpolate(&prev_data, &next_data, time, aspect)
}

/// Evaluation entry point.  Returns `None` only for empty splines and
/// value-blocked regions.
pub(crate) fn eval<T: Sample>(
    data: &SplineData<T>,
    time: Time,
    aspect: EvalAspect,
    location: EvalLocation,
) -> Option<f64> {
    if data.is_empty() {
        return None;
    }

    // If loops are in use and we're evaluating in an echo region, figure
    // out time and value shifts, and special interpolation cases.
    let loop_res = LoopResolver::new(data, time, aspect, location);

    let result = eval_main(data, &loop_res, aspect)?;

    // Apply value offset and/or negation, if applicable.
    Some((result + loop_res.value_offset()) * if loop_res.negate() { -1.0 } else { 1.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Solve x(t) = x on the normalized segment [0, 1] with the given
    // normalized tangent widths, returning (t, x(t)) computed back through
    // the unoffset cubic.
    fn solve(w1: f64, w2: f64, x: f64) -> (f64, f64) {
        let offset = Cubic::from_points(0.0 - x, w1 - x, (1.0 - w2) - x, 1.0 - x);
        let t = monotonic_zero(&offset);
        let plain = Cubic::from_points(0.0, w1, 1.0 - w2, 1.0);
        (t, plain.eval(t))
    }

    #[test]
    fn linear_degenerate_segment_solves_exactly() {
        // Widths of exactly one third make x(t) = t.
        for x in [0.1, 0.5, 0.9] {
            let (t, xt) = solve(1.0 / 3.0, 1.0 / 3.0, x);
            assert_relative_eq!(t, x, epsilon = 1e-12);
            assert_relative_eq!(xt, x, epsilon = 1e-12);
        }
    }

    #[test]
    fn quadratic_degenerate_segment_solves() {
        // Widths summing to 2/3 zero the cubic coefficient.
        let (w1, w2) = (0.2, 2.0 / 3.0 - 0.2);
        for x in [0.05, 0.4, 0.95] {
            let (t, xt) = solve(w1, w2, x);
            assert!((0.0..=1.0).contains(&t));
            assert_relative_eq!(xt, x, epsilon = 1e-9);
        }
    }

    #[test]
    fn general_cubic_solves_and_is_monotonic() {
        for (w1, w2) in [(0.5, 0.5), (0.9, 0.1), (1.2, 0.2), (0.0, 1.0)] {
            let mut last_t = -1.0;
            for i in 1..20 {
                let x = f64::from(i) / 20.0;
                let (t, xt) = solve(w1, w2, x);
                assert_relative_eq!(xt, x, epsilon = 1e-9);
                assert!(
                    t > last_t,
                    "parameter not monotonic for widths ({w1}, {w2})"
                );
                last_t = t;
            }
        }
    }

    #[test]
    fn bezier_regressive_segment_is_deregressed_on_the_fly() {
        // Both tangents far too long; evaluation must still be single-valued
        // and hit the endpoints' neighborhood monotonically.
        let begin = KnotData {
            time: 0.0,
            value: 0.0,
            post_tan_width: 4.0,
            ..KnotData::default()
        };
        let end = KnotData {
            time: 1.0,
            value: 1.0,
            pre_tan_width: 4.0,
            ..KnotData::default()
        };
        let mut last = f64::NEG_INFINITY;
        for i in 1..10 {
            let x = f64::from(i) / 10.0;
            let v = eval_bezier(&begin, &end, x, EvalAspect::Value);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn bezier_derivative_matches_difference_quotient() {
        let begin = KnotData {
            time: 0.0,
            value: 0.0,
            post_tan_width: 0.4,
            post_tan_slope: 0.0,
            ..KnotData::default()
        };
        let end = KnotData {
            time: 2.0,
            value: 1.0,
            pre_tan_width: 0.4,
            pre_tan_slope: 0.0,
            ..KnotData::default()
        };
        let h = 1e-6;
        for x in [0.5, 1.0, 1.3] {
            let d = eval_bezier(&begin, &end, x, EvalAspect::Derivative);
            let v0 = eval_bezier(&begin, &end, x - h, EvalAspect::Value);
            let v1 = eval_bezier(&begin, &end, x + h, EvalAspect::Value);
            assert_relative_eq!(d, (v1 - v0) / (2.0 * h), epsilon = 1e-4);
        }
    }

    #[test]
    fn extrapolation_slope_special_cases() {
        let mut first = KnotData {
            time: 0.0,
            value: 0.0,
            next_interp: Interp::Linear,
            ..KnotData::default()
        };
        let second = KnotData {
            time: 2.0,
            value: 4.0,
            ..KnotData::default()
        };

        // Linear extrapolation takes the first segment's slope.
        assert_eq!(
            extrapolation_slope(
                &Extrapolation::Linear,
                true,
                &first,
                &second,
                EvalLocation::Pre
            ),
            Some(2.0)
        );

        // Held first segment: flat.
        first.next_interp = Interp::Held;
        assert_eq!(
            extrapolation_slope(
                &Extrapolation::Linear,
                true,
                &first,
                &second,
                EvalLocation::Pre
            ),
            Some(0.0)
        );

        // Dual-valued boundary knot: flat.
        first.next_interp = Interp::Linear;
        first.dual_valued = true;
        assert_eq!(
            extrapolation_slope(
                &Extrapolation::Linear,
                true,
                &first,
                &second,
                EvalLocation::Pre
            ),
            Some(0.0)
        );

        // Value block: no slope at all.
        assert_eq!(
            extrapolation_slope(
                &Extrapolation::ValueBlock,
                true,
                &first,
                &second,
                EvalLocation::Pre
            ),
            None
        );

        // Sloped: stored slope.
        assert_eq!(
            extrapolation_slope(
                &Extrapolation::Sloped(7.0),
                true,
                &first,
                &second,
                EvalLocation::Pre
            ),
            Some(7.0)
        );
    }
}
