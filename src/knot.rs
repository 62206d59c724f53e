use crate::{
    error::{SplineError, SplineResult},
    types::{CurveFamily, Interp, Time},
    value::Sample,
};

/// One authored control point of a spline.
///
/// Tangent widths are time extents and are always non-negative; tangent
/// slopes are value-per-time.  The pre-tangent points backward in time, the
/// post-tangent forward.  `pre_value` is meaningful only when `dual_valued`
/// is set, modeling a discontinuity at the knot.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(bound = "T: Sample")]
pub struct Knot<T: Sample> {
    pub time: Time,
    pub value: T,
    pub pre_value: T,
    pub dual_valued: bool,
    pub pre_tan_width: Time,
    pub post_tan_width: Time,
    pub pre_tan_slope: T,
    pub post_tan_slope: T,
    /// Interpolation of the segment between this knot and the next.
    pub next_interp: Interp,
    pub curve_family: CurveFamily,
}

impl<T: Sample> Knot<T> {
    pub fn new(time: Time, value: T) -> Self {
        Self {
            time,
            value,
            pre_value: value,
            dual_valued: false,
            pre_tan_width: 0.0,
            post_tan_width: 0.0,
            pre_tan_slope: T::zero(),
            post_tan_slope: T::zero(),
            next_interp: Interp::Curve,
            curve_family: CurveFamily::Bezier,
        }
    }

    /// The value approached from the pre side.  Equal to `value` unless the
    /// knot is dual-valued.
    pub fn pre_value(&self) -> T {
        if self.dual_valued {
            self.pre_value
        } else {
            self.value
        }
    }

    pub fn validate(&self) -> SplineResult<()> {
        if !self.time.is_finite() {
            return Err(SplineError::validation("knot time must be finite"));
        }
        if !self.value.is_finite() || !self.pre_value.is_finite() {
            return Err(SplineError::validation("knot values must be finite"));
        }
        if !self.pre_tan_slope.is_finite() || !self.post_tan_slope.is_finite() {
            return Err(SplineError::validation("tangent slopes must be finite"));
        }
        if !self.pre_tan_width.is_finite() || !self.post_tan_width.is_finite() {
            return Err(SplineError::validation("tangent widths must be finite"));
        }
        if self.pre_tan_width < 0.0 || self.post_tan_width < 0.0 {
            return Err(SplineError::validation(
                "tangent widths must be non-negative",
            ));
        }
        Ok(())
    }

    /// Snapshot this knot as the f64 working record used by evaluation.
    pub(crate) fn data(&self) -> KnotData {
        KnotData {
            time: self.time,
            value: self.value.to_f64(),
            pre_value: self.pre_value.to_f64(),
            dual_valued: self.dual_valued,
            pre_tan_width: self.pre_tan_width,
            post_tan_width: self.post_tan_width,
            pre_tan_slope: self.pre_tan_slope.to_f64(),
            post_tan_slope: self.post_tan_slope.to_f64(),
            next_interp: self.next_interp,
            curve_family: self.curve_family,
        }
    }
}

/// The precision-erased working form of a knot.  Evaluation and the
/// anti-regression solvers compute entirely in f64 and never see `T`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct KnotData {
    pub time: Time,
    pub value: f64,
    pub pre_value: f64,
    pub dual_valued: bool,
    pub pre_tan_width: Time,
    pub post_tan_width: Time,
    pub pre_tan_slope: f64,
    pub post_tan_slope: f64,
    pub next_interp: Interp,
    pub curve_family: CurveFamily,
}

impl KnotData {
    pub fn pre_value(&self) -> f64 {
        if self.dual_valued {
            self.pre_value
        } else {
            self.value
        }
    }

    /// Value delta of the pre-tangent endpoint relative to the knot's
    /// pre-value.  The pre-tangent extends backward in time, so a positive
    /// slope lowers the endpoint.
    pub fn pre_tan_height(&self) -> f64 {
        -self.pre_tan_width * self.pre_tan_slope
    }

    /// Value delta of the post-tangent endpoint relative to the knot value.
    pub fn post_tan_height(&self) -> f64 {
        self.post_tan_width * self.post_tan_slope
    }
}

impl Default for KnotData {
    fn default() -> Self {
        Self {
            time: 0.0,
            value: 0.0,
            pre_value: 0.0,
            dual_valued: false,
            pre_tan_width: 0.0,
            post_tan_width: 0.0,
            pre_tan_slope: 0.0,
            post_tan_slope: 0.0,
            next_interp: Interp::Curve,
            curve_family: CurveFamily::Bezier,
        }
    }
}
