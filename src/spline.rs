//! The spline container: an ordered knot sequence with extrapolation and
//! looping parameters, behind a copy-on-write handle.

use std::sync::Arc;

use crate::{
    error::{SplineError, SplineResult},
    eval::{self, EvalAspect, EvalLocation},
    knot::{Knot, KnotData},
    regression,
    types::{AntiRegressionMode, CurveFamily, Extrapolation, LoopParams, Time},
    value::{Sample, ValueType},
};

/// The authored state of a spline.  Shared between spline handles until one
/// of them writes.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(bound = "T: Sample")]
pub(crate) struct SplineData<T: Sample> {
    /// Knots, strictly ordered by time.
    pub knots: Vec<Knot<T>>,
    pub curve_family: CurveFamily,
    pub pre_extrapolation: Extrapolation,
    pub post_extrapolation: Extrapolation,
    pub loop_params: Option<LoopParams>,
    /// Whether values on the value axis are themselves times.  Hosts use
    /// this to apply time-unit scaling; evaluation ignores it.
    pub time_valued: bool,
}

impl<T: Sample> Default for SplineData<T> {
    fn default() -> Self {
        Self {
            knots: Vec::new(),
            curve_family: CurveFamily::Bezier,
            pre_extrapolation: Extrapolation::Held,
            post_extrapolation: Extrapolation::Held,
            loop_params: None,
            time_valued: false,
        }
    }
}

impl<T: Sample> SplineData<T> {
    pub fn len(&self) -> usize {
        self.knots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    pub fn knot_time(&self, index: usize) -> Time {
        self.knots[index].time
    }

    pub fn knot_data(&self, index: usize) -> KnotData {
        self.knots[index].data()
    }

    /// Index of the first knot at or after `time`.
    pub fn lower_bound(&self, time: Time) -> usize {
        self.knots.partition_point(|k| k.time < time)
    }

    /// Lower bound over the suffix starting at `start`.
    pub fn lower_bound_from(&self, start: usize, time: Time) -> usize {
        start + self.knots[start..].partition_point(|k| k.time < time)
    }

    /// Lower bound over `[start, end)`.
    pub fn lower_bound_in(&self, start: usize, end: usize, time: Time) -> usize {
        start + self.knots[start..end].partition_point(|k| k.time < time)
    }

    /// Index of the first knot strictly after `time`, searching the suffix
    /// starting at `start`.
    pub fn upper_bound_from(&self, start: usize, time: Time) -> usize {
        start + self.knots[start..].partition_point(|k| k.time <= time)
    }

    pub fn pre_extrapolation(&self) -> &Extrapolation {
        &self.pre_extrapolation
    }

    pub fn post_extrapolation(&self) -> &Extrapolation {
        &self.post_extrapolation
    }

    /// Loop params, which the caller has already determined to be present.
    pub fn loop_params_unchecked(&self) -> &LoopParams {
        self.loop_params.as_ref().unwrap_or(&DEFAULT_LOOP_PARAMS)
    }

    /// Validate a whole data set at once, as deserialized input requires:
    /// every knot valid and family-consistent, times strictly increasing,
    /// loop params finite.
    pub fn check(&self) -> SplineResult<()> {
        let mut last_time: Option<Time> = None;
        for knot in &self.knots {
            knot.validate()?;
            if knot.curve_family != self.curve_family {
                return Err(SplineError::validation(
                    "knot curve family does not match spline",
                ));
            }
            if last_time.is_some_and(|last| last >= knot.time) {
                return Err(SplineError::validation(
                    "knot times not strictly increasing",
                ));
            }
            last_time = Some(knot.time);
        }
        if let Some(lp) = &self.loop_params {
            if !lp.proto_start.is_finite()
                || !lp.proto_end.is_finite()
                || !lp.value_offset.is_finite()
            {
                return Err(SplineError::validation("loop params must be finite"));
            }
        }
        Ok(())
    }

    /// If inner looping is validly enabled, the index of the knot at the
    /// prototype start.  Inner looping takes effect only when the prototype
    /// span is positive, at least one loop count is positive, and a knot
    /// lies exactly at the prototype start.
    pub fn inner_loop_proto_index(&self) -> Option<usize> {
        let lp = self.loop_params.as_ref()?;
        if lp.proto_end <= lp.proto_start {
            return None;
        }
        if lp.num_pre_loops == 0 && lp.num_post_loops == 0 {
            return None;
        }
        let idx = self.lower_bound(lp.proto_start);
        (idx < self.len() && self.knots[idx].time == lp.proto_start).then_some(idx)
    }
}

static DEFAULT_LOOP_PARAMS: LoopParams = LoopParams {
    proto_start: 0.0,
    proto_end: 0.0,
    num_pre_loops: 0,
    num_post_loops: 0,
    value_offset: 0.0,
};

/// A time-to-value curve built from knots.
///
/// `Spline` is a copy-on-write handle: clones share storage, and the first
/// mutation through a handle detaches a private copy.  Clones are therefore
/// cheap and safe to send across threads.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(bound = "T: Sample")]
pub struct Spline<T: Sample> {
    data: Arc<SplineData<T>>,
}

// Deserialization must uphold the same store invariants the mutating API
// enforces, so it goes through a full check rather than the derive.
impl<'de, T: Sample> serde::Deserialize<'de> for Spline<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(bound = "T: Sample")]
        struct Raw<T: Sample> {
            data: Arc<SplineData<T>>,
        }

        let raw = Raw::<T>::deserialize(deserializer)?;
        raw.data.check().map_err(serde::de::Error::custom)?;
        Ok(Self { data: raw.data })
    }
}

impl<T: Sample> Default for Spline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample> Spline<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(SplineData::default()),
        }
    }

    /// The numeric precision of this spline's value axis.
    pub fn value_type(&self) -> ValueType {
        T::VALUE_TYPE
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// All knots, ordered by time.
    pub fn knots(&self) -> &[Knot<T>] {
        &self.data.knots
    }

    /// The knot exactly at `time`, if any.
    pub fn knot_at(&self, time: Time) -> Option<&Knot<T>> {
        let idx = self.data.lower_bound(time);
        self.data
            .knots
            .get(idx)
            .filter(|k| k.time == time)
    }

    /// Insert a knot, replacing any existing knot at the same time.  The
    /// knot's curve family must match the spline's.
    #[tracing::instrument(level = "trace", skip(self, knot), fields(time = knot.time))]
    pub fn set_knot(&mut self, knot: Knot<T>) -> SplineResult<()> {
        knot.validate()?;
        if knot.curve_family != self.data.curve_family {
            return Err(SplineError::validation(
                "knot curve family does not match spline",
            ));
        }
        let data = Arc::make_mut(&mut self.data);
        let idx = data.knots.partition_point(|k| k.time < knot.time);
        if idx < data.knots.len() && data.knots[idx].time == knot.time {
            data.knots[idx] = knot;
        } else {
            data.knots.insert(idx, knot);
        }
        Ok(())
    }

    /// Remove and return the knot exactly at `time`, if any.
    pub fn remove_knot(&mut self, time: Time) -> Option<Knot<T>> {
        let idx = self.data.lower_bound(time);
        if idx < self.data.len() && self.data.knot_time(idx) == time {
            let data = Arc::make_mut(&mut self.data);
            Some(data.knots.remove(idx))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        if !self.data.is_empty() {
            Arc::make_mut(&mut self.data).knots.clear();
        }
    }

    pub fn curve_family(&self) -> CurveFamily {
        self.data.curve_family
    }

    /// Change the curve family.  Only allowed while the spline is empty;
    /// the family is fixed once knots exist.
    pub fn set_curve_family(&mut self, family: CurveFamily) -> SplineResult<()> {
        if !self.is_empty() && family != self.data.curve_family {
            return Err(SplineError::validation(
                "cannot change curve family of a non-empty spline",
            ));
        }
        Arc::make_mut(&mut self.data).curve_family = family;
        Ok(())
    }

    /// Whether inner looping is validly enabled (positive prototype span, a
    /// positive loop count, and a knot exactly at the prototype start).
    pub fn has_inner_loops(&self) -> bool {
        self.data.inner_loop_proto_index().is_some()
    }

    pub fn pre_extrapolation(&self) -> Extrapolation {
        self.data.pre_extrapolation
    }

    pub fn post_extrapolation(&self) -> Extrapolation {
        self.data.post_extrapolation
    }

    pub fn set_pre_extrapolation(&mut self, extrap: Extrapolation) {
        Arc::make_mut(&mut self.data).pre_extrapolation = extrap;
    }

    pub fn set_post_extrapolation(&mut self, extrap: Extrapolation) {
        Arc::make_mut(&mut self.data).post_extrapolation = extrap;
    }

    pub fn loop_params(&self) -> Option<LoopParams> {
        self.data.loop_params
    }

    /// Set or clear inner-loop parameters.  Params are stored as given;
    /// they only take effect when valid (see
    /// [`has_inner_loops`](Self::has_inner_loops)).
    pub fn set_loop_params(&mut self, params: Option<LoopParams>) -> SplineResult<()> {
        if let Some(lp) = &params {
            if !lp.proto_start.is_finite()
                || !lp.proto_end.is_finite()
                || !lp.value_offset.is_finite()
            {
                return Err(SplineError::validation("loop params must be finite"));
            }
        }
        Arc::make_mut(&mut self.data).loop_params = params;
        Ok(())
    }

    pub fn is_time_valued(&self) -> bool {
        self.data.time_valued
    }

    pub fn set_time_valued(&mut self, time_valued: bool) {
        Arc::make_mut(&mut self.data).time_valued = time_valued;
    }

    /// Whether a given time falls inside the effective inner-loop echo
    /// region, where authored knots are shadowed by prototype copies.
    pub fn is_time_echoed(&self, time: Time) -> bool {
        if self.data.inner_loop_proto_index().is_none() {
            return false;
        }
        let lp = self.data.loop_params_unchecked();
        lp.looped_interval().contains(time) && !lp.prototype_interval().contains(time)
    }

    ////////////////////////////////////////////////////////////////////
    // Evaluation

    /// Value at `time`.  `None` for empty splines and value-blocked
    /// regions.
    pub fn eval(&self, time: Time) -> Option<T> {
        self.eval_raw(time, EvalAspect::Value, EvalLocation::AtOrPost)
    }

    /// Value approaching `time` from the left.  Differs from `eval` at
    /// discontinuities (dual-valued knots, held segments, loop joins).
    pub fn eval_pre_value(&self, time: Time) -> Option<T> {
        self.eval_raw(time, EvalAspect::Value, EvalLocation::Pre)
    }

    /// Instantaneous slope at `time`, on the at-or-post side.
    pub fn eval_derivative(&self, time: Time) -> Option<T> {
        self.eval_raw(time, EvalAspect::Derivative, EvalLocation::AtOrPost)
    }

    /// Instantaneous slope approaching `time` from the left.
    pub fn eval_pre_derivative(&self, time: Time) -> Option<T> {
        self.eval_raw(time, EvalAspect::Derivative, EvalLocation::Pre)
    }

    /// Value at `time` as if every segment were held.
    pub fn eval_held(&self, time: Time) -> Option<T> {
        self.eval_raw(time, EvalAspect::HeldValue, EvalLocation::AtOrPost)
    }

    /// Held-evaluation value approaching `time` from the left.
    pub fn eval_pre_value_held(&self, time: Time) -> Option<T> {
        self.eval_raw(time, EvalAspect::HeldValue, EvalLocation::Pre)
    }

    fn eval_raw(&self, time: Time, aspect: EvalAspect, location: EvalLocation) -> Option<T> {
        eval::eval(&self.data, time, aspect, location).map(T::from_f64)
    }

    ////////////////////////////////////////////////////////////////////
    // Anti-regression

    /// Whether any Bezier segment of this spline is regressive under the
    /// given mode's definition.
    pub fn has_regressive_tangents(&self, mode: AntiRegressionMode) -> bool {
        if mode == AntiRegressionMode::None || self.len() < 2 {
            return false;
        }
        (0..self.len() - 1).any(|i| {
            regression::is_segment_regressive(
                &self.data.knot_data(i),
                &self.data.knot_data(i + 1),
                mode,
            )
        })
    }

    /// Shorten tangents as needed so that no segment is regressive.
    /// Returns whether anything changed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn adjust_regressive_tangents(&mut self, mode: AntiRegressionMode) -> bool {
        if mode == AntiRegressionMode::None || self.len() < 2 {
            return false;
        }

        let mut any_adjusted = false;
        for i in 0..self.len() - 1 {
            let mut start = self.data.knot_data(i);
            let mut end = self.data.knot_data(i + 1);
            if !regression::process_segment(&mut start, &mut end, mode) {
                continue;
            }
            any_adjusted = true;

            // Write back the solved widths.  Only widths change.
            let data = Arc::make_mut(&mut self.data);
            data.knots[i].post_tan_width = start.post_tan_width;
            data.knots[i + 1].pre_tan_width = end.pre_tan_width;
        }
        any_adjusted
    }

    pub(crate) fn data(&self) -> &SplineData<T> {
        &self.data
    }

    pub(crate) fn from_data(data: SplineData<T>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

/// A spline of any supported value precision, for callers that choose
/// precision at runtime.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AnySpline {
    F64(Spline<f64>),
    F32(Spline<f32>),
    F16(Spline<half::f16>),
}

macro_rules! dispatch {
    ($self:expr, $spline:ident => $body:expr) => {
        match $self {
            AnySpline::F64($spline) => $body,
            AnySpline::F32($spline) => $body,
            AnySpline::F16($spline) => $body,
        }
    };
}

impl AnySpline {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::F64(_) => ValueType::F64,
            Self::F32(_) => ValueType::F32,
            Self::F16(_) => ValueType::F16,
        }
    }

    pub fn is_empty(&self) -> bool {
        dispatch!(self, s => s.is_empty())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, s => s.len())
    }

    /// Value at `time`, widened to f64.
    pub fn eval(&self, time: Time) -> Option<f64> {
        dispatch!(self, s => s.eval(time).map(Sample::to_f64))
    }

    pub fn eval_pre_value(&self, time: Time) -> Option<f64> {
        dispatch!(self, s => s.eval_pre_value(time).map(Sample::to_f64))
    }

    pub fn eval_derivative(&self, time: Time) -> Option<f64> {
        dispatch!(self, s => s.eval_derivative(time).map(Sample::to_f64))
    }

    pub fn eval_pre_derivative(&self, time: Time) -> Option<f64> {
        dispatch!(self, s => s.eval_pre_derivative(time).map(Sample::to_f64))
    }

    pub fn eval_held(&self, time: Time) -> Option<f64> {
        dispatch!(self, s => s.eval_held(time).map(Sample::to_f64))
    }

    pub fn eval_pre_value_held(&self, time: Time) -> Option<f64> {
        dispatch!(self, s => s.eval_pre_value_held(time).map(Sample::to_f64))
    }

    pub fn has_regressive_tangents(&self, mode: AntiRegressionMode) -> bool {
        dispatch!(self, s => s.has_regressive_tangents(mode))
    }

    pub fn adjust_regressive_tangents(&mut self, mode: AntiRegressionMode) -> bool {
        dispatch!(self, s => s.adjust_regressive_tangents(mode))
    }
}

impl From<Spline<f64>> for AnySpline {
    fn from(s: Spline<f64>) -> Self {
        Self::F64(s)
    }
}

impl From<Spline<f32>> for AnySpline {
    fn from(s: Spline<f32>) -> Self {
        Self::F32(s)
    }
}

impl From<Spline<half::f16>> for AnySpline {
    fn from(s: Spline<half::f16>) -> Self {
        Self::F16(s)
    }
}
