/// Time coordinate of the spline's parameter axis, in arbitrary units
/// (typically frames or seconds; the library does not care which).
pub type Time = f64;

/// Interpolation of the segment that follows a knot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Interp {
    /// Flat continuation of the previous knot's value.
    Held,
    /// Straight line between the bracketing knot values.
    Linear,
    /// Curve math per the spline's curve family.
    Curve,
    /// No value in this segment.
    ValueBlock,
}

/// The curve family used by `Interp::Curve` segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CurveFamily {
    Bezier,
    Hermite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LoopMode {
    /// Each iteration continues from the previous one's end value.
    Repeat,
    /// Every other iteration is reflected in time.
    Oscillate,
    /// Each iteration restarts at the start value, with a discontinuity.
    Reset,
}

/// Behavior before the first knot / after the last knot.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Extrapolation {
    Held,
    Linear,
    Sloped(f64),
    Loop(LoopMode),
    ValueBlock,
}

impl Extrapolation {
    pub fn is_looping(&self) -> bool {
        matches!(self, Self::Loop(_))
    }
}

/// Strategy for eliminating regression (a Bezier segment folding back in
/// time) when adjusting tangent widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AntiRegressionMode {
    /// Leave tangents alone.
    None,
    /// Clamp each tangent width to the segment width.
    Contain,
    /// Preserve the ratio of the two widths.
    KeepRatio,
    /// Hold the segment-start width fixed, solve the end width.
    KeepStart,
    /// Prefer shortening the actively edited tangent.
    LimitActive,
    /// Prefer shortening the neighbor's tangent.
    LimitOpposite,
}

/// Inner-loop parameters: a prototype sub-range of knots echoed within the
/// spline's own authored range.
///
/// Parameters are stored unconditionally but only take effect when
/// `proto_end > proto_start`, at least one loop count is positive, and a knot
/// exists exactly at `proto_start`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoopParams {
    pub proto_start: Time,
    pub proto_end: Time,
    pub num_pre_loops: u32,
    pub num_post_loops: u32,
    /// Value shift applied per echoed iteration.
    pub value_offset: f64,
}

impl LoopParams {
    pub fn prototype_span(&self) -> Time {
        self.proto_end - self.proto_start
    }

    /// The prototype range, `[proto_start, proto_end)`.  A knot exactly at
    /// `proto_end` is not part of the prototype.
    pub fn prototype_interval(&self) -> Interval {
        Interval {
            min: self.proto_start,
            max: self.proto_end,
            min_closed: true,
            max_closed: false,
        }
    }

    /// The full range covered by the prototype and its echoes, closed at
    /// both ends.
    pub fn looped_interval(&self) -> Interval {
        let span = self.prototype_span();
        Interval {
            min: self.proto_start - f64::from(self.num_pre_loops) * span,
            max: self.proto_end + f64::from(self.num_post_loops) * span,
            min_closed: true,
            max_closed: true,
        }
    }
}

/// A time interval with independently open or closed endpoints.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    pub min: Time,
    pub max: Time,
    pub min_closed: bool,
    pub max_closed: bool,
}

impl Interval {
    pub fn new(min: Time, max: Time, min_closed: bool, max_closed: bool) -> Self {
        Self {
            min,
            max,
            min_closed,
            max_closed,
        }
    }

    pub fn contains(&self, t: Time) -> bool {
        let above_min = if self.min_closed {
            t >= self.min
        } else {
            t > self.min
        };
        let below_max = if self.max_closed {
            t <= self.max
        } else {
            t < self.max
        };
        above_min && below_max
    }

    pub fn size(&self) -> Time {
        self.max - self.min
    }
}
