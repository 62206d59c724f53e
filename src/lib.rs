#![forbid(unsafe_code)]

pub mod error;
pub mod io;
pub mod knot;
pub mod preventer;
pub mod spline;
pub mod types;
pub mod value;

mod eval;
mod loops;
mod regression;

pub use error::{SplineError, SplineResult};
pub use knot::Knot;
pub use preventer::{RegressionPreventer, SetResult};
pub use regression::are_tan_widths_regressive;
pub use spline::{AnySpline, Spline};
pub use types::{
    AntiRegressionMode, CurveFamily, Extrapolation, Interp, Interval, LoopMode, LoopParams, Time,
};
pub use value::{Sample, ValueType};
