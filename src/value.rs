use half::f16;

/// Tag identifying the numeric precision of a spline's value axis.
///
/// The set is closed: a spline stores `f64`, `f32`, or `f16` values, fixed
/// for the spline's lifetime once the first knot is inserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ValueType {
    F64,
    F32,
    F16,
}

impl ValueType {
    /// Stable byte tag used in the binary format.
    pub(crate) fn wire_tag(self) -> u8 {
        match self {
            Self::F64 => 0,
            Self::F32 => 1,
            Self::F16 => 2,
        }
    }

    pub(crate) fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::F64),
            1 => Some(Self::F32),
            2 => Some(Self::F16),
            _ => None,
        }
    }
}

/// A value-axis sample type.  Implemented for exactly `f64`, `f32`, and
/// `half::f16`; the evaluation core computes in `f64` and converts at the
/// boundary.
pub trait Sample:
    Copy
    + PartialEq
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const VALUE_TYPE: ValueType;

    fn zero() -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn is_finite(self) -> bool;

    /// Append this value's native-width little-endian encoding.
    fn write_le(self, out: &mut Vec<u8>);

    /// Split one value off the front of `buf`, if enough bytes remain.
    fn read_le(buf: &[u8]) -> Option<(Self, &[u8])>;
}

impl Sample for f64 {
    const VALUE_TYPE: ValueType = ValueType::F64;

    fn zero() -> Self {
        0.0
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64) -> Self {
        v
    }

    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Option<(Self, &[u8])> {
        let (head, rest) = buf.split_first_chunk::<8>()?;
        Some((f64::from_le_bytes(*head), rest))
    }
}

impl Sample for f32 {
    const VALUE_TYPE: ValueType = ValueType::F32;

    fn zero() -> Self {
        0.0
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Option<(Self, &[u8])> {
        let (head, rest) = buf.split_first_chunk::<4>()?;
        Some((f32::from_le_bytes(*head), rest))
    }
}

impl Sample for f16 {
    const VALUE_TYPE: ValueType = ValueType::F16;

    fn zero() -> Self {
        f16::ZERO
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }

    fn is_finite(self) -> bool {
        f16::is_finite(self)
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Option<(Self, &[u8])> {
        let (head, rest) = buf.split_first_chunk::<2>()?;
        Some((f16::from_le_bytes(*head), rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_round_trip() {
        for vt in [ValueType::F64, ValueType::F32, ValueType::F16] {
            assert_eq!(ValueType::from_wire_tag(vt.wire_tag()), Some(vt));
        }
        assert_eq!(ValueType::from_wire_tag(7), None);
    }

    #[test]
    fn f16_narrows_through_f64() {
        let v = f16::from_f64(1.5);
        assert_eq!(v.to_f64(), 1.5);
        assert!(v.is_finite());
        assert!(!f16::from_f64(f64::INFINITY).is_finite());
    }

    #[test]
    fn byte_encoding_round_trips() {
        let mut buf = Vec::new();
        2.25_f64.write_le(&mut buf);
        (-8.5_f32).write_le(&mut buf);
        f16::from_f64(0.75).write_le(&mut buf);

        let (a, rest) = f64::read_le(&buf).unwrap();
        let (b, rest) = f32::read_le(rest).unwrap();
        let (c, rest) = f16::read_le(rest).unwrap();
        assert_eq!(a, 2.25);
        assert_eq!(b, -8.5);
        assert_eq!(c.to_f64(), 0.75);
        assert!(rest.is_empty());
        assert!(f64::read_le(rest).is_none());
    }
}
