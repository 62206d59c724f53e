//! Versioned binary serialization of splines.
//!
//! The format is little-endian throughout.  A header carries the format
//! version, value precision, curve family, extrapolation, and loop
//! parameters; knots follow as fixed-layout records.  Unknown format
//! versions are a hard error, never a best-effort parse.

use crate::{
    error::{SplineError, SplineResult},
    knot::Knot,
    spline::{AnySpline, Spline, SplineData},
    types::{CurveFamily, Extrapolation, Interp, LoopMode, LoopParams},
    value::{Sample, ValueType},
};

const FORMAT_VERSION: u8 = 1;

// Spline flag bits.
const FLAG_TIME_VALUED: u8 = 1 << 0;
const FLAG_HAVE_LOOP_PARAMS: u8 = 1 << 1;

// Per-knot flag bits.  Interp occupies two bits.
const KNOT_FLAG_DUAL_VALUED: u8 = 1 << 0;
const KNOT_INTERP_SHIFT: u8 = 1;
const KNOT_INTERP_MASK: u8 = 0b11;

fn curve_family_tag(family: CurveFamily) -> u8 {
    match family {
        CurveFamily::Bezier => 0,
        CurveFamily::Hermite => 1,
    }
}

fn interp_tag(interp: Interp) -> u8 {
    match interp {
        Interp::Held => 0,
        Interp::Linear => 1,
        Interp::Curve => 2,
        Interp::ValueBlock => 3,
    }
}

fn interp_from_tag(tag: u8) -> Interp {
    match tag {
        0 => Interp::Held,
        1 => Interp::Linear,
        2 => Interp::Curve,
        _ => Interp::ValueBlock,
    }
}

fn extrap_tag(extrap: &Extrapolation) -> u8 {
    match extrap {
        Extrapolation::Held => 0,
        Extrapolation::Linear => 1,
        Extrapolation::Sloped(_) => 2,
        Extrapolation::Loop(LoopMode::Repeat) => 3,
        Extrapolation::Loop(LoopMode::Oscillate) => 4,
        Extrapolation::Loop(LoopMode::Reset) => 5,
        Extrapolation::ValueBlock => 6,
    }
}

fn write_extrap(extrap: &Extrapolation, out: &mut Vec<u8>) {
    out.push(extrap_tag(extrap));
    if let Extrapolation::Sloped(slope) = extrap {
        out.extend_from_slice(&slope.to_le_bytes());
    }
}

/// Serialize a spline to bytes.
pub fn encode<T: Sample>(spline: &Spline<T>) -> Vec<u8> {
    let data = spline.data();
    let mut out = Vec::new();

    out.push(FORMAT_VERSION);
    out.push(T::VALUE_TYPE.wire_tag());

    let mut flags = 0u8;
    if data.time_valued {
        flags |= FLAG_TIME_VALUED;
    }
    if data.loop_params.is_some() {
        flags |= FLAG_HAVE_LOOP_PARAMS;
    }
    out.push(flags);
    out.push(curve_family_tag(data.curve_family));

    write_extrap(&data.pre_extrapolation, &mut out);
    write_extrap(&data.post_extrapolation, &mut out);

    if let Some(lp) = &data.loop_params {
        out.extend_from_slice(&lp.proto_start.to_le_bytes());
        out.extend_from_slice(&lp.proto_end.to_le_bytes());
        out.extend_from_slice(&lp.num_pre_loops.to_le_bytes());
        out.extend_from_slice(&lp.num_post_loops.to_le_bytes());
        out.extend_from_slice(&lp.value_offset.to_le_bytes());
    }

    out.extend_from_slice(&(data.knots.len() as u64).to_le_bytes());
    for knot in &data.knots {
        let mut kflags = interp_tag(knot.next_interp) << KNOT_INTERP_SHIFT;
        if knot.dual_valued {
            kflags |= KNOT_FLAG_DUAL_VALUED;
        }
        out.push(kflags);

        out.extend_from_slice(&knot.time.to_le_bytes());
        knot.value.write_le(&mut out);
        if knot.dual_valued {
            knot.pre_value.write_le(&mut out);
        }
        out.extend_from_slice(&knot.pre_tan_width.to_le_bytes());
        out.extend_from_slice(&knot.post_tan_width.to_le_bytes());
        knot.pre_tan_slope.write_le(&mut out);
        knot.post_tan_slope.write_le(&mut out);
    }

    out
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn truncated() -> SplineError {
        SplineError::codec("truncated data")
    }

    fn read_u8(&mut self) -> SplineResult<u8> {
        let (&head, rest) = self.buf.split_first().ok_or_else(Self::truncated)?;
        self.buf = rest;
        Ok(head)
    }

    fn read_u32(&mut self) -> SplineResult<u32> {
        let (head, rest) = self.buf.split_first_chunk::<4>().ok_or_else(Self::truncated)?;
        self.buf = rest;
        Ok(u32::from_le_bytes(*head))
    }

    fn read_u64(&mut self) -> SplineResult<u64> {
        let (head, rest) = self.buf.split_first_chunk::<8>().ok_or_else(Self::truncated)?;
        self.buf = rest;
        Ok(u64::from_le_bytes(*head))
    }

    fn read_f64(&mut self) -> SplineResult<f64> {
        Ok(f64::from_le_bytes(self.read_u64()?.to_le_bytes()))
    }

    fn read_value<T: Sample>(&mut self) -> SplineResult<T> {
        let (value, rest) = T::read_le(self.buf).ok_or_else(Self::truncated)?;
        self.buf = rest;
        Ok(value)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn read_extrap(&mut self) -> SplineResult<Extrapolation> {
        Ok(match self.read_u8()? {
            0 => Extrapolation::Held,
            1 => Extrapolation::Linear,
            2 => Extrapolation::Sloped(self.read_f64()?),
            3 => Extrapolation::Loop(LoopMode::Repeat),
            4 => Extrapolation::Loop(LoopMode::Oscillate),
            5 => Extrapolation::Loop(LoopMode::Reset),
            6 => Extrapolation::ValueBlock,
            tag => {
                return Err(SplineError::codec(format!(
                    "unknown extrapolation tag {tag}"
                )));
            }
        })
    }
}

/// Read the header far enough to learn the encoded value precision.
fn peek_value_type(bytes: &[u8]) -> SplineResult<ValueType> {
    let mut reader = Reader::new(bytes);
    let version = reader.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(SplineError::codec(format!(
            "unsupported format version {version}"
        )));
    }
    let tag = reader.read_u8()?;
    ValueType::from_wire_tag(tag)
        .ok_or_else(|| SplineError::codec(format!("unknown value type tag {tag}")))
}

/// Deserialize a spline of a statically known precision.  Fails if the
/// bytes hold a different precision; use [`decode_any`] when the precision
/// is not known up front.
pub fn decode<T: Sample>(bytes: &[u8]) -> SplineResult<Spline<T>> {
    let value_type = peek_value_type(bytes)?;
    if value_type != T::VALUE_TYPE {
        return Err(SplineError::codec(format!(
            "value type mismatch: encoded {value_type:?}, requested {:?}",
            T::VALUE_TYPE
        )));
    }

    let mut reader = Reader::new(&bytes[2..]);
    let flags = reader.read_u8()?;
    let curve_family = match reader.read_u8()? {
        0 => CurveFamily::Bezier,
        1 => CurveFamily::Hermite,
        tag => {
            return Err(SplineError::codec(format!(
                "unknown curve family tag {tag}"
            )));
        }
    };

    let mut data = SplineData::<T> {
        curve_family,
        time_valued: flags & FLAG_TIME_VALUED != 0,
        ..SplineData::default()
    };

    data.pre_extrapolation = reader.read_extrap()?;
    data.post_extrapolation = reader.read_extrap()?;

    if flags & FLAG_HAVE_LOOP_PARAMS != 0 {
        data.loop_params = Some(LoopParams {
            proto_start: reader.read_f64()?,
            proto_end: reader.read_f64()?,
            num_pre_loops: reader.read_u32()?,
            num_post_loops: reader.read_u32()?,
            value_offset: reader.read_f64()?,
        });
    }

    let count = reader.read_u64()? as usize;
    data.knots.reserve(count.min(1 << 16));
    for _ in 0..count {
        let kflags = reader.read_u8()?;
        let dual_valued = kflags & KNOT_FLAG_DUAL_VALUED != 0;
        let next_interp = interp_from_tag((kflags >> KNOT_INTERP_SHIFT) & KNOT_INTERP_MASK);

        let time = reader.read_f64()?;
        let value: T = reader.read_value()?;
        let pre_value: T = if dual_valued {
            reader.read_value()?
        } else {
            value
        };

        let mut knot = Knot::new(time, value);
        knot.pre_value = pre_value;
        knot.dual_valued = dual_valued;
        knot.next_interp = next_interp;
        knot.curve_family = data.curve_family;
        knot.pre_tan_width = reader.read_f64()?;
        knot.post_tan_width = reader.read_f64()?;
        knot.pre_tan_slope = reader.read_value()?;
        knot.post_tan_slope = reader.read_value()?;

        data.knots.push(knot);
    }

    if !reader.is_empty() {
        return Err(SplineError::codec("trailing bytes after spline"));
    }

    data.check()
        .map_err(|err| SplineError::codec(err.to_string()))?;
    Ok(Spline::from_data(data))
}

/// Deserialize a spline whose precision is chosen by the bytes.
pub fn decode_any(bytes: &[u8]) -> SplineResult<AnySpline> {
    Ok(match peek_value_type(bytes)? {
        ValueType::F64 => AnySpline::F64(decode(bytes)?),
        ValueType::F32 => AnySpline::F32(decode(bytes)?),
        ValueType::F16 => AnySpline::F16(decode(bytes)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Time;

    fn sample_spline() -> Spline<f64> {
        let mut spline = Spline::new();

        let mut k0 = Knot::new(0.0, 1.0);
        k0.post_tan_width = 0.4;
        k0.post_tan_slope = 2.0;
        spline.set_knot(k0).unwrap();

        let mut k1 = Knot::new(3.0, 5.0);
        k1.dual_valued = true;
        k1.pre_value = 4.5;
        k1.pre_tan_width = 0.5;
        k1.next_interp = Interp::Linear;
        spline.set_knot(k1).unwrap();

        spline.set_pre_extrapolation(Extrapolation::Sloped(0.25));
        spline.set_post_extrapolation(Extrapolation::Loop(LoopMode::Oscillate));
        spline
            .set_loop_params(Some(LoopParams {
                proto_start: 0.0,
                proto_end: 3.0,
                num_pre_loops: 0,
                num_post_loops: 1,
                value_offset: 1.5,
            }))
            .unwrap();
        spline.set_time_valued(true);
        spline
    }

    #[test]
    fn round_trip_preserves_everything() {
        let spline = sample_spline();
        let bytes = encode(&spline);
        let decoded: Spline<f64> = decode(&bytes).unwrap();
        assert_eq!(decoded, spline);
    }

    #[test]
    fn round_trip_narrow_precisions() {
        let mut s32: Spline<f32> = Spline::new();
        s32.set_knot(Knot::new(1.0, 2.5_f32)).unwrap();
        let decoded: Spline<f32> = decode(&encode(&s32)).unwrap();
        assert_eq!(decoded, s32);

        let mut s16: Spline<half::f16> = Spline::new();
        s16.set_knot(Knot::new(1.0, half::f16::from_f64(0.5))).unwrap();
        let decoded: Spline<half::f16> = decode(&encode(&s16)).unwrap();
        assert_eq!(decoded, s16);
    }

    #[test]
    fn hermite_family_round_trips() {
        let mut spline: Spline<f64> = Spline::new();
        spline.set_curve_family(CurveFamily::Hermite).unwrap();
        let mut k = Knot::new(0.0, 1.0);
        k.curve_family = CurveFamily::Hermite;
        spline.set_knot(k).unwrap();

        let decoded: Spline<f64> = decode(&encode(&spline)).unwrap();
        assert_eq!(decoded, spline);
        assert_eq!(decoded.curve_family(), CurveFamily::Hermite);
    }

    #[test]
    fn decode_any_restores_precision() {
        let spline = sample_spline();
        let any = decode_any(&encode(&spline)).unwrap();
        assert_eq!(any.value_type(), ValueType::F64);
        let direct: Time = 1.5;
        assert_eq!(any.eval(direct), spline.eval(direct));
    }

    #[test]
    fn precision_mismatch_is_an_error() {
        let spline = sample_spline();
        let bytes = encode(&spline);
        assert!(decode::<f32>(&bytes).is_err());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = encode(&sample_spline());
        bytes[0] = 99;
        let err = decode::<f64>(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn truncation_is_rejected() {
        let bytes = encode(&sample_spline());
        for len in [0, 1, 5, bytes.len() - 1] {
            assert!(decode::<f64>(&bytes[..len]).is_err());
        }
    }

    #[test]
    fn unsorted_knots_are_rejected() {
        // Two knots encoded with equal times.
        let mut spline: Spline<f64> = Spline::new();
        spline.set_knot(Knot::new(1.0, 1.0)).unwrap();
        let mut bytes = encode(&spline);

        // Duplicate the knot record and bump the count.  One knot record is
        // 49 bytes (flags, time, value, two widths, two slopes), preceded by
        // the 8-byte count.
        let count_pos = bytes.len() - 57;
        let record = bytes[count_pos + 8..].to_vec();
        bytes.extend_from_slice(&record);
        bytes[count_pos] = 2;
        assert!(decode::<f64>(&bytes).is_err());
    }
}
