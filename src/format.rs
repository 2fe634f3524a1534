//! Native sample encodings and the codec between them and normalized floats.
//!
//! Every driver channel advertises one of the closed set of [`SampleType`]
//! encodings below. The codec converts between a native bit pattern and the
//! application-facing domain, which is always host-endian `f32` in `[-1, 1]`.
//! Endianness is a property of the native representation only.

use crate::AsioError;

/// Byte order of a native sample representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Numeric domain of a native sample representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleDomain {
    /// Two's-complement signed integer with the given number of significant
    /// bits. The container may be wider; excess bits are sign extension.
    SignedInt {
        /// Significant bits, e.g. 24 for `Int32Lsb24`.
        significant_bits: u8,
    },
    /// IEEE 754 single precision, already in the target domain.
    Float32,
    /// IEEE 754 double precision, reduced to `f32` at the API boundary.
    Float64,
    /// One-bit DSD stream. Not convertible; encode/decode always fail.
    Dsd,
}

/// The sample encodings a driver may report, mirroring the native ASIO
/// sample-type codes. `Msb` variants are big-endian, `Lsb` little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleType {
    /// 16-bit data word.
    Int16Msb,
    /// Packed 24-bit format; two samples span six consecutive bytes.
    Int24Msb,
    /// 32-bit data word.
    Int32Msb,
    /// IEEE 754 32-bit float.
    Float32Msb,
    /// IEEE 754 64-bit double.
    Float64Msb,
    /// 32-bit container, data in the least significant 16 bits.
    Int32Msb16,
    /// 32-bit container, data in the least significant 18 bits.
    Int32Msb18,
    /// 32-bit container, data in the least significant 20 bits.
    Int32Msb20,
    /// 32-bit container, data in the least significant 24 bits.
    Int32Msb24,
    /// 16-bit data word.
    Int16Lsb,
    /// Packed 24-bit format, little-endian byte order.
    Int24Lsb,
    /// 32-bit data word.
    Int32Lsb,
    /// IEEE 754 32-bit float.
    Float32Lsb,
    /// IEEE 754 64-bit double.
    Float64Lsb,
    /// 32-bit container, data in the least significant 16 bits.
    Int32Lsb16,
    /// 32-bit container, data in the least significant 18 bits.
    Int32Lsb18,
    /// 32-bit container, data in the least significant 20 bits.
    Int32Lsb20,
    /// 32-bit container, data in the least significant 24 bits.
    Int32Lsb24,
    /// DSD 1-bit data, 8 samples per byte, first sample in LSB.
    DsdInt8Lsb1,
    /// DSD 1-bit data, 8 samples per byte, first sample in MSB.
    DsdInt8Msb1,
    /// DSD 8-bit data, 1 sample per byte, no interleaving.
    DsdInt8Ner8,
}

const MAX_INT16: i64 = 0x7FFF;
const MAX_INT18: i64 = 0x1FFFF;
const MAX_INT20: i64 = 0x7FFFF;
const MAX_INT24: i64 = 0x7FFFFF;
const MAX_INT32: i64 = 0x7FFFFFFF;

impl SampleType {
    /// All variants, in native code order.
    pub const ALL: [SampleType; 21] = [
        SampleType::Int16Msb,
        SampleType::Int24Msb,
        SampleType::Int32Msb,
        SampleType::Float32Msb,
        SampleType::Float64Msb,
        SampleType::Int32Msb16,
        SampleType::Int32Msb18,
        SampleType::Int32Msb20,
        SampleType::Int32Msb24,
        SampleType::Int16Lsb,
        SampleType::Int24Lsb,
        SampleType::Int32Lsb,
        SampleType::Float32Lsb,
        SampleType::Float64Lsb,
        SampleType::Int32Lsb16,
        SampleType::Int32Lsb18,
        SampleType::Int32Lsb20,
        SampleType::Int32Lsb24,
        SampleType::DsdInt8Lsb1,
        SampleType::DsdInt8Msb1,
        SampleType::DsdInt8Ner8,
    ];

    /// Resolve a raw native sample-type code. Returns `None` for codes not
    /// in the closed set.
    pub fn from_code(code: i32) -> Option<SampleType> {
        SampleType::ALL.iter().copied().find(|ty| ty.code() == code)
    }

    /// The raw native sample-type code for this encoding.
    pub fn code(self) -> i32 {
        match self {
            SampleType::Int16Msb => 0,
            SampleType::Int24Msb => 1,
            SampleType::Int32Msb => 2,
            SampleType::Float32Msb => 3,
            SampleType::Float64Msb => 4,
            SampleType::Int32Msb16 => 8,
            SampleType::Int32Msb18 => 9,
            SampleType::Int32Msb20 => 10,
            SampleType::Int32Msb24 => 11,
            SampleType::Int16Lsb => 16,
            SampleType::Int24Lsb => 17,
            SampleType::Int32Lsb => 18,
            SampleType::Float32Lsb => 19,
            SampleType::Float64Lsb => 20,
            SampleType::Int32Lsb16 => 24,
            SampleType::Int32Lsb18 => 25,
            SampleType::Int32Lsb20 => 26,
            SampleType::Int32Lsb24 => 27,
            SampleType::DsdInt8Lsb1 => 32,
            SampleType::DsdInt8Msb1 => 33,
            SampleType::DsdInt8Ner8 => 40,
        }
    }

    /// Storage bytes per sample in the native buffer.
    pub fn byte_width(self) -> usize {
        match self {
            SampleType::Int16Msb | SampleType::Int16Lsb => 2,
            SampleType::Int24Msb | SampleType::Int24Lsb => 3,
            SampleType::Float64Msb | SampleType::Float64Lsb => 8,
            SampleType::DsdInt8Lsb1 | SampleType::DsdInt8Msb1 | SampleType::DsdInt8Ner8 => 1,
            _ => 4,
        }
    }

    /// Byte order of the native representation.
    pub fn endianness(self) -> Endianness {
        match self {
            SampleType::Int16Msb
            | SampleType::Int24Msb
            | SampleType::Int32Msb
            | SampleType::Float32Msb
            | SampleType::Float64Msb
            | SampleType::Int32Msb16
            | SampleType::Int32Msb18
            | SampleType::Int32Msb20
            | SampleType::Int32Msb24
            | SampleType::DsdInt8Msb1 => Endianness::Big,
            _ => Endianness::Little,
        }
    }

    /// Numeric domain of the native representation.
    pub fn domain(self) -> SampleDomain {
        match self {
            SampleType::Int16Msb | SampleType::Int16Lsb => SampleDomain::SignedInt {
                significant_bits: 16,
            },
            SampleType::Int24Msb | SampleType::Int24Lsb => SampleDomain::SignedInt {
                significant_bits: 24,
            },
            SampleType::Int32Msb | SampleType::Int32Lsb => SampleDomain::SignedInt {
                significant_bits: 32,
            },
            SampleType::Int32Msb16 | SampleType::Int32Lsb16 => SampleDomain::SignedInt {
                significant_bits: 16,
            },
            SampleType::Int32Msb18 | SampleType::Int32Lsb18 => SampleDomain::SignedInt {
                significant_bits: 18,
            },
            SampleType::Int32Msb20 | SampleType::Int32Lsb20 => SampleDomain::SignedInt {
                significant_bits: 20,
            },
            SampleType::Int32Msb24 | SampleType::Int32Lsb24 => SampleDomain::SignedInt {
                significant_bits: 24,
            },
            SampleType::Float32Msb | SampleType::Float32Lsb => SampleDomain::Float32,
            SampleType::Float64Msb | SampleType::Float64Lsb => SampleDomain::Float64,
            SampleType::DsdInt8Lsb1 | SampleType::DsdInt8Msb1 | SampleType::DsdInt8Ner8 => {
                SampleDomain::Dsd
            }
        }
    }

    /// Whether the codec can convert this encoding. False only for the DSD
    /// variants.
    pub fn is_supported(self) -> bool {
        !matches!(self.domain(), SampleDomain::Dsd)
    }

    fn scale(self) -> i64 {
        match self.domain() {
            SampleDomain::SignedInt {
                significant_bits: 16,
            } => MAX_INT16,
            SampleDomain::SignedInt {
                significant_bits: 18,
            } => MAX_INT18,
            SampleDomain::SignedInt {
                significant_bits: 20,
            } => MAX_INT20,
            SampleDomain::SignedInt {
                significant_bits: 24,
            } => MAX_INT24,
            _ => MAX_INT32,
        }
    }
}

/// Round and bound a normalized value to the integer range `[-scale, scale]`.
/// Computed in `f64` so that `1.0 * 0x7FFFFFFF` cannot creep past the
/// container width through `f32` rounding.
fn quantize(value: f32, scale: i64) -> i64 {
    let scaled = (value as f64 * scale as f64).round();
    scaled.clamp(-(scale as f64), scale as f64) as i64
}

/// Encode one normalized sample into its native bit pattern.
///
/// `dst` must be exactly [`SampleType::byte_width`] bytes. DSD encodings
/// fail with [`AsioError::UnsupportedSampleType`].
pub fn encode_sample(ty: SampleType, value: f32, dst: &mut [u8]) -> Result<(), AsioError> {
    debug_assert_eq!(dst.len(), ty.byte_width());
    match ty {
        SampleType::Int16Msb => {
            dst.copy_from_slice(&(quantize(value, MAX_INT16) as i16).to_be_bytes())
        }
        SampleType::Int16Lsb => {
            dst.copy_from_slice(&(quantize(value, MAX_INT16) as i16).to_le_bytes())
        }
        SampleType::Int24Msb => {
            let q = quantize(value, MAX_INT24) as i32;
            dst[0] = (q >> 16) as u8;
            dst[1] = (q >> 8) as u8;
            dst[2] = q as u8;
        }
        SampleType::Int24Lsb => {
            let q = quantize(value, MAX_INT24) as i32;
            dst[0] = q as u8;
            dst[1] = (q >> 8) as u8;
            dst[2] = (q >> 16) as u8;
        }
        SampleType::Int32Msb
        | SampleType::Int32Msb16
        | SampleType::Int32Msb18
        | SampleType::Int32Msb20
        | SampleType::Int32Msb24 => {
            dst.copy_from_slice(&(quantize(value, ty.scale()) as i32).to_be_bytes())
        }
        SampleType::Int32Lsb
        | SampleType::Int32Lsb16
        | SampleType::Int32Lsb18
        | SampleType::Int32Lsb20
        | SampleType::Int32Lsb24 => {
            dst.copy_from_slice(&(quantize(value, ty.scale()) as i32).to_le_bytes())
        }
        SampleType::Float32Msb => dst.copy_from_slice(&value.to_be_bytes()),
        SampleType::Float32Lsb => dst.copy_from_slice(&value.to_le_bytes()),
        SampleType::Float64Msb => dst.copy_from_slice(&(value as f64).to_be_bytes()),
        SampleType::Float64Lsb => dst.copy_from_slice(&(value as f64).to_le_bytes()),
        SampleType::DsdInt8Lsb1 | SampleType::DsdInt8Msb1 | SampleType::DsdInt8Ner8 => {
            return Err(AsioError::UnsupportedSampleType(ty));
        }
    }
    Ok(())
}

/// Decode one native sample into the normalized float domain.
///
/// `src` must be exactly [`SampleType::byte_width`] bytes. DSD encodings
/// fail with [`AsioError::UnsupportedSampleType`].
pub fn decode_sample(ty: SampleType, src: &[u8]) -> Result<f32, AsioError> {
    debug_assert_eq!(src.len(), ty.byte_width());
    let value = match ty {
        SampleType::Int16Msb => i16::from_be_bytes([src[0], src[1]]) as f64 / MAX_INT16 as f64,
        SampleType::Int16Lsb => i16::from_le_bytes([src[0], src[1]]) as f64 / MAX_INT16 as f64,
        SampleType::Int24Msb => {
            let raw = ((src[0] as i32) << 16) | ((src[1] as i32) << 8) | src[2] as i32;
            sign_extend_24(raw) as f64 / MAX_INT24 as f64
        }
        SampleType::Int24Lsb => {
            let raw = ((src[2] as i32) << 16) | ((src[1] as i32) << 8) | src[0] as i32;
            sign_extend_24(raw) as f64 / MAX_INT24 as f64
        }
        SampleType::Int32Msb
        | SampleType::Int32Msb16
        | SampleType::Int32Msb18
        | SampleType::Int32Msb20
        | SampleType::Int32Msb24 => {
            i32::from_be_bytes([src[0], src[1], src[2], src[3]]) as f64 / ty.scale() as f64
        }
        SampleType::Int32Lsb
        | SampleType::Int32Lsb16
        | SampleType::Int32Lsb18
        | SampleType::Int32Lsb20
        | SampleType::Int32Lsb24 => {
            i32::from_le_bytes([src[0], src[1], src[2], src[3]]) as f64 / ty.scale() as f64
        }
        SampleType::Float32Msb => {
            return Ok(f32::from_be_bytes([src[0], src[1], src[2], src[3]]));
        }
        SampleType::Float32Lsb => {
            return Ok(f32::from_le_bytes([src[0], src[1], src[2], src[3]]));
        }
        SampleType::Float64Msb => f64::from_be_bytes([
            src[0], src[1], src[2], src[3], src[4], src[5], src[6], src[7],
        ]),
        SampleType::Float64Lsb => f64::from_le_bytes([
            src[0], src[1], src[2], src[3], src[4], src[5], src[6], src[7],
        ]),
        SampleType::DsdInt8Lsb1 | SampleType::DsdInt8Msb1 | SampleType::DsdInt8Ner8 => {
            return Err(AsioError::UnsupportedSampleType(ty));
        }
    };
    Ok(value as f32)
}

fn sign_extend_24(raw: i32) -> i32 {
    (raw << 8) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBES: [f32; 5] = [-1.0, -0.5, 0.0, 0.5, 1.0 - f32::EPSILON];

    fn quantization_step(ty: SampleType) -> f64 {
        match ty.domain() {
            SampleDomain::SignedInt { .. } => 1.0 / ty.scale() as f64,
            _ => f32::EPSILON as f64 * 2.0,
        }
    }

    #[test]
    fn code_round_trip_covers_all_variants() {
        for ty in SampleType::ALL {
            assert_eq!(SampleType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(SampleType::from_code(5), None);
        assert_eq!(SampleType::from_code(-1), None);
    }

    #[test]
    fn round_trip_within_one_quantization_step() {
        for ty in SampleType::ALL.into_iter().filter(|ty| ty.is_supported()) {
            let mut raw = vec![0u8; ty.byte_width()];
            for value in PROBES {
                encode_sample(ty, value, &mut raw).unwrap();
                let decoded = decode_sample(ty, &raw).unwrap();
                let error = (decoded as f64 - value as f64).abs();
                assert!(
                    error <= quantization_step(ty) + 1e-12,
                    "{ty:?}: {value} -> {decoded}, error {error}"
                );
            }
        }
    }

    #[test]
    fn full_scale_never_overflows_container() {
        for ty in SampleType::ALL.into_iter().filter(|ty| ty.is_supported()) {
            let mut raw = vec![0u8; ty.byte_width()];
            encode_sample(ty, 1.0, &mut raw).unwrap();
            assert!((decode_sample(ty, &raw).unwrap() - 1.0).abs() < 1e-4);
            encode_sample(ty, -1.0, &mut raw).unwrap();
            assert!((decode_sample(ty, &raw).unwrap() + 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn packed_24_bit_is_byte_order_symmetric() {
        let mut msb = [0u8; 3];
        let mut lsb = [0u8; 3];
        for value in PROBES {
            encode_sample(SampleType::Int24Msb, value, &mut msb).unwrap();
            encode_sample(SampleType::Int24Lsb, value, &mut lsb).unwrap();
            assert_eq!([msb[0], msb[1], msb[2]], [lsb[2], lsb[1], lsb[0]]);
            let via_msb = decode_sample(SampleType::Int24Msb, &msb).unwrap();
            let via_lsb = decode_sample(SampleType::Int24Lsb, &lsb).unwrap();
            assert_eq!(via_msb, via_lsb);
        }
    }

    #[test]
    fn packed_24_bit_sign_extends_negative_values() {
        let mut raw = [0u8; 3];
        encode_sample(SampleType::Int24Msb, -0.75, &mut raw).unwrap();
        let decoded = decode_sample(SampleType::Int24Msb, &raw).unwrap();
        assert!(decoded < 0.0, "expected negative, got {decoded}");
        assert!((decoded + 0.75).abs() < 1e-6);
    }

    #[test]
    fn float64_round_trips_through_f32() {
        let mut raw = [0u8; 8];
        let value = 0.123_456_79_f32;
        encode_sample(SampleType::Float64Lsb, value, &mut raw).unwrap();
        assert_eq!(decode_sample(SampleType::Float64Lsb, &raw).unwrap(), value);
    }

    #[test]
    fn dsd_types_are_rejected_not_approximated() {
        for ty in [
            SampleType::DsdInt8Lsb1,
            SampleType::DsdInt8Msb1,
            SampleType::DsdInt8Ner8,
        ] {
            let mut raw = vec![0u8; ty.byte_width()];
            assert!(matches!(
                encode_sample(ty, 0.0, &mut raw),
                Err(AsioError::UnsupportedSampleType(_))
            ));
            assert!(matches!(
                decode_sample(ty, &raw),
                Err(AsioError::UnsupportedSampleType(_))
            ));
        }
    }

    #[test]
    fn sixteen_bit_container_matches_expected_bytes() {
        let mut raw = [0u8; 2];
        encode_sample(SampleType::Int16Lsb, 1.0, &mut raw).unwrap();
        assert_eq!(raw, [0xFF, 0x7F]);
        encode_sample(SampleType::Int16Msb, 1.0, &mut raw).unwrap();
        assert_eq!(raw, [0x7F, 0xFF]);
    }
}
