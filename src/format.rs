//! Bit-exact conversion between wire sample formats and canonical `i64` samples.
//!
//! Canonical samples keep the native range of the wire bit depth: a 16-bit sample imports to
//! `-32768..=32767`, a 24-bit one to `-2^23..2^23`. 32-bit float is treated as a 32-bit
//! quantity, so `-1.0` maps to `i32::MIN` and values at or above `1.0` clamp to `i32::MAX`.
//! Float decoding and encoding work on the IEEE-754 bit fields directly.

use crate::error::ConfigError;

/// Byte order of a multi-byte wire sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// Numeric encoding of a wire sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Two's complement integer.
    Signed,
    /// Offset binary integer, zero at half scale.
    Unsigned,
    /// IEEE-754 binary32.
    Float,
}

/// The enumerated set of wire formats a client or backend may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SampleFormat {
    U8,
    S8,
    S16Le,
    S16Be,
    U16Le,
    U16Be,
    S24Le,
    S24Be,
    U24Le,
    U24Be,
    S32Le,
    S32Be,
    U32Le,
    U32Be,
    F32Le,
    F32Be,
}

impl SampleFormat {
    /// Every supported format, in capability-report order.
    pub const ALL: [SampleFormat; 16] = [
        SampleFormat::U8,
        SampleFormat::S8,
        SampleFormat::S16Le,
        SampleFormat::S16Be,
        SampleFormat::U16Le,
        SampleFormat::U16Be,
        SampleFormat::S24Le,
        SampleFormat::S24Be,
        SampleFormat::U24Le,
        SampleFormat::U24Be,
        SampleFormat::S32Le,
        SampleFormat::S32Be,
        SampleFormat::U32Le,
        SampleFormat::U32Be,
        SampleFormat::F32Le,
        SampleFormat::F32Be,
    ];

    /// Bits per sample on the wire.
    pub const fn bits(self) -> u32 {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 8,
            SampleFormat::S16Le
            | SampleFormat::S16Be
            | SampleFormat::U16Le
            | SampleFormat::U16Be => 16,
            SampleFormat::S24Le
            | SampleFormat::S24Be
            | SampleFormat::U24Le
            | SampleFormat::U24Be => 24,
            _ => 32,
        }
    }

    /// Bytes per sample on the wire.
    pub const fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Numeric encoding.
    pub const fn encoding(self) -> Encoding {
        match self {
            SampleFormat::S8
            | SampleFormat::S16Le
            | SampleFormat::S16Be
            | SampleFormat::S24Le
            | SampleFormat::S24Be
            | SampleFormat::S32Le
            | SampleFormat::S32Be => Encoding::Signed,
            SampleFormat::F32Le | SampleFormat::F32Be => Encoding::Float,
            _ => Encoding::Unsigned,
        }
    }

    /// Byte order. Single byte formats report little endian.
    pub const fn endian(self) -> Endian {
        match self {
            SampleFormat::S16Be
            | SampleFormat::U16Be
            | SampleFormat::S24Be
            | SampleFormat::U24Be
            | SampleFormat::S32Be
            | SampleFormat::U32Be
            | SampleFormat::F32Be => Endian::Big,
            _ => Endian::Little,
        }
    }

    /// OSS `AFMT_*` bit mask for this format.
    pub const fn mask(self) -> u32 {
        match self {
            SampleFormat::U8 => 0x0000_0008,
            SampleFormat::S16Le => 0x0000_0010,
            SampleFormat::S16Be => 0x0000_0020,
            SampleFormat::S8 => 0x0000_0040,
            SampleFormat::U16Le => 0x0000_0080,
            SampleFormat::U16Be => 0x0000_0100,
            SampleFormat::S32Le => 0x0000_1000,
            SampleFormat::S32Be => 0x0000_2000,
            SampleFormat::U32Le => 0x0000_4000,
            SampleFormat::U32Be => 0x0000_8000,
            SampleFormat::S24Le => 0x0001_0000,
            SampleFormat::S24Be => 0x0002_0000,
            SampleFormat::U24Le => 0x0004_0000,
            SampleFormat::U24Be => 0x0008_0000,
            SampleFormat::F32Le => 0x1000_0000,
            SampleFormat::F32Be => 0x2000_0000,
        }
    }

    /// Look a format up by its `AFMT_*` mask.
    pub fn from_mask(mask: u32) -> Result<Self, ConfigError> {
        Self::ALL
            .iter()
            .copied()
            .find(|fmt| fmt.mask() == mask)
            .ok_or(ConfigError::InvalidFormat(mask))
    }

    /// Signed little endian integer format for a bit depth.
    pub fn signed_le(bits: u32) -> Result<Self, ConfigError> {
        match bits {
            8 => Ok(SampleFormat::S8),
            16 => Ok(SampleFormat::S16Le),
            24 => Ok(SampleFormat::S24Le),
            32 => Ok(SampleFormat::S32Le),
            other => Err(ConfigError::InvalidBits(other)),
        }
    }

    /// Sign bit / bias for unsigned formats.
    const fn sign_bit(self) -> u64 {
        1u64 << (self.bits() - 1)
    }
}

/// Largest representable canonical magnitude for the format.
pub const fn max_value(fmt: SampleFormat) -> i64 {
    (1i64 << (fmt.bits() - 1)) - 1
}

/// Most negative canonical value for the format.
pub const fn min_value(fmt: SampleFormat) -> i64 {
    -(1i64 << (fmt.bits() - 1))
}

/// Largest canonical magnitude for a bit depth.
pub const fn max_for_bits(bits: u32) -> i64 {
    (1i64 << (bits - 1)) - 1
}

/// Decode wire bytes into canonical samples. Returns samples converted,
/// bounded by both whole samples in `src` and the length of `dst`.
pub fn import(fmt: SampleFormat, src: &[u8], dst: &mut [i64]) -> usize {
    let width = fmt.bytes();
    let count = (src.len() / width).min(dst.len());
    for (raw, out) in src.chunks_exact(width).take(count).zip(dst.iter_mut()) {
        let bits = read_raw(fmt, raw);
        *out = match fmt.encoding() {
            Encoding::Signed => sign_extend(bits, fmt.bits()),
            Encoding::Unsigned => sign_extend(bits ^ fmt.sign_bit(), fmt.bits()),
            Encoding::Float => float_to_canonical(bits as u32),
        };
    }
    count
}

/// Encode canonical samples into wire bytes, clamping to the format range.
/// Returns samples converted.
pub fn export(fmt: SampleFormat, src: &[i64], dst: &mut [u8]) -> usize {
    let width = fmt.bytes();
    let count = (dst.len() / width).min(src.len());
    let (lo, hi) = (min_value(fmt), max_value(fmt));
    for (value, raw) in src.iter().take(count).zip(dst.chunks_exact_mut(width)) {
        let clamped = (*value).clamp(lo, hi);
        let bits = match fmt.encoding() {
            Encoding::Signed => clamped as u64,
            Encoding::Unsigned => (clamped as u64) ^ fmt.sign_bit(),
            Encoding::Float => canonical_to_float(clamped) as u64,
        };
        write_raw(fmt, bits, raw);
    }
    count
}

/// Fill `dst` with the format's zero level. A trailing partial sample is left untouched.
pub fn silence(fmt: SampleFormat, dst: &mut [u8]) {
    let width = fmt.bytes();
    let bits = match fmt.encoding() {
        Encoding::Unsigned => fmt.sign_bit(),
        _ => 0,
    };
    for raw in dst.chunks_exact_mut(width) {
        write_raw(fmt, bits, raw);
    }
}

fn read_raw(fmt: SampleFormat, raw: &[u8]) -> u64 {
    match fmt.endian() {
        Endian::Little => raw
            .iter()
            .rev()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
        Endian::Big => raw.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
    }
}

fn write_raw(fmt: SampleFormat, bits: u64, raw: &mut [u8]) {
    let width = raw.len();
    for (index, byte) in raw.iter_mut().enumerate() {
        let shift = match fmt.endian() {
            Endian::Little => index * 8,
            Endian::Big => (width - 1 - index) * 8,
        };
        *byte = (bits >> shift) as u8;
    }
}

fn sign_extend(bits: u64, width: u32) -> i64 {
    let unused = 64 - width;
    ((bits << unused) as i64) >> unused
}

const F32_EXP_BIAS: i32 = 127;
const F32_MANT_BITS: i32 = 23;
const F32_ONE: u32 = 0x3f80_0000;
const F32_SIGN: u32 = 0x8000_0000;
// canonical = value * 2^31
const FLOAT_SCALE_BITS: i32 = 31;

fn float_to_canonical(bits: u32) -> i64 {
    let negative = bits & F32_SIGN != 0;
    let exp = ((bits >> F32_MANT_BITS) & 0xff) as i32;
    let mant = bits & 0x007f_ffff;

    if exp == 0 {
        // zero and subnormals sit far below one canonical step
        return 0;
    }
    if exp == 0xff && mant != 0 {
        return 0;
    }
    if exp >= F32_EXP_BIAS {
        // |value| >= 1.0, including infinity
        return if negative {
            i32::MIN as i64
        } else {
            i32::MAX as i64
        };
    }

    let significand = i64::from(mant | (1 << F32_MANT_BITS));
    let shift = exp - F32_EXP_BIAS + FLOAT_SCALE_BITS - F32_MANT_BITS;
    let magnitude = if shift >= 0 {
        significand << shift
    } else if shift > -40 {
        significand >> -shift
    } else {
        0
    };
    if negative { -magnitude } else { magnitude }
}

fn canonical_to_float(value: i64) -> u32 {
    if value == 0 {
        return 0;
    }
    if value >= i32::MAX as i64 {
        return F32_ONE;
    }
    if value <= i32::MIN as i64 {
        return F32_SIGN | F32_ONE;
    }

    let sign = if value < 0 { F32_SIGN } else { 0 };
    let magnitude = value.unsigned_abs();
    let msb = 63 - magnitude.leading_zeros() as i32;
    let mant = (if msb > F32_MANT_BITS {
        magnitude >> (msb - F32_MANT_BITS)
    } else {
        magnitude << (F32_MANT_BITS - msb)
    }) as u32;
    let exp = (msb - FLOAT_SCALE_BITS + F32_EXP_BIAS) as u32;
    sign | (exp << F32_MANT_BITS) | (mant & 0x007f_ffff)
}
