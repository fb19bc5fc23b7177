//! Component packing utilities
//!
//! Converts single channel components between the buffer formats of
//! [`crate::layout::BufferFormat`]:
//! - normalized integers map to [0.0, 1.0] (unsigned) or [-1.0, 1.0] (signed)
//! - plain integers keep their numeric value, rounded and clamped on write
//! - `PackedDirS8` stores a direction component as a biased unsigned byte
//!
//! Used by the layout builder, the mesh formatter and the static mesh converter.

use crate::layout::BufferFormat;
use glam::Vec4;
use half::f16;

// ============================================================================
// Basic Conversion Functions
// ============================================================================

/// Convert f32 to unsigned normalized 8-bit integer (unorm8)
///
/// Maps f32 range [0.0, 1.0] to u8 range [0, 255].
#[inline]
pub fn f32_to_unorm8(value: f32) -> u8 {
    let clamped = value.clamp(0.0, 1.0);
    (clamped * 255.0).round() as u8
}

/// Convert f32 to unsigned normalized 16-bit integer (unorm16)
#[inline]
pub fn f32_to_unorm16(value: f32) -> u16 {
    let clamped = value.clamp(0.0, 1.0);
    (clamped * 65535.0).round() as u16
}

/// Convert f32 to signed normalized 16-bit integer (snorm16)
///
/// Maps f32 range [-1.0, 1.0] to i16 range [-32767, 32767].
#[inline]
pub fn f32_to_snorm16(value: f32) -> i16 {
    let clamped = value.clamp(-1.0, 1.0);
    (clamped * 32767.0).round() as i16
}

/// Convert f32 to a biased direction byte
///
/// Maps [-1.0, 1.0] to [0, 255] with 127.5 as zero.
#[inline]
pub fn f32_to_dir_s8(value: f32) -> u8 {
    let clamped = value.clamp(-1.0, 1.0);
    (clamped * 127.5 + 127.5).round() as u8
}

/// Inverse of [`f32_to_dir_s8`]
#[inline]
pub fn dir_s8_to_f32(value: u8) -> f32 {
    (value as f32 - 127.5) / 127.5
}

/// Pack a direction (xyz + sign in w) to four biased bytes
#[inline]
pub fn pack_dir_s8(dir: Vec4) -> [u8; 4] {
    [
        f32_to_dir_s8(dir.x),
        f32_to_dir_s8(dir.y),
        f32_to_dir_s8(dir.z),
        f32_to_dir_s8(dir.w),
    ]
}

/// Pack a 2D texture coordinate to Float16x2
#[inline]
pub fn pack_uv_f16(u: f32, v: f32) -> [f16; 2] {
    [f16::from_f32(u), f16::from_f32(v)]
}

// ============================================================================
// Generic Component Access
// ============================================================================

/// Read one component stored in `format` from the start of `bytes`
pub fn read_component(format: BufferFormat, bytes: &[u8]) -> f64 {
    use BufferFormat::*;

    match format {
        None => 0.0,
        Float16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
        Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        UInt8 => bytes[0] as f64,
        UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        UInt32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        Int8 => bytes[0] as i8 as f64,
        Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        NUInt8 => bytes[0] as f64 / u8::MAX as f64,
        NUInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64 / u16::MAX as f64,
        NUInt32 => {
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / u32::MAX as f64
        }
        NInt8 => (bytes[0] as i8 as f64 / i8::MAX as f64).max(-1.0),
        NInt16 => (i16::from_le_bytes([bytes[0], bytes[1]]) as f64 / i16::MAX as f64).max(-1.0),
        NInt32 => {
            (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / i32::MAX as f64)
                .max(-1.0)
        }
        PackedDirS8 => dir_s8_to_f32(bytes[0]) as f64,
    }
}

/// Write one component into the start of `out` using `format`
pub fn write_component(format: BufferFormat, value: f64, out: &mut [u8]) {
    use BufferFormat::*;

    fn integer(value: f64, min: f64, max: f64) -> f64 {
        value.round().clamp(min, max)
    }

    match format {
        None => {}
        Float16 => out[..2].copy_from_slice(&f16::from_f64(value).to_le_bytes()),
        Float32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
        UInt8 => out[0] = integer(value, 0.0, u8::MAX as f64) as u8,
        UInt16 => {
            let v = integer(value, 0.0, u16::MAX as f64) as u16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        UInt32 => {
            let v = integer(value, 0.0, u32::MAX as f64) as u32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        Int8 => out[0] = integer(value, i8::MIN as f64, i8::MAX as f64) as i8 as u8,
        Int16 => {
            let v = integer(value, i16::MIN as f64, i16::MAX as f64) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        Int32 => {
            let v = integer(value, i32::MIN as f64, i32::MAX as f64) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        NUInt8 => out[0] = (value.clamp(0.0, 1.0) * u8::MAX as f64).round() as u8,
        NUInt16 => {
            let v = (value.clamp(0.0, 1.0) * u16::MAX as f64).round() as u16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        NUInt32 => {
            let v = (value.clamp(0.0, 1.0) * u32::MAX as f64).round() as u32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        NInt8 => out[0] = (value.clamp(-1.0, 1.0) * i8::MAX as f64).round() as i8 as u8,
        NInt16 => {
            let v = (value.clamp(-1.0, 1.0) * i16::MAX as f64).round() as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        NInt32 => {
            let v = (value.clamp(-1.0, 1.0) * i32::MAX as f64).round() as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        PackedDirS8 => out[0] = f32_to_dir_s8(value as f32),
    }
}

/// Convert a run of components from one format to another
///
/// Components beyond the shorter of the two counts are left untouched in `dst`.
/// Identical formats are copied byte for byte.
pub fn convert_components(
    src_format: BufferFormat,
    src_count: usize,
    src: &[u8],
    dst_format: BufferFormat,
    dst_count: usize,
    dst: &mut [u8],
) {
    let count = src_count.min(dst_count);
    if src_format == dst_format {
        let bytes = count * src_format.size();
        dst[..bytes].copy_from_slice(&src[..bytes]);
        return;
    }

    let src_size = src_format.size();
    let dst_size = dst_format.size();
    for c in 0..count {
        let value = read_component(src_format, &src[c * src_size..]);
        write_component(dst_format, value, &mut dst[c * dst_size..]);
    }
}
