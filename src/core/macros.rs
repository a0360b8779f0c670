//! Core Macros
//!
//! This module defines utility macros used by the characteristic decoders.
//! These macros keep the flag and byte handling of the GATT payloads terse.

/// Helper macro to check if a specific bit is set in a byte.
#[macro_export]
macro_rules! is_bit_set {
    ($byte:expr, $pos:expr) => {
        ($byte & (1 << $pos)) != 0
    };
}

/// Helper macro to extract a `u16` value in little-endian format from a byte slice.
///
/// The caller guarantees that `$slice` holds at least `$lsb + 2` bytes.
#[macro_export]
macro_rules! get_u16_little_endian {
    ($slice:expr, $lsb:expr) => {
        (($slice[1 + $lsb] as u16) << 8) | $slice[$lsb] as u16
    };
}
