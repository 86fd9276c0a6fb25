//! Helper functions for byte manipulation.
//!
//! The 6502 is little-endian: the low byte of a word lives at the lower
//! address. Script word accesses and interrupt vectors go through these.

/// Join two bytes into a 16-bit word (Little Endian)
#[inline(always)]
pub fn join_u16(low: u8, high: u8) -> u16 {
    u16::from_le_bytes([low, high])
}

/// Split a 16-bit word into (low, high)
#[inline(always)]
pub fn split_u16(word: u16) -> (u8, u8) {
    let bytes = word.to_le_bytes();
    (bytes[0], bytes[1])
}

/// Widen a byte the way a script asked for it: raw or two's complement.
#[inline(always)]
pub fn widen_u8(value: u8, signed: bool) -> i32 {
    if signed {
        value as i8 as i32
    } else {
        value as i32
    }
}

/// Widen a word the way a script asked for it: raw or two's complement.
#[inline(always)]
pub fn widen_u16(value: u16, signed: bool) -> i32 {
    if signed {
        value as i16 as i32
    } else {
        value as i32
    }
}
