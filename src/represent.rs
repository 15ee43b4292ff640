//! Hex and binary text rendering.

use alloc_crate::string::String;
use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use const_default::ConstDefault;

use crate::buffer::Buffer;

const UPPER_DIGITS: &[u8; 16] = b"0123456789ABCDEF";
const LOWER_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Bit-flag selection of the rendering produced by [`Buffer::represent`].
///
/// Combine flags with `|`. A form selecting neither [`HEX`](Repr::HEX) nor
/// [`BINARY`](Repr::BINARY) renders the literal `"null"`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Repr(u8);

impl Repr {
    /// No recognized options: renders the literal `"null"`.
    pub const NONE: Repr = Repr(0);
    /// Two hexadecimal digits per byte.
    pub const HEX: Repr = Repr(0x01);
    /// Eight bits per byte, most significant bit first.
    pub const BINARY: Repr = Repr(0x02);
    /// Lowercase hexadecimal digits; uppercase is the default.
    pub const LOWERCASE: Repr = Repr(0x04);
    /// Lead with `0x` (hex) or `0b` (binary).
    pub const PREFIXED: Repr = Repr(0x08);

    /// Whether every flag in `other` is set in `self`.
    pub const fn contains(self, other: Repr) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Repr {
    type Output = Repr;

    fn bitor(self, rhs: Repr) -> Repr {
        Repr(self.0 | rhs.0)
    }
}

impl BitOrAssign for Repr {
    fn bitor_assign(&mut self, rhs: Repr) {
        self.0 |= rhs.0;
    }
}

impl ConstDefault for Repr {
    const DEFAULT: Repr = Repr::NONE;
}

fn render_hex(data: &[u8], lowercase: bool, prefixed: bool) -> String {
    let digits = if lowercase { LOWER_DIGITS } else { UPPER_DIGITS };
    let mut out = String::with_capacity(2 + data.len() * 2);
    if prefixed {
        out.push_str("0x");
    }
    for &byte in data {
        out.push(digits[(byte >> 4) as usize] as char);
        out.push(digits[(byte & 0x0F) as usize] as char);
    }
    out
}

fn render_binary(data: &[u8], prefixed: bool) -> String {
    let mut out = String::with_capacity(2 + data.len() * 8);
    if prefixed {
        out.push_str("0b");
    }
    for &byte in data {
        for bit in (0..8).rev() {
            out.push(if byte >> bit & 1 == 1 { '1' } else { '0' });
        }
    }
    out
}

impl Buffer {
    /// Render the live bytes as text according to `form`.
    ///
    /// An empty or absent buffer renders as `"null"`, as does any form
    /// selecting neither [`Repr::HEX`] nor [`Repr::BINARY`]. When both are
    /// selected, hex wins.
    pub fn represent(&self, form: Repr) -> String {
        let data = self.as_slice();
        if data.is_empty() {
            return String::from("null");
        }
        if form.contains(Repr::HEX) {
            render_hex(
                data,
                form.contains(Repr::LOWERCASE),
                form.contains(Repr::PREFIXED),
            )
        } else if form.contains(Repr::BINARY) {
            render_binary(data, form.contains(Repr::PREFIXED))
        } else {
            String::from("null")
        }
    }
}

impl fmt::Display for Buffer {
    /// Prefixed uppercase hex, the buffer's canonical text form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.represent(Repr::HEX | Repr::PREFIXED))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("manager", &self.manager().map(|manager| manager.name()))
            .field("size", &self.size())
            .field("preallocated", &self.preallocated())
            .finish()
    }
}

impl fmt::UpperHex for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = if f.alternate() {
            Repr::HEX | Repr::PREFIXED
        } else {
            Repr::HEX
        };
        f.write_str(&self.represent(form))
    }
}

impl fmt::LowerHex for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = if f.alternate() {
            Repr::HEX | Repr::LOWERCASE | Repr::PREFIXED
        } else {
            Repr::HEX | Repr::LOWERCASE
        };
        f.write_str(&self.represent(form))
    }
}

impl fmt::Binary for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = if f.alternate() {
            Repr::BINARY | Repr::PREFIXED
        } else {
            Repr::BINARY
        };
        f.write_str(&self.represent(form))
    }
}

#[cfg(test)]
mod tests {
    use super::{render_binary, render_hex, Repr};

    #[test]
    fn hex_digit_rendering() {
        assert_eq!(render_hex(&[0x00, 0x0F, 0xF0], false, false), "000FF0");
        assert_eq!(render_hex(&[0xAB], true, true), "0xab");
    }

    #[test]
    fn binary_msb_first() {
        assert_eq!(render_binary(&[0x93], false), "10010011");
        assert_eq!(render_binary(&[0x01, 0x80], true), "0b0000000110000000");
    }

    #[test]
    fn flag_composition() {
        let form = Repr::HEX | Repr::PREFIXED;
        assert!(form.contains(Repr::HEX));
        assert!(form.contains(Repr::PREFIXED));
        assert!(!form.contains(Repr::LOWERCASE));
        let mut form = Repr::NONE;
        form |= Repr::BINARY;
        assert!(form.contains(Repr::BINARY));
    }
}
