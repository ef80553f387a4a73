//! Flags output
//!
//! Packed flag words (process flags, descriptor payloads) are much easier to
//! read in logs with every bit spelled out.
//!
//! See [`Flags`] for more.

use core::fmt::{Display, Error, Formatter, Write};

/// A series of flags for nice output.
///
/// We use cases of letters to indicate every bit flags' value.
pub struct Flags {
    /// The value of the flags.
    value: u64,
    /// The names of the bits of the flags. Ascending from low bits to great.
    /// A name of `-` skips the bit.
    ///
    /// # Examples
    ///
    /// ```text
    ///            0b011
    /// "A B C" ->   CBA --output--> "A B c"
    /// ```
    format: &'static str,
}

impl Display for Flags {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut first = true;
        for (i, word) in self.format.split_whitespace().enumerate() {
            if word == "-" {
                continue;
            }
            if !first {
                f.write_char(' ')?;
            }
            first = false;

            let set = (self.value >> i) & 1 != 0;
            for c in word.chars() {
                f.write_char(if set {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                })?;
            }
        }
        Ok(())
    }
}

impl Flags {
    pub fn new(value: u64, format: &'static str) -> Flags {
        Flags { value, format }
    }
}
