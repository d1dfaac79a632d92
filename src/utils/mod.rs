use std::fmt::{Debug, Display};

use num_traits::Num;

use crate::error::{Error, Result};

/// Element types that can live in a mapped array, a cache record or a
/// MatrixMarket value column.
///
/// The set is closed over `i32`, `i64` and `f64`. Each type carries its own
/// persisted type code, byte width, parser and formatter, so every call site
/// is resolved at compile time.
pub trait Element:
    Num + Copy + Debug + Display + Send + Sync + 'static
{
    /// Code stored in persistent array headers.
    const TYPE_CODE: i32;

    /// Width in bytes of the little-endian encoding.
    const SIZE: usize;

    fn parse_value(token: &str) -> Result<Self>;

    /// Reads the element from the first `SIZE` bytes of `bytes`.
    fn read_le(bytes: &[u8]) -> Self;

    /// Writes the element into the first `SIZE` bytes of `bytes`.
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_element {
    ($t:ty, $code:expr) => {
        impl Element for $t {
            const TYPE_CODE: i32 = $code;
            const SIZE: usize = std::mem::size_of::<$t>();

            fn parse_value(token: &str) -> Result<Self> {
                token.trim().parse::<$t>().map_err(|e| {
                    Error::format(format!(
                        "cannot parse '{}' as {}: {}",
                        token,
                        stringify!($t),
                        e
                    ))
                })
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                <$t>::from_le_bytes(buf)
            }

            #[inline]
            fn write_le(self, bytes: &mut [u8]) {
                bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

// Codes match the numbering stored in existing array files.
impl_element!(i32, 9);
impl_element!(i64, 11);
impl_element!(f64, 14);

/// Multiplies two dimensions and an element width, failing on overflow.
pub(crate) fn checked_byte_len(size0: usize, size1: usize, element_size: usize) -> Result<usize> {
    size0
        .checked_mul(size1)
        .and_then(|count| count.checked_mul(element_size))
        .ok_or_else(|| {
            Error::argument(format!(
                "array of {}x{} elements of {} bytes overflows the address space",
                size0, size1, element_size
            ))
        })
}

/// Converts an index to the `i32` used by persisted headers and cache records.
pub(crate) fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        Error::argument(format!("{} {} does not fit into a 32-bit index", what, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes_and_codes() {
        assert_eq!(i32::SIZE, 4);
        assert_eq!(i64::SIZE, 8);
        assert_eq!(f64::SIZE, 8);
        assert_eq!(i32::TYPE_CODE, 9);
        assert_eq!(i64::TYPE_CODE, 11);
        assert_eq!(f64::TYPE_CODE, 14);
    }

    #[test]
    fn test_element_bytes() {
        let mut buf = [0u8; 8];
        (-12.5f64).write_le(&mut buf);
        assert_eq!(f64::read_le(&buf), -12.5);

        let mut buf = [0u8; 4];
        i32::MIN.write_le(&mut buf);
        assert_eq!(i32::read_le(&buf), i32::MIN);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(f64::parse_value("1e3").unwrap(), 1000.0);
        assert_eq!(f64::parse_value(" -0.25 ").unwrap(), -0.25);
        assert_eq!(i64::parse_value("9000000000").unwrap(), 9_000_000_000);
        assert!(i32::parse_value("1.5").unwrap_err().is_format());
        assert!(f64::parse_value("1,5").unwrap_err().is_format());
    }

    #[test]
    fn test_checked_byte_len() {
        assert_eq!(checked_byte_len(3, 4, 8).unwrap(), 96);
        assert!(checked_byte_len(usize::MAX, 2, 1).unwrap_err().is_argument());
        assert!(checked_byte_len(usize::MAX / 2, 1, 8).is_err());
    }
}
