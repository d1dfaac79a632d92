use crate::error::{Error, Result};
use crate::utils::Element;

/// Three little-endian `i32` fields: type code, size0, size1.
pub(crate) const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrayHeader {
    pub type_code: i32,
    pub size0: i32,
    pub size1: i32,
}

impl ArrayHeader {
    pub fn for_element<T: Element>(size0: i32, size1: i32) -> Self {
        Self {
            type_code: T::TYPE_CODE,
            size0,
            size1,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        self.type_code.write_le(&mut bytes[0..4]);
        self.size0.write_le(&mut bytes[4..8]);
        self.size1.write_le(&mut bytes[8..12]);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::format(format!(
                "array file holds {} bytes, smaller than its {} byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        Ok(Self {
            type_code: i32::read_le(&bytes[0..4]),
            size0: i32::read_le(&bytes[4..8]),
            size1: i32::read_le(&bytes[8..12]),
        })
    }

    /// Checks the header against the expected element type and returns the
    /// dimensions.
    pub fn validate<T: Element>(&self) -> Result<(usize, usize)> {
        if self.type_code != T::TYPE_CODE {
            return Err(Error::format(format!(
                "array file stores type code {}, expected {}",
                self.type_code,
                T::TYPE_CODE
            )));
        }
        if self.size0 <= 0 || self.size1 <= 0 {
            return Err(Error::format(format!(
                "array file declares non-positive dimensions {}x{}",
                self.size0, self.size1
            )));
        }
        Ok((self.size0 as usize, self.size1 as usize))
    }
}
