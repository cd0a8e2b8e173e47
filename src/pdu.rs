//! Modbus PDU data structure
//!
//! Uses a fixed-size stack array to avoid heap allocation on the hot
//! request/response path.

use crate::status::StatusCode;
use crate::MAX_PDU_DATA_SIZE;

/// A protocol data unit together with the unit id it travels with.
///
/// The `func` byte is kept outside the data buffer, matching the
/// `write_buffer`/`read_buffer` port contract; `data` holds only the
/// function-specific body (at most [`MAX_PDU_DATA_SIZE`] bytes).
#[derive(Clone)]
pub struct Pdu {
    /// Unit id the PDU is addressed to / received from
    pub unit: u8,
    /// Raw function code; top bit set marks an exception response
    pub func: u8,
    data: [u8; MAX_PDU_DATA_SIZE],
    len: usize,
}

impl Pdu {
    /// Create an empty PDU.
    #[inline]
    pub fn new() -> Self {
        Self {
            unit: 0,
            func: 0,
            data: [0; MAX_PDU_DATA_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from unit, function code and body bytes.
    pub fn from_parts(unit: u8, func: u8, body: &[u8]) -> Result<Self, StatusCode> {
        let mut pdu = Self::new();
        pdu.unit = unit;
        pdu.func = func;
        pdu.extend(body)?;
        Ok(pdu)
    }

    /// Reset the PDU to empty, keeping unit and function untouched.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Body bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Body length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the body is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total wire size of the PDU (function byte + body).
    #[inline]
    pub fn wire_size(&self) -> usize {
        1 + self.len
    }

    /// Append a single byte.
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<(), StatusCode> {
        if self.len >= MAX_PDU_DATA_SIZE {
            return Err(StatusCode::BadWriteBufferOverflow);
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a u16 in big-endian byte order.
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<(), StatusCode> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    /// Append a byte slice.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), StatusCode> {
        if self.len + bytes.len() > MAX_PDU_DATA_SIZE {
            return Err(StatusCode::BadWriteBufferOverflow);
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Replace the body with the given bytes.
    pub fn set_data(&mut self, bytes: &[u8]) -> Result<(), StatusCode> {
        if bytes.len() > MAX_PDU_DATA_SIZE {
            return Err(StatusCode::BadReadBufferOverflow);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    /// Read a big-endian u16 at the given body offset.
    #[inline]
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        if offset + 2 <= self.len {
            Some(u16::from_be_bytes([
                self.data[offset],
                self.data[offset + 1],
            ]))
        } else {
            None
        }
    }

    /// Check whether this PDU carries an exception response.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.func & 0x80 != 0
    }

    /// Exception byte of an exception response, if present.
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len >= 1 {
            Some(self.data[0])
        } else {
            None
        }
    }
}

impl Default for Pdu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pdu")
            .field("unit", &self.unit)
            .field("func", &format_args!("0x{:02X}", self.func))
            .field("data", &format_args!("{}", hex::encode(self.data())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_PDU_SIZE;

    #[test]
    fn test_push_and_read_back() {
        let mut pdu = Pdu::new();
        pdu.unit = 1;
        pdu.func = 0x03;
        pdu.push_u16(0x1234).unwrap();
        pdu.push(0xAB).unwrap();
        assert_eq!(pdu.data(), &[0x12, 0x34, 0xAB]);
        assert_eq!(pdu.u16_at(0), Some(0x1234));
        assert_eq!(pdu.u16_at(2), None);
        assert_eq!(pdu.wire_size(), 4);
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut pdu = Pdu::new();
        pdu.extend(&[0u8; MAX_PDU_DATA_SIZE]).unwrap();
        assert_eq!(pdu.push(0), Err(StatusCode::BadWriteBufferOverflow));
        assert_eq!(
            pdu.extend(&[0]),
            Err(StatusCode::BadWriteBufferOverflow)
        );
        assert_eq!(MAX_PDU_SIZE, pdu.wire_size());
    }

    #[test]
    fn test_exception_accessors() {
        let pdu = Pdu::from_parts(1, 0x83, &[0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));

        let pdu = Pdu::from_parts(1, 0x03, &[0x02]).unwrap();
        assert!(!pdu.is_exception());
        assert_eq!(pdu.exception_code(), None);
    }
}
