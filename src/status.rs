//! # Status codes
//!
//! Every operation in this crate reports its outcome through [`StatusCode`],
//! a single flat enumeration split into three disjoint bands:
//!
//! * **Good**: the operation finished successfully (`Good`, `Uncertain`).
//! * **Processing**: the operation has not finished yet; the caller must
//!   drive it again with the same arguments.
//! * **Bad**: the operation failed for this cycle.
//!
//! Bad codes carry a sub-kind: transport failures (serial/TCP open, read,
//! write, timeouts, checksum), protocol failures (`BadNotCorrectRequest`,
//! `BadNotCorrectResponse`, buffer overflows) and the standard Modbus
//! exception codes 0x01..=0x0B, which map bijectively onto their own
//! status values.
//!
//! ## Classification
//!
//! ```rust
//! use mbport::StatusCode;
//!
//! let status = StatusCode::BadTcpReadTimeout;
//! assert!(status.is_bad());
//! assert!(status.is_transport_error());
//! assert!(!status.is_standard_exception());
//! ```
//!
//! ## Exception mapping
//!
//! ```rust
//! use mbport::StatusCode;
//!
//! let status = StatusCode::from_exception(0x02);
//! assert_eq!(status, Some(StatusCode::BadIllegalDataAddress));
//! assert_eq!(StatusCode::BadIllegalDataAddress.to_exception(), Some(0x02));
//! ```

use thiserror::Error;

/// Status of a Modbus operation.
///
/// The `Display` implementation yields the canonical description for each
/// code; components use it as the default error text when the failure did
/// not originate in the port.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Operation completed successfully
    #[error("operation completed successfully")]
    Good,

    /// Neutral success value, used before any operation has run
    #[error("status is uncertain")]
    Uncertain,

    /// Operation is still in flight; drive it again
    #[error("operation is still in progress")]
    Processing,

    // --- Modbus standard exceptions (0x01..=0x0B) ---
    /// The function code is not an allowable action for the server (0x01)
    #[error("illegal function")]
    BadIllegalFunction,

    /// The data address is not an allowable address for the server (0x02)
    #[error("illegal data address")]
    BadIllegalDataAddress,

    /// A value in the request data field is not allowable (0x03)
    #[error("illegal data value")]
    BadIllegalDataValue,

    /// Unrecoverable error while the server performed the action (0x04)
    #[error("server device failure")]
    BadServerDeviceFailure,

    /// Request accepted, long-duration processing in progress (0x05)
    #[error("acknowledge")]
    BadAcknowledge,

    /// The server is busy with a long-duration command (0x06)
    #[error("server device busy")]
    BadServerDeviceBusy,

    /// Negative acknowledge (0x07)
    #[error("negative acknowledge")]
    BadNegativeAcknowledge,

    /// Parity error detected in extended memory (0x08)
    #[error("memory parity error")]
    BadMemoryParityError,

    /// Reserved exception code 0x09
    #[error("reserved exception (0x09)")]
    BadReservedException9,

    /// Gateway could not allocate an internal communication path (0x0A)
    #[error("gateway path unavailable")]
    BadGatewayPathUnavailable,

    /// No response was obtained from the gateway target device (0x0B)
    #[error("gateway target device failed to respond")]
    BadGatewayTargetFailedToRespond,

    // --- protocol-layer failures ---
    /// Received request does not match the wire shape for its function code
    #[error("request is not correct")]
    BadNotCorrectRequest,

    /// Received response does not match the pending request
    #[error("response is not correct")]
    BadNotCorrectResponse,

    /// Encoded payload does not fit into the target buffer
    #[error("write buffer overflow")]
    BadWriteBufferOverflow,

    /// Received payload does not fit into the receive buffer
    #[error("read buffer overflow")]
    BadReadBufferOverflow,

    // --- transport-layer failures ---
    /// Serial port could not be opened
    #[error("serial port cannot be opened")]
    BadSerialOpen,

    /// Serial read failed
    #[error("serial port read error")]
    BadSerialRead,

    /// Serial write failed
    #[error("serial port write error")]
    BadSerialWrite,

    /// Serial read timed out
    #[error("serial port read timeout")]
    BadSerialReadTimeout,

    /// Serial write timed out
    #[error("serial port write timeout")]
    BadSerialWriteTimeout,

    /// CRC check of a received RTU frame failed
    #[error("CRC check failed")]
    BadCrc,

    /// ASCII frame is missing its leading colon
    #[error("ASCII frame missing start colon")]
    BadAscMissColon,

    /// ASCII frame is missing its CR/LF terminator
    #[error("ASCII frame missing CR/LF")]
    BadAscMissCrLf,

    /// LRC check of a received ASCII frame failed
    #[error("LRC check failed")]
    BadLrc,

    /// TCP socket could not be created
    #[error("TCP socket cannot be created")]
    BadTcpCreate,

    /// TCP connection could not be established
    #[error("TCP connection failed")]
    BadTcpConnect,

    /// TCP peer disconnected
    #[error("TCP peer disconnected")]
    BadTcpDisconnect,

    /// TCP listener could not bind
    #[error("TCP bind failed")]
    BadTcpBind,

    /// TCP listener could not start listening
    #[error("TCP listen failed")]
    BadTcpListen,

    /// TCP listener could not accept a connection
    #[error("TCP accept failed")]
    BadTcpAccept,

    /// TCP write failed
    #[error("TCP write error")]
    BadTcpWrite,

    /// TCP read failed
    #[error("TCP read error")]
    BadTcpRead,

    /// TCP read timed out
    #[error("TCP read timeout")]
    BadTcpReadTimeout,

    /// Port is closed
    #[error("port is closed")]
    BadPortClosed,

    /// Generic failure without a more specific sub-kind
    #[error("unspecified error")]
    Bad,
}

impl StatusCode {
    /// Check whether the code belongs to the Good band.
    pub fn is_good(self) -> bool {
        matches!(self, StatusCode::Good | StatusCode::Uncertain)
    }

    /// Check whether the operation is still in flight.
    pub fn is_processing(self) -> bool {
        self == StatusCode::Processing
    }

    /// Check whether the code belongs to the Bad band.
    pub fn is_bad(self) -> bool {
        !self.is_good() && !self.is_processing()
    }

    /// Check whether the code is one of the standard Modbus exceptions.
    pub fn is_standard_exception(self) -> bool {
        self.to_exception().is_some()
    }

    /// Check whether the code describes a transport-layer failure.
    pub fn is_transport_error(self) -> bool {
        matches!(
            self,
            StatusCode::BadSerialOpen
                | StatusCode::BadSerialRead
                | StatusCode::BadSerialWrite
                | StatusCode::BadSerialReadTimeout
                | StatusCode::BadSerialWriteTimeout
                | StatusCode::BadCrc
                | StatusCode::BadAscMissColon
                | StatusCode::BadAscMissCrLf
                | StatusCode::BadLrc
                | StatusCode::BadTcpCreate
                | StatusCode::BadTcpConnect
                | StatusCode::BadTcpDisconnect
                | StatusCode::BadTcpBind
                | StatusCode::BadTcpListen
                | StatusCode::BadTcpAccept
                | StatusCode::BadTcpWrite
                | StatusCode::BadTcpRead
                | StatusCode::BadTcpReadTimeout
                | StatusCode::BadPortClosed
        )
    }

    /// Check whether the code describes a protocol-layer failure.
    pub fn is_protocol_error(self) -> bool {
        matches!(
            self,
            StatusCode::BadNotCorrectRequest
                | StatusCode::BadNotCorrectResponse
                | StatusCode::BadWriteBufferOverflow
                | StatusCode::BadReadBufferOverflow
        ) || self.is_standard_exception()
    }

    /// Map a Modbus exception byte to its status code.
    ///
    /// Returns `None` for bytes outside 0x01..=0x0B.
    pub fn from_exception(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(StatusCode::BadIllegalFunction),
            0x02 => Some(StatusCode::BadIllegalDataAddress),
            0x03 => Some(StatusCode::BadIllegalDataValue),
            0x04 => Some(StatusCode::BadServerDeviceFailure),
            0x05 => Some(StatusCode::BadAcknowledge),
            0x06 => Some(StatusCode::BadServerDeviceBusy),
            0x07 => Some(StatusCode::BadNegativeAcknowledge),
            0x08 => Some(StatusCode::BadMemoryParityError),
            0x09 => Some(StatusCode::BadReservedException9),
            0x0A => Some(StatusCode::BadGatewayPathUnavailable),
            0x0B => Some(StatusCode::BadGatewayTargetFailedToRespond),
            _ => None,
        }
    }

    /// Map the status code back to its Modbus exception byte.
    ///
    /// Returns `None` for codes that are not standard exceptions.
    pub fn to_exception(self) -> Option<u8> {
        match self {
            StatusCode::BadIllegalFunction => Some(0x01),
            StatusCode::BadIllegalDataAddress => Some(0x02),
            StatusCode::BadIllegalDataValue => Some(0x03),
            StatusCode::BadServerDeviceFailure => Some(0x04),
            StatusCode::BadAcknowledge => Some(0x05),
            StatusCode::BadServerDeviceBusy => Some(0x06),
            StatusCode::BadNegativeAcknowledge => Some(0x07),
            StatusCode::BadMemoryParityError => Some(0x08),
            StatusCode::BadReservedException9 => Some(0x09),
            StatusCode::BadGatewayPathUnavailable => Some(0x0A),
            StatusCode::BadGatewayTargetFailedToRespond => Some(0x0B),
            _ => None,
        }
    }
}
