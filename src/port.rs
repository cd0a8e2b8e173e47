//! Abstract port contract
//!
//! The protocol core never touches sockets or serial hardware. It drives a
//! [`Port`]: a non-blocking byte-level transport that frames PDUs into
//! whatever ADU its protocol needs (MBAP for TCP, address + CRC for RTU,
//! ASCII framing for ASCII). Every potentially blocking operation returns
//! [`StatusCode::Processing`] until it completes, which is what lets a
//! single external task multiplex many state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pdu::Pdu;
use crate::status::StatusCode;

/// Transport protocol family of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    /// Modbus RTU over a serial line
    Rtu,
    /// Modbus ASCII over a serial line
    Ascii,
    /// Modbus TCP
    Tcp,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolType::Rtu => write!(f, "RTU"),
            ProtocolType::Ascii => write!(f, "ASC"),
            ProtocolType::Tcp => write!(f, "TCP"),
        }
    }
}

/// Non-blocking byte-level transport driven by the protocol core.
///
/// A port is singly-owned by exactly one client port or one server resource
/// for its whole lifetime. `open`, `read` and `write` are the suspension
/// points of the cooperative scheduling model: a `Processing` return means
/// "not done this tick, call again".
pub trait Port {
    /// Transport protocol family.
    fn protocol_type(&self) -> ProtocolType;

    /// Whether the underlying transport is currently open.
    fn is_open(&self) -> bool;

    /// Open the transport. May return `Processing` while in progress.
    fn open(&mut self) -> StatusCode;

    /// Close the transport. May return `Processing` while in progress.
    fn close(&mut self) -> StatusCode;

    /// Switch between server mode (wait for requests) and client mode
    /// (initiate requests). Set by the owning component on attach.
    fn set_server_mode(&mut self, server_mode: bool);

    /// Drive the receive side. `Good` means one complete ADU has arrived
    /// and can be fetched with [`Port::read_buffer`].
    fn read(&mut self) -> StatusCode;

    /// Drive the transmit side of the previously composed ADU.
    fn write(&mut self) -> StatusCode;

    /// Compose the outgoing ADU from a PDU: unit id, function byte and body.
    fn write_buffer(&mut self, unit: u8, func: u8, data: &[u8]) -> StatusCode;

    /// Extract the received PDU (unit, function, body) into `pdu`.
    fn read_buffer(&mut self, pdu: &mut Pdu) -> StatusCode;

    /// Raw receive buffer contents, for signal payloads. Ports that do not
    /// retain the buffer may return an empty slice.
    fn read_buffer_data(&self) -> &[u8] {
        &[]
    }

    /// Raw transmit buffer contents, for signal payloads. Ports that do not
    /// retain the buffer may return an empty slice.
    fn write_buffer_data(&self) -> &[u8] {
        &[]
    }

    /// Human-readable text for the last transport error.
    fn last_error_text(&self) -> &str {
        ""
    }
}
