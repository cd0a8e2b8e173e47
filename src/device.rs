//! Device back-end contract
//!
//! A [`Device`] supplies the register, coil and diagnostic data behind a
//! server resource: the server parses a request, calls the matching device
//! method and encodes whatever comes back. Devices are shared between
//! server resources through `Arc` and are responsible for their own
//! locking; every method is invoked synchronously from within the owning
//! `process()` call.
//!
//! Returning `Err` with a status that maps onto a standard Modbus exception
//! makes the server frame that exception on the wire. Any other Bad status
//! is framed as `ServerDeviceFailure` (0x04), except
//! [`StatusCode::BadGatewayPathUnavailable`], which suppresses the response
//! entirely.

use crate::status::StatusCode;

/// Result type of device operations.
pub type DeviceResult<T> = Result<T, StatusCode>;

/// Comm event log data returned by [`Device::get_comm_event_log`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommEventLog {
    /// Device status word
    pub status: u16,
    /// Event counter
    pub event_count: u16,
    /// Bus message counter
    pub message_count: u16,
    /// Event bytes, most recent first
    pub events: Vec<u8>,
}

/// Register/coil storage and auxiliary functions behind a Modbus server.
///
/// The four data-access method groups are mandatory; the auxiliary
/// functions default to `BadIllegalFunction`, which the server frames as
/// exception 0x01: a device only implements what it supports.
pub trait Device: Send + Sync {
    /// Read `count` coils starting at `offset` (0x01).
    fn read_coils(&self, unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<bool>>;

    /// Read `count` discrete inputs starting at `offset` (0x02).
    fn read_discrete_inputs(&self, unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<bool>>;

    /// Read `count` holding registers starting at `offset` (0x03).
    fn read_holding_registers(&self, unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<u16>>;

    /// Read `count` input registers starting at `offset` (0x04).
    fn read_input_registers(&self, unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<u16>>;

    /// Write one coil (0x05).
    fn write_single_coil(&self, unit: u8, offset: u16, value: bool) -> DeviceResult<()>;

    /// Write one holding register (0x06).
    fn write_single_register(&self, unit: u8, offset: u16, value: u16) -> DeviceResult<()>;

    /// Write multiple coils (0x0F).
    fn write_multiple_coils(&self, unit: u8, offset: u16, values: &[bool]) -> DeviceResult<()>;

    /// Write multiple holding registers (0x10).
    fn write_multiple_registers(&self, unit: u8, offset: u16, values: &[u16]) -> DeviceResult<()>;

    /// Read the exception status byte (0x07).
    fn read_exception_status(&self, unit: u8) -> DeviceResult<u8> {
        let _ = unit;
        Err(StatusCode::BadIllegalFunction)
    }

    /// Diagnostics sub-function (0x08). The returned bytes form the
    /// response data after the echoed sub-function code.
    fn diagnostics(&self, unit: u8, subfunc: u16, data: &[u8]) -> DeviceResult<Vec<u8>> {
        let _ = (unit, subfunc, data);
        Err(StatusCode::BadIllegalFunction)
    }

    /// Comm event counter (0x0B): returns `(status, event_count)`.
    fn get_comm_event_counter(&self, unit: u8) -> DeviceResult<(u16, u16)> {
        let _ = unit;
        Err(StatusCode::BadIllegalFunction)
    }

    /// Comm event log (0x0C).
    fn get_comm_event_log(&self, unit: u8) -> DeviceResult<CommEventLog> {
        let _ = unit;
        Err(StatusCode::BadIllegalFunction)
    }

    /// Report server id (0x11). The returned bytes are device-defined.
    fn report_server_id(&self, unit: u8) -> DeviceResult<Vec<u8>> {
        let _ = unit;
        Err(StatusCode::BadIllegalFunction)
    }

    /// Mask write register (0x16):
    /// `value = (current & and_mask) | (or_mask & !and_mask)`.
    fn mask_write_register(
        &self,
        unit: u8,
        offset: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> DeviceResult<()> {
        let _ = (unit, offset, and_mask, or_mask);
        Err(StatusCode::BadIllegalFunction)
    }

    /// Combined write-then-read of holding registers (0x17).
    fn read_write_multiple_registers(
        &self,
        unit: u8,
        read_offset: u16,
        read_count: u16,
        write_offset: u16,
        values: &[u16],
    ) -> DeviceResult<Vec<u16>> {
        self.write_multiple_registers(unit, write_offset, values)?;
        self.read_holding_registers(unit, read_offset, read_count)
    }

    /// Read a FIFO register queue (0x18).
    fn read_fifo_queue(&self, unit: u8, fifo_addr: u16) -> DeviceResult<Vec<u16>> {
        let _ = (unit, fifo_addr);
        Err(StatusCode::BadIllegalFunction)
    }
}
