//! Modbus protocol definitions and the PDU codec
//!
//! This module contains the core protocol definitions (function codes,
//! typed requests and responses) and the pure encode/decode functions that
//! translate between them and PDU bodies. No I/O happens here.
//!
//! The codec has two symmetric surfaces per function code:
//!
//! * `encode_request` / `decode_request`: request building on the client
//!   side, request parsing on the server side;
//! * `encode_*_response` / `decode_response`: response building on the
//!   server side, response parsing on the client side.
//!
//! All multi-byte numeric fields are big-endian. Shape violations decode to
//! [`StatusCode::BadNotCorrectRequest`] / [`StatusCode::BadNotCorrectResponse`];
//! semantic range violations decode to the mapped standard exception status.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pdu::Pdu;
use crate::status::StatusCode;
use crate::{MAX_READ_DISCRETS, MAX_READ_REGISTERS};

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Read Exception Status (0x07)
    ReadExceptionStatus = 0x07,
    /// Diagnostics (0x08)
    Diagnostics = 0x08,
    /// Get Comm Event Counter (0x0B)
    GetCommEventCounter = 0x0B,
    /// Get Comm Event Log (0x0C)
    GetCommEventLog = 0x0C,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
    /// Report Server ID (0x11)
    ReportServerId = 0x11,
    /// Mask Write Register (0x16)
    MaskWriteRegister = 0x16,
    /// Read/Write Multiple Registers (0x17)
    ReadWriteMultipleRegisters = 0x17,
    /// Read FIFO Queue (0x18)
    ReadFifoQueue = 0x18,
}

impl FunctionCode {
    /// Convert from a raw function byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FunctionCode::ReadCoils),
            0x02 => Some(FunctionCode::ReadDiscreteInputs),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x07 => Some(FunctionCode::ReadExceptionStatus),
            0x08 => Some(FunctionCode::Diagnostics),
            0x0B => Some(FunctionCode::GetCommEventCounter),
            0x0C => Some(FunctionCode::GetCommEventLog),
            0x0F => Some(FunctionCode::WriteMultipleCoils),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            0x11 => Some(FunctionCode::ReportServerId),
            0x16 => Some(FunctionCode::MaskWriteRegister),
            0x17 => Some(FunctionCode::ReadWriteMultipleRegisters),
            0x18 => Some(FunctionCode::ReadFifoQueue),
            _ => None,
        }
    }

    /// Convert to the raw function byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function.
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
                | FunctionCode::ReadFifoQueue
        )
    }

    /// Check if this is a write function.
    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleCoils
                | FunctionCode::WriteMultipleRegisters
                | FunctionCode::MaskWriteRegister
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::ReadExceptionStatus => "Read Exception Status",
            FunctionCode::Diagnostics => "Diagnostics",
            FunctionCode::GetCommEventCounter => "Get Comm Event Counter",
            FunctionCode::GetCommEventLog => "Get Comm Event Log",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
            FunctionCode::ReportServerId => "Report Server ID",
            FunctionCode::MaskWriteRegister => "Mask Write Register",
            FunctionCode::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
            FunctionCode::ReadFifoQueue => "Read FIFO Queue",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Parsed Modbus request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils {
        offset: u16,
        count: u16,
    },
    ReadDiscreteInputs {
        offset: u16,
        count: u16,
    },
    ReadHoldingRegisters {
        offset: u16,
        count: u16,
    },
    ReadInputRegisters {
        offset: u16,
        count: u16,
    },
    WriteSingleCoil {
        offset: u16,
        value: bool,
    },
    WriteSingleRegister {
        offset: u16,
        value: u16,
    },
    ReadExceptionStatus,
    Diagnostics {
        subfunc: u16,
        data: Vec<u8>,
    },
    GetCommEventCounter,
    GetCommEventLog,
    WriteMultipleCoils {
        offset: u16,
        count: u16,
        data: Vec<u8>,
    },
    WriteMultipleRegisters {
        offset: u16,
        values: Vec<u16>,
    },
    ReportServerId,
    MaskWriteRegister {
        offset: u16,
        and_mask: u16,
        or_mask: u16,
    },
    ReadWriteMultipleRegisters {
        read_offset: u16,
        read_count: u16,
        write_offset: u16,
        values: Vec<u16>,
    },
    ReadFifoQueue {
        fifo_addr: u16,
    },
}

impl Request {
    /// Function code this request travels under.
    pub fn function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils { .. } => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Request::ReadExceptionStatus => FunctionCode::ReadExceptionStatus,
            Request::Diagnostics { .. } => FunctionCode::Diagnostics,
            Request::GetCommEventCounter => FunctionCode::GetCommEventCounter,
            Request::GetCommEventLog => FunctionCode::GetCommEventLog,
            Request::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            Request::ReportServerId => FunctionCode::ReportServerId,
            Request::MaskWriteRegister { .. } => FunctionCode::MaskWriteRegister,
            Request::ReadWriteMultipleRegisters { .. } => {
                FunctionCode::ReadWriteMultipleRegisters
            }
            Request::ReadFifoQueue { .. } => FunctionCode::ReadFifoQueue,
        }
    }

    /// Shape of the response this request expects.
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Request::ReadCoils { count, .. } | Request::ReadDiscreteInputs { count, .. } => {
                ResponseKind::Bits { count: *count }
            }
            Request::ReadHoldingRegisters { count, .. }
            | Request::ReadInputRegisters { count, .. } => {
                ResponseKind::Registers { count: *count }
            }
            Request::WriteSingleCoil { .. } | Request::WriteSingleRegister { .. } => {
                ResponseKind::Echo { size: 4 }
            }
            Request::ReadExceptionStatus => ResponseKind::ExceptionStatus,
            Request::Diagnostics { .. } => ResponseKind::Diagnostics,
            Request::GetCommEventCounter => ResponseKind::EventCounter,
            Request::GetCommEventLog => ResponseKind::EventLog,
            Request::WriteMultipleCoils { .. } | Request::WriteMultipleRegisters { .. } => {
                ResponseKind::WriteAck
            }
            Request::ReportServerId => ResponseKind::ServerId,
            Request::MaskWriteRegister { .. } => ResponseKind::Echo { size: 6 },
            Request::ReadWriteMultipleRegisters { read_count, .. } => ResponseKind::Registers {
                count: *read_count,
            },
            Request::ReadFifoQueue { .. } => ResponseKind::Fifo,
        }
    }
}

/// Expected wire shape of a response, derived from the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `byte_count:u8` + packed bits
    Bits { count: u16 },
    /// `byte_count:u8` + `count` big-endian registers
    Registers { count: u16 },
    /// Exact echo of the request body
    Echo { size: usize },
    /// `offset:u16, count:u16`
    WriteAck,
    /// Single status byte
    ExceptionStatus,
    /// `subfunc:u16` + device-defined data
    Diagnostics,
    /// `status:u16, count:u16`
    EventCounter,
    /// `byte_count:u8, status:u16, event_count:u16, message_count:u16` + events
    EventLog,
    /// `byte_count:u8` + device-defined data
    ServerId,
    /// `byte_count:u16, count:u16` + registers
    Fifo,
}

/// Parsed Modbus response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Bits {
        count: u16,
        data: Vec<u8>,
    },
    Registers {
        values: Vec<u16>,
    },
    Echo {
        data: Vec<u8>,
    },
    WriteAck {
        offset: u16,
        count: u16,
    },
    ExceptionStatus {
        status: u8,
    },
    Diagnostics {
        subfunc: u16,
        data: Vec<u8>,
    },
    EventCounter {
        status: u16,
        count: u16,
    },
    EventLog {
        status: u16,
        event_count: u16,
        message_count: u16,
        events: Vec<u8>,
    },
    ServerId {
        data: Vec<u8>,
    },
    Fifo {
        values: Vec<u16>,
    },
}

/// Number of bytes needed to pack `count` bits.
#[inline]
pub fn bit_byte_count(count: u16) -> usize {
    (count as usize + 7) / 8
}

// ---------------------------------------------------------------------------
// Request codec
// ---------------------------------------------------------------------------

/// Encode a request into a PDU body, setting the PDU's function byte.
///
/// Fails with [`StatusCode::BadWriteBufferOverflow`] when the encoded body
/// does not fit.
pub fn encode_request(request: &Request, pdu: &mut Pdu) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.func = request.function().to_u8();
    match request {
        Request::ReadCoils { offset, count }
        | Request::ReadDiscreteInputs { offset, count }
        | Request::ReadHoldingRegisters { offset, count }
        | Request::ReadInputRegisters { offset, count } => {
            pdu.push_u16(*offset)?;
            pdu.push_u16(*count)
        }
        Request::WriteSingleCoil { offset, value } => {
            pdu.push_u16(*offset)?;
            pdu.push_u16(if *value { 0xFF00 } else { 0x0000 })
        }
        Request::WriteSingleRegister { offset, value } => {
            pdu.push_u16(*offset)?;
            pdu.push_u16(*value)
        }
        Request::ReadExceptionStatus
        | Request::GetCommEventCounter
        | Request::GetCommEventLog
        | Request::ReportServerId => Ok(()),
        Request::Diagnostics { subfunc, data } => {
            pdu.push_u16(*subfunc)?;
            pdu.extend(data)
        }
        Request::WriteMultipleCoils {
            offset,
            count,
            data,
        } => {
            let byte_count = bit_byte_count(*count);
            pdu.push_u16(*offset)?;
            pdu.push_u16(*count)?;
            pdu.push(byte_count as u8)?;
            pdu.extend(&data[..byte_count.min(data.len())])?;
            for _ in data.len()..byte_count {
                pdu.push(0)?;
            }
            zero_bit_padding(pdu, *count, 5);
            Ok(())
        }
        Request::WriteMultipleRegisters { offset, values } => {
            pdu.push_u16(*offset)?;
            pdu.push_u16(values.len() as u16)?;
            pdu.push((values.len() * 2) as u8)?;
            for value in values {
                pdu.push_u16(*value)?;
            }
            Ok(())
        }
        Request::MaskWriteRegister {
            offset,
            and_mask,
            or_mask,
        } => {
            pdu.push_u16(*offset)?;
            pdu.push_u16(*and_mask)?;
            pdu.push_u16(*or_mask)
        }
        Request::ReadWriteMultipleRegisters {
            read_offset,
            read_count,
            write_offset,
            values,
        } => {
            pdu.push_u16(*read_offset)?;
            pdu.push_u16(*read_count)?;
            pdu.push_u16(*write_offset)?;
            pdu.push_u16(values.len() as u16)?;
            pdu.push((values.len() * 2) as u8)?;
            for value in values {
                pdu.push_u16(*value)?;
            }
            Ok(())
        }
        Request::ReadFifoQueue { fifo_addr } => pdu.push_u16(*fifo_addr),
    }
}

/// Parse a received request body.
///
/// Shape violations yield [`StatusCode::BadNotCorrectRequest`]; semantic
/// range violations yield the mapped standard exception status; an unknown
/// function code yields [`StatusCode::BadIllegalFunction`].
pub fn decode_request(func: u8, data: &[u8]) -> Result<Request, StatusCode> {
    let function = FunctionCode::from_u8(func).ok_or(StatusCode::BadIllegalFunction)?;
    match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            let (offset, count) = decode_offset_count(data)?;
            if count == 0 || count > MAX_READ_DISCRETS {
                return Err(StatusCode::BadIllegalDataValue);
            }
            Ok(if function == FunctionCode::ReadCoils {
                Request::ReadCoils { offset, count }
            } else {
                Request::ReadDiscreteInputs { offset, count }
            })
        }
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            let (offset, count) = decode_offset_count(data)?;
            if count == 0 || count > MAX_READ_REGISTERS {
                return Err(StatusCode::BadIllegalDataValue);
            }
            Ok(if function == FunctionCode::ReadHoldingRegisters {
                Request::ReadHoldingRegisters { offset, count }
            } else {
                Request::ReadInputRegisters { offset, count }
            })
        }
        FunctionCode::WriteSingleCoil => {
            let (offset, raw) = decode_offset_count(data)?;
            let value = match raw {
                0x0000 => false,
                0xFF00 => true,
                // framing decision: anything else is garbage on the wire,
                // not a Modbus range violation
                _ => return Err(StatusCode::BadNotCorrectRequest),
            };
            Ok(Request::WriteSingleCoil { offset, value })
        }
        FunctionCode::WriteSingleRegister => {
            let (offset, value) = decode_offset_count(data)?;
            Ok(Request::WriteSingleRegister { offset, value })
        }
        FunctionCode::ReadExceptionStatus => {
            expect_size(data, 0)?;
            Ok(Request::ReadExceptionStatus)
        }
        FunctionCode::Diagnostics => {
            if data.len() < 2 {
                return Err(StatusCode::BadNotCorrectRequest);
            }
            Ok(Request::Diagnostics {
                subfunc: u16::from_be_bytes([data[0], data[1]]),
                data: data[2..].to_vec(),
            })
        }
        FunctionCode::GetCommEventCounter => {
            expect_size(data, 0)?;
            Ok(Request::GetCommEventCounter)
        }
        FunctionCode::GetCommEventLog => {
            expect_size(data, 0)?;
            Ok(Request::GetCommEventLog)
        }
        FunctionCode::WriteMultipleCoils => {
            if data.len() < 5 {
                return Err(StatusCode::BadNotCorrectRequest);
            }
            let offset = u16::from_be_bytes([data[0], data[1]]);
            let count = u16::from_be_bytes([data[2], data[3]]);
            let byte_count = data[4] as usize;
            if byte_count != bit_byte_count(count) || data.len() != 5 + byte_count {
                return Err(StatusCode::BadNotCorrectRequest);
            }
            if count == 0 || count > MAX_READ_DISCRETS {
                return Err(StatusCode::BadIllegalDataValue);
            }
            Ok(Request::WriteMultipleCoils {
                offset,
                count,
                data: data[5..].to_vec(),
            })
        }
        FunctionCode::WriteMultipleRegisters => {
            if data.len() < 5 {
                return Err(StatusCode::BadNotCorrectRequest);
            }
            let offset = u16::from_be_bytes([data[0], data[1]]);
            let count = u16::from_be_bytes([data[2], data[3]]);
            let byte_count = data[4] as usize;
            if byte_count != count as usize * 2 || data.len() != 5 + byte_count {
                return Err(StatusCode::BadNotCorrectRequest);
            }
            if count == 0 || count > MAX_READ_REGISTERS {
                return Err(StatusCode::BadIllegalDataValue);
            }
            Ok(Request::WriteMultipleRegisters {
                offset,
                values: be_registers(&data[5..]),
            })
        }
        FunctionCode::ReportServerId => {
            expect_size(data, 0)?;
            Ok(Request::ReportServerId)
        }
        FunctionCode::MaskWriteRegister => {
            expect_size(data, 6)?;
            Ok(Request::MaskWriteRegister {
                offset: u16::from_be_bytes([data[0], data[1]]),
                and_mask: u16::from_be_bytes([data[2], data[3]]),
                or_mask: u16::from_be_bytes([data[4], data[5]]),
            })
        }
        FunctionCode::ReadWriteMultipleRegisters => {
            if data.len() < 9 {
                return Err(StatusCode::BadNotCorrectRequest);
            }
            let read_offset = u16::from_be_bytes([data[0], data[1]]);
            let read_count = u16::from_be_bytes([data[2], data[3]]);
            let write_offset = u16::from_be_bytes([data[4], data[5]]);
            let write_count = u16::from_be_bytes([data[6], data[7]]);
            let byte_count = data[8] as usize;
            if byte_count != write_count as usize * 2 || data.len() != 9 + byte_count {
                return Err(StatusCode::BadNotCorrectRequest);
            }
            if read_count == 0
                || read_count > MAX_READ_REGISTERS
                || write_count == 0
                || write_count > MAX_READ_REGISTERS
            {
                return Err(StatusCode::BadIllegalDataValue);
            }
            Ok(Request::ReadWriteMultipleRegisters {
                read_offset,
                read_count,
                write_offset,
                values: be_registers(&data[9..]),
            })
        }
        FunctionCode::ReadFifoQueue => {
            expect_size(data, 2)?;
            Ok(Request::ReadFifoQueue {
                fifo_addr: u16::from_be_bytes([data[0], data[1]]),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Response codec
// ---------------------------------------------------------------------------

/// Encode a packed-bit response (0x01/0x02): byte count + bit bytes.
pub fn encode_bits_response(pdu: &mut Pdu, packed: &[u8], count: u16) -> Result<(), StatusCode> {
    let byte_count = bit_byte_count(count);
    pdu.clear();
    pdu.push(byte_count as u8)?;
    for i in 0..byte_count {
        pdu.push(packed.get(i).copied().unwrap_or(0))?;
    }
    zero_bit_padding(pdu, count, 1);
    Ok(())
}

/// Encode a register response (0x03/0x04/0x17): byte count + registers.
pub fn encode_registers_response(pdu: &mut Pdu, values: &[u16]) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push((values.len() * 2) as u8)?;
    for value in values {
        pdu.push_u16(*value)?;
    }
    Ok(())
}

/// Encode an echo response (0x05/0x06/0x16) from the request body.
pub fn encode_echo_response(pdu: &mut Pdu, request_body: &[u8]) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.extend(request_body)
}

/// Encode a write acknowledge response (0x0F/0x10): offset + count.
pub fn encode_write_ack_response(
    pdu: &mut Pdu,
    offset: u16,
    count: u16,
) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push_u16(offset)?;
    pdu.push_u16(count)
}

/// Encode a read-exception-status response (0x07).
pub fn encode_exception_status_response(pdu: &mut Pdu, status: u8) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push(status)
}

/// Encode a diagnostics response (0x08): subfunction echo + data.
pub fn encode_diagnostics_response(
    pdu: &mut Pdu,
    subfunc: u16,
    data: &[u8],
) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push_u16(subfunc)?;
    pdu.extend(data)
}

/// Encode a comm event counter response (0x0B).
pub fn encode_event_counter_response(
    pdu: &mut Pdu,
    status: u16,
    count: u16,
) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push_u16(status)?;
    pdu.push_u16(count)
}

/// Encode a comm event log response (0x0C).
pub fn encode_event_log_response(
    pdu: &mut Pdu,
    status: u16,
    event_count: u16,
    message_count: u16,
    events: &[u8],
) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push((6 + events.len()) as u8)?;
    pdu.push_u16(status)?;
    pdu.push_u16(event_count)?;
    pdu.push_u16(message_count)?;
    pdu.extend(events)
}

/// Encode a report-server-id response (0x11): byte count + device data.
pub fn encode_server_id_response(pdu: &mut Pdu, data: &[u8]) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push(data.len() as u8)?;
    pdu.extend(data)
}

/// Encode a FIFO queue response (0x18).
pub fn encode_fifo_response(pdu: &mut Pdu, values: &[u16]) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.push_u16((2 + values.len() * 2) as u16)?;
    pdu.push_u16(values.len() as u16)?;
    for value in values {
        pdu.push_u16(*value)?;
    }
    Ok(())
}

/// Encode an exception response: `func | 0x80` + one exception byte.
pub fn encode_exception_response(
    pdu: &mut Pdu,
    func: u8,
    exception: u8,
) -> Result<(), StatusCode> {
    pdu.clear();
    pdu.func = func | 0x80;
    pdu.push(exception)
}

/// Parse a received response body against the shape the request expects.
///
/// Any mismatch yields [`StatusCode::BadNotCorrectResponse`].
pub fn decode_response(kind: ResponseKind, pdu: &Pdu) -> Result<Response, StatusCode> {
    let data = pdu.data();
    match kind {
        ResponseKind::Bits { count } => {
            let byte_count = bit_byte_count(count);
            if data.len() != 1 + byte_count || data[0] as usize != byte_count {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::Bits {
                count,
                data: data[1..].to_vec(),
            })
        }
        ResponseKind::Registers { count } => {
            let byte_count = count as usize * 2;
            if data.len() != 1 + byte_count || data[0] as usize != byte_count {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::Registers {
                values: be_registers(&data[1..]),
            })
        }
        ResponseKind::Echo { size } => {
            if data.len() != size {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::Echo {
                data: data.to_vec(),
            })
        }
        ResponseKind::WriteAck => {
            if data.len() != 4 {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::WriteAck {
                offset: u16::from_be_bytes([data[0], data[1]]),
                count: u16::from_be_bytes([data[2], data[3]]),
            })
        }
        ResponseKind::ExceptionStatus => {
            if data.len() != 1 {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::ExceptionStatus { status: data[0] })
        }
        ResponseKind::Diagnostics => {
            if data.len() < 2 {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::Diagnostics {
                subfunc: u16::from_be_bytes([data[0], data[1]]),
                data: data[2..].to_vec(),
            })
        }
        ResponseKind::EventCounter => {
            if data.len() != 4 {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::EventCounter {
                status: u16::from_be_bytes([data[0], data[1]]),
                count: u16::from_be_bytes([data[2], data[3]]),
            })
        }
        ResponseKind::EventLog => {
            if data.len() < 7 {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            let byte_count = data[0] as usize;
            if byte_count < 6 || data.len() != 1 + byte_count {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::EventLog {
                status: u16::from_be_bytes([data[1], data[2]]),
                event_count: u16::from_be_bytes([data[3], data[4]]),
                message_count: u16::from_be_bytes([data[5], data[6]]),
                events: data[7..].to_vec(),
            })
        }
        ResponseKind::ServerId => {
            if data.is_empty() || data.len() != 1 + data[0] as usize {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::ServerId {
                data: data[1..].to_vec(),
            })
        }
        ResponseKind::Fifo => {
            if data.len() < 4 {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            let byte_count = u16::from_be_bytes([data[0], data[1]]) as usize;
            let count = u16::from_be_bytes([data[2], data[3]]) as usize;
            if byte_count != 2 + count * 2 || data.len() != 2 + byte_count {
                return Err(StatusCode::BadNotCorrectResponse);
            }
            Ok(Response::Fifo {
                values: be_registers(&data[4..]),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Bit/register conversion helpers
// ---------------------------------------------------------------------------

/// Data conversion utilities shared by client, server and device code.
pub mod bit_utils {
    /// Pack boolean values into bytes, LSB first.
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        bytes
    }

    /// Unpack bytes into boolean values, LSB first.
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        (0..bit_count)
            .map(|i| {
                bytes
                    .get(i / 8)
                    .map_or(false, |byte| byte & (1 << (i % 8)) != 0)
            })
            .collect()
    }

    /// Convert register values to big-endian bytes.
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }
}

fn decode_offset_count(data: &[u8]) -> Result<(u16, u16), StatusCode> {
    if data.len() != 4 {
        return Err(StatusCode::BadNotCorrectRequest);
    }
    Ok((
        u16::from_be_bytes([data[0], data[1]]),
        u16::from_be_bytes([data[2], data[3]]),
    ))
}

fn expect_size(data: &[u8], size: usize) -> Result<(), StatusCode> {
    if data.len() != size {
        return Err(StatusCode::BadNotCorrectRequest);
    }
    Ok(())
}

fn be_registers(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect()
}

// Padding bits past `count` in the last packed byte must be zero on the wire.
fn zero_bit_padding(pdu: &mut Pdu, count: u16, body_offset: usize) {
    let rem = count % 8;
    if rem == 0 || count == 0 {
        return;
    }
    let last = body_offset + bit_byte_count(count) - 1;
    let mask = (1u16 << rem) as u8 - 1;
    if let Some(byte) = pdu.data().get(last).copied() {
        let mut body = pdu.data().to_vec();
        body[last] = byte & mask;
        let _ = pdu.set_data(&body);
    }
}
