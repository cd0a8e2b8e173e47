//! Modbus client port
//!
//! A [`ClientPort`] owns one [`Port`] in client mode and serializes
//! transactions onto it. Each operation looks synchronous but is re-driven:
//! the caller keeps invoking the same operation with identical arguments
//! and receives [`StatusCode::Processing`] until the transaction reaches a
//! terminal status, which is returned on exactly one call.
//!
//! Several [`Client`] facades can share one port. At any instant at most
//! one transaction is in flight; the other requesters observe `Processing`
//! and are queued FIFO, claiming the port in the order they first saw
//! `Processing` on it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::device::CommEventLog;
use crate::pdu::Pdu;
use crate::port::{Port, ProtocolType};
use crate::protocol::{self, bit_utils, Request, Response, ResponseKind};
use crate::signal::{new_hub, SignalHub};
use crate::status::StatusCode;
use crate::{MAX_READ_DISCRETS, MAX_READ_REGISTERS};

/// Handle identifying a requester on a [`ClientPort`].
///
/// `ClientId::SELF` identifies direct calls on the port itself; every
/// attached [`Client`] facade gets its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u32);

impl ClientId {
    /// Identity used by operations invoked directly on the port.
    pub const SELF: ClientId = ClientId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Begin,
    WaitForOpen,
    PrepareToWrite,
    Write,
    Read,
    ProcessOutput,
}

/// Where the error text of a Bad terminal comes from.
enum ErrorOrigin {
    /// Transport failure: take the port's error text
    Port,
    /// Protocol failure: take the status code's canonical text
    Status,
}

struct Transaction {
    owner: ClientId,
    unit: u8,
    func: u8,
    request: Request,
    encoded: Pdu,
    kind: ResponseKind,
    broadcast: bool,
    state: State,
    tries_left: u32,
    tries_used: u32,
    tx_emitted: bool,
    rx_emitted: bool,
    result: Option<Response>,
}

/// State machine that owns one [`Port`] in client mode.
pub struct ClientPort {
    port: Box<dyn Port>,
    name: String,
    tries: u32,
    broadcast_enabled: bool,
    opened: bool,
    current: Option<Transaction>,
    wait_queue: VecDeque<ClientId>,
    next_client_id: u32,
    finished_result: Option<Response>,
    signals: SignalHub,
    last_status: StatusCode,
    last_error_status: StatusCode,
    last_error_text: String,
    last_status_timestamp: Option<DateTime<Utc>>,
    last_tries: u32,
}

impl ClientPort {
    /// Take ownership of a port and switch it into client mode.
    pub fn new(mut port: Box<dyn Port>) -> Self {
        port.set_server_mode(false);
        Self {
            port,
            name: String::from("client"),
            tries: 1,
            broadcast_enabled: true,
            opened: false,
            current: None,
            wait_queue: VecDeque::new(),
            next_client_id: 0,
            finished_result: None,
            signals: new_hub(),
            last_status: StatusCode::Uncertain,
            last_error_status: StatusCode::Uncertain,
            last_error_text: String::new(),
            last_status_timestamp: None,
            last_tries: 0,
        }
    }

    /// Wrap a new client port for sharing between [`Client`] facades.
    pub fn shared(port: Box<dyn Port>) -> Rc<RefCell<ClientPort>> {
        Rc::new(RefCell::new(Self::new(port)))
    }

    // --- configuration -----------------------------------------------------

    /// The owned port.
    pub fn port(&self) -> &dyn Port {
        self.port.as_ref()
    }

    /// Mutable access to the owned port.
    pub fn port_mut(&mut self) -> &mut dyn Port {
        self.port.as_mut()
    }

    /// Replace the owned port, closing the previous one first.
    pub fn set_port(&mut self, mut port: Box<dyn Port>) {
        let _ = self.port.close();
        self.current = None;
        self.opened = false;
        port.set_server_mode(false);
        self.port = port;
    }

    /// Protocol family of the owned port.
    pub fn protocol_type(&self) -> ProtocolType {
        self.port.protocol_type()
    }

    /// Whether the owned port is open.
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Close the port, dropping any in-flight transaction.
    ///
    /// Closing an already closed port returns Good and emits nothing.
    pub fn close(&mut self) -> StatusCode {
        self.current = None;
        self.wait_queue.clear();
        let status = self.port.close();
        if !status.is_processing() && self.opened {
            self.opened = false;
            self.signals.borrow_mut().emit_closed(&self.name);
        }
        status
    }

    /// Transaction attempts per request (default 1).
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Set the attempt count; zero coerces to one.
    pub fn set_tries(&mut self, tries: u32) {
        self.tries = tries.max(1);
    }

    /// Attempts consumed by the most recently terminated transaction.
    pub fn last_tries(&self) -> u32 {
        self.last_tries
    }

    /// Whether unit 0 requests are sent as broadcast (default true).
    pub fn is_broadcast_enabled(&self) -> bool {
        self.broadcast_enabled
    }

    pub fn set_broadcast_enabled(&mut self, enable: bool) {
        self.broadcast_enabled = enable;
    }

    /// Object name carried by emitted signals.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Requester owning the in-flight transaction, if any.
    pub fn current_client(&self) -> Option<ClientId> {
        self.current.as_ref().map(|tran| tran.owner)
    }

    /// Allocate an identity for a new client facade.
    pub fn attach_client(&mut self) -> ClientId {
        self.next_client_id += 1;
        ClientId(self.next_client_id)
    }

    // --- status block ------------------------------------------------------

    /// Terminal status of the most recent transaction.
    pub fn last_status(&self) -> StatusCode {
        self.last_status
    }

    /// Most recent Bad terminal status.
    pub fn last_error_status(&self) -> StatusCode {
        self.last_error_status
    }

    /// Text of the most recent Bad terminal.
    pub fn last_error_text(&self) -> &str {
        &self.last_error_text
    }

    /// When the most recent terminal status was recorded.
    pub fn last_status_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_status_timestamp
    }

    // --- signals -----------------------------------------------------------

    pub fn connect_opened(&self, handler: impl FnMut(&str) + 'static) {
        self.signals.borrow_mut().connect_opened(handler);
    }

    pub fn connect_closed(&self, handler: impl FnMut(&str) + 'static) {
        self.signals.borrow_mut().connect_closed(handler);
    }

    pub fn connect_tx(&self, handler: impl FnMut(&str, &[u8]) + 'static) {
        self.signals.borrow_mut().connect_tx(handler);
    }

    pub fn connect_rx(&self, handler: impl FnMut(&str, &[u8]) + 'static) {
        self.signals.borrow_mut().connect_rx(handler);
    }

    pub fn connect_error(&self, handler: impl FnMut(&str, StatusCode, &str) + 'static) {
        self.signals.borrow_mut().connect_error(handler);
    }

    pub fn connect_completed(&self, handler: impl FnMut(&str, StatusCode) + 'static) {
        self.signals.borrow_mut().connect_completed(handler);
    }

    // --- operations (port identity) ----------------------------------------

    /// Read coils (0x01) into a packed bit buffer.
    pub fn read_coils(&mut self, unit: u8, offset: u16, count: u16, values: &mut [u8]) -> StatusCode {
        self.read_coils_as(ClientId::SELF, unit, offset, count, values)
    }

    /// Read coils (0x01) into a bool slice.
    pub fn read_coils_as_bool_array(
        &mut self,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [bool],
    ) -> StatusCode {
        self.read_coils_as_bool_array_for(ClientId::SELF, unit, offset, count, values)
    }

    /// Read discrete inputs (0x02) into a packed bit buffer.
    pub fn read_discrete_inputs(
        &mut self,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [u8],
    ) -> StatusCode {
        self.read_discrete_inputs_as(ClientId::SELF, unit, offset, count, values)
    }

    /// Read discrete inputs (0x02) into a bool slice.
    pub fn read_discrete_inputs_as_bool_array(
        &mut self,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [bool],
    ) -> StatusCode {
        self.read_discrete_inputs_as_bool_array_for(ClientId::SELF, unit, offset, count, values)
    }

    /// Read holding registers (0x03).
    pub fn read_holding_registers(
        &mut self,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [u16],
    ) -> StatusCode {
        self.read_holding_registers_as(ClientId::SELF, unit, offset, count, values)
    }

    /// Read input registers (0x04).
    pub fn read_input_registers(
        &mut self,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [u16],
    ) -> StatusCode {
        self.read_input_registers_as(ClientId::SELF, unit, offset, count, values)
    }

    /// Write a single coil (0x05).
    pub fn write_single_coil(&mut self, unit: u8, offset: u16, value: bool) -> StatusCode {
        self.write_single_coil_as(ClientId::SELF, unit, offset, value)
    }

    /// Write a single holding register (0x06).
    pub fn write_single_register(&mut self, unit: u8, offset: u16, value: u16) -> StatusCode {
        self.write_single_register_as(ClientId::SELF, unit, offset, value)
    }

    /// Read the exception status byte (0x07).
    pub fn read_exception_status(&mut self, unit: u8, status: &mut u8) -> StatusCode {
        self.read_exception_status_as(ClientId::SELF, unit, status)
    }

    /// Diagnostics (0x08).
    pub fn diagnostics(
        &mut self,
        unit: u8,
        subfunc: u16,
        in_data: &[u8],
        out_data: &mut Vec<u8>,
    ) -> StatusCode {
        self.diagnostics_as(ClientId::SELF, unit, subfunc, in_data, out_data)
    }

    /// Get comm event counter (0x0B).
    pub fn get_comm_event_counter(
        &mut self,
        unit: u8,
        status: &mut u16,
        count: &mut u16,
    ) -> StatusCode {
        self.get_comm_event_counter_as(ClientId::SELF, unit, status, count)
    }

    /// Get comm event log (0x0C).
    pub fn get_comm_event_log(&mut self, unit: u8, log: &mut CommEventLog) -> StatusCode {
        self.get_comm_event_log_as(ClientId::SELF, unit, log)
    }

    /// Write multiple coils (0x0F) from a packed bit buffer.
    pub fn write_multiple_coils(
        &mut self,
        unit: u8,
        offset: u16,
        count: u16,
        values: &[u8],
    ) -> StatusCode {
        self.write_multiple_coils_as(ClientId::SELF, unit, offset, count, values)
    }

    /// Write multiple coils (0x0F) from a bool slice.
    pub fn write_multiple_coils_as_bool_array(
        &mut self,
        unit: u8,
        offset: u16,
        values: &[bool],
    ) -> StatusCode {
        self.write_multiple_coils_as_bool_array_for(ClientId::SELF, unit, offset, values)
    }

    /// Write multiple holding registers (0x10).
    pub fn write_multiple_registers(
        &mut self,
        unit: u8,
        offset: u16,
        values: &[u16],
    ) -> StatusCode {
        self.write_multiple_registers_as(ClientId::SELF, unit, offset, values)
    }

    /// Report server id (0x11).
    pub fn report_server_id(&mut self, unit: u8, data: &mut Vec<u8>) -> StatusCode {
        self.report_server_id_as(ClientId::SELF, unit, data)
    }

    /// Mask write register (0x16).
    pub fn mask_write_register(
        &mut self,
        unit: u8,
        offset: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> StatusCode {
        self.mask_write_register_as(ClientId::SELF, unit, offset, and_mask, or_mask)
    }

    /// Read/write multiple registers (0x17).
    pub fn read_write_multiple_registers(
        &mut self,
        unit: u8,
        read_offset: u16,
        read_count: u16,
        read_values: &mut [u16],
        write_offset: u16,
        write_values: &[u16],
    ) -> StatusCode {
        self.read_write_multiple_registers_as(
            ClientId::SELF,
            unit,
            read_offset,
            read_count,
            read_values,
            write_offset,
            write_values,
        )
    }

    /// Read FIFO queue (0x18).
    pub fn read_fifo_queue(
        &mut self,
        unit: u8,
        fifo_addr: u16,
        values: &mut Vec<u16>,
    ) -> StatusCode {
        self.read_fifo_queue_as(ClientId::SELF, unit, fifo_addr, values)
    }

    // --- operations (explicit client identity) ------------------------------

    pub fn read_coils_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [u8],
    ) -> StatusCode {
        if count == 0 || count > MAX_READ_DISCRETS || values.len() < protocol::bit_byte_count(count)
        {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(client, unit, Request::ReadCoils { offset, count });
        if status.is_good() {
            if let Some(Response::Bits { data, .. }) = self.take_result() {
                values[..data.len()].copy_from_slice(&data);
            }
        }
        status
    }

    pub fn read_coils_as_bool_array_for(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [bool],
    ) -> StatusCode {
        if count == 0 || count > MAX_READ_DISCRETS || values.len() < count as usize {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(client, unit, Request::ReadCoils { offset, count });
        if status.is_good() {
            if let Some(Response::Bits { data, count }) = self.take_result() {
                let bits = bit_utils::unpack_bits(&data, count as usize);
                values[..bits.len()].copy_from_slice(&bits);
            }
        }
        status
    }

    pub fn read_discrete_inputs_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [u8],
    ) -> StatusCode {
        if count == 0 || count > MAX_READ_DISCRETS || values.len() < protocol::bit_byte_count(count)
        {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(client, unit, Request::ReadDiscreteInputs { offset, count });
        if status.is_good() {
            if let Some(Response::Bits { data, .. }) = self.take_result() {
                values[..data.len()].copy_from_slice(&data);
            }
        }
        status
    }

    pub fn read_discrete_inputs_as_bool_array_for(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [bool],
    ) -> StatusCode {
        if count == 0 || count > MAX_READ_DISCRETS || values.len() < count as usize {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(client, unit, Request::ReadDiscreteInputs { offset, count });
        if status.is_good() {
            if let Some(Response::Bits { data, count }) = self.take_result() {
                let bits = bit_utils::unpack_bits(&data, count as usize);
                values[..bits.len()].copy_from_slice(&bits);
            }
        }
        status
    }

    pub fn read_holding_registers_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [u16],
    ) -> StatusCode {
        if count == 0 || count > MAX_READ_REGISTERS || values.len() < count as usize {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(client, unit, Request::ReadHoldingRegisters { offset, count });
        if status.is_good() {
            if let Some(Response::Registers { values: regs }) = self.take_result() {
                values[..regs.len()].copy_from_slice(&regs);
            }
        }
        status
    }

    pub fn read_input_registers_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        count: u16,
        values: &mut [u16],
    ) -> StatusCode {
        if count == 0 || count > MAX_READ_REGISTERS || values.len() < count as usize {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(client, unit, Request::ReadInputRegisters { offset, count });
        if status.is_good() {
            if let Some(Response::Registers { values: regs }) = self.take_result() {
                values[..regs.len()].copy_from_slice(&regs);
            }
        }
        status
    }

    pub fn write_single_coil_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        value: bool,
    ) -> StatusCode {
        let status = self.run(client, unit, Request::WriteSingleCoil { offset, value });
        if status.is_good() {
            self.take_result();
        }
        status
    }

    pub fn write_single_register_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        value: u16,
    ) -> StatusCode {
        let status = self.run(client, unit, Request::WriteSingleRegister { offset, value });
        if status.is_good() {
            self.take_result();
        }
        status
    }

    pub fn read_exception_status_as(
        &mut self,
        client: ClientId,
        unit: u8,
        status_out: &mut u8,
    ) -> StatusCode {
        let status = self.run(client, unit, Request::ReadExceptionStatus);
        if status.is_good() {
            if let Some(Response::ExceptionStatus { status: byte }) = self.take_result() {
                *status_out = byte;
            }
        }
        status
    }

    pub fn diagnostics_as(
        &mut self,
        client: ClientId,
        unit: u8,
        subfunc: u16,
        in_data: &[u8],
        out_data: &mut Vec<u8>,
    ) -> StatusCode {
        let status = self.run(
            client,
            unit,
            Request::Diagnostics {
                subfunc,
                data: in_data.to_vec(),
            },
        );
        if status.is_good() {
            if let Some(Response::Diagnostics { data, .. }) = self.take_result() {
                *out_data = data;
            }
        }
        status
    }

    pub fn get_comm_event_counter_as(
        &mut self,
        client: ClientId,
        unit: u8,
        status_out: &mut u16,
        count_out: &mut u16,
    ) -> StatusCode {
        let status = self.run(client, unit, Request::GetCommEventCounter);
        if status.is_good() {
            if let Some(Response::EventCounter { status: s, count }) = self.take_result() {
                *status_out = s;
                *count_out = count;
            }
        }
        status
    }

    pub fn get_comm_event_log_as(
        &mut self,
        client: ClientId,
        unit: u8,
        log: &mut CommEventLog,
    ) -> StatusCode {
        let status = self.run(client, unit, Request::GetCommEventLog);
        if status.is_good() {
            if let Some(Response::EventLog {
                status: s,
                event_count,
                message_count,
                events,
            }) = self.take_result()
            {
                log.status = s;
                log.event_count = event_count;
                log.message_count = message_count;
                log.events = events;
            }
        }
        status
    }

    pub fn write_multiple_coils_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        count: u16,
        values: &[u8],
    ) -> StatusCode {
        if count == 0 || count > MAX_READ_DISCRETS || values.len() < protocol::bit_byte_count(count)
        {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(
            client,
            unit,
            Request::WriteMultipleCoils {
                offset,
                count,
                data: values[..protocol::bit_byte_count(count)].to_vec(),
            },
        );
        if status.is_good() {
            self.take_result();
        }
        status
    }

    pub fn write_multiple_coils_as_bool_array_for(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        values: &[bool],
    ) -> StatusCode {
        if values.is_empty() || values.len() > MAX_READ_DISCRETS as usize {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(
            client,
            unit,
            Request::WriteMultipleCoils {
                offset,
                count: values.len() as u16,
                data: bit_utils::pack_bits(values),
            },
        );
        if status.is_good() {
            self.take_result();
        }
        status
    }

    pub fn write_multiple_registers_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        values: &[u16],
    ) -> StatusCode {
        if values.is_empty() || values.len() > MAX_READ_REGISTERS as usize {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(
            client,
            unit,
            Request::WriteMultipleRegisters {
                offset,
                values: values.to_vec(),
            },
        );
        if status.is_good() {
            self.take_result();
        }
        status
    }

    pub fn report_server_id_as(
        &mut self,
        client: ClientId,
        unit: u8,
        data_out: &mut Vec<u8>,
    ) -> StatusCode {
        let status = self.run(client, unit, Request::ReportServerId);
        if status.is_good() {
            if let Some(Response::ServerId { data }) = self.take_result() {
                *data_out = data;
            }
        }
        status
    }

    pub fn mask_write_register_as(
        &mut self,
        client: ClientId,
        unit: u8,
        offset: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> StatusCode {
        let status = self.run(
            client,
            unit,
            Request::MaskWriteRegister {
                offset,
                and_mask,
                or_mask,
            },
        );
        if status.is_good() {
            self.take_result();
        }
        status
    }

    #[allow(clippy::too_many_arguments)]
    pub fn read_write_multiple_registers_as(
        &mut self,
        client: ClientId,
        unit: u8,
        read_offset: u16,
        read_count: u16,
        read_values: &mut [u16],
        write_offset: u16,
        write_values: &[u16],
    ) -> StatusCode {
        if read_count == 0
            || read_count > MAX_READ_REGISTERS
            || read_values.len() < read_count as usize
            || write_values.is_empty()
            || write_values.len() > MAX_READ_REGISTERS as usize
        {
            return StatusCode::BadNotCorrectRequest;
        }
        let status = self.run(
            client,
            unit,
            Request::ReadWriteMultipleRegisters {
                read_offset,
                read_count,
                write_offset,
                values: write_values.to_vec(),
            },
        );
        if status.is_good() {
            if let Some(Response::Registers { values }) = self.take_result() {
                read_values[..values.len()].copy_from_slice(&values);
            }
        }
        status
    }

    pub fn read_fifo_queue_as(
        &mut self,
        client: ClientId,
        unit: u8,
        fifo_addr: u16,
        values_out: &mut Vec<u16>,
    ) -> StatusCode {
        let status = self.run(client, unit, Request::ReadFifoQueue { fifo_addr });
        if status.is_good() {
            if let Some(Response::Fifo { values }) = self.take_result() {
                *values_out = values;
            }
        }
        status
    }

    // --- transaction engine -------------------------------------------------

    fn run(&mut self, requester: ClientId, unit: u8, request: Request) -> StatusCode {
        let owner = self.current.as_ref().map(|tran| tran.owner);
        if let Some(owner) = owner {
            if owner != requester {
                // someone else holds the port: register intent, FIFO order
                self.enqueue(requester);
                return StatusCode::Processing;
            }
            return self.drive();
        }
        if let Some(&front) = self.wait_queue.front() {
            if front != requester {
                self.enqueue(requester);
                return StatusCode::Processing;
            }
            self.wait_queue.pop_front();
        }
        self.begin(requester, unit, request);
        self.drive()
    }

    fn enqueue(&mut self, requester: ClientId) {
        if !self.wait_queue.contains(&requester) {
            self.wait_queue.push_back(requester);
        }
    }

    fn begin(&mut self, owner: ClientId, unit: u8, request: Request) {
        let func = request.function().to_u8();
        debug!(
            "{}: begin transaction unit={} func=0x{:02X}",
            self.name, unit, func
        );
        self.finished_result = None;
        self.current = Some(Transaction {
            owner,
            unit,
            func,
            kind: request.response_kind(),
            broadcast: unit == 0 && self.broadcast_enabled,
            request,
            encoded: Pdu::new(),
            state: State::Begin,
            tries_left: self.tries.max(1),
            tries_used: 0,
            tx_emitted: false,
            rx_emitted: false,
            result: None,
        });
    }

    fn take_result(&mut self) -> Option<Response> {
        self.finished_result.take()
    }

    fn set_state(&mut self, state: State) {
        if let Some(tran) = self.current.as_mut() {
            tran.state = state;
        }
    }

    /// Consume one retry after a transport failure; true when another
    /// attempt remains and the machine has been rewound to the write phase.
    fn consume_try(&mut self) -> bool {
        match self.current.as_mut() {
            Some(tran) if tran.tries_left > 1 => {
                tran.tries_left -= 1;
                tran.tries_used += 1;
                tran.state = State::Write;
                true
            }
            _ => false,
        }
    }

    fn drive(&mut self) -> StatusCode {
        loop {
            let state = match self.current.as_ref() {
                Some(tran) => tran.state,
                None => return StatusCode::Processing,
            };
            match state {
                State::Begin => {
                    if self.port.is_open() {
                        self.opened = true;
                        self.set_state(State::PrepareToWrite);
                    } else {
                        if self.opened {
                            self.opened = false;
                            self.signals.borrow_mut().emit_closed(&self.name);
                        }
                        self.set_state(State::WaitForOpen);
                    }
                }
                State::WaitForOpen => {
                    let status = self.port.open();
                    if status.is_processing() {
                        return StatusCode::Processing;
                    }
                    if status.is_bad() {
                        return self.terminate(status, ErrorOrigin::Port);
                    }
                    if !self.port.is_open() {
                        return self.terminate(StatusCode::BadPortClosed, ErrorOrigin::Status);
                    }
                    self.opened = true;
                    self.signals.borrow_mut().emit_opened(&self.name);
                    self.set_state(State::PrepareToWrite);
                }
                State::PrepareToWrite => {
                    // prepared exactly once per transaction; retries resend
                    // the already composed buffer
                    let (status, origin) = {
                        let tran = match self.current.as_mut() {
                            Some(tran) => tran,
                            None => return StatusCode::Processing,
                        };
                        match protocol::encode_request(&tran.request, &mut tran.encoded) {
                            Ok(()) => (
                                self.port.write_buffer(
                                    tran.unit,
                                    tran.encoded.func,
                                    tran.encoded.data(),
                                ),
                                ErrorOrigin::Port,
                            ),
                            Err(status) => (status, ErrorOrigin::Status),
                        }
                    };
                    if status.is_bad() {
                        return self.terminate(status, origin);
                    }
                    if let Some(tran) = self.current.as_mut() {
                        tran.tries_used = 1;
                        tran.state = State::Write;
                    }
                }
                State::Write => {
                    let status = self.port.write();
                    if status.is_processing() {
                        return StatusCode::Processing;
                    }
                    if status.is_bad() {
                        if self.consume_try() {
                            continue;
                        }
                        return self.terminate(status, ErrorOrigin::Port);
                    }
                    let broadcast = {
                        let tran = match self.current.as_mut() {
                            Some(tran) => tran,
                            None => return StatusCode::Processing,
                        };
                        if !tran.tx_emitted {
                            tran.tx_emitted = true;
                            self.signals
                                .borrow_mut()
                                .emit_tx(&self.name, self.port.write_buffer_data());
                        }
                        tran.broadcast
                    };
                    if broadcast {
                        // no response on the bus for broadcast requests
                        return self.terminate(StatusCode::Good, ErrorOrigin::Status);
                    }
                    self.set_state(State::Read);
                }
                State::Read => {
                    let status = self.port.read();
                    if status.is_processing() {
                        return StatusCode::Processing;
                    }
                    if status.is_bad() {
                        if self.consume_try() {
                            continue;
                        }
                        return self.terminate(status, ErrorOrigin::Port);
                    }
                    if let Some(tran) = self.current.as_mut() {
                        if !tran.rx_emitted {
                            tran.rx_emitted = true;
                            self.signals
                                .borrow_mut()
                                .emit_rx(&self.name, self.port.read_buffer_data());
                        }
                    }
                    self.set_state(State::ProcessOutput);
                }
                State::ProcessOutput => {
                    let mut pdu = Pdu::new();
                    let status = self.port.read_buffer(&mut pdu);
                    if status.is_bad() {
                        return self.terminate(status, ErrorOrigin::Port);
                    }
                    let (unit, func, kind) = match self.current.as_ref() {
                        Some(tran) => (tran.unit, tran.func, tran.kind),
                        None => return StatusCode::Processing,
                    };
                    if pdu.unit != unit {
                        return self
                            .terminate(StatusCode::BadNotCorrectResponse, ErrorOrigin::Status);
                    }
                    if pdu.is_exception() {
                        if pdu.func & 0x7F != func {
                            return self
                                .terminate(StatusCode::BadNotCorrectResponse, ErrorOrigin::Status);
                        }
                        let status = pdu
                            .exception_code()
                            .and_then(StatusCode::from_exception)
                            .unwrap_or(StatusCode::Bad);
                        return self.terminate(status, ErrorOrigin::Status);
                    }
                    if pdu.func != func {
                        return self
                            .terminate(StatusCode::BadNotCorrectResponse, ErrorOrigin::Status);
                    }
                    return match protocol::decode_response(kind, &pdu) {
                        Ok(response) => {
                            if let Some(tran) = self.current.as_mut() {
                                tran.result = Some(response);
                            }
                            self.terminate(StatusCode::Good, ErrorOrigin::Status)
                        }
                        Err(status) => self.terminate(status, ErrorOrigin::Status),
                    };
                }
            }
        }
    }

    fn terminate(&mut self, status: StatusCode, origin: ErrorOrigin) -> StatusCode {
        if let Some(tran) = self.current.take() {
            self.last_tries = tran.tries_used;
            self.finished_result = if status.is_good() { tran.result } else { None };
        }
        self.last_status = status;
        self.last_status_timestamp = Some(Utc::now());
        if status.is_bad() {
            let text = match origin {
                ErrorOrigin::Port => self.port.last_error_text().to_string(),
                ErrorOrigin::Status => status.to_string(),
            };
            warn!("{}: transaction failed: {} ({:?})", self.name, text, status);
            self.last_error_status = status;
            self.last_error_text = text;
            let text = self.last_error_text.clone();
            self.signals.borrow_mut().emit_error(&self.name, status, &text);
        } else {
            debug!("{}: transaction completed", self.name);
        }
        self.signals.borrow_mut().emit_completed(&self.name, status);
        // closed edge observed after the terminal
        if self.opened && !self.port.is_open() {
            self.opened = false;
            self.signals.borrow_mut().emit_closed(&self.name);
        }
        status
    }
}

/// Lightweight facade bound to a `(unit, client port)` pair.
///
/// Facades are cheap; create one per remote unit and share the port. Each
/// operation delegates to the port under this facade's identity, so
/// concurrent facades are serialized FIFO by the port.
pub struct Client {
    unit: u8,
    id: ClientId,
    port: Rc<RefCell<ClientPort>>,
}

impl Client {
    /// Attach a new facade for `unit` to a shared client port.
    pub fn new(unit: u8, port: &Rc<RefCell<ClientPort>>) -> Self {
        let id = port.borrow_mut().attach_client();
        Self {
            unit,
            id,
            port: Rc::clone(port),
        }
    }

    /// Unit id this facade addresses.
    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn set_unit(&mut self, unit: u8) {
        self.unit = unit;
    }

    /// Identity of this facade on its port.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The shared port.
    pub fn port(&self) -> &Rc<RefCell<ClientPort>> {
        &self.port
    }

    /// Terminal status of this port's most recent transaction.
    pub fn last_status(&self) -> StatusCode {
        self.port.borrow().last_status()
    }

    pub fn read_coils(&self, offset: u16, count: u16, values: &mut [u8]) -> StatusCode {
        self.port
            .borrow_mut()
            .read_coils_as(self.id, self.unit, offset, count, values)
    }

    pub fn read_coils_as_bool_array(
        &self,
        offset: u16,
        count: u16,
        values: &mut [bool],
    ) -> StatusCode {
        self.port
            .borrow_mut()
            .read_coils_as_bool_array_for(self.id, self.unit, offset, count, values)
    }

    pub fn read_discrete_inputs(&self, offset: u16, count: u16, values: &mut [u8]) -> StatusCode {
        self.port
            .borrow_mut()
            .read_discrete_inputs_as(self.id, self.unit, offset, count, values)
    }

    pub fn read_discrete_inputs_as_bool_array(
        &self,
        offset: u16,
        count: u16,
        values: &mut [bool],
    ) -> StatusCode {
        self.port
            .borrow_mut()
            .read_discrete_inputs_as_bool_array_for(self.id, self.unit, offset, count, values)
    }

    pub fn read_holding_registers(&self, offset: u16, count: u16, values: &mut [u16]) -> StatusCode {
        self.port
            .borrow_mut()
            .read_holding_registers_as(self.id, self.unit, offset, count, values)
    }

    pub fn read_input_registers(&self, offset: u16, count: u16, values: &mut [u16]) -> StatusCode {
        self.port
            .borrow_mut()
            .read_input_registers_as(self.id, self.unit, offset, count, values)
    }

    pub fn write_single_coil(&self, offset: u16, value: bool) -> StatusCode {
        self.port
            .borrow_mut()
            .write_single_coil_as(self.id, self.unit, offset, value)
    }

    pub fn write_single_register(&self, offset: u16, value: u16) -> StatusCode {
        self.port
            .borrow_mut()
            .write_single_register_as(self.id, self.unit, offset, value)
    }

    pub fn read_exception_status(&self, status: &mut u8) -> StatusCode {
        self.port
            .borrow_mut()
            .read_exception_status_as(self.id, self.unit, status)
    }

    pub fn diagnostics(&self, subfunc: u16, in_data: &[u8], out_data: &mut Vec<u8>) -> StatusCode {
        self.port
            .borrow_mut()
            .diagnostics_as(self.id, self.unit, subfunc, in_data, out_data)
    }

    pub fn get_comm_event_counter(&self, status: &mut u16, count: &mut u16) -> StatusCode {
        self.port
            .borrow_mut()
            .get_comm_event_counter_as(self.id, self.unit, status, count)
    }

    pub fn get_comm_event_log(&self, log: &mut CommEventLog) -> StatusCode {
        self.port
            .borrow_mut()
            .get_comm_event_log_as(self.id, self.unit, log)
    }

    pub fn write_multiple_coils(&self, offset: u16, count: u16, values: &[u8]) -> StatusCode {
        self.port
            .borrow_mut()
            .write_multiple_coils_as(self.id, self.unit, offset, count, values)
    }

    pub fn write_multiple_coils_as_bool_array(&self, offset: u16, values: &[bool]) -> StatusCode {
        self.port
            .borrow_mut()
            .write_multiple_coils_as_bool_array_for(self.id, self.unit, offset, values)
    }

    pub fn write_multiple_registers(&self, offset: u16, values: &[u16]) -> StatusCode {
        self.port
            .borrow_mut()
            .write_multiple_registers_as(self.id, self.unit, offset, values)
    }

    pub fn report_server_id(&self, data: &mut Vec<u8>) -> StatusCode {
        self.port
            .borrow_mut()
            .report_server_id_as(self.id, self.unit, data)
    }

    pub fn mask_write_register(&self, offset: u16, and_mask: u16, or_mask: u16) -> StatusCode {
        self.port
            .borrow_mut()
            .mask_write_register_as(self.id, self.unit, offset, and_mask, or_mask)
    }

    pub fn read_write_multiple_registers(
        &self,
        read_offset: u16,
        read_count: u16,
        read_values: &mut [u16],
        write_offset: u16,
        write_values: &[u16],
    ) -> StatusCode {
        self.port.borrow_mut().read_write_multiple_registers_as(
            self.id,
            self.unit,
            read_offset,
            read_count,
            read_values,
            write_offset,
            write_values,
        )
    }

    pub fn read_fifo_queue(&self, fifo_addr: u16, values: &mut Vec<u16>) -> StatusCode {
        self.port
            .borrow_mut()
            .read_fifo_queue_as(self.id, self.unit, fifo_addr, values)
    }
}
