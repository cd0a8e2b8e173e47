//! Modbus server resource
//!
//! A [`ServerResource`] owns one [`Port`] in server mode and brokers
//! transactions between it and a [`Device`]: receive one PDU, dispatch it
//! through the codec to the device, send back the response or a Modbus
//! exception. The public crank is [`ServerResource::process`]; it makes as
//! much forward progress as the port allows and returns
//! [`StatusCode::Processing`] when blocked.
//!
//! Error policy (one cycle each): transport failures return the machine to
//! reading; malformed frames are reported locally but never answered on
//! the bus; Modbus-semantic violations and device failures are answered
//! with an exception PDU; `BadGatewayPathUnavailable` from the device
//! suppresses the response entirely.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::device::Device;
use crate::pdu::Pdu;
use crate::port::{Port, ProtocolType};
use crate::protocol::{self, bit_utils, Request};
use crate::signal::{new_hub, SignalHub};
use crate::status::StatusCode;
use crate::unitmap::UnitFilter;
use crate::UNIT_MAP_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    WaitForOpen,
    Read,
    WriteResponse,
    Write,
}

enum Outcome {
    /// Unit not serviced here: no response, no signals, keep reading
    Drop,
    /// Malformed frame: report locally, never answer garbage on the bus
    SilentError(StatusCode),
    /// Terminal without a response (broadcast, gateway-path-unavailable)
    Completed(StatusCode),
    /// Send `response`, then complete with `status`
    Respond { response: Pdu, status: StatusCode },
}

/// State machine that owns one [`Port`] in server mode.
pub struct ServerResource {
    port: Box<dyn Port>,
    device: Arc<dyn Device>,
    filter: UnitFilter,
    state: State,
    opened: bool,
    response: Pdu,
    response_status: StatusCode,
    name: String,
    signals: SignalHub,
    last_status: StatusCode,
    last_error_status: StatusCode,
    last_error_text: String,
    last_status_timestamp: Option<DateTime<Utc>>,
}

impl ServerResource {
    /// Take ownership of a port, switch it into server mode and bind it to
    /// a device.
    pub fn new(mut port: Box<dyn Port>, device: Arc<dyn Device>) -> Self {
        port.set_server_mode(true);
        Self {
            port,
            device,
            filter: UnitFilter::new(),
            state: State::Closed,
            opened: false,
            response: Pdu::new(),
            response_status: StatusCode::Uncertain,
            name: String::from("server"),
            signals: new_hub(),
            last_status: StatusCode::Uncertain,
            last_error_status: StatusCode::Uncertain,
            last_error_text: String::new(),
            last_status_timestamp: None,
        }
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

    /// The bound device.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Protocol family of the owned port.
    pub fn protocol_type(&self) -> ProtocolType {
        self.port.protocol_type()
    }

    /// Unit filter consulted for every received request.
    pub fn unit_filter(&self) -> &UnitFilter {
        &self.filter
    }

    /// Install a unit filter (copied).
    pub fn set_unit_filter(&mut self, filter: UnitFilter) {
        self.filter = filter;
    }

    pub fn is_broadcast_enabled(&self) -> bool {
        self.filter.is_broadcast_enabled()
    }

    pub fn set_broadcast_enabled(&mut self, enable: bool) {
        self.filter.set_broadcast_enabled(enable);
    }

    /// Raw unit map, if one is installed.
    pub fn unit_map(&self) -> Option<&[u8; UNIT_MAP_SIZE]> {
        self.filter.unit_map()
    }

    /// Install or remove the unit map (copied).
    pub fn set_unit_map(&mut self, map: Option<&[u8; UNIT_MAP_SIZE]>) {
        self.filter.set_unit_map(map);
    }

    pub fn is_unit_enabled(&self, unit: u8) -> bool {
        self.filter.is_accepted(unit)
    }

    pub fn set_unit_enabled(&mut self, unit: u8, enable: bool) {
        self.filter.set_unit_enabled(unit, enable);
    }

    /// Object name carried by emitted signals.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Whether the owned port is open.
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Whether the machine sits in its closed state with a closed port.
    pub fn is_state_closed(&self) -> bool {
        self.state == State::Closed && !self.port.is_open()
    }

    /// Command the resource to run; the port is opened by the next
    /// [`ServerResource::process`] crank.
    pub fn open(&mut self) -> StatusCode {
        if self.state == State::Closed && self.port.is_open() {
            self.opened = true;
        }
        StatusCode::Good
    }

    /// Close the port and reset the machine.
    ///
    /// Closing an already closed resource returns Good and emits nothing.
    pub fn close(&mut self) -> StatusCode {
        self.state = State::Closed;
        let status = self.port.close();
        if !status.is_processing() && self.opened {
            self.opened = false;
            self.signals.borrow_mut().emit_closed(&self.name);
        }
        status
    }

    // --- status block ------------------------------------------------------

    pub fn last_status(&self) -> StatusCode {
        self.last_status
    }

    pub fn last_error_status(&self) -> StatusCode {
        self.last_error_status
    }

    pub fn last_error_text(&self) -> &str {
        &self.last_error_text
    }

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

    // --- crank -------------------------------------------------------------

    /// Drive the server: open the port if needed, receive one request,
    /// dispatch it and send the response. Handles at most one request per
    /// crank.
    pub fn process(&mut self) -> StatusCode {
        // open -> closed edge between two cranks
        if self.opened && !self.port.is_open() {
            self.opened = false;
            self.state = State::Closed;
            info!("{}: port closed", self.name);
            self.signals.borrow_mut().emit_closed(&self.name);
            self.signals
                .borrow_mut()
                .emit_completed(&self.name, StatusCode::Good);
            return StatusCode::Good;
        }
        loop {
            match self.state {
                State::Closed => {
                    if self.port.is_open() {
                        self.opened = true;
                        self.state = State::Read;
                    } else {
                        self.state = State::WaitForOpen;
                    }
                }
                State::WaitForOpen => {
                    let status = self.port.open();
                    if status.is_processing() {
                        return StatusCode::Processing;
                    }
                    if status.is_bad() {
                        return self.fail_port(status);
                    }
                    if !self.port.is_open() {
                        return StatusCode::Processing;
                    }
                    self.opened = true;
                    info!("{}: port opened", self.name);
                    self.signals.borrow_mut().emit_opened(&self.name);
                    self.state = State::Read;
                }
                State::Read => {
                    let status = self.port.read();
                    if status.is_processing() {
                        return StatusCode::Processing;
                    }
                    if status.is_bad() {
                        return self.fail_completed_port(status);
                    }
                    // raw frame arrived: Rx fires before PDU extraction
                    self.signals
                        .borrow_mut()
                        .emit_rx(&self.name, self.port.read_buffer_data());
                    let mut pdu = Pdu::new();
                    let status = self.port.read_buffer(&mut pdu);
                    if status.is_bad() {
                        return self.fail_completed_port(status);
                    }
                    match self.process_device(&pdu) {
                        Outcome::Drop => {
                            debug!("{}: unit {} not serviced, frame dropped", self.name, pdu.unit);
                            continue;
                        }
                        Outcome::SilentError(status) => {
                            return self.fail_completed_status(status);
                        }
                        Outcome::Completed(status) => {
                            if status.is_bad() {
                                return self.fail_completed_status(status);
                            }
                            self.record_status(status);
                            self.signals
                                .borrow_mut()
                                .emit_completed(&self.name, status);
                            return status;
                        }
                        Outcome::Respond { response, status } => {
                            self.response = response;
                            self.response.unit = pdu.unit;
                            self.response_status = status;
                            self.state = State::WriteResponse;
                        }
                    }
                }
                State::WriteResponse => {
                    let status = self.port.write_buffer(
                        self.response.unit,
                        self.response.func,
                        self.response.data(),
                    );
                    if status.is_bad() {
                        self.state = State::Read;
                        return self.fail_completed_port(status);
                    }
                    self.state = State::Write;
                }
                State::Write => {
                    let status = self.port.write();
                    if status.is_processing() {
                        return StatusCode::Processing;
                    }
                    if status.is_bad() {
                        self.state = State::Read;
                        return self.fail_completed_port(status);
                    }
                    self.signals
                        .borrow_mut()
                        .emit_tx(&self.name, self.port.write_buffer_data());
                    self.state = State::Read;
                    let final_status = self.response_status;
                    if final_status.is_bad() {
                        return self.fail_completed_status(final_status);
                    }
                    self.record_status(StatusCode::Good);
                    self.signals
                        .borrow_mut()
                        .emit_completed(&self.name, StatusCode::Good);
                    return StatusCode::Good;
                }
            }
        }
    }

    /// Parse the request, consult the unit filter, dispatch to the device
    /// and prepare the response.
    fn process_device(&mut self, pdu: &Pdu) -> Outcome {
        if !self.filter.is_accepted(pdu.unit) {
            return Outcome::Drop;
        }
        let broadcast = self.filter.is_broadcast(pdu.unit);
        let request = match protocol::decode_request(pdu.func, pdu.data()) {
            Ok(request) => request,
            Err(StatusCode::BadNotCorrectRequest) => {
                // garbage on the wire: the transport's problem, never
                // answered with an exception
                return Outcome::SilentError(StatusCode::BadNotCorrectRequest);
            }
            Err(status) => return self.exception_outcome(pdu, status, broadcast),
        };
        debug!(
            "{}: request unit={} {}",
            self.name,
            pdu.unit,
            request.function()
        );
        let mut response = Pdu::new();
        response.func = pdu.func;
        if let Err(status) = self.dispatch(&request, pdu, &mut response) {
            return self.device_error_outcome(pdu, status, broadcast);
        }
        if broadcast {
            // broadcast requests never wait for a response
            return Outcome::Completed(StatusCode::Good);
        }
        Outcome::Respond {
            response,
            status: StatusCode::Good,
        }
    }

    /// Call the device method for `request` and encode the normal response.
    fn dispatch(
        &self,
        request: &Request,
        pdu: &Pdu,
        response: &mut Pdu,
    ) -> Result<(), StatusCode> {
        match request {
            Request::ReadCoils { offset, count } => {
                let mut bits = self.device.read_coils(pdu.unit, *offset, *count)?;
                bits.resize(*count as usize, false);
                protocol::encode_bits_response(response, &bit_utils::pack_bits(&bits), *count)
            }
            Request::ReadDiscreteInputs { offset, count } => {
                let mut bits = self.device.read_discrete_inputs(pdu.unit, *offset, *count)?;
                bits.resize(*count as usize, false);
                protocol::encode_bits_response(response, &bit_utils::pack_bits(&bits), *count)
            }
            Request::ReadHoldingRegisters { offset, count } => {
                let mut values = self.device.read_holding_registers(pdu.unit, *offset, *count)?;
                values.resize(*count as usize, 0);
                protocol::encode_registers_response(response, &values)
            }
            Request::ReadInputRegisters { offset, count } => {
                let mut values = self.device.read_input_registers(pdu.unit, *offset, *count)?;
                values.resize(*count as usize, 0);
                protocol::encode_registers_response(response, &values)
            }
            Request::WriteSingleCoil { offset, value } => {
                self.device.write_single_coil(pdu.unit, *offset, *value)?;
                protocol::encode_echo_response(response, pdu.data())
            }
            Request::WriteSingleRegister { offset, value } => {
                self.device.write_single_register(pdu.unit, *offset, *value)?;
                protocol::encode_echo_response(response, pdu.data())
            }
            Request::ReadExceptionStatus => {
                let status = self.device.read_exception_status(pdu.unit)?;
                protocol::encode_exception_status_response(response, status)
            }
            Request::Diagnostics { subfunc, data } => {
                let out = self.device.diagnostics(pdu.unit, *subfunc, data)?;
                protocol::encode_diagnostics_response(response, *subfunc, &out)
            }
            Request::GetCommEventCounter => {
                let (status, count) = self.device.get_comm_event_counter(pdu.unit)?;
                protocol::encode_event_counter_response(response, status, count)
            }
            Request::GetCommEventLog => {
                let log = self.device.get_comm_event_log(pdu.unit)?;
                protocol::encode_event_log_response(
                    response,
                    log.status,
                    log.event_count,
                    log.message_count,
                    &log.events,
                )
            }
            Request::WriteMultipleCoils {
                offset,
                count,
                data,
            } => {
                let bits = bit_utils::unpack_bits(data, *count as usize);
                self.device.write_multiple_coils(pdu.unit, *offset, &bits)?;
                protocol::encode_write_ack_response(response, *offset, *count)
            }
            Request::WriteMultipleRegisters { offset, values } => {
                self.device
                    .write_multiple_registers(pdu.unit, *offset, values)?;
                protocol::encode_write_ack_response(response, *offset, values.len() as u16)
            }
            Request::ReportServerId => {
                let data = self.device.report_server_id(pdu.unit)?;
                protocol::encode_server_id_response(response, &data)
            }
            Request::MaskWriteRegister {
                offset,
                and_mask,
                or_mask,
            } => {
                self.device
                    .mask_write_register(pdu.unit, *offset, *and_mask, *or_mask)?;
                protocol::encode_echo_response(response, pdu.data())
            }
            Request::ReadWriteMultipleRegisters {
                read_offset,
                read_count,
                write_offset,
                values,
            } => {
                let mut read = self.device.read_write_multiple_registers(
                    pdu.unit,
                    *read_offset,
                    *read_count,
                    *write_offset,
                    values,
                )?;
                read.resize(*read_count as usize, 0);
                protocol::encode_registers_response(response, &read)
            }
            Request::ReadFifoQueue { fifo_addr } => {
                let values = self.device.read_fifo_queue(pdu.unit, *fifo_addr)?;
                protocol::encode_fifo_response(response, &values)
            }
        }
    }

    /// Frame a semantic violation detected by the codec as an exception.
    fn exception_outcome(&self, pdu: &Pdu, status: StatusCode, broadcast: bool) -> Outcome {
        if broadcast {
            return Outcome::Completed(status);
        }
        let mut response = Pdu::new();
        let exception = status.to_exception().unwrap_or(0x04);
        if protocol::encode_exception_response(&mut response, pdu.func, exception).is_err() {
            return Outcome::SilentError(StatusCode::BadWriteBufferOverflow);
        }
        Outcome::Respond { response, status }
    }

    /// Frame a device failure: mapped statuses keep their own exception
    /// byte, a generic Bad becomes ServerDeviceFailure, and
    /// GatewayPathUnavailable is an intentional non-response.
    fn device_error_outcome(&self, pdu: &Pdu, status: StatusCode, broadcast: bool) -> Outcome {
        if status == StatusCode::BadGatewayPathUnavailable {
            return Outcome::Completed(StatusCode::Good);
        }
        if broadcast {
            return Outcome::Completed(status);
        }
        self.exception_outcome(pdu, status, false)
    }

    fn record_status(&mut self, status: StatusCode) {
        self.last_status = status;
        self.last_status_timestamp = Some(Utc::now());
    }

    fn record_error(&mut self, status: StatusCode, text: String) {
        warn!("{}: {} ({:?})", self.name, text, status);
        self.record_status(status);
        self.last_error_status = status;
        self.last_error_text = text;
        let text = self.last_error_text.clone();
        self.signals.borrow_mut().emit_error(&self.name, status, &text);
    }

    /// Transport failure without a completed edge (open path).
    fn fail_port(&mut self, status: StatusCode) -> StatusCode {
        let text = self.port.last_error_text().to_string();
        self.record_error(status, text);
        status
    }

    /// Transport failure terminating the current cycle.
    fn fail_completed_port(&mut self, status: StatusCode) -> StatusCode {
        let text = self.port.last_error_text().to_string();
        self.record_error(status, text);
        self.signals.borrow_mut().emit_completed(&self.name, status);
        status
    }

    /// Protocol/device failure terminating the current cycle.
    fn fail_completed_status(&mut self, status: StatusCode) -> StatusCode {
        self.record_error(status, status.to_string());
        self.signals.borrow_mut().emit_completed(&self.name, status);
        status
    }
}
