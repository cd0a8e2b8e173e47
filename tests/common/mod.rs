//! Shared test doubles: a scriptable mock port, a scriptable gateway and
//! signal counters.
//!
//! The mock port is programmed through a [`Script`] handle the test keeps
//! after moving the port into the component under test: each port method
//! pops its next scripted status, falling back to `Good` (and to the
//! `open_state` flag for `is_open`). Call counts and written frames are
//! observable through the shared [`PortProbe`].

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Mutex;

use mbport::client::ClientPort;
use mbport::device::{Device, DeviceResult};
use mbport::pdu::Pdu;
use mbport::port::{Port, ProtocolType};
use mbport::server::ServerResource;
use mbport::status::StatusCode;
use mbport::tcp_server::{TcpGateway, TcpServer, TcpServerConfig};

// ---------------------------------------------------------------------------
// Scripted port
// ---------------------------------------------------------------------------

/// Mutable script of a [`ScriptedPort`], shared with the test.
#[derive(Default)]
pub struct Script {
    /// Fallback for `is_open` once the script queue is drained
    pub open_state: bool,
    /// One-shot `is_open` results, consumed first
    pub is_open: VecDeque<bool>,
    pub open: VecDeque<StatusCode>,
    pub close: VecDeque<StatusCode>,
    pub read: VecDeque<StatusCode>,
    pub write: VecDeque<StatusCode>,
    pub write_buffer: VecDeque<StatusCode>,
    pub read_buffer: VecDeque<StatusCode>,
    /// PDUs served by `read_buffer`, oldest first
    pub rx_pdus: VecDeque<(u8, u8, Vec<u8>)>,
}

impl Script {
    /// Queue a received PDU.
    pub fn push_rx(&mut self, unit: u8, func: u8, body: &[u8]) {
        self.rx_pdus.push_back((unit, func, body.to_vec()));
    }
}

/// Observable side of a [`ScriptedPort`].
#[derive(Default)]
pub struct PortProbe {
    pub open_calls: Cell<u32>,
    pub close_calls: Cell<u32>,
    pub read_calls: Cell<u32>,
    pub write_calls: Cell<u32>,
    pub write_buffer_calls: Cell<u32>,
    pub read_buffer_calls: Cell<u32>,
    /// Every frame handed to `write_buffer`: (unit, func, body)
    pub written: RefCell<Vec<(u8, u8, Vec<u8>)>>,
    pub server_mode: Cell<Option<bool>>,
}

impl PortProbe {
    pub fn last_written(&self) -> Option<(u8, u8, Vec<u8>)> {
        self.written.borrow().last().cloned()
    }
}

/// Scriptable [`Port`] implementation.
pub struct ScriptedPort {
    proto: ProtocolType,
    script: Rc<RefCell<Script>>,
    probe: Rc<PortProbe>,
    tx_payload: Vec<u8>,
    rx_payload: Vec<u8>,
}

impl ScriptedPort {
    pub fn new(proto: ProtocolType) -> Self {
        let script = Script {
            open_state: true,
            ..Script::default()
        };
        Self {
            proto,
            script: Rc::new(RefCell::new(script)),
            probe: Rc::new(PortProbe::default()),
            tx_payload: Vec::new(),
            rx_payload: Vec::new(),
        }
    }

    /// Script handle; keep a clone before moving the port into a component.
    pub fn script(&self) -> Rc<RefCell<Script>> {
        Rc::clone(&self.script)
    }

    /// Probe handle; keep a clone before moving the port into a component.
    pub fn probe(&self) -> Rc<PortProbe> {
        Rc::clone(&self.probe)
    }
}

impl Port for ScriptedPort {
    fn protocol_type(&self) -> ProtocolType {
        self.proto
    }

    fn is_open(&self) -> bool {
        let mut script = self.script.borrow_mut();
        match script.is_open.pop_front() {
            Some(value) => value,
            None => script.open_state,
        }
    }

    fn open(&mut self) -> StatusCode {
        self.probe.open_calls.set(self.probe.open_calls.get() + 1);
        self.script
            .borrow_mut()
            .open
            .pop_front()
            .unwrap_or(StatusCode::Good)
    }

    fn close(&mut self) -> StatusCode {
        self.probe.close_calls.set(self.probe.close_calls.get() + 1);
        let mut script = self.script.borrow_mut();
        let status = script.close.pop_front().unwrap_or(StatusCode::Good);
        if status.is_good() {
            script.open_state = false;
        }
        status
    }

    fn set_server_mode(&mut self, server_mode: bool) {
        self.probe.server_mode.set(Some(server_mode));
    }

    fn read(&mut self) -> StatusCode {
        self.probe.read_calls.set(self.probe.read_calls.get() + 1);
        let status = self
            .script
            .borrow_mut()
            .read
            .pop_front()
            .unwrap_or(StatusCode::Good);
        if status.is_good() {
            // expose the pending frame for Rx signal payloads
            if let Some((_, _, body)) = self.script.borrow().rx_pdus.front() {
                self.rx_payload = body.clone();
            }
        }
        status
    }

    fn write(&mut self) -> StatusCode {
        self.probe.write_calls.set(self.probe.write_calls.get() + 1);
        self.script
            .borrow_mut()
            .write
            .pop_front()
            .unwrap_or(StatusCode::Good)
    }

    fn write_buffer(&mut self, unit: u8, func: u8, data: &[u8]) -> StatusCode {
        self.probe
            .write_buffer_calls
            .set(self.probe.write_buffer_calls.get() + 1);
        let status = self
            .script
            .borrow_mut()
            .write_buffer
            .pop_front()
            .unwrap_or(StatusCode::Good);
        if status.is_good() {
            self.probe
                .written
                .borrow_mut()
                .push((unit, func, data.to_vec()));
            self.tx_payload = data.to_vec();
        }
        status
    }

    fn read_buffer(&mut self, pdu: &mut Pdu) -> StatusCode {
        self.probe
            .read_buffer_calls
            .set(self.probe.read_buffer_calls.get() + 1);
        let mut script = self.script.borrow_mut();
        let status = script.read_buffer.pop_front().unwrap_or(StatusCode::Good);
        if status.is_bad() {
            return status;
        }
        match script.rx_pdus.pop_front() {
            Some((unit, func, body)) => {
                pdu.unit = unit;
                pdu.func = func;
                if pdu.set_data(&body).is_err() {
                    return StatusCode::BadReadBufferOverflow;
                }
                status
            }
            None => StatusCode::Bad,
        }
    }

    fn read_buffer_data(&self) -> &[u8] {
        &self.rx_payload
    }

    fn write_buffer_data(&self) -> &[u8] {
        &self.tx_payload
    }

    fn last_error_text(&self) -> &str {
        "scripted port error"
    }
}

// ---------------------------------------------------------------------------
// Scripted gateway
// ---------------------------------------------------------------------------

/// Mutable script of a [`ScriptedGateway`].
#[derive(Default)]
pub struct GatewayScript {
    pub open_state: bool,
    pub open: VecDeque<StatusCode>,
    pub close: VecDeque<StatusCode>,
    pub pending: VecDeque<Box<dyn Port>>,
}

/// Scriptable [`TcpGateway`] implementation.
pub struct ScriptedGateway {
    script: Rc<RefCell<GatewayScript>>,
    accept_calls: Rc<Cell<u32>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            script: Rc::new(RefCell::new(GatewayScript::default())),
            accept_calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn script(&self) -> Rc<RefCell<GatewayScript>> {
        Rc::clone(&self.script)
    }

    pub fn accept_calls(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.accept_calls)
    }
}

impl TcpGateway for ScriptedGateway {
    fn is_open(&self) -> bool {
        self.script.borrow().open_state
    }

    fn open(&mut self, _config: &TcpServerConfig) -> StatusCode {
        let mut script = self.script.borrow_mut();
        let status = script.open.pop_front().unwrap_or(StatusCode::Good);
        if status.is_good() {
            script.open_state = true;
        }
        status
    }

    fn close(&mut self) -> StatusCode {
        let mut script = self.script.borrow_mut();
        let status = script.close.pop_front().unwrap_or(StatusCode::Good);
        if status.is_good() {
            script.open_state = false;
        }
        status
    }

    fn next_pending_connection(&mut self) -> Option<Box<dyn Port>> {
        self.accept_calls.set(self.accept_calls.get() + 1);
        self.script.borrow_mut().pending.pop_front()
    }
}

// ---------------------------------------------------------------------------
// Signal counters
// ---------------------------------------------------------------------------

/// Counts every signal a component emits.
#[derive(Default)]
pub struct SignalCounters {
    pub opened: Cell<u32>,
    pub closed: Cell<u32>,
    pub tx: Cell<u32>,
    pub rx: Cell<u32>,
    pub error: Cell<u32>,
    pub completed: Cell<u32>,
    pub new_connection: Cell<u32>,
    pub close_connection: Cell<u32>,
    pub last_completed: Cell<Option<StatusCode>>,
    pub last_error: Cell<Option<StatusCode>>,
}

impl SignalCounters {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// `(tx, rx, completed)`: the triple most tests assert on.
    pub fn traffic(&self) -> (u32, u32, u32) {
        (self.tx.get(), self.rx.get(), self.completed.get())
    }

    pub fn attach_client(self: &Rc<Self>, port: &ClientPort) {
        let c = Rc::clone(self);
        port.connect_opened(move |_| c.opened.set(c.opened.get() + 1));
        let c = Rc::clone(self);
        port.connect_closed(move |_| c.closed.set(c.closed.get() + 1));
        let c = Rc::clone(self);
        port.connect_tx(move |_, _| c.tx.set(c.tx.get() + 1));
        let c = Rc::clone(self);
        port.connect_rx(move |_, _| c.rx.set(c.rx.get() + 1));
        let c = Rc::clone(self);
        port.connect_error(move |_, status, _| {
            c.error.set(c.error.get() + 1);
            c.last_error.set(Some(status));
        });
        let c = Rc::clone(self);
        port.connect_completed(move |_, status| {
            c.completed.set(c.completed.get() + 1);
            c.last_completed.set(Some(status));
        });
    }

    pub fn attach_server(self: &Rc<Self>, server: &ServerResource) {
        let c = Rc::clone(self);
        server.connect_opened(move |_| c.opened.set(c.opened.get() + 1));
        let c = Rc::clone(self);
        server.connect_closed(move |_| c.closed.set(c.closed.get() + 1));
        let c = Rc::clone(self);
        server.connect_tx(move |_, _| c.tx.set(c.tx.get() + 1));
        let c = Rc::clone(self);
        server.connect_rx(move |_, _| c.rx.set(c.rx.get() + 1));
        let c = Rc::clone(self);
        server.connect_error(move |_, status, _| {
            c.error.set(c.error.get() + 1);
            c.last_error.set(Some(status));
        });
        let c = Rc::clone(self);
        server.connect_completed(move |_, status| {
            c.completed.set(c.completed.get() + 1);
            c.last_completed.set(Some(status));
        });
    }

    pub fn attach_tcp(self: &Rc<Self>, server: &TcpServer) {
        let c = Rc::clone(self);
        server.connect_opened(move |_| c.opened.set(c.opened.get() + 1));
        let c = Rc::clone(self);
        server.connect_closed(move |_| c.closed.set(c.closed.get() + 1));
        let c = Rc::clone(self);
        server.connect_tx(move |_, _| c.tx.set(c.tx.get() + 1));
        let c = Rc::clone(self);
        server.connect_rx(move |_, _| c.rx.set(c.rx.get() + 1));
        let c = Rc::clone(self);
        server.connect_error(move |_, status, _| {
            c.error.set(c.error.get() + 1);
            c.last_error.set(Some(status));
        });
        let c = Rc::clone(self);
        server.connect_completed(move |_, status| {
            c.completed.set(c.completed.get() + 1);
            c.last_completed.set(Some(status));
        });
        let c = Rc::clone(self);
        server.connect_new_connection(move |_| c.new_connection.set(c.new_connection.get() + 1));
        let c = Rc::clone(self);
        server.connect_close_connection(move |_| {
            c.close_connection.set(c.close_connection.get() + 1)
        });
    }
}

// ---------------------------------------------------------------------------
// Scripted device
// ---------------------------------------------------------------------------

/// Device whose holding-register reads are scripted per call; everything
/// else answers with zeroed data.
#[derive(Default)]
pub struct ScriptedDevice {
    pub holding: Mutex<VecDeque<DeviceResult<Vec<u16>>>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_holding(&self, result: DeviceResult<Vec<u16>>) {
        self.holding.lock().unwrap().push_back(result);
    }
}

impl Device for ScriptedDevice {
    fn read_coils(&self, _unit: u8, _offset: u16, count: u16) -> DeviceResult<Vec<bool>> {
        Ok(vec![false; count as usize])
    }

    fn read_discrete_inputs(&self, _unit: u8, _offset: u16, count: u16) -> DeviceResult<Vec<bool>> {
        Ok(vec![false; count as usize])
    }

    fn read_holding_registers(&self, _unit: u8, _offset: u16, count: u16) -> DeviceResult<Vec<u16>> {
        match self.holding.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(vec![0; count as usize]),
        }
    }

    fn read_input_registers(&self, _unit: u8, _offset: u16, count: u16) -> DeviceResult<Vec<u16>> {
        Ok(vec![0; count as usize])
    }

    fn write_single_coil(&self, _unit: u8, _offset: u16, _value: bool) -> DeviceResult<()> {
        Ok(())
    }

    fn write_single_register(&self, _unit: u8, _offset: u16, _value: u16) -> DeviceResult<()> {
        Ok(())
    }

    fn write_multiple_coils(&self, _unit: u8, _offset: u16, _values: &[bool]) -> DeviceResult<()> {
        Ok(())
    }

    fn write_multiple_registers(
        &self,
        _unit: u8,
        _offset: u16,
        _values: &[u16],
    ) -> DeviceResult<()> {
        Ok(())
    }
}
