//! Modbus TCP server
//!
//! A [`TcpServer`] owns a passive listener through the [`TcpGateway`]
//! abstraction, wraps every accepted connection into a fresh
//! [`ServerResource`] bound to the shared device and unit filter, and
//! multiplexes the sub-servers' cranks from its own
//! [`TcpServer::process`]. Sub-server Tx/Rx/Error/Completed signals are
//! forwarded upward with the sub-server's name as source; a sub-server
//! whose connection closes is reaped with a single `CloseConnection`
//! signal.

use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::port::Port;
use crate::server::ServerResource;
use crate::signal::{new_hub, SignalHub};
use crate::status::StatusCode;
use crate::unitmap::UnitFilter;
use crate::{STANDARD_TCP_PORT, UNIT_MAP_SIZE};

/// Passive listener abstraction consumed by [`TcpServer`].
///
/// Byte-level socket handling stays outside the protocol core: the gateway
/// binds/listens according to the config and yields every accepted
/// connection already wrapped into a [`Port`].
pub trait TcpGateway {
    /// Whether the listener is bound and listening.
    fn is_open(&self) -> bool;

    /// Bind and listen. May return `Processing` while in progress.
    fn open(&mut self, config: &TcpServerConfig) -> StatusCode;

    /// Stop listening.
    fn close(&mut self) -> StatusCode;

    /// Next accepted connection, or `None` when no connection is pending.
    fn next_pending_connection(&mut self) -> Option<Box<dyn Port>>;

    /// Human-readable text for the last listener error.
    fn last_error_text(&self) -> &str {
        ""
    }
}

/// TCP server configuration.
///
/// Settings persist across open/close cycles; they are applied when the
/// listener (re)opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpServerConfig {
    /// Address to bind, default `0.0.0.0`
    pub ipaddr: String,
    /// TCP port, default 502
    pub port: u16,
    /// Connection inactivity timeout in milliseconds
    pub timeout_ms: u32,
    /// Maximum simultaneous connections, at least 1
    pub max_connections: u32,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            ipaddr: String::from("0.0.0.0"),
            port: STANDARD_TCP_PORT,
            timeout_ms: 3000,
            max_connections: 10,
        }
    }
}

/// Listener state machine owning one sub-server per live connection.
pub struct TcpServer {
    gateway: Box<dyn TcpGateway>,
    device: Arc<dyn Device>,
    config: TcpServerConfig,
    filter: UnitFilter,
    subs: Vec<ServerResource>,
    opened: bool,
    cmd_close: bool,
    conn_counter: u64,
    name: String,
    signals: SignalHub,
    last_status: StatusCode,
    last_error_status: StatusCode,
    last_error_text: String,
    last_status_timestamp: Option<DateTime<Utc>>,
}

impl TcpServer {
    /// Create a server over a gateway, serving `device`.
    pub fn new(gateway: Box<dyn TcpGateway>, device: Arc<dyn Device>) -> Self {
        Self {
            gateway,
            device,
            config: TcpServerConfig::default(),
            filter: UnitFilter::new(),
            subs: Vec::new(),
            opened: false,
            cmd_close: false,
            conn_counter: 0,
            name: String::from("tcp"),
            signals: new_hub(),
            last_status: StatusCode::Uncertain,
            last_error_status: StatusCode::Uncertain,
            last_error_text: String::new(),
            last_status_timestamp: None,
        }
    }

    // --- configuration -----------------------------------------------------

    /// The shared device.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Current configuration.
    pub fn config(&self) -> &TcpServerConfig {
        &self.config
    }

    /// Replace the whole configuration; `max_connections` of 0 coerces to 1.
    pub fn set_config(&mut self, config: TcpServerConfig) {
        self.config = config;
        self.config.max_connections = self.config.max_connections.max(1);
    }

    pub fn ipaddr(&self) -> &str {
        &self.config.ipaddr
    }

    pub fn set_ipaddr(&mut self, ipaddr: impl Into<String>) {
        self.config.ipaddr = ipaddr.into();
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    pub fn timeout(&self) -> u32 {
        self.config.timeout_ms
    }

    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.config.timeout_ms = timeout_ms;
    }

    pub fn max_connections(&self) -> u32 {
        self.config.max_connections
    }

    /// Set the connection limit; zero coerces to one.
    pub fn set_max_connections(&mut self, max_connections: u32) {
        self.config.max_connections = max_connections.max(1);
    }

    pub fn is_broadcast_enabled(&self) -> bool {
        self.filter.is_broadcast_enabled()
    }

    pub fn set_broadcast_enabled(&mut self, enable: bool) {
        self.filter.set_broadcast_enabled(enable);
    }

    /// Unit filter handed to every new sub-server.
    pub fn unit_filter(&self) -> &UnitFilter {
        &self.filter
    }

    pub fn set_unit_filter(&mut self, filter: UnitFilter) {
        self.filter = filter;
    }

    pub fn unit_map(&self) -> Option<&[u8; UNIT_MAP_SIZE]> {
        self.filter.unit_map()
    }

    pub fn set_unit_map(&mut self, map: Option<&[u8; UNIT_MAP_SIZE]>) {
        self.filter.set_unit_map(map);
    }

    /// Object name; sub-servers are named `<name>:conn#N`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Number of live sub-servers.
    pub fn connection_count(&self) -> usize {
        self.subs.len()
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

    pub fn connect_new_connection(&self, handler: impl FnMut(&str) + 'static) {
        self.signals.borrow_mut().connect_new_connection(handler);
    }

    pub fn connect_close_connection(&self, handler: impl FnMut(&str) + 'static) {
        self.signals.borrow_mut().connect_close_connection(handler);
    }

    // --- lifecycle ---------------------------------------------------------

    /// Whether the listener is open.
    pub fn is_open(&self) -> bool {
        self.gateway.is_open()
    }

    /// Open the listener now; [`TcpServer::process`] completes the
    /// operation when the gateway reports `Processing`.
    pub fn open(&mut self) -> StatusCode {
        self.cmd_close = false;
        if self.gateway.is_open() {
            return StatusCode::Good;
        }
        let status = self.gateway.open(&self.config);
        if status.is_good() {
            self.opened = true;
            info!("{}: listening on {}:{}", self.name, self.config.ipaddr, self.config.port);
            self.signals.borrow_mut().emit_opened(&self.name);
        }
        status
    }

    /// Stop accepting and tear down all sub-servers on the next crank.
    ///
    /// Closing an already closed server returns Good and emits nothing.
    pub fn close(&mut self) -> StatusCode {
        if !self.opened && self.subs.is_empty() && !self.gateway.is_open() {
            return StatusCode::Good;
        }
        self.cmd_close = true;
        StatusCode::Processing
    }

    /// Crank the listener: open it if needed, accept pending connections,
    /// drive every sub-server and reap the closed ones.
    pub fn process(&mut self) -> StatusCode {
        if self.cmd_close {
            return self.teardown();
        }
        if !self.gateway.is_open() {
            let status = self.gateway.open(&self.config);
            if status.is_processing() {
                return StatusCode::Processing;
            }
            if status.is_bad() {
                let text = self.gateway.last_error_text().to_string();
                warn!("{}: listener open failed: {}", self.name, text);
                self.record_error(status, text);
                return status;
            }
            self.opened = true;
            info!("{}: listening on {}:{}", self.name, self.config.ipaddr, self.config.port);
            self.signals.borrow_mut().emit_opened(&self.name);
        } else if !self.opened {
            self.opened = true;
        }

        self.accept_pending();

        let mut result = StatusCode::Processing;
        let mut index = 0;
        while index < self.subs.len() {
            let status = self.subs[index].process();
            if status.is_bad() {
                result = status;
            }
            if self.subs[index].is_state_closed() {
                let sub = self.subs.remove(index);
                info!("{}: connection {} closed", self.name, sub.name());
                self.signals.borrow_mut().emit_close_connection(sub.name());
            } else {
                index += 1;
            }
        }
        self.record_status(result);
        result
    }

    fn accept_pending(&mut self) {
        while (self.subs.len() as u32) < self.config.max_connections {
            let Some(port) = self.gateway.next_pending_connection() else {
                break;
            };
            self.conn_counter += 1;
            let name = format!("{}:conn#{}", self.name, self.conn_counter);
            let mut sub = ServerResource::new(port, Arc::clone(&self.device));
            sub.set_name(name.clone());
            sub.set_unit_filter(self.filter.clone());
            // forward traffic signals upward, source stays the sub's name
            let hub = Rc::clone(&self.signals);
            sub.connect_tx(move |source, bytes| hub.borrow_mut().emit_tx(source, bytes));
            let hub = Rc::clone(&self.signals);
            sub.connect_rx(move |source, bytes| hub.borrow_mut().emit_rx(source, bytes));
            let hub = Rc::clone(&self.signals);
            sub.connect_error(move |source, status, text| {
                hub.borrow_mut().emit_error(source, status, text)
            });
            let hub = Rc::clone(&self.signals);
            sub.connect_completed(move |source, status| {
                hub.borrow_mut().emit_completed(source, status)
            });
            debug!("{}: accepted connection {}", self.name, name);
            self.signals.borrow_mut().emit_new_connection(&name);
            self.subs.push(sub);
        }
    }

    fn teardown(&mut self) -> StatusCode {
        for mut sub in self.subs.drain(..) {
            let _ = sub.close();
            self.signals.borrow_mut().emit_close_connection(sub.name());
        }
        let status = self.gateway.close();
        if status.is_processing() {
            return StatusCode::Processing;
        }
        self.cmd_close = false;
        if self.opened {
            self.opened = false;
            info!("{}: listener closed", self.name);
            self.signals.borrow_mut().emit_closed(&self.name);
        }
        self.record_status(StatusCode::Good);
        StatusCode::Good
    }

    fn record_status(&mut self, status: StatusCode) {
        self.last_status = status;
        self.last_status_timestamp = Some(Utc::now());
    }

    fn record_error(&mut self, status: StatusCode, text: String) {
        self.record_status(status);
        self.last_error_status = status;
        self.last_error_text = text;
        let text = self.last_error_text.clone();
        self.signals.borrow_mut().emit_error(&self.name, status, &text);
    }
}
