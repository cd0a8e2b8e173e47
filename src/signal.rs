//! Callback signal tables
//!
//! The components of this crate report lifecycle and traffic events through
//! per-component signal tables: plain lists of boxed callbacks, the
//! publish/subscribe rendition of a signal/slot system. Handlers fire
//! synchronously on the edge they describe, before the emitting `process()`
//! call returns, and must not re-enter the emitting component's public
//! methods.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::status::StatusCode;

/// Shared handle to a signal table.
///
/// A TCP server hands clones of callbacks into its sub-servers' tables to
/// forward their traffic signals upward.
pub type SignalHub = Rc<RefCell<Signals>>;

/// Create a fresh, empty signal table.
pub fn new_hub() -> SignalHub {
    Rc::new(RefCell::new(Signals::default()))
}

type NameHandler = Box<dyn FnMut(&str)>;
type BytesHandler = Box<dyn FnMut(&str, &[u8])>;
type ErrorHandler = Box<dyn FnMut(&str, StatusCode, &str)>;
type StatusHandler = Box<dyn FnMut(&str, StatusCode)>;

/// Signal table of one component.
///
/// Every signal carries the emitting object's configured name as its first
/// argument, so handlers attached at a TCP server can tell sub-servers
/// apart.
#[derive(Default)]
pub struct Signals {
    opened: Vec<NameHandler>,
    closed: Vec<NameHandler>,
    tx: Vec<BytesHandler>,
    rx: Vec<BytesHandler>,
    error: Vec<ErrorHandler>,
    completed: Vec<StatusHandler>,
    new_connection: Vec<NameHandler>,
    close_connection: Vec<NameHandler>,
}

impl Signals {
    pub fn connect_opened(&mut self, handler: impl FnMut(&str) + 'static) {
        self.opened.push(Box::new(handler));
    }

    pub fn connect_closed(&mut self, handler: impl FnMut(&str) + 'static) {
        self.closed.push(Box::new(handler));
    }

    pub fn connect_tx(&mut self, handler: impl FnMut(&str, &[u8]) + 'static) {
        self.tx.push(Box::new(handler));
    }

    pub fn connect_rx(&mut self, handler: impl FnMut(&str, &[u8]) + 'static) {
        self.rx.push(Box::new(handler));
    }

    pub fn connect_error(&mut self, handler: impl FnMut(&str, StatusCode, &str) + 'static) {
        self.error.push(Box::new(handler));
    }

    pub fn connect_completed(&mut self, handler: impl FnMut(&str, StatusCode) + 'static) {
        self.completed.push(Box::new(handler));
    }

    pub fn connect_new_connection(&mut self, handler: impl FnMut(&str) + 'static) {
        self.new_connection.push(Box::new(handler));
    }

    pub fn connect_close_connection(&mut self, handler: impl FnMut(&str) + 'static) {
        self.close_connection.push(Box::new(handler));
    }

    /// Drop all connected handlers.
    pub fn disconnect_all(&mut self) {
        *self = Signals::default();
    }

    pub(crate) fn emit_opened(&mut self, source: &str) {
        for handler in &mut self.opened {
            handler(source);
        }
    }

    pub(crate) fn emit_closed(&mut self, source: &str) {
        for handler in &mut self.closed {
            handler(source);
        }
    }

    pub(crate) fn emit_tx(&mut self, source: &str, bytes: &[u8]) {
        trace!("{}: Tx {}", source, hex::encode_upper(bytes));
        for handler in &mut self.tx {
            handler(source, bytes);
        }
    }

    pub(crate) fn emit_rx(&mut self, source: &str, bytes: &[u8]) {
        trace!("{}: Rx {}", source, hex::encode_upper(bytes));
        for handler in &mut self.rx {
            handler(source, bytes);
        }
    }

    pub(crate) fn emit_error(&mut self, source: &str, status: StatusCode, text: &str) {
        for handler in &mut self.error {
            handler(source, status, text);
        }
    }

    pub(crate) fn emit_completed(&mut self, source: &str, status: StatusCode) {
        for handler in &mut self.completed {
            handler(source, status);
        }
    }

    pub(crate) fn emit_new_connection(&mut self, source: &str) {
        for handler in &mut self.new_connection {
            handler(source);
        }
    }

    pub(crate) fn emit_close_connection(&mut self, source: &str) {
        for handler in &mut self.close_connection {
            handler(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_handlers_fire_in_connect_order() {
        let hub = new_hub();
        let first = Rc::new(Cell::new(0u32));
        let second = Rc::new(Cell::new(0u32));

        {
            let first = Rc::clone(&first);
            let second = Rc::clone(&second);
            let mut signals = hub.borrow_mut();
            signals.connect_opened(move |_| first.set(first.get() + 1));
            signals.connect_opened(move |_| second.set(second.get() + 1));
        }

        hub.borrow_mut().emit_opened("unit-test");
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 1);

        hub.borrow_mut().disconnect_all();
        hub.borrow_mut().emit_opened("unit-test");
        assert_eq!(first.get(), 1);
    }

    #[test]
    fn test_error_handler_receives_status_and_text() {
        let hub = new_hub();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            hub.borrow_mut().connect_error(move |source, status, text| {
                seen.borrow_mut().push((source.to_string(), status, text.to_string()));
            });
        }
        hub.borrow_mut()
            .emit_error("srv", StatusCode::BadTcpRead, "TCP read error");
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, StatusCode::BadTcpRead);
        assert_eq!(seen[0].0, "srv");
    }
}
