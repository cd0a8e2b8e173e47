//! Loopback demo: a client port and a server resource driven cooperatively
//! over an in-memory wire, no sockets involved.
//!
//! Run with `RUST_LOG=debug cargo run --bin loopback_demo` to watch the
//! state machines log their progress.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use mbport::client::ClientPort;
use mbport::pdu::Pdu;
use mbport::port::{Port, ProtocolType};
use mbport::register_bank::RegisterBank;
use mbport::server::ServerResource;
use mbport::status::StatusCode;

/// One PDU in flight per direction.
#[derive(Default)]
struct Wire {
    request: Option<(u8, u8, Vec<u8>)>,
    response: Option<(u8, u8, Vec<u8>)>,
}

/// In-memory port: the client end posts requests and reads responses, the
/// server end the other way around.
struct LoopbackPort {
    wire: Rc<RefCell<Wire>>,
    server_mode: bool,
    tx: Option<(u8, u8, Vec<u8>)>,
    rx: Option<(u8, u8, Vec<u8>)>,
    rx_raw: Vec<u8>,
    tx_raw: Vec<u8>,
}

impl LoopbackPort {
    fn pair() -> (LoopbackPort, LoopbackPort) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let make = |wire: &Rc<RefCell<Wire>>| LoopbackPort {
            wire: Rc::clone(wire),
            server_mode: false,
            tx: None,
            rx: None,
            rx_raw: Vec::new(),
            tx_raw: Vec::new(),
        };
        (make(&wire), make(&wire))
    }
}

impl Port for LoopbackPort {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Tcp
    }

    fn is_open(&self) -> bool {
        true
    }

    fn open(&mut self) -> StatusCode {
        StatusCode::Good
    }

    fn close(&mut self) -> StatusCode {
        StatusCode::Good
    }

    fn set_server_mode(&mut self, server_mode: bool) {
        self.server_mode = server_mode;
    }

    fn read(&mut self) -> StatusCode {
        let mut wire = self.wire.borrow_mut();
        let slot = if self.server_mode {
            wire.request.take()
        } else {
            wire.response.take()
        };
        match slot {
            Some(frame) => {
                self.rx_raw = frame.2.clone();
                self.rx = Some(frame);
                StatusCode::Good
            }
            None => StatusCode::Processing,
        }
    }

    fn write(&mut self) -> StatusCode {
        let Some(frame) = self.tx.take() else {
            return StatusCode::Bad;
        };
        let mut wire = self.wire.borrow_mut();
        if self.server_mode {
            wire.response = Some(frame);
        } else {
            wire.request = Some(frame);
        }
        StatusCode::Good
    }

    fn write_buffer(&mut self, unit: u8, func: u8, data: &[u8]) -> StatusCode {
        self.tx_raw = data.to_vec();
        self.tx = Some((unit, func, data.to_vec()));
        StatusCode::Good
    }

    fn read_buffer(&mut self, pdu: &mut Pdu) -> StatusCode {
        let Some((unit, func, data)) = self.rx.take() else {
            return StatusCode::Bad;
        };
        pdu.unit = unit;
        pdu.func = func;
        match pdu.set_data(&data) {
            Ok(()) => StatusCode::Good,
            Err(status) => status,
        }
    }

    fn read_buffer_data(&self) -> &[u8] {
        &self.rx_raw
    }

    fn write_buffer_data(&self) -> &[u8] {
        &self.tx_raw
    }
}

/// Re-drive a client operation, cranking the server whenever the client is
/// blocked on the wire.
fn drive(
    client: &mut ClientPort,
    server: &mut ServerResource,
    mut op: impl FnMut(&mut ClientPort) -> StatusCode,
) -> StatusCode {
    loop {
        let status = op(client);
        if !status.is_processing() {
            return status;
        }
        let _ = server.process();
    }
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("mbport loopback demo");
    println!("====================");

    let bank = Arc::new(RegisterBank::new());
    bank.set_server_id(b"mbport loopback".to_vec());
    bank.set_fifo_queue(10, vec![0x000A, 0x0014, 0x001E]);

    let (client_end, server_end) = LoopbackPort::pair();
    let mut server = ServerResource::new(Box::new(server_end), Arc::clone(&bank) as _);
    server.set_name("loopback-server");
    let mut client = ClientPort::new(Box::new(client_end));
    client.set_name("loopback-client");

    client.connect_completed(|source, status| {
        println!("  [{}] completed: {:?}", source, status);
    });

    // write then read back a block of holding registers
    let status = drive(&mut client, &mut server, |cp| {
        cp.write_multiple_registers(1, 100, &[0x1234, 0x5678, 0x9ABC])
    });
    println!("write registers: {:?}", status);

    let mut values = [0u16; 3];
    let status = drive(&mut client, &mut server, |cp| {
        cp.read_holding_registers(1, 100, 3, &mut values)
    });
    println!("read registers:  {:?} -> {:04X?}", status, values);

    // coils
    let status = drive(&mut client, &mut server, |cp| {
        cp.write_multiple_coils_as_bool_array(1, 0, &[true, false, true, true])
    });
    println!("write coils:     {:?}", status);

    let mut coils = [false; 4];
    let status = drive(&mut client, &mut server, |cp| {
        cp.read_coils_as_bool_array(1, 0, 4, &mut coils)
    });
    println!("read coils:      {:?} -> {:?}", status, coils);

    // auxiliary functions
    let mut id = Vec::new();
    let status = drive(&mut client, &mut server, |cp| {
        cp.report_server_id(1, &mut id)
    });
    println!(
        "server id:       {:?} -> {}",
        status,
        String::from_utf8_lossy(&id)
    );

    let mut fifo = Vec::new();
    let status = drive(&mut client, &mut server, |cp| {
        cp.read_fifo_queue(1, 10, &mut fifo)
    });
    println!("fifo queue:      {:?} -> {:04X?}", status, fifo);

    // a request the device rejects
    let mut too_far = [0u16; 1];
    let status = drive(&mut client, &mut server, |cp| {
        cp.read_holding_registers(1, 0xFFFF, 1, &mut too_far)
    });
    println!("out of range:    {:?}", status);

    println!("done");
}
