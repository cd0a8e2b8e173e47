//! Integration tests for the server resource: request dispatch for every
//! function code, exception framing, silent drops, the unit filter and the
//! signal walk recovered from live traffic traces.

mod common;

use std::sync::Arc;

use common::{ScriptedDevice, ScriptedPort, SignalCounters};
use mbport::device::{CommEventLog, Device};
use mbport::port::ProtocolType;
use mbport::register_bank::RegisterBank;
use mbport::server::ServerResource;
use mbport::status::StatusCode;

fn server_with_bank() -> (
    ServerResource,
    Arc<RegisterBank>,
    std::rc::Rc<std::cell::RefCell<common::Script>>,
    std::rc::Rc<common::PortProbe>,
) {
    let port = ScriptedPort::new(ProtocolType::Tcp);
    let script = port.script();
    let probe = port.probe();
    let bank = Arc::new(RegisterBank::with_sizes(256, 256, 256, 256));
    let server = ServerResource::new(Box::new(port), Arc::clone(&bank) as Arc<dyn Device>);
    (server, bank, script, probe)
}

#[test]
fn test_port_attached_in_server_mode() {
    let (_server, _bank, _script, probe) = server_with_bank();
    assert_eq!(probe.server_mode.get(), Some(true));
}

// ---------------------------------------------------------------------------
// Request dispatch per function code
// ---------------------------------------------------------------------------

#[test]
fn test_read_coils_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    for i in [1u16, 3, 5, 7] {
        bank.write_single_coil(1, i, true).unwrap();
    }
    script.borrow_mut().push_rx(1, 0x01, &[0x00, 0x00, 0x00, 0x08]);

    assert!(server.process().is_good());
    assert_eq!(probe.last_written(), Some((1, 0x01, vec![0x01, 0xAA])));
}

#[test]
fn test_read_discrete_inputs_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    for i in 14u16..18 {
        bank.set_discrete_input(i, true).unwrap();
    }
    script.borrow_mut().push_rx(1, 0x02, &[0x00, 0x0A, 0x00, 0x08]);

    assert!(server.process().is_good());
    assert_eq!(probe.last_written(), Some((1, 0x02, vec![0x01, 0xF0])));
}

#[test]
fn test_read_holding_registers_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.write_multiple_registers(1, 0, &[0x1234, 0x5678]).unwrap();
    script.borrow_mut().push_rx(1, 0x03, &[0x00, 0x00, 0x00, 0x02]);

    assert!(server.process().is_good());
    assert_eq!(
        probe.last_written(),
        Some((1, 0x03, vec![0x04, 0x12, 0x34, 0x56, 0x78]))
    );
}

#[test]
fn test_read_input_registers_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.set_input_register(5, 0x1234).unwrap();
    bank.set_input_register(6, 0x5678).unwrap();
    bank.set_input_register(7, 0x9ABC).unwrap();
    script.borrow_mut().push_rx(1, 0x04, &[0x00, 0x05, 0x00, 0x03]);

    assert!(server.process().is_good());
    assert_eq!(
        probe.last_written(),
        Some((1, 0x04, vec![0x06, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]))
    );
}

#[test]
fn test_write_single_coil_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    script.borrow_mut().push_rx(1, 0x05, &[0x00, 0x0A, 0xFF, 0x00]);

    assert!(server.process().is_good());
    assert_eq!(bank.read_coils(1, 10, 1).unwrap(), vec![true]);
    // request echoed back
    assert_eq!(
        probe.last_written(),
        Some((1, 0x05, vec![0x00, 0x0A, 0xFF, 0x00]))
    );
}

#[test]
fn test_write_single_register_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    script.borrow_mut().push_rx(1, 0x06, &[0x00, 0x14, 0x12, 0x34]);

    assert!(server.process().is_good());
    assert_eq!(bank.read_holding_registers(1, 20, 1).unwrap(), vec![0x1234]);
    assert_eq!(
        probe.last_written(),
        Some((1, 0x06, vec![0x00, 0x14, 0x12, 0x34]))
    );
}

#[test]
fn test_read_exception_status_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.set_exception_status(0x42);
    script.borrow_mut().push_rx(1, 0x07, &[]);

    assert!(server.process().is_good());
    assert_eq!(probe.last_written(), Some((1, 0x07, vec![0x42])));
}

#[test]
fn test_diagnostics_request() {
    let (mut server, _bank, script, probe) = server_with_bank();
    script.borrow_mut().push_rx(1, 0x08, &[0x00, 0x00, 0xA5, 0x37]);

    assert!(server.process().is_good());
    assert_eq!(
        probe.last_written(),
        Some((1, 0x08, vec![0x00, 0x00, 0xA5, 0x37]))
    );
}

#[test]
fn test_get_comm_event_counter_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.set_comm_event_counter(0xFFFF, 0x0108);
    script.borrow_mut().push_rx(1, 0x0B, &[]);

    assert!(server.process().is_good());
    assert_eq!(
        probe.last_written(),
        Some((1, 0x0B, vec![0xFF, 0xFF, 0x01, 0x08]))
    );
}

#[test]
fn test_get_comm_event_log_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.set_comm_event_log(CommEventLog {
        status: 0x0000,
        event_count: 0x0108,
        message_count: 0x0121,
        events: vec![0x20, 0x00],
    });
    script.borrow_mut().push_rx(1, 0x0C, &[]);

    assert!(server.process().is_good());
    assert_eq!(
        probe.last_written(),
        Some((
            1,
            0x0C,
            vec![0x08, 0x00, 0x00, 0x01, 0x08, 0x01, 0x21, 0x20, 0x00]
        ))
    );
}

#[test]
fn test_write_multiple_coils_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    script
        .borrow_mut()
        .push_rx(1, 0x0F, &[0x00, 0x0A, 0x00, 0x0A, 0x02, 0xFF, 0x03]);

    assert!(server.process().is_good());
    assert_eq!(bank.read_coils(1, 10, 10).unwrap(), vec![true; 10]);
    assert_eq!(
        probe.last_written(),
        Some((1, 0x0F, vec![0x00, 0x0A, 0x00, 0x0A]))
    );
}

#[test]
fn test_write_multiple_registers_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    script
        .borrow_mut()
        .push_rx(1, 0x10, &[0x00, 0x64, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78]);

    assert!(server.process().is_good());
    assert_eq!(
        bank.read_holding_registers(1, 100, 2).unwrap(),
        vec![0x1234, 0x5678]
    );
    assert_eq!(
        probe.last_written(),
        Some((1, 0x10, vec![0x00, 0x64, 0x00, 0x02]))
    );
}

#[test]
fn test_report_server_id_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.set_server_id(vec![0x0B, 0xFF]);
    script.borrow_mut().push_rx(1, 0x11, &[]);

    assert!(server.process().is_good());
    assert_eq!(probe.last_written(), Some((1, 0x11, vec![0x02, 0x0B, 0xFF])));
}

#[test]
fn test_mask_write_register_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.write_single_register(1, 50, 0x12FF).unwrap();
    script
        .borrow_mut()
        .push_rx(1, 0x16, &[0x00, 0x32, 0xF2, 0xF2, 0x25, 0x25]);

    assert!(server.process().is_good());
    assert_eq!(bank.read_holding_registers(1, 50, 1).unwrap(), vec![0x17F7]);
    assert_eq!(
        probe.last_written(),
        Some((1, 0x16, vec![0x00, 0x32, 0xF2, 0xF2, 0x25, 0x25]))
    );
}

#[test]
fn test_read_write_multiple_registers_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.write_multiple_registers(1, 0, &[0x000A, 0x0014]).unwrap();
    script.borrow_mut().push_rx(
        1,
        0x17,
        &[0x00, 0x00, 0x00, 0x02, 0x00, 0x64, 0x00, 0x02, 0x04, 0xAB, 0xCD, 0xEF, 0x01],
    );

    assert!(server.process().is_good());
    assert_eq!(
        bank.read_holding_registers(1, 100, 2).unwrap(),
        vec![0xABCD, 0xEF01]
    );
    assert_eq!(
        probe.last_written(),
        Some((1, 0x17, vec![0x04, 0x00, 0x0A, 0x00, 0x14]))
    );
}

#[test]
fn test_read_fifo_queue_request() {
    let (mut server, bank, script, probe) = server_with_bank();
    bank.set_fifo_queue(10, vec![0x1234, 0x5678, 0x9ABC]);
    script.borrow_mut().push_rx(1, 0x18, &[0x00, 0x0A]);

    assert!(server.process().is_good());
    assert_eq!(
        probe.last_written(),
        Some((
            1,
            0x18,
            vec![0x00, 0x08, 0x00, 0x03, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]
        ))
    );
}

// ---------------------------------------------------------------------------
// Exception framing and silent drops
// ---------------------------------------------------------------------------

#[test]
fn test_device_standard_exception_is_framed() {
    let port = ScriptedPort::new(ProtocolType::Tcp);
    let script = port.script();
    let probe = port.probe();
    let device = Arc::new(ScriptedDevice::new());
    device.push_holding(Err(StatusCode::BadIllegalDataAddress));
    let mut server = ServerResource::new(Box::new(port), device);

    script.borrow_mut().push_rx(1, 0x03, &[0x00, 0x00, 0x00, 0x02]);

    assert_eq!(server.process(), StatusCode::BadIllegalDataAddress);
    assert_eq!(probe.last_written(), Some((1, 0x83, vec![0x02])));
}

#[test]
fn test_generic_device_failure_becomes_exception_four() {
    let port = ScriptedPort::new(ProtocolType::Tcp);
    let script = port.script();
    let probe = port.probe();
    let device = Arc::new(ScriptedDevice::new());
    device.push_holding(Err(StatusCode::Bad));
    let mut server = ServerResource::new(Box::new(port), device);

    script.borrow_mut().push_rx(1, 0x03, &[0x00, 0x00, 0x00, 0x02]);

    assert!(server.process().is_bad());
    assert_eq!(probe.last_written(), Some((1, 0x83, vec![0x04])));
}

#[test]
fn test_gateway_path_unavailable_is_a_silent_drop() {
    let port = ScriptedPort::new(ProtocolType::Tcp);
    let script = port.script();
    let probe = port.probe();
    let device = Arc::new(ScriptedDevice::new());
    device.push_holding(Err(StatusCode::BadGatewayPathUnavailable));
    let mut server = ServerResource::new(Box::new(port), device);
    let counters = SignalCounters::new();
    counters.attach_server(&server);

    script.borrow_mut().push_rx(1, 0x03, &[0x00, 0x00, 0x00, 0x02]);

    assert!(server.process().is_good());
    assert_eq!(probe.write_buffer_calls.get(), 0);
    assert_eq!(counters.rx.get(), 1);
    assert_eq!(counters.tx.get(), 0);
    assert_eq!(counters.error.get(), 0);
    assert_eq!(counters.completed.get(), 1);
}

#[test]
fn test_unknown_function_yields_illegal_function() {
    let (mut server, _bank, script, probe) = server_with_bank();
    script.borrow_mut().push_rx(1, 0x2B, &[0x00]);

    assert_eq!(server.process(), StatusCode::BadIllegalFunction);
    assert_eq!(probe.last_written(), Some((1, 0xAB, vec![0x01])));
}

#[test]
fn test_count_over_limit_yields_illegal_data_value() {
    let (mut server, _bank, script, probe) = server_with_bank();
    script.borrow_mut().push_rx(1, 0x03, &[0x00, 0x00, 0x00, 0x7E]);

    assert_eq!(server.process(), StatusCode::BadIllegalDataValue);
    assert_eq!(probe.last_written(), Some((1, 0x83, vec![0x03])));
}

#[test]
fn test_byte_count_mismatch_is_never_answered() {
    let (mut server, _bank, script, probe) = server_with_bank();
    let counters = SignalCounters::new();
    counters.attach_server(&server);
    // count=16 wants byte_count=2; frame claims 3 and carries 3 bytes
    script
        .borrow_mut()
        .push_rx(1, 0x0F, &[0x00, 0x00, 0x00, 0x10, 0x03, 0xFF, 0xFF, 0xFF]);

    assert_eq!(server.process(), StatusCode::BadNotCorrectRequest);
    assert_eq!(probe.write_buffer_calls.get(), 0);
    assert_eq!(counters.rx.get(), 1);
    assert_eq!(counters.error.get(), 1);
    assert_eq!(counters.completed.get(), 1);
}

#[test]
fn test_illegal_single_coil_value_is_never_answered() {
    let (mut server, _bank, script, probe) = server_with_bank();
    script.borrow_mut().push_rx(1, 0x05, &[0x00, 0x01, 0xAA, 0xAA]);

    assert_eq!(server.process(), StatusCode::BadNotCorrectRequest);
    assert_eq!(probe.write_buffer_calls.get(), 0);
}

// ---------------------------------------------------------------------------
// Unit filter and broadcast
// ---------------------------------------------------------------------------

#[test]
fn test_filtered_unit_is_dropped_without_response() {
    let (mut server, _bank, script, probe) = server_with_bank();
    server.set_unit_enabled(1, true); // only unit 1 serviced
    let counters = SignalCounters::new();
    counters.attach_server(&server);
    {
        let mut s = script.borrow_mut();
        s.push_rx(5, 0x03, &[0x00, 0x00, 0x00, 0x02]);
        s.read.push_back(StatusCode::Good);
        s.read.push_back(StatusCode::Processing);
    }

    assert_eq!(server.process(), StatusCode::Processing);
    assert_eq!(probe.write_buffer_calls.get(), 0);
    assert_eq!(counters.rx.get(), 1);
    assert_eq!(counters.error.get(), 0);
    assert_eq!(counters.completed.get(), 0);
}

#[test]
fn test_broadcast_request_reaches_device_without_response() {
    let (mut server, bank, script, probe) = server_with_bank();
    let counters = SignalCounters::new();
    counters.attach_server(&server);
    script.borrow_mut().push_rx(0, 0x06, &[0x00, 0x01, 0x00, 0x02]);

    assert!(server.process().is_good());
    assert_eq!(bank.read_holding_registers(1, 1, 1).unwrap(), vec![0x0002]);
    assert_eq!(probe.write_buffer_calls.get(), 0);
    assert_eq!(counters.completed.get(), 1);
}

// ---------------------------------------------------------------------------
// Transport failures and lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_port_open_failure() {
    let (mut server, _bank, script, _probe) = server_with_bank();
    {
        let mut s = script.borrow_mut();
        s.open_state = false;
        s.open.push_back(StatusCode::BadSerialOpen);
    }

    assert_eq!(server.process(), StatusCode::BadSerialOpen);
}

#[test]
fn test_port_read_failure() {
    let (mut server, _bank, script, _probe) = server_with_bank();
    let counters = SignalCounters::new();
    counters.attach_server(&server);
    script
        .borrow_mut()
        .read
        .push_back(StatusCode::BadSerialReadTimeout);

    assert_eq!(server.process(), StatusCode::BadSerialReadTimeout);
    assert_eq!(counters.rx.get(), 0);
    assert_eq!(counters.error.get(), 1);
    assert_eq!(counters.completed.get(), 1);
}

#[test]
fn test_port_write_failure() {
    let (mut server, _bank, script, _probe) = server_with_bank();
    {
        let mut s = script.borrow_mut();
        s.push_rx(1, 0x03, &[0x00, 0x00, 0x00, 0x02]);
        s.write.push_back(StatusCode::BadTcpWrite);
    }

    assert_eq!(server.process(), StatusCode::BadTcpWrite);
}

#[test]
fn test_closed_port_edge_resets_the_machine() {
    let (mut server, _bank, script, _probe) = server_with_bank();
    let counters = SignalCounters::new();
    counters.attach_server(&server);

    script.borrow_mut().push_rx(1, 0x03, &[0x00, 0x00, 0x00, 0x01]);
    assert!(server.process().is_good());
    assert_eq!(counters.closed.get(), 0);

    script.borrow_mut().open_state = false;
    assert!(server.process().is_good());
    assert_eq!(counters.closed.get(), 1);
    assert_eq!(counters.completed.get(), 2);
    assert!(server.is_state_closed());
}

// ---------------------------------------------------------------------------
// Signal walk (eight cranks, one port)
// ---------------------------------------------------------------------------

#[test]
fn test_signal_walk() {
    let port = ScriptedPort::new(ProtocolType::Tcp);
    let script = port.script();
    let probe = port.probe();
    let device = Arc::new(ScriptedDevice::new());
    let mut server = ServerResource::new(Box::new(port), Arc::clone(&device) as Arc<dyn Device>);
    let counters = SignalCounters::new();
    counters.attach_server(&server);

    let request: &[u8] = &[0x00, 0x00, 0x00, 0x10];

    // step 1: port opens, request served
    {
        let mut s = script.borrow_mut();
        s.is_open.push_back(false);
        s.push_rx(1, 0x03, request);
    }
    assert!(server.process().is_good());
    assert_eq!(counters.opened.get(), 1);
    assert_eq!(counters.traffic(), (1, 1, 1));
    assert_eq!(counters.error.get(), 0);

    // step 2: port read error
    script.borrow_mut().read.push_back(StatusCode::Bad);
    assert!(server.process().is_bad());
    assert_eq!(counters.traffic(), (1, 1, 2));
    assert_eq!(counters.error.get(), 1);

    // step 3: frame extraction error (Rx already fired for the raw frame)
    script.borrow_mut().read_buffer.push_back(StatusCode::Bad);
    assert!(server.process().is_bad());
    assert_eq!(counters.traffic(), (1, 2, 3));
    assert_eq!(counters.error.get(), 2);

    // step 4: device fails generically -> exception 0x04 on the wire
    device.push_holding(Err(StatusCode::Bad));
    script.borrow_mut().push_rx(1, 0x03, request);
    assert!(server.process().is_bad());
    assert_eq!(counters.traffic(), (2, 3, 4));
    assert_eq!(counters.error.get(), 3);
    assert_eq!(probe.last_written(), Some((1, 0x83, vec![0x04])));

    // step 5: device returns a standard exception -> its own byte
    device.push_holding(Err(StatusCode::BadIllegalDataAddress));
    script.borrow_mut().push_rx(1, 0x03, request);
    assert_eq!(server.process(), StatusCode::BadIllegalDataAddress);
    assert_eq!(counters.traffic(), (3, 4, 5));
    assert_eq!(counters.error.get(), 4);
    assert_eq!(probe.last_written(), Some((1, 0x83, vec![0x02])));

    // step 6: gateway path unavailable -> intentional non-response
    device.push_holding(Err(StatusCode::BadGatewayPathUnavailable));
    script.borrow_mut().push_rx(1, 0x03, request);
    assert!(server.process().is_good());
    assert_eq!(counters.traffic(), (3, 5, 6));
    assert_eq!(counters.error.get(), 4);

    // step 7: back to normal
    script.borrow_mut().push_rx(1, 0x03, request);
    assert!(server.process().is_good());
    assert_eq!(counters.traffic(), (4, 6, 7));
    assert_eq!(counters.error.get(), 4);

    // step 8: port closed under the server
    script.borrow_mut().open_state = false;
    assert!(server.process().is_good());
    assert_eq!(counters.opened.get(), 1);
    assert_eq!(counters.closed.get(), 1);
    assert_eq!(counters.traffic(), (4, 6, 8));
    assert_eq!(counters.error.get(), 4);
}
