//! In-memory register bank
//!
//! Reference [`Device`] implementation backed by thread-safe storage for
//! coils, discrete inputs, holding registers and input registers, plus the
//! auxiliary data (exception status, event counters, server id, FIFO
//! queues) the auxiliary function codes need. Used by the demo binary and
//! the test suites; production servers plug in their own device instead.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::device::{CommEventLog, Device, DeviceResult};
use crate::status::StatusCode;

/// Default size of each storage area
const DEFAULT_COILS_SIZE: usize = 10000;
const DEFAULT_DISCRETE_INPUTS_SIZE: usize = 10000;
const DEFAULT_HOLDING_REGISTERS_SIZE: usize = 10000;
const DEFAULT_INPUT_REGISTERS_SIZE: usize = 10000;

/// Thread-safe in-memory Modbus data store.
#[derive(Debug)]
pub struct RegisterBank {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
    exception_status: RwLock<u8>,
    event_counter: RwLock<(u16, u16)>,
    event_log: RwLock<CommEventLog>,
    server_id: RwLock<Vec<u8>>,
    fifo_queues: RwLock<HashMap<u16, Vec<u16>>>,
}

impl RegisterBank {
    /// Create a bank with default area sizes.
    pub fn new() -> Self {
        Self::with_sizes(
            DEFAULT_COILS_SIZE,
            DEFAULT_DISCRETE_INPUTS_SIZE,
            DEFAULT_HOLDING_REGISTERS_SIZE,
            DEFAULT_INPUT_REGISTERS_SIZE,
        )
    }

    /// Create a bank with custom area sizes.
    pub fn with_sizes(
        coils_size: usize,
        discrete_inputs_size: usize,
        holding_registers_size: usize,
        input_registers_size: usize,
    ) -> Self {
        Self {
            coils: RwLock::new(vec![false; coils_size]),
            discrete_inputs: RwLock::new(vec![false; discrete_inputs_size]),
            holding_registers: RwLock::new(vec![0; holding_registers_size]),
            input_registers: RwLock::new(vec![0; input_registers_size]),
            exception_status: RwLock::new(0),
            event_counter: RwLock::new((0, 0)),
            event_log: RwLock::new(CommEventLog::default()),
            server_id: RwLock::new(Vec::new()),
            fifo_queues: RwLock::new(HashMap::new()),
        }
    }

    /// Set a discrete input value (simulation side).
    pub fn set_discrete_input(&self, offset: u16, value: bool) -> DeviceResult<()> {
        let mut inputs = self.discrete_inputs.write().unwrap();
        let slot = inputs
            .get_mut(offset as usize)
            .ok_or(StatusCode::BadIllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    /// Set an input register value (simulation side).
    pub fn set_input_register(&self, offset: u16, value: u16) -> DeviceResult<()> {
        let mut registers = self.input_registers.write().unwrap();
        let slot = registers
            .get_mut(offset as usize)
            .ok_or(StatusCode::BadIllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    /// Set the exception status byte reported by function 0x07.
    pub fn set_exception_status(&self, status: u8) {
        *self.exception_status.write().unwrap() = status;
    }

    /// Set the comm event counter reported by function 0x0B.
    pub fn set_comm_event_counter(&self, status: u16, count: u16) {
        *self.event_counter.write().unwrap() = (status, count);
    }

    /// Set the comm event log reported by function 0x0C.
    pub fn set_comm_event_log(&self, log: CommEventLog) {
        *self.event_log.write().unwrap() = log;
    }

    /// Set the device identification bytes reported by function 0x11.
    pub fn set_server_id(&self, id: Vec<u8>) {
        *self.server_id.write().unwrap() = id;
    }

    /// Install a FIFO queue readable through function 0x18.
    pub fn set_fifo_queue(&self, fifo_addr: u16, values: Vec<u16>) {
        self.fifo_queues.write().unwrap().insert(fifo_addr, values);
    }

    fn check_range(len: usize, offset: u16, count: usize) -> DeviceResult<(usize, usize)> {
        let start = offset as usize;
        let end = start + count;
        if end > len {
            return Err(StatusCode::BadIllegalDataAddress);
        }
        Ok((start, end))
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for RegisterBank {
    fn read_coils(&self, _unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<bool>> {
        let coils = self.coils.read().unwrap();
        let (start, end) = Self::check_range(coils.len(), offset, count as usize)?;
        Ok(coils[start..end].to_vec())
    }

    fn read_discrete_inputs(&self, _unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<bool>> {
        let inputs = self.discrete_inputs.read().unwrap();
        let (start, end) = Self::check_range(inputs.len(), offset, count as usize)?;
        Ok(inputs[start..end].to_vec())
    }

    fn read_holding_registers(&self, _unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<u16>> {
        let registers = self.holding_registers.read().unwrap();
        let (start, end) = Self::check_range(registers.len(), offset, count as usize)?;
        Ok(registers[start..end].to_vec())
    }

    fn read_input_registers(&self, _unit: u8, offset: u16, count: u16) -> DeviceResult<Vec<u16>> {
        let registers = self.input_registers.read().unwrap();
        let (start, end) = Self::check_range(registers.len(), offset, count as usize)?;
        Ok(registers[start..end].to_vec())
    }

    fn write_single_coil(&self, _unit: u8, offset: u16, value: bool) -> DeviceResult<()> {
        let mut coils = self.coils.write().unwrap();
        let slot = coils
            .get_mut(offset as usize)
            .ok_or(StatusCode::BadIllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    fn write_single_register(&self, _unit: u8, offset: u16, value: u16) -> DeviceResult<()> {
        let mut registers = self.holding_registers.write().unwrap();
        let slot = registers
            .get_mut(offset as usize)
            .ok_or(StatusCode::BadIllegalDataAddress)?;
        *slot = value;
        Ok(())
    }

    fn write_multiple_coils(&self, _unit: u8, offset: u16, values: &[bool]) -> DeviceResult<()> {
        let mut coils = self.coils.write().unwrap();
        let (start, end) = Self::check_range(coils.len(), offset, values.len())?;
        coils[start..end].copy_from_slice(values);
        Ok(())
    }

    fn write_multiple_registers(&self, _unit: u8, offset: u16, values: &[u16]) -> DeviceResult<()> {
        let mut registers = self.holding_registers.write().unwrap();
        let (start, end) = Self::check_range(registers.len(), offset, values.len())?;
        registers[start..end].copy_from_slice(values);
        Ok(())
    }

    fn read_exception_status(&self, _unit: u8) -> DeviceResult<u8> {
        Ok(*self.exception_status.read().unwrap())
    }

    fn diagnostics(&self, _unit: u8, _subfunc: u16, data: &[u8]) -> DeviceResult<Vec<u8>> {
        // loopback semantics: echo the request data
        Ok(data.to_vec())
    }

    fn get_comm_event_counter(&self, _unit: u8) -> DeviceResult<(u16, u16)> {
        Ok(*self.event_counter.read().unwrap())
    }

    fn get_comm_event_log(&self, _unit: u8) -> DeviceResult<CommEventLog> {
        Ok(self.event_log.read().unwrap().clone())
    }

    fn report_server_id(&self, _unit: u8) -> DeviceResult<Vec<u8>> {
        Ok(self.server_id.read().unwrap().clone())
    }

    fn mask_write_register(
        &self,
        _unit: u8,
        offset: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> DeviceResult<()> {
        let mut registers = self.holding_registers.write().unwrap();
        let slot = registers
            .get_mut(offset as usize)
            .ok_or(StatusCode::BadIllegalDataAddress)?;
        *slot = (*slot & and_mask) | (or_mask & !and_mask);
        Ok(())
    }

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

    fn read_fifo_queue(&self, _unit: u8, fifo_addr: u16) -> DeviceResult<Vec<u16>> {
        self.fifo_queues
            .read()
            .unwrap()
            .get(&fifo_addr)
            .cloned()
            .ok_or(StatusCode::BadIllegalDataAddress)
    }
}
