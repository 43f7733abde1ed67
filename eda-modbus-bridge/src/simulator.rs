//! In-memory Modbus device.
//!
//! Stands in for the serial device in tests and local development. Every
//! successful write is appended to a log so callers can verify exactly
//! which transactions reached the device.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::device::{DeviceError, RegisterIo};

/// A write transaction recorded by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRecord {
    Coil { address: u16, value: bool },
    Register { address: u16, value: u16 },
}

#[derive(Debug, Default)]
struct SimState {
    coils: HashMap<u16, bool>,
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
    writes: Vec<WriteRecord>,
    reads: usize,
    offline: bool,
}

/// Shared handle to a simulated device.
///
/// Clones share the same state, so a test can hand one clone to the adapter
/// and keep another for inspection. Unset addresses read as zero.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    /// Create an empty device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset a coil.
    pub fn with_coil(self, address: u16, value: bool) -> Self {
        self.state.lock().coils.insert(address, value);
        self
    }

    /// Preset a holding register.
    pub fn with_holding_register(self, address: u16, value: u16) -> Self {
        self.state.lock().holding.insert(address, value);
        self
    }

    /// Preset an input register.
    pub fn with_input_register(self, address: u16, value: u16) -> Self {
        self.state.lock().input.insert(address, value);
        self
    }

    /// Make every subsequent transaction fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn coil(&self, address: u16) -> bool {
        self.state.lock().coils.get(&address).copied().unwrap_or(false)
    }

    pub fn holding_register(&self, address: u16) -> u16 {
        self.state.lock().holding.get(&address).copied().unwrap_or(0)
    }

    /// All writes that reached the device, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Number of read transactions served.
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    fn check_online(state: &SimState) -> Result<(), DeviceError> {
        if state.offline {
            Err(DeviceError::Timeout(Duration::from_millis(0)))
        } else {
            Ok(())
        }
    }

    fn read_block<T: Copy + Default>(
        map: &HashMap<u16, T>,
        address: u16,
        count: u16,
    ) -> Result<Vec<T>, DeviceError> {
        if u32::from(address) + u32::from(count) > u32::from(u16::MAX) + 1 {
            return Err(DeviceError::Exception("IllegalDataAddress".to_string()));
        }

        Ok((0..count)
            .map(|offset| map.get(&(address + offset)).copied().unwrap_or_default())
            .collect())
    }
}

#[async_trait]
impl RegisterIo for SimulatedDevice {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, DeviceError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.reads += 1;
        Self::read_block(&state.coils, address, count)
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.reads += 1;
        Self::read_block(&state.holding, address, count)
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.reads += 1;
        Self::read_block(&state.input, address, count)
    }

    async fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.coils.insert(address, value);
        state.writes.push(WriteRecord::Coil { address, value });
        Ok(())
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.holding.insert(address, value);
        state.writes.push(WriteRecord::Register { address, value });
        Ok(())
    }
}
