//! Device I/O: the transport seam between the adapter and the wire.

use std::time::Duration;

use async_trait::async_trait;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::config::{BAUD_RATE, DeviceConfig};

/// Error type for device transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Exception: {0}")]
    Exception(String),
    #[error("Short response: expected {expected} values, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

/// Single-transaction access to coils and registers.
///
/// Implementations perform exactly one Modbus transaction per call. Callers
/// are responsible for serializing access.
#[async_trait]
pub trait RegisterIo: Send {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, DeviceError>;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError>;

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError>;

    async fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), DeviceError>;

    async fn write_single_register(&mut self, address: u16, value: u16)
    -> Result<(), DeviceError>;

    /// Release the underlying transport.
    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// A Modbus RTU device on a serial port.
pub struct ModbusDevice {
    ctx: Context,
    timeout: Duration,
}

impl ModbusDevice {
    /// Open the serial port (19200 baud, 8N1) and attach an RTU client.
    pub fn connect_rtu(port: &str, config: &DeviceConfig) -> Result<Self, DeviceError> {
        let builder = tokio_serial::new(port, BAUD_RATE)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .data_bits(tokio_serial::DataBits::Eight);

        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| DeviceError::Connection(format!("Serial open failed: {}", e)))?;

        let ctx = rtu::attach_slave(serial, Slave(config.unit_id));

        Ok(Self {
            ctx,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }
}

/// Flatten the timeout, transport and exception layers of a tokio-modbus call.
async fn transact<T, F>(timeout: Duration, call: F) -> Result<T, DeviceError>
where
    F: std::future::Future<Output = tokio_modbus::Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| DeviceError::Timeout(timeout))?
        .map_err(|e| DeviceError::Transport(e.to_string()))?
        .map_err(|e| DeviceError::Exception(format!("{:?}", e)))
}

#[async_trait]
impl RegisterIo for ModbusDevice {
    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, DeviceError> {
        debug!(address, count, "Reading coils");
        transact(self.timeout, self.ctx.read_coils(address, count)).await
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError> {
        debug!(address, count, "Reading holding registers");
        transact(self.timeout, self.ctx.read_holding_registers(address, count)).await
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError> {
        debug!(address, count, "Reading input registers");
        transact(self.timeout, self.ctx.read_input_registers(address, count)).await
    }

    async fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), DeviceError> {
        debug!(address, value, "Writing coil");
        transact(self.timeout, self.ctx.write_single_coil(address, value)).await
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> Result<(), DeviceError> {
        debug!(address, value, "Writing holding register");
        transact(self.timeout, self.ctx.write_single_register(address, value)).await
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.ctx
            .disconnect()
            .await
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transact_timeout() {
        let timeout = Duration::from_millis(10);
        let result: Result<Vec<bool>, DeviceError> = transact(timeout, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Ok(vec![true]))
        })
        .await;

        assert_eq!(result, Err(DeviceError::Timeout(timeout)));
    }

    #[tokio::test]
    async fn test_transact_exception() {
        let result: Result<Vec<u16>, DeviceError> =
            transact(Duration::from_secs(1), async {
                Ok(Err(tokio_modbus::ExceptionCode::IllegalDataAddress))
            })
            .await;

        assert!(matches!(result, Err(DeviceError::Exception(_))));
    }

    #[tokio::test]
    async fn test_transact_success() {
        let result = transact(Duration::from_secs(1), async { Ok(Ok(vec![1u16, 2])) }).await;
        assert_eq!(result, Ok(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_connect_missing_port() {
        let result = ModbusDevice::connect_rtu("/dev/does-not-exist", &DeviceConfig::default());
        assert!(matches!(result, Err(DeviceError::Connection(_))));
    }
}
