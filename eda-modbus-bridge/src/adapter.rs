//! Named flags, settings and readings on top of a Modbus device.
//!
//! The adapter is the only owner of the device handle. All transactions
//! go through a single async mutex, so at most one Modbus request is ever
//! outstanding regardless of how many HTTP requests are in flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{
    BridgeConfig, DeviceInfoConfig, FlagConfig, InfoSource, ReadingConfig, RegisterType,
    SettingConfig,
};
use crate::device::{DeviceError, RegisterIo};
use crate::register::{InfoValue, PointValue, read_blocks};

/// Errors returned by adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Unknown flag '{0}'")]
    UnknownFlag(String),
    #[error("Unknown setting '{0}'")]
    UnknownSetting(String),
    #[error("Invalid value {value} for setting '{setting}': {reason}")]
    InvalidValue {
        setting: String,
        value: i64,
        reason: String,
    },
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Snapshot of every configured point, read in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub flags: BTreeMap<String, bool>,
    pub settings: BTreeMap<String, PointValue>,
    pub readings: BTreeMap<String, PointValue>,
    /// Identification values; `null` where the device reports no known value
    #[serde(rename = "deviceInformation")]
    pub device_information: BTreeMap<String, Option<InfoValue>>,
}

/// Shared adapter handle.
pub type SharedAdapter = Arc<ModbusAdapter>;

/// Maps domain names to Modbus addresses and performs the transactions.
pub struct ModbusAdapter {
    device: Mutex<Box<dyn RegisterIo>>,
    flags: Vec<FlagConfig>,
    settings: Vec<SettingConfig>,
    readings: Vec<ReadingConfig>,
    device_information: Vec<DeviceInfoConfig>,
}

impl ModbusAdapter {
    /// Create an adapter owning `device`, using the point mapping from `config`.
    pub fn new(device: Box<dyn RegisterIo>, config: &BridgeConfig) -> Self {
        Self {
            device: Mutex::new(device),
            flags: config.flags.clone(),
            settings: config.settings.clone(),
            readings: config.readings.clone(),
            device_information: config.device_information.clone(),
        }
    }

    /// Names of all configured flags.
    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(|f| f.name.as_str())
    }

    /// Names of all configured settings.
    pub fn setting_names(&self) -> impl Iterator<Item = &str> {
        self.settings.iter().map(|s| s.name.as_str())
    }

    fn find_flag(&self, name: &str) -> Result<&FlagConfig, AdapterError> {
        self.flags
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| AdapterError::UnknownFlag(name.to_string()))
    }

    fn find_setting(&self, name: &str) -> Result<&SettingConfig, AdapterError> {
        self.settings
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AdapterError::UnknownSetting(name.to_string()))
    }

    /// Read every flag, setting, reading and device information value.
    ///
    /// Fails as a whole if any read fails; partial summaries are never returned.
    pub async fn read_summary(&self) -> Result<Summary, AdapterError> {
        let mut guard = self.device.lock().await;
        let device: &mut dyn RegisterIo = &mut **guard;

        let coil_addresses = self
            .flags
            .iter()
            .map(|f| f.address)
            .chain(self.info_addresses(InfoSource::Coil));
        let coils = read_coil_map(device, coil_addresses).await?;

        let holding_addresses = self
            .settings
            .iter()
            .map(|s| s.address)
            .chain(self.reading_addresses(RegisterType::Holding))
            .chain(self.info_addresses(InfoSource::Holding));
        let holding = read_register_map(device, RegisterType::Holding, holding_addresses).await?;

        let input_addresses = self
            .reading_addresses(RegisterType::Input)
            .chain(self.info_addresses(InfoSource::Input));
        let input = read_register_map(device, RegisterType::Input, input_addresses).await?;
        drop(guard);

        let flags: BTreeMap<String, bool> = self
            .flags
            .iter()
            .map(|f| Ok((f.name.clone(), lookup(&coils, f.address)?)))
            .collect::<Result<_, DeviceError>>()?;

        let settings: BTreeMap<String, PointValue> = self
            .settings
            .iter()
            .map(|s| {
                let raw = lookup(&holding, s.address)?;
                Ok((s.name.clone(), s.format().decode(raw)))
            })
            .collect::<Result<_, DeviceError>>()?;

        let readings: BTreeMap<String, PointValue> = self
            .readings
            .iter()
            .map(|r| {
                let raw = match r.register_type {
                    RegisterType::Holding => lookup(&holding, r.address)?,
                    RegisterType::Input => lookup(&input, r.address)?,
                };
                Ok((r.name.clone(), r.format().decode(raw)))
            })
            .collect::<Result<_, DeviceError>>()?;

        let device_information: BTreeMap<String, Option<InfoValue>> = self
            .device_information
            .iter()
            .map(|i| {
                let raw = match i.source {
                    InfoSource::Coil => u16::from(lookup(&coils, i.address)?),
                    InfoSource::Holding => lookup(&holding, i.address)?,
                    InfoSource::Input => lookup(&input, i.address)?,
                };
                Ok((i.name.clone(), i.decode(raw)))
            })
            .collect::<Result<_, DeviceError>>()?;

        Ok(Summary {
            flags,
            settings,
            readings,
            device_information,
        })
    }

    fn reading_addresses(&self, register_type: RegisterType) -> impl Iterator<Item = u16> + '_ {
        self.readings
            .iter()
            .filter(move |r| r.register_type == register_type)
            .map(|r| r.address)
    }

    fn info_addresses(&self, source: InfoSource) -> impl Iterator<Item = u16> + '_ {
        self.device_information
            .iter()
            .filter(move |i| i.source == source)
            .map(|i| i.address)
    }

    /// Read the current state of a single flag.
    pub async fn flag(&self, name: &str) -> Result<bool, AdapterError> {
        let flag = self.find_flag(name)?;
        let mut device = self.device.lock().await;

        let values = device.read_coils(flag.address, 1).await?;
        values.first().copied().ok_or_else(|| {
            AdapterError::Device(DeviceError::ShortResponse {
                expected: 1,
                actual: 0,
            })
        })
    }

    /// Turn a flag on.
    ///
    /// If the flag belongs to an exclusive group, every other flag in that
    /// group is switched off afterwards, under the same lock.
    pub async fn enable_flag(&self, name: &str) -> Result<(), AdapterError> {
        let flag = self.find_flag(name)?;
        let mut device = self.device.lock().await;

        info!(flag = %flag.name, address = flag.address, "Enabling flag");
        device.write_single_coil(flag.address, true).await?;

        if let Some(group) = &flag.exclusive_group {
            for other in self
                .flags
                .iter()
                .filter(|f| f.name != flag.name && f.exclusive_group.as_ref() == Some(group))
            {
                debug!(flag = %other.name, group = %group, "Disabling exclusive flag");
                device.write_single_coil(other.address, false).await?;
            }
        }

        Ok(())
    }

    /// Turn a flag off.
    pub async fn disable_flag(&self, name: &str) -> Result<(), AdapterError> {
        let flag = self.find_flag(name)?;
        let mut device = self.device.lock().await;

        info!(flag = %flag.name, address = flag.address, "Disabling flag");
        device.write_single_coil(flag.address, false).await?;
        Ok(())
    }

    /// Write a setting after checking its range.
    ///
    /// Nothing is written when the name is unknown or the value is rejected.
    pub async fn set_setting(&self, name: &str, value: i64) -> Result<(), AdapterError> {
        let setting = self.find_setting(name)?;
        let raw = encode_setting(setting, value)?;
        let mut device = self.device.lock().await;

        info!(setting = %setting.name, value, raw, "Setting setting");
        device.write_single_register(setting.address, raw).await?;
        Ok(())
    }

    /// Release the device handle. Waits for any in-flight transaction.
    pub async fn shutdown(&self) {
        let mut device = self.device.lock().await;
        if let Err(e) = device.disconnect().await {
            warn!("Failed to disconnect device: {}", e);
        }
    }
}

fn encode_setting(setting: &SettingConfig, value: i64) -> Result<u16, AdapterError> {
    let (min, max) = setting.bounds();
    let invalid = |reason: String| AdapterError::InvalidValue {
        setting: setting.name.clone(),
        value,
        reason,
    };

    if value < min || value > max {
        return Err(invalid(format!("must be between {} and {}", min, max)));
    }

    setting
        .format()
        .encode(value)
        .ok_or_else(|| invalid("does not fit the register".to_string()))
}

async fn read_coil_map(
    device: &mut dyn RegisterIo,
    addresses: impl IntoIterator<Item = u16>,
) -> Result<HashMap<u16, bool>, DeviceError> {
    let mut values = HashMap::new();

    for block in read_blocks(addresses) {
        let data = device.read_coils(block.start, block.count).await?;
        check_length(&data, block.count)?;
        values.extend((0..block.count).map(|i| block.start + i).zip(data));
    }

    Ok(values)
}

async fn read_register_map(
    device: &mut dyn RegisterIo,
    register_type: RegisterType,
    addresses: impl IntoIterator<Item = u16>,
) -> Result<HashMap<u16, u16>, DeviceError> {
    let mut values = HashMap::new();

    for block in read_blocks(addresses) {
        debug!(
            register_type = register_type.as_str(),
            start = block.start,
            count = block.count,
            "Reading register block"
        );
        let data = match register_type {
            RegisterType::Holding => {
                device
                    .read_holding_registers(block.start, block.count)
                    .await?
            }
            RegisterType::Input => device.read_input_registers(block.start, block.count).await?,
        };
        check_length(&data, block.count)?;
        values.extend((0..block.count).map(|i| block.start + i).zip(data));
    }

    Ok(values)
}

fn lookup<T: Copy>(values: &HashMap<u16, T>, address: u16) -> Result<T, DeviceError> {
    values
        .get(&address)
        .copied()
        .ok_or(DeviceError::ShortResponse {
            expected: 1,
            actual: 0,
        })
}

fn check_length<T>(data: &[T], expected: u16) -> Result<(), DeviceError> {
    if data.len() < expected as usize {
        return Err(DeviceError::ShortResponse {
            expected: expected as usize,
            actual: data.len(),
        });
    }
    Ok(())
}
