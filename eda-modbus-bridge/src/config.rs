//! Configuration for the Modbus HTTP bridge.
//!
//! The point mapping (which coil or register backs which name) is loaded
//! from a JSON5 file. Without one, the built-in Enervent EDA mapping from
//! `config/eda.json5` is used.

use eda_bridge_common::{LoggingConfig, load_config, parse_config};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::register::{InfoValue, RegisterFormat, enum_label};

/// Serial baud rate used to talk to the device.
pub const BAUD_RATE: u32 = 19200;

/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

const BUILTIN_CONFIG: &str = include_str!("../config/eda.json5");

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] eda_bridge_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Device addressing and transport settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Coils exposed as enable/disable flags
    #[serde(default)]
    pub flags: Vec<FlagConfig>,

    /// Holding registers exposed as writable settings
    #[serde(default)]
    pub settings: Vec<SettingConfig>,

    /// Read-only registers reported in the summary
    #[serde(default)]
    pub readings: Vec<ReadingConfig>,

    /// Identification values reported under `deviceInformation`
    #[serde(default)]
    pub device_information: Vec<DeviceInfoConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Per-transaction timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// A named coil.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagConfig {
    pub name: String,

    /// Coil address (0-based)
    pub address: u16,

    /// Flags sharing a group are mutually exclusive: enabling one disables the others.
    #[serde(default)]
    pub exclusive_group: Option<String>,
}

/// A named holding register that clients may write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingConfig {
    pub name: String,

    /// Holding register address (0-based)
    pub address: u16,

    /// Interpret the register as i16
    #[serde(default)]
    pub signed: bool,

    /// Raw register value = value * scale
    #[serde(default = "default_scale")]
    pub scale: u16,

    /// Smallest accepted value (default: register minimum)
    #[serde(default)]
    pub min: Option<i64>,

    /// Largest accepted value (default: register maximum)
    #[serde(default)]
    pub max: Option<i64>,
}

fn default_scale() -> u16 {
    1
}

impl SettingConfig {
    /// Register interpretation for this setting.
    pub fn format(&self) -> RegisterFormat {
        RegisterFormat::new(self.signed, self.scale)
    }

    /// Inclusive range of values accepted by `set_setting`.
    pub fn bounds(&self) -> (i64, i64) {
        let format = self.format();
        (
            self.min.unwrap_or_else(|| format.min_value()),
            self.max.unwrap_or_else(|| format.max_value()),
        )
    }
}

/// Register types that can back a reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// Holding registers (read/write, 16-bit)
    #[default]
    Holding,
    /// Input registers (read-only, 16-bit)
    Input,
}

impl RegisterType {
    /// Return the string name for this register type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Holding => "holding",
            RegisterType::Input => "input",
        }
    }
}

/// A named read-only register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub register_type: RegisterType,

    /// Register address (0-based)
    pub address: u16,

    #[serde(default)]
    pub signed: bool,

    #[serde(default = "default_scale")]
    pub scale: u16,
}

impl ReadingConfig {
    /// Register interpretation for this reading.
    pub fn format(&self) -> RegisterFormat {
        RegisterFormat::new(self.signed, self.scale)
    }
}

/// Where a device information value is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoSource {
    /// A coil, read as 0 or 1
    Coil,
    #[default]
    Holding,
    Input,
}

/// A named identification value, e.g. the device family or firmware version.
///
/// With `labels`, the raw value indexes the list and a `null` entry is
/// reported as `null`. Values past the end of the list report
/// `unknown_label`, or `null` when that is unset. Without `labels`, the
/// value is reported as a number divided by `scale`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfoConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub source: InfoSource,

    pub address: u16,

    #[serde(default = "default_scale")]
    pub scale: u16,

    #[serde(default)]
    pub labels: Option<Vec<Option<String>>>,

    #[serde(default)]
    pub unknown_label: Option<String>,
}

impl DeviceInfoConfig {
    /// Decode a raw value read from the device.
    pub fn decode(&self, raw: u16) -> Option<InfoValue> {
        match &self.labels {
            Some(labels) => {
                enum_label(labels, self.unknown_label.as_deref(), raw).map(InfoValue::Label)
            }
            None => Some(InfoValue::Number(
                RegisterFormat::new(false, self.scale).decode(raw),
            )),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: BridgeConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The mapping for Enervent EDA units compiled into the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::parse(BUILTIN_CONFIG)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=247).contains(&self.device.unit_id) {
            return Err(ConfigError::Validation(format!(
                "unit_id must be 1-247, got {}",
                self.device.unit_id
            )));
        }

        if self.device.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        check_names("flag", self.flags.iter().map(|f| f.name.as_str()))?;
        check_names("setting", self.settings.iter().map(|s| s.name.as_str()))?;
        check_names("reading", self.readings.iter().map(|r| r.name.as_str()))?;
        check_names(
            "device information",
            self.device_information.iter().map(|i| i.name.as_str()),
        )?;

        for setting in &self.settings {
            if setting.scale == 0 {
                return Err(ConfigError::Validation(format!(
                    "Setting '{}': scale must be > 0",
                    setting.name
                )));
            }

            let format = setting.format();
            let (min, max) = setting.bounds();
            if min > max {
                return Err(ConfigError::Validation(format!(
                    "Setting '{}': min ({}) is greater than max ({})",
                    setting.name, min, max
                )));
            }

            if min < format.min_value() || max > format.max_value() {
                return Err(ConfigError::Validation(format!(
                    "Setting '{}': range {}..={} does not fit the register ({}..={})",
                    setting.name,
                    min,
                    max,
                    format.min_value(),
                    format.max_value()
                )));
            }
        }

        for reading in &self.readings {
            if reading.scale == 0 {
                return Err(ConfigError::Validation(format!(
                    "Reading '{}': scale must be > 0",
                    reading.name
                )));
            }
        }

        for info in &self.device_information {
            if info.scale == 0 {
                return Err(ConfigError::Validation(format!(
                    "Device information '{}': scale must be > 0",
                    info.name
                )));
            }
        }

        Ok(())
    }
}

fn check_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for name in names {
        if name.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{} name cannot be empty",
                kind
            )));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Validation(format!(
                "Duplicate {} name '{}'",
                kind, name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::PointValue;
    use std::io::Write;

    #[test]
    fn test_builtin_config() {
        let config = BridgeConfig::builtin().unwrap();

        assert_eq!(config.device.unit_id, 1);
        assert_eq!(config.device.timeout_ms, 1000);
        assert_eq!(config.flags.len(), 7);
        assert_eq!(config.settings.len(), 6);

        let away = config.flags.iter().find(|f| f.name == "away").unwrap();
        assert_eq!(away.address, 1);
        assert_eq!(away.exclusive_group.as_deref(), Some("mode"));

        let night = config
            .flags
            .iter()
            .find(|f| f.name == "summerNightCooling")
            .unwrap();
        assert!(night.exclusive_group.is_none());

        let target = config
            .settings
            .iter()
            .find(|s| s.name == "temperatureTarget")
            .unwrap();
        assert_eq!(target.address, 135);
        assert_eq!(target.bounds(), (10, 30));
        assert_eq!(target.format(), RegisterFormat::new(true, 10));
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = BridgeConfig::parse("{}").unwrap();

        assert_eq!(config.device.unit_id, 1);
        assert!(config.flags.is_empty());
        assert!(config.settings.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_setting_defaults() {
        let json = r#"{
            settings: [
                { name: "speed", address: 4 },
                { name: "offset", address: 5, signed: true, scale: 10 }
            ]
        }"#;

        let config = BridgeConfig::parse(json).unwrap();
        assert_eq!(config.settings[0].scale, 1);
        assert_eq!(config.settings[0].bounds(), (0, 65535));
        assert_eq!(config.settings[1].bounds(), (-3276, 3276));
    }

    #[test]
    fn test_reading_register_type() {
        let json = r#"{
            readings: [
                { name: "a", address: 1 },
                { name: "b", type: "input", address: 2 }
            ]
        }"#;

        let config = BridgeConfig::parse(json).unwrap();
        assert_eq!(config.readings[0].register_type, RegisterType::Holding);
        assert_eq!(config.readings[1].register_type, RegisterType::Input);
        assert_eq!(config.readings[1].register_type.as_str(), "input");
    }

    #[test]
    fn test_validate_unit_id() {
        let result = BridgeConfig::parse("{ device: { unit_id: 0 } }");
        assert!(result.unwrap_err().to_string().contains("unit_id"));

        assert!(BridgeConfig::parse("{ device: { unit_id: 248 } }").is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        assert!(BridgeConfig::parse("{ device: { timeout_ms: 0 } }").is_err());
    }

    #[test]
    fn test_validate_duplicate_flag() {
        let json = r#"{
            flags: [
                { name: "pump", address: 3 },
                { name: "pump", address: 4 }
            ]
        }"#;

        let err = BridgeConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("Duplicate flag name 'pump'"));
    }

    #[test]
    fn test_validate_empty_name() {
        let json = r#"{ settings: [ { name: "", address: 3 } ] }"#;
        assert!(BridgeConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_zero_scale() {
        let json = r#"{ settings: [ { name: "speed", address: 3, scale: 0 } ] }"#;
        assert!(BridgeConfig::parse(json).is_err());

        let json = r#"{ readings: [ { name: "temp", address: 3, scale: 0 } ] }"#;
        assert!(BridgeConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_inverted_range() {
        let json = r#"{ settings: [ { name: "speed", address: 3, min: 50, max: 10 } ] }"#;
        let err = BridgeConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("greater than max"));
    }

    #[test]
    fn test_validate_range_outside_register() {
        let json = r#"{ settings: [ { name: "speed", address: 3, min: -1 } ] }"#;
        assert!(BridgeConfig::parse(json).is_err());

        let json = r#"{ settings: [ { name: "temp", address: 3, scale: 10, max: 10000 } ] }"#;
        let err = BridgeConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("does not fit the register"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ flags: [ {{ name: "pump", address: 3 }} ], logging: {{ level: "debug" }} }}"#
        )
        .unwrap();

        let config = BridgeConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.flags[0].name, "pump");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_missing_file() {
        let result = BridgeConfig::load_from_file("/nonexistent/eda.json5");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_invalid_json5() {
        let err = BridgeConfig::parse("{ flags: [").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_builtin_device_information() {
        let config = BridgeConfig::builtin().unwrap();
        let info = |name: &str| {
            config
                .device_information
                .iter()
                .find(|i| i.name == name)
                .unwrap()
        };

        let fan = info("fanType");
        assert_eq!(fan.source, InfoSource::Coil);
        assert_eq!(fan.decode(1), Some(InfoValue::Label("EC".to_string())));

        let family = info("familyType");
        assert_eq!(family.address, 597);
        assert_eq!(family.decode(5), Some(InfoValue::Label("LTR-3".to_string())));
        assert_eq!(family.decode(42), Some(InfoValue::Label("unknown".to_string())));

        // No cooler installed, and no fallback for unlisted cooling types
        let cooling = info("coolingTypeInstalled");
        assert_eq!(cooling.decode(0), None);
        assert_eq!(cooling.decode(9), None);

        assert_eq!(
            info("softwareVersion").decode(123),
            Some(InfoValue::Number(PointValue::Decimal(1.23)))
        );
        assert_eq!(
            info("serialNumber").decode(4242),
            Some(InfoValue::Number(PointValue::Integer(4242)))
        );
    }

    #[test]
    fn test_validate_device_information() {
        let json = r#"{ device_information: [ { name: "version", address: 599, scale: 0 } ] }"#;
        assert!(BridgeConfig::parse(json).is_err());

        let json = r#"{ device_information: [
            { name: "fan", type: "coil", address: 16 },
            { name: "fan", address: 17 }
        ] }"#;
        let err = BridgeConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("Duplicate device information name 'fan'"));
    }
}
