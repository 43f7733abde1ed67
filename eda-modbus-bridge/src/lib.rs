//! HTTP bridge for Modbus RTU devices.
//!
//! The bridge owns a single serial Modbus connection and exposes named
//! device points over a small HTTP API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ HTTP client │────>│   HTTP Router   │────>│    Adapter   │────>│ Serial device │
//! │             │<────│ (axum handlers) │<────│ (name → addr)│<────│  (Modbus RTU) │
//! └─────────────┘     └─────────────────┘     └──────────────┘     └───────────────┘
//! ```
//!
//! # Points
//!
//! - **Flags** are coils, switched with `POST /enableFlag/<flag>` and
//!   `POST /disableFlag/<flag>`
//! - **Settings** are holding registers, written with
//!   `POST /setSetting/<setting>/<value>`
//! - **Readings** are read-only registers
//!
//! All of them are reported by `GET /summary`.

pub mod adapter;
pub mod config;
pub mod device;
pub mod http;
pub mod register;
pub mod simulator;

pub use adapter::{AdapterError, ModbusAdapter, SharedAdapter, Summary};
pub use config::BridgeConfig;
pub use device::{DeviceError, ModbusDevice, RegisterIo};
pub use http::HttpServer;
pub use simulator::SimulatedDevice;
