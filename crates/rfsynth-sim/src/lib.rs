//! # rfsynth Radio Layer
//!
//! The boundary between test orchestration and radio front ends.
//!
//! - [`hal::RadioDevice`]: the operations the orchestrator and scheduler need
//!   from a multi-channel radio (start/wait/stop, payload upload, capture
//!   readout and hardware-timed start/retune)
//! - [`hal::DriverRegistry`]: creates devices from `driver://args` URIs
//! - [`hal::sim`]: a simulated over-the-air medium shared by simulated radios
//! - [`hal::uhd`]: USRP driver entry point
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │      Capture Orchestrator / Scheduler        │
//! ├──────────────────────────────────────────────┤
//! │         RadioDevice trait (this crate)       │
//! ├───────────────────────┬──────────────────────┤
//! │  SimRadio ─ SimMedium │  UHD (USRP hardware) │
//! └───────────────────────┴──────────────────────┘
//! ```

pub mod channel;
pub mod device;
pub mod hal;

pub use device::{ChannelSettings, RadioError, RadioResult, RadioRole, RadioSetup};
pub use hal::{create_default_registry, DeviceDriver, DriverRegistry, RadioDevice};
