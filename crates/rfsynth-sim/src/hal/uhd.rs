//! # UHD Driver for USRP Devices
//!
//! Opens Ettus Research USRP radios (B2xx, N2xx, X3xx) through the USRP
//! Hardware Driver library.
//!
//! ```rust,ignore
//! let mut radio = registry.create("uhd://addr=192.168.10.2,type=n210", &setup)?;
//! ```
//!
//! The library is loaded at run time. When it is not present every attempt to
//! open a device fails with [`RadioError::HardwareError`], which the capture
//! orchestrator treats as fatal and the real-time scheduler as fatal for that
//! channel only.

use tracing::{info, warn};

use super::{parse_args, DeviceDriver, RadioDevice};
use crate::device::{RadioError, RadioResult, RadioSetup};

/// Environment variable pointing at the UHD shared library.
pub const UHD_LIBRARY_ENV: &str = "UHD_LIBRARY";

/// UHD device driver.
#[derive(Debug)]
pub struct UhdDriver {
    library_available: bool,
}

impl UhdDriver {
    pub fn new() -> Self {
        let library_available = Self::check_library();
        if library_available {
            info!("UHD library found");
        } else {
            warn!("UHD library not found - USRP devices will not be available");
        }
        Self { library_available }
    }

    pub fn is_available(&self) -> bool {
        self.library_available
    }

    fn check_library() -> bool {
        std::env::var_os(UHD_LIBRARY_ENV)
            .map(|path| std::path::Path::new(&path).exists())
            .unwrap_or(false)
    }
}

impl Default for UhdDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for UhdDriver {
    fn name(&self) -> &str {
        "uhd"
    }

    fn create(&self, args: &str, setup: &RadioSetup) -> RadioResult<Box<dyn RadioDevice>> {
        let parsed = parse_args(args);
        let device_type = parsed.get("type").map(String::as_str).unwrap_or("unknown");

        if !self.library_available {
            return Err(RadioError::HardwareError(format!(
                "UHD library not available, cannot open {} radio {} ({}). Set {} to libuhd",
                setup.role, setup.index, device_type, UHD_LIBRARY_ENV
            )));
        }

        Err(RadioError::Unsupported(format!(
            "USRP streaming for '{}' requires the native UHD bindings",
            args
        )))
    }
}
