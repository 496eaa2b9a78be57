//! bankboot-linux-gpio - Recovery button on a Linux GPIO line
//!
//! This crate reads the boot mode control through the Linux character
//! device GPIO interface (gpiocdev). Holding the control active at boot
//! selects the recovery image in the scratch area.
//!
//! # Example
//!
//! ```no_run
//! use bankboot_core::control::{select_mode, BootMode};
//! use bankboot_linux_gpio::{GpioControl, GpioControlConfig};
//!
//! let config = GpioControlConfig::new("/dev/gpiochip0", 17).with_active_low(true);
//! let mut control = GpioControl::new(config);
//!
//! if select_mode(&mut control) == BootMode::Recovery {
//!     println!("recovery requested");
//! }
//! ```
//!
//! # Usage with the bankboot CLI
//!
//! ```bash
//! # Button on line 17 of the first chip, pulling to ground
//! bankboot boot --gpio dev=/dev/gpiochip0,line=17,active_low=1,bias=pull-up
//!
//! # Slower debounce: 10 samples, 5 ms apart
//! bankboot boot --gpio gpiochip=0,line=17,debounce=10,interval_us=5000
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel 4.8+ with GPIO character device support (kernel 5.5+ for v2 API)
//! - Access to `/dev/gpiochipN` devices (may require root or udev rules)

pub mod device;
pub mod error;

// Re-exports
pub use device::{debounce, parse_options, GpioControl, GpioControlConfig};
pub use error::{LinuxGpioError, Result};

/// Build a GPIO control from CLI option pairs
///
/// The line is not requested until the control is configured.
pub fn open_gpio_control(options: &[(&str, &str)]) -> Result<GpioControl> {
    let config = parse_options(options)?;
    Ok(GpioControl::new(config))
}
