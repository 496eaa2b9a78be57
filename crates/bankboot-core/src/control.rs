//! Boot mode selection from a physical control
//!
//! A button or strap read through a GPIO-style interface can request the
//! recovery boot instead of the normal bank decision.

use core::fmt;

/// Level of the physical control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Control is asserted
    Active,
    /// Control is released
    Inactive,
}

/// Which decision path a boot attempt takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Reconcile bank validation with the stored preference
    Normal,
    /// Boot the scratch / configuration image
    Recovery,
}

/// Reader for the physical control
///
/// Implementations are expected to debounce the input themselves.
pub trait ControlReader {
    /// Error reported by the underlying driver
    type Error: fmt::Display;

    /// Prepare the input for reading
    fn configure(&mut self) -> Result<(), Self::Error>;

    /// Sample the control
    fn read(&mut self) -> Result<ControlState, Self::Error>;
}

/// Decide the boot mode from the control
///
/// A control that cannot be configured or read does not request anything:
/// the normal path is taken.
pub fn select_mode<C: ControlReader + ?Sized>(control: &mut C) -> BootMode {
    if let Err(e) = control.configure() {
        log::warn!("Boot mode control unavailable: {}", e);
        return BootMode::Normal;
    }

    match control.read() {
        Ok(ControlState::Active) => {
            log::info!("Boot mode control active: recovery boot requested");
            BootMode::Recovery
        }
        Ok(ControlState::Inactive) => BootMode::Normal,
        Err(e) => {
            log::warn!("Failed to read boot mode control: {}", e);
            BootMode::Normal
        }
    }
}
