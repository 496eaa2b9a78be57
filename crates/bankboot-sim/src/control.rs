//! Fixed-level boot mode control

use bankboot_core::control::{ControlReader, ControlState};

/// Failure of a [`FixedControl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("control input unavailable")]
pub struct ControlUnavailable;

/// Control that always reads the same level, or always fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedControl {
    state: Option<ControlState>,
}

impl FixedControl {
    /// Control held active: recovery is requested
    pub fn active() -> Self {
        Self {
            state: Some(ControlState::Active),
        }
    }

    /// Control released
    pub fn inactive() -> Self {
        Self {
            state: Some(ControlState::Inactive),
        }
    }

    /// Control that cannot be read
    pub fn broken() -> Self {
        Self { state: None }
    }
}

impl ControlReader for FixedControl {
    type Error = ControlUnavailable;

    fn configure(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read(&mut self) -> Result<ControlState, Self::Error> {
        self.state.ok_or(ControlUnavailable)
    }
}
