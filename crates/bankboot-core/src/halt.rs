//! Fail-stop
//!
//! A fatal boot decision must never return control. The [`Halt`] boundary
//! keeps that behavior out of the decision engine so tests can intercept it.

use crate::error::Error;

/// Terminal action taken after a fatal boot error
pub trait Halt {
    /// Stop execution for good
    fn halt(&mut self, err: Error) -> !;
}

/// Spin forever
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinHalt;

impl Halt for SpinHalt {
    fn halt(&mut self, _err: Error) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }
}
