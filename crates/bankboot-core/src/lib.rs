//! bankboot-core - Image selection and validation core for dual-bank bootloaders
//!
//! This crate decides which firmware image in flash is safe and authorized
//! to run. It is designed to be `no_std` compatible and allocation free so it
//! can run before any application scheduler starts.
//!
//! The pipeline is:
//!
//! 1. Resolve the sector layout of both image banks and the scratch area
//!    ([`geometry`]).
//! 2. Read and validate the image header of every bank ([`image`]).
//! 3. Reconcile the validation outcome with the operator's stored bank
//!    preference ([`storage`]).
//! 4. Produce a [`loader::BootResponse`] or fail-stop through a [`halt::Halt`].
//!
//! A separate recovery path ([`recovery`]) boots the scratch area when a
//! physical control ([`control`]) requests it.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`) and the
//!   TOML board layout loader
//! - `alloc` - Enable heap allocation
//!
//! # Example
//!
//! ```ignore
//! use bankboot_core::{BootConfig, BootLoader, halt::SpinHalt};
//!
//! let mut loader = BootLoader::new(flash, validator, store, BootConfig::default());
//! let rsp = loader.boot_or_halt(&mut SpinHalt);
//! jump_to(rsp.flash_dev_id, rsp.image_off, &rsp.header);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod config;
pub mod control;
pub mod error;
pub mod flash;
pub mod geometry;
pub mod halt;
pub mod image;
#[cfg(feature = "std")]
pub mod layout;
pub mod loader;
pub mod recovery;
pub mod storage;

#[cfg(test)]
mod testutil;

pub use config::{AreaMap, BootConfig, Capabilities};
pub use error::{Error, Result};
pub use loader::{BootLoader, BootResponse};
