//! bankboot-sim - Host-side collaborators for the bankboot core
//!
//! This crate provides everything needed to run the boot decision on a
//! development machine: an emulated flash map described by a board layout,
//! key-value stores for the slot preference, a SHA-256 integrity validator
//! working on the image TLV trailer, a key manager for encrypted images and
//! a builder producing images the validator accepts.

pub mod board;
pub mod builder;
pub mod control;
pub mod flash;
pub mod keys;
pub mod store;
pub mod tlv;
pub mod validator;

pub use board::demo_layout;
pub use builder::{BuildError, ImageBuilder};
pub use control::FixedControl;
pub use flash::SimFlash;
pub use keys::TlvKeyManager;
pub use store::{MemStore, NvsStore};
pub use validator::HashValidator;
