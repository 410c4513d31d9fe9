//! CLI command implementations
//!
//! `probe`, `list-ports`, `inspect` and `eeprom` report and exit. The device
//! operations all go through a flash session, rendered by [`session`].

pub mod inspect;
pub mod probe;
pub mod session;
