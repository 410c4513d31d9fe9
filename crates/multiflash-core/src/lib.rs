//! multiflash-core - Codecs for MULTI-Module firmware images and EEPROM data
//!
//! This crate holds everything about flashing a MULTI-Module that can be
//! decided from bytes alone, without touching a device:
//!
//! - [`signature`] - the build signature a firmware image carries, in both
//!   the legacy text-tag form and the packed-hex form
//! - [`eeprom`] - the wear-leveled emulated EEPROM of STM32 modules and the
//!   plain EEPROM of AVR modules, including backup extraction
//! - [`size`] - the maximum legal firmware size for a module configuration
//!
//! # Features
//!
//! - `std` - Enable `std::error::Error` impls for the error types
//!
//! # Example
//!
//! ```
//! use multiflash_core::signature;
//!
//! let mut image = vec![0xFFu8; 256];
//! image[100..124].copy_from_slice(b"multi-stm-bcsid-01020304");
//!
//! let sig = signature::parse(&image).unwrap();
//! assert_eq!(sig.version, "1.2.3.4");
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod eeprom;
pub mod error;
pub mod signature;
pub mod size;
pub mod transport;

pub use error::{EepromError, SignatureError, SizeError};
pub use size::Confirm;
pub use signature::{FirmwareSignature, ModuleType};
pub use transport::Transport;
