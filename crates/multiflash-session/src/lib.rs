//! multiflash-session - Flashing MULTI-Modules
//!
//! A [`FlashSession`] performs one operation (erase, read, write, EEPROM
//! write or bootloader upgrade) against one module over one
//! [`Transport`](multiflash_core::Transport). The device work itself is done
//! by external tools (`dfu-util`, `maple-reset`, `stm32flash`, `avrdude`);
//! the session decides which tool runs when, checks preconditions, and walks
//! the operator through recovering a module that is stuck.
//!
//! # Example
//!
//! ```no_run
//! use multiflash_core::Transport;
//! use multiflash_session::{
//!     Collaborators, FlashConfig, FlashSession, Operation, SessionEvent, Target,
//! };
//!
//! let config = FlashConfig::default();
//! let collaborators = Collaborators::system(&config);
//! let session = FlashSession::new(
//!     config,
//!     Target {
//!         transport: Transport::NativeUsb,
//!         port: Some("/dev/ttyACM0".into()),
//!         monitor_active: false,
//!     },
//!     Operation::Write {
//!         firmware: "multi-stm-opentx-v1.3.4.0.bin".into(),
//!         write_bootloader: false,
//!         run_after: true,
//!     },
//!     collaborators,
//! );
//!
//! let handle = session.spawn()?;
//! for event in handle.events().iter() {
//!     if let SessionEvent::Terminal(outcome) = event {
//!         println!("{}", outcome);
//!         break;
//!     }
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
mod handle;
mod recovery;
pub mod session;
pub mod tool;

pub use commands::CommandBuilder;
pub use config::{ConfigError, FlashConfig, StmBootloader};
pub use error::{Result, SessionError};
pub use events::{Control, Outcome, Phase, SessionEvent};
pub use handle::SessionHandle;
pub use session::{Collaborators, FlashSession, Operation, Target};
pub use tool::{ProcessRunner, Tool, ToolCommand, ToolError, ToolRunner};
