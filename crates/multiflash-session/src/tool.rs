//! External flashing tools
//!
//! Every device operation is delegated to a command-line tool: `dfu-util`
//! for the native USB port, `maple-reset` to reboot a running module into
//! DFU mode, `stm32flash` for the serial bootloader and `avrdude` for the
//! USBasp. A tool's exit status is the only success signal; its output is
//! only forwarded for the operator.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use thiserror::Error;

/// The external programs a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// DFU uploads and downloads over native USB
    DfuUtil,
    /// Reboots a running module into DFU mode
    MapleReset,
    /// STM32 serial bootloader client
    Stm32Flash,
    /// AVR programmer driver
    Avrdude,
}

impl Tool {
    /// Executable name without platform suffix
    pub fn executable(&self) -> &'static str {
        match self {
            Self::DfuUtil => "dfu-util",
            Self::MapleReset => "maple-reset",
            Self::Stm32Flash => "stm32flash",
            Self::Avrdude => "avrdude",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable())
    }
}

/// A tool and the arguments for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Program to run
    pub tool: Tool,
    /// Arguments, passed without shell interpretation
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Create a command with no arguments
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument
    pub fn path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Reasons a tool could not be run at all
#[derive(Debug, Error)]
pub enum ToolError {
    /// Executable not found
    #[error("{tool} not found ({})", path.display())]
    Missing {
        /// Tool that was requested
        tool: Tool,
        /// Path that was tried
        path: PathBuf,
    },

    /// Process could not be started
    #[error("could not start {tool}: {source}")]
    Spawn {
        /// Tool that was requested
        tool: Tool,
        /// OS error
        source: io::Error,
    },

    /// Waiting for the process failed
    #[error("lost track of {tool}: {source}")]
    Wait {
        /// Tool that was running
        tool: Tool,
        /// OS error
        source: io::Error,
    },
}

/// Runs tool commands
pub trait ToolRunner: Send {
    /// Run `command` to completion, handing each output line to `output`,
    /// and return its exit status
    fn run(
        &mut self,
        command: &ToolCommand,
        output: &mut dyn FnMut(&str),
    ) -> Result<i32, ToolError>;
}

/// Runs tools as child processes
///
/// Tools are looked up in the tools directory first, then on `PATH`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    tools_dir: PathBuf,
}

impl ProcessRunner {
    /// Create a runner preferring tools from `tools_dir`
    pub fn new(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
        }
    }

    /// Where `tool` will be run from
    pub fn resolve(&self, tool: Tool) -> PathBuf {
        let bundled = self.tools_dir.join(format!(
            "{}{}",
            tool.executable(),
            std::env::consts::EXE_SUFFIX
        ));
        if bundled.is_file() {
            bundled
        } else {
            PathBuf::from(tool.executable())
        }
    }
}

/// Forward a pipe to `tx`, splitting on both line feeds and the carriage
/// returns progress meters use
fn forward_lines<R: Read + Send + 'static>(pipe: R, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        for chunk in BufReader::new(pipe).split(b'\n') {
            let Ok(chunk) = chunk else {
                break;
            };
            let text = String::from_utf8_lossy(&chunk);
            for line in text.split('\r').filter(|l| !l.trim().is_empty()) {
                if tx.send(line.to_string()).is_err() {
                    return;
                }
            }
        }
    })
}

impl ToolRunner for ProcessRunner {
    fn run(
        &mut self,
        command: &ToolCommand,
        output: &mut dyn FnMut(&str),
    ) -> Result<i32, ToolError> {
        let tool = command.tool;
        let path = self.resolve(tool);
        log::debug!("Running {} as {}", command, path.display());

        let mut child = Command::new(&path)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => ToolError::Missing {
                    tool,
                    path: path.clone(),
                },
                _ => ToolError::Spawn { tool, source },
            })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        for line in rx {
            output(&line);
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child
            .wait()
            .map_err(|source| ToolError::Wait { tool, source })?;
        log::debug!("{} exited with {}", tool, status);

        // Killed by a signal
        Ok(status.code().unwrap_or(-1))
    }
}
