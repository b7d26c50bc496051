//! Scripting host for a Lua-driven dashboard device: the guest runtime,
//! the bridge that exposes native capabilities to scripts, boot-time module
//! loading and the operator shell.

pub mod bridge;
pub mod capabilities;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod firmware;
pub mod logging;
pub mod modules;
pub mod repl;
pub mod runtime;

pub use bridge::{ErrorConvention, Namespace, NativeError};
pub use capabilities::Devices;
pub use config::HostConfig;
pub use console::{Capture, ConsoleOut, EditorConsole, LineEvent, LineSource, RawConsole};
pub use diagnostics::{Diagnostic, DiagnosticKind, HostError, Result, Status};
pub use modules::{LoadPolicy, ModuleLoader, ModuleState, ModuleTable};
pub use repl::{Shell, ShellExit};
pub use runtime::{Completeness, Evaluation, Host};
