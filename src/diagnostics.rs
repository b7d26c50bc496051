use std::fmt;

use thiserror::Error;

use crate::bridge::NativeError;

/// Classification of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The guest engine could not be created. Fatal for boot.
    EngineCreation,
    /// Source failed to parse or compile.
    Compile,
    /// An error was raised while executing, including bridge-raised errors.
    Runtime,
    /// A requested source (file, directory) could not be read.
    SourceUnavailable,
    /// A named module failed to compile during boot registration.
    ModuleLoad,
    /// A bridged native operation failed.
    NativeCall,
}

impl DiagnosticKind {
    pub fn label(self) -> &'static str {
        match self {
            DiagnosticKind::EngineCreation => "engine creation error",
            DiagnosticKind::Compile => "compile error",
            DiagnosticKind::Runtime => "runtime error",
            DiagnosticKind::SourceUnavailable => "source unavailable",
            DiagnosticKind::ModuleLoad => "module load error",
            DiagnosticKind::NativeCall => "native call error",
        }
    }
}

/// Rich diagnostic information surfaced to operators.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Chunk, module or file the diagnostic originated from.
    pub chunk: Option<String>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            chunk: None,
            notes: Vec::new(),
        }
    }

    pub fn with_chunk(mut self, chunk: impl Into<String>) -> Self {
        self.chunk = Some(chunk.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Classifies an engine error raised while compiling or running `chunk`.
    pub fn from_lua(err: &mlua::Error) -> Self {
        match err {
            mlua::Error::SyntaxError { message, .. } => {
                Diagnostic::new(DiagnosticKind::Compile, message.clone())
            }
            mlua::Error::CallbackError { cause, .. } => Diagnostic::from_lua(cause),
            mlua::Error::WithContext { context, cause } => {
                Diagnostic::from_lua(cause).with_note(context.clone())
            }
            mlua::Error::ExternalError(inner) if inner.is::<NativeError>() => {
                Diagnostic::new(DiagnosticKind::NativeCall, inner.to_string())
            }
            mlua::Error::RuntimeError(message) => {
                Diagnostic::new(DiagnosticKind::Runtime, strip_traceback(message))
            }
            other => Diagnostic::new(DiagnosticKind::Runtime, strip_traceback(&other.to_string())),
        }
    }
}

fn strip_traceback(message: &str) -> String {
    match message.find("\nstack traceback:") {
        Some(idx) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)?;
        if let Some(chunk) = &self.chunk {
            write!(f, " (in {chunk})")?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the host's fallible Rust APIs.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("engine error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("device error: {0}")]
    Device(String),
}

impl HostError {
    pub fn kind(&self) -> Option<DiagnosticKind> {
        match self {
            HostError::Diagnostic(diag) => Some(diag.kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Outcome of an execution entry point. Failures are reported, never raised.
pub type Status = std::result::Result<(), Diagnostic>;
