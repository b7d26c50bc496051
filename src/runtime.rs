use std::{
    cell::Cell,
    fs,
    path::Path,
    rc::Rc,
    sync::atomic::{AtomicBool, Ordering},
};

use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, LuaOptions, MultiValue, StdLib, Value};
use tracing::{debug, error, info};

use crate::{
    bridge::{self, Namespace, NativeError},
    config::RuntimeConfig,
    console::ConsoleOut,
    diagnostics::{Diagnostic, DiagnosticKind, Result, Status},
};

static RUNTIME_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Claim on the process's single runtime slot; released on drop.
struct RuntimeSlot(());

impl RuntimeSlot {
    fn acquire() -> Option<Self> {
        RUNTIME_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RuntimeSlot(()))
    }
}

impl Drop for RuntimeSlot {
    fn drop(&mut self) {
        RUNTIME_ACTIVE.store(false, Ordering::Release);
    }
}

/// Result of the shell's expression attempt.
#[derive(Debug)]
pub enum Evaluation {
    /// The input is an expression; each returned value rendered with `tostring`.
    Values(Vec<String>),
    /// The input does not compile as an expression.
    NotAnExpression,
    Failed(Diagnostic),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    /// The engine reached end of input while a construct was still open.
    Incomplete,
    Invalid,
}

/// Owner of the guest runtime.
///
/// Only one `Host` can be live in the process, and a `Host` cannot leave
/// the thread that created it.
pub struct Host {
    lua: Option<Lua>,
    slot: Option<RuntimeSlot>,
    console: ConsoleOut,
    memory_limit: Option<usize>,
    restart: Rc<Cell<bool>>,
}

impl Host {
    pub fn initialize(config: &RuntimeConfig, console: ConsoleOut) -> Result<Host> {
        info!("initializing guest runtime");
        let slot = RuntimeSlot::acquire().ok_or_else(|| {
            Diagnostic::new(
                DiagnosticKind::EngineCreation,
                "a runtime is already active in this process",
            )
        })?;
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::new()).map_err(|err| {
            Diagnostic::new(DiagnosticKind::EngineCreation, err.to_string())
        })?;
        if let Some(limit) = config.memory_limit {
            let used = lua.used_memory();
            if limit < used {
                return Err(Diagnostic::new(
                    DiagnosticKind::EngineCreation,
                    format!(
                        "memory limit of {limit} bytes is below the engine working set of {used} bytes"
                    ),
                )
                .into());
            }
            lua.set_memory_limit(limit).map_err(|err| {
                Diagnostic::new(DiagnosticKind::EngineCreation, err.to_string())
            })?;
        }
        let host = Host {
            lua: Some(lua),
            slot: Some(slot),
            console,
            memory_limit: config.memory_limit,
            restart: Rc::new(Cell::new(false)),
        };
        host.install_core().map_err(|err| {
            Diagnostic::new(DiagnosticKind::EngineCreation, err.to_string())
        })?;
        info!(used_bytes = host.used_memory(), "guest runtime initialized");
        Ok(host)
    }

    /// The live engine, or `None` once the runtime has been shut down.
    pub fn handle(&self) -> Option<&Lua> {
        self.lua.as_ref()
    }

    pub fn console(&self) -> &ConsoleOut {
        &self.console
    }

    pub fn used_memory(&self) -> usize {
        self.lua.as_ref().map_or(0, Lua::used_memory)
    }

    /// Set once a script calls `restart()`.
    pub fn restart_requested(&self) -> bool {
        self.restart.get()
    }

    /// Destroys the engine. Every later execution reports "not ready".
    pub fn shutdown(&mut self) {
        if self.lua.take().is_some() {
            info!("guest runtime shut down");
        }
        self.slot = None;
    }

    fn ready(&self) -> std::result::Result<&Lua, Diagnostic> {
        self.handle()
            .ok_or_else(|| Diagnostic::new(DiagnosticKind::Runtime, "runtime is not initialized"))
    }

    fn install_core(&self) -> mlua::Result<()> {
        let lua = self.ready().map_err(mlua::Error::runtime)?;

        let console = self.console.clone();
        let print = lua.create_function(move |lua, args: MultiValue| {
            let tostring: Function = lua.globals().get("tostring")?;
            let mut line = String::new();
            for (idx, value) in args.into_iter().enumerate() {
                if idx > 0 {
                    line.push('\t');
                }
                let text: mlua::String = tostring.call(value)?;
                line.push_str(&text.to_string_lossy());
            }
            console.line(&line).map_err(mlua::Error::external)
        })?;
        lua.globals().set("print", print)?;

        let limit = self.memory_limit;
        bridge::register_function(lua, "heap", move |lua, ()| {
            let used = lua.used_memory();
            let available = limit.map(|limit| limit.saturating_sub(used) as i64);
            Ok((used as i64, available))
        })?;

        let restart = Rc::clone(&self.restart);
        bridge::register_function(lua, "restart", move |_, ()| -> std::result::Result<(), NativeError> {
            info!("restart requested by script");
            restart.set(true);
            Err(NativeError::failed("restart requested"))
        })?;
        Ok(())
    }

    pub fn register_function<A, R, F>(&self, name: &str, func: F) -> Result<()>
    where
        A: FromLuaMulti + 'static,
        R: IntoLuaMulti + 'static,
        F: Fn(&Lua, A) -> std::result::Result<R, NativeError> + 'static,
    {
        let lua = self.ready()?;
        bridge::register_function(lua, name, func)?;
        Ok(())
    }

    pub fn register_namespace(&self, namespace: Namespace) -> Result<()> {
        let lua = self.ready()?;
        let name = namespace.name().to_string();
        namespace.install(lua)?;
        debug!(namespace = %name, "capability namespace installed");
        Ok(())
    }

    /// Compiles and runs `source`. Failures are logged and returned, and the
    /// runtime stays usable.
    pub fn execute_source(&self, chunk: &str, source: &str) -> Status {
        let lua = self.ready()?;
        lua.load(source)
            .set_name(format!("={chunk}"))
            .exec()
            .map_err(|err| report(chunk, &err))
    }

    pub fn execute_file(&self, path: &Path) -> Status {
        let chunk = path.display().to_string();
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                let diag = Diagnostic::new(
                    DiagnosticKind::SourceUnavailable,
                    format!("cannot read {chunk}: {err}"),
                )
                .with_chunk(chunk.as_str());
                error!(file = %chunk, "{}", diag.message);
                return Err(diag);
            }
        };
        self.execute_source(&chunk, &source)
    }

    /// Requires module `name` through the engine's own loader.
    pub fn require(&self, name: &str) -> Status {
        let lua = self.ready()?;
        let require: Function = lua.globals().get("require").map_err(|err| report(name, &err))?;
        require
            .call::<Value>(name)
            .map(|_| ())
            .map_err(|err| report(name, &err))
    }

    /// Tries `source` as an expression by compiling `return <source>`.
    pub fn evaluate(&self, source: &str) -> Evaluation {
        let lua = match self.ready() {
            Ok(lua) => lua,
            Err(diag) => return Evaluation::Failed(diag),
        };
        let function = match lua
            .load(format!("return {source}"))
            .set_name("=stdin")
            .into_function()
        {
            Ok(function) => function,
            Err(_) => return Evaluation::NotAnExpression,
        };
        let rendered = function.call::<MultiValue>(()).and_then(|values| {
            let tostring: Function = lua.globals().get("tostring")?;
            values
                .into_iter()
                .map(|value| {
                    tostring
                        .call::<mlua::String>(value)
                        .map(|text| text.to_string_lossy().to_string())
                })
                .collect::<mlua::Result<Vec<_>>>()
        });
        match rendered {
            Ok(values) => Evaluation::Values(values),
            Err(err) => Evaluation::Failed(report("stdin", &err)),
        }
    }

    /// Asks the engine whether `source` is a complete chunk, without running it.
    pub fn is_complete(&self, source: &str) -> Completeness {
        let Some(lua) = self.handle() else {
            return Completeness::Invalid;
        };
        match lua.load(source).set_name("=stdin").into_function() {
            Ok(_) => Completeness::Complete,
            Err(mlua::Error::SyntaxError {
                incomplete_input: true,
                ..
            }) => Completeness::Incomplete,
            Err(_) => Completeness::Invalid,
        }
    }
}

fn report(chunk: &str, err: &mlua::Error) -> Diagnostic {
    let diag = Diagnostic::from_lua(err).with_chunk(chunk);
    error!(chunk = %chunk, kind = diag.kind.label(), "{}", diag.message);
    diag
}
