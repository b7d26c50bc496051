//! Registration glue between native functions and the guest engine.
//!
//! Native functions are plain Rust closures with a typed argument tuple and a
//! `Result<T, NativeError>` return. The adapter built here converts guest
//! arguments into that tuple (a missing or mistyped argument raises a script
//! error before the closure runs) and maps the closure's outcome back using
//! the namespace's [`ErrorConvention`].

use indexmap::IndexMap;
use mlua::{FromLuaMulti, Function, IntoLua, IntoLuaMulti, Lua, MultiValue, Value};
use thiserror::Error;

/// Failure of a native operation.
#[derive(Debug, Clone, Error)]
pub enum NativeError {
    /// The caller passed a value the function refuses.
    #[error("{0}")]
    InvalidArgument(String),
    /// The peripheral was used before it was configured.
    #[error("{0}")]
    NotConfigured(String),
    /// The bus transaction failed; `code` is the driver status.
    #[error("{message} (code {code})")]
    Transport { code: i32, message: String },
    #[error("{0}")]
    Timeout(String),
    #[error("{0}")]
    Failed(String),
}

impl NativeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        NativeError::InvalidArgument(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        NativeError::Failed(message.into())
    }

    /// Misuse by the script; always raised, whatever the namespace convention.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            NativeError::InvalidArgument(_) | NativeError::NotConfigured(_)
        )
    }

    /// Secondary value returned next to `nil` under [`ErrorConvention::Sentinel`].
    fn diagnostic_value(&self, lua: &Lua) -> mlua::Result<Value> {
        match self {
            NativeError::Transport { code, .. } => Ok(Value::Integer((*code).into())),
            other => other.to_string().into_lua(lua),
        }
    }
}

/// How a namespace reports operational failures to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorConvention {
    /// Raise a script error.
    Raise,
    /// Return `nil` plus a diagnostic value (error code or message).
    Sentinel,
}

impl ErrorConvention {
    fn signal(self, lua: &Lua, err: NativeError) -> mlua::Result<MultiValue> {
        if err.is_usage() {
            return Err(mlua::Error::runtime(err));
        }
        match self {
            ErrorConvention::Raise => Err(mlua::Error::external(err)),
            ErrorConvention::Sentinel => (Value::Nil, err.diagnostic_value(lua)?).into_lua_multi(lua),
        }
    }
}

/// Wraps a typed native closure as a guest function.
pub fn adapt<A, R, F>(lua: &Lua, convention: ErrorConvention, func: F) -> mlua::Result<Function>
where
    A: FromLuaMulti + 'static,
    R: IntoLuaMulti + 'static,
    F: Fn(&Lua, A) -> Result<R, NativeError> + 'static,
{
    lua.create_function(move |lua, args: A| match func(lua, args) {
        Ok(values) => values.into_lua_multi(lua),
        Err(err) => convention.signal(lua, err),
    })
}

/// Installs a single global callable. Failures raise.
pub fn register_function<A, R, F>(lua: &Lua, name: &str, func: F) -> mlua::Result<()>
where
    A: FromLuaMulti + 'static,
    R: IntoLuaMulti + 'static,
    F: Fn(&Lua, A) -> Result<R, NativeError> + 'static,
{
    let function = adapt(lua, ErrorConvention::Raise, func)?;
    lua.globals().set(name, function)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Integer(i64),
    Text(&'static str),
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Integer(value)
    }
}

impl From<u16> for Constant {
    fn from(value: u16) -> Self {
        Constant::Integer(value.into())
    }
}

impl From<&'static str> for Constant {
    fn from(value: &'static str) -> Self {
        Constant::Text(value)
    }
}

impl IntoLua for Constant {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        match self {
            Constant::Integer(value) => Ok(Value::Integer(value)),
            Constant::Text(text) => text.into_lua(lua),
        }
    }
}

type Installer = Box<dyn FnOnce(&Lua) -> mlua::Result<Function>>;

/// A named table of native functions and constants, built before it is
/// handed to the engine.
pub struct Namespace {
    name: String,
    convention: ErrorConvention,
    functions: IndexMap<&'static str, Installer>,
    constants: IndexMap<&'static str, Constant>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, convention: ErrorConvention) -> Self {
        Self {
            name: name.into(),
            convention,
            functions: IndexMap::new(),
            constants: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn convention(&self) -> ErrorConvention {
        self.convention
    }

    pub fn function<A, R, F>(mut self, name: &'static str, func: F) -> Self
    where
        A: FromLuaMulti + 'static,
        R: IntoLuaMulti + 'static,
        F: Fn(&Lua, A) -> Result<R, NativeError> + 'static,
    {
        let convention = self.convention;
        self.functions
            .insert(name, Box::new(move |lua: &Lua| adapt(lua, convention, func)));
        self
    }

    pub fn constant(mut self, name: &'static str, value: impl Into<Constant>) -> Self {
        self.constants.insert(name, value.into());
        self
    }

    pub fn function_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    /// Builds the complete table, then publishes it under the namespace's
    /// global name in one assignment. If any member fails to build, the
    /// global is left untouched.
    pub fn install(self, lua: &Lua) -> mlua::Result<()> {
        let table = lua.create_table()?;
        for (name, installer) in self.functions {
            table.raw_set(name, installer(lua)?)?;
        }
        for (name, value) in self.constants {
            table.raw_set(name, value)?;
        }
        lua.globals().set(self.name, table)
    }
}

/// Truthiness as the guest language defines it: only `nil` and `false` are false.
pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}
