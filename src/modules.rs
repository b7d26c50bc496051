//! Script modules and the engine's module resolution.
//!
//! Every module moves through `Registered -> Compiled | Failed` at most once.
//! Compiled modules are published as loaders the engine's `require` can
//! run. A module that failed to compile is never published; `require`
//! reports the stored compile error instead.

use std::{
    borrow::Cow,
    cell::RefCell,
    fmt, fs,
    path::Path,
    rc::Rc,
};

use indexmap::IndexMap;
use mlua::{Function, IntoLua, Lua, Table, Value};
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind, Result},
    runtime::Host,
};

pub enum ModuleState {
    Registered(Cow<'static, str>),
    /// Zero-argument loader produced by compiling the source.
    Compiled(Function),
    Failed(Diagnostic),
}

impl ModuleState {
    pub fn is_compiled(&self) -> bool {
        matches!(self, ModuleState::Compiled(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ModuleState::Failed(_))
    }
}

impl fmt::Debug for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Registered(source) => write!(f, "Registered({} bytes)", source.len()),
            ModuleState::Compiled(_) => f.write_str("Compiled"),
            ModuleState::Failed(diag) => write!(f, "Failed({})", diag.message),
        }
    }
}

/// When registered modules are compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPolicy {
    /// Compile every module while installing.
    #[default]
    Eager,
    /// Compile a module the first time it is required.
    Lazy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleSummary {
    pub pending: usize,
    pub compiled: usize,
    pub failed: usize,
}

impl ModuleSummary {
    pub fn total(&self) -> usize {
        self.pending + self.compiled + self.failed
    }
}

impl fmt::Display for ModuleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} modules: {} compiled, {} failed, {} pending",
            self.total(),
            self.compiled,
            self.failed,
            self.pending
        )
    }
}

/// Named modules in registration order.
#[derive(Debug, Default)]
pub struct ModuleTable {
    modules: IndexMap<String, ModuleState>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. A name that is already taken keeps its first source.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<Cow<'static, str>>) -> bool {
        let name = name.into();
        if self.modules.contains_key(&name) {
            warn!(module = %name, "module already registered, keeping the first source");
            return false;
        }
        trace!(module = %name, "module registered");
        self.modules.insert(name, ModuleState::Registered(source.into()));
        true
    }

    /// Compiles `name` if it has not been compiled yet and returns the
    /// outcome. `None` means no module of that name is registered.
    pub fn resolve(&mut self, lua: &Lua, name: &str) -> Option<std::result::Result<Function, Diagnostic>> {
        let state = self.modules.get_mut(name)?;
        if let ModuleState::Registered(source) = state {
            *state = match lua.load(source.as_ref()).set_name(format!("={name}")).into_function() {
                Ok(loader) => {
                    debug!(module = %name, "module compiled");
                    ModuleState::Compiled(loader)
                }
                Err(err) => {
                    let cause = Diagnostic::from_lua(&err);
                    let diag = Diagnostic::new(DiagnosticKind::ModuleLoad, cause.message)
                        .with_chunk(name);
                    error!(module = %name, "failed to compile module: {}", diag.message);
                    ModuleState::Failed(diag)
                }
            };
        }
        match state {
            ModuleState::Compiled(loader) => Some(Ok(loader.clone())),
            ModuleState::Failed(diag) => Some(Err(diag.clone())),
            ModuleState::Registered(_) => None,
        }
    }

    pub fn state(&self, name: &str) -> Option<&ModuleState> {
        self.modules.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn summary(&self) -> ModuleSummary {
        self.modules
            .values()
            .fold(ModuleSummary::default(), |mut summary, state| {
                match state {
                    ModuleState::Registered(_) => summary.pending += 1,
                    ModuleState::Compiled(_) => summary.compiled += 1,
                    ModuleState::Failed(_) => summary.failed += 1,
                }
                summary
            })
    }
}

/// Dotted module name for a script at `relative` inside a module directory:
/// `ui/widgets.lua` is `ui.widgets` and `ui/init.lua` is `ui`.
pub fn module_name(relative: &Path) -> Option<String> {
    if relative.extension()? != "lua" {
        return None;
    }
    let stem = relative.with_extension("");
    let mut parts = stem
        .components()
        .map(|part| part.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() > 1 && parts.last() == Some(&"init") {
        parts.pop();
    }
    Some(parts.join("."))
}

/// Owns the module table and wires it into a runtime.
pub struct ModuleLoader {
    table: Rc<RefCell<ModuleTable>>,
    policy: LoadPolicy,
}

impl ModuleLoader {
    pub fn new(policy: LoadPolicy) -> Self {
        Self {
            table: Rc::new(RefCell::new(ModuleTable::new())),
            policy,
        }
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub fn table(&self) -> std::cell::Ref<'_, ModuleTable> {
        self.table.borrow()
    }

    pub fn register(&self, name: impl Into<String>, source: impl Into<Cow<'static, str>>) -> bool {
        self.table.borrow_mut().register(name, source)
    }

    pub fn register_all<I, N, S>(&self, modules: I) -> usize
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<Cow<'static, str>>,
    {
        modules
            .into_iter()
            .map(|(name, source)| self.register(name, source))
            .filter(|added| *added)
            .count()
    }

    /// Registers every `*.lua` file below `dir`, in file-name order.
    pub fn register_dir(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(Diagnostic::new(
                DiagnosticKind::SourceUnavailable,
                format!("module directory {} is not readable", dir.display()),
            )
            .with_chunk(dir.display().to_string())
            .into());
        }
        let mut added = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                Diagnostic::new(DiagnosticKind::SourceUnavailable, err.to_string())
                    .with_chunk(dir.display().to_string())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let Some(name) = module_name(relative) else {
                continue;
            };
            let source = fs::read_to_string(entry.path())?;
            if self.register(name, source) {
                added += 1;
            }
        }
        info!(dir = %dir.display(), added, "module directory registered");
        Ok(added)
    }

    /// Hooks the table into `require`. Under [`LoadPolicy::Eager`] every
    /// registered module is compiled now and published in `package.preload`.
    pub fn install(&self, host: &Host) -> Result<()> {
        let lua = host.handle().ok_or_else(|| {
            Diagnostic::new(DiagnosticKind::Runtime, "runtime is not initialized")
        })?;
        let package: Table = lua.globals().get("package")?;

        let table = Rc::clone(&self.table);
        let searcher = lua.create_function(move |lua, name: String| {
            let outcome = table.borrow_mut().resolve(lua, &name);
            match outcome {
                Some(Ok(loader)) => Ok((Value::Function(loader), name.into_lua(lua)?)),
                Some(Err(diag)) => {
                    let message = format!("module '{name}' failed to compile: {}", diag.message);
                    Ok((message.into_lua(lua)?, Value::Nil))
                }
                None => Ok((Value::Nil, Value::Nil)),
            }
        })?;
        let searchers: Table = package.get("searchers")?;
        searchers.raw_insert(2, searcher)?;

        if self.policy == LoadPolicy::Eager {
            let preload: Table = package.get("preload")?;
            let names: Vec<String> = self.table.borrow().names().map(str::to_string).collect();
            for name in names {
                let outcome = self.table.borrow_mut().resolve(lua, &name);
                if let Some(Ok(loader)) = outcome {
                    preload.set(name, loader)?;
                }
            }
        }
        Ok(())
    }
}
