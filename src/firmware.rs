//! Boot sequence: runtime, capabilities, modules, entry script, shell.

use tracing::{error, info};

use crate::{
    capabilities::{self, Devices},
    config::HostConfig,
    console::{ConsoleOut, LineSource},
    diagnostics::Result,
    modules::{LoadPolicy, ModuleLoader},
    repl::{Shell, ShellExit},
    runtime::Host,
};

/// Script modules compiled into the binary, in installation order.
pub const EMBEDDED_MODULES: &[(&str, &str)] = &[
    ("main", include_str!("../scripts/main.lua")),
    ("ui.colors", include_str!("../scripts/ui/colors.lua")),
    ("ui.widgets", include_str!("../scripts/ui/widgets.lua")),
    ("app.clock", include_str!("../scripts/app/clock.lua")),
    ("app.dashboard", include_str!("../scripts/app/dashboard.lua")),
];

/// A booted runtime together with the module table it resolves from.
pub struct Booted {
    pub host: Host,
    pub modules: ModuleLoader,
}

/// Creates the runtime and brings it to the point where the shell starts.
///
/// Only runtime creation and capability installation are fatal. A missing
/// module directory or a failing entry script is logged and boot goes on.
pub fn boot(config: &HostConfig, console: ConsoleOut, devices: &Devices) -> Result<Booted> {
    let host = Host::initialize(&config.runtime, console)?;
    capabilities::install(&host, devices, &config.devices)?;

    let policy = if config.boot.lazy_modules {
        LoadPolicy::Lazy
    } else {
        LoadPolicy::Eager
    };
    let modules = ModuleLoader::new(policy);
    modules.register_all(EMBEDDED_MODULES.iter().copied());
    if let Some(dir) = &config.boot.module_dir {
        if let Err(err) = modules.register_dir(dir) {
            error!(dir = %dir.display(), "skipping module directory: {err}");
        }
    }
    modules.install(&host)?;
    info!(policy = ?policy, "{}", modules.table().summary());

    if let Some(entry) = &config.boot.entry {
        info!(module = %entry, "running entry module");
        // Failures are already logged by the runtime.
        let _ = host.require(entry);
    }
    if let Some(source) = &config.boot.after_entry {
        if !host.restart_requested() {
            let _ = host.execute_source("after_entry", source);
        }
    }
    Ok(Booted { host, modules })
}

/// Boots and runs the shell until it ends for a reason other than a
/// restart. A restart tears the runtime down and boots again on the same
/// devices.
pub fn run(
    config: &HostConfig,
    console: ConsoleOut,
    devices: &Devices,
    input: &mut dyn LineSource,
) -> Result<ShellExit> {
    let mut boots = 0u32;
    loop {
        boots += 1;
        info!(boot = boots, "booting");
        let Booted { mut host, modules } = boot(config, console.clone(), devices)?;
        let exit = if host.restart_requested() {
            ShellExit::Restart
        } else if config.boot.shell {
            Shell::new(&host, &config.shell).run(input)?
        } else {
            ShellExit::Closed
        };
        host.shutdown();
        drop(modules);
        if exit != ShellExit::Restart {
            return Ok(exit);
        }
        info!("restarting");
    }
}
