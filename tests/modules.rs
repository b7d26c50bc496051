mod common;

use std::{fs, path::Path};

use moondash::{
    Capture, ConsoleOut, DiagnosticKind, Evaluation, Host, LoadPolicy, ModuleLoader, ModuleState,
    capabilities::Devices,
    config::{HostConfig, RuntimeConfig},
    firmware::{self, EMBEDDED_MODULES},
    modules::{ModuleSummary, module_name},
};
use tempfile::tempdir;

fn host() -> (Host, Capture) {
    let capture = Capture::new();
    let host = Host::initialize(&RuntimeConfig::default(), ConsoleOut::new(capture.clone()))
        .expect("runtime");
    (host, capture)
}

fn three_modules(loader: &ModuleLoader) {
    loader.register("first", "return { name = 'first' }");
    loader.register("second", "return { name = ");
    loader.register("third", "return { name = 'third' }");
}

#[test]
fn failed_module_does_not_block_others() {
    let _runtime = common::exclusive();
    let (host, _) = host();
    let loader = ModuleLoader::new(LoadPolicy::Eager);
    three_modules(&loader);
    loader.install(&host).expect("install");

    host.execute_source(
        "test",
        "assert(require('first').name == 'first') assert(require('third').name == 'third')",
    )
    .expect("good modules load");

    let diag = host.require("second").expect_err("broken module");
    assert!(diag.message.contains("failed to compile"), "{}", diag.message);
    match loader.table().state("second") {
        Some(ModuleState::Failed(stored)) => {
            assert_eq!(stored.kind, DiagnosticKind::ModuleLoad);
            assert_eq!(stored.chunk.as_deref(), Some("second"));
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(
        loader.table().summary(),
        ModuleSummary {
            pending: 0,
            compiled: 2,
            failed: 1
        }
    );
    host.execute_source("test", "assert(package.preload['second'] == nil)")
        .expect("failed module never published");
}

#[test]
fn require_runs_module_body_once() {
    let _runtime = common::exclusive();
    let (host, _) = host();
    let loader = ModuleLoader::new(LoadPolicy::Eager);
    loader.register("counter", "loads = (loads or 0) + 1 return { id = {} }");
    loader.install(&host).expect("install");

    host.execute_source(
        "test",
        "local a = require('counter') local b = require('counter') assert(a == b) assert(loads == 1)",
    )
    .expect("cached module");
}

#[test]
fn lazy_policy_compiles_on_first_require() {
    let _runtime = common::exclusive();
    let (host, _) = host();
    let loader = ModuleLoader::new(LoadPolicy::Lazy);
    assert_eq!(loader.policy(), LoadPolicy::Lazy);
    three_modules(&loader);
    loader.install(&host).expect("install");
    assert!(matches!(loader.table().state("first"), Some(ModuleState::Registered(_))));
    assert_eq!(loader.table().summary().pending, 3);

    host.require("first").expect("lazy module loads");
    assert!(loader.table().state("first").is_some_and(ModuleState::is_compiled));
    assert!(matches!(loader.table().state("third"), Some(ModuleState::Registered(_))));

    assert!(host.require("second").is_err());
    assert!(loader.table().state("second").is_some_and(ModuleState::is_failed));
}

#[test]
fn modules_registered_after_install_are_found() {
    let _runtime = common::exclusive();
    let (host, _) = host();
    let loader = ModuleLoader::new(LoadPolicy::Lazy);
    loader.install(&host).expect("install");
    loader.register("late", "return 42");
    match host.evaluate("require('late')") {
        Evaluation::Values(values) => assert_eq!(values[0], "42"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_module_is_reported() {
    let _runtime = common::exclusive();
    let (host, _) = host();
    let loader = ModuleLoader::new(LoadPolicy::Eager);
    loader.install(&host).expect("install");
    let diag = host.require("nowhere").expect_err("missing module");
    assert!(diag.message.contains("module 'nowhere' not found"), "{}", diag.message);
}

#[test]
fn duplicate_names_keep_first_source() {
    let loader = ModuleLoader::new(LoadPolicy::Eager);
    assert!(loader.table().is_empty());
    assert!(loader.register("dup", "return 1"));
    assert!(!loader.register("dup", "return 2"));
    assert_eq!(loader.table().len(), 1);
}

#[test]
fn dotted_names_follow_paths() {
    assert_eq!(module_name(Path::new("main.lua")).as_deref(), Some("main"));
    assert_eq!(module_name(Path::new("ui/widgets.lua")).as_deref(), Some("ui.widgets"));
    assert_eq!(module_name(Path::new("ui/init.lua")).as_deref(), Some("ui"));
    assert_eq!(module_name(Path::new("notes.txt")), None);
}

#[test]
fn register_dir_adds_lua_files() {
    let _runtime = common::exclusive();
    let dir = tempdir().expect("temp dir");
    fs::create_dir_all(dir.path().join("net")).expect("mkdir");
    fs::write(dir.path().join("net/init.lua"), "return { kind = 'net' }").expect("write");
    fs::write(dir.path().join("net/mqtt.lua"), "return { kind = 'mqtt' }").expect("write");
    fs::write(dir.path().join("README.md"), "not a module").expect("write");

    let loader = ModuleLoader::new(LoadPolicy::Eager);
    assert_eq!(loader.register_dir(dir.path()).expect("register"), 2);
    let names: Vec<String> = loader.table().names().map(str::to_string).collect();
    assert_eq!(names, vec!["net", "net.mqtt"]);

    let (host, _) = host();
    loader.install(&host).expect("install");
    host.execute_source("test", "assert(require('net.mqtt').kind == 'mqtt')")
        .expect("directory module loads");
}

#[test]
fn register_dir_reports_missing_directory() {
    let dir = tempdir().expect("temp dir");
    let loader = ModuleLoader::new(LoadPolicy::Eager);
    let err = loader
        .register_dir(&dir.path().join("absent"))
        .expect_err("missing dir");
    assert_eq!(err.kind(), Some(DiagnosticKind::SourceUnavailable));
}

#[test]
fn embedded_modules_boot_the_dashboard() {
    let _runtime = common::exclusive();
    let capture = Capture::new();
    let config = HostConfig::default();
    let devices = Devices::simulated(&config.devices);
    let booted = firmware::boot(&config, ConsoleOut::new(capture.clone()), &devices)
        .expect("boot succeeds");

    assert_eq!(booted.modules.policy(), LoadPolicy::Eager);
    assert_eq!(booted.modules.table().len(), EMBEDDED_MODULES.len());
    let summary = booted.modules.table().summary();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.compiled, EMBEDDED_MODULES.len());
    assert!(capture.contents().contains("Moonshot dashboard ready"));
    match booted.host.evaluate("dashboard.frames") {
        Evaluation::Values(values) => assert_eq!(values[0], "1"),
        other => panic!("unexpected {other:?}"),
    }
    booted
        .host
        .execute_source("test", "assert(dashboard.run(2) == 3)")
        .expect("dashboard redraws");
}

#[test]
fn boot_survives_a_failing_entry() {
    let _runtime = common::exclusive();
    let mut config = HostConfig::default();
    config.boot.entry = Some("does.not.exist".to_string());
    config.boot.after_entry = Some("booted_after = true".to_string());
    let devices = Devices::simulated(&config.devices);
    let booted = firmware::boot(&config, ConsoleOut::new(Capture::new()), &devices)
        .expect("boot still succeeds");
    booted
        .host
        .execute_source("test", "assert(booted_after == true)")
        .expect("post-entry source ran");
}
