#![cfg(unix)]

mod utils;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use xplcrash_report::{ApplicationInfo, CrashReport};
use xplcrash_symbolicate::dsym::DebugArchive;
use xplcrash_symbolicate::{
    ArchiveSource, CachingSymbolizer, DsymSymbolizer, Symbolize, SymbolizeError,
    SymbolizerRegistry, ToolConfig, BUILD_PLACEHOLDER,
};

use crate::utils::{dwarfdump_script, fake_tool, populate_archive, DEVICE_UUID};

/// An atos stand-in that logs its arguments and resolves `addr` to
/// `sym_<addr> (in MyApp)`.
fn atos_script(log: &Path) -> String {
    format!(
        "echo \"$@\" >> \"{}\"\n\
         shift 6\n\
         for addr in \"$@\"; do\n\
         \techo \"sym_${{addr}} (in MyApp)\"\n\
         done\n",
        log.display()
    )
}

fn tool_config(tools_dir: &Path, atos_log: &Path) -> ToolConfig {
    ToolConfig {
        dwarfdump: fake_tool(tools_dir, "dwarfdump", &dwarfdump_script()),
        atos: fake_tool(tools_dir, "atos", &atos_script(atos_log)),
        unzip: PathBuf::from("/bin/sh"),
        timeout: Duration::from_secs(10),
    }
}

fn open_symbolizer(temp: &Path) -> (DsymSymbolizer, PathBuf) {
    let atos_log = temp.join("atos.log");
    let tools = tool_config(temp, &atos_log);
    let dwarf = populate_archive(&temp.join("MyApp-42.xcarchive"), "MyApp");
    let archive = DebugArchive::open(dwarf, &tools).unwrap();
    (DsymSymbolizer::new(archive, tools), atos_log)
}

fn device_uuid() -> Uuid {
    Uuid::parse_str(DEVICE_UUID).unwrap()
}

fn atos_invocations(log: &Path) -> Vec<String> {
    match fs::read_to_string(log) {
        Ok(content) => content.lines().map(str::to_owned).collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn test_resolves_in_order_and_strips_noise() {
    let temp = tempfile::tempdir().unwrap();
    let (symbolizer, _log) = open_symbolizer(temp.path());

    let symbols = symbolizer
        .symbolize(device_uuid(), 0x1000, &[0x1010, 0x1020, 0x1030])
        .unwrap();

    assert_eq!(symbols, vec!["sym_0x1010", "sym_0x1020", "sym_0x1030"]);
}

#[test]
fn test_batches_into_a_single_invocation() {
    let temp = tempfile::tempdir().unwrap();
    let (symbolizer, log) = open_symbolizer(temp.path());

    symbolizer
        .symbolize(device_uuid(), 0x1000, &[0x1010, 0x1020, 0x1030])
        .unwrap();

    let invocations = atos_invocations(&log);
    assert_eq!(invocations.len(), 1);
    assert!(invocations[0].contains("-arch arm64"));
    assert!(invocations[0].contains("-l 0x1000"));
    assert!(invocations[0].ends_with("0x1010 0x1020 0x1030"));
}

#[test]
fn test_unknown_image_uuid() {
    let temp = tempfile::tempdir().unwrap();
    let (symbolizer, log) = open_symbolizer(temp.path());

    let unknown = Uuid::from_u128(0xDEAD);
    let err = symbolizer
        .symbolize(unknown, 0x1000, &[0x1010])
        .unwrap_err();

    assert!(matches!(
        err,
        SymbolizeError::ImageArchitectureUnknown(uuid) if uuid == unknown
    ));
    assert!(atos_invocations(&log).is_empty());
}

#[test]
fn test_cache_avoids_repeated_invocations() {
    let temp = tempfile::tempdir().unwrap();
    let (symbolizer, log) = open_symbolizer(temp.path());
    let caching = CachingSymbolizer::new(symbolizer);

    let first = caching
        .symbolize(device_uuid(), 0x1000, &[0x1010, 0x1020])
        .unwrap();
    let second = caching
        .symbolize(device_uuid(), 0x1000, &[0x1010, 0x1020])
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(atos_invocations(&log).len(), 1);
}

#[test]
fn test_partially_cached_batch_delegates_only_missing() {
    let temp = tempfile::tempdir().unwrap();
    let (symbolizer, log) = open_symbolizer(temp.path());
    let caching = CachingSymbolizer::new(symbolizer);

    caching.symbolize(device_uuid(), 0x1000, &[0x1010]).unwrap();
    let symbols = caching
        .symbolize(device_uuid(), 0x1000, &[0x1010, 0x2020, 0x3030])
        .unwrap();

    assert_eq!(symbols, vec!["sym_0x1010", "sym_0x2020", "sym_0x3030"]);

    let invocations = atos_invocations(&log);
    assert_eq!(invocations.len(), 2);
    assert!(invocations[1].ends_with("0x2020 0x3030"));
}

#[test]
fn test_hanging_resolver_times_out() {
    let temp = tempfile::tempdir().unwrap();
    let atos_log = temp.path().join("atos.log");
    let mut tools = tool_config(temp.path(), &atos_log);
    let dwarf = populate_archive(&temp.path().join("MyApp-42.xcarchive"), "MyApp");
    let archive = DebugArchive::open(dwarf, &tools).unwrap();

    tools.atos = fake_tool(temp.path(), "atos-hang", "sleep 5\n");
    tools.timeout = Duration::from_millis(100);
    let symbolizer = DsymSymbolizer::new(archive, tools);

    let err = symbolizer
        .symbolize(device_uuid(), 0x1000, &[0x1010])
        .unwrap_err();
    assert!(matches!(err, SymbolizeError::ResolverOutputUnreadable(_)));
}

fn report_for_build(build: &str) -> CrashReport {
    CrashReport {
        application_info: Some(ApplicationInfo {
            identifier: Some("at.example.MyApp".to_owned()),
            version: Some(build.to_owned()),
            marketing_version: None,
        }),
        ..Default::default()
    }
}

#[test]
fn test_registry_shares_one_symbolizer_per_build() {
    let temp = tempfile::tempdir().unwrap();
    let atos_log = temp.path().join("atos.log");
    let tools = tool_config(temp.path(), &atos_log);

    for build in ["42", "43"] {
        fs::write(temp.path().join(format!("MyApp-{build}")), b"\xcf\xfa\xed\xfe").unwrap();
    }

    let registry = SymbolizerRegistry::new(
        ArchiveSource::Direct {
            path_pattern: temp
                .path()
                .join(format!("MyApp-{BUILD_PLACEHOLDER}"))
                .to_string_lossy()
                .into_owned(),
            placeholder: BUILD_PLACEHOLDER.to_owned(),
        },
        tools,
    );

    let first = registry.symbolizer_for(&report_for_build("42")).unwrap();
    let again = registry.symbolizer_for(&report_for_build("42")).unwrap();
    let other = registry.symbolizer_for(&report_for_build("43")).unwrap();

    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &other));
}
