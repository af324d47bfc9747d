#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// UUID of the device slice reported by the dwarfdump stand-in.
pub const DEVICE_UUID: &str = "C8374B6D-6E96-34D8-AE38-EFAA5FEC424F";

/// UUID of the simulator slice reported by the dwarfdump stand-in.
pub const SIMULATOR_UUID: &str = "1B4E42E1-6A21-3F9C-8E01-0A9E62D47C11";

/// Writes an executable shell script standing in for an external tool.
pub fn fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Script for a dwarfdump stand-in reporting the two expected slices.
pub fn dwarfdump_script() -> String {
    format!(
        "echo \"UUID: {DEVICE_UUID} (arm64) $2\"\n\
         echo \"UUID: {SIMULATOR_UUID} (x86_64) $2\"\n"
    )
}

/// Creates the dSYM layout inside an expanded archive directory and
/// returns the path of the DWARF binary:
/// `<archive>/dSYMs/<app>.app.dSYM/Contents/Resources/DWARF/<app>`.
pub fn populate_archive(archive_root: &Path, app: &str) -> PathBuf {
    let dwarf_dir = archive_root
        .join("dSYMs")
        .join(format!("{app}.app.dSYM"))
        .join("Contents")
        .join("Resources")
        .join("DWARF");
    fs::create_dir_all(&dwarf_dir).unwrap();
    let dwarf = dwarf_dir.join(app);
    fs::write(&dwarf, b"\xcf\xfa\xed\xfe").unwrap();
    dwarf
}
