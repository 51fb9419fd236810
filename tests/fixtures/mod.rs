//! Shared fixtures for integration tests
//!
//! - `hardware/`: an Arduino-style hardware root with the Arduino AVR core
//!   and the Cestino core, which borrows `arduino:avrdude`
//! - `preferences.txt`: global preferences selecting the Cestino board and
//!   the `arduino:arduinoasisp` programmer

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use burn_preflight::settings::PreflightSettings;

/// Path to the fixture hardware root
pub fn hardware_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/hardware")
}

/// Path to the fixture preferences file
pub fn preferences_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/preferences.txt")
}

/// Settings pointing at the fixture preferences and hardware
pub fn fixture_settings() -> PreflightSettings {
    PreflightSettings {
        preferences: Some(preferences_path()),
        hardware: vec![hardware_path()],
        ..PreflightSettings::default()
    }
}

pub fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Write an executable shell script standing in for the programmer.
#[cfg(unix)]
pub fn fake_programmer(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("avrdude");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Hardware root in `dir` whose `avrdude` tool runs `cmd_path`.
pub fn hardware_with_tool(dir: &Path, cmd_path: &Path) -> PathBuf {
    let root = dir.join("hardware");
    let avr = root.join("bench/avr");
    fs::create_dir_all(&avr).unwrap();
    fs::write(
        avr.join("platform.txt"),
        format!(
            "name=Bench\n\
             tools.avrdude.cmd.path={}\n\
             tools.avrdude.bootloader.params.verbose=-v\n\
             tools.avrdude.bootloader.params.quiet=-q\n\
             tools.avrdude.erase.params.verbose=-v\n\
             tools.avrdude.erase.params.quiet=-q\n\
             tools.avrdude.bootloader.pattern=\"{{cmd.path}}\" {{bootloader.verbose}} -p{{build.mcu}} -c{{protocol}} \"-Uflash:w:{{bootloader.file}}:i\" -Ulock:w:{{bootloader.lock_bits}}:m\n",
            cmd_path.display()
        ),
    )
    .unwrap();
    fs::write(avr.join("programmers.txt"), "usbasp.protocol=usbasp\n").unwrap();
    fs::write(
        avr.join("boards.txt"),
        "bench.bootloader.tool=avrdude\n\
         bench.bootloader.file=boot.hex\n\
         bench.bootloader.lock_bits=0x0F\n\
         bench.build.mcu=atmega328p\n",
    )
    .unwrap();
    root
}

/// Preferences in `dir` selecting the bench board from [`hardware_with_tool`].
pub fn bench_preferences(dir: &Path) -> PathBuf {
    let path = dir.join("preferences.txt");
    fs::write(
        &path,
        "target_package=bench\ntarget_platform=avr\nboard=bench\nprogrammer=usbasp\n",
    )
    .unwrap();
    path
}
