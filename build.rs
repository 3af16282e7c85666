//! Purpose: Compile the libaria2 C++ shim for Rust FFI when the `libaria2` feature is on.
//! Role: Cargo build-script; configures `cc` inputs/includes, link flags and rebuild triggers.
//! Invariants: Without `libaria2` nothing is compiled or linked (RPC backend only).
//! Invariants: `ARIA2_DIR` (optional) is a libaria2 install prefix with `include/` and `lib/`.
//! Invariants: Uses only Cargo-provided env vars plus `ARIA2_DIR`.
use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=c/arialink_shim.cc");
    println!("cargo:rerun-if-changed=c/arialink_shim.h");
    println!("cargo:rerun-if-env-changed=ARIA2_DIR");

    if env::var_os("CARGO_FEATURE_LIBARIA2").is_none() {
        return;
    }

    let target = env::var("TARGET").unwrap_or_default();
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let shim_dir = manifest_dir.join("c");
    let prefix = env::var_os("ARIA2_DIR").map(PathBuf::from);

    let mut build = cc::Build::new();
    build
        .cpp(true)
        .include(&shim_dir)
        .file(shim_dir.join("arialink_shim.cc"));
    if let Some(prefix) = &prefix {
        build.include(prefix.join("include"));
        println!(
            "cargo:rustc-link-search=native={}",
            prefix.join("lib").display()
        );
    }
    configure_shim_compiler(&mut build, &target);

    build.compile("arialink_shim");

    println!("cargo:rustc-link-lib=aria2");
}

fn configure_shim_compiler(build: &mut cc::Build, target: &str) {
    if target.contains("windows-msvc") {
        build.flag_if_supported("/std:c++14").flag_if_supported("/EHsc");
    } else {
        build.flag_if_supported("-std=c++11");
    }
}
