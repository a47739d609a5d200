//! Build Script for Health/Echo Server
//!
//! Compiles every `.proto` file under `packages/proto` into client and server
//! stubs. `buf build` produces the descriptor set; the encoded bytes stay in
//! `OUT_DIR` and are embedded for the reflection service.
//!
//! # Panics Policy
//!
//! Build scripts use `.expect()` and panic on failure: there is no caller to
//! propagate errors to, and the build must halt when prerequisites are missing.
#![allow(clippy::expect_used)]

use prost::Message;
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
};

const DESCRIPTOR_FILE: &str = "health_echo_descriptor.pb";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    emit_coverage_cfg();

    let proto_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../packages/proto");
    println!(
        "cargo:rerun-if-changed={}",
        proto_root.join("buf.yaml").display()
    );
    for proto in proto_sources(&proto_root) {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let descriptor = buf_descriptor_set(&proto_root, &out_dir.join(DESCRIPTOR_FILE));

    tonic_prost_build::configure()
        .build_client(true) // integration tests drive the server through clients
        .build_server(true)
        .compile_fds(descriptor)
        .expect("Failed to generate gRPC stubs from descriptor set");
}

/// Emit `cfg(coverage)` when built under an instrumenting coverage tool.
fn emit_coverage_cfg() {
    let instrumented = env::var_os("CARGO_LLVM_COV").is_some()
        || env::var_os("LLVM_PROFILE_FILE").is_some()
        || env::var("RUSTFLAGS").is_ok_and(|flags| flags.contains("instrument-coverage"));
    if instrumented {
        println!("cargo:rustc-cfg=coverage");
    }
}

/// All `.proto` files below `dir`, depth first.
fn proto_sources(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let entries = fs::read_dir(dir).expect("Failed to list proto directory");
    for entry in entries {
        let path = entry.expect("Failed to read proto directory entry").path();
        if path.is_dir() {
            found.extend(proto_sources(&path));
        } else if path.extension().is_some_and(|ext| ext == "proto") {
            found.push(path);
        }
    }
    found
}

/// Run `buf build` in `module` and decode the descriptor set it writes.
fn buf_descriptor_set(module: &Path, output: &Path) -> prost_types::FileDescriptorSet {
    let status = Command::new("buf")
        .args(["build", "--output"])
        .arg(output)
        .current_dir(module)
        .status()
        .expect("Failed to run buf; install it from https://buf.build and add it to PATH");
    assert!(status.success(), "buf build failed for {}", module.display());

    let bytes = fs::read(output).expect("Failed to read descriptor set written by buf");
    prost_types::FileDescriptorSet::decode(bytes.as_slice())
        .expect("buf wrote an invalid descriptor set")
}
