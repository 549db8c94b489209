// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host fingerprint reported at registration.

use sloth_core::SystemInfo;
use sysinfo::System;

/// Gather the OS/arch/cpu/memory fingerprint.
///
/// Probed through `sysinfo`; anything the platform cannot answer falls
/// back to compile-time constants rather than failing registration.
pub fn fingerprint() -> SystemInfo {
    let sys = System::new_all();

    let arch = System::cpu_arch();
    let cpus = match sys.cpus().len() {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };

    SystemInfo {
        os: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        arch: if arch.is_empty() {
            std::env::consts::ARCH.to_string()
        } else {
            arch
        },
        cpus: cpus as u32,
        memory_mb: sys.total_memory() / (1024 * 1024),
    }
}

#[cfg(test)]
#[path = "sysinfo_tests.rs"]
mod tests;
