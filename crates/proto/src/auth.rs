// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared-token authentication.
//!
//! Connections never carry the token itself; both sides exchange the
//! SHA-256 digest of the token they hold and compare in constant time.
//! Transport encryption is a deployment concern (loopback or a private
//! network segment).

use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of the shared token.
pub fn auth_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{:x}", digest)
}

/// Constant-time digest comparison.
pub fn digest_matches(expected: &str, presented: &str) -> bool {
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .bytes()
        .zip(presented.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
