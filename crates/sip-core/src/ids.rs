// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use rand::{distributions::Alphanumeric, Rng};
use smol_str::SmolStr;

/// RFC 3261 magic cookie every compliant branch starts with.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates a new magic-cookie branch identifier.
pub fn generate_branch_id() -> SmolStr {
    SmolStr::new(format!("{}{}", BRANCH_MAGIC_COOKIE, random_token(16)))
}

/// Generates a From/To tag.
pub fn generate_tag() -> SmolStr {
    SmolStr::new(random_token(10))
}

/// Generates a Call-ID scoped to `host`.
pub fn generate_call_id(host: &str) -> SmolStr {
    SmolStr::new(format!("{}@{}", random_token(20), host))
}
