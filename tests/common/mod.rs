//! Common test utilities and fixtures for semfora-search integration tests
//!
//! This module provides:
//! - `TestRepo` builder for creating throwaway source trees
//! - Assertions over `EnhancedMatches`
//! - `require_rg!` / `require_git!` to skip tests when a tool is missing

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod assertions;
pub mod test_repo;

pub use assertions::*;
pub use test_repo::TestRepo;

/// Whether the real `rg` binary is on PATH
pub fn rg_available() -> bool {
    which::which("rg").is_ok()
}

pub fn git_available() -> bool {
    which::which("git").is_ok()
}

/// Skip the current test when `rg` is not installed
macro_rules! require_rg {
    () => {
        if !$crate::common::rg_available() {
            eprintln!("skipping: rg not found on PATH");
            return;
        }
    };
}

/// Skip the current test when `git` is not installed
macro_rules! require_git {
    () => {
        if !$crate::common::git_available() {
            eprintln!("skipping: git not found on PATH");
            return;
        }
    };
}
