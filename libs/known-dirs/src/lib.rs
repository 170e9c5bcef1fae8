//! Directory paths used to persist the QA simulator's PKI material.
//!
//! e.g. `/home/alice/.cache/rbmk/pki`

use std::path::PathBuf;

use anyhow::{Context as _, Result};

const NAMESPACE: &str = "rbmk";

/// Directory that caches the simulator's root CA key and certificate across runs.
///
/// The cache is keyed by process so re-running the test suite doesn't regenerate
/// (and thus doesn't have to re-trust) a new root CA every time.
pub fn qa_pki_cache_dir() -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .context("No cache directory known for this platform")?
        .join(NAMESPACE)
        .join("pki");

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dir_is_namespaced() {
        let dir = qa_pki_cache_dir().unwrap();

        assert!(dir.ends_with("rbmk/pki"));
    }
}
