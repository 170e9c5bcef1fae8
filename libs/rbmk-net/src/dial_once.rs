use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::NetworkError;

/// Prevents a second dial to the same target while the first is still in
/// flight.
///
/// Grounded in a real incident (see the spec's design notes, referencing
/// `avdox.globalvoices.org`): a hostile server's redirect chain can point back
/// at itself, and without this guard the HTTP client would dial it again from
/// inside the same logical request, recursing until the stack blows up. The
/// guard only needs to catch *overlapping* dials to the same key — a token is
/// held for the duration of one dial and released on drop, so a fresh dial to
/// the same target after the first one completes is always allowed.
#[derive(Clone, Default)]
pub struct DialOnceGuard {
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl DialOnceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self, key: impl Into<String>) -> Result<DialToken, NetworkError> {
        let key = key.into();
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());

        if !inflight.insert(key.clone()) {
            return Err(NetworkError::DuplicateDial);
        }

        Ok(DialToken {
            key,
            inflight: self.inflight.clone(),
        })
    }
}

/// Held for the duration of one dial; releases the key when dropped.
pub struct DialToken {
    key: String,
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for DialToken {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_overlapping_dial_is_rejected() {
        let guard = DialOnceGuard::new();

        let _first = guard.guard("dns.google:443").unwrap();
        let second = guard.guard("dns.google:443");

        assert!(matches!(second, Err(NetworkError::DuplicateDial)));
    }

    #[test]
    fn dial_is_allowed_again_after_release() {
        let guard = DialOnceGuard::new();

        {
            let _first = guard.guard("dns.google:443").unwrap();
        }

        assert!(guard.guard("dns.google:443").is_ok());
    }
}
