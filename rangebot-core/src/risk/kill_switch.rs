//! Process-wide kill switch. Disabled by default; when enabled every order
//! submission is denied, flatten included.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    enabled: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }

    pub fn set(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::warn!(enabled, "kill switch toggled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disabled() {
        assert!(!KillSwitch::new().is_enabled());
    }

    #[test]
    fn clones_share_state() {
        let a = KillSwitch::new();
        let b = a.clone();
        b.enable();
        assert!(a.is_enabled());
        a.disable();
        assert!(!b.is_enabled());
    }

    #[test]
    fn toggle_from_another_thread_is_visible() {
        let ks = KillSwitch::new();
        let remote = ks.clone();
        std::thread::spawn(move || remote.enable()).join().unwrap();
        assert!(ks.is_enabled());
    }
}
