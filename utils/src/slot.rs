//! Exclusive ownership of physical devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::DeviceError;

/// A device that at most one channel may hold at a time.
#[derive(Debug, Clone)]
pub struct DeviceSlot {
    name: &'static str,
    held: Arc<AtomicBool>,
}

/// Releases its slot when dropped.
#[derive(Debug)]
pub struct DeviceGuard {
    slot: DeviceSlot,
}

impl DeviceSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn acquire(&self) -> Result<DeviceGuard, DeviceError> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DeviceError::Busy(self.name))?;
        tracing::debug!("{} acquired", self.name);
        Ok(DeviceGuard { slot: self.clone() })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.slot.held.store(false, Ordering::Release);
        tracing::debug!("{} released", self.slot.name);
    }
}

/// Process-wide microphone slot.
pub fn microphone() -> DeviceSlot {
    static SLOT: OnceLock<DeviceSlot> = OnceLock::new();
    SLOT.get_or_init(|| DeviceSlot::new("microphone")).clone()
}

/// Process-wide camera slot.
pub fn camera() -> DeviceSlot {
    static SLOT: OnceLock<DeviceSlot> = OnceLock::new();
    SLOT.get_or_init(|| DeviceSlot::new("camera")).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquirer_is_rejected_until_release() {
        let slot = DeviceSlot::new("microphone");
        let guard = slot.acquire().unwrap();
        assert!(matches!(slot.acquire(), Err(DeviceError::Busy("microphone"))));
        drop(guard);
        assert!(!slot.is_held());
        assert!(slot.acquire().is_ok());
    }

    #[test]
    fn global_slots_are_shared() {
        assert_eq!(camera().name(), "camera");
        let guard = camera().acquire().unwrap();
        assert!(camera().is_held());
        drop(guard);
        assert!(!camera().is_held());
    }
}
