//! Critical section collaborator contract
//!
//! The driver shares the mailbox array and the per-controller bitmaps
//! between interrupt and task context. Every read-modify-write on that
//! state happens inside one of the named regions below. Providers must be
//! nesting-safe and callable from interrupt context.

/// Named exclusive regions the driver enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Guard and pending-cancel bitmaps plus the pending transmit ids.
    TxGuard,
    /// Interrupt mask shadow and disable nesting depth.
    IntMask,
    /// Controller state and bus-off recovery bit.
    Controller,
}

pub trait ExclusiveArea {
    fn enter(&self, region: Region);
    fn exit(&self, region: Region);

    fn lock(&self, region: Region) -> RegionGuard<'_, Self>
    where
        Self: Sized,
    {
        self.enter(region);
        RegionGuard { area: self, region }
    }
}

/// Exits its region on drop, so an early return can never leave a region
/// entered.
pub struct RegionGuard<'a, X: ExclusiveArea> {
    area: &'a X,
    region: Region,
}

impl<'a, X: ExclusiveArea> Drop for RegionGuard<'a, X> {
    fn drop(&mut self) {
        self.area.exit(self.region);
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::irq_masking::IrqMasking;

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod irq_masking {
    use super::{ExclusiveArea, Region};
    use core::cell::Cell;

    /// Masks interrupts for the duration of any region, counting nesting so
    /// the previous interrupt state is restored only by the outermost exit.
    pub struct IrqMasking {
        depth: Cell<u32>,
        was_enabled: Cell<bool>,
    }

    impl IrqMasking {
        pub const fn new() -> Self {
            Self {
                depth: Cell::new(0),
                was_enabled: Cell::new(false),
            }
        }
    }

    impl ExclusiveArea for IrqMasking {
        fn enter(&self, _region: Region) {
            let enabled = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            if self.depth.get() == 0 {
                self.was_enabled.set(enabled);
            }
            self.depth.set(self.depth.get() + 1);
        }

        fn exit(&self, _region: Region) {
            let depth = self.depth.get().saturating_sub(1);
            self.depth.set(depth);
            if depth == 0 && self.was_enabled.get() {
                unsafe { cortex_m::interrupt::enable() };
            }
        }
    }
}
