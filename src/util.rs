//! Kind of a misc for various CAN related things

use crate::can_error::CanError;
use crate::config::WaitBudget;
use crate::regs::{self, mcr, CanRegisters};

/// Tick source used only to bound the hardware wait loops.
pub trait Timebase {
    fn now(&self) -> u32;

    fn elapsed(&self, since: u32) -> u32 {
        self.now().wrapping_sub(since)
    }
}

/// One bounded busy-wait, tick- or iteration-based depending on the
/// controller's configured budget.
pub(crate) enum Deadline<'a, T: Timebase> {
    Ticks {
        timebase: &'a T,
        start: u32,
        budget: u32,
    },
    Iterations {
        remaining: u32,
    },
}

impl<'a, T: Timebase> Deadline<'a, T> {
    pub fn start(timebase: &'a T, budget: WaitBudget) -> Self {
        match budget {
            WaitBudget::Ticks(budget) => Deadline::Ticks {
                timebase,
                start: timebase.now(),
                budget,
            },
            WaitBudget::Iterations(remaining) => Deadline::Iterations { remaining },
        }
    }

    pub fn expired(&mut self) -> bool {
        match self {
            Deadline::Ticks {
                timebase,
                start,
                budget,
            } => timebase.elapsed(*start) >= *budget,
            Deadline::Iterations { remaining } => {
                if *remaining == 0 {
                    true
                } else {
                    *remaining -= 1;
                    false
                }
            }
        }
    }
}

pub(crate) fn wait_until<T, F>(timebase: &T, budget: WaitBudget, mut cond: F) -> Result<(), CanError>
where
    T: Timebase,
    F: FnMut() -> bool,
{
    let mut deadline = Deadline::start(timebase, budget);
    loop {
        if cond() {
            return Ok(());
        }
        if deadline.expired() {
            return Err(CanError::Timeout);
        }
    }
}

/// How freeze mode was reached: directly, or only after the soft-reset
/// fallback (in which case the caller must re-apply the register fields a
/// reset clears).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FreezeEntry {
    Normal,
    AfterReset,
}

pub(crate) fn enable_module<R, T>(regs: &R, timebase: &T, wait: WaitBudget) -> Result<(), CanError>
where
    R: CanRegisters,
    T: Timebase,
{
    regs.clear_bits(regs::MCR, mcr::MDIS);
    wait_until(timebase, wait, || !regs.read_bits(regs::MCR, mcr::LPMACK))
}

pub(crate) fn disable_module<R, T>(regs: &R, timebase: &T, wait: WaitBudget) -> Result<(), CanError>
where
    R: CanRegisters,
    T: Timebase,
{
    regs.set_bits(regs::MCR, mcr::MDIS);
    wait_until(timebase, wait, || regs.read_bits(regs::MCR, mcr::LPMACK))
}

pub(crate) fn soft_reset<R, T>(regs: &R, timebase: &T, wait: WaitBudget) -> Result<(), CanError>
where
    R: CanRegisters,
    T: Timebase,
{
    regs.set_bits(regs::MCR, mcr::SOFTRST);
    wait_until(timebase, wait, || !regs.read_bits(regs::MCR, mcr::SOFTRST))
}

/// Halts the controller. Falls back to a full soft reset when the freeze
/// acknowledge never arrives within the budget.
pub(crate) fn enter_freeze<R, T>(
    regs: &R,
    timebase: &T,
    wait: WaitBudget,
) -> Result<FreezeEntry, CanError>
where
    R: CanRegisters,
    T: Timebase,
{
    regs.set_bits(regs::MCR, mcr::FRZ | mcr::HALT);

    if wait_until(timebase, wait, || regs.read_bits(regs::MCR, mcr::FRZACK)).is_ok() {
        return Ok(FreezeEntry::Normal);
    }

    log::warn!("freeze acknowledge timed out, soft resetting");
    soft_reset(regs, timebase, wait)?;
    regs.set_bits(regs::MCR, mcr::FRZ | mcr::HALT);
    wait_until(timebase, wait, || regs.read_bits(regs::MCR, mcr::FRZACK))?;

    Ok(FreezeEntry::AfterReset)
}

pub(crate) fn exit_freeze<R, T>(regs: &R, timebase: &T, wait: WaitBudget) -> Result<(), CanError>
where
    R: CanRegisters,
    T: Timebase,
{
    regs.clear_bits(regs::MCR, mcr::FRZ | mcr::HALT);
    wait_until(timebase, wait, || !regs.read_bits(regs::MCR, mcr::FRZACK))
}

pub(crate) fn dlc_to_len(dlc: u32) -> u32 {
    match dlc {
        9 => 12,
        10 => 16,
        11 => 20,
        12 => 24,
        13 => 32,
        14 => 48,
        15 => 64,
        _ => dlc % 9,
    }
}

pub(crate) fn len_to_dlc(len: u32) -> u32 {
    if len <= 8 {
        len
    } else if len <= 12 {
        9
    } else if len <= 16 {
        10
    } else if len <= 20 {
        11
    } else if len <= 24 {
        12
    } else if len <= 32 {
        13
    } else if len <= 48 {
        14
    } else if len <= 64 {
        15
    } else {
        8
    }
}

/// Rounds a requested length up to the next frame size class.
pub(crate) fn round_to_size_class(len: u32) -> u32 {
    dlc_to_len(len_to_dlc(len))
}
