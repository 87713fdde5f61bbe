#![cfg_attr(not(test), no_std)]

//! Mailbox-level driver core for FlexCAN-style CAN/CAN FD controllers.
//!
//! The driver owns any number of controllers, each addressed through a
//! [`regs::CanRegisters`] handle, and translates between hardware mailbox
//! state and the [`callback::UpperLayer`] contract. Service entry points
//! exist in an interrupt shape (a signalled mailbox range) and a polling
//! shape (a full sweep); which one services a given controller is fixed by
//! its [`config::ControllerConfig`].

extern crate alloc;

pub mod callback;
pub mod can_error;
pub mod config;
pub mod exclusive;
pub mod message_buffer;
pub mod regs;
pub mod transfer;

pub(crate) mod bitset;
mod controller;
mod init;
mod interrupt;
mod mailbox;
mod receive;
mod util;

#[cfg(test)]
pub(crate) mod mocks;
#[cfg(test)]
mod tests;

pub use crate::util::Timebase;

use alloc::vec;
use alloc::vec::Vec;

use crate::bitset::MbBitSet;
use crate::callback::UpperLayer;
use crate::can_error::CanError;
use crate::config::{ControllerConfig, DriverConfig, MailboxRole, FIFO_REGION_MAILBOXES};
use crate::exclusive::ExclusiveArea;
use crate::regs::CanRegisters;

/// Lifecycle state of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Started,
    Sleep,
}

/// Mode transition requested through [`CanDriver::set_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    Start,
    Stop,
    Sleep,
    Wakeup,
}

/// Mutable per-controller bookkeeping, owned exclusively by the driver.
pub(crate) struct ControllerStatus {
    pub state: ControllerState,
    /// Interrupt disable nesting depth; masks are restored when it
    /// returns to zero.
    pub int_disable_depth: u8,
    pub baud_index: usize,
    /// Mailbox interrupts that should be enabled while the controller runs.
    pub imask_shadow: MbBitSet,
    /// One bit per mailbox a `write` is currently committing into.
    pub tx_guard: MbBitSet,
    /// Mailboxes with a deferred cancellation outstanding.
    pub pending_cancel: MbBitSet,
    /// Hardware mailbox index to the pending upper-layer transmit id.
    pub pending_tx: Vec<Option<u32>>,
    /// Hardware mailbox index to flattened mailbox descriptor index.
    pub mb_lookup: Vec<Option<usize>>,
    /// Low-power listening state; transmit requests are refused while set.
    pub low_power: bool,
    pub first_tx_mb: u8,
}

impl ControllerStatus {
    fn new(config: &ControllerConfig) -> Self {
        let count = config.mailbox_count as usize;
        Self {
            state: ControllerState::Stopped,
            int_disable_depth: 0,
            baud_index: config.default_baud_index,
            imask_shadow: MbBitSet::new(count),
            tx_guard: MbBitSet::new(count),
            pending_cancel: MbBitSet::new(count),
            pending_tx: vec![None; count],
            mb_lookup: vec![None; count],
            low_power: false,
            first_tx_mb: 0,
        }
    }

    pub fn interrupts_logically_enabled(&self) -> bool {
        self.int_disable_depth == 0
    }
}

pub(crate) struct ControllerUnit<R> {
    pub regs: R,
    pub status: ControllerStatus,
}

pub struct CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    pub(crate) cfg: DriverConfig,
    pub(crate) units: Vec<ControllerUnit<R>>,
    pub(crate) exclusive: X,
    pub(crate) timebase: T,
    pub(crate) upper: U,
}

impl<R, X, T, U> CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    /// Builds the driver and fully initializes every controller, leaving
    /// them stopped. `regs` supplies one register handle per configured
    /// controller, in controller-id order.
    pub fn new(
        config: DriverConfig,
        regs: Vec<R>,
        exclusive: X,
        timebase: T,
        upper: U,
    ) -> Result<Self, CanError> {
        validate_config(&config, regs.len())?;

        let units = regs
            .into_iter()
            .enumerate()
            .map(|(index, regs)| ControllerUnit {
                regs,
                status: ControllerStatus::new(&config.controllers[index]),
            })
            .collect();

        let mut driver = Self {
            cfg: config,
            units,
            exclusive,
            timebase,
            upper,
        };

        for controller in 0..driver.cfg.controllers.len() {
            driver.init_controller(controller as u8)?;
        }

        Ok(driver)
    }

    pub fn controller_state(&self, controller: u8) -> Result<ControllerState, CanError> {
        self.units
            .get(controller as usize)
            .map(|unit| unit.status.state)
            .ok_or(CanError::InvalidController)
    }

    pub(crate) fn check_controller(&self, controller: u8) -> Result<usize, CanError> {
        let index = controller as usize;
        if index < self.units.len() {
            Ok(index)
        } else {
            self.upper.on_dev_error(can_error::DevError::InvalidController);
            Err(CanError::InvalidController)
        }
    }
}

fn validate_config(config: &DriverConfig, reg_handles: usize) -> Result<(), CanError> {
    if config.controllers.is_empty() || config.controllers.len() != reg_handles {
        return Err(CanError::InvalidConfig);
    }

    let mut fifo_filters_needed = 0usize;
    for controller in config.controllers.iter() {
        if controller.mailbox_count == 0 || controller.mailbox_count > 64 {
            return Err(CanError::InvalidConfig);
        }
        if controller.baud_rates.is_empty()
            || controller.default_baud_index >= controller.baud_rates.len()
        {
            return Err(CanError::InvalidConfig);
        }
        if controller.tx_poll_slots == 0 {
            return Err(CanError::InvalidConfig);
        }
        if !controller.options.fd && controller.payload_size != config::PayloadSize::B8 {
            return Err(CanError::InvalidConfig);
        }
        if let Some(fifo) = controller.options.rx_fifo {
            if fifo.filter_count == 0
                || fifo.filter_count > 8
                || controller.mailbox_count <= FIFO_REGION_MAILBOXES
            {
                return Err(CanError::InvalidConfig);
            }
            fifo_filters_needed += fifo.filter_count as usize;
        }
        if matches!(
            controller.wait,
            config::WaitBudget::Ticks(0) | config::WaitBudget::Iterations(0)
        ) {
            return Err(CanError::InvalidConfig);
        }
    }

    if fifo_filters_needed != config.fifo_filters.len() {
        return Err(CanError::InvalidConfig);
    }

    for (index, mailbox) in config.mailboxes.iter().enumerate() {
        let controller = config
            .controllers
            .get(mailbox.controller as usize)
            .ok_or(CanError::InvalidConfig)?;

        if mailbox.mb_index >= controller.mailbox_count {
            return Err(CanError::InvalidConfig);
        }
        if controller.options.rx_fifo.is_some() && mailbox.mb_index < FIFO_REGION_MAILBOXES {
            return Err(CanError::InvalidConfig);
        }
        if mailbox.payload_len == 0
            || mailbox.payload_len as u32 > controller.payload_size.size_bytes()
        {
            return Err(CanError::InvalidConfig);
        }
        if let Some(mask_index) = mailbox.mask_index {
            if mask_index >= config.rx_masks.len() {
                return Err(CanError::InvalidConfig);
            }
        }

        for other in config.mailboxes.iter().skip(index + 1) {
            if other.controller == mailbox.controller && other.mb_index == mailbox.mb_index {
                return Err(CanError::InvalidConfig);
            }
            // Multiplexed transmit objects may not span controllers.
            if mailbox.role == MailboxRole::Transmit
                && other.role == MailboxRole::Transmit
                && other.handle == mailbox.handle
                && other.controller != mailbox.controller
            {
                return Err(CanError::InvalidConfig);
            }
        }
    }

    Ok(())
}
