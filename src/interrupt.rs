//! Service dispatcher
//!
//! Two invocation shapes converge on the same per-mailbox routines: the
//! interrupt shape takes the mailbox range the hardware signalled, the
//! polling shape sweeps everything configured for polling. Whether a
//! controller's event class is interrupt-driven or polled is fixed by its
//! configuration, so a mailbox is never serviced by both shapes.

use crate::callback::UpperLayer;
use crate::can_error::CanError;
use crate::config::{MailboxRole, Processing};
use crate::config::{FIFO_AVAILABLE_MB, FIFO_OVERFLOW_MB, FIFO_WARNING_MB};
use crate::exclusive::ExclusiveArea;
use crate::mailbox;
use crate::regs::CanRegisters;
use crate::util::Timebase;
use crate::CanDriver;

impl<R, X, T, U> CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    /// Interrupt shape: services the contiguous mailbox range the hardware
    /// signalled. Call from the controller's mailbox interrupt handler.
    pub fn mailbox_isr(
        &mut self,
        controller: u8,
        first_mb: u8,
        last_mb: u8,
    ) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;
        let count = self.cfg.controllers[index].mailbox_count;

        for mb in first_mb..=last_mb.min(count.saturating_sub(1)) {
            self.service_mailbox(index, mb as usize, true);
        }
        Ok(())
    }

    /// Interrupt shape of the bus-off handler.
    pub fn busoff_isr(&mut self, controller: u8) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;
        self.check_bus_off(index)
    }

    /// Interrupt shape of the wake-up handler.
    pub fn wakeup_isr(&mut self, controller: u8) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;
        self.check_wakeup(index)
    }

    /// Polling shape: sweeps every receive mailbox (and FIFO) of every
    /// controller configured for polled receive.
    pub fn poll_receive(&mut self) {
        for index in 0..self.units.len() {
            if self.cfg.controllers[index].rx_processing != Processing::Polling {
                continue;
            }

            if self.cfg.controllers[index].options.rx_fifo.is_some() {
                self.process_fifo_overflow(index);
                self.process_fifo_warning(index);
                self.process_fifo_frames(index);
            }

            let count = self.cfg.controllers[index].mailbox_count as usize;
            for mb in 0..count {
                if self.rx_mailbox_at(index, mb) {
                    self.process_rx_mailbox(index, mb);
                }
            }
        }
    }

    /// Polling shape for transmit completions. The sweep may be spread
    /// over several periodic call slots; with `tx_poll_slots == 1` every
    /// slot value sweeps all transmit mailboxes.
    pub fn poll_transmit(&mut self, slot: u8) {
        for index in 0..self.units.len() {
            if self.cfg.controllers[index].tx_processing != Processing::Polling {
                continue;
            }

            let slots = self.cfg.controllers[index].tx_poll_slots;
            let first_tx = self.units[index].status.first_tx_mb;
            let count = self.cfg.controllers[index].mailbox_count as usize;

            for mb in 0..count {
                if !self.tx_mailbox_at(index, mb) {
                    continue;
                }
                if (mb as u8).wrapping_sub(first_tx) % slots != slot % slots {
                    continue;
                }
                self.process_tx_mailbox(index, mb);
            }
        }
    }

    /// Polling shape of the bus-off handler.
    pub fn poll_busoff(&mut self) {
        for index in 0..self.units.len() {
            if self.cfg.controllers[index].busoff_processing != Processing::Polling {
                continue;
            }
            if let Err(err) = self.check_bus_off(index) {
                log::warn!("bus-off recovery on controller {} failed: {:?}", index, err);
            }
        }
    }

    /// Polling shape of the wake-up handler.
    pub fn poll_wakeup(&mut self) {
        for index in 0..self.units.len() {
            let config = &self.cfg.controllers[index];
            if config.wakeup_processing != Processing::Polling || !config.options.wakeup {
                continue;
            }
            if let Err(err) = self.check_wakeup(index) {
                log::warn!("wake-up handling on controller {} failed: {:?}", index, err);
            }
        }
    }

    /// Reconciles recorded controller modes with hardware status; covers
    /// transitions the hardware made on its own.
    pub fn poll_mode(&mut self) {
        for index in 0..self.units.len() {
            self.check_mode_drift(index);
        }
    }

    fn service_mailbox(&mut self, index: usize, mb: usize, via_interrupt: bool) {
        let config = &self.cfg.controllers[index];
        let rx_matches =
            (config.rx_processing == Processing::Interrupt) == via_interrupt;
        let tx_matches =
            (config.tx_processing == Processing::Interrupt) == via_interrupt;
        let fifo = config.options.rx_fifo.is_some();

        if fifo && mailbox::fifo_claims(mb) {
            if !rx_matches {
                return;
            }
            match mb {
                FIFO_OVERFLOW_MB => self.process_fifo_overflow(index),
                FIFO_WARNING_MB => self.process_fifo_warning(index),
                FIFO_AVAILABLE_MB => self.process_fifo_frames(index),
                _ => {}
            }
            return;
        }

        match self.desc_index(index, mb).map(|desc| self.cfg.mailboxes[desc].role) {
            Some(MailboxRole::Receive) if rx_matches => self.process_rx_mailbox(index, mb),
            Some(MailboxRole::Transmit) if tx_matches => self.process_tx_mailbox(index, mb),
            _ => {}
        }
    }

    fn rx_mailbox_at(&self, index: usize, mb: usize) -> bool {
        if self.cfg.controllers[index].options.rx_fifo.is_some() && mailbox::fifo_claims(mb) {
            return false;
        }
        matches!(
            self.desc_index(index, mb)
                .map(|desc| self.cfg.mailboxes[desc].role),
            Some(MailboxRole::Receive)
        )
    }

    fn tx_mailbox_at(&self, index: usize, mb: usize) -> bool {
        matches!(
            self.desc_index(index, mb)
                .map(|desc| self.cfg.mailboxes[desc].role),
            Some(MailboxRole::Transmit)
        )
    }
}
