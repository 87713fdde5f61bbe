//! Controller state machine and fault handling
//!
//! Legal transitions: Stopped -> Started (`Start`), Started -> Stopped
//! (`Stop`), Stopped -> Sleep (`Sleep`), Sleep -> Stopped (`Wakeup`).
//! Requesting the state a controller is already in succeeds without a
//! notification. Everything else is a caller error.

use crate::callback::UpperLayer;
use crate::can_error::{CanError, DevError};
use crate::config::MailboxRole;
use crate::exclusive::{ExclusiveArea, Region};
use crate::message_buffer::{mb_offset, write_cs_reg, CSField, CSRegisterBitfield};
use crate::message_buffer::CS_CODE_TX_INACTIVE;
use crate::regs::{self, ctrl1, esr1, mcr, CanRegisters};
use crate::util::{self, FreezeEntry, Timebase};
use crate::{mailbox, CanDriver, ControllerState, ModeRequest};

impl<R, X, T, U> CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    pub fn set_mode(&mut self, controller: u8, request: ModeRequest) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;
        let current = self.units[index].status.state;

        let target = match request {
            ModeRequest::Start => ControllerState::Started,
            ModeRequest::Stop => ControllerState::Stopped,
            ModeRequest::Sleep => ControllerState::Sleep,
            ModeRequest::Wakeup => ControllerState::Stopped,
        };
        if target == current {
            // Idempotent request; no duplicate notification.
            return Ok(());
        }

        match (current, request) {
            (ControllerState::Stopped, ModeRequest::Start) => self.start_controller(index),
            (ControllerState::Started, ModeRequest::Stop) => self.stop_controller(index, true),
            (ControllerState::Stopped, ModeRequest::Sleep) => self.enter_sleep(index),
            (ControllerState::Sleep, ModeRequest::Wakeup) => self.leave_sleep(index),
            _ => {
                self.upper.on_dev_error(DevError::InvalidTransition);
                Err(CanError::InvalidTransition)
            }
        }
    }

    /// Reprograms the timing registers from the controller's baud rate
    /// table. Only legal while stopped (the controller is frozen then).
    pub fn set_baud_rate(&mut self, controller: u8, baud_index: usize) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;

        if self.units[index].status.state != ControllerState::Stopped {
            self.upper.on_dev_error(DevError::InvalidTransition);
            return Err(CanError::NotStopped);
        }
        if baud_index >= self.cfg.controllers[index].baud_rates.len() {
            self.upper.on_dev_error(DevError::InvalidBaudIndex);
            return Err(CanError::InvalidBaudIndex);
        }

        self.units[index].status.baud_index = baud_index;
        self.program_timing(index);
        Ok(())
    }

    /// Counted interrupt disable. The first call clears the hardware mask
    /// registers; the shadow keeps what must come back.
    pub fn disable_interrupts(&mut self, controller: u8) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;
        let Self {
            units, exclusive, ..
        } = self;
        let unit = &mut units[index];

        let _region = exclusive.lock(Region::IntMask);
        if unit.status.int_disable_depth == 0 {
            unit.regs.write(regs::IMASK1, 0);
            unit.regs.write(regs::IMASK2, 0);
        }
        unit.status.int_disable_depth = unit.status.int_disable_depth.saturating_add(1);
        Ok(())
    }

    /// Counted interrupt enable; restores the mask shadow when the nesting
    /// depth returns to zero on a running controller.
    pub fn enable_interrupts(&mut self, controller: u8) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;
        let Self {
            units,
            exclusive,
            upper,
            ..
        } = self;
        let unit = &mut units[index];

        let _region = exclusive.lock(Region::IntMask);
        if unit.status.int_disable_depth == 0 {
            upper.on_dev_error(DevError::UnbalancedInterruptEnable);
            return Ok(());
        }
        unit.status.int_disable_depth -= 1;
        if unit.status.int_disable_depth == 0 && unit.status.state == ControllerState::Started {
            unit.regs.write(regs::IMASK1, unit.status.imask_shadow.word(0));
            unit.regs.write(regs::IMASK2, unit.status.imask_shadow.word(1));
        }
        Ok(())
    }

    fn start_controller(&mut self, index: usize) -> Result<(), CanError> {
        self.init_controller(index as u8)?;

        let wait = self.cfg.controllers[index].wait;
        {
            let regs = &self.units[index].regs;
            util::exit_freeze(regs, &self.timebase, wait)?;
            // Failure here leaves the logical state untouched.
            util::wait_until(&self.timebase, wait, || {
                !regs.read_bits(regs::MCR, mcr::NOTRDY)
            })?;
        }

        if self.units[index].status.interrupts_logically_enabled() {
            self.apply_imask_shadow(index);
        }

        self.units[index].status.state = ControllerState::Started;
        log::debug!("controller {} started", index);
        self.upper
            .on_controller_mode_changed(index as u8, ControllerState::Started);
        Ok(())
    }

    /// Halts the controller and cancels everything in flight. `notify` is
    /// false when the transition originates from a bus-off event, which is
    /// reported through its own channel.
    pub(crate) fn stop_controller(&mut self, index: usize, notify: bool) -> Result<(), CanError> {
        let wait = self.cfg.controllers[index].wait;

        let entry = {
            let regs = &self.units[index].regs;
            util::enter_freeze(regs, &self.timebase, wait)?
        };
        if entry == FreezeEntry::AfterReset {
            // The fallback reset wiped everything; rebuild before anything
            // touches the mailbox RAM again.
            self.apply_static_config(index);
            self.rebuild_mailboxes(index);
            self.program_fifo_filters(index);
        }

        self.cancel_all_tx(index);

        let Self {
            units, exclusive, ..
        } = self;
        let unit = &mut units[index];
        {
            let _region = exclusive.lock(Region::IntMask);
            unit.regs.write(regs::IMASK1, 0);
            unit.regs.write(regs::IMASK2, 0);
        }

        unit.status.state = ControllerState::Stopped;
        log::debug!("controller {} stopped", index);
        if notify {
            self.upper
                .on_controller_mode_changed(index as u8, ControllerState::Stopped);
        }
        Ok(())
    }

    fn enter_sleep(&mut self, index: usize) -> Result<(), CanError> {
        let Self {
            cfg, units, upper, ..
        } = self;
        let unit = &mut units[index];

        // No true hardware sleep on this family; arm self-wake when the
        // wakeup option asks for it and gate transmits via low_power.
        if cfg.controllers[index].options.wakeup {
            unit.regs
                .set_bits(regs::MCR, mcr::SLFWAK | mcr::WAKMSK | mcr::WAKSRC);
            unit.status.low_power = true;
        }

        unit.status.state = ControllerState::Sleep;
        upper.on_controller_mode_changed(index as u8, ControllerState::Sleep);
        Ok(())
    }

    fn leave_sleep(&mut self, index: usize) -> Result<(), CanError> {
        let Self { units, upper, .. } = self;
        let unit = &mut units[index];

        unit.regs
            .clear_bits(regs::MCR, mcr::SLFWAK | mcr::WAKMSK);
        unit.status.low_power = false;
        unit.status.state = ControllerState::Stopped;
        upper.on_controller_mode_changed(index as u8, ControllerState::Stopped);
        Ok(())
    }

    /// Bus-off check shared by the interrupt and polling shapes.
    pub(crate) fn check_bus_off(&mut self, index: usize) -> Result<(), CanError> {
        {
            let unit = &self.units[index];
            if !unit.regs.read_bits(regs::ESR1, esr1::BOFFINT) {
                return Ok(());
            }
            unit.regs.write(regs::ESR1, esr1::BOFFINT);

            if self.cfg.controllers[index].options.busoff_recovery {
                let _region = self.exclusive.lock(Region::Controller);
                unit.regs.set_bits(regs::CTRL1, ctrl1::BOFFREC);
                unit.regs.clear_bits(regs::CTRL1, ctrl1::BOFFREC);
            }
        }

        log::warn!("controller {} went bus off", index);
        if self.units[index].status.state == ControllerState::Started {
            self.stop_controller(index, false)?;
        }
        self.upper.on_bus_off(index as u8);
        Ok(())
    }

    /// Wake-up check shared by the interrupt and polling shapes.
    pub(crate) fn check_wakeup(&mut self, index: usize) -> Result<(), CanError> {
        {
            let unit = &self.units[index];
            if !unit.regs.read_bits(regs::ESR1, esr1::WAKINT) {
                return Ok(());
            }
            unit.regs.write(regs::ESR1, esr1::WAKINT);
        }

        if self.units[index].status.state == ControllerState::Sleep {
            self.leave_sleep(index)?;
        }
        Ok(())
    }

    /// Reconciles the hardware not-ready status with the recorded state,
    /// covering transitions the hardware performs on its own.
    pub(crate) fn check_mode_drift(&mut self, index: usize) {
        let not_ready = self.units[index]
            .regs
            .read_bits(regs::MCR, mcr::NOTRDY);

        match (self.units[index].status.state, not_ready) {
            (ControllerState::Started, true) => {
                log::warn!("controller {} left run mode on its own", index);
                self.units[index].status.state = ControllerState::Stopped;
                self.upper
                    .on_controller_mode_changed(index as u8, ControllerState::Stopped);
            }
            (ControllerState::Stopped, false) => {
                let wait = self.cfg.controllers[index].wait;
                let regs = &self.units[index].regs;
                // Bring the hardware back in line; no notification, the
                // recorded state was already correct.
                if util::enter_freeze(regs, &self.timebase, wait).is_err() {
                    log::warn!("controller {} refused to re-freeze", index);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn apply_imask_shadow(&mut self, index: usize) {
        let Self {
            units, exclusive, ..
        } = self;
        let unit = &mut units[index];

        let _region = exclusive.lock(Region::IntMask);
        if unit.status.int_disable_depth == 0 {
            unit.regs.write(regs::IMASK1, unit.status.imask_shadow.word(0));
            unit.regs.write(regs::IMASK2, unit.status.imask_shadow.word(1));
        }
    }

    /// Rewrites every pending transmit mailbox to the empty code and drops
    /// the associated bookkeeping. No confirmations are issued.
    fn cancel_all_tx(&mut self, index: usize) {
        let Self {
            cfg,
            units,
            exclusive,
            ..
        } = self;
        let unit = &mut units[index];
        let config = &cfg.controllers[index];

        for mb in 0..config.mailbox_count as usize {
            let desc = match unit.status.mb_lookup[mb] {
                Some(desc) => desc,
                None => continue,
            };
            if cfg.mailboxes[desc].role != MailboxRole::Transmit {
                continue;
            }

            let mut cs_reg = CSRegisterBitfield::new();
            cs_reg.write_field(CSField::CODE, CS_CODE_TX_INACTIVE);
            write_cs_reg(&unit.regs, mb_offset(config.payload_size, mb as u32), cs_reg);
            mailbox::clear_iflag(&unit.regs, mb);

            let _region = exclusive.lock(Region::TxGuard);
            unit.status.pending_tx[mb] = None;
            unit.status.pending_cancel.clear(mb);
        }
    }
}
