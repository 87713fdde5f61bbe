//! Does all initialization oriented things
//!
//! A controller is initialized at driver construction and again on every
//! start request; the sequence always ends with the controller halted in
//! freeze mode so the state machine decides when it goes on bus.

use crate::callback::UpperLayer;
use crate::can_error::CanError;
use crate::config::BitTiming;
use crate::exclusive::ExclusiveArea;
use crate::regs::{self, cbt, ctrl1, ctrl2, fdcbt, fdctrl, mcr, CanRegisters};
use crate::util::{self, Timebase};
use crate::CanDriver;

impl<R, X, T, U> CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    /// Full (re)initialization: module enable, soft reset, static register
    /// programming and mailbox table rebuild. Leaves the controller frozen.
    pub(crate) fn init_controller(&mut self, controller: u8) -> Result<(), CanError> {
        let index = self.check_controller(controller)?;
        let wait = self.cfg.controllers[index].wait;

        {
            let regs = &self.units[index].regs;
            // The clock source may only change while the module is off.
            util::disable_module(regs, &self.timebase, wait)?;
            regs.set_bits(regs::CTRL1, ctrl1::CLKSRC);
            util::enable_module(regs, &self.timebase, wait)?;
            util::soft_reset(regs, &self.timebase, wait)?;
            // A soft reset lands in freeze mode; wait for the acknowledge
            // before touching freeze-protected registers.
            util::wait_until(&self.timebase, wait, || {
                regs.read_bits(regs::MCR, mcr::FRZACK)
            })?;
        }

        self.apply_static_config(index);
        self.rebuild_mailboxes(index);
        self.program_fifo_filters(index);

        // Mailbox interrupts stay off until the controller is started.
        let regs = &self.units[index].regs;
        regs.write(regs::IMASK1, 0);
        regs.write(regs::IMASK2, 0);
        regs.write(regs::IFLAG1, 0xFFFF_FFFF);
        regs.write(regs::IFLAG2, 0xFFFF_FFFF);

        log::debug!("controller {} initialized", controller);
        Ok(())
    }

    /// Register fields a soft reset clears: module options, bit timing and
    /// acceptance masks. Also used to repair state after the freeze-timeout
    /// reset fallback. The controller must be frozen.
    pub(crate) fn apply_static_config(&mut self, controller: usize) {
        let Self { cfg, units, .. } = self;
        let config = &cfg.controllers[controller];
        let regs = &units[controller].regs;

        // Disable loop back & listen only & timer sync
        regs.clear_bits(regs::CTRL1, ctrl1::LPB | ctrl1::LOM | ctrl1::TSYN);

        regs.modify(regs::MCR, |value| {
            let mut value = value & !(mcr::MAXMB_MASK | mcr::IDAM_MASK);
            value |= (config.mailbox_count as u32 - 1) & mcr::MAXMB_MASK;
            value |= mcr::SRXDIS | mcr::WRNEN;
            value &= !(mcr::SUPV | mcr::SLFWAK | mcr::WAKMSK | mcr::WAKSRC);

            if config.options.individual_masks {
                value |= mcr::IRMQ;
            } else {
                value &= !mcr::IRMQ;
            }
            if config.options.local_priority {
                value |= mcr::LPRIOEN;
            } else {
                value &= !mcr::LPRIOEN;
            }
            // The erratic-abort revisions never get the abort engine.
            if config.options.deferred_abort {
                value &= !mcr::AEN;
            } else {
                value |= mcr::AEN;
            }
            if config.options.rx_fifo.is_some() {
                value |= mcr::RFEN;
            } else {
                value &= !mcr::RFEN;
            }
            if config.options.fd {
                value |= mcr::FDEN;
            } else {
                value &= !mcr::FDEN;
            }
            value
        });

        if config.options.busoff_recovery {
            regs.set_bits(regs::CTRL1, ctrl1::BOFFREC);
        } else {
            regs.clear_bits(regs::CTRL1, ctrl1::BOFFREC);
        }

        regs.modify(regs::CTRL2, |value| {
            (value | ctrl2::RRS | (0x16 << ctrl2::TASD_SHIFT)) & !ctrl2::EACEN
        });

        // Reset acceptance masks to match-everything before the mailbox
        // rebuild narrows them again.
        for mb in 0..config.mailbox_count as u32 {
            regs.write(regs::RXIMR_BASE + mb * 4, 0x1FFF_FFFF);
        }
        regs.write(regs::RXMGMASK, 0);
        regs.write(regs::RX14MASK, 0);
        regs.write(regs::RX15MASK, 0);
        regs.write(regs::RXFGMASK, 0);

        self.program_timing(controller);
    }

    /// Writes the bit timing registers for the controller's current baud
    /// rate index. The controller must be frozen.
    pub(crate) fn program_timing(&mut self, controller: usize) {
        let Self { cfg, units, .. } = self;
        let config = &cfg.controllers[controller];
        let regs = &units[controller].regs;

        let baud_index = units[controller].status.baud_index;
        let baud = &config.baud_rates[baud_index];
        program_bit_timing(regs, &baud.nominal);

        if config.options.fd {
            let data_timing = baud.data.as_ref().unwrap_or(&baud.nominal);
            program_fd_timing(regs, data_timing);
            regs.write(
                regs::FDCTRL,
                fdctrl::FDRATE
                    | (config.payload_size.to_mbdsr() << fdctrl::MBDSR0_SHIFT),
            );
        }
    }
}

fn program_bit_timing<R: CanRegisters>(regs: &R, timing: &BitTiming) {
    let div = (timing.prescaler.max(1).min(1023) - 1) as u32;
    let prop_seg = (timing.prop_seg.max(1).min(63) - 1) as u32;
    let seg1 = (timing.phase_seg_1.max(1).min(31) - 1) as u32;
    let seg2 = (timing.phase_seg_2.max(1).min(31) - 1) as u32;
    let rjw = (timing.jump_width.max(1).min(31) - 1) as u32;

    regs.write(
        regs::CBT,
        cbt::BTF
            | (div << cbt::EPRESDIV_SHIFT)
            | (rjw << cbt::ERJW_SHIFT)
            | (prop_seg << cbt::EPROPSEG_SHIFT)
            | (seg1 << cbt::EPSEG1_SHIFT)
            | (seg2 << cbt::EPSEG2_SHIFT),
    );
}

fn program_fd_timing<R: CanRegisters>(regs: &R, timing: &BitTiming) {
    let div = (timing.prescaler.max(1).min(1023) - 1) as u32;
    let prop_seg = (timing.prop_seg.max(1).min(31) - 1) as u32;
    let seg1 = (timing.phase_seg_1.max(1).min(7) - 1) as u32;
    let seg2 = (timing.phase_seg_2.max(1).min(7) - 1) as u32;
    let rjw = (timing.jump_width.max(1).min(7) - 1) as u32;

    regs.write(
        regs::FDCBT,
        (div << fdcbt::FPRESDIV_SHIFT)
            | (rjw << fdcbt::FRJW_SHIFT)
            | (prop_seg << fdcbt::FPROPSEG_SHIFT)
            | (seg1 << fdcbt::FPSEG1_SHIFT)
            | (seg2 << fdcbt::FPSEG2_SHIFT),
    );
}
