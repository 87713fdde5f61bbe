//! Receive pipeline
//!
//! Individual mailbox scanning plus the hardware FIFO drain. Reading a
//! full mailbox's CS word locks it against the matching engine; the lock
//! is released by the free-running timer read after the payload copy.

use crate::callback::UpperLayer;
use crate::can_error::DevError;
use crate::config::{Id, MailboxRole, FIFO_AVAILABLE_MB, FIFO_OVERFLOW_MB, FIFO_WARNING_MB};
use crate::exclusive::ExclusiveArea;
use crate::mailbox::{self, FIFO_FRAME_MB};
use crate::message_buffer::*;
use crate::regs::{self, CanRegisters};
use crate::util::{dlc_to_len, Timebase};
use crate::CanDriver;

/// The hardware queue holds six frames; a couple of slack iterations cover
/// frames arriving mid-drain without risking an unbounded loop.
const FIFO_DRAIN_LIMIT: u32 = 8;

impl<R, X, T, U> CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    /// Receive side of the dispatcher for one individual mailbox.
    pub(crate) fn process_rx_mailbox(&mut self, controller: usize, mb: usize) {
        let desc = match self.desc_index(controller, mb) {
            Some(desc) => desc,
            None => return,
        };
        let mailbox_config = self.cfg.mailboxes[desc];
        if mailbox_config.role != MailboxRole::Receive {
            return;
        }

        let payload_size = self.cfg.controllers[controller].payload_size;
        let offset = mb_offset(payload_size, mb as u32);
        let regs = &self.units[controller].regs;

        if !mailbox::read_iflag(regs, mb) {
            return;
        }

        // This read locks the mailbox against the matching engine.
        let cs_reg = read_cs_reg(regs, offset);
        let code = cs_reg.read_field(CSField::CODE);

        if code & CS_CODE_RX_BUSY_BIT != 0 {
            // Move-in still in progress; pick it up on the next visit.
            return;
        }
        if code != CS_CODE_RX_FULL && code != CS_CODE_RX_OVERRUN {
            mailbox::clear_iflag(regs, mb);
            return;
        }

        let id_reg = read_id_reg(regs, offset);
        let extended = cs_reg.read_field(CSField::IDE) == 0b1;
        let id = if extended {
            Id::Extended(id_reg.read_field(IDField::ID_EXT))
        } else {
            Id::Standard(id_reg.read_field(IDField::ID_STD))
        };

        // Clamp against the configured capacity so a corrupted DLC can
        // never over-read the payload area.
        let len = dlc_to_len(cs_reg.read_field(CSField::DLC))
            .min(mailbox_config.payload_len as u32);
        let data = read_message_buffer(regs, offset, len);

        // Re-arm, release the internal lock, acknowledge.
        let mut empty = CSRegisterBitfield::new();
        empty.write_field(CSField::CODE, CS_CODE_RX_EMPTY);
        empty.write_field(CSField::IDE, if extended { 0b1 } else { 0b0 });
        write_cs_reg(regs, offset, empty);
        regs.read(regs::TIMER);
        mailbox::clear_iflag(regs, mb);

        if code == CS_CODE_RX_OVERRUN {
            log::warn!("rx mailbox {} overrun, frame(s) lost", mb);
            self.upper.on_dev_error(DevError::RxDataLost);
        }

        if cfg!(feature = "debuginfo") {
            log::info!(
                "Received {}-byte message w/ ID {:?} on MB #{}",
                len,
                id,
                mb
            );
        }

        let data = &data[..len as usize];
        if self.upper.on_rx_callout(mailbox_config.handle, id, data) {
            self.upper
                .on_rx_indication(mailbox_config.handle, controller as u8, id, data);
        }
    }

    pub(crate) fn process_fifo_overflow(&mut self, controller: usize) {
        let regs = &self.units[controller].regs;
        if !mailbox::read_iflag(regs, FIFO_OVERFLOW_MB) {
            return;
        }
        mailbox::clear_iflag(regs, FIFO_OVERFLOW_MB);
        log::warn!("controller {} rx fifo overflowed", controller);
        self.upper.on_rx_fifo_overflow(controller as u8);
    }

    pub(crate) fn process_fifo_warning(&mut self, controller: usize) {
        let regs = &self.units[controller].regs;
        if !mailbox::read_iflag(regs, FIFO_WARNING_MB) {
            return;
        }
        mailbox::clear_iflag(regs, FIFO_WARNING_MB);
        self.upper.on_rx_fifo_warning(controller as u8);
    }

    /// Drains queued FIFO frames. Acknowledging the frame-available flag
    /// pops the queue; the flag re-asserts while frames remain, so the
    /// loop runs until it stays clear or the iteration cap is reached.
    pub(crate) fn process_fifo_frames(&mut self, controller: usize) {
        let fifo = match self.cfg.controllers[controller].options.rx_fifo {
            Some(fifo) => fifo,
            None => return,
        };
        let payload_size = self.cfg.controllers[controller].payload_size;
        let offset = mb_offset(payload_size, FIFO_FRAME_MB);

        for _ in 0..FIFO_DRAIN_LIMIT {
            let regs = &self.units[controller].regs;
            if !mailbox::read_iflag(regs, FIFO_AVAILABLE_MB) {
                break;
            }

            let cs_reg = read_cs_reg(regs, offset);
            let id_reg = read_id_reg(regs, offset);
            let extended = cs_reg.read_field(CSField::IDE) == 0b1;
            let id = if extended {
                Id::Extended(id_reg.read_field(IDField::ID_EXT))
            } else {
                Id::Standard(id_reg.read_field(IDField::ID_STD))
            };
            // FIFO frames are classic CAN, eight bytes at most.
            let len = dlc_to_len(cs_reg.read_field(CSField::DLC)).min(8);
            let data = read_message_buffer(regs, offset, len);

            regs.read(regs::TIMER);
            mailbox::clear_iflag(regs, FIFO_AVAILABLE_MB);

            let data = &data[..len as usize];
            if self.upper.on_rx_callout(fifo.handle, id, data) {
                self.upper
                    .on_rx_indication(fifo.handle, controller as u8, id, data);
            }
        }
    }
}
