//! Mailboxes
//!
//! The mailbox manager rebuilds the hardware mailbox table during
//! controller (re)initialization and owns the guard-bit bookkeeping the
//! transmit pipeline relies on.

use alloc::vec::Vec;

use crate::callback::UpperLayer;
use crate::config::{Id, MailboxRole, Processing, FIFO_REGION_MAILBOXES};
use crate::config::{FIFO_AVAILABLE_MB, FIFO_OVERFLOW_MB, FIFO_WARNING_MB};
use crate::exclusive::{ExclusiveArea, Region};
use crate::message_buffer::*;
use crate::regs::{self, CanRegisters};
use crate::util::Timebase;
use crate::CanDriver;

/// FIFO filter table element, format A: one full-width filter per word.
fn fifo_filter_element(id: Id, rtr: bool) -> u32 {
    let mut element = match id {
        Id::Standard(id) => (id & 0x7FF) << 19,
        Id::Extended(id) => ((id & 0x1FFF_FFFF) << 1) | (1 << 30),
    };
    if rtr {
        element |= 1 << 31;
    }
    element
}

fn fifo_filter_mask(id: Id, mask: u32) -> u32 {
    match id {
        Id::Standard(_) => (mask & 0x7FF) << 19,
        Id::Extended(_) => (mask & 0x1FFF_FFFF) << 1,
    }
}

impl<R, X, T, U> CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    /// Rebuilds the whole mailbox table of one controller: the hardware
    /// index to descriptor mapping, the interrupt mask shadow, the first
    /// transmit mailbox, and the per-mailbox register programming. The
    /// controller must be in freeze mode.
    pub(crate) fn rebuild_mailboxes(&mut self, controller: usize) {
        let Self { cfg, units, .. } = self;
        let unit = &mut units[controller];
        let config = &cfg.controllers[controller];

        unit.status.mb_lookup.iter_mut().for_each(|slot| *slot = None);
        unit.status.imask_shadow.clear_all();
        unit.status.tx_guard.clear_all();
        unit.status.pending_cancel.clear_all();
        unit.status.pending_tx.iter_mut().for_each(|slot| *slot = None);
        unit.status.first_tx_mb = config.mailbox_count;

        if config.options.rx_fifo.is_some() && config.rx_processing == Processing::Interrupt {
            unit.status.imask_shadow.set(FIFO_AVAILABLE_MB);
            unit.status.imask_shadow.set(FIFO_WARNING_MB);
            unit.status.imask_shadow.set(FIFO_OVERFLOW_MB);
        }

        for (desc_index, mailbox) in cfg.mailboxes.iter().enumerate() {
            if mailbox.controller as usize != controller {
                continue;
            }

            let mb = mailbox.mb_index as usize;
            unit.status.mb_lookup[mb] = Some(desc_index);

            let mb_offset = mb_offset(config.payload_size, mb as u32);
            let regs = &unit.regs;

            match mailbox.role {
                MailboxRole::Receive => {
                    if config.rx_processing == Processing::Interrupt {
                        unit.status.imask_shadow.set(mb);
                    }

                    clear_iflag(regs, mb);

                    let mut cs_reg = CSRegisterBitfield::new();
                    cs_reg.write_field(CSField::CODE, CS_CODE_RX_INACTIVE);
                    write_cs_reg(regs, mb_offset, cs_reg);
                    clear_message_buffer_data(regs, mb_offset, config.payload_size.size_bytes());

                    let mut id_reg = IDRegisterBitfield::new();
                    match mailbox.id {
                        Id::Standard(id) => id_reg.write_field(IDField::ID_STD, id),
                        Id::Extended(id) => id_reg.write_field(IDField::ID_EXT, id),
                    }
                    write_id_reg(regs, mb_offset, id_reg);

                    let mut cs_reg = CSRegisterBitfield::new();
                    cs_reg.write_field(CSField::CODE, CS_CODE_RX_EMPTY);
                    cs_reg.write_field(
                        CSField::IDE,
                        if mailbox.id.is_extended() { 0b1 } else { 0b0 },
                    );
                    write_cs_reg(regs, mb_offset, cs_reg);

                    let rximr = match mailbox.mask_index {
                        Some(index) if config.options.individual_masks => match mailbox.id {
                            Id::Standard(_) => (cfg.rx_masks[index] & 0x7FF) << 18,
                            Id::Extended(_) => cfg.rx_masks[index] & 0x1FFF_FFFF,
                        },
                        _ => 0x1FFF_FFFF,
                    };
                    regs.write(regs::RXIMR_BASE + (mb as u32) * 4, rximr);
                }
                MailboxRole::Transmit => {
                    if config.tx_processing == Processing::Interrupt {
                        unit.status.imask_shadow.set(mb);
                    }
                    if (mb as u8) < unit.status.first_tx_mb {
                        unit.status.first_tx_mb = mb as u8;
                    }

                    clear_iflag(regs, mb);

                    let mut cs_reg = CSRegisterBitfield::new();
                    cs_reg.write_field(CSField::CODE, CS_CODE_TX_INACTIVE);
                    write_cs_reg(regs, mb_offset, cs_reg);

                    write_id_reg(regs, mb_offset, IDRegisterBitfield::new());
                    clear_message_buffer_data(regs, mb_offset, config.payload_size.size_bytes());
                }
            }
        }
    }

    /// Programs the FIFO filter table from the flattened entry list. The
    /// controller must be in freeze mode with the FIFO enabled.
    pub(crate) fn program_fifo_filters(&mut self, controller: usize) {
        let Self { cfg, units, .. } = self;
        let config = &cfg.controllers[controller];
        let fifo = match config.options.rx_fifo {
            Some(fifo) => fifo,
            None => return,
        };

        // This controller's run within the flattened table.
        let start: usize = cfg.controllers[..controller]
            .iter()
            .filter_map(|c| c.options.rx_fifo)
            .map(|f| f.filter_count as usize)
            .sum();

        let regs = &units[controller].regs;
        for slot in 0..8u32 {
            let element = match cfg.fifo_filters.get(start + slot as usize) {
                Some(entry) if (slot as u8) < fifo.filter_count => {
                    fifo_filter_element(entry.id, false)
                }
                _ => 0,
            };
            regs.write(regs::FIFO_FILTER_BASE + slot * 4, element);

            let mask = match cfg.fifo_filters.get(start + slot as usize) {
                Some(entry) if (slot as u8) < fifo.filter_count => {
                    fifo_filter_mask(entry.id, entry.mask)
                }
                _ => 0xFFFF_FFFF,
            };
            regs.write(regs::RXIMR_BASE + slot * 4, mask);
        }
    }

    /// Resolves a transmit handle to its candidate mailboxes in descriptor
    /// order. More than one entry means multiplexed transmit.
    pub(crate) fn resolve_tx_mailboxes(&self, hth: u16) -> Vec<usize> {
        self.cfg
            .mailboxes
            .iter()
            .enumerate()
            .filter(|(_, mailbox)| {
                mailbox.role == MailboxRole::Transmit && mailbox.handle == hth
            })
            .map(|(index, _)| index)
            .collect()
    }

    /// Takes the mailbox guard bit if nobody holds it. The read-modify-write
    /// happens inside the TxGuard region so interrupt context can never
    /// observe a half-taken guard.
    pub(crate) fn guard_try_acquire(&mut self, controller: usize, mb: usize) -> bool {
        let Self {
            units, exclusive, ..
        } = self;
        let status = &mut units[controller].status;

        let _region = exclusive.lock(Region::TxGuard);
        if status.tx_guard.get(mb) {
            false
        } else {
            status.tx_guard.set(mb);
            true
        }
    }

    pub(crate) fn guard_release(&mut self, controller: usize, mb: usize) {
        let Self {
            units, exclusive, ..
        } = self;
        let status = &mut units[controller].status;

        let _region = exclusive.lock(Region::TxGuard);
        status.tx_guard.clear(mb);
    }

    /// Descriptor index for a hardware mailbox, if one is configured.
    pub(crate) fn desc_index(&self, controller: usize, mb: usize) -> Option<usize> {
        self.units[controller].status.mb_lookup.get(mb).copied().flatten()
    }
}

/// Interrupt flags are cleared by writing one to the flag position.
pub(crate) fn clear_iflag<R: CanRegisters>(regs: &R, mb: usize) {
    if mb < 32 {
        regs.write(regs::IFLAG1, 1 << mb);
    } else {
        regs.write(regs::IFLAG2, 1 << (mb - 32));
    }
}

pub(crate) fn read_iflag<R: CanRegisters>(regs: &R, mb: usize) -> bool {
    if mb < 32 {
        regs.read(regs::IFLAG1) & (1 << mb) != 0
    } else {
        regs.read(regs::IFLAG2) & (1 << (mb - 32)) != 0
    }
}

pub(crate) const FIFO_FRAME_MB: u32 = 0;

/// The FIFO engine claims the low mailbox region; frames are always read
/// from the slot-zero window.
pub(crate) fn fifo_claims(mb: usize) -> bool {
    mb < FIFO_REGION_MAILBOXES as usize
}
