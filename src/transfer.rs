//! Transmit pipeline
//!
//! A write either fully commits a frame into a mailbox or commits
//! nothing. The hardware CS code is the source of truth for "this mailbox
//! is free"; the guard bit only covers the window between that check and
//! the committing CS write.

use crate::callback::UpperLayer;
use crate::can_error::{CanError, DevError, TxError};
use crate::config::Id;
use crate::exclusive::{ExclusiveArea, Region};
use crate::mailbox;
use crate::message_buffer::*;
use crate::util::{len_to_dlc, round_to_size_class, Timebase};
use crate::CanDriver;
use crate::regs::CanRegisters;

#[derive(Debug, Clone)]
pub struct TxFrame<'a> {
    pub id: Id,
    /// Upper-layer transmit id echoed back in the confirmation.
    pub pdu_id: u32,
    /// Payload, or None to bind it late through the trigger-transmit
    /// callback (mailboxes configured for it only).
    pub data: Option<&'a [u8]>,
    /// Payload length when `data` is None.
    pub len: u8,
    pub fd: bool,
}

impl<'a> TxFrame<'a> {
    fn payload_len(&self) -> u32 {
        match self.data {
            Some(data) => data.len() as u32,
            None => self.len as u32,
        }
    }
}

impl<R, X, T, U> CanDriver<R, X, T, U>
where
    R: CanRegisters,
    X: ExclusiveArea,
    T: Timebase,
    U: UpperLayer,
{
    /// Commits `frame` to the first free mailbox resolved from `hth`.
    ///
    /// `Busy` means every candidate mailbox is occupied, a concurrent
    /// write holds the guard, or the controller is in its low-power
    /// listening state; the caller retries. A pending frame is never
    /// evicted, whatever its priority.
    pub fn write(&mut self, hth: u16, frame: &TxFrame) -> Result<(), TxError> {
        let candidates = self.resolve_tx_mailboxes(hth);
        let first = match candidates.first() {
            Some(&desc) => self.cfg.mailboxes[desc],
            None => {
                self.upper.on_dev_error(DevError::InvalidHandle);
                return Err(TxError::InvalidHandle);
            }
        };

        let controller = first.controller as usize;
        let config = &self.cfg.controllers[controller];
        let payload_size = config.payload_size;
        let fd_controller = config.options.fd;

        let requested = frame.payload_len();
        let committed_len = if frame.fd {
            round_to_size_class(requested)
        } else {
            requested
        };
        let valid = if frame.fd {
            fd_controller && committed_len <= first.payload_len as u32
        } else {
            requested <= 8 && requested <= first.payload_len as u32
        };
        if !valid || (frame.data.is_none() && !first.trigger_transmit) {
            self.upper.on_dev_error(DevError::InvalidFrame);
            return Err(TxError::InvalidFrame);
        }

        if self.units[controller].status.low_power {
            return Err(TxError::Busy);
        }

        for &desc in candidates.iter() {
            let mb = self.cfg.mailboxes[desc].mb_index as usize;
            let offset = mb_offset(payload_size, mb as u32);

            let regs = &self.units[controller].regs;
            let code = read_cs_reg(regs, offset).read_field(CSField::CODE);
            if code != CS_CODE_TX_INACTIVE || mailbox::read_iflag(regs, mb) {
                // Occupied by a pending frame, or completed but not yet
                // confirmed by the dispatcher; try the next multiplexed
                // candidate.
                continue;
            }

            if !self.guard_try_acquire(controller, mb) {
                return Err(TxError::Busy);
            }

            let result = self.commit_frame(controller, desc, committed_len, frame);
            self.guard_release(controller, mb);
            return result;
        }

        Err(TxError::Busy)
    }

    /// Requests cancellation of whatever `hth` has pending. Advisory: a
    /// frame that completes concurrently is still confirmed. Nothing is
    /// notified for a successful abort.
    pub fn abort(&mut self, hth: u16) -> Result<(), CanError> {
        let candidates = self.resolve_tx_mailboxes(hth);
        if candidates.is_empty() {
            self.upper.on_dev_error(DevError::InvalidHandle);
            return Err(CanError::InvalidHandle);
        }

        for &desc in candidates.iter() {
            let mailbox_config = self.cfg.mailboxes[desc];
            let controller = mailbox_config.controller as usize;
            let config = &self.cfg.controllers[controller];
            let mb = mailbox_config.mb_index as usize;
            let offset = mb_offset(config.payload_size, mb as u32);

            if config.options.deferred_abort {
                // Erratic abort engine on this revision: mark the mailbox
                // and let the next dispatcher visit finish the job.
                let Self {
                    units, exclusive, ..
                } = self;
                let status = &mut units[controller].status;
                let _region = exclusive.lock(Region::TxGuard);
                if status.pending_tx[mb].is_some() {
                    status.pending_cancel.set(mb);
                }
            } else {
                let regs = &self.units[controller].regs;
                let mut cs_reg = read_cs_reg(regs, offset);
                if cs_reg.read_field(CSField::CODE) == CS_CODE_TX_DATA_OR_REMOTE {
                    cs_reg.write_field(CSField::CODE, CS_CODE_TX_ABORT);
                    write_cs_reg(regs, offset, cs_reg);
                }
            }
        }

        Ok(())
    }

    fn commit_frame(
        &mut self,
        controller: usize,
        desc: usize,
        committed_len: u32,
        frame: &TxFrame,
    ) -> Result<(), TxError> {
        let Self {
            cfg,
            units,
            exclusive,
            upper,
            ..
        } = self;
        let mailbox_config = cfg.mailboxes[desc];
        let config = &cfg.controllers[controller];
        let unit = &mut units[controller];
        let mb = mailbox_config.mb_index as usize;
        let offset = mb_offset(config.payload_size, mb as u32);
        let regs = &unit.regs;

        mailbox::clear_iflag(regs, mb);

        // Keep the mailbox inactive while its fields are assembled.
        let mut cs_reg = CSRegisterBitfield::new();
        cs_reg.write_field(CSField::CODE, CS_CODE_TX_INACTIVE);
        write_cs_reg(regs, offset, cs_reg);

        let mut id_reg = IDRegisterBitfield::new();
        match frame.id {
            Id::Standard(id) => id_reg.write_field(IDField::ID_STD, id),
            Id::Extended(id) => id_reg.write_field(IDField::ID_EXT, id),
        }
        if config.options.local_priority {
            id_reg.write_field(IDField::PRIO, mailbox_config.local_priority as u32);
        }
        write_id_reg(regs, offset, id_reg);

        let final_len = match frame.data {
            Some(data) => {
                if committed_len > data.len() as u32 {
                    // Size-class round-up: pad the tail with zeroes.
                    clear_message_buffer_data(regs, offset, committed_len);
                }
                write_message_buffer(regs, offset, data);
                committed_len
            }
            None => {
                let mut buf = [0u8; 64];
                let capacity = mailbox_config.payload_len as usize;
                match upper.on_trigger_transmit(frame.pdu_id, &mut buf[..capacity]) {
                    Some(len) if len <= capacity && (frame.fd || len <= 8) => {
                        let committed = if frame.fd {
                            round_to_size_class(len as u32)
                        } else {
                            len as u32
                        };
                        if committed > len as u32 {
                            clear_message_buffer_data(regs, offset, committed);
                        }
                        write_message_buffer(regs, offset, &buf[..len]);
                        committed
                    }
                    _ => {
                        upper.on_dev_error(DevError::InvalidFrame);
                        return Err(TxError::InvalidFrame);
                    }
                }
            }
        };

        // Record the pending id before the commit; the completion handler
        // reads it under the same region.
        {
            let _region = exclusive.lock(Region::TxGuard);
            unit.status.pending_tx[mb] = Some(frame.pdu_id);
        }

        let mut cs_reg = CSRegisterBitfield::new();
        cs_reg.write_field(CSField::CODE, CS_CODE_TX_DATA_OR_REMOTE);
        if frame.id.is_extended() {
            cs_reg.write_field(CSField::SSR, 0b1);
            cs_reg.write_field(CSField::IDE, 0b1);
        }
        if frame.fd {
            cs_reg.write_field(CSField::EDL, 0b1);
            cs_reg.write_field(CSField::BRS, 0b1);
        }
        cs_reg.write_field(CSField::DLC, len_to_dlc(final_len));
        write_cs_reg(regs, offset, cs_reg);

        if cfg!(feature = "debuginfo") {
            log::info!(
                "Queued {}-byte frame on MB #{} (pdu {})",
                final_len,
                mb,
                frame.pdu_id
            );
        }

        Ok(())
    }

    /// Transmit side of the dispatcher: completions, abort acknowledges
    /// and deferred cancellations for one mailbox.
    pub(crate) fn process_tx_mailbox(&mut self, controller: usize, mb: usize) {
        let payload_size = self.cfg.controllers[controller].payload_size;
        let offset = mb_offset(payload_size, mb as u32);

        let flagged = mailbox::read_iflag(&self.units[controller].regs, mb);

        // Deferred cancellations make progress on every visit, flag or not.
        if self.units[controller].status.pending_cancel.get(mb) {
            let code = read_cs_reg(&self.units[controller].regs, offset)
                .read_field(CSField::CODE);

            let Self {
                units, exclusive, ..
            } = self;
            let unit = &mut units[controller];

            if code == CS_CODE_TX_DATA_OR_REMOTE && !flagged {
                // Not on the wire yet: silently pull it back.
                let mut cs_reg = CSRegisterBitfield::new();
                cs_reg.write_field(CSField::CODE, CS_CODE_TX_INACTIVE);
                write_cs_reg(&unit.regs, offset, cs_reg);
                mailbox::clear_iflag(&unit.regs, mb);

                let _region = exclusive.lock(Region::TxGuard);
                unit.status.pending_tx[mb] = None;
                unit.status.pending_cancel.clear(mb);
                return;
            }

            // Completed concurrently with the cancel request; the frame is
            // confirmed like any other.
            let _region = exclusive.lock(Region::TxGuard);
            unit.status.pending_cancel.clear(mb);
        }

        if !flagged {
            return;
        }

        let code = read_cs_reg(&self.units[controller].regs, offset)
            .read_field(CSField::CODE);
        match code {
            CS_CODE_TX_INACTIVE => {
                // Transmission finished.
                mailbox::clear_iflag(&self.units[controller].regs, mb);
                let pending = {
                    let Self {
                        units, exclusive, ..
                    } = self;
                    let _region = exclusive.lock(Region::TxGuard);
                    units[controller].status.pending_tx[mb].take()
                };
                if let Some(pdu_id) = pending {
                    self.upper.on_tx_confirmation(pdu_id);
                }
            }
            CS_CODE_TX_ABORT => {
                // Abort acknowledged; no confirmation, mailbox back to
                // empty for the next write.
                let Self {
                    units, exclusive, ..
                } = self;
                let unit = &mut units[controller];
                let mut cs_reg = CSRegisterBitfield::new();
                cs_reg.write_field(CSField::CODE, CS_CODE_TX_INACTIVE);
                write_cs_reg(&unit.regs, offset, cs_reg);
                mailbox::clear_iflag(&unit.regs, mb);

                let _region = exclusive.lock(Region::TxGuard);
                unit.status.pending_tx[mb] = None;
            }
            _ => {}
        }
    }
}
