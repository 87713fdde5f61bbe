//! Upper layer callback contract
//!
//! The driver translates register state into these notifications; the
//! communication layer above implements them. Callbacks may be invoked
//! from interrupt context, so implementations must stay short.

use crate::can_error::DevError;
use crate::config::Id;
use crate::ControllerState;

pub trait UpperLayer {
    fn on_controller_mode_changed(&self, controller: u8, state: ControllerState);

    fn on_rx_indication(&self, hrh: u16, controller: u8, id: Id, data: &[u8]);

    fn on_tx_confirmation(&self, pdu_id: u32);

    /// Bus-off is reported here, never as an ordinary mode change.
    fn on_bus_off(&self, controller: u8);

    fn on_rx_fifo_warning(&self, _controller: u8) {}

    fn on_rx_fifo_overflow(&self, _controller: u8) {}

    /// Late payload binding for mailboxes configured for it: fill `buf` and
    /// return the frame length, or None when no data is available.
    fn on_trigger_transmit(&self, _pdu_id: u32, _buf: &mut [u8]) -> Option<usize> {
        None
    }

    /// Pre-filter invoked before a receive indication; returning false
    /// drops the frame silently.
    fn on_rx_callout(&self, _hrh: u16, _id: Id, _data: &[u8]) -> bool {
        true
    }

    /// Diagnostic hook for caller errors and data-loss conditions.
    fn on_dev_error(&self, _error: DevError) {}
}
