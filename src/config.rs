//! All configuration related structures and enums
//!
//! Everything here is produced once by the integrator and treated as
//! read-only for the driver's lifetime.

use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Id {
    Standard(u32),
    Extended(u32),
}

impl Id {
    pub fn raw(&self) -> u32 {
        match self {
            Id::Standard(id) => id & 0x7FF,
            Id::Extended(id) => id & 0x1FFF_FFFF,
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, Id::Extended(_))
    }
}

impl From<embedded_can::Id> for Id {
    fn from(id: embedded_can::Id) -> Self {
        match id {
            embedded_can::Id::Standard(id) => Id::Standard(id.as_raw() as u32),
            embedded_can::Id::Extended(id) => Id::Extended(id.as_raw()),
        }
    }
}

impl From<Id> for embedded_can::Id {
    fn from(id: Id) -> Self {
        match id {
            Id::Standard(raw) => embedded_can::Id::Standard(
                embedded_can::StandardId::new((raw & 0x7FF) as u16)
                    .unwrap_or(embedded_can::StandardId::ZERO),
            ),
            Id::Extended(raw) => embedded_can::Id::Extended(
                embedded_can::ExtendedId::new(raw & 0x1FFF_FFFF)
                    .unwrap_or(embedded_can::ExtendedId::ZERO),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxRole {
    Receive,
    Transmit,
}

/// How an event class of a controller is serviced. Decided once here;
/// the dispatcher never negotiates this at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processing {
    Interrupt,
    Polling,
}

/// Budget for a bounded hardware wait: free-running timer ticks, or plain
/// loop iterations for builds without a usable timebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBudget {
    Ticks(u32),
    Iterations(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct BitTiming {
    pub prescaler: u16,
    pub prop_seg: u8,
    pub phase_seg_1: u8,
    pub phase_seg_2: u8,
    pub jump_width: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct BaudRateConfig {
    pub nominal: BitTiming,
    /// Data-phase timing, only used on FD-enabled controllers.
    pub data: Option<BitTiming>,
}

/// Payload bytes every mailbox of a controller can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    B8,
    B16,
    B32,
    B64,
}

impl PayloadSize {
    pub fn size_bytes(&self) -> u32 {
        match self {
            PayloadSize::B8 => 8,
            PayloadSize::B16 => 16,
            PayloadSize::B32 => 32,
            PayloadSize::B64 => 64,
        }
    }

    pub(crate) fn to_mbdsr(&self) -> u32 {
        match self {
            PayloadSize::B8 => 0b00,
            PayloadSize::B16 => 0b01,
            PayloadSize::B32 => 0b10,
            PayloadSize::B64 => 0b11,
        }
    }

    /// Mailbox RAM stride: 8 bytes of control/id plus the payload area.
    pub(crate) fn stride(&self) -> u32 {
        8 + self.size_bytes()
    }
}

/// Hardware receive FIFO, claiming the low mailbox region of a controller.
#[derive(Debug, Clone, Copy)]
pub struct FifoConfig {
    /// Handle reported with frames delivered from the FIFO.
    pub handle: u16,
    /// Number of entries consumed from the driver's flattened filter table.
    pub filter_count: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub rx_fifo: Option<FifoConfig>,
    /// Per-mailbox acceptance masks (RXIMR) instead of the global mask.
    pub individual_masks: bool,
    /// Arbitrate between transmit mailboxes by the local priority field.
    pub local_priority: bool,
    /// Software-controlled bus-off recovery.
    pub busoff_recovery: bool,
    pub fd: bool,
    /// Arm self-wake while sleeping; write requests are refused in that
    /// low-power listening state.
    pub wakeup: bool,
    /// The abort code of this controller revision is unreliable; cancel
    /// requests are deferred to the next dispatcher visit instead.
    pub deferred_abort: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            rx_fifo: None,
            individual_masks: true,
            local_priority: false,
            busoff_recovery: false,
            fd: false,
            wakeup: false,
            deferred_abort: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub mailbox_count: u8,
    pub payload_size: PayloadSize,
    pub baud_rates: Vec<BaudRateConfig>,
    pub default_baud_index: usize,
    pub options: ControllerOptions,
    pub rx_processing: Processing,
    pub tx_processing: Processing,
    pub busoff_processing: Processing,
    pub wakeup_processing: Processing,
    /// Number of periodic transmit-poll slots the mailboxes are spread
    /// over; 1 sweeps every transmit mailbox each period.
    pub tx_poll_slots: u8,
    pub wait: WaitBudget,
}

#[derive(Debug, Clone, Copy)]
pub struct MailboxConfig {
    pub controller: u8,
    pub mb_index: u8,
    pub role: MailboxRole,
    /// Logical hardware object handle. Several transmit mailboxes may share
    /// one handle (multiplexed transmit); receive handles are unique.
    pub handle: u16,
    /// Acceptance id for receive mailboxes; unused for transmit.
    pub id: Id,
    pub payload_len: u8,
    pub local_priority: u8,
    /// Index into the driver's individual mask table, or None to match the
    /// full id.
    pub mask_index: Option<usize>,
    /// Bind the payload late through the trigger-transmit callback when a
    /// write carries no data.
    pub trigger_transmit: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FifoFilterEntry {
    pub id: Id,
    pub mask: u32,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub controllers: Vec<ControllerConfig>,
    /// Flattened across all controllers, ordered by controller then
    /// hardware mailbox index.
    pub mailboxes: Vec<MailboxConfig>,
    /// Individual acceptance mask table referenced by `mask_index`.
    pub rx_masks: Vec<u32>,
    /// FIFO filter entries, consumed sequentially per controller in
    /// `filter_count` sized runs.
    pub fifo_filters: Vec<FifoFilterEntry>,
}

/// Mailboxes claimed by the FIFO engine and its filter table when the
/// receive FIFO is enabled (filter table limited to one bank of 8).
pub(crate) const FIFO_REGION_MAILBOXES: u8 = 8;

/// Fixed flag positions the FIFO multiplexes onto low mailbox indices.
pub(crate) const FIFO_AVAILABLE_MB: usize = 5;
pub(crate) const FIFO_WARNING_MB: usize = 6;
pub(crate) const FIFO_OVERFLOW_MB: usize = 7;
