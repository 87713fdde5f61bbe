//! Host test suite running the driver against simulated controllers.

mod fifo;
mod mode;
mod util_types;

use std::rc::Rc;
use std::vec::Vec;

use crate::config::*;
use crate::mocks::{MockClock, Recorder, SimController, TraceExclusive};
use crate::transfer::TxFrame;
use crate::{CanDriver, ModeRequest};

pub(crate) type TestDriver =
    CanDriver<Rc<SimController>, Rc<TraceExclusive>, Rc<MockClock>, Rc<Recorder>>;

pub(crate) struct Harness {
    pub driver: TestDriver,
    pub sims: Vec<Rc<SimController>>,
    pub upper: Rc<Recorder>,
    pub exclusive: Rc<TraceExclusive>,
    pub clock: Rc<MockClock>,
}

pub(crate) fn bit_timing() -> BitTiming {
    BitTiming {
        prescaler: 4,
        prop_seg: 7,
        phase_seg_1: 4,
        phase_seg_2: 2,
        jump_width: 1,
    }
}

pub(crate) fn baud() -> BaudRateConfig {
    BaudRateConfig {
        nominal: bit_timing(),
        data: None,
    }
}

pub(crate) fn controller_config() -> ControllerConfig {
    ControllerConfig {
        mailbox_count: 16,
        payload_size: PayloadSize::B8,
        baud_rates: vec![baud()],
        default_baud_index: 0,
        options: ControllerOptions::default(),
        rx_processing: Processing::Polling,
        tx_processing: Processing::Polling,
        busoff_processing: Processing::Polling,
        wakeup_processing: Processing::Polling,
        tx_poll_slots: 1,
        wait: WaitBudget::Iterations(16),
    }
}

pub(crate) fn rx_mailbox(controller: u8, mb_index: u8, handle: u16, id: Id) -> MailboxConfig {
    MailboxConfig {
        controller,
        mb_index,
        role: MailboxRole::Receive,
        handle,
        id,
        payload_len: 8,
        local_priority: 0,
        mask_index: None,
        trigger_transmit: false,
    }
}

pub(crate) fn tx_mailbox(controller: u8, mb_index: u8, handle: u16) -> MailboxConfig {
    MailboxConfig {
        controller,
        mb_index,
        role: MailboxRole::Transmit,
        handle,
        id: Id::Standard(0),
        payload_len: 8,
        local_priority: 0,
        mask_index: None,
        trigger_transmit: false,
    }
}

/// Two transmit objects (handles 1 and 2 on mailboxes 8 and 9) and two
/// receive mailboxes, everything polled.
pub(crate) fn default_layout() -> DriverConfig {
    DriverConfig {
        controllers: vec![controller_config()],
        mailboxes: vec![
            rx_mailbox(0, 0, 10, Id::Standard(0x100)),
            rx_mailbox(0, 1, 11, Id::Standard(0x200)),
            tx_mailbox(0, 8, 1),
            tx_mailbox(0, 9, 2),
        ],
        rx_masks: Vec::new(),
        fifo_filters: Vec::new(),
    }
}

pub(crate) fn build(config: DriverConfig) -> Harness {
    let sims: Vec<Rc<SimController>> = (0..config.controllers.len())
        .map(|_| SimController::new())
        .collect();
    let upper = Recorder::new();
    let exclusive = TraceExclusive::new();
    let clock = MockClock::new();

    let driver = CanDriver::new(
        config,
        sims.clone(),
        exclusive.clone(),
        clock.clone(),
        upper.clone(),
    )
    .expect("config must build");

    Harness {
        driver,
        sims,
        upper,
        exclusive,
        clock,
    }
}

pub(crate) fn build_started(config: DriverConfig) -> Harness {
    let mut harness = build(config);
    harness
        .driver
        .set_mode(0, ModeRequest::Start)
        .expect("start must succeed");
    harness.upper.clear();
    harness
}

pub(crate) fn classic_frame(pdu_id: u32, data: &[u8]) -> TxFrame<'_> {
    TxFrame {
        id: Id::Standard(0x100),
        pdu_id,
        data: Some(data),
        len: 0,
        fd: false,
    }
}

/// Every region entered during the scenario must have been exited again.
pub(crate) fn assert_balanced(harness: &Harness) {
    assert_eq!(harness.exclusive.depth.get(), 0);
    assert!(!harness.exclusive.unbalanced.get());
    assert!(harness.exclusive.entries.get() > 0);
}
