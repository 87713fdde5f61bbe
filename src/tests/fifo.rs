//! Receive FIFO tests.

use super::*;
use crate::config::Id;
use crate::mocks::Event;
use crate::regs;

const FIFO_HANDLE: u16 = 20;

fn fifo_layout() -> DriverConfig {
    let mut controller = controller_config();
    controller.options.rx_fifo = Some(FifoConfig {
        handle: FIFO_HANDLE,
        filter_count: 2,
    });

    DriverConfig {
        controllers: vec![controller],
        mailboxes: vec![tx_mailbox(0, 8, 1), tx_mailbox(0, 9, 2)],
        rx_masks: Vec::new(),
        fifo_filters: vec![
            FifoFilterEntry {
                id: Id::Standard(0x100),
                mask: 0x7FF,
            },
            FifoFilterEntry {
                id: Id::Standard(0x200),
                mask: 0x7FF,
            },
        ],
    }
}

#[test]
fn filter_table_is_programmed_at_init() {
    let harness = build(fifo_layout());

    assert_eq!(
        harness.sims[0].peek(regs::FIFO_FILTER_BASE),
        0x100 << 19
    );
    assert_eq!(
        harness.sims[0].peek(regs::FIFO_FILTER_BASE + 4),
        0x200 << 19
    );
    // Unused filter slots match nothing.
    assert_eq!(harness.sims[0].peek(regs::RXIMR_BASE + 2 * 4), 0xFFFF_FFFF);
}

#[test]
fn queued_frames_drain_in_arrival_order() {
    let mut harness = build_started(fifo_layout());

    harness.sims[0].queue_fifo_frame(Id::Standard(0x100), &[1]);
    harness.sims[0].queue_fifo_frame(Id::Standard(0x101), &[2]);
    harness.sims[0].queue_fifo_frame(Id::Standard(0x102), &[3]);

    harness.driver.poll_receive();

    let events = harness.upper.events.borrow();
    let rx: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::Rx { hrh, id, data, .. } => Some((*hrh, *id, data.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        rx,
        vec![
            (FIFO_HANDLE, Id::Standard(0x100), vec![1]),
            (FIFO_HANDLE, Id::Standard(0x101), vec![2]),
            (FIFO_HANDLE, Id::Standard(0x102), vec![3]),
        ]
    );
    drop(events);

    // Drained: the frame-available flag stayed clear.
    assert!(!harness.sims[0].iflag(FIFO_AVAILABLE_MB));
    assert_balanced(&harness);
}

#[test]
fn drain_loop_is_bounded_under_sustained_traffic() {
    let mut harness = build_started(fifo_layout());

    for n in 0..12 {
        harness.sims[0].queue_fifo_frame(Id::Standard(0x100 + n), &[n as u8]);
    }

    harness.driver.poll_receive();
    let first_sweep = harness.upper.count(|e| matches!(e, Event::Rx { .. }));
    assert_eq!(first_sweep, 8);
    assert!(harness.sims[0].iflag(FIFO_AVAILABLE_MB));

    harness.driver.poll_receive();
    assert_eq!(harness.upper.count(|e| matches!(e, Event::Rx { .. })), 12);
    assert!(!harness.sims[0].iflag(FIFO_AVAILABLE_MB));
}

#[test]
fn overflow_and_warning_have_dedicated_notifications() {
    let mut harness = build_started(fifo_layout());

    harness.sims[0].set_fifo_overflow();
    harness.sims[0].set_fifo_warning();
    harness.driver.poll_receive();

    assert_eq!(harness.upper.count(|e| *e == Event::FifoOverflow(0)), 1);
    assert_eq!(harness.upper.count(|e| *e == Event::FifoWarning(0)), 1);
    assert!(!harness.sims[0].iflag(FIFO_OVERFLOW_MB));
    assert!(!harness.sims[0].iflag(FIFO_WARNING_MB));

    // Once acknowledged they do not fire again.
    harness.driver.poll_receive();
    assert_eq!(harness.upper.count(|e| *e == Event::FifoOverflow(0)), 1);
    assert_eq!(harness.upper.count(|e| *e == Event::FifoWarning(0)), 1);
}

#[test]
fn interrupt_shape_services_the_fifo_slots() {
    let mut layout = fifo_layout();
    layout.controllers[0].rx_processing = Processing::Interrupt;
    let mut harness = build_started(layout);

    harness.sims[0].queue_fifo_frame(Id::Standard(0x100), &[5, 6]);
    harness.driver.mailbox_isr(0, 5, 7).unwrap();

    assert_eq!(harness.upper.count(|e| matches!(e, Event::Rx { .. })), 1);

    // The polling sweep must leave an interrupt-driven FIFO alone.
    harness.sims[0].queue_fifo_frame(Id::Standard(0x101), &[7]);
    harness.driver.poll_receive();
    assert_eq!(harness.upper.count(|e| matches!(e, Event::Rx { .. })), 1);
}
