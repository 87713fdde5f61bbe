//! Controller state machine tests.

use super::*;
use crate::can_error::{CanError, DevError};
use crate::mocks::Event;
use crate::regs::{self, mcr, CanRegisters};
use crate::{ControllerState, ModeRequest};

fn bring_to(harness: &mut Harness, state: ControllerState) {
    match state {
        ControllerState::Stopped => {}
        ControllerState::Started => harness.driver.set_mode(0, ModeRequest::Start).unwrap(),
        ControllerState::Sleep => harness.driver.set_mode(0, ModeRequest::Sleep).unwrap(),
    }
    harness.upper.clear();
}

#[test]
fn transition_table_is_exhaustive() {
    use ControllerState::*;
    use ModeRequest::*;

    // (initial, request, accepted, resulting state, notifies)
    let table = [
        (Stopped, Start, true, Started, true),
        (Stopped, Stop, true, Stopped, false),
        (Stopped, ModeRequest::Sleep, true, ControllerState::Sleep, true),
        (Stopped, Wakeup, true, Stopped, false),
        (Started, Start, true, Started, false),
        (Started, Stop, true, Stopped, true),
        (Started, ModeRequest::Sleep, false, Started, false),
        (Started, Wakeup, false, Started, false),
        (ControllerState::Sleep, Start, false, ControllerState::Sleep, false),
        (ControllerState::Sleep, Stop, false, ControllerState::Sleep, false),
        (ControllerState::Sleep, ModeRequest::Sleep, true, ControllerState::Sleep, false),
        (ControllerState::Sleep, Wakeup, true, Stopped, true),
    ];

    for &(initial, request, accepted, resulting, notifies) in table.iter() {
        let mut harness = build(default_layout());
        bring_to(&mut harness, initial);

        let result = harness.driver.set_mode(0, request);

        assert_eq!(
            result.is_ok(),
            accepted,
            "{:?} + {:?} acceptance mismatch",
            initial,
            request
        );
        if !accepted {
            assert_eq!(result, Err(CanError::InvalidTransition));
            assert_eq!(
                harness
                    .upper
                    .count(|e| *e == Event::DevError(DevError::InvalidTransition)),
                1
            );
        }
        assert_eq!(
            harness.driver.controller_state(0).unwrap(),
            resulting,
            "{:?} + {:?} state mismatch",
            initial,
            request
        );
        assert_eq!(
            harness
                .upper
                .count(|e| matches!(e, Event::ModeChanged(_, _))),
            if notifies { 1 } else { 0 },
            "{:?} + {:?} notification mismatch",
            initial,
            request
        );
    }
}

#[test]
fn repeated_start_does_not_renotify() {
    let mut harness = build(default_layout());
    harness.driver.set_mode(0, ModeRequest::Start).unwrap();
    harness.driver.set_mode(0, ModeRequest::Start).unwrap();

    assert_eq!(
        harness
            .upper
            .count(|e| *e == Event::ModeChanged(0, ControllerState::Started)),
        1
    );
    assert_balanced(&harness);
}

#[test]
fn invalid_controller_is_rejected() {
    let mut harness = build(default_layout());
    assert_eq!(
        harness.driver.set_mode(7, ModeRequest::Start),
        Err(CanError::InvalidController)
    );
    assert_eq!(
        harness
            .upper
            .count(|e| *e == Event::DevError(DevError::InvalidController)),
        1
    );
}

#[test]
fn start_timeout_leaves_state_untouched() {
    let mut harness = build(default_layout());
    harness.sims[0].stuck_not_ready.set(true);

    let result = harness.driver.set_mode(0, ModeRequest::Start);

    assert_eq!(result, Err(CanError::Timeout));
    assert_eq!(
        harness.driver.controller_state(0).unwrap(),
        ControllerState::Stopped
    );
    assert_eq!(
        harness
            .upper
            .count(|e| matches!(e, Event::ModeChanged(_, _))),
        0
    );
}

#[test]
fn stop_falls_back_to_soft_reset_when_freeze_hangs() {
    let mut harness = build_started(default_layout());
    let resets_before = harness.sims[0].soft_resets.get();
    harness.sims[0].stuck_freeze.set(true);

    harness.driver.set_mode(0, ModeRequest::Stop).unwrap();

    assert_eq!(harness.sims[0].soft_resets.get(), resets_before + 1);
    assert_eq!(
        harness.driver.controller_state(0).unwrap(),
        ControllerState::Stopped
    );
    // The reset fallback must have re-applied the timing registers the
    // reset cleared.
    assert_ne!(harness.sims[0].peek(regs::CBT), 0);
    assert_balanced(&harness);
}

#[test]
fn mode_poll_reports_autonomous_stop() {
    let mut harness = build_started(default_layout());

    harness.sims[0].force_freeze();
    harness.driver.poll_mode();

    assert_eq!(
        harness.driver.controller_state(0).unwrap(),
        ControllerState::Stopped
    );
    assert_eq!(
        harness
            .upper
            .count(|e| *e == Event::ModeChanged(0, ControllerState::Stopped)),
        1
    );
}

#[test]
fn mode_poll_refreezes_a_runaway_stopped_controller() {
    let mut harness = build(default_layout());

    // Knock the hardware out of freeze behind the driver's back.
    let value = harness.sims[0].read(regs::MCR) & !(mcr::FRZ | mcr::HALT);
    harness.sims[0].write(regs::MCR, value);
    assert!(!harness.sims[0].read_bits(regs::MCR, mcr::NOTRDY));

    harness.driver.poll_mode();

    assert!(harness.sims[0].read_bits(regs::MCR, mcr::NOTRDY));
    assert_eq!(
        harness
            .upper
            .count(|e| matches!(e, Event::ModeChanged(_, _))),
        0
    );
}

#[test]
fn baud_rate_switch_requires_stopped() {
    let mut layout = default_layout();
    let mut second = bit_timing();
    second.prescaler = 8;
    layout.controllers[0].baud_rates.push(crate::config::BaudRateConfig {
        nominal: second,
        data: None,
    });

    let mut harness = build_started(layout);
    assert_eq!(
        harness.driver.set_baud_rate(0, 1),
        Err(CanError::NotStopped)
    );

    harness.driver.set_mode(0, ModeRequest::Stop).unwrap();
    assert_eq!(
        harness.driver.set_baud_rate(0, 5),
        Err(CanError::InvalidBaudIndex)
    );

    let cbt_before = harness.sims[0].peek(regs::CBT);
    harness.driver.set_baud_rate(0, 1).unwrap();
    assert_ne!(harness.sims[0].peek(regs::CBT), cbt_before);
}

#[test]
fn interrupt_disable_enable_nests_and_restores() {
    let mut layout = default_layout();
    layout.controllers[0].rx_processing = Processing::Interrupt;
    let mut harness = build_started(layout);

    // Receive mailboxes 0 and 1 are interrupt driven.
    assert_eq!(harness.sims[0].peek(regs::IMASK1), 0b11);

    harness.driver.disable_interrupts(0).unwrap();
    assert_eq!(harness.sims[0].peek(regs::IMASK1), 0);
    harness.driver.disable_interrupts(0).unwrap();

    harness.driver.enable_interrupts(0).unwrap();
    assert_eq!(harness.sims[0].peek(regs::IMASK1), 0);
    harness.driver.enable_interrupts(0).unwrap();
    assert_eq!(harness.sims[0].peek(regs::IMASK1), 0b11);

    harness.driver.enable_interrupts(0).unwrap();
    assert_eq!(
        harness
            .upper
            .count(|e| *e == Event::DevError(DevError::UnbalancedInterruptEnable)),
        1
    );
    assert_balanced(&harness);
}
