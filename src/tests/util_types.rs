//! Size classes, bitset and deadline primitives.

use super::*;
use crate::bitset::MbBitSet;
use crate::config::Id;
use crate::mocks::MockClock;
use crate::util::{dlc_to_len, len_to_dlc, round_to_size_class, wait_until, Timebase};

#[test]
fn dlc_decodes_to_frame_lengths() {
    for dlc in 0..=8 {
        assert_eq!(dlc_to_len(dlc), dlc);
    }
    assert_eq!(dlc_to_len(9), 12);
    assert_eq!(dlc_to_len(10), 16);
    assert_eq!(dlc_to_len(11), 20);
    assert_eq!(dlc_to_len(12), 24);
    assert_eq!(dlc_to_len(13), 32);
    assert_eq!(dlc_to_len(14), 48);
    assert_eq!(dlc_to_len(15), 64);
}

#[test]
fn lengths_round_up_to_size_classes() {
    assert_eq!(len_to_dlc(0), 0);
    assert_eq!(len_to_dlc(8), 8);
    assert_eq!(len_to_dlc(9), 9);
    assert_eq!(len_to_dlc(13), 10);
    assert_eq!(len_to_dlc(33), 14);
    assert_eq!(len_to_dlc(64), 15);

    assert_eq!(round_to_size_class(9), 12);
    assert_eq!(round_to_size_class(17), 20);
    assert_eq!(round_to_size_class(49), 64);
    // Exact class sizes stay put.
    for &len in &[8u32, 12, 16, 20, 24, 32, 48, 64] {
        assert_eq!(round_to_size_class(len), len);
    }
}

#[test]
fn bitset_tracks_individual_mailboxes() {
    let mut set = MbBitSet::new(40);

    assert!(!set.get(0));
    set.set(0);
    set.set(31);
    set.set(39);
    assert!(set.get(0));
    assert!(set.get(31));
    assert!(set.get(39));

    assert_eq!(set.word(0), 0x8000_0001);
    assert_eq!(set.word(1), 1 << 7);

    set.clear(31);
    assert!(!set.get(31));
    assert_eq!(set.word(0), 1);

    // Out of range is quietly absorbed.
    set.set(64);
    assert!(!set.get(64));
    assert_eq!(set.word(2), 0);

    set.clear_all();
    assert_eq!(set.word(0), 0);
    assert_eq!(set.word(1), 0);
}

#[test]
fn iteration_deadline_expires_after_budget() {
    let clock = MockClock::new();
    let mut polls = 0u32;

    let result = wait_until(&clock, WaitBudget::Iterations(5), || {
        polls += 1;
        false
    });

    assert!(result.is_err());
    assert_eq!(polls, 6); // initial check plus the budgeted retries
}

#[test]
fn tick_deadline_expires_with_the_timebase() {
    let clock = MockClock::new();

    let result = wait_until(&clock, WaitBudget::Ticks(4), || false);
    assert!(result.is_err());

    // The clock advanced while the deadline polled it.
    assert!(clock.now() >= 4);
}

#[test]
fn wait_until_returns_early_on_success() {
    let clock = MockClock::new();
    let mut polls = 0u32;

    let result = wait_until(&clock, WaitBudget::Iterations(100), || {
        polls += 1;
        polls == 3
    });

    assert!(result.is_ok());
    assert_eq!(polls, 3);
}

#[test]
fn ids_convert_to_and_from_embedded_can() {
    let standard = Id::Standard(0x123);
    let embedded: embedded_can::Id = standard.into();
    assert_eq!(Id::from(embedded), standard);

    let extended = Id::Extended(0x1ABC_DEF0);
    let embedded: embedded_can::Id = extended.into();
    assert_eq!(Id::from(embedded), extended);
}
