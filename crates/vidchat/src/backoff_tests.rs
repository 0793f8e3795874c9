// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use proptest::prelude::*;

use super::*;

#[yare::parameterized(
    first  = { 0, Some(1_000) },
    second = { 1, Some(2_000) },
    third  = { 2, Some(4_000) },
    fourth = { 3, Some(8_000) },
    fifth  = { 4, Some(16_000) },
    sixth  = { 5, None },
    far    = { 40, None },
)]
fn default_schedule(attempt: u32, expected_ms: Option<u64>) {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.delay(attempt), expected_ms.map(Duration::from_millis));
}

#[test]
fn delay_is_capped() {
    let policy = ReconnectPolicy {
        base: Duration::from_millis(1000),
        cap: Duration::from_millis(30_000),
        max_attempts: 10,
    };
    assert_eq!(policy.delay(5), Some(Duration::from_millis(30_000)));
    assert_eq!(policy.delay(9), Some(Duration::from_millis(30_000)));
}

#[test]
fn huge_attempts_do_not_overflow() {
    let policy = ReconnectPolicy { max_attempts: u32::MAX, ..ReconnectPolicy::default() };
    assert_eq!(policy.delay(64), Some(policy.cap));
    assert_eq!(policy.delay(u32::MAX - 1), Some(policy.cap));
}

#[test]
fn zero_attempts_never_retries() {
    let policy = ReconnectPolicy { max_attempts: 0, ..ReconnectPolicy::default() };
    assert_eq!(policy.delay(0), None);
}

proptest! {
    #[test]
    fn schedule_is_monotonic_and_capped(
        base_ms in 1u64..5_000,
        cap_ms in 1u64..60_000,
        max_attempts in 0u32..12,
    ) {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms),
            max_attempts,
        };
        let delays: Vec<Duration> = (0..max_attempts).filter_map(|a| policy.delay(a)).collect();
        prop_assert_eq!(delays.len(), max_attempts as usize);
        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        for d in &delays {
            prop_assert!(*d <= policy.cap);
        }
        prop_assert_eq!(policy.delay(max_attempts), None);
    }
}
