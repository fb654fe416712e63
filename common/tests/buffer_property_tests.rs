// Property-based tests for the input combo buffer

use common::errors::BufferError;
use common::input::{ComboPriority, InputCombo, InputComboBuffer};
use proptest::prelude::*;

fn combo(name: &str, priority: ComboPriority, ttl: u32) -> InputCombo {
    InputCombo::new(name, [name], priority).with_active_frames(ttl)
}

fn priority() -> impl Strategy<Value = ComboPriority> {
    prop_oneof![
        Just(ComboPriority::Low),
        Just(ComboPriority::Normal),
        Just(ComboPriority::High),
        Just(ComboPriority::Critical),
    ]
}

/// One frame's worth of input: frame step and the combos admitted on it
fn frame_input() -> impl Strategy<Value = (u64, Vec<(ComboPriority, u32)>)> {
    (
        0u64..3,
        prop::collection::vec((priority(), 1u32..6), 0..4),
    )
}

/// Capacity 3, TTL 2: the oldest entry expires before the third admission, so
/// the capacity trim never engages.
#[test]
fn test_expiry_runs_before_capacity_trim() {
    let mut buffer = InputComboBuffer::new(3).unwrap();

    buffer.next_frame(0, [combo("A", ComboPriority::Normal, 2)]).unwrap();
    assert_eq!(buffer.size(), 1);

    buffer.next_frame(1, [combo("B", ComboPriority::Normal, 2)]).unwrap();
    assert_eq!(buffer.size(), 2);

    let report = buffer.next_frame(2, [combo("C", ComboPriority::Normal, 2)]).unwrap();
    assert_eq!(buffer.size(), 2);
    assert!(report.evicted.is_empty());
    let names: Vec<&str> = buffer.combos().map(InputCombo::name).collect();
    assert_eq!(names, vec!["B", "C"]);
}

/// Five long-lived combos into a capacity-3 buffer: the two lowest-priority
/// (oldest on tie) are evicted.
#[test]
fn test_capacity_trim_keeps_highest_priority() {
    let mut buffer = InputComboBuffer::new(3).unwrap();
    let ttl = 1_000;

    buffer
        .next_frame(
            0,
            [
                combo("A", ComboPriority::Low, ttl),
                combo("B", ComboPriority::High, ttl),
            ],
        )
        .unwrap();
    buffer.next_frame(1, [combo("C", ComboPriority::Normal, ttl)]).unwrap();
    buffer.next_frame(2, [combo("D", ComboPriority::Low, ttl)]).unwrap();
    buffer.next_frame(3, [combo("E", ComboPriority::Normal, ttl)]).unwrap();

    assert_eq!(buffer.size(), 3);
    let names: Vec<&str> = buffer.combos().map(InputCombo::name).collect();
    assert_eq!(names, vec!["B", "C", "E"]);
}

#[test]
fn test_capacity_trim_in_single_frame() {
    let mut buffer = InputComboBuffer::new(3).unwrap();
    let ttl = 1_000;
    let report = buffer
        .next_frame(
            0,
            [
                combo("A", ComboPriority::Low, ttl),
                combo("B", ComboPriority::High, ttl),
                combo("C", ComboPriority::Normal, ttl),
                combo("D", ComboPriority::Low, ttl),
                combo("E", ComboPriority::Normal, ttl),
            ],
        )
        .unwrap();

    let evicted: Vec<&str> = report.evicted.iter().map(|e| e.combo().name()).collect();
    assert_eq!(evicted, vec!["A", "D"]);
    assert_eq!(report.admitted.len(), 3);
    assert_eq!(buffer.size(), 3);
}

/// **Property: Buffer invariants per frame**
///
/// *For any* sequence of frames and admissions:
/// - size never exceeds capacity
/// - no stale entry survives a frame
/// - nothing evicted was already stale
/// - every evicted entry ranks at or below every survivor by (priority, frame)
#[test]
fn property_buffer_invariants_hold_every_frame() {
    proptest!(|(
        capacity in 1usize..6,
        frames in prop::collection::vec(frame_input(), 1..30),
    )| {
        let mut buffer = InputComboBuffer::new(capacity).unwrap();
        let mut frame = 0u64;
        let mut counter = 0usize;

        for (step, admissions) in frames {
            frame += step;
            let combos: Vec<InputCombo> = admissions
                .iter()
                .map(|(priority, ttl)| {
                    counter += 1;
                    combo(&format!("c{}", counter), *priority, *ttl)
                })
                .collect();

            let report = buffer.next_frame(frame, combos).unwrap();

            prop_assert!(buffer.size() <= capacity);
            for entry in buffer.entries() {
                prop_assert!(frame - entry.frame() < u64::from(entry.combo().active_frames()));
            }
            for evicted in &report.evicted {
                prop_assert!(frame - evicted.frame() < u64::from(evicted.combo().active_frames()));
                for survivor in buffer.entries() {
                    prop_assert!(
                        (evicted.priority(), evicted.frame()) <= (survivor.priority(), survivor.frame())
                    );
                }
            }
            if report.evicted.is_empty() {
                prop_assert_eq!(report.admitted.len(), admissions.len());
            }
        }
    });
}

/// **Property: Non-monotonic frames are rejected without side effects**
#[test]
fn property_backwards_frame_is_rejected() {
    proptest!(|(
        start in 1u64..1_000,
        back in 1u64..1_000,
        ttl in 1u32..10,
    )| {
        let mut buffer = InputComboBuffer::new(4).unwrap();
        buffer.next_frame(start, [combo("keep", ComboPriority::Normal, ttl)]).unwrap();
        let before = buffer.entries().to_vec();

        let earlier = start.saturating_sub(back);
        let err = buffer
            .next_frame(earlier, [combo("late", ComboPriority::Critical, ttl)])
            .unwrap_err();

        prop_assert_eq!(err, BufferError::NonMonotonicFrame { last: start, frame: earlier });
        prop_assert_eq!(buffer.entries(), before.as_slice());
        prop_assert_eq!(buffer.last_frame(), Some(start));
    });
}
