//! Debug assertion macros for ring buffer invariants.
//!
//! These provide runtime checks for the counter discipline the ring depends
//! on. They are only active in debug builds (`debug_assert!`), so there is
//! zero overhead in release builds.

/// Assert that a counter only increases (or stays the same) across an update.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "counter {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a reader's claim never runs ahead of what writers have
/// published: `r_started <= w_finished`.
macro_rules! debug_assert_no_read_before_write {
    ($r_started:expr, $w_finished:expr) => {
        debug_assert!(
            $r_started <= $w_finished,
            "no-read-before-write violated: r_started {} > w_finished {}",
            $r_started,
            $w_finished
        )
    };
}

/// Assert that a publish CAS only ever advances `w_finished` from the exact
/// claim start it is trying to publish, i.e. in claim order.
macro_rules! debug_assert_ordered_publish {
    ($expected:expr, $observed:expr) => {
        debug_assert!(
            $expected == $observed,
            "publish ordering violated: expected w_finished {} but observed {}",
            $expected,
            $observed
        )
    };
}

pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_no_read_before_write;
pub(crate) use debug_assert_ordered_publish;
