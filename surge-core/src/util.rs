//! Randomness helpers for scenario authors (think-times, payload jitter).

use std::time::Duration;

use rand::Rng;

/// A uniformly random duration in `[min, max)`; `min == max` returns
/// exactly `min`.
///
/// Panics when `max < min` — interval validity is checked at scenario
/// registration, a direct caller handing in a reversed interval is a
/// programming error.
#[must_use]
pub fn random_duration(min: Duration, max: Duration) -> Duration {
    assert!(max >= min, "random_duration: max less than min");
    if max.is_zero() || min == max {
        return max;
    }
    let nanos = rand::thread_rng().gen_range(min.as_nanos()..max.as_nanos());
    Duration::from_nanos(nanos as u64)
}

/// A uniformly random integer in `[min, max]` (both inclusive).
#[must_use]
pub fn random_number(min: i64, max: i64) -> i64 {
    assert!(max >= min, "random_number: max less than min");
    rand::thread_rng().gen_range(min..=max)
}

/// A uniformly random element of a non-empty slice.
#[must_use]
pub fn random_element<T>(items: &[T]) -> &T {
    assert!(!items.is_empty(), "random_element: empty slice");
    let index = rand::thread_rng().gen_range(0..items.len());
    &items[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_duration_with_equal_bounds_is_exact() {
        let d = Duration::from_millis(150);
        assert_eq!(random_duration(d, d), d);
    }

    #[test]
    fn random_duration_with_zero_max_is_zero() {
        assert_eq!(random_duration(Duration::ZERO, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn random_duration_stays_inside_the_interval() {
        let min = Duration::from_millis(10);
        let max = Duration::from_millis(20);
        for _ in 0..200 {
            let d = random_duration(min, max);
            assert!(d >= min && d < max, "out of range: {d:?}");
        }
    }

    #[test]
    #[should_panic(expected = "max less than min")]
    fn random_duration_rejects_reversed_bounds() {
        let _ = random_duration(Duration::from_secs(2), Duration::from_secs(1));
    }

    #[test]
    fn random_number_covers_both_bounds() {
        let mut saw_min = false;
        let mut saw_max = false;
        for _ in 0..500 {
            match random_number(1, 3) {
                1 => saw_min = true,
                3 => saw_max = true,
                2 => {}
                other => panic!("out of range: {other}"),
            }
        }
        assert!(saw_min && saw_max, "bounds never produced");
    }

    #[test]
    fn random_element_picks_from_the_slice() {
        let items = ["a", "b", "c"];
        for _ in 0..50 {
            assert!(items.contains(random_element(&items)));
        }
    }
}
