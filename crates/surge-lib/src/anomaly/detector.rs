//! Increase detection
//!
//! Scans an ordered count series and reports every consecutive pair of
//! samples where the count strictly rose. There is no threshold: any rise
//! is significant.

use std::borrow::Cow;

use crate::models::{AnomalyEvent, Sample};

/// Minimum samples required to form a pair
const MIN_SAMPLES_FOR_DETECTION: usize = 2;

/// Detect strict increases between consecutive samples
///
/// # Arguments
/// * `series` - Samples in any order; they are stably sorted by timestamp
///   when not already non-decreasing
///
/// # Returns
/// One `AnomalyEvent` per pair with `curr.count > prev.count`, in time order
pub fn detect_increases(series: &[Sample]) -> Vec<AnomalyEvent> {
    if series.len() < MIN_SAMPLES_FOR_DETECTION {
        return Vec::new();
    }

    let ordered = sort_by_time(series);

    ordered
        .windows(2)
        .filter(|pair| pair[1].count > pair[0].count)
        .map(|pair| AnomalyEvent {
            prev_timestamp: pair[0].timestamp,
            prev_count: pair[0].count,
            curr_timestamp: pair[1].timestamp,
            curr_count: pair[1].count,
        })
        .collect()
}

/// Input is sorted by timestamp first; the server does not guarantee order
fn sort_by_time(series: &[Sample]) -> Cow<'_, [Sample]> {
    let sorted = series
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp);

    if sorted {
        Cow::Borrowed(series)
    } else {
        let mut owned = series.to_vec();
        owned.sort_by_key(|s| s.timestamp);
        Cow::Owned(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn minute(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap()
    }

    fn series(counts: &[u64]) -> Vec<Sample> {
        counts
            .iter()
            .enumerate()
            .map(|(i, c)| Sample::new(minute(i as u32 + 1), *c))
            .collect()
    }

    #[test]
    fn test_plateaus_and_rises() {
        let events = detect_increases(&series(&[5, 5, 8, 8, 12]));

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].prev_timestamp, minute(2));
        assert_eq!(events[0].curr_timestamp, minute(3));
        assert_eq!((events[0].prev_count, events[0].curr_count), (5, 8));
        assert_eq!(events[1].curr_timestamp, minute(5));
        assert_eq!((events[1].prev_count, events[1].curr_count), (8, 12));
    }

    #[test]
    fn test_flat_and_falling_never_emit() {
        assert!(detect_increases(&series(&[10, 10, 7])).is_empty());
        assert!(detect_increases(&series(&[9, 8, 7, 7, 0])).is_empty());
    }

    #[test]
    fn test_short_series() {
        assert!(detect_increases(&[]).is_empty());
        assert!(detect_increases(&series(&[42])).is_empty());
    }

    #[test]
    fn test_single_unit_rise_is_significant() {
        let events = detect_increases(&series(&[0, 1]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta(), 1);
    }

    #[test]
    fn test_unsorted_input_is_ordered_first() {
        // Same points as [5, 5, 8, 8, 12] delivered out of order
        let shuffled = vec![
            Sample::new(minute(5), 12),
            Sample::new(minute(1), 5),
            Sample::new(minute(3), 8),
            Sample::new(minute(2), 5),
            Sample::new(minute(4), 8),
        ];

        let events = detect_increases(&shuffled);
        let rises: Vec<_> = events.iter().map(|e| e.curr_timestamp).collect();
        assert_eq!(rises, vec![minute(3), minute(5)]);
    }

    #[test]
    fn test_matches_pairwise_definition() {
        let input = series(&[3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5]);
        let expected: Vec<AnomalyEvent> = (1..input.len())
            .filter(|&i| input[i].count > input[i - 1].count)
            .map(|i| AnomalyEvent {
                prev_timestamp: input[i - 1].timestamp,
                prev_count: input[i - 1].count,
                curr_timestamp: input[i].timestamp,
                curr_count: input[i].count,
            })
            .collect();

        assert_eq!(detect_increases(&input), expected);
    }
}
