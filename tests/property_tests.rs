//! Property-based tests for invariants using proptest
//!
//! These tests verify that certain properties hold true for all inputs:
//! - The AQI never leaves the 0..=500 scale
//! - The AQI never decreases when PM2.5 increases
//! - The category always matches the index
//! - Summaries count every sample and average within the observed range

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use urbanpulse::aggregator::summarize;
use urbanpulse::aqi::{AqiCategory, compute_aqi};
use urbanpulse::storage::SampleRow;
use urbanpulse::{Reading, SampleKind, WeatherReading};

// Property: Valid readings always produce an index on the scale
proptest! {
    #[test]
    fn prop_index_stays_on_scale(pm25 in 0.0f64..2000.0f64) {
        let aqi = compute_aqi(Some(pm25));
        let index = aqi.index.unwrap();

        prop_assert!((0.0..=500.0).contains(&index));
    }
}

// Property: More particulate matter never gives a better index
proptest! {
    #[test]
    fn prop_index_is_monotonic(a in 0.0f64..600.0f64, b in 0.0f64..600.0f64) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let low_index = compute_aqi(Some(low)).index.unwrap();
        let high_index = compute_aqi(Some(high)).index.unwrap();

        prop_assert!(low_index <= high_index, "{low} -> {low_index}, {high} -> {high_index}");
    }
}

// Property: The category is derived from the index
proptest! {
    #[test]
    fn prop_category_matches_index(pm25 in proptest::option::of(-50.0f64..800.0f64)) {
        let aqi = compute_aqi(pm25);

        prop_assert_eq!(aqi.category, AqiCategory::from_index(aqi.index));
        prop_assert_eq!(aqi.index.is_none(), aqi.category == AqiCategory::NoData);
    }
}

// Property: Negative readings are treated as missing
proptest! {
    #[test]
    fn prop_negative_is_no_data(pm25 in -1000.0f64..-0.001f64) {
        let aqi = compute_aqi(Some(pm25));

        prop_assert_eq!(aqi.index, None);
        prop_assert_eq!(aqi.category, AqiCategory::NoData);
    }
}

// Property: One summary per city, counting every sample, mean within range
proptest! {
    #[test]
    fn prop_summary_counts_and_bounds(
        temperatures in proptest::collection::vec(proptest::option::of(-20.0f64..50.0f64), 1..40)
    ) {
        let hour = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let samples: Vec<SampleRow> = temperatures
            .iter()
            .enumerate()
            .map(|(i, temperature)| {
                SampleRow::new(
                    Reading::Weather(WeatherReading {
                        city: "Bangalore".to_string(),
                        temperature: *temperature,
                        humidity: None,
                        condition: None,
                    }),
                    hour + Duration::seconds(i as i64),
                )
            })
            .collect();

        let summaries = summarize(SampleKind::Weather, &samples, hour, hour);
        prop_assert_eq!(summaries.len(), 1);
        prop_assert_eq!(summaries[0].samples as usize, samples.len());
        prop_assert_eq!(summaries[0].metric("humidity"), None);

        let present: Vec<f64> = temperatures.iter().flatten().copied().collect();
        match summaries[0].metric("temperature") {
            None => prop_assert!(present.is_empty()),
            Some(mean) => {
                let min = present.iter().copied().fold(f64::INFINITY, f64::min);
                let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                prop_assert!(mean >= min - 1e-9 && mean <= max + 1e-9);
            }
        }
    }
}
