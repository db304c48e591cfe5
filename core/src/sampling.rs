//! Random sampling primitives used by row synthesis.
//!
//! Every batch draws from its own generator seeded from `(seed, entity, batch)`,
//! so the content of a batch does not depend on how many batches run concurrently.

use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{BookingStatus, CancellationReason, EntityKind};

const TOKEN_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TOKEN_LENGTH: u32 = 6;

/// Number of distinct six character booking tokens.
pub const MAX_TOKEN_ORDINAL: u64 = 36u64.pow(TOKEN_LENGTH);

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub fn batch_rng(seed: u64, kind: EntityKind, batch_index: usize) -> StdRng {
    let stream = splitmix64(seed ^ ((kind as u64 + 1) << 56));
    StdRng::seed_from_u64(splitmix64(stream ^ batch_index as u64))
}

/// Generator for values that are drawn once per run rather than once per batch.
pub fn run_rng(seed: u64, kind: EntityKind) -> StdRng { StdRng::seed_from_u64(splitmix64(splitmix64(seed) ^ kind as u64)) }

/// A bounded historical window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn ending_at(end: NaiveDateTime, days: u32) -> Self { Self { start: end - Duration::days(days as i64), end } }

    pub fn span_seconds(&self) -> i64 { (self.end - self.start).num_seconds().max(0) }

    /// Uniform over the whole window.
    pub fn uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> NaiveDateTime {
        self.start + Duration::seconds(rng.gen_range(0..=self.span_seconds()))
    }

    /// Quadratic recency weighting: the distance back from `end` is `span * u²`, so the
    /// density grows monotonically toward the present.
    pub fn recent<R: Rng + ?Sized>(&self, rng: &mut R) -> NaiveDateTime {
        let u: f64 = rng.gen();
        let back = (self.span_seconds() as f64 * u * u) as i64;
        self.end - Duration::seconds(back)
    }
}

pub fn sample_status<R: Rng + ?Sized>(rng: &mut R) -> BookingStatus {
    let mut roll = rng.gen_range(0..100u32);
    for status in BookingStatus::ALL {
        if roll < status.weight() {
            return status;
        }
        roll -= status.weight();
    }
    BookingStatus::Confirmed
}

pub fn sample_cancellation_reason<R: Rng + ?Sized>(rng: &mut R) -> CancellationReason {
    CancellationReason::ALL[rng.gen_range(0..CancellationReason::ALL.len())]
}

/// One in ten bookings is for two seats.
pub fn sample_quantity<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    if rng.gen_ratio(1, 10) {
        2
    } else {
        1
    }
}

/// Six character base-36 token for the n-th booking; distinct for every ordinal below [`MAX_TOKEN_ORDINAL`].
pub fn booking_token(ordinal: u64) -> String {
    let mut remaining = ordinal % MAX_TOKEN_ORDINAL;
    let mut token = [b'A'; TOKEN_LENGTH as usize];
    for slot in token.iter_mut().rev() {
        *slot = TOKEN_ALPHABET[(remaining % 36) as usize];
        remaining /= 36;
    }
    token.iter().map(|byte| *byte as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn window() -> TimeWindow {
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        TimeWindow::ending_at(end, 5 * 365)
    }

    #[test]
    fn batch_streams_are_reproducible_and_distinct() {
        let a: Vec<u64> = (0..4).map(|_| batch_rng(42, EntityKind::Booking, 3).gen()).collect();
        assert!(a.windows(2).all(|pair| pair[0] == pair[1]));

        let other_batch: u64 = batch_rng(42, EntityKind::Booking, 4).gen();
        let other_kind: u64 = batch_rng(42, EntityKind::Stock, 3).gen();
        let other_seed: u64 = batch_rng(43, EntityKind::Booking, 3).gen();
        assert_ne!(a[0], other_batch);
        assert_ne!(a[0], other_kind);
        assert_ne!(a[0], other_seed);
    }

    #[test]
    fn samples_stay_inside_the_window() {
        let window = window();
        let mut rng = batch_rng(7, EntityKind::Booking, 0);
        for _ in 0..10_000 {
            let uniform = window.uniform(&mut rng);
            let recent = window.recent(&mut rng);
            assert!(uniform >= window.start && uniform <= window.end);
            assert!(recent >= window.start && recent <= window.end);
        }
    }

    #[test]
    fn recent_sampling_favours_the_present() {
        let window = window();
        let midpoint = window.start + Duration::seconds(window.span_seconds() / 2);
        let mut rng = batch_rng(1, EntityKind::Booking, 0);
        let draws = 20_000;
        let recent_half = (0..draws).filter(|_| window.recent(&mut rng) >= midpoint).count();
        // P(u² < 1/2) = 1/√2 ≈ 0.707
        let share = recent_half as f64 / draws as f64;
        assert!((0.68..0.74).contains(&share), "share of recent half was {share}");
    }

    #[test]
    fn status_mix_tracks_the_weights() {
        let mut rng = batch_rng(9, EntityKind::Booking, 0);
        let draws = 100_000;
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            let status = sample_status(&mut rng);
            counts[BookingStatus::ALL.iter().position(|s| *s == status).unwrap()] += 1;
        }
        for (status, count) in BookingStatus::ALL.iter().zip(counts) {
            let share = count as f64 * 100.0 / draws as f64;
            assert!((share - status.weight() as f64).abs() < 1.0, "{status}: {share}%");
        }
    }

    #[test]
    fn tokens_are_fixed_width_and_unique() {
        assert_eq!(booking_token(0), "AAAAAA");
        assert_eq!(booking_token(1), "AAAAAB");
        assert_eq!(booking_token(35), "AAAAA9");
        assert_eq!(booking_token(36), "AAAABA");
        let tokens: HashSet<String> = (0..50_000u64).map(|n| booking_token(n * 4_099)).collect();
        assert_eq!(tokens.len(), 50_000);
        assert!(tokens.iter().all(|token| token.len() == 6));
    }
}
