//! Cardinality plan: how many rows of each entity a run produces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::model::EntityKind;

/// Production scale: ten million bookings.
pub const PRODUCTION_BOOKINGS: usize = 10_000_000;

/// Row counts for one generation run.
///
/// Counts are derived from the booking target with fixed ratios and may be
/// overridden per entity. Deposits are tied 1:1 to users, and addresses and
/// offerer addresses 1:1 to offerers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub users: usize,
    pub offerers: usize,
    pub venues: usize,
    pub offers: usize,
    pub stocks: usize,
    pub bookings: usize,
}

/// `count * numerator / denominator`, rounded half up, never below one.
fn scale(count: usize, numerator: usize, denominator: usize) -> usize {
    ((count * numerator * 2 + denominator) / (denominator * 2)).max(1)
}

impl GenerationPlan {
    pub fn for_bookings(bookings: usize) -> Self {
        let stocks = scale(bookings, 2, 5);
        let offers = scale(stocks, 2, 5);
        let venues = scale(offers, 1, 10);
        let offerers = scale(venues, 1, 2);
        let users = scale(bookings, 1, 5);
        Self { users, offerers, venues, offers, stocks, bookings }
    }

    pub fn with_users(mut self, users: usize) -> Self {
        self.users = users;
        self
    }

    pub fn with_offerers(mut self, offerers: usize) -> Self {
        self.offerers = offerers;
        self
    }

    pub fn with_venues(mut self, venues: usize) -> Self {
        self.venues = venues;
        self
    }

    pub fn with_offers(mut self, offers: usize) -> Self {
        self.offers = offers;
        self
    }

    pub fn with_stocks(mut self, stocks: usize) -> Self {
        self.stocks = stocks;
        self
    }

    pub fn user_offerers(&self) -> usize { self.users.min(self.offerers * 5) }

    pub fn count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::User | EntityKind::Deposit => self.users,
            EntityKind::Offerer | EntityKind::Address | EntityKind::OffererAddress => self.offerers,
            EntityKind::Venue => self.venues,
            EntityKind::Offer => self.offers,
            EntityKind::Stock => self.stocks,
            EntityKind::Booking => self.bookings,
            EntityKind::UserOfferer => self.user_offerers(),
        }
    }

    pub fn counts(&self) -> BTreeMap<EntityKind, usize> { EntityKind::ALL.iter().map(|kind| (*kind, self.count(*kind))).collect() }

    pub fn total_rows(&self) -> usize { EntityKind::ALL.iter().map(|kind| self.count(*kind)).sum() }

    /// Every referenced entity must be non-empty and row indices must fit the lineage tables.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.bookings == 0 {
            return Err(GenerationError::Config("the booking target must be positive".into()));
        }
        for kind in EntityKind::ALL {
            let count = self.count(kind);
            if count == 0 {
                return Err(GenerationError::Config(format!("{kind} count must be positive")));
            }
            if count > u32::MAX as usize {
                return Err(GenerationError::Config(format!("{kind} count {count} exceeds {}", u32::MAX)));
            }
        }
        Ok(())
    }
}

impl Default for GenerationPlan {
    fn default() -> Self { Self::for_bookings(PRODUCTION_BOOKINGS) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_target_ratios() {
        let plan = GenerationPlan::for_bookings(10_000);
        assert_eq!(plan.bookings, 10_000);
        assert_eq!(plan.stocks, 4_000);
        assert_eq!(plan.offers, 1_600);
        assert_eq!(plan.venues, 160);
        assert_eq!(plan.offerers, 80);
        assert_eq!(plan.users, 2_000);
        assert_eq!(plan.count(EntityKind::Deposit), 2_000);
        assert_eq!(plan.user_offerers(), 400);
    }

    #[test]
    fn production_scale_ratios() {
        let plan = GenerationPlan::default();
        assert_eq!(plan.users, 2_000_000);
        assert_eq!(plan.venues, 160_000);
        assert_eq!(plan.offerers, 80_000);
        assert_eq!(plan.count(EntityKind::Booking), PRODUCTION_BOOKINGS);
    }

    #[test]
    fn rounding_is_half_up_with_a_floor_of_one() {
        assert_eq!(scale(1, 1, 2), 1);
        assert_eq!(scale(3, 1, 2), 2);
        assert_eq!(scale(7, 2, 5), 3);
        assert_eq!(scale(0, 2, 5), 1);
        let plan = GenerationPlan::for_bookings(1);
        assert!(EntityKind::ALL.iter().all(|kind| plan.count(*kind) >= 1));
    }

    #[test]
    fn overrides_replace_derived_counts() {
        let plan = GenerationPlan::for_bookings(10_000).with_users(10).with_offerers(3).with_stocks(50);
        assert_eq!(plan.count(EntityKind::Deposit), 10);
        assert_eq!(plan.count(EntityKind::OffererAddress), 3);
        assert_eq!(plan.count(EntityKind::Stock), 50);
        assert_eq!(plan.user_offerers(), 10);
    }

    #[test]
    fn zero_counts_fail_validation() {
        assert!(GenerationPlan::for_bookings(100).with_venues(0).validate().is_err());
        assert!(GenerationPlan::for_bookings(100).validate().is_ok());
    }
}
