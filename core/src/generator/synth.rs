use std::ops::Range;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::Rng;

use super::registry::{BookingLineage, Registry};
use crate::error::GenerationError;
use crate::model::*;
use crate::sampling::{self, TimeWindow};

const STOCK_PRICES: [f64; 8] = [5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 50.0, 100.0];
const DEPOSIT_AMOUNT: f64 = 5_000.0;
const DEPOSIT_SOURCE: &str = "age-18";
const OFFER_SUBCATEGORY: &str = "SUPPORT_PHYSIQUE_FILM";
const CITY: &str = "Paris";
const BASE_LATITUDE: f64 = 48.8566;
const BASE_LONGITUDE: f64 = 2.3522;

/// Identifiers committed by earlier phases plus the run-wide sampling parameters.
pub(crate) struct SynthContext<'a> {
    pub registry: &'a Registry,
    pub window: TimeWindow,
    pub dms_base: u64,
}

impl SynthContext<'_> {
    /// Rows `range` of entity `kind`. Indices are global across the phase.
    pub fn synthesize(&self, kind: EntityKind, batch_index: usize, range: Range<usize>, rng: &mut StdRng) -> Result<RowBatch, GenerationError> {
        Ok(match kind {
            EntityKind::User => RowBatch::Users(range.map(|i| self.user(i, rng)).collect()),
            EntityKind::Deposit => {
                let users = self.registry.ids(kind, EntityKind::User)?;
                RowBatch::Deposits(range.map(|i| self.deposit(users[i], rng)).collect())
            }
            EntityKind::Offerer => RowBatch::Offerers(range.map(|i| self.offerer(i, rng)).collect()),
            EntityKind::Address => {
                RowBatch::Addresses(range.map(address).collect::<Result<_, _>>().map_err(|err| GenerationError::invalid_value(kind, batch_index, err))?)
            }
            EntityKind::OffererAddress => {
                let addresses = self.registry.ids(kind, EntityKind::Address)?;
                let offerers = self.registry.ids(kind, EntityKind::Offerer)?;
                RowBatch::OffererAddresses(
                    range.map(|i| OffererAddressRow { address_id: addresses[i % addresses.len()], offerer_id: offerers[i % offerers.len()] }).collect(),
                )
            }
            EntityKind::Venue => {
                let offerers = self.registry.ids(kind, EntityKind::Offerer)?;
                let sites = self.registry.ids(kind, EntityKind::OffererAddress)?;
                RowBatch::Venues(
                    range
                        .map(|i| self.venue(i, offerers, sites, rng))
                        .collect::<Result<_, _>>()
                        .map_err(|err| GenerationError::invalid_value(kind, batch_index, err))?,
                )
            }
            EntityKind::Offer => {
                let venues = self.registry.ids(kind, EntityKind::Venue)?;
                RowBatch::Offers(
                    range
                        .map(|i| {
                            let venue_index = i % venues.len();
                            OfferRow {
                                name: format!("Offer {i}"),
                                venue_id: venues[venue_index],
                                venue_index: venue_index as u32,
                                date_created: self.window.uniform(rng),
                                subcategory_id: OFFER_SUBCATEGORY.to_string(),
                            }
                        })
                        .collect(),
                )
            }
            EntityKind::Stock => {
                let offers = self.registry.ids(kind, EntityKind::Offer)?;
                RowBatch::Stocks(
                    range
                        .map(|_| {
                            let offer_index = rng.gen_range(0..offers.len());
                            StockRow {
                                offer_id: offers[offer_index],
                                offer_index: offer_index as u32,
                                price: STOCK_PRICES[rng.gen_range(0..STOCK_PRICES.len())],
                                date_created: self.window.uniform(rng),
                            }
                        })
                        .collect(),
                )
            }
            EntityKind::Booking => {
                let lineage = self.registry.booking_lineage()?;
                RowBatch::Bookings(range.map(|i| self.booking(&lineage, i, rng)).collect())
            }
            EntityKind::UserOfferer => {
                let users = self.registry.ids(kind, EntityKind::User)?;
                let offerers = self.registry.ids(kind, EntityKind::Offerer)?;
                RowBatch::UserOfferers(
                    range.map(|i| UserOffererRow { user_id: users[i % users.len()], offerer_id: offerers[i % offerers.len()] }).collect(),
                )
            }
        })
    }

    fn user(&self, i: usize, rng: &mut StdRng) -> UserRow {
        UserRow {
            email: format!("user{i}@example.com"),
            first_name: format!("User{i}"),
            last_name: format!("Test{i}"),
            date_created: self.window.uniform(rng),
        }
    }

    fn deposit(&self, user_id: i64, rng: &mut StdRng) -> DepositRow {
        DepositRow { user_id, amount: DEPOSIT_AMOUNT, date_created: self.window.uniform(rng), source: DEPOSIT_SOURCE.to_string() }
    }

    fn offerer(&self, i: usize, rng: &mut StdRng) -> OffererRow {
        OffererRow { siren: format!("{:09}", 100_000_000 + i), name: format!("Offerer {i}"), date_created: self.window.uniform(rng) }
    }

    /// Venue `i` belongs to offerer `i mod offerers` and sits at that offerer's address.
    fn venue(&self, i: usize, offerers: &[i64], sites: &[i64], rng: &mut StdRng) -> Result<VenueRow, InvalidPostalCode> {
        let offerer_index = i % offerers.len();
        let site = i % sites.len();
        let postal_code = PostalCode::cycling(site)?;
        Ok(VenueRow {
            name: format!("Venue {i}"),
            offerer_id: offerers[offerer_index],
            offerer_index: offerer_index as u32,
            postal_code,
            street: format!("{site} Test Street"),
            city: CITY.to_string(),
            date_created: self.window.uniform(rng),
            public_name: format!("Venue {i}"),
            dms_token: format!("DMS{}", self.dms_base + i as u64),
            offerer_address_id: sites[site],
            siret: format!("{:014}", 20_000_000_000_000u64 + i as u64),
        })
    }

    fn booking(&self, lineage: &BookingLineage<'_>, i: usize, rng: &mut StdRng) -> BookingRow {
        let stock_index = rng.gen_range(0..lineage.stocks.len());
        let user_index = rng.gen_range(0..lineage.users.len());
        let (venue_index, offerer_index) = lineage.venue_and_offerer(stock_index);

        let date_created = self.window.recent(rng);
        let status = sampling::sample_status(rng);
        let mut row = BookingRow {
            date_created,
            date_used: None,
            stock_id: lineage.stocks[stock_index],
            venue_id: lineage.venues[venue_index],
            offerer_id: lineage.offerers[offerer_index],
            user_id: lineage.users[user_index],
            deposit_id: lineage.deposits[user_index],
            quantity: sampling::sample_quantity(rng),
            token: sampling::booking_token(i as u64),
            amount: lineage.price(stock_index),
            status,
            cancellation_date: None,
            cancellation_reason: None,
            reimbursement_date: None,
        };
        match status {
            BookingStatus::Confirmed => {}
            BookingStatus::Used => row.date_used = Some(date_created + Duration::days(rng.gen_range(1..=60))),
            BookingStatus::Cancelled => {
                row.cancellation_date = Some(date_created + Duration::days(rng.gen_range(0..=30)));
                row.cancellation_reason = Some(sampling::sample_cancellation_reason(rng));
            }
            BookingStatus::Reimbursed => {
                let used = date_created + Duration::days(rng.gen_range(1..=30));
                row.date_used = Some(used);
                row.reimbursement_date = Some(used + Duration::days(rng.gen_range(15..=45)));
            }
        }
        row
    }
}

fn address(i: usize) -> Result<AddressRow, InvalidPostalCode> {
    let postal_code = PostalCode::cycling(i)?;
    Ok(AddressRow {
        street: format!("{i} Test Street"),
        department_code: postal_code.department(),
        postal_code,
        city: CITY.to_string(),
        latitude: BASE_LATITUDE + (i % 100) as f64 * 0.001,
        longitude: BASE_LONGITUDE + (i % 100) as f64 * 0.001,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::batch_rng;
    use chrono::NaiveDate;

    fn context(registry: &Registry) -> SynthContext<'_> {
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        SynthContext { registry, window: TimeWindow::ending_at(end, 365), dms_base: 0 }
    }

    #[test]
    fn addresses_carry_a_matching_department() {
        let row = address(74_011).unwrap();
        assert_eq!(row.postal_code.to_string(), "75011");
        assert_eq!(row.department_code, "75");
        assert_eq!(row.street, "74011 Test Street");
    }

    #[test]
    fn users_need_no_dependencies() {
        let registry = Registry::default();
        let ctx = context(&registry);
        let mut rng = batch_rng(3, EntityKind::User, 0);
        let batch = ctx.synthesize(EntityKind::User, 0, 10..15, &mut rng).unwrap();
        let RowBatch::Users(rows) = batch else { panic!("expected users") };
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].email, "user10@example.com");
    }

    #[test]
    fn bookings_without_stocks_are_refused() {
        let registry = Registry::default();
        let ctx = context(&registry);
        let mut rng = batch_rng(0, EntityKind::Booking, 0);
        let err = ctx.synthesize(EntityKind::Booking, 0, 0..1, &mut rng).unwrap_err();
        assert!(matches!(err, GenerationError::MissingDependency { entity: EntityKind::Booking, .. }));
    }
}
