//! Domain model: entity kinds, enumerated values and the row shapes submitted to a store.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every entity type the generator produces, in declaration order (not dependency order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Deposit,
    Offerer,
    Address,
    OffererAddress,
    Venue,
    Offer,
    Stock,
    Booking,
    UserOfferer,
}

impl EntityKind {
    pub const ALL: [EntityKind; 10] = [
        EntityKind::User,
        EntityKind::Deposit,
        EntityKind::Offerer,
        EntityKind::Address,
        EntityKind::OffererAddress,
        EntityKind::Venue,
        EntityKind::Offer,
        EntityKind::Stock,
        EntityKind::Booking,
        EntityKind::UserOfferer,
    ];

    /// Name of the table this entity is stored in.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Deposit => "deposit",
            EntityKind::Offerer => "offerer",
            EntityKind::Address => "address",
            EntityKind::OffererAddress => "offerer_address",
            EntityKind::Venue => "venue",
            EntityKind::Offer => "offer",
            EntityKind::Stock => "stock",
            EntityKind::Booking => "booking",
            EntityKind::UserOfferer => "user_offerer",
        }
    }

    /// Entities whose identifiers must exist before rows of this kind can be synthesized.
    pub fn dependencies(&self) -> &'static [EntityKind] {
        use EntityKind::*;
        match self {
            User | Offerer | Address => &[],
            Deposit => &[User],
            OffererAddress => &[Offerer, Address],
            Venue => &[Offerer, Address, OffererAddress],
            Offer => &[Venue],
            Stock => &[Offer],
            Booking => &[Stock, Venue, Offerer, User, Deposit],
            UserOfferer => &[User, Offerer],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.table()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Used,
    Cancelled,
    Reimbursed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 4] = [BookingStatus::Confirmed, BookingStatus::Used, BookingStatus::Cancelled, BookingStatus::Reimbursed];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Used => "USED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Reimbursed => "REIMBURSED",
        }
    }

    /// Target share of the booking population, in percent.
    pub fn weight(&self) -> u32 {
        match self {
            BookingStatus::Confirmed => 50,
            BookingStatus::Used => 30,
            BookingStatus::Cancelled => 15,
            BookingStatus::Reimbursed => 5,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationReason {
    Beneficiary,
    Offerer,
    Expired,
    Fraud,
    Backoffice,
}

impl CancellationReason {
    pub const ALL: [CancellationReason; 5] = [
        CancellationReason::Beneficiary,
        CancellationReason::Offerer,
        CancellationReason::Expired,
        CancellationReason::Fraud,
        CancellationReason::Backoffice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::Beneficiary => "BENEFICIARY",
            CancellationReason::Offerer => "OFFERER",
            CancellationReason::Expired => "EXPIRED",
            CancellationReason::Fraud => "FRAUD",
            CancellationReason::Backoffice => "BACKOFFICE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("postal code {0:05} is outside the valid range {min:05}..={max:05}", min = PostalCode::MIN, max = PostalCode::MAX)]
pub struct InvalidPostalCode(pub u32);

/// A five digit postal code inside the range the target schema accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostalCode(u32);

impl PostalCode {
    pub const MIN: u32 = 1_000;
    pub const MAX: u32 = 98_999;

    pub fn new(value: u32) -> Result<Self, InvalidPostalCode> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidPostalCode(value))
        }
    }

    /// Walks the valid range so that the n-th entity gets a deterministic code.
    pub fn cycling(index: usize) -> Result<Self, InvalidPostalCode> {
        let span = (Self::MAX - Self::MIN + 1) as usize;
        Self::new(Self::MIN + (index % span) as u32)
    }

    pub fn value(&self) -> u32 { self.0 }

    /// Two digit department prefix.
    pub fn department(&self) -> String { format!("{:02}", self.0 / 1_000) }
}

impl fmt::Display for PostalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:05}", self.0) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub date_created: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositRow {
    pub user_id: i64,
    pub amount: f64,
    pub date_created: NaiveDateTime,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffererRow {
    pub siren: String,
    pub name: String,
    pub date_created: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressRow {
    pub street: String,
    pub postal_code: PostalCode,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub department_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffererAddressRow {
    pub address_id: i64,
    pub offerer_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VenueRow {
    pub name: String,
    pub offerer_id: i64,
    /// Position of the managing offerer in the offerer identifier set.
    pub offerer_index: u32,
    pub postal_code: PostalCode,
    pub street: String,
    pub city: String,
    pub date_created: NaiveDateTime,
    pub public_name: String,
    pub dms_token: String,
    pub offerer_address_id: i64,
    pub siret: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfferRow {
    pub name: String,
    pub venue_id: i64,
    pub venue_index: u32,
    pub date_created: NaiveDateTime,
    pub subcategory_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockRow {
    pub offer_id: i64,
    pub offer_index: u32,
    pub price: f64,
    pub date_created: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRow {
    pub date_created: NaiveDateTime,
    pub date_used: Option<NaiveDateTime>,
    pub stock_id: i64,
    pub venue_id: i64,
    pub offerer_id: i64,
    pub user_id: i64,
    pub deposit_id: i64,
    pub quantity: i32,
    pub token: String,
    pub amount: f64,
    pub status: BookingStatus,
    pub cancellation_date: Option<NaiveDateTime>,
    pub cancellation_reason: Option<CancellationReason>,
    pub reimbursement_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserOffererRow {
    pub user_id: i64,
    pub offerer_id: i64,
}

/// One bulk-insert batch. Every variant holds rows of a single entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RowBatch {
    Users(Vec<UserRow>),
    Deposits(Vec<DepositRow>),
    Offerers(Vec<OffererRow>),
    Addresses(Vec<AddressRow>),
    OffererAddresses(Vec<OffererAddressRow>),
    Venues(Vec<VenueRow>),
    Offers(Vec<OfferRow>),
    Stocks(Vec<StockRow>),
    Bookings(Vec<BookingRow>),
    UserOfferers(Vec<UserOffererRow>),
}

impl RowBatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            RowBatch::Users(_) => EntityKind::User,
            RowBatch::Deposits(_) => EntityKind::Deposit,
            RowBatch::Offerers(_) => EntityKind::Offerer,
            RowBatch::Addresses(_) => EntityKind::Address,
            RowBatch::OffererAddresses(_) => EntityKind::OffererAddress,
            RowBatch::Venues(_) => EntityKind::Venue,
            RowBatch::Offers(_) => EntityKind::Offer,
            RowBatch::Stocks(_) => EntityKind::Stock,
            RowBatch::Bookings(_) => EntityKind::Booking,
            RowBatch::UserOfferers(_) => EntityKind::UserOfferer,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowBatch::Users(rows) => rows.len(),
            RowBatch::Deposits(rows) => rows.len(),
            RowBatch::Offerers(rows) => rows.len(),
            RowBatch::Addresses(rows) => rows.len(),
            RowBatch::OffererAddresses(rows) => rows.len(),
            RowBatch::Venues(rows) => rows.len(),
            RowBatch::Offers(rows) => rows.len(),
            RowBatch::Stocks(rows) => rows.len(),
            RowBatch::Bookings(rows) => rows.len(),
            RowBatch::UserOfferers(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postal_code_range_is_enforced() {
        assert!(PostalCode::new(PostalCode::MIN).is_ok());
        assert!(PostalCode::new(PostalCode::MAX).is_ok());
        assert_eq!(PostalCode::new(999), Err(InvalidPostalCode(999)));
        assert_eq!(PostalCode::new(100_000), Err(InvalidPostalCode(100_000)));
    }

    #[test]
    fn postal_code_formatting() {
        let code = PostalCode::new(1_500).unwrap();
        assert_eq!(code.to_string(), "01500");
        assert_eq!(code.department(), "01");
        assert_eq!(PostalCode::new(75_011).unwrap().department(), "75");
    }

    #[test]
    fn cycling_postal_codes_never_leave_the_range() {
        for index in [0usize, 1, 97_999, 98_000, 199_999, 2_000_000] {
            let code = PostalCode::cycling(index).unwrap();
            assert!((PostalCode::MIN..=PostalCode::MAX).contains(&code.value()));
        }
        assert_eq!(PostalCode::cycling(0).unwrap(), PostalCode::cycling(98_000).unwrap());
    }

    #[test]
    fn status_weights_cover_the_population() {
        let total: u32 = BookingStatus::ALL.iter().map(|status| status.weight()).sum();
        assert_eq!(total, 100);
    }
}
