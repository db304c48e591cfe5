use std::collections::BTreeMap;

use crate::error::GenerationError;
use crate::model::{EntityKind, RowBatch};

/// Identifiers committed so far, per entity, plus the parent indices needed to
/// keep booking denormalisations coherent with the stock they reference.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    ids: BTreeMap<EntityKind, Vec<i64>>,
    venue_offerer: Vec<u32>,
    offer_venue: Vec<u32>,
    stock_offer: Vec<u32>,
    stock_price: Vec<f64>,
}

/// Read view over everything a booking row references.
pub(crate) struct BookingLineage<'a> {
    pub stocks: &'a [i64],
    pub venues: &'a [i64],
    pub offerers: &'a [i64],
    pub users: &'a [i64],
    pub deposits: &'a [i64],
    venue_offerer: &'a [u32],
    offer_venue: &'a [u32],
    stock_offer: &'a [u32],
    stock_price: &'a [f64],
}

impl BookingLineage<'_> {
    /// Venue and offerer index reached by following stock -> offer -> venue -> offerer.
    pub fn venue_and_offerer(&self, stock_index: usize) -> (usize, usize) {
        let offer = self.stock_offer[stock_index] as usize;
        let venue = self.offer_venue[offer] as usize;
        (venue, self.venue_offerer[venue] as usize)
    }

    pub fn price(&self, stock_index: usize) -> f64 { self.stock_price[stock_index] }
}

impl Registry {
    /// Identifiers of `dependency`, required by `entity`.
    pub fn ids(&self, entity: EntityKind, dependency: EntityKind) -> Result<&[i64], GenerationError> {
        match self.ids.get(&dependency) {
            Some(ids) if !ids.is_empty() => Ok(ids),
            _ => Err(GenerationError::MissingDependency { entity, dependency }),
        }
    }

    pub fn booking_lineage(&self) -> Result<BookingLineage<'_>, GenerationError> {
        let entity = EntityKind::Booking;
        let lineage = BookingLineage {
            stocks: self.ids(entity, EntityKind::Stock)?,
            venues: self.ids(entity, EntityKind::Venue)?,
            offerers: self.ids(entity, EntityKind::Offerer)?,
            users: self.ids(entity, EntityKind::User)?,
            deposits: self.ids(entity, EntityKind::Deposit)?,
            venue_offerer: &self.venue_offerer,
            offer_venue: &self.offer_venue,
            stock_offer: &self.stock_offer,
            stock_price: &self.stock_price,
        };
        if lineage.deposits.len() < lineage.users.len() {
            return Err(GenerationError::MissingDependency { entity, dependency: EntityKind::Deposit });
        }
        Ok(lineage)
    }

    pub fn record(&mut self, committed: Committed) {
        match committed.kind {
            EntityKind::Venue => self.venue_offerer.extend(committed.parents),
            EntityKind::Offer => self.offer_venue.extend(committed.parents),
            EntityKind::Stock => {
                self.stock_offer.extend(committed.parents);
                self.stock_price.extend(committed.prices);
            }
            _ => {}
        }
        if !committed.ids.is_empty() {
            self.ids.entry(committed.kind).or_default().extend(committed.ids);
        }
    }
}

/// What survives of a batch once the store accepted it: identifiers and parent indices, no row content.
#[derive(Debug)]
pub(crate) struct Committed {
    kind: EntityKind,
    ids: Vec<i64>,
    parents: Vec<u32>,
    prices: Vec<f64>,
}

impl Committed {
    /// Entities nothing references keep no identifiers.
    pub fn new(batch: &RowBatch, ids: Vec<i64>) -> Self {
        let kind = batch.kind();
        let (parents, prices) = match batch {
            RowBatch::Venues(rows) => (rows.iter().map(|row| row.offerer_index).collect(), Vec::new()),
            RowBatch::Offers(rows) => (rows.iter().map(|row| row.venue_index).collect(), Vec::new()),
            RowBatch::Stocks(rows) => (rows.iter().map(|row| row.offer_index).collect(), rows.iter().map(|row| row.price).collect()),
            _ => (Vec::new(), Vec::new()),
        };
        let ids = if matches!(kind, EntityKind::Booking | EntityKind::UserOfferer) { Vec::new() } else { ids };
        Self { kind, ids, parents, prices }
    }
}
