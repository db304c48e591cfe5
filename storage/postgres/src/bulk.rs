//! Bulk insertion through `UNNEST` of one array parameter per column.
//!
//! A whole batch is a single statement, so the store never paginates it; the returned
//! identifiers are still counted by the generator.

use async_trait::async_trait;
use bookingbench_core::model::{EntityKind, RowBatch};
use bookingbench_core::storage::BulkStore;
use bookingbench_core::StoreError;
use chrono::NaiveDateTime;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};

use crate::{check_name, classify, quoted, Postgres};

/// One column of a batch, as a typed array parameter.
pub(crate) enum ColumnValues {
    Text(Vec<String>),
    OptionalText(Vec<Option<String>>),
    BigInt(Vec<i64>),
    Integer(Vec<i32>),
    Double(Vec<f64>),
    Boolean(Vec<bool>),
    Timestamp(Vec<NaiveDateTime>),
    OptionalTimestamp(Vec<Option<NaiveDateTime>>),
}

impl ColumnValues {
    fn array_type(&self) -> &'static str {
        match self {
            ColumnValues::Text(_) | ColumnValues::OptionalText(_) => "text[]",
            ColumnValues::BigInt(_) => "int8[]",
            ColumnValues::Integer(_) => "int4[]",
            ColumnValues::Double(_) => "float8[]",
            ColumnValues::Boolean(_) => "bool[]",
            ColumnValues::Timestamp(_) | ColumnValues::OptionalTimestamp(_) => "timestamp[]",
        }
    }

    fn param(&self) -> &(dyn ToSql + Sync) {
        match self {
            ColumnValues::Text(values) => values,
            ColumnValues::OptionalText(values) => values,
            ColumnValues::BigInt(values) => values,
            ColumnValues::Integer(values) => values,
            ColumnValues::Double(values) => values,
            ColumnValues::Boolean(values) => values,
            ColumnValues::Timestamp(values) => values,
            ColumnValues::OptionalTimestamp(values) => values,
        }
    }
}

pub(crate) struct Columns {
    pub table: &'static str,
    pub columns: Vec<(&'static str, ColumnValues)>,
}

fn text<T>(rows: &[T], f: impl Fn(&T) -> String) -> ColumnValues { ColumnValues::Text(rows.iter().map(f).collect()) }

fn bigint<T>(rows: &[T], f: impl Fn(&T) -> i64) -> ColumnValues { ColumnValues::BigInt(rows.iter().map(f).collect()) }

fn double<T>(rows: &[T], f: impl Fn(&T) -> f64) -> ColumnValues { ColumnValues::Double(rows.iter().map(f).collect()) }

fn timestamp<T>(rows: &[T], f: impl Fn(&T) -> NaiveDateTime) -> ColumnValues { ColumnValues::Timestamp(rows.iter().map(f).collect()) }

fn constant_text(n: usize, value: &str) -> ColumnValues { ColumnValues::Text(vec![value.to_string(); n]) }

fn constant_bool(n: usize, value: bool) -> ColumnValues { ColumnValues::Boolean(vec![value; n]) }

/// Lays a batch out column by column, in the target schema's column names.
pub(crate) fn columns(batch: &RowBatch) -> Columns {
    let table = batch.kind().table();
    let n = batch.len();
    let columns = match batch {
        RowBatch::Users(rows) => vec![
            ("email", text(rows, |row| row.email.clone())),
            ("firstName", text(rows, |row| row.first_name.clone())),
            ("lastName", text(rows, |row| row.last_name.clone())),
            ("dateCreated", timestamp(rows, |row| row.date_created)),
            ("isEmailValidated", constant_bool(n, true)),
            ("hasSeenProTutorials", constant_bool(n, false)),
        ],
        RowBatch::Deposits(rows) => vec![
            ("userId", bigint(rows, |row| row.user_id)),
            ("amount", double(rows, |row| row.amount)),
            ("dateCreated", timestamp(rows, |row| row.date_created)),
            ("source", text(rows, |row| row.source.clone())),
            ("version", ColumnValues::Integer(vec![1; n])),
        ],
        RowBatch::Offerers(rows) => vec![
            ("siren", text(rows, |row| row.siren.clone())),
            ("name", text(rows, |row| row.name.clone())),
            ("dateCreated", timestamp(rows, |row| row.date_created)),
            ("isActive", constant_bool(n, true)),
            ("validationStatus", constant_text(n, "VALIDATED")),
        ],
        RowBatch::Addresses(rows) => vec![
            ("street", text(rows, |row| row.street.clone())),
            ("postalCode", text(rows, |row| row.postal_code.to_string())),
            ("city", text(rows, |row| row.city.clone())),
            ("latitude", double(rows, |row| row.latitude)),
            ("longitude", double(rows, |row| row.longitude)),
            ("departmentCode", text(rows, |row| row.department_code.clone())),
        ],
        RowBatch::OffererAddresses(rows) => vec![("addressId", bigint(rows, |row| row.address_id)), ("offererId", bigint(rows, |row| row.offerer_id))],
        RowBatch::Venues(rows) => vec![
            ("name", text(rows, |row| row.name.clone())),
            ("managingOffererId", bigint(rows, |row| row.offerer_id)),
            ("postalCode", text(rows, |row| row.postal_code.to_string())),
            ("address", text(rows, |row| row.street.clone())),
            ("city", text(rows, |row| row.city.clone())),
            ("dateCreated", timestamp(rows, |row| row.date_created)),
            ("thumbCount", ColumnValues::Integer(vec![0; n])),
            ("publicName", text(rows, |row| row.public_name.clone())),
            ("isPermanent", constant_bool(n, true)),
            ("venueTypeCode", constant_text(n, "OTHER")),
            ("dmsToken", text(rows, |row| row.dms_token.clone())),
            ("offererAddressId", bigint(rows, |row| row.offerer_address_id)),
            ("isOpenToPublic", constant_bool(n, true)),
            ("siret", text(rows, |row| row.siret.clone())),
        ],
        RowBatch::Offers(rows) => vec![
            ("name", text(rows, |row| row.name.clone())),
            ("venueId", bigint(rows, |row| row.venue_id)),
            ("dateCreated", timestamp(rows, |row| row.date_created)),
            ("isNational", constant_bool(n, false)),
            ("subcategoryId", text(rows, |row| row.subcategory_id.clone())),
        ],
        RowBatch::Stocks(rows) => vec![
            ("offerId", bigint(rows, |row| row.offer_id)),
            ("price", double(rows, |row| row.price)),
            ("dateCreated", timestamp(rows, |row| row.date_created)),
            ("isSoftDeleted", constant_bool(n, false)),
            ("dateModified", timestamp(rows, |row| row.date_created)),
        ],
        RowBatch::Bookings(rows) => vec![
            ("dateCreated", timestamp(rows, |row| row.date_created)),
            ("dateUsed", ColumnValues::OptionalTimestamp(rows.iter().map(|row| row.date_used).collect())),
            ("stockId", bigint(rows, |row| row.stock_id)),
            ("venueId", bigint(rows, |row| row.venue_id)),
            ("offererId", bigint(rows, |row| row.offerer_id)),
            ("userId", bigint(rows, |row| row.user_id)),
            ("depositId", bigint(rows, |row| row.deposit_id)),
            ("quantity", ColumnValues::Integer(rows.iter().map(|row| row.quantity).collect())),
            ("token", text(rows, |row| row.token.clone())),
            ("amount", double(rows, |row| row.amount)),
            ("status", text(rows, |row| row.status.as_str().to_string())),
            ("cancellationDate", ColumnValues::OptionalTimestamp(rows.iter().map(|row| row.cancellation_date).collect())),
            (
                "cancellationReason",
                ColumnValues::OptionalText(rows.iter().map(|row| row.cancellation_reason.map(|reason| reason.as_str().to_string())).collect()),
            ),
            ("reimbursementDate", ColumnValues::OptionalTimestamp(rows.iter().map(|row| row.reimbursement_date).collect())),
        ],
        RowBatch::UserOfferers(rows) => vec![
            ("userId", bigint(rows, |row| row.user_id)),
            ("offererId", bigint(rows, |row| row.offerer_id)),
            ("validationStatus", constant_text(n, "VALIDATED")),
        ],
    };
    Columns { table, columns }
}

/// `INSERT ... SELECT ... FROM UNNEST(...) WITH ORDINALITY ... RETURNING "id"`.
///
/// Every value is cast to the column's declared type, which also covers enum columns fed
/// from text arrays. Rows are inserted in ordinal order.
pub(crate) fn insert_statement(columns: &Columns, declared: &dyn Fn(&str) -> Option<String>) -> Result<String, StoreError> {
    check_name(columns.table)?;
    let mut names = Vec::with_capacity(columns.columns.len());
    let mut selects = Vec::with_capacity(columns.columns.len());
    let mut arrays = Vec::with_capacity(columns.columns.len());
    for (index, (name, values)) in columns.columns.iter().enumerate() {
        check_name(name)?;
        let column_type = declared(name).ok_or_else(|| StoreError::integrity(format!("column {name} does not exist on {}", columns.table)))?;
        check_name(&column_type)?;
        names.push(quoted(name));
        selects.push(format!("u.{}::{}", quoted(name), quoted(&column_type)));
        arrays.push(format!("${}::{}", index + 1, values.array_type()));
    }
    let names = names.join(", ");
    Ok(format!(
        "INSERT INTO {table} ({names}) SELECT {selects} FROM UNNEST({arrays}) WITH ORDINALITY AS u({names}, ord) ORDER BY u.ord RETURNING \"id\"",
        table = quoted(columns.table),
        selects = selects.join(", "),
        arrays = arrays.join(", "),
    ))
}

impl Postgres {
    async fn set_triggers(&self, enabled: bool) -> Result<(), StoreError> {
        let client = self.client().await?;
        let action = if enabled { "ENABLE" } else { "DISABLE" };
        let mut statements = String::new();
        for kind in EntityKind::ALL {
            statements += &format!("ALTER TABLE {} {action} TRIGGER USER;\n", quoted(kind.table()));
        }
        debug!("Postgres({}).set_triggers: {statements}", self.label);
        client.batch_execute(&statements).await.map_err(classify)
    }
}

#[async_trait]
impl BulkStore for Postgres {
    async fn insert_returning(&self, batch: &RowBatch) -> Result<Vec<i64>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let columns = columns(batch);
        let declared = self.column_types(columns.table).await?;
        let statement = insert_statement(&columns, &|name| declared.get(name).cloned())?;
        let params: Vec<&(dyn ToSql + Sync)> = columns.columns.iter().map(|(_, values)| values.param()).collect();

        let client = self.client().await?;
        debug!("Postgres({}).insert_returning: {} rows into {}", self.label, batch.len(), columns.table);
        let rows = client.query(&statement, &params).await.map_err(classify)?;
        // Identifiers come from a sequence consumed in ordinal order.
        let mut ids = rows.iter().map(|row| row.try_get::<_, i64>(0)).collect::<Result<Vec<_>, _>>().map_err(classify)?;
        ids.sort_unstable();
        Ok(ids)
    }

    async fn suspend_validation(&self) -> Result<(), StoreError> {
        self.set_triggers(false).await?;
        info!("Postgres({}): user triggers disabled", self.label);
        Ok(())
    }

    async fn resume_validation(&self) -> Result<(), StoreError> {
        self.set_triggers(true).await?;
        info!("Postgres({}): user triggers enabled", self.label);
        Ok(())
    }

    fn describe(&self) -> String { self.label.clone() }
}
