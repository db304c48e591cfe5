use bookingbench_core::scenario::{Filter, Scenario, ScenarioParameters, Shape};
use thiserror::Error;
use tokio_postgres::types::ToSql;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SqlGenerationError {
    #[error("scenario {scenario} needs a {parameter} identifier but none was resolved")]
    MissingParameter { scenario: String, parameter: &'static str },
    #[error("SqlBuilder requires a projection and a table name for complete SELECT generation")]
    IncompleteConfiguration,
}

pub enum SqlExpr {
    Sql(String),
    Argument(Box<dyn ToSql + Send + Sync>),
}

/// What a SELECT returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Count,
    Fields(Vec<String>),
}

pub struct SqlBuilder {
    expressions: Vec<SqlExpr>,
    projection: Option<Projection>,
    table_name: Option<String>,
}

impl Default for SqlBuilder {
    fn default() -> Self { Self::new() }
}

impl SqlBuilder {
    pub fn new() -> Self { Self { expressions: Vec::new(), projection: None, table_name: None } }

    pub fn with_fields<T: Into<String>>(fields: Vec<T>) -> Self {
        Self { expressions: Vec::new(), projection: Some(Projection::Fields(fields.into_iter().map(|f| f.into()).collect())), table_name: None }
    }

    pub fn counting() -> Self { Self { expressions: Vec::new(), projection: Some(Projection::Count), table_name: None } }

    pub fn table_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn push(&mut self, expr: SqlExpr) { self.expressions.push(expr); }

    pub fn arg(&mut self, arg: impl ToSql + Send + Sync + 'static) {
        self.push(SqlExpr::Argument(Box::new(arg) as Box<dyn ToSql + Send + Sync>));
    }

    pub fn sql(&mut self, s: impl AsRef<str>) { self.push(SqlExpr::Sql(s.as_ref().to_owned())); }

    pub fn identifier(&mut self, name: &str) { self.sql(format!(r#""{}""#, name.replace('"', "\"\""))); }

    pub fn build(self) -> Result<(String, Vec<Box<dyn ToSql + Send + Sync>>), SqlGenerationError> {
        let (Some(projection), Some(table)) = (&self.projection, &self.table_name) else {
            return Err(SqlGenerationError::IncompleteConfiguration);
        };
        let select = match projection {
            Projection::Count => "COUNT(*)".to_string(),
            Projection::Fields(fields) if !fields.is_empty() => {
                fields.iter().map(|field| format!(r#""{}""#, field.replace('"', "\"\""))).collect::<Vec<_>>().join(", ")
            }
            Projection::Fields(_) => return Err(SqlGenerationError::IncompleteConfiguration),
        };
        let table = format!(r#""{}""#, table.replace('"', "\"\""));
        let (where_clause, args) = self.build_where_clause();
        Ok((format!("SELECT {select} FROM {table} WHERE {where_clause}"), args))
    }

    pub fn build_where_clause(self) -> (String, Vec<Box<dyn ToSql + Send + Sync>>) {
        let mut counter = 1;
        let mut where_clause = String::new();
        let mut args = Vec::new();

        for expr in self.expressions {
            match expr {
                SqlExpr::Argument(arg) => {
                    where_clause += &format!("${}", counter);
                    args.push(arg);
                    counter += 1;
                }
                SqlExpr::Sql(s) => {
                    where_clause += &s;
                }
            }
        }

        (where_clause, args)
    }

    /// Appends the predicate, ordering and paging of one benchmark scenario.
    pub fn scenario(&mut self, scenario: &Scenario, parameters: &ScenarioParameters) -> Result<(), SqlGenerationError> {
        // Rolling window ending at the store's current time.
        self.identifier(TIME_COLUMN);
        self.sql(" >= LOCALTIMESTAMP - make_interval(days => ");
        self.arg(scenario.window_days as i32);
        self.sql(")");

        match scenario.filter {
            Filter::None => {}
            Filter::Status(status) => {
                // Inlined so that the literal coerces to the column's enum type.
                self.sql(" AND ");
                self.identifier("status");
                self.sql(format!(" = '{}'", status.as_str()));
            }
            Filter::Venue => {
                let venue = parameters.venue_id.ok_or_else(|| missing(scenario, "venue"))?;
                self.sql(" AND ");
                self.identifier("venueId");
                self.sql(" = ");
                self.arg(venue);
            }
            Filter::Offerer => {
                let offerer = parameters.offerer_id.ok_or_else(|| missing(scenario, "offerer"))?;
                self.sql(" AND ");
                self.identifier("offererId");
                self.sql(" = ");
                self.arg(offerer);
            }
        }

        if let Shape::Page { limit, offset } = scenario.shape {
            self.sql(" ORDER BY ");
            self.identifier(TIME_COLUMN);
            self.sql(" DESC LIMIT ");
            self.arg(limit as i64);
            self.sql(" OFFSET ");
            self.arg(offset as i64);
        }
        Ok(())
    }
}

const TIME_COLUMN: &str = "dateCreated";

/// Columns a listing page fetches, as the back office does.
pub const PAGE_FIELDS: [&str; 8] = ["id", "dateCreated", "status", "amount", "quantity", "token", "venueId", "offererId"];

fn missing(scenario: &Scenario, parameter: &'static str) -> SqlGenerationError { SqlGenerationError::MissingParameter { scenario: scenario.name.clone(), parameter } }

/// Full statement and arguments for `scenario` against `table`.
pub fn scenario_statement(table: &str, scenario: &Scenario, parameters: &ScenarioParameters) -> Result<(String, Vec<Box<dyn ToSql + Send + Sync>>), SqlGenerationError> {
    let mut sql = match scenario.shape {
        Shape::Count => SqlBuilder::counting(),
        Shape::Page { .. } => SqlBuilder::with_fields(PAGE_FIELDS.to_vec()),
    };
    sql.table_name(table);
    sql.scenario(scenario, parameters)?;
    sql.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use bookingbench_core::model::BookingStatus;
    use bookingbench_core::scenario::standard_suite;

    fn assert_args(args: &Vec<Box<dyn ToSql + Send + Sync>>, expected: &Vec<Box<dyn ToSql + Send + Sync>>) {
        assert_eq!(format!("{:?}", args), format!("{:?}", expected));
    }

    fn parameters() -> ScenarioParameters { ScenarioParameters { venue_id: Some(12), offerer_id: Some(34) } }

    #[test]
    fn test_count_over_window() -> Result<()> {
        let scenario = Scenario::new("count_30d", 30, Shape::Count, Filter::None);
        let (sql_string, args) = scenario_statement("booking", &scenario, &parameters())?;

        assert_eq!(sql_string, r#"SELECT COUNT(*) FROM "booking" WHERE "dateCreated" >= LOCALTIMESTAMP - make_interval(days => $1)"#);
        let expected: Vec<Box<dyn ToSql + Send + Sync>> = vec![Box::new(30i32)];
        assert_args(&args, &expected);
        Ok(())
    }

    #[test]
    fn test_late_page() -> Result<()> {
        let scenario = Scenario::new("list_90d_late_page", 90, Shape::Page { limit: 20, offset: 980 }, Filter::None);
        let (sql_string, args) = scenario_statement("booking", &scenario, &parameters())?;

        assert_eq!(
            sql_string,
            r#"SELECT "id", "dateCreated", "status", "amount", "quantity", "token", "venueId", "offererId" FROM "booking" WHERE "dateCreated" >= LOCALTIMESTAMP - make_interval(days => $1) ORDER BY "dateCreated" DESC LIMIT $2 OFFSET $3"#
        );
        let expected: Vec<Box<dyn ToSql + Send + Sync>> = vec![Box::new(90i32), Box::new(20i64), Box::new(980i64)];
        assert_args(&args, &expected);
        Ok(())
    }

    #[test]
    fn test_status_filter_is_a_literal() -> Result<()> {
        let scenario = Scenario::new("count_90d_by_status_confirmed", 90, Shape::Count, Filter::Status(BookingStatus::Confirmed));
        let (sql_string, args) = scenario_statement("booking", &scenario, &parameters())?;

        assert!(sql_string.ends_with(r#"AND "status" = 'CONFIRMED'"#));
        assert_eq!(args.len(), 1);
        Ok(())
    }

    #[test]
    fn test_venue_filter_binds_the_resolved_venue() -> Result<()> {
        let scenario = Scenario::new("list_90d_by_venue_first_page", 90, Shape::Page { limit: 20, offset: 0 }, Filter::Venue);
        let (sql_string, args) = scenario_statement("booking", &scenario, &parameters())?;

        assert!(sql_string.contains(r#"AND "venueId" = $2 ORDER BY"#));
        let expected: Vec<Box<dyn ToSql + Send + Sync>> = vec![Box::new(90i32), Box::new(12i64), Box::new(20i64), Box::new(0i64)];
        assert_args(&args, &expected);
        Ok(())
    }

    #[test]
    fn test_missing_parameter_error() {
        let scenario = Scenario::new("count_365d_by_offerer", 365, Shape::Count, Filter::Offerer);
        let err = scenario_statement("booking", &scenario, &ScenarioParameters::default()).err().unwrap();
        assert_eq!(err, SqlGenerationError::MissingParameter { scenario: "count_365d_by_offerer".into(), parameter: "offerer" });
    }

    #[test]
    fn test_incomplete_configuration() {
        let sql = SqlBuilder::new();
        assert!(matches!(sql.build(), Err(SqlGenerationError::IncompleteConfiguration)));
    }

    #[test]
    fn test_every_standard_scenario_builds() -> Result<()> {
        for scenario in standard_suite() {
            let (sql_string, _) = scenario_statement("booking", &scenario, &parameters())?;
            assert!(sql_string.starts_with("SELECT "), "{}", scenario.name);
        }
        Ok(())
    }
}
