//! The fixed benchmark scenario suite.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::BookingStatus;

/// Rows per listing page, as the production back office requests them.
pub const PAGE_SIZE: u32 = 20;
/// Offset of the "later page" scenarios.
pub const LATE_PAGE_OFFSET: u32 = 980;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Count,
    Page { limit: u32, offset: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    None,
    Status(BookingStatus),
    /// The venue resolved into [`ScenarioParameters`] at the start of a run.
    Venue,
    Offerer,
}

/// One named, parametrized query over the booking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Rolling window ending now.
    pub window_days: u32,
    pub shape: Shape,
    pub filter: Filter,
}

/// Identifiers the filtered scenarios bind, chosen once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioParameters {
    pub venue_id: Option<i64>,
    pub offerer_id: Option<i64>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, window_days: u32, shape: Shape, filter: Filter) -> Self { Self { name: name.into(), window_days, shape, filter } }

    /// The filtered scenarios need an identifier that an empty store cannot provide.
    pub fn is_runnable(&self, parameters: &ScenarioParameters) -> bool {
        match self.filter {
            Filter::Venue => parameters.venue_id.is_some(),
            Filter::Offerer => parameters.offerer_id.is_some(),
            Filter::None | Filter::Status(_) => true,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Shape::Count => write!(f, "count over {} days", self.window_days)?,
            Shape::Page { limit, offset } => write!(f, "page of {limit} at offset {offset} over {} days", self.window_days)?,
        }
        match self.filter {
            Filter::None => Ok(()),
            Filter::Status(status) => write!(f, " where status = {status}"),
            Filter::Venue => write!(f, " for one venue"),
            Filter::Offerer => write!(f, " for one offerer"),
        }
    }
}

/// Counts and listings over 30/90/365-day windows, first and later pages, and
/// status, venue and offerer filtered variants.
pub fn standard_suite() -> Vec<Scenario> {
    let first_page = Shape::Page { limit: PAGE_SIZE, offset: 0 };
    let late_page = Shape::Page { limit: PAGE_SIZE, offset: LATE_PAGE_OFFSET };

    let mut suite = Vec::new();
    for days in [30, 90, 365] {
        suite.push(Scenario::new(format!("count_{days}d"), days, Shape::Count, Filter::None));
        suite.push(Scenario::new(format!("list_{days}d_first_page"), days, first_page, Filter::None));
        suite.push(Scenario::new(format!("list_{days}d_late_page"), days, late_page, Filter::None));
    }
    let filtered = [
        ("status_confirmed", 90, Filter::Status(BookingStatus::Confirmed)),
        ("venue", 90, Filter::Venue),
        ("offerer", 365, Filter::Offerer),
    ];
    for (label, days, filter) in filtered {
        suite.push(Scenario::new(format!("count_{days}d_by_{label}"), days, Shape::Count, filter));
        suite.push(Scenario::new(format!("list_{days}d_by_{label}_first_page"), days, first_page, filter));
    }
    suite
}

/// Restricts `suite` to the named scenarios, keeping suite order. Unknown names are returned as the error.
pub fn select(suite: Vec<Scenario>, names: &[String]) -> Result<Vec<Scenario>, Vec<String>> {
    if names.is_empty() {
        return Ok(suite);
    }
    let unknown: Vec<String> = names.iter().filter(|name| !suite.iter().any(|scenario| &scenario.name == *name)).cloned().collect();
    if !unknown.is_empty() {
        return Err(unknown);
    }
    Ok(suite.into_iter().filter(|scenario| names.contains(&scenario.name)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn suite_names_are_unique() {
        let suite = standard_suite();
        let names: HashSet<&str> = suite.iter().map(|scenario| scenario.name.as_str()).collect();
        assert_eq!(names.len(), suite.len());
        assert_eq!(suite.len(), 15);
    }

    #[test]
    fn suite_covers_windows_pages_and_filters() {
        let suite = standard_suite();
        for days in [30, 90, 365] {
            assert!(suite.iter().any(|s| s.window_days == days && s.shape == Shape::Count));
            assert!(suite.iter().any(|s| s.window_days == days && matches!(s.shape, Shape::Page { offset: 0, .. })));
            assert!(suite.iter().any(|s| s.window_days == days && matches!(s.shape, Shape::Page { offset: LATE_PAGE_OFFSET, .. })));
        }
        assert!(suite.iter().any(|s| matches!(s.filter, Filter::Status(_))));
        assert!(suite.iter().any(|s| s.filter == Filter::Venue));
    }

    #[test]
    fn filtered_scenarios_need_parameters() {
        let scenario = Scenario::new("count_90d_by_venue", 90, Shape::Count, Filter::Venue);
        assert!(!scenario.is_runnable(&ScenarioParameters::default()));
        assert!(scenario.is_runnable(&ScenarioParameters { venue_id: Some(4), offerer_id: None }));
        assert_eq!(scenario.to_string(), "count over 90 days for one venue");
    }

    #[test]
    fn selection_keeps_order_and_reports_unknown_names() {
        let picked = select(standard_suite(), &["list_30d_first_page".to_string(), "count_30d".to_string()]).unwrap();
        assert_eq!(picked.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["count_30d", "list_30d_first_page"]);
        assert_eq!(select(standard_suite(), &["nope".to_string()]).unwrap_err(), vec!["nope".to_string()]);
    }
}
