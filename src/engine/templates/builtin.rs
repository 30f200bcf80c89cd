//! Built-in catalog for the inspection-analytics schema
//! (`Event`, `EventViolation`, `Locations`, `LocationType`).

use std::collections::BTreeMap;

use super::{Specialization, SqlTemplate, TemplateFamily};
use crate::engine::query::Intent;

pub const GENERIC_COUNT_ID: &str = "GEN_01";

const YEAR_FILTER: &str = "AND YEAR(e.SubmitionDate) = {year}";
const MONTH_FILTER: &str = "AND MONTH(e.SubmitionDate) = {month}";
const QUARTER_FILTER: &str = "AND QUARTER(e.SubmitionDate) = {quarter}";
const LOCATION_FILTER: &str = "AND l.Name = '{location}'";
const INSPECTOR_FILTER: &str = "AND e.ReporterID = TRY_CAST('{inspector}' AS INTEGER)";
const SEVERITY_FILTER: &str = "AND ev.Severity = TRY_CAST('{severity}' AS INTEGER)";
const ACTIVITY_FILTER: &str = "AND lt.Name = '{activity}'";

struct TemplateDef {
    id: &'static str,
    name: &'static str,
    family: TemplateFamily,
    specialization: Option<Specialization>,
    intents: &'static [Intent],
    sql: &'static str,
    filters: &'static [(&'static str, &'static str)],
    chart: &'static str,
}

impl TemplateDef {
    fn build(&self) -> SqlTemplate {
        SqlTemplate {
            id: self.id.to_string(),
            name: self.name.to_string(),
            family: self.family,
            specialization: self.specialization,
            intents: self.intents.to_vec(),
            sql: self.sql.to_string(),
            filters: self
                .filters
                .iter()
                .map(|(slot, fragment)| (slot.to_string(), fragment.to_string()))
                .collect::<BTreeMap<_, _>>(),
            chart: Some(self.chart.to_string()),
            description: None,
            signature: None,
            defaults: BTreeMap::new(),
        }
    }
}

const TIME_FILTERS: &[(&str, &str)] = &[
    ("year_filter", YEAR_FILTER),
    ("month_filter", MONTH_FILTER),
    ("quarter_filter", QUARTER_FILTER),
];

const CATALOG: &[TemplateDef] = &[
    TemplateDef {
        id: "RPT_01",
        name: "inspections_total_count",
        family: TemplateFamily::Inspections,
        specialization: None,
        intents: &[Intent::Count],
        sql: "SELECT COUNT(*) AS total_inspections FROM Event e \
              WHERE e.IsDeleted = 0 {year_filter} {month_filter} {quarter_filter}",
        filters: TIME_FILTERS,
        chart: "kpi",
    },
    TemplateDef {
        id: "RPT_02",
        name: "inspections_by_status",
        family: TemplateFamily::Inspections,
        specialization: None,
        intents: &[Intent::Distribution],
        sql: "SELECT e.Status AS status, COUNT(*) AS inspections FROM Event e \
              WHERE e.IsDeleted = 0 {year_filter} {month_filter} \
              GROUP BY e.Status ORDER BY inspections DESC",
        filters: TIME_FILTERS,
        chart: "pie",
    },
    TemplateDef {
        id: "RPT_03",
        name: "inspections_monthly_trend",
        family: TemplateFamily::Inspections,
        specialization: None,
        intents: &[Intent::Trend],
        sql: "SELECT YEAR(e.SubmitionDate) AS year, MONTH(e.SubmitionDate) AS month, \
              COUNT(*) AS inspections FROM Event e WHERE e.IsDeleted = 0 {year_filter} \
              GROUP BY YEAR(e.SubmitionDate), MONTH(e.SubmitionDate) ORDER BY year, month",
        filters: &[("year_filter", YEAR_FILTER)],
        chart: "line",
    },
    TemplateDef {
        id: "RPT_04",
        name: "average_inspection_score",
        family: TemplateFamily::Inspections,
        specialization: None,
        intents: &[Intent::Average],
        sql: "SELECT AVG(e.Score) AS avg_score FROM Event e \
              WHERE e.IsDeleted = 0 {year_filter} {month_filter}",
        filters: TIME_FILTERS,
        chart: "kpi",
    },
    TemplateDef {
        id: "VIO_01",
        name: "violations_total_count",
        family: TemplateFamily::Violations,
        specialization: None,
        intents: &[Intent::Count],
        sql: "SELECT COUNT(*) AS total_violations FROM EventViolation ev \
              JOIN Event e ON ev.EventId = e.Id \
              WHERE e.IsDeleted = 0 {year_filter} {month_filter} {quarter_filter} {severity_filter}",
        filters: &[
            ("year_filter", YEAR_FILTER),
            ("month_filter", MONTH_FILTER),
            ("quarter_filter", QUARTER_FILTER),
            ("severity_filter", SEVERITY_FILTER),
        ],
        chart: "kpi",
    },
    TemplateDef {
        id: "VIO_02",
        name: "violations_by_severity",
        family: TemplateFamily::Violations,
        specialization: None,
        intents: &[Intent::Distribution],
        sql: "SELECT ev.Severity AS severity, COUNT(*) AS violations FROM EventViolation ev \
              JOIN Event e ON ev.EventId = e.Id WHERE e.IsDeleted = 0 {year_filter} \
              GROUP BY ev.Severity ORDER BY violations DESC",
        filters: &[("year_filter", YEAR_FILTER)],
        chart: "pie",
    },
    TemplateDef {
        id: "VIO_03",
        name: "violations_total_value",
        family: TemplateFamily::Violations,
        specialization: None,
        intents: &[Intent::Sum],
        sql: "SELECT SUM(ev.ViolationValue) AS total_fines FROM EventViolation ev \
              JOIN Event e ON ev.EventId = e.Id WHERE e.IsDeleted = 0 {year_filter} {month_filter}",
        filters: TIME_FILTERS,
        chart: "kpi",
    },
    TemplateDef {
        id: "VIO_04",
        name: "violations_monthly_trend",
        family: TemplateFamily::Violations,
        specialization: None,
        intents: &[Intent::Trend],
        sql: "SELECT YEAR(e.SubmitionDate) AS year, MONTH(e.SubmitionDate) AS month, \
              COUNT(*) AS violations FROM EventViolation ev JOIN Event e ON ev.EventId = e.Id \
              WHERE e.IsDeleted = 0 {year_filter} \
              GROUP BY YEAR(e.SubmitionDate), MONTH(e.SubmitionDate) ORDER BY year, month",
        filters: &[("year_filter", YEAR_FILTER)],
        chart: "line",
    },
    TemplateDef {
        id: "VIO_05",
        name: "violations_by_activity",
        family: TemplateFamily::Violations,
        specialization: Some(Specialization::Activity),
        intents: &[Intent::Count, Intent::Distribution],
        sql: "SELECT lt.Name AS activity, COUNT(*) AS violations FROM EventViolation ev \
              JOIN Event e ON ev.EventId = e.Id JOIN Locations l ON e.LocationId = l.Id \
              JOIN LocationType lt ON l.LocationTypeId = lt.Id \
              WHERE e.IsDeleted = 0 {activity_filter} {year_filter} \
              GROUP BY lt.Name ORDER BY violations DESC LIMIT {limit}",
        filters: &[("activity_filter", ACTIVITY_FILTER), ("year_filter", YEAR_FILTER)],
        chart: "bar",
    },
    TemplateDef {
        id: "INS_01",
        name: "inspections_by_inspector",
        family: TemplateFamily::Inspectors,
        specialization: Some(Specialization::Inspector),
        intents: &[Intent::Count],
        sql: "SELECT e.ReporterID AS inspector_id, COUNT(*) AS inspections FROM Event e \
              WHERE e.IsDeleted = 0 {inspector_filter} {year_filter} {month_filter} \
              GROUP BY e.ReporterID ORDER BY inspections DESC LIMIT {limit}",
        filters: &[
            ("inspector_filter", INSPECTOR_FILTER),
            ("year_filter", YEAR_FILTER),
            ("month_filter", MONTH_FILTER),
        ],
        chart: "bar",
    },
    TemplateDef {
        id: "INS_02",
        name: "top_inspectors_by_violations",
        family: TemplateFamily::Inspectors,
        specialization: Some(Specialization::Inspector),
        intents: &[Intent::Ranking],
        sql: "SELECT e.ReporterID AS inspector_id, COUNT(ev.Id) AS violations_found \
              FROM Event e JOIN EventViolation ev ON ev.EventId = e.Id \
              WHERE e.IsDeleted = 0 {inspector_filter} {year_filter} \
              GROUP BY e.ReporterID ORDER BY violations_found DESC LIMIT {limit}",
        filters: &[("inspector_filter", INSPECTOR_FILTER), ("year_filter", YEAR_FILTER)],
        chart: "bar",
    },
    TemplateDef {
        id: "LOC_01",
        name: "inspections_by_location",
        family: TemplateFamily::Locations,
        specialization: Some(Specialization::Location),
        intents: &[Intent::Count, Intent::Ranking],
        sql: "SELECT l.Name AS location, COUNT(*) AS inspections FROM Event e \
              JOIN Locations l ON e.LocationId = l.Id \
              WHERE e.IsDeleted = 0 {location_filter} {year_filter} \
              GROUP BY l.Name ORDER BY inspections DESC LIMIT {limit}",
        filters: &[("location_filter", LOCATION_FILTER), ("year_filter", YEAR_FILTER)],
        chart: "bar",
    },
    TemplateDef {
        id: "LOC_02",
        name: "violations_by_location",
        family: TemplateFamily::Violations,
        specialization: Some(Specialization::Location),
        intents: &[Intent::Ranking, Intent::Comparison],
        sql: "SELECT l.Name AS location, COUNT(ev.Id) AS violations FROM EventViolation ev \
              JOIN Event e ON ev.EventId = e.Id JOIN Locations l ON e.LocationId = l.Id \
              WHERE e.IsDeleted = 0 {location_filter} {year_filter} \
              GROUP BY l.Name ORDER BY violations DESC LIMIT {limit}",
        filters: &[("location_filter", LOCATION_FILTER), ("year_filter", YEAR_FILTER)],
        chart: "bar",
    },
    TemplateDef {
        id: "MAP_01",
        name: "inspection_density_map",
        family: TemplateFamily::Locations,
        specialization: Some(Specialization::Map),
        intents: &[Intent::Map, Intent::Distribution],
        sql: "SELECT l.Name AS location, l.Latitude AS latitude, l.Longitude AS longitude, \
              COUNT(*) AS inspections FROM Event e JOIN Locations l ON e.LocationId = l.Id \
              WHERE e.IsDeleted = 0 {year_filter} GROUP BY l.Name, l.Latitude, l.Longitude",
        filters: &[("year_filter", YEAR_FILTER)],
        chart: "map",
    },
    TemplateDef {
        id: "FRC_01",
        name: "inspection_forecast_baseline",
        family: TemplateFamily::Forecasting,
        specialization: None,
        intents: &[Intent::Forecast],
        sql: "SELECT YEAR(e.SubmitionDate) AS year, MONTH(e.SubmitionDate) AS month, \
              COUNT(*) AS inspections FROM Event e WHERE e.IsDeleted = 0 \
              GROUP BY YEAR(e.SubmitionDate), MONTH(e.SubmitionDate) \
              ORDER BY year DESC, month DESC LIMIT 24",
        filters: &[],
        chart: "line",
    },
];

pub fn generic_count() -> SqlTemplate {
    TemplateDef {
        id: GENERIC_COUNT_ID,
        name: "generic_record_count",
        family: TemplateFamily::Generic,
        specialization: None,
        intents: &[Intent::Count],
        sql: "SELECT COUNT(*) AS total_records FROM Event e WHERE e.IsDeleted = 0 {year_filter}",
        filters: &[("year_filter", YEAR_FILTER)],
        chart: "kpi",
    }
    .build()
}

pub fn templates() -> Vec<SqlTemplate> {
    let mut all: Vec<SqlTemplate> = CATALOG.iter().map(TemplateDef::build).collect();
    all.push(generic_count());
    all
}
