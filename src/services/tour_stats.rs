//! Aggregation reports over tours.

use bson::DateTime;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::config::StatsSettings;
use crate::db::convert::document_to_json;
use crate::db::query::{Accumulator, Filter, GroupKey, Projection, Sort, SortKey, Stage};
use crate::db::DocumentStore;
use crate::error::AppError;
use crate::models::tour::{Tour, TOURS};
use crate::services::validation::ValidationErrors;

/// Months in a year, the most groups the monthly plan can return.
const MONTHS: i64 = 12;

fn field(name: &str) -> String {
    name.to_string()
}

/// Per-difficulty aggregates over well-rated tours, most expensive group first.
pub fn stats_pipeline(settings: &StatsSettings) -> Vec<Stage> {
    let mut pipeline = vec![
        Stage::Match(Tour::live()),
        Stage::Match(Filter::new().gte("ratingsAverage", settings.min_rating)),
        Stage::Group {
            key: GroupKey::Field(field("difficulty")),
            accumulators: vec![
                (field("numTours"), Accumulator::Count),
                (field("numRatings"), Accumulator::Sum(field("ratingsQuantity"))),
                (field("avgRating"), Accumulator::Avg(field("ratingsAverage"))),
                (field("avgPrice"), Accumulator::Avg(field("price"))),
                (field("minPrice"), Accumulator::Min(field("price"))),
                (field("maxPrice"), Accumulator::Max(field("price"))),
            ],
        },
        Stage::Sort(Sort(vec![SortKey::desc("avgPrice")])),
    ];
    if let Some(excluded) = settings.exclude_difficulty {
        pipeline.push(Stage::Match(Filter::new().ne("_id", excluded.as_str())));
    }
    pipeline
}

fn year_start(year: i32) -> Option<DateTime> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .map(DateTime::from_chrono)
}

pub fn parse_year(raw: &str) -> Result<i32, AppError> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|year| (1..=9998).contains(year))
        .ok_or_else(|| ValidationErrors::single("year", format!("Invalid year: {raw}")).into())
}

/// Tour starts per month of `year`, busiest month first.
pub fn monthly_plan_pipeline(year: i32) -> Result<Vec<Stage>, AppError> {
    let (Some(start), Some(end)) = (year_start(year), year_start(year + 1)) else {
        return Err(ValidationErrors::single("year", format!("Invalid year: {year}")).into());
    };

    Ok(vec![
        Stage::Match(Tour::live()),
        Stage::Unwind(field("startDates")),
        Stage::Match(
            Filter::new()
                .gte("startDates", start)
                .lt("startDates", end),
        ),
        Stage::Group {
            key: GroupKey::Month(field("startDates")),
            accumulators: vec![
                (field("numTourStarts"), Accumulator::Count),
                (field("tours"), Accumulator::Push(field("name"))),
            ],
        },
        Stage::AddFields(vec![(field("month"), field("_id"))]),
        Stage::Project(Projection::Exclude(vec![field("_id")])),
        Stage::Sort(Sort(vec![
            SortKey::desc("numTourStarts"),
            SortKey::asc("month"),
        ])),
        Stage::Limit(MONTHS),
    ])
}

pub async fn tour_stats(
    store: &dyn DocumentStore,
    settings: &StatsSettings,
) -> Result<Vec<Value>, AppError> {
    let groups = store.aggregate(TOURS, &stats_pipeline(settings)).await?;
    Ok(groups.into_iter().map(document_to_json).collect())
}

pub async fn monthly_plan(store: &dyn DocumentStore, year: i32) -> Result<Vec<Value>, AppError> {
    let months = store.aggregate(TOURS, &monthly_plan_pipeline(year)?).await?;
    Ok(months.into_iter().map(document_to_json).collect())
}
