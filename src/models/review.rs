use bson::{doc, oid::ObjectId, Bson, DateTime};
use serde::{Deserialize, Serialize};

use crate::db::query::{as_number, Accumulator, Filter, GroupKey, Stage};
use crate::db::{Changes, DocumentStore};
use crate::error::AppError;
use crate::models::resource::{Relation, Resource, Select};
use crate::models::tour::TOURS;
use crate::models::user::{User, USERS, USER_HIDDEN_FIELDS};
use crate::services::validation::{FieldKind, FieldRule, Rule};

pub const REVIEWS: &str = "reviews";

/// Ratings a tour carries while it has no reviews.
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub review: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    pub tour: ObjectId,
    pub user: ObjectId,
    #[serde(rename = "__v", default)]
    pub version: i32,
}

fn now() -> Bson {
    Bson::DateTime(DateTime::now())
}

const REVIEW_RULES: &[FieldRule] = &[
    FieldRule::new(
        "review",
        FieldKind::Text,
        &[Rule::Trim, Rule::Required("Review can not be empty!")],
    ),
    FieldRule::new(
        "rating",
        FieldKind::Number,
        &[
            Rule::Min(1.0, "Rating must be above 1.0"),
            Rule::Max(5.0, "Rating must be below 5.0"),
        ],
    ),
    FieldRule::new("createdAt", FieldKind::Date, &[Rule::Default(now)]),
    FieldRule::new(
        "tour",
        FieldKind::ObjectId,
        &[Rule::Required("Review must belong to a tour.")],
    ),
    FieldRule::new(
        "user",
        FieldKind::ObjectId,
        &[Rule::Required("Review must belong to a user.")],
    ),
];

pub const REVIEW_RELATIONS: &[Relation] = &[Relation {
    path: "user",
    collection: USERS,
    local_field: "user",
    foreign_field: "_id",
    many: false,
    select: Select::Only(&["name", "photo"]),
    scope: User::live,
    hidden: USER_HIDDEN_FIELDS,
    nested: &[],
}];

impl Resource for Review {
    const COLLECTION: &'static str = REVIEWS;

    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn rules() -> &'static [FieldRule] {
        REVIEW_RULES
    }

    fn populate() -> &'static [Relation] {
        REVIEW_RELATIONS
    }

    async fn after_write(
        store: &dyn DocumentStore,
        record: &Self,
        previous: Option<&Self>,
    ) -> Result<(), AppError> {
        refresh_tour_ratings(store, record.tour).await?;
        match previous {
            Some(previous) if previous.tour != record.tour => {
                refresh_tour_ratings(store, previous.tour).await
            }
            _ => Ok(()),
        }
    }
}

fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Recomputes a tour's `ratingsQuantity` and `ratingsAverage` from its reviews.
pub async fn refresh_tour_ratings(store: &dyn DocumentStore, tour: ObjectId) -> Result<(), AppError> {
    let pipeline = [
        Stage::Match(Filter::new().eq("tour", tour)),
        Stage::Group {
            key: GroupKey::Field("tour".to_string()),
            accumulators: vec![
                ("nRating".to_string(), Accumulator::Count),
                ("avgRating".to_string(), Accumulator::Avg("rating".to_string())),
            ],
        },
    ];
    let stats = store.aggregate(REVIEWS, &pipeline).await?;

    let (quantity, average) = match stats.first() {
        Some(group) => (
            group.get("nRating").and_then(as_number).unwrap_or(0.0) as i64,
            group
                .get("avgRating")
                .and_then(as_number)
                .map(round_rating)
                .unwrap_or(DEFAULT_RATINGS_AVERAGE),
        ),
        None => (0, DEFAULT_RATINGS_AVERAGE),
    };

    log::debug!("Tour {tour} now has {quantity} ratings averaging {average}");

    let changes = Changes::set(doc! {
        "ratingsQuantity": quantity,
        "ratingsAverage": average,
    });
    store
        .update_by_id(TOURS, tour, &Filter::new(), &changes)
        .await?;
    Ok(())
}
