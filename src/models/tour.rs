use bson::{oid::ObjectId, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::db::query::{as_number, Filter};
use crate::error::AppError;
use crate::models::resource::{Relation, Resource, SaveContext, Select};
use crate::models::review::REVIEW_RELATIONS;
use crate::models::user::{User, USER_HIDDEN_FIELDS};
use crate::services::validation::{FieldKind, FieldRule, Rule, ValidationErrors};

pub const TOURS: &str = "tours";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        }
    }

    pub fn parse(value: &str) -> Option<Difficulty> {
        match value.trim().to_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "difficult" => Some(Difficulty::Difficult),
            _ => None,
        }
    }
}

/// GeoJSON point used for the start location and each stop of a tour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_kind")]
    pub kind: String,
    /// `[longitude, latitude]`
    #[serde(default)]
    pub coordinates: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<i64>,
}

fn point_kind() -> String {
    "Point".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub duration: f64,
    #[serde(default)]
    pub max_group_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default = "default_ratings_average")]
    pub ratings_average: f64,
    #[serde(default)]
    pub ratings_quantity: i64,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub secret_tour: bool,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    #[serde(default)]
    pub start_dates: Vec<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<GeoPoint>,
    #[serde(default)]
    pub locations: Vec<GeoPoint>,
    #[serde(default)]
    pub guides: Vec<ObjectId>,
    #[serde(rename = "__v", default)]
    pub version: i32,
}

fn default_ratings_average() -> f64 {
    4.5
}

fn default_ratings_average_bson() -> Bson {
    Bson::Double(default_ratings_average())
}

fn zero() -> Bson {
    Bson::Int64(0)
}

fn no() -> Bson {
    Bson::Boolean(false)
}

fn now() -> Bson {
    Bson::DateTime(DateTime::now())
}

const TOUR_RULES: &[FieldRule] = &[
    FieldRule::new(
        "name",
        FieldKind::Text,
        &[
            Rule::Trim,
            Rule::Required("A tour must have a name"),
            Rule::MaxLength(40, "A tour name must have less or equal than 40 characters"),
            Rule::MinLength(10, "A tour name must have more or equal than 10 characters"),
        ],
    ),
    FieldRule::new("slug", FieldKind::Text, &[Rule::Internal]),
    FieldRule::new(
        "duration",
        FieldKind::Number,
        &[Rule::Required("A tour must have a duration")],
    ),
    FieldRule::new("maxGroupSize", FieldKind::Integer, &[Rule::Default(zero)]),
    FieldRule::new(
        "difficulty",
        FieldKind::Text,
        &[
            Rule::Trim,
            Rule::OneOf(
                &["easy", "medium", "difficult"],
                "Difficulty is either: easy, medium, difficult",
            ),
        ],
    ),
    FieldRule::new(
        "ratingsAverage",
        FieldKind::Number,
        &[
            Rule::Default(default_ratings_average_bson),
            Rule::Min(1.0, "Rating must be above 1.0"),
            Rule::Max(5.0, "Rating must be below 5.0"),
        ],
    ),
    FieldRule::new("ratingsQuantity", FieldKind::Integer, &[Rule::Default(zero)]),
    FieldRule::new(
        "summary",
        FieldKind::Text,
        &[Rule::Trim, Rule::Required("A tour must have a summary")],
    ),
    FieldRule::new("description", FieldKind::Text, &[Rule::Trim]),
    FieldRule::new("secretTour", FieldKind::Bool, &[Rule::Default(no)]),
    FieldRule::new(
        "price",
        FieldKind::Number,
        &[Rule::Required("A tour must have a price")],
    ),
    FieldRule::new("priceDiscount", FieldKind::Number, &[]),
    FieldRule::new(
        "imageCover",
        FieldKind::Text,
        &[Rule::Trim, Rule::Required("A tour must have a cover image")],
    ),
    FieldRule::new("images", FieldKind::TextList, &[]),
    FieldRule::new("createdAt", FieldKind::Date, &[Rule::Default(now)]),
    FieldRule::new("startDates", FieldKind::DateList, &[]),
    FieldRule::new("startLocation", FieldKind::GeoPoint, &[]),
    FieldRule::new("locations", FieldKind::GeoPointList, &[]),
    FieldRule::new("guides", FieldKind::ObjectIdList, &[]),
];

const TOUR_RELATIONS: &[Relation] = &[Relation {
    path: "guides",
    collection: crate::models::user::USERS,
    local_field: "guides",
    foreign_field: "_id",
    many: true,
    select: Select::Without(&["__v", "passwordChangedAt"]),
    scope: User::live,
    hidden: USER_HIDDEN_FIELDS,
    nested: &[],
}];

static TOUR_REVIEWS: Relation = Relation {
    path: "reviews",
    collection: crate::models::review::REVIEWS,
    local_field: "_id",
    foreign_field: "tour",
    many: true,
    select: Select::Without(&["__v"]),
    scope: Filter::new,
    hidden: &[],
    nested: REVIEW_RELATIONS,
};

impl Tour {
    /// Secret tours never appear in reads.
    pub fn live() -> Filter {
        Filter::new().ne("secretTour", true)
    }
}

impl Resource for Tour {
    const COLLECTION: &'static str = TOURS;

    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn rules() -> &'static [FieldRule] {
        TOUR_RULES
    }

    fn default_filter() -> Filter {
        Tour::live()
    }

    fn populate() -> &'static [Relation] {
        TOUR_RELATIONS
    }

    fn detail_relation() -> Option<&'static Relation> {
        Some(&TOUR_REVIEWS)
    }

    fn validate(&self, _ctx: &SaveContext) -> Result<(), ValidationErrors> {
        match self.price_discount {
            Some(discount) if discount >= self.price => Err(ValidationErrors::single(
                "priceDiscount",
                format!("Discount price ({discount}) should be below regular price"),
            )),
            _ => Ok(()),
        }
    }

    fn before_save(&mut self, _ctx: &SaveContext) -> Result<(), AppError> {
        self.slug = Some(slugify(&self.name));
        Ok(())
    }

    fn decorate(doc: &mut Document) {
        if let Some(duration) = doc.get("duration").and_then(as_number) {
            doc.insert("durationWeeks", duration / 7.0);
        }
    }
}

/// Lowercase, hyphen-separated form of a name: `"The Forest Hiker"` becomes `"the-forest-hiker"`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
