//! Rule-table validation shared by every resource.
//!
//! Each resource declares a static table of [`FieldRule`]s. [`validate_document`]
//! drops fields the table does not know, casts values to the declared kind,
//! applies defaults and normalizers, then checks every rule and reports all
//! failures at once.

use std::fmt;
use std::sync::OnceLock;

use bson::{oid::ObjectId, Bson, DateTime, Document};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;

use crate::db::query::as_number;

pub const VERSION_FIELD: &str = "__v";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        ValidationErrors::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join(". "))
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Number,
    Bool,
    Date,
    ObjectId,
    TextList,
    DateList,
    ObjectIdList,
    /// GeoJSON point with optional address, description and day.
    GeoPoint,
    GeoPointList,
}

impl FieldKind {
    /// Kind used when a single query-string value is compared against the field.
    pub fn element(self) -> FieldKind {
        match self {
            FieldKind::TextList => FieldKind::Text,
            FieldKind::DateList => FieldKind::Date,
            FieldKind::ObjectIdList => FieldKind::ObjectId,
            FieldKind::GeoPoint | FieldKind::GeoPointList => FieldKind::Text,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Rule {
    Required(&'static str),
    /// Required when a record is first created only.
    RequiredOnCreate(&'static str),
    MinLength(usize, &'static str),
    MaxLength(usize, &'static str),
    Min(f64, &'static str),
    Max(f64, &'static str),
    OneOf(&'static [&'static str], &'static str),
    Email(&'static str),
    Trim,
    Lowercase,
    Default(fn() -> Bson),
    /// Maintained by the server; stripped from client payloads.
    Internal,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: &'static str,
    pub kind: FieldKind,
    pub rules: &'static [Rule],
}

impl FieldRule {
    pub const fn new(field: &'static str, kind: FieldKind, rules: &'static [Rule]) -> Self {
        FieldRule { field, kind, rules }
    }

    fn default_value(&self) -> Option<Bson> {
        self.rules.iter().find_map(|rule| match rule {
            Rule::Default(make) => Some(make()),
            _ => None,
        })
    }
}

/// Drops fields the client may not write.
pub fn strip_internal(doc: &mut Document, rules: &[FieldRule]) {
    doc.remove("_id");
    doc.remove(VERSION_FIELD);
    for rule in rules {
        if rule.rules.iter().any(|r| matches!(r, Rule::Internal)) {
            doc.remove(rule.field);
        }
    }
}

pub fn find_rule<'a>(rules: &'a [FieldRule], field: &str) -> Option<&'a FieldRule> {
    rules.iter().find(|rule| rule.field == field)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Update,
}

/// Normalizes `doc` in place against the rule table and checks every rule.
pub fn validate_document(
    doc: &mut Document,
    rules: &[FieldRule],
    mode: Mode,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let mut normalized = Document::new();

    if let Some(id) = doc.remove("_id") {
        normalized.insert("_id", id);
    }

    for rule in rules {
        let field = rule.field;
        match doc.remove(field) {
            None | Some(Bson::Null) => {}
            Some(value) => match coerce(rule.kind, &value) {
                Some(value) => {
                    normalized.insert(field, normalize(value, rule.rules));
                }
                None => {
                    errors.add(field, format!("Invalid {field}: {}", describe(&value)));
                    continue;
                }
            },
        }

        if mode == Mode::Create && !normalized.contains_key(field) {
            if let Some(default) = rule.default_value() {
                normalized.insert(field, default);
            }
        }

        check(normalized.get(field), rule, mode, &mut errors);
    }

    if let Some(version) = doc.remove(VERSION_FIELD) {
        normalized.insert(VERSION_FIELD, version);
    }
    *doc = normalized;

    errors.into_result()
}

/// Casts one query-string value to the kind declared for `field`.
/// Fields without a rule keep the raw string.
pub fn cast_query_value(
    rules: &[FieldRule],
    field: &str,
    raw: &str,
) -> Result<Bson, ValidationErrors> {
    let Some(rule) = find_rule(rules, field) else {
        return Ok(Bson::String(raw.to_string()));
    };
    coerce(rule.kind.element(), &Bson::String(raw.to_string()))
        .ok_or_else(|| ValidationErrors::single(field, format!("Invalid {field}: {raw}")))
}

fn describe(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_missing(value: Option<&Bson>) -> bool {
    match value {
        None | Some(Bson::Null) => true,
        Some(Bson::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn normalize(value: Bson, rules: &[Rule]) -> Bson {
    let Bson::String(mut text) = value else {
        return value;
    };
    for rule in rules {
        match rule {
            Rule::Trim => text = text.trim().to_string(),
            Rule::Lowercase => text = text.to_lowercase(),
            _ => {}
        }
    }
    Bson::String(text)
}

fn check(value: Option<&Bson>, rule: &FieldRule, mode: Mode, errors: &mut ValidationErrors) {
    let field = rule.field;
    for r in rule.rules {
        match (r, value) {
            (Rule::Required(message), v) if is_missing(v) => {
                errors.add(field, *message);
                return;
            }
            (Rule::RequiredOnCreate(message), v) if mode == Mode::Create && is_missing(v) => {
                errors.add(field, *message);
                return;
            }
            (Rule::MinLength(min, message), Some(Bson::String(s))) if s.chars().count() < *min => {
                errors.add(field, *message)
            }
            (Rule::MaxLength(max, message), Some(Bson::String(s))) if s.chars().count() > *max => {
                errors.add(field, *message)
            }
            (Rule::Min(min, message), Some(v)) if as_number(v).is_some_and(|n| n < *min) => {
                errors.add(field, *message)
            }
            (Rule::Max(max, message), Some(v)) if as_number(v).is_some_and(|n| n > *max) => {
                errors.add(field, *message)
            }
            (Rule::OneOf(allowed, message), Some(Bson::String(s)))
                if !allowed.contains(&s.as_str()) =>
            {
                errors.add(field, *message)
            }
            (Rule::Email(message), Some(Bson::String(s))) if !is_valid_email(s) => {
                errors.add(field, *message)
            }
            _ => {}
        }
    }
}

fn coerce(kind: FieldKind, value: &Bson) -> Option<Bson> {
    match kind {
        FieldKind::Text => match value {
            Bson::String(_) => Some(value.clone()),
            Bson::Int32(n) => Some(Bson::String(n.to_string())),
            Bson::Int64(n) => Some(Bson::String(n.to_string())),
            Bson::Double(n) => Some(Bson::String(n.to_string())),
            Bson::Boolean(b) => Some(Bson::String(b.to_string())),
            _ => None,
        },
        FieldKind::Integer => integer(value),
        FieldKind::Number => number(value).map(Bson::Double),
        FieldKind::Bool => match value {
            Bson::Boolean(_) => Some(value.clone()),
            Bson::String(s) if s == "true" => Some(Bson::Boolean(true)),
            Bson::String(s) if s == "false" => Some(Bson::Boolean(false)),
            _ => None,
        },
        FieldKind::Date => date(value).map(Bson::DateTime),
        FieldKind::ObjectId => match value {
            Bson::ObjectId(_) => Some(value.clone()),
            Bson::String(s) => ObjectId::parse_str(s).ok().map(Bson::ObjectId),
            _ => None,
        },
        FieldKind::GeoPoint => geo_point(value).map(Bson::Document),
        FieldKind::TextList => list(value, FieldKind::Text),
        FieldKind::DateList => list(value, FieldKind::Date),
        FieldKind::ObjectIdList => list(value, FieldKind::ObjectId),
        FieldKind::GeoPointList => list(value, FieldKind::GeoPoint),
    }
}

fn list(value: &Bson, element: FieldKind) -> Option<Bson> {
    match value {
        Bson::Array(items) => items
            .iter()
            .map(|item| coerce(element, item))
            .collect::<Option<Vec<Bson>>>()
            .map(Bson::Array),
        single => coerce(element, single).map(|v| Bson::Array(vec![v])),
    }
}

fn integer(value: &Bson) -> Option<Bson> {
    match value {
        Bson::Int32(n) => Some(Bson::Int64(i64::from(*n))),
        Bson::Int64(_) => Some(value.clone()),
        Bson::Double(n) if n.fract() == 0.0 && n.is_finite() => Some(Bson::Int64(*n as i64)),
        Bson::String(s) => s.trim().parse::<i64>().ok().map(Bson::Int64),
        _ => None,
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        other => as_number(other),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD,HH:MM` and epoch milliseconds.
pub fn parse_date(text: &str) -> Option<DateTime> {
    let text = text.trim();
    if let Ok(date) = DateTime::parse_rfc3339_str(text) {
        return Some(date);
    }
    let naive = ["%Y-%m-%d,%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(DateTime::from_chrono(Utc.from_utc_datetime(&naive)))
}

fn date(value: &Bson) -> Option<DateTime> {
    match value {
        Bson::DateTime(date) => Some(*date),
        Bson::String(s) => parse_date(s),
        Bson::Int64(ms) => Some(DateTime::from_millis(*ms)),
        Bson::Int32(ms) => Some(DateTime::from_millis(i64::from(*ms))),
        _ => None,
    }
}

fn geo_point(value: &Bson) -> Option<Document> {
    let Bson::Document(input) = value else {
        return None;
    };
    let mut point = Document::new();

    match input.get("type") {
        None | Some(Bson::Null) => {}
        Some(Bson::String(kind)) if kind.eq_ignore_ascii_case("point") => {}
        Some(_) => return None,
    }
    point.insert("type", "Point");

    if let Some(coordinates) = input.get("coordinates") {
        let Bson::Array(items) = coordinates else {
            return None;
        };
        let coordinates = items
            .iter()
            .map(|item| number(item).map(Bson::Double))
            .collect::<Option<Vec<Bson>>>()?;
        if coordinates.len() != 2 {
            return None;
        }
        point.insert("coordinates", coordinates);
    }

    for key in ["address", "description"] {
        match input.get(key) {
            None | Some(Bson::Null) => {}
            Some(Bson::String(text)) => {
                point.insert(key, text.trim());
            }
            Some(_) => return None,
        }
    }

    if let Some(day) = input.get("day") {
        point.insert("day", integer(day)?);
    }

    Some(point)
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| {
            Regex::new(
                r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+$",
            )
            .ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}
