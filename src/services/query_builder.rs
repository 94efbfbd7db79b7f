//! Turns a flat query string into a typed [`ListQuery`].
//!
//! `GET /tours?duration[gte]=5&difficulty=easy&sort=-price,name&fields=name,price&page=2&limit=10`
//! becomes a filter on `duration` and `difficulty`, a two-key sort, an inclusion projection and
//! a skip of 10. Values are cast through the resource's rule table so that `duration` compares
//! as a number rather than a string.

use bson::Bson;
use url::form_urlencoded;

use crate::db::query::{Condition, Filter, Op, Projection, Sort, SortKey};
use crate::db::FindSpec;
use crate::services::validation::{cast_query_value, FieldRule, ValidationErrors, VERSION_FIELD};

/// Parameters that drive paging, ordering and projection rather than filtering.
pub const RESERVED: &[&str] = &["page", "sort", "limit", "fields"];

/// Parameters whose repeated values combine into an "in" filter.
pub const POLLUTION_WHITELIST: &[&str] = &[
    "duration",
    "ratingsQuantity",
    "ratingsAverage",
    "maxGroupSize",
    "difficulty",
    "price",
];

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 100;
pub const DEFAULT_SORT: &str = "-createdAt";

/// Largest skip a MongoDB find accepts, which stores it as a signed 64-bit integer.
pub const MAX_SKIP: u64 = i64::MAX as u64;

/// Decoded query-string pairs in arrival order, duplicates kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query: &str) -> Self {
        QueryParams {
            pairs: form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        QueryParams {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Last value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn values(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Replaces every value of `key` with `value`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.pairs.retain(|(k, _)| k != key);
        self.pairs.push((key.to_string(), value.into()));
    }

    /// Distinct keys in first-seen order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (key, _) in &self.pairs {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filter: Filter,
    pub sort: Sort,
    pub projection: Projection,
    pub page: u64,
    pub limit: u64,
}

impl ListQuery {
    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit).min(MAX_SKIP)
    }

    /// Removes `hidden` fields from the projection whatever the client asked for.
    pub fn hiding(mut self, hidden: &[&str]) -> Self {
        self.projection = hide_fields(self.projection, hidden);
        self
    }

    /// Combines the query with the resource's default-read predicate.
    pub fn into_find_spec(self, scope: Filter) -> FindSpec {
        let skip = self.skip();
        FindSpec {
            filter: self.filter.and(scope),
            sort: self.sort,
            projection: Some(self.projection),
            skip,
            limit: Some(i64::try_from(self.limit).unwrap_or(i64::MAX)),
        }
    }
}

/// An inclusion left empty once hidden fields are gone falls back to the default exclusion.
pub fn hide_fields(projection: Projection, hidden: &[&str]) -> Projection {
    match projection {
        Projection::Include(fields) => {
            let fields: Vec<String> = fields
                .into_iter()
                .filter(|f| !hidden.contains(&f.as_str()))
                .collect();
            if fields.is_empty() {
                hide_fields(Projection::Exclude(vec![VERSION_FIELD.to_string()]), hidden)
            } else {
                Projection::Include(fields)
            }
        }
        Projection::Exclude(mut fields) => {
            for field in hidden {
                if !fields.iter().any(|f| f == field) {
                    fields.push(field.to_string());
                }
            }
            Projection::Exclude(fields)
        }
    }
}

pub fn build_list_query(
    params: &QueryParams,
    rules: &[FieldRule],
) -> Result<ListQuery, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let filter = build_filter(params, rules).unwrap_or_else(|e| {
        merge(&mut errors, e);
        Filter::new()
    });
    let (page, limit) = build_pagination(params).unwrap_or_else(|e| {
        merge(&mut errors, e);
        (DEFAULT_PAGE, DEFAULT_LIMIT)
    });
    errors.into_result()?;

    Ok(ListQuery {
        filter,
        sort: build_sort(params),
        projection: build_projection(params),
        page,
        limit,
    })
}

fn merge(into: &mut ValidationErrors, from: ValidationErrors) {
    for error in from.fields() {
        into.add(error.field.clone(), error.message.clone());
    }
}

/// Splits `price[gte]` into `("price", Gte)`. Unknown operators keep the whole key as an
/// equality field.
fn split_operator(key: &str) -> (&str, Op) {
    if let Some(stripped) = key.strip_suffix(']') {
        if let Some((field, suffix)) = stripped.split_once('[') {
            if let Some(op) = Op::from_suffix(suffix) {
                return (field, op);
            }
        }
    }
    (key, Op::Eq)
}

fn is_injection(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

pub fn build_filter(params: &QueryParams, rules: &[FieldRule]) -> Result<Filter, ValidationErrors> {
    let mut filter = Filter::new();
    let mut errors = ValidationErrors::new();

    for key in params.keys() {
        if RESERVED.contains(&key) {
            continue;
        }
        let (field, op) = split_operator(key);
        if is_injection(field) {
            log::warn!("Dropping query parameter {key}");
            continue;
        }

        let values = params.values(key);
        let cast = |raw: &str| cast_query_value(rules, field, raw);

        let condition = if op == Op::Eq && values.len() > 1 && POLLUTION_WHITELIST.contains(&field)
        {
            values
                .iter()
                .copied()
                .map(cast)
                .collect::<Result<Vec<Bson>, _>>()
                .map(|items| Condition::new(field, Op::In, Bson::Array(items)))
        } else {
            let raw = values.last().copied().unwrap_or_default();
            cast(raw).map(|value| Condition::new(field, op, value))
        };

        match condition {
            Ok(condition) => filter.push(condition),
            Err(e) => merge(&mut errors, e),
        }
    }

    errors.into_result().map(|_| filter)
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn build_sort(params: &QueryParams) -> Sort {
    let keys: Vec<SortKey> = split_list(params.get("sort").unwrap_or(DEFAULT_SORT))
        .into_iter()
        .filter_map(|entry| match entry.strip_prefix('-') {
            Some("") => None,
            Some(field) => Some(SortKey::desc(field)),
            None => Some(SortKey::asc(entry)),
        })
        .collect();

    if keys.is_empty() {
        Sort(vec![SortKey::desc("createdAt")])
    } else {
        Sort(keys)
    }
}

pub fn build_projection(params: &QueryParams) -> Projection {
    let entries = params.get("fields").map(split_list).unwrap_or_default();
    if entries.is_empty() {
        return Projection::Exclude(vec![VERSION_FIELD.to_string()]);
    }

    if entries.iter().all(|e| e.starts_with('-')) {
        Projection::Exclude(
            entries
                .iter()
                .map(|e| e.trim_start_matches('-'))
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect(),
        )
    } else {
        Projection::Include(
            entries
                .iter()
                .filter(|e| !e.starts_with('-'))
                .map(|e| e.to_string())
                .collect(),
        )
    }
}

fn positive(params: &QueryParams, key: &str, default: u64) -> Result<u64, ValidationErrors> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ValidationErrors::single(key, format!("{key} must be a positive integer"))
            }),
    }
}

pub fn build_pagination(params: &QueryParams) -> Result<(u64, u64), ValidationErrors> {
    let page = positive(params, "page", DEFAULT_PAGE);
    let limit = positive(params, "limit", DEFAULT_LIMIT);
    match (page, limit) {
        (Ok(page), Ok(limit)) => Ok((page, limit)),
        (page, limit) => {
            let mut errors = ValidationErrors::new();
            for result in [page, limit] {
                if let Err(e) = result {
                    merge(&mut errors, e);
                }
            }
            Err(errors)
        }
    }
}
