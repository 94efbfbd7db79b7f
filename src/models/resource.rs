use bson::{oid::ObjectId, DateTime, Document};
use serde::{de::DeserializeOwned, Serialize};

use crate::db::query::{Filter, Projection};
use crate::db::DocumentStore;
use crate::error::AppError;
use crate::services::validation::{FieldRule, ValidationErrors};

/// How a delete request is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Remove,
    /// Sets `field` to `value` and leaves the record in place.
    SoftMark { field: &'static str, value: bool },
}

/// A reference from one collection into another, expanded on read.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    /// Output field that receives the expanded value.
    pub path: &'static str,
    pub collection: &'static str,
    pub local_field: &'static str,
    pub foreign_field: &'static str,
    /// Whether the output is a list or a single record.
    pub many: bool,
    pub select: Select,
    pub scope: fn() -> Filter,
    pub hidden: &'static [&'static str],
    pub nested: &'static [Relation],
}

#[derive(Debug, Clone, Copy)]
pub enum Select {
    Only(&'static [&'static str]),
    Without(&'static [&'static str]),
}

impl Select {
    pub fn projection(&self, hidden: &[&str]) -> Projection {
        match self {
            Select::Only(fields) => Projection::Include(
                fields
                    .iter()
                    .filter(|f| !hidden.contains(f))
                    .map(|f| f.to_string())
                    .collect(),
            ),
            Select::Without(fields) => Projection::Exclude(
                fields
                    .iter()
                    .chain(hidden.iter())
                    .map(|f| f.to_string())
                    .collect(),
            ),
        }
    }
}

/// State handed to lifecycle hooks for one save.
#[derive(Debug, Clone)]
pub struct SaveContext {
    pub is_new: bool,
    pub modified: Vec<String>,
    pub now: DateTime,
    pub bcrypt_cost: u32,
}

impl SaveContext {
    pub fn new(is_new: bool, modified: Vec<String>, options: &SaveOptions) -> Self {
        SaveContext {
            is_new,
            modified,
            now: DateTime::now(),
            bcrypt_cost: options.bcrypt_cost,
        }
    }

    pub fn is_modified(&self, field: &str) -> bool {
        self.is_new || self.modified.iter().any(|m| m == field)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    pub bcrypt_cost: u32,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// A stored entity served by the generic handlers.
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + Sized {
    const COLLECTION: &'static str;

    fn id(&self) -> Option<ObjectId>;

    fn rules() -> &'static [FieldRule];

    /// Predicate ANDed into every read of this resource.
    fn default_filter() -> Filter {
        Filter::new()
    }

    /// Fields never returned to clients.
    fn hidden_fields() -> &'static [&'static str] {
        &[]
    }

    /// Relations expanded on every read.
    fn populate() -> &'static [Relation] {
        &[]
    }

    /// Relation expanded only when a single record is fetched.
    fn detail_relation() -> Option<&'static Relation> {
        None
    }

    fn delete_mode() -> DeleteMode {
        DeleteMode::Remove
    }

    /// Rejects patches the generic update path must not apply.
    fn check_update(_patch: &Document) -> Result<(), AppError> {
        Ok(())
    }

    /// Cross-field checks run after the rule table.
    fn validate(&self, _ctx: &SaveContext) -> Result<(), ValidationErrors> {
        Ok(())
    }

    fn before_save(&mut self, _ctx: &SaveContext) -> Result<(), AppError> {
        Ok(())
    }

    /// Adds derived output fields.
    fn decorate(_doc: &mut Document) {}

    /// Runs after a record is written or deleted. `previous` is the stored state an update
    /// replaced.
    #[allow(async_fn_in_trait)]
    async fn after_write(
        _store: &dyn DocumentStore,
        _record: &Self,
        _previous: Option<&Self>,
    ) -> Result<(), AppError> {
        Ok(())
    }
}
