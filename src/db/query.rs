//! Typed query values shared by every store.
//!
//! Filters, sort keys, projections and aggregation stages are built as plain Rust
//! values and rendered to BSON only at the MongoDB boundary. The in-memory store
//! evaluates the same values directly, so both backends agree on semantics.

use std::cmp::Ordering;

use bson::{oid::ObjectId, Bson, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl Op {
    /// Maps a bracket suffix from a query string (`price[gte]`) to a comparison.
    pub fn from_suffix(suffix: &str) -> Option<Op> {
        match suffix {
            "gte" => Some(Op::Gte),
            "gt" => Some(Op::Gt),
            "lte" => Some(Op::Lte),
            "lt" => Some(Op::Lt),
            _ => None,
        }
    }

    fn operator(self) -> &'static str {
        match self {
            Op::Eq => "$eq",
            Op::Ne => "$ne",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::In => "$in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Bson,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Op, value: impl Into<Bson>) -> Self {
        Condition {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    fn to_document(&self) -> Document {
        let mut operator = Document::new();
        operator.insert(self.op.operator(), self.value.clone());
        let mut doc = Document::new();
        doc.insert(self.field.clone(), operator);
        doc
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let actual = lookup(doc, &self.field);
        match self.op {
            Op::Eq => equals_any(actual, &self.value),
            Op::Ne => !equals_any(actual, &self.value),
            Op::In => match &self.value {
                Bson::Array(candidates) => candidates.iter().any(|c| equals_any(actual, c)),
                other => equals_any(actual, other),
            },
            Op::Gt | Op::Gte | Op::Lt | Op::Lte => {
                let Some(actual) = actual else {
                    return false;
                };
                let accepts = |ordering: Ordering| match self.op {
                    Op::Gt => ordering == Ordering::Greater,
                    Op::Gte => ordering != Ordering::Less,
                    Op::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                };
                match actual {
                    Bson::Array(items) => items
                        .iter()
                        .any(|item| compare_values(item, &self.value).is_some_and(accepts)),
                    value => compare_values(value, &self.value).is_some_and(accepts),
                }
            }
        }
    }
}

/// A conjunction of conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn id(id: ObjectId) -> Self {
        Filter::new().eq("_id", id)
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Condition::new(field, Op::Eq, value))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Condition::new(field, Op::Ne, value))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Condition::new(field, Op::Gt, value))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Condition::new(field, Op::Gte, value))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Condition::new(field, Op::Lt, value))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with(Condition::new(field, Op::Lte, value))
    }

    pub fn is_in(self, field: impl Into<String>, values: Vec<Bson>) -> Self {
        self.with(Condition::new(field, Op::In, Bson::Array(values)))
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    /// ANDs another filter into this one.
    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn to_document(&self) -> Document {
        match self.conditions.as_slice() {
            [] => Document::new(),
            [single] => single.to_document(),
            many => {
                let clauses: Vec<Bson> = many
                    .iter()
                    .map(|c| Bson::Document(c.to_document()))
                    .collect();
                let mut doc = Document::new();
                doc.insert("$and", clauses);
                doc
            }
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortKey {
            field: field.into(),
            descending: true,
        }
    }
}

/// Sort keys in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort(pub Vec<SortKey>);

impl Sort {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        for key in &self.0 {
            doc.insert(key.field.clone(), if key.descending { -1 } else { 1 });
        }
        doc
    }

    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.0 {
            let ordering = sort_order(lookup(a, &key.field), lookup(b, &key.field));
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn to_document(&self) -> Document {
        let (fields, flag) = match self {
            Projection::Include(fields) => (fields, 1),
            Projection::Exclude(fields) => (fields, 0),
        };
        let mut doc = Document::new();
        for field in fields {
            doc.insert(field.clone(), flag);
        }
        doc
    }

    /// Applies the projection to top-level fields. Inclusion keeps `_id`.
    pub fn apply(&self, doc: Document) -> Document {
        match self {
            Projection::Include(fields) => doc
                .into_iter()
                .filter(|(key, _)| key == "_id" || fields.iter().any(|f| top_level(f) == key))
                .collect(),
            Projection::Exclude(fields) => doc
                .into_iter()
                .filter(|(key, _)| !fields.iter().any(|f| f == key))
                .collect(),
        }
    }
}

fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Field(String),
    /// Calendar month (1-12, UTC) of a date field.
    Month(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    Push(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Unwind(String),
    Group {
        key: GroupKey,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(Sort),
    /// Copies source fields to new names: `(target, source)`.
    AddFields(Vec<(String, String)>),
    Project(Projection),
    Limit(i64),
}

fn field_ref(field: &str) -> Bson {
    Bson::String(format!("${field}"))
}

fn single(key: &str, value: impl Into<Bson>) -> Document {
    let mut doc = Document::new();
    doc.insert(key, value.into());
    doc
}

impl Stage {
    pub fn to_document(&self) -> Document {
        match self {
            Stage::Match(filter) => single("$match", filter.to_document()),
            Stage::Unwind(field) => single("$unwind", field_ref(field)),
            Stage::Group { key, accumulators } => {
                let mut group = Document::new();
                let id = match key {
                    GroupKey::Field(field) => field_ref(field),
                    GroupKey::Month(field) => Bson::Document(single("$month", field_ref(field))),
                };
                group.insert("_id", id);
                for (name, accumulator) in accumulators {
                    let expr = match accumulator {
                        Accumulator::Count => single("$sum", 1),
                        Accumulator::Sum(f) => single("$sum", field_ref(f)),
                        Accumulator::Avg(f) => single("$avg", field_ref(f)),
                        Accumulator::Min(f) => single("$min", field_ref(f)),
                        Accumulator::Max(f) => single("$max", field_ref(f)),
                        Accumulator::Push(f) => single("$push", field_ref(f)),
                    };
                    group.insert(name.clone(), expr);
                }
                single("$group", group)
            }
            Stage::Sort(sort) => single("$sort", sort.to_document()),
            Stage::AddFields(fields) => {
                let mut added = Document::new();
                for (target, source) in fields {
                    added.insert(target.clone(), field_ref(source));
                }
                single("$addFields", added)
            }
            Stage::Project(projection) => single("$project", projection.to_document()),
            Stage::Limit(n) => single("$limit", *n),
        }
    }
}

pub fn pipeline_documents(stages: &[Stage]) -> Vec<Document> {
    stages.iter().map(Stage::to_document).collect()
}

/// Resolves a dotted path through nested documents.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Orders two values of the same kind; `None` when they are not comparable.
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn equals_any(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

/// Total order used for sorting: missing and null first, then by type, then by value.
pub fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
