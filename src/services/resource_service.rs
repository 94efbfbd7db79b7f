//! List, get, create, update and delete for any [`Resource`].

use bson::{oid::ObjectId, Bson, Document};
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;

use crate::db::convert::document_to_json;
use crate::db::query::{Filter, Projection};
use crate::db::{Changes, DocumentStore, FindSpec};
use crate::error::AppError;
use crate::models::resource::{DeleteMode, Relation, Resource, SaveContext, SaveOptions};
use crate::services::query_builder::{build_list_query, hide_fields, QueryParams};
use crate::services::validation::{
    find_rule, strip_internal, validate_document, Mode, ValidationErrors, VERSION_FIELD,
};

pub fn parse_id(raw: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(raw.trim())
        .map_err(|_| ValidationErrors::single("_id", format!("Invalid _id: {raw}")).into())
}

fn to_record<R: Resource>(doc: Document) -> Result<R, AppError> {
    bson::from_document(doc)
        .map_err(|e| AppError::Internal(format!("unreadable {} record: {e}", R::COLLECTION)))
}

fn to_document<R: Resource>(record: &R) -> Result<Document, AppError> {
    bson::to_document(record)
        .map_err(|e| AppError::Internal(format!("unwritable {} record: {e}", R::COLLECTION)))
}

fn default_projection<R: Resource>() -> Projection {
    hide_fields(
        Projection::Exclude(vec![VERSION_FIELD.to_string()]),
        R::hidden_fields(),
    )
}

/// Records matching the query string, narrowed by `scope` and the default-read predicate.
pub async fn list<R: Resource>(
    store: &dyn DocumentStore,
    params: &QueryParams,
    scope: Filter,
) -> Result<Vec<Value>, AppError> {
    let query = build_list_query(params, R::rules())?.hiding(R::hidden_fields());
    let spec = query.into_find_spec(R::default_filter().and(scope));
    let docs = store.find(R::COLLECTION, &spec).await?;

    let mut records = Vec::with_capacity(docs.len());
    for doc in docs {
        records.push(render::<R>(store, doc, false).await?);
    }
    Ok(records)
}

pub async fn get_one<R: Resource>(store: &dyn DocumentStore, id: &str) -> Result<Value, AppError> {
    let id = parse_id(id)?;
    let doc = store
        .find_by_id(
            R::COLLECTION,
            id,
            &R::default_filter(),
            Some(&default_projection::<R>()),
        )
        .await?
        .ok_or_else(AppError::not_found)?;
    render::<R>(store, doc, true).await
}

/// Live record matching `filter`, with every stored field.
pub async fn find_live<R: Resource>(
    store: &dyn DocumentStore,
    filter: Filter,
) -> Result<Option<R>, AppError> {
    store
        .find_one(R::COLLECTION, &filter.and(R::default_filter()), None)
        .await?
        .map(to_record::<R>)
        .transpose()
}

pub async fn create<R: Resource>(
    store: &dyn DocumentStore,
    mut payload: Document,
    options: &SaveOptions,
) -> Result<R, AppError> {
    strip_internal(&mut payload, R::rules());
    validate_document(&mut payload, R::rules(), Mode::Create)?;

    let mut record: R = to_record(payload)?;
    let ctx = SaveContext::new(true, Vec::new(), options);
    record.validate(&ctx)?;
    record.before_save(&ctx)?;

    let mut doc = to_document(&record)?;
    let id = ObjectId::new();
    doc.insert("_id", id);
    store.insert(R::COLLECTION, doc.clone()).await?;
    log::info!("Created {} {}", R::COLLECTION, id);

    let record: R = to_record(doc)?;
    R::after_write(store, &record, None).await?;
    Ok(record)
}

/// Merges `patch` onto the live record, re-validates the whole record and saves it.
/// `null` values remove the field.
pub async fn update<R: Resource>(
    store: &dyn DocumentStore,
    id: &str,
    mut patch: Document,
    options: &SaveOptions,
) -> Result<R, AppError> {
    let id = parse_id(id)?;
    R::check_update(&patch)?;
    strip_internal(&mut patch, R::rules());

    let current = store
        .find_by_id(R::COLLECTION, id, &R::default_filter(), None)
        .await?
        .ok_or_else(AppError::not_found)?;

    let mut merged = current.clone();
    let mut modified = Vec::new();
    for (key, value) in patch {
        if find_rule(R::rules(), &key).is_none() {
            continue;
        }
        modified.push(key.clone());
        match value {
            Bson::Null => {
                merged.remove(&key);
            }
            value => {
                merged.insert(key, value);
            }
        }
    }

    validate_document(&mut merged, R::rules(), Mode::Update)?;
    let record: R = to_record(merged)?;
    save(store, record, &current, SaveContext::new(false, modified, options)).await
}

/// Saves a record loaded and changed by a service, running the same checks and hooks as
/// [`update`]. `modified` names the fields the caller changed.
pub async fn save_existing<R: Resource>(
    store: &dyn DocumentStore,
    record: R,
    modified: &[&str],
    options: &SaveOptions,
) -> Result<R, AppError> {
    let id = record
        .id()
        .ok_or_else(|| AppError::Internal(format!("{} record has no _id", R::COLLECTION)))?;
    let current = store
        .find_by_id(R::COLLECTION, id, &Filter::new(), None)
        .await?
        .ok_or_else(AppError::not_found)?;

    let mut doc = to_document(&record)?;
    validate_document(&mut doc, R::rules(), Mode::Update)?;
    let record: R = to_record(doc)?;

    let modified = modified.iter().map(|m| m.to_string()).collect();
    save(store, record, &current, SaveContext::new(false, modified, options)).await
}

async fn save<R: Resource>(
    store: &dyn DocumentStore,
    mut record: R,
    current: &Document,
    ctx: SaveContext,
) -> Result<R, AppError> {
    record.validate(&ctx)?;
    record.before_save(&ctx)?;

    let id = record
        .id()
        .ok_or_else(|| AppError::Internal(format!("{} record has no _id", R::COLLECTION)))?;
    let mut set = to_document(&record)?;
    set.remove("_id");
    let unset = current
        .keys()
        .filter(|key| *key != "_id" && !set.contains_key(key.as_str()))
        .cloned()
        .collect();

    let changes = Changes { set, unset };
    if !store
        .update_by_id(R::COLLECTION, id, &Filter::new(), &changes)
        .await?
    {
        return Err(AppError::not_found());
    }
    log::info!("Updated {} {}", R::COLLECTION, id);

    let previous: R = to_record(current.clone())?;
    R::after_write(store, &record, Some(&previous)).await?;
    Ok(record)
}

pub async fn delete<R: Resource>(store: &dyn DocumentStore, id: &str) -> Result<(), AppError> {
    let id = parse_id(id)?;
    let scope = R::default_filter();
    let current = store
        .find_by_id(R::COLLECTION, id, &scope, None)
        .await?
        .ok_or_else(AppError::not_found)?;
    let record: R = to_record(current)?;

    let done = match R::delete_mode() {
        DeleteMode::Remove => store.delete_by_id(R::COLLECTION, id, &scope).await?,
        DeleteMode::SoftMark { field, value } => {
            let mut set = Document::new();
            set.insert(field, value);
            store
                .update_by_id(R::COLLECTION, id, &scope, &Changes::set(set))
                .await?
        }
    };
    if !done {
        return Err(AppError::not_found());
    }
    log::info!("Deleted {} {}", R::COLLECTION, id);

    R::after_write(store, &record, None).await?;
    Ok(())
}

/// Output form of a record fresh from a write.
pub async fn present<R: Resource>(store: &dyn DocumentStore, record: &R) -> Result<Value, AppError> {
    let mut doc = to_document(record)?;
    doc.remove(VERSION_FIELD);
    render::<R>(store, doc, false).await
}

async fn render<R: Resource>(
    store: &dyn DocumentStore,
    mut doc: Document,
    detail: bool,
) -> Result<Value, AppError> {
    for field in R::hidden_fields() {
        doc.remove(*field);
    }
    expand(store, &mut doc, R::populate()).await?;
    if detail {
        if let Some(relation) = R::detail_relation() {
            expand_relation(store, &mut doc, relation).await?;
        }
    }
    R::decorate(&mut doc);
    Ok(document_to_json(doc))
}

fn expand<'a>(
    store: &'a dyn DocumentStore,
    doc: &'a mut Document,
    relations: &'static [Relation],
) -> LocalBoxFuture<'a, Result<(), AppError>> {
    async move {
        for relation in relations {
            expand_relation(store, doc, relation).await?;
        }
        Ok(())
    }
    .boxed_local()
}

/// Replaces the reference stored in `relation.local_field` with the referenced records.
async fn expand_relation(
    store: &dyn DocumentStore,
    doc: &mut Document,
    relation: &'static Relation,
) -> Result<(), AppError> {
    let keys = match doc.get(relation.local_field) {
        None | Some(Bson::Null) => return Ok(()),
        Some(Bson::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
    };

    let spec = FindSpec {
        filter: Filter::new()
            .is_in(relation.foreign_field, keys.clone())
            .and((relation.scope)()),
        projection: Some(relation.select.projection(relation.hidden)),
        ..FindSpec::default()
    };
    let mut related = store.find(relation.collection, &spec).await?;
    for item in &mut related {
        for field in relation.hidden {
            item.remove(*field);
        }
        expand(store, item, relation.nested).await?;
    }

    let value = if !relation.many {
        related
            .into_iter()
            .next()
            .map(Bson::Document)
            .unwrap_or(Bson::Null)
    } else if relation.foreign_field == "_id" {
        keys.iter()
            .filter_map(|key| related.iter().find(|d| d.get("_id") == Some(key)))
            .cloned()
            .map(Bson::Document)
            .collect::<Vec<Bson>>()
            .into()
    } else {
        related
            .into_iter()
            .map(Bson::Document)
            .collect::<Vec<Bson>>()
            .into()
    };
    doc.insert(relation.path, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Review, Tour, User, UNIQUE_INDEXES};
    use bson::doc;
    use serde_json::json;

    const OPTIONS: SaveOptions = SaveOptions { bcrypt_cost: 4 };

    fn tour_payload(name: &str, duration: i32, price: i32) -> Document {
        doc! {
            "name": name,
            "duration": duration,
            "price": price,
            "summary": "A tour",
            "imageCover": "cover.jpg",
        }
    }

    #[actix_rt::test]
    async fn test_create_then_get_round_trips_fields() {
        let store = MemoryStore::with_unique_indexes(UNIQUE_INDEXES);
        let tour: Tour = create(&store, tour_payload("The Forest Hiker", 5, 397), &OPTIONS)
            .await
            .unwrap();
        let id = tour.id.unwrap().to_hex();

        let value = get_one::<Tour>(&store, &id).await.unwrap();
        assert_eq!(value["name"], "The Forest Hiker");
        assert_eq!(value["duration"], 5);
        assert_eq!(value["price"], 397);
        assert_eq!(value["slug"], "the-forest-hiker");
        assert_eq!(value["reviews"], json!([]));
        assert!(value.get("__v").is_none());
    }

    #[actix_rt::test]
    async fn test_duplicate_name_is_rejected() {
        let store = MemoryStore::with_unique_indexes(UNIQUE_INDEXES);
        create::<Tour>(&store, tour_payload("The Forest Hiker", 5, 397), &OPTIONS)
            .await
            .unwrap();
        let err = create::<Tour>(&store, tour_payload("The Forest Hiker", 7, 500), &OPTIONS)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey(_)));
    }

    #[actix_rt::test]
    async fn test_missing_required_field_persists_nothing() {
        let store = MemoryStore::new();
        let mut payload = tour_payload("The Forest Hiker", 5, 397);
        payload.remove("price");
        let err = create::<Tour>(&store, payload, &OPTIONS).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.raw("tours").await.is_empty());
    }

    #[actix_rt::test]
    async fn test_update_revalidates_merged_record() {
        let store = MemoryStore::new();
        let tour: Tour = create(&store, tour_payload("The Forest Hiker", 5, 397), &OPTIONS)
            .await
            .unwrap();
        let id = tour.id.unwrap().to_hex();

        let err = update::<Tour>(&store, &id, doc! { "priceDiscount": 400 }, &OPTIONS)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let updated: Tour = update(
            &store,
            &id,
            doc! { "name": "The Forest Walker", "priceDiscount": 100 },
            &OPTIONS,
        )
        .await
        .unwrap();
        assert_eq!(updated.slug.as_deref(), Some("the-forest-walker"));
        assert_eq!(updated.price_discount, Some(100.0));
    }

    #[actix_rt::test]
    async fn test_secret_tours_are_hidden_from_reads() {
        let store = MemoryStore::new();
        let mut payload = tour_payload("The Secret Garden", 5, 397);
        payload.insert("secretTour", true);
        let tour: Tour = create(&store, payload, &OPTIONS).await.unwrap();
        let id = tour.id.unwrap().to_hex();

        assert!(matches!(
            get_one::<Tour>(&store, &id).await,
            Err(AppError::NotFound(_))
        ));
        let listed = list::<Tour>(&store, &QueryParams::default(), Filter::new())
            .await
            .unwrap();
        assert!(listed.is_empty());
        assert_eq!(store.raw("tours").await.len(), 1);
    }

    #[actix_rt::test]
    async fn test_user_delete_is_soft() {
        let store = MemoryStore::new();
        let user: User = create(
            &store,
            doc! {
                "name": "Ada",
                "email": "ada@example.com",
                "password": "pass1234",
                "passwordConfirm": "pass1234",
            },
            &OPTIONS,
        )
        .await
        .unwrap();
        let id = user.id.unwrap().to_hex();

        delete::<User>(&store, &id).await.unwrap();
        assert!(matches!(
            get_one::<User>(&store, &id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            delete::<User>(&store, &id).await,
            Err(AppError::NotFound(_))
        ));
        let raw = store.raw("users").await;
        assert!(!raw[0].get_bool("active").unwrap());
    }

    #[actix_rt::test]
    async fn test_reviews_expand_user_and_refresh_tour() {
        let store = MemoryStore::new();
        let tour: Tour = create(&store, tour_payload("The Forest Hiker", 5, 397), &OPTIONS)
            .await
            .unwrap();
        let user: User = create(
            &store,
            doc! {
                "name": "Ada",
                "email": "ada@example.com",
                "password": "pass1234",
                "passwordConfirm": "pass1234",
            },
            &OPTIONS,
        )
        .await
        .unwrap();

        let review: Review = create(
            &store,
            doc! {
                "review": "Lovely",
                "rating": 4,
                "tour": tour.id.unwrap(),
                "user": user.id.unwrap(),
            },
            &OPTIONS,
        )
        .await
        .unwrap();

        let value = present::<Review>(&store, &review).await.unwrap();
        assert_eq!(
            value["user"],
            json!({ "_id": user.id.unwrap().to_hex(), "name": "Ada", "photo": "default.jpg" })
        );

        let tour = get_one::<Tour>(&store, &tour.id.unwrap().to_hex())
            .await
            .unwrap();
        assert_eq!(tour["ratingsQuantity"], 1);
        assert_eq!(tour["ratingsAverage"], 4);
        assert_eq!(tour["reviews"][0]["user"]["name"], "Ada");
    }

    #[actix_rt::test]
    async fn test_malformed_id_is_validation_error() {
        let store = MemoryStore::new();
        let err = get_one::<Tour>(&store, "not-an-id").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid input data. Invalid _id: not-an-id");
    }
}
