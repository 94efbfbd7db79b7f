use bson::{Bson, Document};
use serde_json::{Map, Number, Value};

/// Largest integer a double represents exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Renders a stored document as API JSON: ObjectIds as hex strings, dates as RFC 3339.
pub fn document_to_json(doc: Document) -> Value {
    Value::Object(
        doc.into_iter()
            .map(|(key, value)| (key, bson_to_json(value)))
            .collect::<Map<String, Value>>(),
    )
}

pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(n) => Value::from(n),
        Bson::Int64(n) => Value::from(n),
        Bson::Double(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER => {
            Value::from(n as i64)
        }
        Bson::Double(n) => Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s),
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(date) => Value::String(
            date.try_to_rfc3339_string()
                .unwrap_or_else(|_| date.timestamp_millis().to_string()),
        ),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => document_to_json(doc),
        other => other.into_relaxed_extjson(),
    }
}

/// Converts a JSON request body into a document; `None` unless the body is an object.
pub fn json_to_document(value: Value) -> Option<Document> {
    match bson::to_bson(&value).ok()? {
        Bson::Document(doc) => Some(doc),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use serde_json::json;

    #[test]
    fn test_document_to_json_flattens_bson_types() {
        let id = ObjectId::new();
        let date = bson::DateTime::parse_rfc3339_str("2021-04-25T09:00:00Z").unwrap();
        let value = document_to_json(doc! {
            "_id": id,
            "price": 497.0,
            "ratingsAverage": 4.8,
            "startDates": [date],
        });
        assert_eq!(
            value,
            json!({
                "_id": id.to_hex(),
                "price": 497,
                "ratingsAverage": 4.8,
                "startDates": ["2021-04-25T09:00:00Z"],
            })
        );
    }

    #[test]
    fn test_json_to_document_requires_object() {
        assert_eq!(
            json_to_document(json!({ "name": "x", "duration": 5 })),
            Some(doc! { "name": "x", "duration": 5_i64 })
        );
        assert_eq!(json_to_document(json!([1, 2])), None);
    }
}
