//! JSON body extractor that strips query operators and escapes markup.

use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use bson::Document;
use futures::future::LocalBoxFuture;
use serde_json::{Map, Value};

use crate::db::convert::json_to_document;
use crate::error::AppError;

/// A request body object with operator keys removed and strings HTML-escaped.
#[derive(Debug, Clone)]
pub struct CleanJson(pub Document);

impl CleanJson {
    pub fn into_inner(self) -> Document {
        self.0
    }
}

/// Keys that would be read as query operators or nested paths.
fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

pub fn escape_html(raw: &str) -> String {
    raw.replace('<', "&lt;").replace('>', "&gt;")
}

pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(escape_html(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(sanitize_object(map)),
        other => other,
    }
}

fn sanitize_object(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(key, _)| {
            let keep = !is_operator_key(key);
            if !keep {
                log::warn!("Dropped operator key from request body: {key}");
            }
            keep
        })
        .map(|(key, value)| (key, sanitize_value(value)))
        .collect()
}

impl FromRequest for CleanJson {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let body = web::Json::<Value>::from_request(req, payload);

        Box::pin(async move {
            let Value::Object(map) = body.await?.into_inner() else {
                return Err(AppError::BadRequest(
                    "Request body must be a JSON object".to_string(),
                )
                .into());
            };
            json_to_document(Value::Object(sanitize_object(map)))
                .map(CleanJson)
                .ok_or_else(|| AppError::BadRequest("Unreadable request body".to_string()).into())
        })
    }
}
