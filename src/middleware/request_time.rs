use std::future::{ready, Ready};

use actix_web::{
    body::MessageBody,
    dev::{Payload, ServiceRequest, ServiceResponse},
    middleware::Next,
    Error, FromRequest, HttpMessage, HttpRequest,
};
use chrono::{DateTime, SecondsFormat, Utc};

/// When the server received the request.
#[derive(Debug, Clone, Copy)]
pub struct RequestTime(pub DateTime<Utc>);

impl RequestTime {
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Stamps every request with its arrival time.
pub async fn stamp_request_time(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    req.extensions_mut().insert(RequestTime(Utc::now()));
    next.call(req).await
}

impl FromRequest for RequestTime {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let stamped = req.extensions().get::<RequestTime>().copied();
        ready(Ok(stamped.unwrap_or_else(|| RequestTime(Utc::now()))))
    }
}
