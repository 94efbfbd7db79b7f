#![allow(dead_code)]

use std::sync::Arc;

use actix_web::{
    body::MessageBody,
    dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse},
    web, App, Error,
};
use bson::{doc, oid::ObjectId};
use serde_json::{json, Value};

use tours_api::app::{build_app, AppState};
use tours_api::config::Settings;
use tours_api::db::convert::json_to_document;
use tours_api::db::{MemoryStore, Store};
use tours_api::models::{Review, Role, Tour, User, UNIQUE_INDEXES};
use tours_api::services::{auth_service, resource_service};

pub const TEST_PASSWORD: &str = "test1234";

pub fn test_settings() -> Settings {
    let mut settings = Settings::new("integration-test-secret");
    settings.auth.bcrypt_cost = 4;
    settings
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: web::Data<AppState>,
}

impl TestApp {
    pub fn new() -> Self {
        TestApp::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let store = Arc::new(MemoryStore::with_unique_indexes(UNIQUE_INDEXES));
        let shared: Store = store.clone();
        TestApp {
            store,
            state: web::Data::new(AppState::new(shared, settings)),
        }
    }

    pub fn create_app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody>,
            Error = Error,
            InitError = (),
        >,
    > {
        // The HTTP dispatcher turns a service error into its error response;
        // `test::call_service` panics instead, so mirror the dispatcher here.
        build_app(self.state.clone()).wrap_fn(|req, srv| {
            let fut = srv.call(req);
            async move {
                match fut.await {
                    Ok(res) => Ok(res.map_into_boxed_body()),
                    Err(err) => Ok(ServiceResponse::new(
                        actix_web::test::TestRequest::default().to_http_request(),
                        err.error_response(),
                    )),
                }
            }
        })
    }

    /// Stores a user with `role` and returns it with a session token.
    pub async fn insert_user(&self, name: &str, email: &str, role: Role) -> (User, String) {
        let payload = doc! {
            "name": name,
            "email": email,
            "role": role.as_str(),
            "password": TEST_PASSWORD,
            "passwordConfirm": TEST_PASSWORD,
        };
        let user: User = resource_service::create(
            self.store.as_ref(),
            payload,
            &self.state.settings.save_options(),
        )
        .await
        .expect("user is stored");
        let token = auth_service::generate_token(&self.state.settings.auth, &user)
            .expect("token is signed");
        (user, token)
    }

    pub async fn insert_tour(&self, payload: Value) -> ObjectId {
        let payload = json_to_document(payload).expect("tour payload is an object");
        let tour: Tour = resource_service::create(
            self.store.as_ref(),
            payload,
            &self.state.settings.save_options(),
        )
        .await
        .expect("tour is stored");
        tour.id.expect("stored tour has an id")
    }

    pub async fn insert_review(&self, tour: ObjectId, user: ObjectId, rating: f64) -> ObjectId {
        let payload = doc! {
            "review": "Loved every minute of it",
            "rating": rating,
            "tour": tour,
            "user": user,
        };
        let review: Review = resource_service::create(
            self.store.as_ref(),
            payload,
            &self.state.settings.save_options(),
        )
        .await
        .expect("review is stored");
        review.id.expect("stored review has an id")
    }
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

/// A valid tour body; `extra` fields override the defaults.
pub fn tour_payload(name: &str, extra: Value) -> Value {
    let mut tour = json!({
        "name": name,
        "duration": 5,
        "maxGroupSize": 25,
        "difficulty": "easy",
        "price": 397,
        "summary": "Breathtaking hike through the Canadian Banff National Park",
        "imageCover": "tour-1-cover.jpg",
    });
    if let (Some(base), Value::Object(extra)) = (tour.as_object_mut(), extra) {
        base.extend(extra);
    }
    tour
}
