mod common;

use std::time::Duration;

use actix_web::{http::StatusCode, test};
use serde_json::{json, Value};

use common::{bearer, test_settings, tour_payload, TestApp};
use tours_api::models::Role;

#[actix_rt::test]
async fn test_health_reports_database() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["services"]["database"]["status"], "ok");
}

#[actix_rt::test]
async fn test_unknown_routes_are_not_found() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    for uri in ["/api/v1/bookings", "/nowhere"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "fail");
        assert_eq!(body["message"], format!("Can't find {uri} on this server!"));
    }
}

#[actix_rt::test]
async fn test_security_headers_are_set() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get().uri("/api/v1/tours").to_request();
    let resp = test::call_service(&app, req).await;
    let headers = resp.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
    assert!(headers.contains_key("strict-transport-security"));
}

#[actix_rt::test]
async fn test_api_is_rate_limited() {
    let mut settings = test_settings();
    settings.rate_limit.max_requests = 3;
    settings.rate_limit.window = Duration::from_secs(3600);
    let test_app = TestApp::with_settings(settings);
    let app = test::init_service(test_app.create_app()).await;

    for _ in 0..3 {
        let req = test::TestRequest::get().uri("/api/v1/tours").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    let req = test::TestRequest::get().uri("/api/v1/tours").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body["message"],
        "Too many requests from this IP, please try again in an hour!"
    );

    let req = test::TestRequest::get().uri("/health").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn test_operator_injection_in_login_is_neutralized() {
    let test_app = TestApp::new();
    test_app
        .insert_user("Jonas Schmedtmann", "jonas@example.io", Role::Admin)
        .await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/users/login")
        .set_json(json!({ "email": { "$gt": "" }, "password": "test1234" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn test_operator_injection_in_query_is_ignored() {
    let test_app = TestApp::new();
    test_app.insert_tour(tour_payload("The Forest Hiker", json!({}))).await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/tours?%24where=1&difficulty=easy")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["results"], 1);
}

#[actix_rt::test]
async fn test_markup_in_bodies_is_escaped() {
    let test_app = TestApp::new();
    let (_, token) = test_app
        .insert_user("Admin User", "admin@example.io", Role::Admin)
        .await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .insert_header(bearer(&token))
        .set_json(tour_payload(
            "The <b>Bold</b> Explorer",
            json!({ "summary": "<script>alert('x')</script>" }),
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body["data"]["data"]["summary"],
        "&lt;script&gt;alert('x')&lt;/script&gt;"
    );
}

#[actix_rt::test]
async fn test_parameter_pollution() {
    let test_app = TestApp::new();
    for (name, difficulty, duration) in [
        ("The Forest Hiker", "easy", 5),
        ("The Sea Explorer", "medium", 7),
        ("The Snow Adventurer", "difficult", 9),
    ] {
        test_app
            .insert_tour(tour_payload(
                name,
                json!({ "difficulty": difficulty, "duration": duration }),
            ))
            .await;
    }
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/tours?duration=5&duration=9")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["results"], 2);

    let req = test::TestRequest::get()
        .uri("/api/v1/tours?sort=duration&sort=-duration")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["data"][0]["duration"], 9);
}
