mod common;

use actix_web::{http::StatusCode, test};
use serde_json::{json, Value};

use common::{bearer, tour_payload, TestApp};
use tours_api::models::Role;

fn durations_and_prices(body: &Value) -> Vec<(i64, i64)> {
    body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| (t["duration"].as_i64().unwrap(), t["price"].as_i64().unwrap()))
        .collect()
}

#[actix_rt::test]
async fn test_list_filters_sorts_and_paginates() {
    let test_app = TestApp::new();
    for (name, duration, price) in [
        ("The Forest Hiker", 5, 100),
        ("The Sea Explorer", 7, 300),
        ("The Snow Adventurer", 10, 50),
    ] {
        test_app
            .insert_tour(tour_payload(name, json!({ "duration": duration, "price": price })))
            .await;
    }
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/tours?duration%5Bgte%5D=5&sort=-price&limit=2&page=1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["results"], 2);
    assert!(body["requestedAt"].is_string());
    assert_eq!(durations_and_prices(&body), vec![(7, 300), (5, 100)]);

    let req = test::TestRequest::get()
        .uri("/api/v1/tours?duration%5Bgte%5D=5&sort=-price&limit=2&page=3")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["results"], 0);
}

#[actix_rt::test]
async fn test_list_field_selection_hides_version() {
    let test_app = TestApp::new();
    test_app.insert_tour(tour_payload("The Forest Hiker", json!({}))).await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get().uri("/api/v1/tours").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let tour = &body["data"]["data"][0];
    assert!(tour.get("__v").is_none());
    assert_eq!(tour["slug"], "the-forest-hiker");
    assert_eq!(tour["durationWeeks"], json!(5.0 / 7.0));

    let req = test::TestRequest::get()
        .uri("/api/v1/tours?fields=name,price")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let tour = body["data"]["data"][0].as_object().unwrap();
    let mut keys: Vec<&str> = tour.keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(keys, vec!["_id", "name", "price"]);
}

#[actix_rt::test]
async fn test_invalid_pagination_is_rejected() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/tours?page=0")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "fail");
}

#[actix_rt::test]
async fn test_secret_tours_are_hidden_but_stored() {
    let test_app = TestApp::new();
    let secret = test_app
        .insert_tour(tour_payload("The Secret Hideaway", json!({ "secretTour": true })))
        .await;
    test_app.insert_tour(tour_payload("The Forest Hiker", json!({}))).await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get().uri("/api/v1/tours").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["results"], 1);
    assert_eq!(body["data"]["data"][0]["name"], "The Forest Hiker");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/tours/{}", secret.to_hex()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    assert_eq!(test_app.store.raw("tours").await.len(), 2);
}

#[actix_rt::test]
async fn test_top_five_cheap_alias() {
    let test_app = TestApp::new();
    for (i, rating) in [4.9, 4.2, 4.8, 4.7, 4.6, 4.5].iter().enumerate() {
        test_app
            .insert_tour(tour_payload(
                &format!("The Alias Tour Number {i}"),
                json!({ "ratingsAverage": rating, "price": 100 + i }),
            ))
            .await;
    }
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/tours/top-5-cheap")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["results"], 5);

    let ratings: Vec<f64> = body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["ratingsAverage"].as_f64().unwrap())
        .collect();
    assert_eq!(ratings, vec![4.9, 4.8, 4.7, 4.6, 4.5]);
    assert!(body["data"]["data"][0].get("imageCover").is_none());
}

#[actix_rt::test]
async fn test_get_tour_expands_guides_and_reviews() {
    let test_app = TestApp::new();
    let (guide, _) = test_app
        .insert_user("Lourdes Browning", "guide@example.io", Role::Guide)
        .await;
    let (reviewer, _) = test_app
        .insert_user("Sophie Hale", "sophie@example.io", Role::User)
        .await;
    let guide_id = guide.id.unwrap();
    let tour = test_app
        .insert_tour(tour_payload(
            "The Forest Hiker",
            json!({ "guides": [guide_id.to_hex()] }),
        ))
        .await;
    test_app.insert_review(tour, reviewer.id.unwrap(), 4.0).await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/tours/{}", tour.to_hex()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    let data = &body["data"]["data"];
    assert_eq!(data["guides"][0]["name"], "Lourdes Browning");
    assert_eq!(data["guides"][0]["role"], "guide");
    assert!(data["guides"][0].get("password").is_none());
    assert!(data["guides"][0].get("passwordChangedAt").is_none());

    assert_eq!(data["reviews"].as_array().unwrap().len(), 1);
    assert_eq!(data["reviews"][0]["user"]["name"], "Sophie Hale");
    assert_eq!(data["ratingsQuantity"], 1);
    assert_eq!(data["ratingsAverage"], 4);
}

#[actix_rt::test]
async fn test_malformed_id_is_a_validation_error() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/tours/not-an-id")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Invalid input data. Invalid _id: not-an-id");
}

#[actix_rt::test]
async fn test_create_requires_editor_role() {
    let test_app = TestApp::new();
    let (_, user_token) = test_app
        .insert_user("Regular User", "user@example.io", Role::User)
        .await;
    let (_, lead_token) = test_app
        .insert_user("Lead Guide", "lead@example.io", Role::LeadGuide)
        .await;
    let app = test::init_service(test_app.create_app()).await;
    let payload = tour_payload("The Northern Lights", json!({}));

    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .set_json(&payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .insert_header(bearer(&user_token))
        .set_json(&payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .insert_header(bearer(&lead_token))
        .set_json(&payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    let created = &body["data"]["data"];
    assert_eq!(created["name"], "The Northern Lights");
    assert_eq!(created["slug"], "the-northern-lights");
    assert_eq!(created["ratingsAverage"], json!(4.5));
    assert_eq!(created["secretTour"], false);
}

#[actix_rt::test]
async fn test_create_validation_and_duplicates() {
    let test_app = TestApp::new();
    let (_, token) = test_app
        .insert_user("Admin User", "admin@example.io", Role::Admin)
        .await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "The Missing Fields" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"duration"));
    assert!(fields.contains(&"price"));
    assert!(test_app.store.raw("tours").await.is_empty());

    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .insert_header(bearer(&token))
        .set_json(tour_payload("The Discounted Trip", json!({ "priceDiscount": 500 })))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let payload = tour_payload("The Forest Hiker", json!({}));
    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .insert_header(bearer(&token))
        .set_json(&payload)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::post()
        .uri("/api/v1/tours")
        .insert_header(bearer(&token))
        .set_json(&payload)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
}

#[actix_rt::test]
async fn test_update_and_delete_tour() {
    let test_app = TestApp::new();
    let (_, token) = test_app
        .insert_user("Admin User", "admin@example.io", Role::Admin)
        .await;
    let tour = test_app.insert_tour(tour_payload("The Forest Hiker", json!({}))).await;
    let app = test::init_service(test_app.create_app()).await;
    let uri = format!("/api/v1/tours/{}", tour.to_hex());

    let req = test::TestRequest::patch()
        .uri(&uri)
        .insert_header(bearer(&token))
        .set_json(json!({ "name": "The Forest Wanderer", "price": 450 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["data"]["slug"], "the-forest-wanderer");
    assert_eq!(body["data"]["data"]["price"], 450);
    assert_eq!(body["data"]["data"]["duration"], 5);

    let req = test::TestRequest::patch()
        .uri(&uri)
        .insert_header(bearer(&token))
        .set_json(json!({ "priceDiscount": 1000 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(bearer(&token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get().uri(&uri).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::delete()
        .uri(&uri)
        .insert_header(bearer(&token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_tour_stats_and_monthly_plan() {
    let test_app = TestApp::new();
    test_app
        .insert_tour(tour_payload(
            "The Sea Explorer",
            json!({
                "difficulty": "medium",
                "price": 497,
                "ratingsAverage": 4.8,
                "startDates": ["2021-06-19T09:00:00.000Z", "2021-07-20T09:00:00.000Z"],
            }),
        ))
        .await;
    test_app
        .insert_tour(tour_payload(
            "The Forest Hiker",
            json!({ "ratingsAverage": 4.7, "startDates": ["2021-07-20T09:00:00.000Z"] }),
        ))
        .await;
    let (_, user_token) = test_app
        .insert_user("Regular User", "user@example.io", Role::User)
        .await;
    let (_, guide_token) = test_app
        .insert_user("Tour Guide", "guide@example.io", Role::Guide)
        .await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/tours/tour-stats")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let stats = body["data"]["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["_id"], "medium");
    assert_eq!(stats[0]["maxPrice"], 497);

    let req = test::TestRequest::get()
        .uri("/api/v1/tours/monthly-plan/2021")
        .insert_header(bearer(&user_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/v1/tours/monthly-plan/2021")
        .insert_header(bearer(&guide_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["results"], 2);
    assert_eq!(body["data"]["plan"][0]["month"], 7);
    assert_eq!(body["data"]["plan"][0]["numTourStarts"], 2);

    let req = test::TestRequest::get()
        .uri("/api/v1/tours/monthly-plan/soon")
        .insert_header(bearer(&guide_token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}
