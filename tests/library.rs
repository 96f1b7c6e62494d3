#![allow(clippy::unwrap_used)]

mod common;

use anyhow::Result;
use axum::http::{header::CONTENT_TYPE, Method, StatusCode};
use casetrack::store::LibraryRepository;
use common::{ids, names, TestApp, ADMIN, VIEWER};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn suite_writes_return_the_stored_object() -> Result<()> {
    let app = TestApp::new().await?;
    let product = format!("/api/v1/products/{}/", app.seed.product);

    let created = app
        .send(
            Method::POST,
            "/api/v1/suites/",
            Some(ADMIN),
            Some(json!({"name": "Nightly", "product": product})),
        )
        .await?;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["name"], json!("Nightly"));
    assert_eq!(created.body["status"], json!("draft"));
    assert_eq!(created.body["product"], json!(product));
    let uri = created.body["resource_uri"].as_str().unwrap().to_string();
    let id = created.body["id"].as_i64().unwrap();

    let stored = app.store.begin().await?.suite(id, true).await?.unwrap();
    assert_eq!(stored.created_by, Some(app.seed.admin));
    assert_eq!(stored.modified_by, Some(app.seed.admin));

    tokio::time::sleep(Duration::from_millis(5)).await;
    let updated = app
        .send(
            Method::PUT,
            &uri,
            Some(ADMIN),
            Some(json!({"name": "Nightly", "product": product, "status": "active"})),
        )
        .await?;
    assert_eq!(updated.status, StatusCode::ACCEPTED);
    assert_eq!(updated.body["status"], json!("active"));

    let restamped = app.store.begin().await?.suite(id, true).await?.unwrap();
    assert_eq!(restamped.created_by, Some(app.seed.admin));
    assert_eq!(restamped.modified_by, Some(app.seed.admin));
    assert_eq!(restamped.created_on, stored.created_on);
    assert!(restamped.modified_on > stored.modified_on);
    Ok(())
}

#[tokio::test]
async fn soft_deleted_suite_is_hidden_but_recoverable() -> Result<()> {
    let app = TestApp::new().await?;
    let uri = format!("/api/v1/suites/{}/", app.seed.suite);

    let reply = app
        .send(Method::DELETE, &format!("{uri}?permanent=false"), Some(ADMIN), None)
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.headers.get(CONTENT_TYPE).is_none());

    assert_eq!(app.get(&uri).await?.status, StatusCode::NOT_FOUND);
    let list = app.get("/api/v1/suites/").await?;
    assert_eq!(names(&list.body), vec!["Regression"]);

    let mut tx = app.store.begin().await?;
    let suite = tx.suite(app.seed.suite, true).await?.unwrap();
    assert!(suite.is_deleted());
    assert_eq!(suite.deleted_by, Some(app.seed.admin));
    // Memberships survive a soft delete.
    assert!(tx
        .suitecases()
        .await?
        .iter()
        .any(|membership| membership.suite_id == app.seed.suite));
    Ok(())
}

#[tokio::test]
async fn permanent_delete_removes_the_suite() -> Result<()> {
    let app = TestApp::new().await?;
    let uri = format!("/api/v1/suites/{}/?permanent=true", app.seed.suite);

    let reply = app.send(Method::DELETE, &uri, Some(ADMIN), None).await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.headers.get(CONTENT_TYPE).is_none());

    let mut tx = app.store.begin().await?;
    assert!(tx.suite(app.seed.suite, true).await?.is_none());
    assert!(!tx
        .suitecases()
        .await?
        .iter()
        .any(|membership| membership.suite_id == app.seed.suite));
    Ok(())
}

#[tokio::test]
async fn suite_writes_need_the_suite_permission() -> Result<()> {
    let app = TestApp::new().await?;
    let uri = format!("/api/v1/suites/{}/", app.seed.suite);

    let reply = app.send(Method::DELETE, &uri, Some(VIEWER), None).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(
        reply.body["error"],
        json!("Permission library.manage_suites is required.")
    );

    let reply = app
        .send(Method::DELETE, &uri, Some("ApiKey admin:wrong"), None)
        .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.get(&uri).await?.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn cases_list_their_live_suites() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;

    let created = app
        .send(
            Method::POST,
            "/api/v1/cases/",
            Some(ADMIN),
            Some(json!({
                "product": seed.product,
                "suites": [format!("/api/v1/suites/{}/", seed.other_suite), seed.suite],
            })),
        )
        .await?;
    assert_eq!(created.status, StatusCode::CREATED);

    let filtered = app
        .get(&format!("/api/v1/cases/?suites={}", seed.other_suite))
        .await?;
    assert_eq!(filtered.body["meta"]["total_count"], json!(2));

    let reply = app
        .send(
            Method::DELETE,
            &format!("/api/v1/suites/{}/", seed.other_suite),
            Some(ADMIN),
            None,
        )
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let detail = app
        .get(&format!("/api/v1/cases/{}/", seed.first_case))
        .await?;
    let suites: Vec<&str> = detail.body["suites"]
        .as_array()
        .unwrap()
        .iter()
        .map(|suite| suite["name"].as_str().unwrap())
        .collect();
    assert_eq!(suites, vec!["Smoke"]);
    Ok(())
}

#[tokio::test]
async fn case_rejects_unknown_suite() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .send(
            Method::POST,
            "/api/v1/cases/",
            Some(ADMIN),
            Some(json!({"product": app.seed.product, "suites": [9999]})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["field"], json!("suites"));

    let list = app.get("/api/v1/cases/").await?;
    assert_eq!(list.body["meta"]["total_count"], json!(2));
    Ok(())
}

#[tokio::test]
async fn case_steps_are_numbered_in_sequence() -> Result<()> {
    let app = TestApp::new().await?;
    let caseversion = format!("/api/v1/caseversions/{}/", app.seed.login);

    for instruction in ["Open the login page", "Submit the form"] {
        let reply = app
            .send(
                Method::POST,
                "/api/v1/casesteps/",
                Some(ADMIN),
                Some(json!({
                    "caseversion": caseversion,
                    "instruction": instruction,
                    "expected": "",
                })),
            )
            .await?;
        assert_eq!(reply.status, StatusCode::CREATED);
    }

    let detail = app.get(&caseversion).await?;
    let steps = detail.body["steps"].as_array().unwrap();
    let numbers: Vec<i64> = steps
        .iter()
        .map(|step| step["number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(steps[1]["instruction"], json!("Submit the form"));

    // The owning case version cannot be moved.
    let step_uri = steps[0]["resource_uri"].as_str().unwrap().to_string();
    let reply = app
        .send(
            Method::PUT,
            &step_uri,
            Some(ADMIN),
            Some(json!({
                "caseversion": app.seed.logout,
                "instruction": "Open the start page",
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let step = app.get(&step_uri).await?;
    assert_eq!(step.body["caseversion"], json!(caseversion));
    assert_eq!(step.body["number"], json!(1));
    Ok(())
}

#[tokio::test]
async fn step_numbering_stops_at_the_largest_number() -> Result<()> {
    let app = TestApp::new().await?;
    let caseversion = format!("/api/v1/caseversions/{}/", app.seed.login);

    let reply = app
        .send(
            Method::POST,
            "/api/v1/casesteps/",
            Some(ADMIN),
            Some(json!({
                "caseversion": caseversion,
                "number": i32::MAX,
                "instruction": "Scroll to the end",
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);

    let reply = app
        .send(
            Method::POST,
            "/api/v1/casesteps/",
            Some(ADMIN),
            Some(json!({"caseversion": caseversion, "instruction": "One more"})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["error"].is_string());

    let detail = app.get(&caseversion).await?;
    assert_eq!(detail.body["steps"].as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn caseversions_are_not_created_over_http() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .send(
            Method::POST,
            "/api/v1/caseversions/",
            Some(ADMIN),
            Some(json!({"name": "New"})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn caseversion_update_relinks_tags_and_environments() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;
    let created = app
        .send(
            Method::POST,
            "/api/v1/environments/",
            Some(ADMIN),
            Some(json!({"profile": seed.profile, "elements": [seed.macos]})),
        )
        .await?;
    assert_eq!(created.status, StatusCode::CREATED);

    let uri = format!("/api/v1/caseversions/{}/", seed.logout);
    let environment = created.headers["location"].to_str()?.to_string();
    let reply = app
        .send(
            Method::PUT,
            &uri,
            Some(ADMIN),
            Some(json!({
                "name": "Log out everywhere",
                "environments": [environment],
                "tags": [format!("/api/v1/tags/{}/", seed.tag)],
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let detail = app.get(&uri).await?;
    assert_eq!(detail.body["name"], json!("Log out everywhere"));
    assert_eq!(detail.body["tags"][0]["name"], json!("smoke"));
    assert_eq!(detail.body["environments"][0]["resource_uri"], json!(environment));
    assert_eq!(
        detail.body["productversion"],
        json!(format!("/api/v1/productversions/{}/", seed.productversion))
    );

    let tagged = app
        .get("/api/v1/caseversions/?tags__name=smoke&order_by=id")
        .await?;
    assert_eq!(ids(&tagged.body), vec![seed.login, seed.logout]);

    let reply = app
        .send(
            Method::PUT,
            &uri,
            Some(ADMIN),
            Some(json!({"name": "Broken", "tags": [9999]})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.get(&uri).await?.body["name"], json!("Log out everywhere"));
    Ok(())
}
