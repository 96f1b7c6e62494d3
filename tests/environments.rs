#![allow(clippy::unwrap_used)]

mod common;

use anyhow::Result;
use axum::http::{header::LOCATION, Method, StatusCode};
use casetrack::store::EnvironmentRepository;
use common::{ids, names, TestApp, ADMIN, VIEWER};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn element_sets(body: &Value) -> BTreeSet<BTreeSet<String>> {
    body["objects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|environment| {
            environment["elements"]
                .as_array()
                .unwrap()
                .iter()
                .map(|uri| uri.as_str().unwrap().to_string())
                .collect()
        })
        .collect()
}

fn element_uri(id: i64) -> String {
    format!("/api/v1/elements/{id}/")
}

#[tokio::test]
async fn create_environment_with_distinct_categories() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;

    let reply = app
        .send(
            Method::POST,
            "/api/v1/environments/",
            Some(ADMIN),
            Some(json!({
                "profile": format!("/api/v1/profiles/{}/", seed.profile),
                "elements": [element_uri(seed.linux), seed.firefox],
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    let location = reply.headers.get(LOCATION).unwrap().to_str()?.to_string();
    assert!(location.starts_with("/api/v1/environments/"));

    let detail = app.get(&location).await?;
    assert_eq!(detail.status, StatusCode::OK);
    assert_eq!(
        detail.body["elements"],
        json!([element_uri(seed.linux), element_uri(seed.firefox)])
    );
    assert_eq!(
        detail.body["profile"],
        json!(format!("/api/v1/profiles/{}/", seed.profile))
    );
    Ok(())
}

#[tokio::test]
async fn elements_sharing_a_category_are_rejected() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;

    let reply = app
        .send(
            Method::POST,
            "/api/v1/environments/",
            Some(ADMIN),
            Some(json!({
                "profile": seed.profile,
                "elements": [seed.linux, seed.macos],
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body["error"],
        json!("Elements must each belong to a different Category.")
    );

    let list = app.get("/api/v1/environments/").await?;
    assert_eq!(list.body["meta"]["total_count"], json!(0));
    Ok(())
}

#[tokio::test]
async fn combinations_cover_the_cartesian_product() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;

    let reply = app
        .send(
            Method::PATCH,
            "/api/v1/environments/",
            Some(ADMIN),
            Some(json!({
                "profile": seed.profile,
                "categories": [
                    format!("/api/v1/categories/{}/", seed.os),
                    format!("/api/v1/categories/{}/", seed.browser),
                ],
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::ACCEPTED);

    let list = app.get("/api/v1/environments/").await?;
    assert_eq!(list.body["meta"]["total_count"], json!(2));
    let expected: BTreeSet<BTreeSet<String>> = [
        [element_uri(seed.linux), element_uri(seed.firefox)],
        [element_uri(seed.macos), element_uri(seed.firefox)],
    ]
    .into_iter()
    .map(|pair| pair.into_iter().collect())
    .collect();
    assert_eq!(element_sets(&list.body), expected);

    // Every stored environment keeps its categories distinct.
    let mut tx = app.store.begin().await?;
    for environment in tx.environments().await? {
        let mut categories = BTreeSet::new();
        for element_id in &environment.element_ids {
            let element = tx.element(*element_id).await?.unwrap();
            assert!(categories.insert(element.category_id));
        }
    }
    Ok(())
}

#[tokio::test]
async fn failing_combination_persists_nothing() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;

    // The same category twice pairs elements of one category.
    let reply = app
        .send(
            Method::PATCH,
            "/api/v1/environments/",
            Some(ADMIN),
            Some(json!({
                "profile": seed.profile,
                "categories": [seed.browser, seed.os, seed.os],
            })),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let list = app.get("/api/v1/environments/").await?;
    assert_eq!(list.body["meta"]["total_count"], json!(0));
    Ok(())
}

#[tokio::test]
async fn combinations_need_a_category() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .send(
            Method::PATCH,
            "/api/v1/environments/",
            Some(ADMIN),
            Some(json!({"profile": app.seed.profile, "categories": []})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn combinations_require_permission() -> Result<()> {
    let app = TestApp::new().await?;
    let body = json!({"profile": app.seed.profile, "categories": [app.seed.os]});

    let anonymous = app
        .send(Method::PATCH, "/api/v1/environments/", None, Some(body.clone()))
        .await?;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let viewer = app
        .send(Method::PATCH, "/api/v1/environments/", Some(VIEWER), Some(body))
        .await?;
    assert_eq!(viewer.status, StatusCode::FORBIDDEN);
    assert_eq!(
        viewer.body["error"],
        json!("Permission environments.manage_environments is required.")
    );
    Ok(())
}

#[tokio::test]
async fn category_name_filter_is_exact() -> Result<()> {
    let app = TestApp::new().await?;
    for name in ["Foo", "Foobar"] {
        let reply = app
            .send(
                Method::POST,
                "/api/v1/categories/",
                Some(ADMIN),
                Some(json!({"name": name})),
            )
            .await?;
        assert_eq!(reply.status, StatusCode::CREATED);
    }

    let reply = app.get("/api/v1/categories/?name=Foo").await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(names(&reply.body), vec!["Foo"]);

    let reply = app.get("/api/v1/categories/?name__startswith=Foo&order_by=-name").await?;
    assert_eq!(names(&reply.body), vec!["Foobar", "Foo"]);
    Ok(())
}

#[tokio::test]
async fn categories_nest_their_elements() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .get(&format!("/api/v1/categories/{}/", app.seed.os))
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    let elements = reply.body["elements"].as_array().unwrap();
    let element_names: Vec<&str> = elements
        .iter()
        .map(|element| element["name"].as_str().unwrap())
        .collect();
    assert_eq!(element_names, vec!["Linux", "macOS"]);
    assert_eq!(
        elements[0]["category"],
        json!(format!("/api/v1/categories/{}/", app.seed.os))
    );
    Ok(())
}

#[tokio::test]
async fn element_category_is_fixed_after_creation() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;
    let uri = element_uri(seed.linux);

    let reply = app
        .send(
            Method::PUT,
            &uri,
            Some(ADMIN),
            Some(json!({"name": "Ubuntu", "category": seed.browser})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let detail = app.get(&uri).await?;
    assert_eq!(detail.body["name"], json!("Ubuntu"));
    assert_eq!(
        detail.body["category"],
        json!(format!("/api/v1/categories/{}/", seed.os))
    );
    Ok(())
}

#[tokio::test]
async fn element_filters_traverse_the_category() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .get("/api/v1/elements/?category__name=Browser")
        .await?;
    assert_eq!(names(&reply.body), vec!["Firefox"]);

    let reply = app.get("/api/v1/elements/?color=red").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn deleting_a_profile_removes_its_environments() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;
    let reply = app
        .send(
            Method::POST,
            "/api/v1/environments/",
            Some(ADMIN),
            Some(json!({"profile": seed.profile, "elements": [seed.linux]})),
        )
        .await?;
    assert_eq!(reply.status, StatusCode::CREATED);

    let reply = app
        .send(
            Method::DELETE,
            &format!("/api/v1/profiles/{}/", seed.profile),
            Some(ADMIN),
            None,
        )
        .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let list = app.get("/api/v1/environments/").await?;
    assert!(ids(&list.body).is_empty());
    Ok(())
}
