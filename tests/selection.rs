#![allow(clippy::unwrap_used)]

mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use common::{ids, names, TestApp, ADMIN};
use serde_json::{json, Value};

fn object_named<'a>(body: &'a Value, name: &str) -> &'a Value {
    body["objects"]
        .as_array()
        .unwrap()
        .iter()
        .find(|object| object["name"] == json!(name))
        .unwrap()
}

#[tokio::test]
async fn negated_name_excludes_matches() -> Result<()> {
    let app = TestApp::new().await?;
    for endpoint in ["caseselection", "caseversionselection"] {
        let reply = app
            .get(&format!("/api/v1/{endpoint}/?name__ne=Log%20in"))
            .await?;
        assert_eq!(reply.status, StatusCode::OK, "{endpoint}");
        assert_eq!(names(&reply.body), vec!["Log out"], "{endpoint}");
    }
    Ok(())
}

#[tokio::test]
async fn negation_is_only_for_selection_resources() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app.get("/api/v1/categories/?name__ne=Browser").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn records_are_enriched_with_case_product_and_creator() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;
    let reply = app.get("/api/v1/caseselection/").await?;
    assert_eq!(reply.status, StatusCode::OK);

    let login = object_named(&reply.body, "Log in");
    assert_eq!(login["case_id"], json!(seed.first_case.to_string()));
    assert_eq!(login["product_id"], json!(seed.product.to_string()));
    assert_eq!(login["product"], json!({"id": seed.product.to_string()}));
    assert_eq!(
        login["created_by"],
        json!({"id": seed.admin.to_string(), "username": "admin"})
    );
    assert_eq!(
        login["case"],
        json!(format!("/api/v1/cases/{}/", seed.first_case))
    );
    assert_eq!(login["tags"][0]["name"], json!("smoke"));
    assert_eq!(login["order"], Value::Null);

    let logout = object_named(&reply.body, "Log out");
    assert_eq!(logout["created_by"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn suite_filter_orders_by_membership() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;

    let reply = app
        .get(&format!("/api/v1/caseselection/?case__suites={}", seed.suite))
        .await?;
    assert_eq!(ids(&reply.body), vec![seed.logout, seed.login]);
    assert_eq!(reply.body["objects"][0]["order"], json!(1));
    assert_eq!(reply.body["objects"][1]["order"], json!(2));

    let reply = app
        .get(&format!(
            "/api/v1/caseselection/?case__suites={}",
            seed.other_suite
        ))
        .await?;
    assert_eq!(names(&reply.body), vec!["Log in"]);
    assert_eq!(reply.body["objects"][0]["order"], json!(1));
    Ok(())
}

#[tokio::test]
async fn excluding_a_suite_keeps_the_other_cases() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .get(&format!(
            "/api/v1/caseselection/?case__suites__ne={}",
            app.seed.other_suite
        ))
        .await?;
    assert_eq!(names(&reply.body), vec!["Log out"]);
    Ok(())
}

#[tokio::test]
async fn latest_filter_on_case_selection() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app.get("/api/v1/caseselection/?latest=true").await?;
    assert_eq!(names(&reply.body), vec!["Log in"]);

    let reply = app.get("/api/v1/caseversionselection/?latest=true").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn caseversion_selection_nests_the_productversion() -> Result<()> {
    let app = TestApp::new().await?;
    let seed = app.seed;
    let reply = app
        .get(&format!(
            "/api/v1/caseversionselection/{}/",
            seed.logout
        ))
        .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["productversion_name"], json!("Firefox 10"));
    assert_eq!(reply.body["productversion"]["version"], json!("10"));
    assert_eq!(
        reply.body["productversion"]["resource_uri"],
        json!(format!("/api/v1/productversions/{}/", seed.productversion))
    );
    assert_eq!(reply.body["created_by"], Value::Null);
    assert!(reply.body.get("order").is_none());
    Ok(())
}

#[tokio::test]
async fn tag_filters_follow_relations() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .get(&format!("/api/v1/caseselection/?tags={}", app.seed.tag))
        .await?;
    assert_eq!(names(&reply.body), vec!["Log in"]);

    let reply = app
        .get("/api/v1/caseversionselection/?tags__name__ne=smoke")
        .await?;
    assert_eq!(names(&reply.body), vec!["Log out"]);
    Ok(())
}

#[tokio::test]
async fn selection_is_read_only() -> Result<()> {
    let app = TestApp::new().await?;
    let reply = app
        .send(
            Method::DELETE,
            &format!("/api/v1/caseselection/{}/", app.seed.login),
            Some(ADMIN),
            None,
        )
        .await?;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}
