//! Shared fixtures: an in-memory store behind the full router.
#![allow(dead_code, clippy::unwrap_used)]

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, HeaderMap, Method, Request, StatusCode},
    Router,
};
use casetrack::{
    api,
    model::{
        library::{NewCaseVersion, NewSuite, SuiteStatus},
        Id,
    },
    store::{
        AccountRepository, CatalogRepository, EnvironmentRepository, LibraryRepository,
        MemoryStore, SharedStore,
    },
};
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const ADMIN: &str = "ApiKey admin:admin-key";
pub const VIEWER: &str = "ApiKey viewer:viewer-key";

/// Ids of the records every test starts with.
#[derive(Debug, Clone, Copy)]
pub struct Seed {
    pub admin: Id,
    pub product: Id,
    pub productversion: Id,
    pub tag: Id,
    pub profile: Id,
    pub os: Id,
    pub linux: Id,
    pub macos: Id,
    pub browser: Id,
    pub firefox: Id,
    pub suite: Id,
    pub other_suite: Id,
    pub first_case: Id,
    pub second_case: Id,
    /// Case version of `first_case`, created by `admin`.
    pub login: Id,
    /// Case version of `second_case`, without a creator.
    pub logout: Id,
}

pub struct TestApp {
    pub router: Router,
    pub store: SharedStore,
    pub seed: Seed,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let seed = seed(&store).await?;
        Ok(Self {
            router: api::router(store.clone()),
            store,
            seed,
        })
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> Result<Reply> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("router failed")?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response is not JSON")?
        };
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    pub async fn get(&self, uri: &str) -> Result<Reply> {
        self.send(Method::GET, uri, None, None).await
    }
}

/// Names of the listed objects, in response order.
pub fn names(body: &Value) -> Vec<String> {
    body["objects"]
        .as_array()
        .map(|objects| {
            objects
                .iter()
                .filter_map(|object| object["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn ids(body: &Value) -> Vec<Id> {
    body["objects"]
        .as_array()
        .map(|objects| objects.iter().filter_map(|object| object["id"].as_i64()).collect())
        .unwrap_or_default()
}

async fn seed(store: &SharedStore) -> Result<Seed> {
    let mut tx = store.begin().await?;

    let admin = tx
        .insert_user(
            "admin",
            &SecretString::from("admin-key".to_string()),
            &[
                "environments.manage_environments".to_string(),
                "library.manage_suites".to_string(),
                "library.manage_cases".to_string(),
            ],
        )
        .await?;
    tx.insert_user(
        "viewer",
        &SecretString::from("viewer-key".to_string()),
        &[],
    )
    .await?;

    let product = tx.insert_product("Firefox", "The browser").await?;
    let productversion = tx
        .insert_productversion(product.id, "10", "Firefox 10")
        .await?;
    let tag = tx.insert_tag("smoke", Some(product.id)).await?;

    let profile = tx.insert_profile("Desktop").await?;
    let os = tx.insert_category("Operating System").await?;
    let linux = tx.insert_element("Linux", os.id).await?;
    let macos = tx.insert_element("macOS", os.id).await?;
    let browser = tx.insert_category("Browser").await?;
    let firefox = tx.insert_element("Firefox", browser.id).await?;

    let suite = tx
        .insert_suite(
            &NewSuite {
                name: "Smoke".to_string(),
                product_id: product.id,
                description: String::new(),
                status: SuiteStatus::Active,
            },
            Some(admin.id),
        )
        .await?;
    let other_suite = tx
        .insert_suite(
            &NewSuite {
                name: "Regression".to_string(),
                product_id: product.id,
                description: String::new(),
                status: SuiteStatus::Draft,
            },
            Some(admin.id),
        )
        .await?;

    let first_case = tx.insert_case(product.id).await?;
    let second_case = tx.insert_case(product.id).await?;
    // In "Smoke" the second case comes first.
    tx.insert_suitecase(suite.id, first_case.id, 2).await?;
    tx.insert_suitecase(suite.id, second_case.id, 1).await?;
    tx.insert_suitecase(other_suite.id, first_case.id, 1).await?;

    let login = tx
        .insert_caseversion(
            &NewCaseVersion {
                case_id: first_case.id,
                productversion_id: productversion.id,
                name: "Log in".to_string(),
                description: "Sign in with a valid account".to_string(),
                latest: true,
                environment_ids: Vec::new(),
                tag_ids: vec![tag.id],
            },
            Some(admin.id),
        )
        .await?;
    let logout = tx
        .insert_caseversion(
            &NewCaseVersion {
                case_id: second_case.id,
                productversion_id: productversion.id,
                name: "Log out".to_string(),
                description: String::new(),
                latest: false,
                environment_ids: Vec::new(),
                tag_ids: Vec::new(),
            },
            None,
        )
        .await?;

    tx.commit().await?;

    Ok(Seed {
        admin: admin.id,
        product: product.id,
        productversion: productversion.id,
        tag: tag.id,
        profile: profile.id,
        os: os.id,
        linux: linux.id,
        macos: macos.id,
        browser: browser.id,
        firefox: firefox.id,
        suite: suite.id,
        other_suite: other_suite.id,
        first_case: first_case.id,
        second_case: second_case.id,
        login: login.id,
        logout: logout.id,
    })
}
