//! Generic REST resources.
//!
//! A [`Resource`] declares its [`ResourceMeta`] and how to load, render and
//! write its records; [`routes`] turns it into list (`/<name>/`) and detail
//! (`/<name>/:id/`) routes for the verbs the meta permits. The handlers here
//! own everything shared: authentication, filtering, ordering, paging,
//! transactions and response codes.

use super::{
    auth::{self, Action, Policy, Principal},
    error::{ApiError, ApiResult},
    query::{collect_params, FilterSet, Filtering, OrderBy, Page, Params},
    reference::resource_uri,
    API_PREFIX,
};
use crate::{
    model::{Id, Lookup},
    store::{SharedStore, Transaction},
};
use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, Path, Query},
    http::{header::LOCATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{self, MethodRouter},
    Extension, Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

/// Static description of a resource.
#[derive(Debug, Clone, Copy)]
pub struct ResourceMeta {
    /// URL segment and resource URI prefix.
    pub name: &'static str,
    pub description: &'static str,
    /// Keys rendered for each record, besides `resource_uri`.
    pub fields: &'static [&'static str],
    pub filtering: &'static [(&'static str, Filtering)],
    pub ordering: &'static [&'static str],
    pub list_methods: &'static [Verb],
    pub detail_methods: &'static [Verb],
    /// Settable on create, ignored on update.
    pub read_create_fields: &'static [&'static str],
    /// `None` for read-only resources.
    pub policy: Option<Policy>,
    /// Answer POST and PUT with the stored record.
    pub always_return_data: bool,
    /// Route `<field>__ne` parameters to exclusion filters.
    pub negation: bool,
}

impl ResourceMeta {
    pub const DEFAULT: Self = Self {
        name: "",
        description: "",
        fields: &["id"],
        filtering: &[],
        ordering: &[],
        list_methods: &[Verb::Get, Verb::Post],
        detail_methods: &[Verb::Get, Verb::Put, Verb::Delete],
        read_create_fields: &[],
        policy: None,
        always_return_data: false,
        negation: false,
    };

    #[must_use]
    pub fn list_path(&self) -> String {
        format!("{API_PREFIX}/{}/", self.name)
    }

    #[must_use]
    pub fn allows_list(&self, verb: Verb) -> bool {
        self.list_methods.contains(&verb)
    }

    #[must_use]
    pub fn allows_detail(&self, verb: Verb) -> bool {
        self.detail_methods.contains(&verb)
    }
}

#[async_trait]
pub trait Resource: Send + Sync + 'static {
    type View: Lookup + 'static;

    const META: ResourceMeta;

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<Self::View>>;

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<Self::View>>;

    /// Renders a record; keys outside `META.fields` are dropped.
    fn dehydrate(view: &Self::View) -> Map<String, Value>;

    /// Adds computed keys after the field allowlist is applied.
    fn enrich(_view: &Self::View, _object: &mut Map<String, Value>, _params: &Params) {}

    /// Ordering used when the request has no `order_by`.
    fn default_order(_views: &mut [Self::View], _params: &Params) {}

    async fn create(
        _tx: &mut dyn Transaction,
        _principal: &Principal,
        _body: Value,
    ) -> ApiResult<Id> {
        Err(ApiError::MethodNotAllowed)
    }

    /// Returns `false` when the record does not exist.
    async fn update(
        _tx: &mut dyn Transaction,
        _principal: &Principal,
        _id: Id,
        _body: Value,
    ) -> ApiResult<bool> {
        Err(ApiError::MethodNotAllowed)
    }

    /// Returns `false` when the record does not exist.
    async fn delete(
        _tx: &mut dyn Transaction,
        _principal: &Principal,
        _id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Err(ApiError::MethodNotAllowed)
    }

    async fn patch_list(
        _tx: &mut dyn Transaction,
        _principal: &Principal,
        _body: Value,
    ) -> ApiResult<()> {
        Err(ApiError::MethodNotAllowed)
    }
}

/// Deserializes a request payload.
///
/// # Errors
/// `BadRequest` naming the serde failure.
pub fn hydrate<T: DeserializeOwned>(body: Value) -> ApiResult<T> {
    serde_json::from_value(body).map_err(|err| ApiError::BadRequest(format!("Invalid data: {err}")))
}

/// Unwraps a JSON object built with `json!`.
#[must_use]
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Renders one record with its `resource_uri`.
pub fn render<R: Resource>(view: &R::View, params: &Params) -> Value {
    let mut object = R::dehydrate(view);
    object.retain(|key, _| R::META.fields.contains(&key.as_str()));
    object.insert(
        "resource_uri".to_string(),
        Value::String(resource_uri(R::META.name, view.pk())),
    );
    R::enrich(view, &mut object, params);
    Value::Object(object)
}

fn strip_read_create_fields(meta: &ResourceMeta, mut body: Value) -> Value {
    if let Value::Object(object) = &mut body {
        for field in meta.read_create_fields {
            object.remove(*field);
        }
    }
    body
}

async fn list<R: Resource>(
    Extension(store): Extension<SharedStore>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = collect_params(pairs);
    let filters = FilterSet::parse(R::META.filtering, R::META.negation, &params)?;
    let order_by = OrderBy::parse(R::META.ordering, &params)?;
    let page = Page::from_params(&params)?;

    let mut tx = store.begin().await?;
    let views = R::fetch_list(tx.as_mut()).await?;
    drop(tx);

    let mut kept = Vec::with_capacity(views.len());
    for view in views {
        if filters.keep(&view)? {
            kept.push(view);
        }
    }
    match &order_by {
        Some(order_by) => order_by.sort(&mut kept),
        None => R::default_order(&mut kept, &params),
    }

    debug!(resource = R::META.name, total = kept.len(), "Listed");

    let objects: Vec<Value> = page
        .slice(&kept)
        .iter()
        .map(|view| render::<R>(view, &params))
        .collect();
    let meta = page.meta(kept.len(), &R::META.list_path(), &params);

    Ok(Json(json!({ "meta": meta, "objects": objects })).into_response())
}

async fn detail<R: Resource>(
    Extension(store): Extension<SharedStore>,
    Path(id): Path<Id>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = collect_params(pairs);
    let mut tx = store.begin().await?;
    let view = R::fetch_one(tx.as_mut(), id)
        .await?
        .ok_or_else(|| not_found(R::META.name, id))?;
    Ok(Json(render::<R>(&view, &params)).into_response())
}

fn not_found(resource: &str, id: Id) -> ApiError {
    ApiError::NotFound(format!("No {resource} record with id {id}."))
}

async fn create<R: Resource>(
    Extension(store): Extension<SharedStore>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let params = collect_params(pairs);
    let Json(body) = body?;

    let mut tx = store.begin().await?;
    let principal =
        auth::require(tx.as_mut(), &headers, &params, Action::Create, R::META.policy).await?;
    let id = R::create(tx.as_mut(), &principal, body).await?;
    let data = if R::META.always_return_data {
        R::fetch_one(tx.as_mut(), id)
            .await?
            .map(|view| render::<R>(&view, &params))
    } else {
        None
    };
    tx.commit().await?;

    info!(resource = R::META.name, id, username = %principal.user.username, "Created");

    let location = [(LOCATION, resource_uri(R::META.name, id))];
    Ok(match data {
        Some(data) => (StatusCode::CREATED, location, Json(data)).into_response(),
        None => (StatusCode::CREATED, location).into_response(),
    })
}

async fn update<R: Resource>(
    Extension(store): Extension<SharedStore>,
    Path(id): Path<Id>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let params = collect_params(pairs);
    let Json(body) = body?;
    let body = strip_read_create_fields(&R::META, body);

    let mut tx = store.begin().await?;
    let principal =
        auth::require(tx.as_mut(), &headers, &params, Action::Update, R::META.policy).await?;
    if !R::update(tx.as_mut(), &principal, id, body).await? {
        return Err(not_found(R::META.name, id));
    }
    let data = if R::META.always_return_data {
        R::fetch_one(tx.as_mut(), id)
            .await?
            .map(|view| render::<R>(&view, &params))
    } else {
        None
    };
    tx.commit().await?;

    info!(resource = R::META.name, id, username = %principal.user.username, "Updated");

    Ok(match data {
        Some(data) => (StatusCode::ACCEPTED, Json(data)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// Answers 204 with no body and no `Content-Type`.
async fn delete<R: Resource>(
    Extension(store): Extension<SharedStore>,
    Path(id): Path<Id>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = collect_params(pairs);

    let mut tx = store.begin().await?;
    let principal =
        auth::require(tx.as_mut(), &headers, &params, Action::Delete, R::META.policy).await?;
    if !R::delete(tx.as_mut(), &principal, id, &params).await? {
        return Err(not_found(R::META.name, id));
    }
    tx.commit().await?;

    info!(resource = R::META.name, id, username = %principal.user.username, "Deleted");

    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn patch_list<R: Resource>(
    Extension(store): Extension<SharedStore>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let params = collect_params(pairs);
    let Json(body) = body?;

    let mut tx = store.begin().await?;
    let principal =
        auth::require(tx.as_mut(), &headers, &params, Action::Create, R::META.policy).await?;
    R::patch_list(tx.as_mut(), &principal, body).await?;
    tx.commit().await?;

    Ok(StatusCode::ACCEPTED.into_response())
}

/// List and detail routes for the verbs `R` permits; other verbs answer 405.
pub fn routes<R: Resource>() -> Router {
    let meta = R::META;

    let mut list_route: MethodRouter = routing::get(list::<R>);
    if meta.allows_list(Verb::Post) {
        list_route = list_route.post(create::<R>);
    }
    if meta.allows_list(Verb::Patch) {
        list_route = list_route.patch(patch_list::<R>);
    }

    let mut detail_route: MethodRouter = routing::get(detail::<R>);
    if meta.allows_detail(Verb::Put) {
        detail_route = detail_route.put(update::<R>);
    }
    if meta.allows_detail(Verb::Delete) {
        detail_route = detail_route.delete(delete::<R>);
    }

    Router::new()
        .route(&format!("/{}/", meta.name), list_route)
        .route(&format!("/{}/:id/", meta.name), detail_route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_create_fields_are_stripped() {
        let meta = ResourceMeta {
            name: "elements",
            read_create_fields: &["category"],
            ..ResourceMeta::DEFAULT
        };
        let body = strip_read_create_fields(&meta, json!({"name": "Linux", "category": 3}));
        assert_eq!(body, json!({"name": "Linux"}));
    }

    #[test]
    fn default_meta_is_crud() {
        let meta = ResourceMeta::DEFAULT;
        assert!(meta.allows_list(Verb::Post));
        assert!(!meta.allows_list(Verb::Patch));
        assert!(meta.allows_detail(Verb::Delete));
    }
}
