//! Profiles, categories, elements and environments.
//!
//! All four resources share the `environments.manage_environments` policy.
//! Environments are validated so each element comes from a different
//! category, and `PATCH` on the environment list creates the Cartesian
//! product of the elements of several categories in one transaction.

use crate::{
    api::{
        auth::{Policy, Principal},
        error::{ApiError, ApiResult},
        query::{Filtering, Params},
        reference::{self, resource_uri, Reference},
        resource::{hydrate, object, Resource, ResourceMeta, Verb},
    },
    model::{
        environments::{CategoryView, Element, ElementView, Environment, EnvironmentView, Profile},
        Id,
    },
    store::{views, Transaction},
};
use async_trait::async_trait;
use itertools::Itertools;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, error, info};

pub const DISTINCT_CATEGORIES: &str = "Elements must each belong to a different Category.";

pub(crate) fn element_object(element: &Element) -> Value {
    json!({
        "id": element.id,
        "name": element.name,
        "category": resource_uri(Categories::META.name, element.category_id),
        "resource_uri": resource_uri(Elements::META.name, element.id),
    })
}

pub(crate) fn environment_object(view: &EnvironmentView) -> Value {
    let mut object = Environments::dehydrate(view);
    object.insert(
        "resource_uri".to_string(),
        Value::String(resource_uri(Environments::META.name, view.environment.id)),
    );
    Value::Object(object)
}

#[derive(Debug, Deserialize)]
struct NamePayload {
    name: String,
}

pub struct Profiles;

#[async_trait]
impl Resource for Profiles {
    type View = Profile;

    const META: ResourceMeta = ResourceMeta {
        name: "profiles",
        description: "Named groups of environments",
        fields: &["id", "name"],
        filtering: &[("name", Filtering::All)],
        ordering: &["id", "name"],
        policy: Some(Policy::ManageEnvironments),
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<Profile>> {
        Ok(tx.profiles().await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<Profile>> {
        Ok(tx.profile(id).await?)
    }

    fn dehydrate(view: &Profile) -> Map<String, Value> {
        object(json!({ "id": view.id, "name": view.name }))
    }

    async fn create(tx: &mut dyn Transaction, _principal: &Principal, body: Value) -> ApiResult<Id> {
        let payload: NamePayload = hydrate(body)?;
        Ok(tx.insert_profile(&payload.name).await?.id)
    }

    async fn update(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        body: Value,
    ) -> ApiResult<bool> {
        let payload: NamePayload = hydrate(body)?;
        Ok(tx.update_profile(id, &payload.name).await?.is_some())
    }

    async fn delete(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Ok(tx.delete_profile(id).await?)
    }
}

pub struct Categories;

#[async_trait]
impl Resource for Categories {
    type View = CategoryView;

    const META: ResourceMeta = ResourceMeta {
        name: "categories",
        description: "Environment dimensions, each with its elements",
        fields: &["id", "name", "elements"],
        filtering: &[("name", Filtering::All)],
        ordering: &["id", "name"],
        policy: Some(Policy::ManageEnvironments),
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<CategoryView>> {
        Ok(views::categories(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<CategoryView>> {
        Ok(views::category(tx, id).await?)
    }

    fn dehydrate(view: &CategoryView) -> Map<String, Value> {
        let elements: Vec<Value> = view.elements.iter().map(element_object).collect();
        object(json!({
            "id": view.category.id,
            "name": view.category.name,
            "elements": elements,
        }))
    }

    async fn create(tx: &mut dyn Transaction, _principal: &Principal, body: Value) -> ApiResult<Id> {
        let payload: NamePayload = hydrate(body)?;
        Ok(tx.insert_category(&payload.name).await?.id)
    }

    async fn update(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        body: Value,
    ) -> ApiResult<bool> {
        let payload: NamePayload = hydrate(body)?;
        Ok(tx.update_category(id, &payload.name).await?.is_some())
    }

    async fn delete(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Ok(tx.delete_category(id).await?)
    }
}

#[derive(Debug, Deserialize)]
struct ElementPayload {
    name: String,
    category: Option<Reference>,
}

pub struct Elements;

#[async_trait]
impl Resource for Elements {
    type View = ElementView;

    const META: ResourceMeta = ResourceMeta {
        name: "elements",
        description: "Values of a category, such as one operating system",
        fields: &["id", "name", "category"],
        filtering: &[
            ("category", Filtering::AllWithRelations),
            ("name", Filtering::All),
        ],
        ordering: &["id", "name"],
        read_create_fields: &["category"],
        policy: Some(Policy::ManageEnvironments),
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<ElementView>> {
        Ok(views::elements(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<ElementView>> {
        Ok(views::element(tx, id).await?)
    }

    fn dehydrate(view: &ElementView) -> Map<String, Value> {
        object(element_object(&view.element))
    }

    async fn create(tx: &mut dyn Transaction, _principal: &Principal, body: Value) -> ApiResult<Id> {
        let payload: ElementPayload = hydrate(body)?;
        let category = payload
            .category
            .ok_or_else(|| ApiError::validation("category", "This field is required."))?;
        let category_id = category.id(Categories::META.name, "category")?;
        if tx.category(category_id).await?.is_none() {
            return Err(ApiError::validation(
                "category",
                format!("Category {category_id} does not exist."),
            ));
        }
        Ok(tx.insert_element(&payload.name, category_id).await?.id)
    }

    async fn update(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        body: Value,
    ) -> ApiResult<bool> {
        let payload: ElementPayload = hydrate(body)?;
        Ok(tx.update_element(id, &payload.name).await?.is_some())
    }

    async fn delete(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Ok(tx.delete_element(id).await?)
    }
}

#[derive(Debug, Deserialize)]
struct EnvironmentPayload {
    profile: Reference,
    #[serde(default)]
    elements: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct CombinationsPayload {
    #[serde(default)]
    categories: Vec<Reference>,
    profile: Reference,
}

pub struct Environments;

#[async_trait]
impl Resource for Environments {
    type View = EnvironmentView;

    const META: ResourceMeta = ResourceMeta {
        name: "environments",
        description: "A profile plus one element from each of several categories",
        fields: &["id", "profile", "elements"],
        filtering: &[
            ("elements", Filtering::All),
            ("profile", Filtering::AllWithRelations),
        ],
        ordering: &["id", "profile"],
        list_methods: &[Verb::Get, Verb::Post, Verb::Patch],
        detail_methods: &[Verb::Get, Verb::Delete],
        policy: Some(Policy::ManageEnvironments),
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<EnvironmentView>> {
        Ok(views::environments(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<EnvironmentView>> {
        Ok(views::environment(tx, id).await?)
    }

    fn dehydrate(view: &EnvironmentView) -> Map<String, Value> {
        let elements: Vec<String> = view
            .elements
            .iter()
            .map(|element| resource_uri(Elements::META.name, element.id))
            .collect();
        object(json!({
            "id": view.environment.id,
            "profile": resource_uri(Profiles::META.name, view.profile.id),
            "elements": elements,
        }))
    }

    async fn create(tx: &mut dyn Transaction, _principal: &Principal, body: Value) -> ApiResult<Id> {
        let payload: EnvironmentPayload = hydrate(body)?;
        let profile_id = payload.profile.id(Profiles::META.name, "profile")?;
        let element_ids = reference::ids(&payload.elements, Elements::META.name, "elements")?;
        Ok(create_environment(tx, profile_id, &element_ids).await?.id)
    }

    async fn delete(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Ok(tx.delete_environment(id).await?)
    }

    async fn patch_list(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        body: Value,
    ) -> ApiResult<()> {
        let payload: CombinationsPayload = hydrate(body)?;
        let profile_id = payload.profile.id(Profiles::META.name, "profile")?;
        let category_ids =
            reference::ids(&payload.categories, Categories::META.name, "categories")?;
        let created = create_combinations(tx, profile_id, &category_ids).await?;
        info!(created = created.len(), "Created environment combinations");
        Ok(())
    }
}

/// Rejects element sets where two elements share a category.
///
/// # Errors
/// `BadRequest` with [`DISTINCT_CATEGORIES`].
pub fn validate_distinct_categories(elements: &[Element]) -> ApiResult<()> {
    let categories: HashSet<Id> = elements.iter().map(|element| element.category_id).collect();
    if categories.len() != elements.len() {
        error!("{DISTINCT_CATEGORIES}");
        return Err(ApiError::BadRequest(DISTINCT_CATEGORIES.to_string()));
    }
    Ok(())
}

/// Resolves, validates and stores one environment.
///
/// # Errors
/// Validation errors for unknown profile or elements, `BadRequest` when two
/// elements share a category.
pub async fn create_environment(
    tx: &mut dyn Transaction,
    profile_id: Id,
    element_ids: &[Id],
) -> ApiResult<Environment> {
    if tx.profile(profile_id).await?.is_none() {
        return Err(ApiError::validation(
            "profile",
            format!("Profile {profile_id} does not exist."),
        ));
    }

    let mut elements = Vec::with_capacity(element_ids.len());
    for id in element_ids {
        let element = tx.element(*id).await?.ok_or_else(|| {
            ApiError::validation("elements", format!("Element {id} does not exist."))
        })?;
        elements.push(element);
    }
    validate_distinct_categories(&elements)?;

    Ok(tx.insert_environment(profile_id, element_ids).await?)
}

/// Lazy Cartesian product of the lists, the first list varying slowest.
pub fn combinations(lists: &[Vec<Id>]) -> impl Iterator<Item = Vec<Id>> + '_ {
    lists
        .iter()
        .map(|list| list.iter().copied())
        .multi_cartesian_product()
}

/// Creates one environment per combination of the categories' elements.
///
/// Runs on the caller's transaction; any error leaves the batch to be rolled
/// back with it.
///
/// # Errors
/// `BadRequest` without categories, validation errors for unknown
/// categories, and any [`create_environment`] error.
pub async fn create_combinations(
    tx: &mut dyn Transaction,
    profile_id: Id,
    category_ids: &[Id],
) -> ApiResult<Vec<Environment>> {
    if category_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one category is required.".to_string(),
        ));
    }

    let mut lists = Vec::with_capacity(category_ids.len());
    for category_id in category_ids {
        if tx.category(*category_id).await?.is_none() {
            return Err(ApiError::validation(
                "categories",
                format!("Category {category_id} does not exist."),
            ));
        }
        let elements = tx.elements_in_category(*category_id).await?;
        debug!(category_id, elements = elements.len(), "Loaded category");
        lists.push(elements.into_iter().map(|element| element.id).collect());
    }

    let mut created = Vec::new();
    for combination in combinations(&lists) {
        created.push(create_environment(tx, profile_id, &combination).await?);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(id: Id, category_id: Id) -> Element {
        Element {
            id,
            name: format!("element {id}"),
            category_id,
        }
    }

    #[test]
    fn combinations_vary_first_list_slowest() {
        let result: Vec<_> = combinations(&[vec![1, 2], vec![3, 4]]).collect();
        assert_eq!(result, vec![vec![1, 3], vec![1, 4], vec![2, 3], vec![2, 4]]);
    }

    #[test]
    fn combinations_with_an_empty_list_are_empty() {
        assert_eq!(combinations(&[vec![1, 2], vec![]]).count(), 0);
    }

    #[test]
    fn distinct_categories_pass() {
        assert!(validate_distinct_categories(&[element(1, 10), element(2, 11)]).is_ok());
        assert!(validate_distinct_categories(&[]).is_ok());
    }

    #[test]
    fn shared_category_is_rejected() {
        let err = validate_distinct_categories(&[element(1, 10), element(2, 10)]);
        assert!(matches!(err, Err(ApiError::BadRequest(message)) if message == DISTINCT_CATEGORIES));
    }
}
