//! Suites, cases, case steps and case versions.

use super::{
    catalog::{productversion_uri, tag_object, Products, Tags},
    environments::{environment_object, Environments},
};
use crate::{
    api::{
        auth::{Policy, Principal},
        error::{ApiError, ApiResult},
        query::{Filtering, Params},
        reference::{self, resource_uri, Reference},
        resource::{hydrate, object, Resource, ResourceMeta, Verb},
    },
    model::{
        library::{
            CaseStep, CaseStepChanges, CaseVersionChanges, CaseVersionView, CaseView, NewCaseStep,
            NewSuite, Suite, SuiteChanges, SuiteStatus, SuiteView,
        },
        Id,
    },
    store::{views, Transaction},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

pub(crate) fn suite_object(suite: &Suite) -> Value {
    json!({
        "id": suite.id,
        "name": suite.name,
        "product": resource_uri(Products::META.name, suite.product_id),
        "description": suite.description,
        "status": suite.status,
        "resource_uri": resource_uri(Suites::META.name, suite.id),
    })
}

pub(crate) fn case_object(view: &CaseView) -> Value {
    let suites: Vec<Value> = view.suites.iter().map(suite_object).collect();
    json!({
        "id": view.case.id,
        "product": resource_uri(Products::META.name, view.case.product_id),
        "suites": suites,
        "resource_uri": resource_uri(Cases::META.name, view.case.id),
    })
}

fn casestep_object(step: &CaseStep) -> Value {
    json!({
        "id": step.id,
        "caseversion": resource_uri(CaseVersions::META.name, step.caseversion_id),
        "number": step.number,
        "instruction": step.instruction,
        "expected": step.expected,
        "resource_uri": resource_uri(CaseSteps::META.name, step.id),
    })
}

/// `permanent` accepts `true`, `1` or `yes`; anything else keeps the record.
fn is_permanent(params: &Params) -> bool {
    params.get("permanent").is_some_and(|value| {
        matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
    })
}

async fn product_id(tx: &mut dyn Transaction, product: &Reference) -> ApiResult<Id> {
    let id = product.id(Products::META.name, "product")?;
    if tx.product(id).await?.is_none() {
        return Err(ApiError::validation(
            "product",
            format!("Product {id} does not exist."),
        ));
    }
    Ok(id)
}

#[derive(Debug, Deserialize)]
struct SuitePayload {
    name: String,
    product: Reference,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: SuiteStatus,
}

pub struct Suites;

#[async_trait]
impl Resource for Suites {
    type View = SuiteView;

    const META: ResourceMeta = ResourceMeta {
        name: "suites",
        description: "Ordered collections of cases for a product",
        fields: &["id", "name", "product", "description", "status"],
        filtering: &[
            ("name", Filtering::All),
            ("product", Filtering::AllWithRelations),
        ],
        ordering: &["id", "name"],
        policy: Some(Policy::ManageSuites),
        always_return_data: true,
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<SuiteView>> {
        Ok(views::suites(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<SuiteView>> {
        Ok(views::suite(tx, id).await?)
    }

    fn dehydrate(view: &SuiteView) -> Map<String, Value> {
        object(suite_object(&view.suite))
    }

    async fn create(tx: &mut dyn Transaction, principal: &Principal, body: Value) -> ApiResult<Id> {
        let payload: SuitePayload = hydrate(body)?;
        let suite = NewSuite {
            product_id: product_id(tx, &payload.product).await?,
            name: payload.name,
            description: payload.description,
            status: payload.status,
        };
        Ok(tx.insert_suite(&suite, Some(principal.user.id)).await?.id)
    }

    async fn update(
        tx: &mut dyn Transaction,
        principal: &Principal,
        id: Id,
        body: Value,
    ) -> ApiResult<bool> {
        let payload: SuitePayload = hydrate(body)?;
        let changes = SuiteChanges {
            product_id: product_id(tx, &payload.product).await?,
            name: payload.name,
            description: payload.description,
            status: payload.status,
        };
        Ok(tx
            .update_suite(id, &changes, Some(principal.user.id))
            .await?
            .is_some())
    }

    async fn delete(
        tx: &mut dyn Transaction,
        principal: &Principal,
        id: Id,
        params: &Params,
    ) -> ApiResult<bool> {
        if is_permanent(params) {
            debug!(id, "Purging suite");
            return Ok(tx.purge_suite(id).await?);
        }
        Ok(tx.soft_delete_suite(id, Some(principal.user.id)).await?)
    }
}

#[derive(Debug, Deserialize)]
struct CasePayload {
    product: Reference,
    #[serde(default)]
    suites: Vec<Reference>,
}

/// Replaces the case's memberships; positions follow the payload order.
async fn set_suites(tx: &mut dyn Transaction, case_id: Id, suites: &[Reference]) -> ApiResult<()> {
    let suite_ids = reference::ids(suites, Suites::META.name, "suites")?;
    tx.clear_suitecases(case_id).await?;
    for (position, suite_id) in suite_ids.into_iter().enumerate() {
        if tx.suite(suite_id, false).await?.is_none() {
            return Err(ApiError::validation(
                "suites",
                format!("Suite {suite_id} does not exist."),
            ));
        }
        let order = i32::try_from(position + 1)
            .map_err(|_| ApiError::BadRequest("Too many suites.".to_string()))?;
        tx.insert_suitecase(suite_id, case_id, order).await?;
    }
    Ok(())
}

pub struct Cases;

#[async_trait]
impl Resource for Cases {
    type View = CaseView;

    const META: ResourceMeta = ResourceMeta {
        name: "cases",
        description: "Test cases and the suites that contain them",
        fields: &["id", "product", "suites"],
        filtering: &[("suites", Filtering::AllWithRelations)],
        ordering: &["id"],
        policy: Some(Policy::ManageCases),
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<CaseView>> {
        Ok(views::cases(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<CaseView>> {
        Ok(views::case(tx, id).await?)
    }

    fn dehydrate(view: &CaseView) -> Map<String, Value> {
        object(case_object(view))
    }

    async fn create(tx: &mut dyn Transaction, _principal: &Principal, body: Value) -> ApiResult<Id> {
        let payload: CasePayload = hydrate(body)?;
        let product_id = product_id(tx, &payload.product).await?;
        let case = tx.insert_case(product_id).await?;
        set_suites(tx, case.id, &payload.suites).await?;
        Ok(case.id)
    }

    async fn update(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        body: Value,
    ) -> ApiResult<bool> {
        let payload: CasePayload = hydrate(body)?;
        let product_id = product_id(tx, &payload.product).await?;
        if tx.update_case(id, product_id).await?.is_none() {
            return Ok(false);
        }
        set_suites(tx, id, &payload.suites).await?;
        Ok(true)
    }

    async fn delete(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Ok(tx.delete_case(id).await?)
    }
}

#[derive(Debug, Deserialize)]
struct CaseStepPayload {
    caseversion: Option<Reference>,
    number: Option<i32>,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    expected: String,
}

pub struct CaseSteps;

#[async_trait]
impl Resource for CaseSteps {
    type View = CaseStep;

    const META: ResourceMeta = ResourceMeta {
        name: "casesteps",
        description: "Numbered instructions of a case version",
        fields: &["id", "caseversion", "number", "instruction", "expected"],
        filtering: &[("caseversion", Filtering::All)],
        ordering: &["id", "number"],
        read_create_fields: &["caseversion"],
        policy: Some(Policy::ManageCases),
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<CaseStep>> {
        Ok(tx.casesteps().await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<CaseStep>> {
        Ok(tx.casestep(id).await?)
    }

    fn dehydrate(view: &CaseStep) -> Map<String, Value> {
        object(casestep_object(view))
    }

    async fn create(tx: &mut dyn Transaction, _principal: &Principal, body: Value) -> ApiResult<Id> {
        let payload: CaseStepPayload = hydrate(body)?;
        let caseversion_id = payload
            .caseversion
            .ok_or_else(|| ApiError::validation("caseversion", "This field is required."))?
            .id(CaseVersions::META.name, "caseversion")?;
        if tx.caseversion(caseversion_id).await?.is_none() {
            return Err(ApiError::validation(
                "caseversion",
                format!("Case version {caseversion_id} does not exist."),
            ));
        }

        let number = match payload.number {
            Some(number) => number,
            None => {
                tx.casesteps()
                    .await?
                    .iter()
                    .filter(|step| step.caseversion_id == caseversion_id)
                    .map(|step| step.number)
                    .max()
                    .unwrap_or(0)
                    .checked_add(1)
                    .ok_or_else(|| {
                        ApiError::validation("number", "No step number is left after the last step.")
                    })?
            }
        };

        let step = NewCaseStep {
            caseversion_id,
            number,
            instruction: payload.instruction,
            expected: payload.expected,
        };
        Ok(tx.insert_casestep(&step).await?.id)
    }

    async fn update(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        body: Value,
    ) -> ApiResult<bool> {
        let payload: CaseStepPayload = hydrate(body)?;
        let Some(existing) = tx.casestep(id).await? else {
            return Ok(false);
        };
        let changes = CaseStepChanges {
            number: payload.number.unwrap_or(existing.number),
            instruction: payload.instruction,
            expected: payload.expected,
        };
        Ok(tx.update_casestep(id, &changes).await?.is_some())
    }

    async fn delete(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Ok(tx.delete_casestep(id).await?)
    }
}

#[derive(Debug, Deserialize)]
struct CaseVersionPayload {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    environments: Vec<Reference>,
    #[serde(default)]
    tags: Vec<Reference>,
}

pub struct CaseVersions;

#[async_trait]
impl Resource for CaseVersions {
    type View = CaseVersionView;

    const META: ResourceMeta = ResourceMeta {
        name: "caseversions",
        description: "Versions of a case for one product version",
        fields: &[
            "id",
            "name",
            "description",
            "case",
            "steps",
            "environments",
            "productversion",
            "tags",
        ],
        filtering: &[
            ("environments", Filtering::All),
            ("productversion", Filtering::AllWithRelations),
            ("case", Filtering::AllWithRelations),
            ("tags", Filtering::AllWithRelations),
        ],
        ordering: &["id", "name"],
        list_methods: &[Verb::Get],
        policy: Some(Policy::ManageCases),
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<CaseVersionView>> {
        Ok(views::caseversions(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<CaseVersionView>> {
        Ok(views::caseversion(tx, id).await?)
    }

    fn dehydrate(view: &CaseVersionView) -> Map<String, Value> {
        let steps: Vec<Value> = view.steps.iter().map(casestep_object).collect();
        let environments: Vec<Value> = view.environments.iter().map(environment_object).collect();
        let tags: Vec<Value> = view.tags.iter().map(tag_object).collect();
        object(json!({
            "id": view.caseversion.id,
            "name": view.caseversion.name,
            "description": view.caseversion.description,
            "case": case_object(&view.case),
            "steps": steps,
            "environments": environments,
            "productversion": productversion_uri(view.caseversion.productversion_id),
            "tags": tags,
        }))
    }

    async fn update(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        body: Value,
    ) -> ApiResult<bool> {
        let payload: CaseVersionPayload = hydrate(body)?;

        let environment_ids = reference::ids(
            &payload.environments,
            Environments::META.name,
            "environments",
        )?;
        for environment_id in &environment_ids {
            if tx.environment(*environment_id).await?.is_none() {
                return Err(ApiError::validation(
                    "environments",
                    format!("Environment {environment_id} does not exist."),
                ));
            }
        }
        let tag_ids = reference::ids(&payload.tags, Tags::META.name, "tags")?;
        for tag_id in &tag_ids {
            if tx.tag(*tag_id).await?.is_none() {
                return Err(ApiError::validation(
                    "tags",
                    format!("Tag {tag_id} does not exist."),
                ));
            }
        }

        let changes = CaseVersionChanges {
            name: payload.name,
            description: payload.description,
            environment_ids,
            tag_ids,
        };
        Ok(tx.update_caseversion(id, &changes).await?.is_some())
    }

    async fn delete(
        tx: &mut dyn Transaction,
        _principal: &Principal,
        id: Id,
        _params: &Params,
    ) -> ApiResult<bool> {
        Ok(tx.delete_caseversion(id).await?)
    }
}
