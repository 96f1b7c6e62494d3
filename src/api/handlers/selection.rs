//! Read-only case version listings for multi-select widgets.
//!
//! Both resources accept `<field>__ne` exclusions and denormalize the case,
//! product and creator onto every record so the client needs no follow-up
//! requests.

use super::{
    catalog::{productversion_object, productversion_uri, tag_object},
    library::Cases,
};
use crate::{
    api::{
        error::ApiResult,
        query::{parse_id, Filtering, Params},
        reference::resource_uri,
        resource::{object, Resource, ResourceMeta, Verb},
    },
    model::{library::CaseVersionView, Id},
    store::{views, Transaction},
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const READ_ONLY: &[Verb] = &[Verb::Get];

const FIELDS: &[&str] = &["id", "name", "latest", "case", "productversion", "tags"];

/// Query parameter naming the suite whose ordering `CaseSelection` reports.
const SUITE_PARAM: &str = "case__suites";

fn selection_object(view: &CaseVersionView, productversion: Value) -> Map<String, Value> {
    let tags: Vec<Value> = view.tags.iter().map(tag_object).collect();
    object(json!({
        "id": view.caseversion.id,
        "name": view.caseversion.name,
        "latest": view.caseversion.latest,
        "case": resource_uri(Cases::META.name, view.case.case.id),
        "productversion": productversion,
        "tags": tags,
    }))
}

/// Adds the denormalized case, product and creator keys.
fn enrich_selection(view: &CaseVersionView, object: &mut Map<String, Value>) {
    let product_id = view.case.case.product_id.to_string();
    object.insert(
        "case_id".to_string(),
        Value::String(view.case.case.id.to_string()),
    );
    object.insert("product_id".to_string(), Value::String(product_id.clone()));
    object.insert("product".to_string(), json!({ "id": product_id }));
    object.insert(
        "created_by".to_string(),
        view.created_by.as_ref().map_or(Value::Null, |user| {
            json!({ "id": user.id.to_string(), "username": user.username })
        }),
    );
}

/// The suite named by `case__suites`, if present and parsable.
fn selected_suite(params: &Params) -> Option<Id> {
    params.get(SUITE_PARAM).and_then(|raw| parse_id(raw).ok())
}

pub struct CaseSelection;

#[async_trait]
impl Resource for CaseSelection {
    type View = CaseVersionView;

    const META: ResourceMeta = ResourceMeta {
        name: "caseselection",
        description: "Case versions for selecting cases into a suite",
        fields: FIELDS,
        filtering: &[
            ("productversion", Filtering::AllWithRelations),
            ("tags", Filtering::AllWithRelations),
            ("case", Filtering::AllWithRelations),
            ("latest", Filtering::All),
            ("name", Filtering::All),
        ],
        ordering: &["id", "name"],
        list_methods: READ_ONLY,
        detail_methods: READ_ONLY,
        negation: true,
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<CaseVersionView>> {
        Ok(views::caseversions(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<CaseVersionView>> {
        Ok(views::caseversion(tx, id).await?)
    }

    fn dehydrate(view: &CaseVersionView) -> Map<String, Value> {
        selection_object(
            view,
            Value::String(productversion_uri(view.caseversion.productversion_id)),
        )
    }

    fn enrich(view: &CaseVersionView, object: &mut Map<String, Value>, params: &Params) {
        enrich_selection(view, object);
        let order = selected_suite(params).and_then(|suite_id| view.case.order_in_suite(suite_id));
        object.insert("order".to_string(), order.map_or(Value::Null, Value::from));
    }

    /// Sorts by position in the selected suite; cases outside it go last.
    fn default_order(views: &mut [CaseVersionView], params: &Params) {
        let Some(suite_id) = selected_suite(params) else {
            return;
        };
        views.sort_by_key(|view| {
            let order = view.case.order_in_suite(suite_id);
            (order.is_none(), order, view.caseversion.id)
        });
    }
}

pub struct CaseVersionSelection;

#[async_trait]
impl Resource for CaseVersionSelection {
    type View = CaseVersionView;

    const META: ResourceMeta = ResourceMeta {
        name: "caseversionselection",
        description: "Case versions for selecting into a run",
        fields: FIELDS,
        filtering: &[
            ("productversion", Filtering::AllWithRelations),
            ("tags", Filtering::AllWithRelations),
            ("case", Filtering::AllWithRelations),
            ("name", Filtering::All),
        ],
        ordering: &["id", "name"],
        list_methods: READ_ONLY,
        detail_methods: READ_ONLY,
        negation: true,
        ..ResourceMeta::DEFAULT
    };

    async fn fetch_list(tx: &mut dyn Transaction) -> ApiResult<Vec<CaseVersionView>> {
        Ok(views::caseversions(tx).await?)
    }

    async fn fetch_one(tx: &mut dyn Transaction, id: Id) -> ApiResult<Option<CaseVersionView>> {
        Ok(views::caseversion(tx, id).await?)
    }

    fn dehydrate(view: &CaseVersionView) -> Map<String, Value> {
        selection_object(view, productversion_object(&view.productversion))
    }

    fn enrich(view: &CaseVersionView, object: &mut Map<String, Value>, _params: &Params) {
        enrich_selection(view, object);
        object.insert(
            "productversion_name".to_string(),
            Value::String(view.productversion.productversion.name.clone()),
        );
    }
}
