//! Joins repository records into the views resources filter on and render.
//!
//! Every builder loads whole tables once and joins in memory, so a list costs
//! a fixed number of queries regardless of its length. Records whose parent
//! has vanished are skipped.

use super::{StoreResult, Transaction};
use crate::model::{
    catalog::{Product, ProductVersionView, User},
    environments::{CategoryView, Element, ElementView, EnvironmentView},
    library::{CaseView, CaseVersionView, Suite, SuiteView},
    Id,
};
use std::collections::{BTreeMap, HashMap};

fn by_id<T: Clone>(records: &[T], id: impl Fn(&T) -> Id) -> HashMap<Id, T> {
    records.iter().map(|record| (id(record), record.clone())).collect()
}

pub async fn categories(tx: &mut dyn Transaction) -> StoreResult<Vec<CategoryView>> {
    let elements = tx.elements().await?;
    let mut grouped: BTreeMap<Id, Vec<Element>> = BTreeMap::new();
    for element in elements {
        grouped.entry(element.category_id).or_default().push(element);
    }
    Ok(tx
        .categories()
        .await?
        .into_iter()
        .map(|category| CategoryView {
            elements: grouped.remove(&category.id).unwrap_or_default(),
            category,
        })
        .collect())
}

pub async fn category(tx: &mut dyn Transaction, id: Id) -> StoreResult<Option<CategoryView>> {
    let Some(category) = tx.category(id).await? else {
        return Ok(None);
    };
    let elements = tx.elements_in_category(id).await?;
    Ok(Some(CategoryView { category, elements }))
}

pub async fn elements(tx: &mut dyn Transaction) -> StoreResult<Vec<ElementView>> {
    let categories = tx.categories().await?;
    let categories = by_id(&categories, |category| category.id);
    Ok(tx
        .elements()
        .await?
        .into_iter()
        .filter_map(|element| {
            let category = categories.get(&element.category_id)?.clone();
            Some(ElementView { element, category })
        })
        .collect())
}

pub async fn element(tx: &mut dyn Transaction, id: Id) -> StoreResult<Option<ElementView>> {
    let Some(element) = tx.element(id).await? else {
        return Ok(None);
    };
    Ok(tx
        .category(element.category_id)
        .await?
        .map(|category| ElementView { element, category }))
}

pub async fn environments(tx: &mut dyn Transaction) -> StoreResult<Vec<EnvironmentView>> {
    let profiles = tx.profiles().await?;
    let profiles = by_id(&profiles, |profile| profile.id);
    let elements = tx.elements().await?;
    let elements = by_id(&elements, |element| element.id);
    Ok(tx
        .environments()
        .await?
        .into_iter()
        .filter_map(|environment| {
            let profile = profiles.get(&environment.profile_id)?.clone();
            let elements = environment
                .element_ids
                .iter()
                .filter_map(|id| elements.get(id).cloned())
                .collect();
            Some(EnvironmentView {
                environment,
                profile,
                elements,
            })
        })
        .collect())
}

pub async fn environment(
    tx: &mut dyn Transaction,
    id: Id,
) -> StoreResult<Option<EnvironmentView>> {
    Ok(environments(tx)
        .await?
        .into_iter()
        .find(|view| view.environment.id == id))
}

pub async fn productversions(tx: &mut dyn Transaction) -> StoreResult<Vec<ProductVersionView>> {
    let products = tx.products().await?;
    let products = by_id(&products, |product| product.id);
    Ok(tx
        .productversions()
        .await?
        .into_iter()
        .filter_map(|productversion| {
            let product = products.get(&productversion.product_id)?.clone();
            Some(ProductVersionView {
                productversion,
                product,
            })
        })
        .collect())
}

pub async fn productversion(
    tx: &mut dyn Transaction,
    id: Id,
) -> StoreResult<Option<ProductVersionView>> {
    let Some(productversion) = tx.productversion(id).await? else {
        return Ok(None);
    };
    Ok(tx
        .product(productversion.product_id)
        .await?
        .map(|product| ProductVersionView {
            productversion,
            product,
        }))
}

fn suite_views(suites: Vec<Suite>, products: &HashMap<Id, Product>) -> Vec<SuiteView> {
    suites
        .into_iter()
        .filter_map(|suite| {
            let product = products.get(&suite.product_id)?.clone();
            Some(SuiteView { suite, product })
        })
        .collect()
}

/// Live suites.
pub async fn suites(tx: &mut dyn Transaction) -> StoreResult<Vec<SuiteView>> {
    let products = tx.products().await?;
    let products = by_id(&products, |product| product.id);
    let suites = tx.suites(false).await?;
    Ok(suite_views(suites, &products))
}

pub async fn suite(tx: &mut dyn Transaction, id: Id) -> StoreResult<Option<SuiteView>> {
    let Some(suite) = tx.suite(id, false).await? else {
        return Ok(None);
    };
    Ok(tx
        .product(suite.product_id)
        .await?
        .map(|product| SuiteView { suite, product }))
}

pub async fn cases(tx: &mut dyn Transaction) -> StoreResult<Vec<CaseView>> {
    let suites = tx.suites(false).await?;
    let suites = by_id(&suites, |suite| suite.id);
    let memberships = tx.suitecases().await?;
    Ok(tx
        .cases()
        .await?
        .into_iter()
        .map(|case| {
            let memberships: Vec<_> = memberships
                .iter()
                .filter(|membership| membership.case_id == case.id)
                .cloned()
                .collect();
            let mut suite_ids: Vec<Id> = memberships.iter().map(|m| m.suite_id).collect();
            suite_ids.sort_unstable();
            suite_ids.dedup();
            CaseView {
                suites: suite_ids
                    .iter()
                    .filter_map(|id| suites.get(id).cloned())
                    .collect(),
                memberships,
                case,
            }
        })
        .collect())
}

pub async fn case(tx: &mut dyn Transaction, id: Id) -> StoreResult<Option<CaseView>> {
    Ok(cases(tx).await?.into_iter().find(|view| view.case.id == id))
}

pub async fn caseversions(tx: &mut dyn Transaction) -> StoreResult<Vec<CaseVersionView>> {
    let cases = cases(tx).await?;
    let cases: HashMap<Id, CaseView> = cases.into_iter().map(|view| (view.case.id, view)).collect();
    let productversions = productversions(tx).await?;
    let productversions: HashMap<Id, ProductVersionView> = productversions
        .into_iter()
        .map(|view| (view.productversion.id, view))
        .collect();
    let environments = environments(tx).await?;
    let environments: HashMap<Id, EnvironmentView> = environments
        .into_iter()
        .map(|view| (view.environment.id, view))
        .collect();
    let tags = tx.tags().await?;
    let tags = by_id(&tags, |tag| tag.id);
    let users = tx.users().await?;
    let users: HashMap<Id, User> = by_id(&users, |user| user.id);
    let steps = tx.casesteps().await?;

    Ok(tx
        .caseversions()
        .await?
        .into_iter()
        .filter_map(|caseversion| {
            let case = cases.get(&caseversion.case_id)?.clone();
            let productversion = productversions.get(&caseversion.productversion_id)?.clone();
            let mut caseversion_steps: Vec<_> = steps
                .iter()
                .filter(|step| step.caseversion_id == caseversion.id)
                .cloned()
                .collect();
            caseversion_steps.sort_by_key(|step| (step.number, step.id));
            Some(CaseVersionView {
                environments: caseversion
                    .environment_ids
                    .iter()
                    .filter_map(|id| environments.get(id).cloned())
                    .collect(),
                tags: caseversion
                    .tag_ids
                    .iter()
                    .filter_map(|id| tags.get(id).cloned())
                    .collect(),
                created_by: caseversion
                    .created_by
                    .and_then(|id| users.get(&id).cloned()),
                steps: caseversion_steps,
                case,
                productversion,
                caseversion,
            })
        })
        .collect())
}

pub async fn caseversion(
    tx: &mut dyn Transaction,
    id: Id,
) -> StoreResult<Option<CaseVersionView>> {
    Ok(caseversions(tx)
        .await?
        .into_iter()
        .find(|view| view.caseversion.id == id))
}
