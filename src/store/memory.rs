//! In-memory store used by tests and `--dsn memory://`.
//!
//! A transaction locks the shared state, works on a copy and writes the copy
//! back on commit. Transactions are serialized by the lock.

use super::{
    AccountRepository, CatalogRepository, EnvironmentRepository, LibraryRepository, Store,
    StoreError, StoreResult, Transaction,
};
use crate::model::{
    catalog::{Account, Product, ProductVersion, Tag, User},
    environments::{Category, Element, Environment, Profile},
    library::{
        Case, CaseStep, CaseStepChanges, CaseVersion, CaseVersionChanges, NewCaseStep,
        NewCaseVersion, NewSuite, Suite, SuiteCase, SuiteChanges,
    },
    Id,
};
use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
struct State {
    last_id: Id,
    accounts: BTreeMap<Id, Account>,
    products: BTreeMap<Id, Product>,
    productversions: BTreeMap<Id, ProductVersion>,
    tags: BTreeMap<Id, Tag>,
    profiles: BTreeMap<Id, Profile>,
    categories: BTreeMap<Id, Category>,
    elements: BTreeMap<Id, Element>,
    environments: BTreeMap<Id, Environment>,
    suites: BTreeMap<Id, Suite>,
    cases: BTreeMap<Id, Case>,
    suitecases: BTreeMap<Id, SuiteCase>,
    casesteps: BTreeMap<Id, CaseStep>,
    caseversions: BTreeMap<Id, CaseVersion>,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.last_id += 1;
        self.last_id
    }

    fn remove_environment_refs(&mut self, environment_id: Id) {
        for caseversion in self.caseversions.values_mut() {
            caseversion.environment_ids.retain(|id| *id != environment_id);
        }
    }

    fn remove_environments_where(&mut self, predicate: impl Fn(&Environment) -> bool) {
        let doomed: Vec<Id> = self
            .environments
            .values()
            .filter(|environment| predicate(environment))
            .map(|environment| environment.id)
            .collect();
        for id in doomed {
            self.environments.remove(&id);
            self.remove_environment_refs(id);
        }
    }

    fn remove_caseversion(&mut self, id: Id) -> bool {
        if self.caseversions.remove(&id).is_none() {
            return false;
        }
        self.casesteps.retain(|_, step| step.caseversion_id != id);
        true
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for MemoryTx {
    async fn account(&mut self, username: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .work
            .accounts
            .values()
            .find(|account| account.user.username == username)
            .cloned())
    }

    async fn users(&mut self) -> StoreResult<Vec<User>> {
        Ok(self
            .work
            .accounts
            .values()
            .map(|account| account.user.clone())
            .collect())
    }

    async fn insert_user(
        &mut self,
        username: &str,
        api_key: &SecretString,
        permissions: &[String],
    ) -> StoreResult<User> {
        if self
            .work
            .accounts
            .values()
            .any(|account| account.user.username == username)
        {
            return Err(StoreError::Integrity(format!(
                "username already exists: {username}"
            )));
        }
        let user = User {
            id: self.work.next_id(),
            username: username.to_string(),
        };
        self.work.accounts.insert(
            user.id,
            Account {
                user: user.clone(),
                api_key: api_key.clone(),
                permissions: permissions.to_vec(),
            },
        );
        Ok(user)
    }
}

#[async_trait]
impl CatalogRepository for MemoryTx {
    async fn products(&mut self) -> StoreResult<Vec<Product>> {
        Ok(self.work.products.values().cloned().collect())
    }

    async fn product(&mut self, id: Id) -> StoreResult<Option<Product>> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn insert_product(&mut self, name: &str, description: &str) -> StoreResult<Product> {
        let product = Product {
            id: self.work.next_id(),
            name: name.to_string(),
            description: description.to_string(),
        };
        self.work.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn productversions(&mut self) -> StoreResult<Vec<ProductVersion>> {
        Ok(self.work.productversions.values().cloned().collect())
    }

    async fn productversion(&mut self, id: Id) -> StoreResult<Option<ProductVersion>> {
        Ok(self.work.productversions.get(&id).cloned())
    }

    async fn insert_productversion(
        &mut self,
        product_id: Id,
        version: &str,
        name: &str,
    ) -> StoreResult<ProductVersion> {
        if !self.work.products.contains_key(&product_id) {
            return Err(StoreError::Integrity(format!("unknown product: {product_id}")));
        }
        let productversion = ProductVersion {
            id: self.work.next_id(),
            product_id,
            version: version.to_string(),
            name: name.to_string(),
        };
        self.work
            .productversions
            .insert(productversion.id, productversion.clone());
        Ok(productversion)
    }

    async fn tags(&mut self) -> StoreResult<Vec<Tag>> {
        Ok(self.work.tags.values().cloned().collect())
    }

    async fn tag(&mut self, id: Id) -> StoreResult<Option<Tag>> {
        Ok(self.work.tags.get(&id).cloned())
    }

    async fn insert_tag(&mut self, name: &str, product_id: Option<Id>) -> StoreResult<Tag> {
        let tag = Tag {
            id: self.work.next_id(),
            name: name.to_string(),
            product_id,
        };
        self.work.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }
}

#[async_trait]
impl EnvironmentRepository for MemoryTx {
    async fn profiles(&mut self) -> StoreResult<Vec<Profile>> {
        Ok(self.work.profiles.values().cloned().collect())
    }

    async fn profile(&mut self, id: Id) -> StoreResult<Option<Profile>> {
        Ok(self.work.profiles.get(&id).cloned())
    }

    async fn insert_profile(&mut self, name: &str) -> StoreResult<Profile> {
        let profile = Profile {
            id: self.work.next_id(),
            name: name.to_string(),
        };
        self.work.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn update_profile(&mut self, id: Id, name: &str) -> StoreResult<Option<Profile>> {
        Ok(self.work.profiles.get_mut(&id).map(|profile| {
            profile.name = name.to_string();
            profile.clone()
        }))
    }

    async fn delete_profile(&mut self, id: Id) -> StoreResult<bool> {
        if self.work.profiles.remove(&id).is_none() {
            return Ok(false);
        }
        self.work
            .remove_environments_where(|environment| environment.profile_id == id);
        Ok(true)
    }

    async fn categories(&mut self) -> StoreResult<Vec<Category>> {
        Ok(self.work.categories.values().cloned().collect())
    }

    async fn category(&mut self, id: Id) -> StoreResult<Option<Category>> {
        Ok(self.work.categories.get(&id).cloned())
    }

    async fn insert_category(&mut self, name: &str) -> StoreResult<Category> {
        let category = Category {
            id: self.work.next_id(),
            name: name.to_string(),
        };
        self.work.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(&mut self, id: Id, name: &str) -> StoreResult<Option<Category>> {
        Ok(self.work.categories.get_mut(&id).map(|category| {
            category.name = name.to_string();
            category.clone()
        }))
    }

    async fn delete_category(&mut self, id: Id) -> StoreResult<bool> {
        if self.work.categories.remove(&id).is_none() {
            return Ok(false);
        }
        let doomed: Vec<Id> = self
            .work
            .elements
            .values()
            .filter(|element| element.category_id == id)
            .map(|element| element.id)
            .collect();
        for element_id in doomed {
            self.delete_element(element_id).await?;
        }
        Ok(true)
    }

    async fn elements(&mut self) -> StoreResult<Vec<Element>> {
        Ok(self.work.elements.values().cloned().collect())
    }

    async fn element(&mut self, id: Id) -> StoreResult<Option<Element>> {
        Ok(self.work.elements.get(&id).cloned())
    }

    async fn elements_in_category(&mut self, category_id: Id) -> StoreResult<Vec<Element>> {
        Ok(self
            .work
            .elements
            .values()
            .filter(|element| element.category_id == category_id)
            .cloned()
            .collect())
    }

    async fn insert_element(&mut self, name: &str, category_id: Id) -> StoreResult<Element> {
        if !self.work.categories.contains_key(&category_id) {
            return Err(StoreError::Integrity(format!(
                "unknown category: {category_id}"
            )));
        }
        let element = Element {
            id: self.work.next_id(),
            name: name.to_string(),
            category_id,
        };
        self.work.elements.insert(element.id, element.clone());
        Ok(element)
    }

    async fn update_element(&mut self, id: Id, name: &str) -> StoreResult<Option<Element>> {
        Ok(self.work.elements.get_mut(&id).map(|element| {
            element.name = name.to_string();
            element.clone()
        }))
    }

    async fn delete_element(&mut self, id: Id) -> StoreResult<bool> {
        if self.work.elements.remove(&id).is_none() {
            return Ok(false);
        }
        for environment in self.work.environments.values_mut() {
            environment.element_ids.retain(|element_id| *element_id != id);
        }
        Ok(true)
    }

    async fn environments(&mut self) -> StoreResult<Vec<Environment>> {
        Ok(self.work.environments.values().cloned().collect())
    }

    async fn environment(&mut self, id: Id) -> StoreResult<Option<Environment>> {
        Ok(self.work.environments.get(&id).cloned())
    }

    async fn insert_environment(
        &mut self,
        profile_id: Id,
        element_ids: &[Id],
    ) -> StoreResult<Environment> {
        if !self.work.profiles.contains_key(&profile_id) {
            return Err(StoreError::Integrity(format!("unknown profile: {profile_id}")));
        }
        if let Some(missing) = element_ids
            .iter()
            .find(|id| !self.work.elements.contains_key(*id))
        {
            return Err(StoreError::Integrity(format!("unknown element: {missing}")));
        }
        let mut element_ids = element_ids.to_vec();
        element_ids.sort_unstable();
        element_ids.dedup();
        let environment = Environment {
            id: self.work.next_id(),
            profile_id,
            element_ids,
        };
        self.work
            .environments
            .insert(environment.id, environment.clone());
        Ok(environment)
    }

    async fn delete_environment(&mut self, id: Id) -> StoreResult<bool> {
        if self.work.environments.remove(&id).is_none() {
            return Ok(false);
        }
        self.work.remove_environment_refs(id);
        Ok(true)
    }
}

#[async_trait]
impl LibraryRepository for MemoryTx {
    async fn suites(&mut self, include_deleted: bool) -> StoreResult<Vec<Suite>> {
        Ok(self
            .work
            .suites
            .values()
            .filter(|suite| include_deleted || !suite.is_deleted())
            .cloned()
            .collect())
    }

    async fn suite(&mut self, id: Id, include_deleted: bool) -> StoreResult<Option<Suite>> {
        Ok(self
            .work
            .suites
            .get(&id)
            .filter(|suite| include_deleted || !suite.is_deleted())
            .cloned())
    }

    async fn insert_suite(&mut self, suite: &NewSuite, actor: Option<Id>) -> StoreResult<Suite> {
        if !self.work.products.contains_key(&suite.product_id) {
            return Err(StoreError::Integrity(format!(
                "unknown product: {}",
                suite.product_id
            )));
        }
        let now = Utc::now();
        let suite = Suite {
            id: self.work.next_id(),
            name: suite.name.clone(),
            product_id: suite.product_id,
            description: suite.description.clone(),
            status: suite.status,
            created_by: actor,
            created_on: now,
            modified_by: actor,
            modified_on: now,
            deleted_by: None,
            deleted_on: None,
        };
        self.work.suites.insert(suite.id, suite.clone());
        Ok(suite)
    }

    async fn update_suite(
        &mut self,
        id: Id,
        changes: &SuiteChanges,
        actor: Option<Id>,
    ) -> StoreResult<Option<Suite>> {
        if !self.work.products.contains_key(&changes.product_id) {
            return Err(StoreError::Integrity(format!(
                "unknown product: {}",
                changes.product_id
            )));
        }
        Ok(self
            .work
            .suites
            .get_mut(&id)
            .filter(|suite| !suite.is_deleted())
            .map(|suite| {
                suite.name.clone_from(&changes.name);
                suite.product_id = changes.product_id;
                suite.description.clone_from(&changes.description);
                suite.status = changes.status;
                suite.modified_by = actor;
                suite.modified_on = Utc::now();
                suite.clone()
            }))
    }

    async fn soft_delete_suite(&mut self, id: Id, actor: Option<Id>) -> StoreResult<bool> {
        Ok(self
            .work
            .suites
            .get_mut(&id)
            .filter(|suite| !suite.is_deleted())
            .map(|suite| {
                suite.deleted_by = actor;
                suite.deleted_on = Some(Utc::now());
            })
            .is_some())
    }

    async fn purge_suite(&mut self, id: Id) -> StoreResult<bool> {
        if self.work.suites.remove(&id).is_none() {
            return Ok(false);
        }
        self.work
            .suitecases
            .retain(|_, membership| membership.suite_id != id);
        Ok(true)
    }

    async fn cases(&mut self) -> StoreResult<Vec<Case>> {
        Ok(self.work.cases.values().cloned().collect())
    }

    async fn case(&mut self, id: Id) -> StoreResult<Option<Case>> {
        Ok(self.work.cases.get(&id).cloned())
    }

    async fn insert_case(&mut self, product_id: Id) -> StoreResult<Case> {
        if !self.work.products.contains_key(&product_id) {
            return Err(StoreError::Integrity(format!("unknown product: {product_id}")));
        }
        let case = Case {
            id: self.work.next_id(),
            product_id,
        };
        self.work.cases.insert(case.id, case.clone());
        Ok(case)
    }

    async fn update_case(&mut self, id: Id, product_id: Id) -> StoreResult<Option<Case>> {
        if !self.work.products.contains_key(&product_id) {
            return Err(StoreError::Integrity(format!("unknown product: {product_id}")));
        }
        Ok(self.work.cases.get_mut(&id).map(|case| {
            case.product_id = product_id;
            case.clone()
        }))
    }

    async fn delete_case(&mut self, id: Id) -> StoreResult<bool> {
        if self.work.cases.remove(&id).is_none() {
            return Ok(false);
        }
        self.work
            .suitecases
            .retain(|_, membership| membership.case_id != id);
        let doomed: Vec<Id> = self
            .work
            .caseversions
            .values()
            .filter(|caseversion| caseversion.case_id == id)
            .map(|caseversion| caseversion.id)
            .collect();
        for caseversion_id in doomed {
            self.work.remove_caseversion(caseversion_id);
        }
        Ok(true)
    }

    async fn suitecases(&mut self) -> StoreResult<Vec<SuiteCase>> {
        Ok(self.work.suitecases.values().cloned().collect())
    }

    async fn insert_suitecase(
        &mut self,
        suite_id: Id,
        case_id: Id,
        order: i32,
    ) -> StoreResult<SuiteCase> {
        if !self.work.suites.contains_key(&suite_id) {
            return Err(StoreError::Integrity(format!("unknown suite: {suite_id}")));
        }
        if !self.work.cases.contains_key(&case_id) {
            return Err(StoreError::Integrity(format!("unknown case: {case_id}")));
        }
        let membership = SuiteCase {
            id: self.work.next_id(),
            suite_id,
            case_id,
            order,
        };
        self.work
            .suitecases
            .insert(membership.id, membership.clone());
        Ok(membership)
    }

    async fn clear_suitecases(&mut self, case_id: Id) -> StoreResult<()> {
        self.work
            .suitecases
            .retain(|_, membership| membership.case_id != case_id);
        Ok(())
    }

    async fn casesteps(&mut self) -> StoreResult<Vec<CaseStep>> {
        Ok(self.work.casesteps.values().cloned().collect())
    }

    async fn casestep(&mut self, id: Id) -> StoreResult<Option<CaseStep>> {
        Ok(self.work.casesteps.get(&id).cloned())
    }

    async fn insert_casestep(&mut self, step: &NewCaseStep) -> StoreResult<CaseStep> {
        if !self.work.caseversions.contains_key(&step.caseversion_id) {
            return Err(StoreError::Integrity(format!(
                "unknown case version: {}",
                step.caseversion_id
            )));
        }
        let step = CaseStep {
            id: self.work.next_id(),
            caseversion_id: step.caseversion_id,
            number: step.number,
            instruction: step.instruction.clone(),
            expected: step.expected.clone(),
        };
        self.work.casesteps.insert(step.id, step.clone());
        Ok(step)
    }

    async fn update_casestep(
        &mut self,
        id: Id,
        changes: &CaseStepChanges,
    ) -> StoreResult<Option<CaseStep>> {
        Ok(self.work.casesteps.get_mut(&id).map(|step| {
            step.number = changes.number;
            step.instruction.clone_from(&changes.instruction);
            step.expected.clone_from(&changes.expected);
            step.clone()
        }))
    }

    async fn delete_casestep(&mut self, id: Id) -> StoreResult<bool> {
        Ok(self.work.casesteps.remove(&id).is_some())
    }

    async fn caseversions(&mut self) -> StoreResult<Vec<CaseVersion>> {
        Ok(self.work.caseversions.values().cloned().collect())
    }

    async fn caseversion(&mut self, id: Id) -> StoreResult<Option<CaseVersion>> {
        Ok(self.work.caseversions.get(&id).cloned())
    }

    async fn insert_caseversion(
        &mut self,
        caseversion: &NewCaseVersion,
        actor: Option<Id>,
    ) -> StoreResult<CaseVersion> {
        if !self.work.cases.contains_key(&caseversion.case_id) {
            return Err(StoreError::Integrity(format!(
                "unknown case: {}",
                caseversion.case_id
            )));
        }
        if !self
            .work
            .productversions
            .contains_key(&caseversion.productversion_id)
        {
            return Err(StoreError::Integrity(format!(
                "unknown product version: {}",
                caseversion.productversion_id
            )));
        }
        let caseversion = CaseVersion {
            id: self.work.next_id(),
            case_id: caseversion.case_id,
            productversion_id: caseversion.productversion_id,
            name: caseversion.name.clone(),
            description: caseversion.description.clone(),
            latest: caseversion.latest,
            created_by: actor,
            created_on: Utc::now(),
            environment_ids: caseversion.environment_ids.clone(),
            tag_ids: caseversion.tag_ids.clone(),
        };
        self.work
            .caseversions
            .insert(caseversion.id, caseversion.clone());
        Ok(caseversion)
    }

    async fn update_caseversion(
        &mut self,
        id: Id,
        changes: &CaseVersionChanges,
    ) -> StoreResult<Option<CaseVersion>> {
        Ok(self.work.caseversions.get_mut(&id).map(|caseversion| {
            caseversion.name.clone_from(&changes.name);
            caseversion.description.clone_from(&changes.description);
            caseversion.environment_ids.clone_from(&changes.environment_ids);
            caseversion.tag_ids.clone_from(&changes.tag_ids);
            caseversion.clone()
        }))
    }

    async fn delete_caseversion(&mut self, id: Id) -> StoreResult<bool> {
        Ok(self.work.remove_caseversion(id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_profile("Browsers").await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.profiles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let profile = tx.insert_profile("Browsers").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.profile(profile.id).await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn deleting_a_category_removes_its_elements_from_environments() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let profile = tx.insert_profile("Desktop").await.unwrap();
        let os = tx.insert_category("OS").await.unwrap();
        let browser = tx.insert_category("Browser").await.unwrap();
        let linux = tx.insert_element("Linux", os.id).await.unwrap();
        let firefox = tx.insert_element("Firefox", browser.id).await.unwrap();
        let environment = tx
            .insert_environment(profile.id, &[linux.id, firefox.id])
            .await
            .unwrap();

        assert!(tx.delete_category(os.id).await.unwrap());

        assert!(tx.element(linux.id).await.unwrap().is_none());
        let environment = tx.environment(environment.id).await.unwrap().unwrap();
        assert_eq!(environment.element_ids, vec![firefox.id]);
    }
}
