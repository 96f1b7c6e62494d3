//! Persistence access.
//!
//! Handlers never talk to a database directly: they open a [`Transaction`]
//! from the shared [`Store`], call the repository methods they need and
//! commit. A transaction that is dropped without `commit` rolls back, which is
//! what makes multi-record writes (combinatorial environment creation) atomic.
//!
//! Repositories return plain records; `views` joins them into the shapes the
//! resources filter on and render.

mod memory;
mod postgres;
pub mod views;

pub use memory::MemoryStore;
pub use postgres::PgStore;

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
use secrecy::SecretString;
use std::sync::Arc;

pub type SharedStore = Arc<dyn Store>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("unsupported DSN scheme: {0}")]
    UnsupportedDsn(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction; dropping it without `commit` discards its writes.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;

    /// Checks that the backend answers.
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait Transaction:
    AccountRepository + CatalogRepository + EnvironmentRepository + LibraryRepository + Send
{
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait AccountRepository {
    async fn account(&mut self, username: &str) -> StoreResult<Option<Account>>;

    async fn users(&mut self) -> StoreResult<Vec<User>>;

    async fn insert_user(
        &mut self,
        username: &str,
        api_key: &SecretString,
        permissions: &[String],
    ) -> StoreResult<User>;
}

#[async_trait]
pub trait CatalogRepository {
    async fn products(&mut self) -> StoreResult<Vec<Product>>;

    async fn product(&mut self, id: Id) -> StoreResult<Option<Product>>;

    async fn insert_product(&mut self, name: &str, description: &str) -> StoreResult<Product>;

    async fn productversions(&mut self) -> StoreResult<Vec<ProductVersion>>;

    async fn productversion(&mut self, id: Id) -> StoreResult<Option<ProductVersion>>;

    async fn insert_productversion(
        &mut self,
        product_id: Id,
        version: &str,
        name: &str,
    ) -> StoreResult<ProductVersion>;

    async fn tags(&mut self) -> StoreResult<Vec<Tag>>;

    async fn tag(&mut self, id: Id) -> StoreResult<Option<Tag>>;

    async fn insert_tag(&mut self, name: &str, product_id: Option<Id>) -> StoreResult<Tag>;
}

#[async_trait]
pub trait EnvironmentRepository {
    async fn profiles(&mut self) -> StoreResult<Vec<Profile>>;

    async fn profile(&mut self, id: Id) -> StoreResult<Option<Profile>>;

    async fn insert_profile(&mut self, name: &str) -> StoreResult<Profile>;

    async fn update_profile(&mut self, id: Id, name: &str) -> StoreResult<Option<Profile>>;

    /// Deletes the profile and its environments.
    async fn delete_profile(&mut self, id: Id) -> StoreResult<bool>;

    async fn categories(&mut self) -> StoreResult<Vec<Category>>;

    async fn category(&mut self, id: Id) -> StoreResult<Option<Category>>;

    async fn insert_category(&mut self, name: &str) -> StoreResult<Category>;

    async fn update_category(&mut self, id: Id, name: &str) -> StoreResult<Option<Category>>;

    /// Deletes the category and its elements.
    async fn delete_category(&mut self, id: Id) -> StoreResult<bool>;

    async fn elements(&mut self) -> StoreResult<Vec<Element>>;

    async fn element(&mut self, id: Id) -> StoreResult<Option<Element>>;

    /// Elements of one category, ordered by id.
    async fn elements_in_category(&mut self, category_id: Id) -> StoreResult<Vec<Element>>;

    async fn insert_element(&mut self, name: &str, category_id: Id) -> StoreResult<Element>;

    /// Renames an element; the category is fixed at creation.
    async fn update_element(&mut self, id: Id, name: &str) -> StoreResult<Option<Element>>;

    async fn delete_element(&mut self, id: Id) -> StoreResult<bool>;

    async fn environments(&mut self) -> StoreResult<Vec<Environment>>;

    async fn environment(&mut self, id: Id) -> StoreResult<Option<Environment>>;

    async fn insert_environment(
        &mut self,
        profile_id: Id,
        element_ids: &[Id],
    ) -> StoreResult<Environment>;

    async fn delete_environment(&mut self, id: Id) -> StoreResult<bool>;
}

#[async_trait]
pub trait LibraryRepository {
    async fn suites(&mut self, include_deleted: bool) -> StoreResult<Vec<Suite>>;

    async fn suite(&mut self, id: Id, include_deleted: bool) -> StoreResult<Option<Suite>>;

    async fn insert_suite(&mut self, suite: &NewSuite, actor: Option<Id>) -> StoreResult<Suite>;

    /// Updates a live suite, stamping `modified_by`/`modified_on`.
    async fn update_suite(
        &mut self,
        id: Id,
        changes: &SuiteChanges,
        actor: Option<Id>,
    ) -> StoreResult<Option<Suite>>;

    /// Flags a live suite as deleted; the row and its memberships are kept.
    async fn soft_delete_suite(&mut self, id: Id, actor: Option<Id>) -> StoreResult<bool>;

    /// Removes a suite (live or soft-deleted) and its memberships.
    async fn purge_suite(&mut self, id: Id) -> StoreResult<bool>;

    async fn cases(&mut self) -> StoreResult<Vec<Case>>;

    async fn case(&mut self, id: Id) -> StoreResult<Option<Case>>;

    async fn insert_case(&mut self, product_id: Id) -> StoreResult<Case>;

    async fn update_case(&mut self, id: Id, product_id: Id) -> StoreResult<Option<Case>>;

    /// Deletes the case with its versions, steps and memberships.
    async fn delete_case(&mut self, id: Id) -> StoreResult<bool>;

    /// All memberships in storage order.
    async fn suitecases(&mut self) -> StoreResult<Vec<SuiteCase>>;

    async fn insert_suitecase(&mut self, suite_id: Id, case_id: Id, order: i32)
        -> StoreResult<SuiteCase>;

    async fn clear_suitecases(&mut self, case_id: Id) -> StoreResult<()>;

    async fn casesteps(&mut self) -> StoreResult<Vec<CaseStep>>;

    async fn casestep(&mut self, id: Id) -> StoreResult<Option<CaseStep>>;

    async fn insert_casestep(&mut self, step: &NewCaseStep) -> StoreResult<CaseStep>;

    async fn update_casestep(
        &mut self,
        id: Id,
        changes: &CaseStepChanges,
    ) -> StoreResult<Option<CaseStep>>;

    async fn delete_casestep(&mut self, id: Id) -> StoreResult<bool>;

    async fn caseversions(&mut self) -> StoreResult<Vec<CaseVersion>>;

    async fn caseversion(&mut self, id: Id) -> StoreResult<Option<CaseVersion>>;

    async fn insert_caseversion(
        &mut self,
        caseversion: &NewCaseVersion,
        actor: Option<Id>,
    ) -> StoreResult<CaseVersion>;

    async fn update_caseversion(
        &mut self,
        id: Id,
        changes: &CaseVersionChanges,
    ) -> StoreResult<Option<CaseVersion>>;

    /// Deletes the case version and its steps.
    async fn delete_caseversion(&mut self, id: Id) -> StoreResult<bool>;
}

/// Opens the store named by `dsn`: `memory://` or `postgres://...`.
///
/// # Errors
/// Returns an error for unknown schemes or when the database is unreachable.
pub async fn connect(dsn: &str, max_connections: u32) -> StoreResult<SharedStore> {
    if dsn.starts_with("memory:") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
        let store = PgStore::connect(dsn, max_connections).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }
    let scheme = dsn.split(':').next().unwrap_or_default();
    Err(StoreError::UnsupportedDsn(scheme.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_memory() {
        let store = connect("memory://", 1).await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn connect_rejects_unknown_scheme() {
        let result = connect("mysql://localhost/casetrack", 1).await;
        assert!(matches!(result, Err(StoreError::UnsupportedDsn(scheme)) if scheme == "mysql"));
    }
}
