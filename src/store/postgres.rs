//! `PostgreSQL` store backed by a `sqlx` pool.

use super::{
    AccountRepository, CatalogRepository, EnvironmentRepository, LibraryRepository, Store,
    StoreError, StoreResult, Transaction,
};
use crate::model::{
    catalog::{Account, Product, ProductVersion, Tag, User},
    environments::{Category, Element, Environment, Profile},
    library::{
        Case, CaseStep, CaseStepChanges, CaseVersion, CaseVersionChanges, NewCaseStep,
        NewCaseVersion, NewSuite, Suite, SuiteCase, SuiteChanges, SuiteStatus,
    },
    Id,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{
    error::ErrorKind,
    postgres::{PgPool, PgPoolOptions, PgRow},
    FromRow, PgConnection, Postgres, Row,
};
use std::time::Duration;
use tracing::{debug, instrument};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const ENVIRONMENT_SELECT: &str = r"
    SELECT e.id, e.profile_id,
        ARRAY(
            SELECT ee.element_id FROM environment_elements ee
            WHERE ee.environment_id = e.id ORDER BY ee.element_id
        ) AS element_ids
    FROM environments e
";

const CASEVERSION_SELECT: &str = r"
    SELECT cv.id, cv.case_id, cv.productversion_id, cv.name, cv.description, cv.latest,
        cv.created_by, cv.created_on,
        ARRAY(
            SELECT ce.environment_id FROM caseversion_environments ce
            WHERE ce.caseversion_id = cv.id ORDER BY ce.environment_id
        ) AS environment_ids,
        ARRAY(
            SELECT ct.tag_id FROM caseversion_tags ct
            WHERE ct.caseversion_id = cv.id ORDER BY ct.tag_id
        ) AS tag_ids
    FROM caseversions cv
";

/// Unique and foreign key violations surface as integrity errors.
fn map_err(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if matches!(
            db.kind(),
            ErrorKind::UniqueViolation | ErrorKind::ForeignKeyViolation
        ) {
            return StoreError::Integrity(db.message().to_string());
        }
    }
    StoreError::Database(err)
}

impl<'r> FromRow<'r, PgRow> for Product {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for ProductVersion {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            version: row.try_get("version")?,
            name: row.try_get("name")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Tag {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            product_id: row.try_get("product_id")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Profile {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Category {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Element {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            category_id: row.try_get("category_id")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Environment {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            profile_id: row.try_get("profile_id")?,
            element_ids: row.try_get("element_ids")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Suite {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<SuiteStatus>()
            .map_err(|err| sqlx::Error::Decode(err.into()))?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            product_id: row.try_get("product_id")?,
            description: row.try_get("description")?,
            status,
            created_by: row.try_get("created_by")?,
            created_on: row.try_get("created_on")?,
            modified_by: row.try_get("modified_by")?,
            modified_on: row.try_get("modified_on")?,
            deleted_by: row.try_get("deleted_by")?,
            deleted_on: row.try_get("deleted_on")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Case {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for SuiteCase {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            suite_id: row.try_get("suite_id")?,
            case_id: row.try_get("case_id")?,
            order: row.try_get("sort_order")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CaseStep {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            caseversion_id: row.try_get("caseversion_id")?,
            number: row.try_get("number")?,
            instruction: row.try_get("instruction")?,
            expected: row.try_get("expected")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for CaseVersion {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            case_id: row.try_get("case_id")?,
            productversion_id: row.try_get("productversion_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            latest: row.try_get("latest")?,
            created_by: row.try_get("created_by")?,
            created_on: row.try_get("created_on")?,
            environment_ids: row.try_get("environment_ids")?,
            tag_ids: row.try_get("tag_ids")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Opens the connection pool.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    /// Creates missing tables.
    ///
    /// # Errors
    /// Returns an error if a schema statement fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Schema applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTx {
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    async fn link_caseversion(
        &mut self,
        caseversion_id: Id,
        environment_ids: &[Id],
        tag_ids: &[Id],
    ) -> StoreResult<()> {
        for environment_id in environment_ids {
            sqlx::query(
                "INSERT INTO caseversion_environments (caseversion_id, environment_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(caseversion_id)
            .bind(environment_id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        }
        for tag_id in tag_ids {
            sqlx::query(
                "INSERT INTO caseversion_tags (caseversion_id, tag_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(caseversion_id)
            .bind(tag_id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        }
        Ok(())
    }

    async fn load_caseversion(&mut self, id: Id) -> StoreResult<Option<CaseVersion>> {
        let sql = format!("{CASEVERSION_SELECT} WHERE cv.id = $1");
        Ok(sqlx::query_as::<_, CaseVersion>(&sql)
            .bind(id)
            .fetch_optional(self.conn())
            .await?)
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for PgTx {
    async fn account(&mut self, username: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            r"
            SELECT u.id, u.username, u.api_key,
                ARRAY(
                    SELECT p.codename FROM user_permissions p
                    WHERE p.user_id = u.id ORDER BY p.codename
                ) AS permissions
            FROM users u
            WHERE u.username = $1
            ",
        )
        .bind(username)
        .fetch_optional(self.conn())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let api_key: String = row.try_get("api_key")?;
        Ok(Some(Account {
            user: User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
            },
            api_key: SecretString::from(api_key),
            permissions: row.try_get("permissions")?,
        }))
    }

    async fn users(&mut self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query("SELECT id, username FROM users ORDER BY id")
            .fetch_all(self.conn())
            .await?;
        rows.iter()
            .map(|row| {
                Ok(User {
                    id: row.try_get("id")?,
                    username: row.try_get("username")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, api_key, permissions))]
    async fn insert_user(
        &mut self,
        username: &str,
        api_key: &SecretString,
        permissions: &[String],
    ) -> StoreResult<User> {
        let id: Id = sqlx::query_scalar(
            "INSERT INTO users (username, api_key) VALUES ($1, $2) RETURNING id",
        )
        .bind(username)
        .bind(api_key.expose_secret())
        .fetch_one(self.conn())
        .await
        .map_err(map_err)?;

        for codename in permissions {
            sqlx::query(
                "INSERT INTO user_permissions (user_id, codename) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(codename)
            .execute(self.conn())
            .await?;
        }

        Ok(User {
            id,
            username: username.to_string(),
        })
    }
}

#[async_trait]
impl CatalogRepository for PgTx {
    async fn products(&mut self) -> StoreResult<Vec<Product>> {
        Ok(
            sqlx::query_as::<_, Product>("SELECT * FROM products ORDER BY id")
                .fetch_all(self.conn())
                .await?,
        )
    }

    async fn product(&mut self, id: Id) -> StoreResult<Option<Product>> {
        Ok(
            sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
                .bind(id)
                .fetch_optional(self.conn())
                .await?,
        )
    }

    async fn insert_product(&mut self, name: &str, description: &str) -> StoreResult<Product> {
        Ok(sqlx::query_as::<_, Product>(
            "INSERT INTO products (name, description) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(description)
        .fetch_one(self.conn())
        .await?)
    }

    async fn productversions(&mut self) -> StoreResult<Vec<ProductVersion>> {
        Ok(
            sqlx::query_as::<_, ProductVersion>("SELECT * FROM productversions ORDER BY id")
                .fetch_all(self.conn())
                .await?,
        )
    }

    async fn productversion(&mut self, id: Id) -> StoreResult<Option<ProductVersion>> {
        Ok(
            sqlx::query_as::<_, ProductVersion>("SELECT * FROM productversions WHERE id = $1")
                .bind(id)
                .fetch_optional(self.conn())
                .await?,
        )
    }

    async fn insert_productversion(
        &mut self,
        product_id: Id,
        version: &str,
        name: &str,
    ) -> StoreResult<ProductVersion> {
        sqlx::query_as::<_, ProductVersion>(
            "INSERT INTO productversions (product_id, version, name) VALUES ($1, $2, $3) \
             RETURNING *",
        )
        .bind(product_id)
        .bind(version)
        .bind(name)
        .fetch_one(self.conn())
        .await
        .map_err(map_err)
    }

    async fn tags(&mut self) -> StoreResult<Vec<Tag>> {
        Ok(sqlx::query_as::<_, Tag>("SELECT * FROM tags ORDER BY id")
            .fetch_all(self.conn())
            .await?)
    }

    async fn tag(&mut self, id: Id) -> StoreResult<Option<Tag>> {
        Ok(sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?)
    }

    async fn insert_tag(&mut self, name: &str, product_id: Option<Id>) -> StoreResult<Tag> {
        sqlx::query_as::<_, Tag>("INSERT INTO tags (name, product_id) VALUES ($1, $2) RETURNING *")
            .bind(name)
            .bind(product_id)
            .fetch_one(self.conn())
            .await
            .map_err(map_err)
    }
}

#[async_trait]
impl EnvironmentRepository for PgTx {
    async fn profiles(&mut self) -> StoreResult<Vec<Profile>> {
        Ok(
            sqlx::query_as::<_, Profile>("SELECT * FROM profiles ORDER BY id")
                .fetch_all(self.conn())
                .await?,
        )
    }

    async fn profile(&mut self, id: Id) -> StoreResult<Option<Profile>> {
        Ok(
            sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
                .bind(id)
                .fetch_optional(self.conn())
                .await?,
        )
    }

    async fn insert_profile(&mut self, name: &str) -> StoreResult<Profile> {
        Ok(
            sqlx::query_as::<_, Profile>("INSERT INTO profiles (name) VALUES ($1) RETURNING *")
                .bind(name)
                .fetch_one(self.conn())
                .await?,
        )
    }

    async fn update_profile(&mut self, id: Id, name: &str) -> StoreResult<Option<Profile>> {
        Ok(sqlx::query_as::<_, Profile>(
            "UPDATE profiles SET name = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(self.conn())
        .await?)
    }

    async fn delete_profile(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn categories(&mut self) -> StoreResult<Vec<Category>> {
        Ok(
            sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY id")
                .fetch_all(self.conn())
                .await?,
        )
    }

    async fn category(&mut self, id: Id) -> StoreResult<Option<Category>> {
        Ok(
            sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1")
                .bind(id)
                .fetch_optional(self.conn())
                .await?,
        )
    }

    async fn insert_category(&mut self, name: &str) -> StoreResult<Category> {
        Ok(
            sqlx::query_as::<_, Category>("INSERT INTO categories (name) VALUES ($1) RETURNING *")
                .bind(name)
                .fetch_one(self.conn())
                .await?,
        )
    }

    async fn update_category(&mut self, id: Id, name: &str) -> StoreResult<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>(
            "UPDATE categories SET name = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(self.conn())
        .await?)
    }

    async fn delete_category(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn elements(&mut self) -> StoreResult<Vec<Element>> {
        Ok(
            sqlx::query_as::<_, Element>("SELECT * FROM elements ORDER BY id")
                .fetch_all(self.conn())
                .await?,
        )
    }

    async fn element(&mut self, id: Id) -> StoreResult<Option<Element>> {
        Ok(
            sqlx::query_as::<_, Element>("SELECT * FROM elements WHERE id = $1")
                .bind(id)
                .fetch_optional(self.conn())
                .await?,
        )
    }

    async fn elements_in_category(&mut self, category_id: Id) -> StoreResult<Vec<Element>> {
        Ok(sqlx::query_as::<_, Element>(
            "SELECT * FROM elements WHERE category_id = $1 ORDER BY id",
        )
        .bind(category_id)
        .fetch_all(self.conn())
        .await?)
    }

    async fn insert_element(&mut self, name: &str, category_id: Id) -> StoreResult<Element> {
        sqlx::query_as::<_, Element>(
            "INSERT INTO elements (name, category_id) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(category_id)
        .fetch_one(self.conn())
        .await
        .map_err(map_err)
    }

    async fn update_element(&mut self, id: Id, name: &str) -> StoreResult<Option<Element>> {
        Ok(sqlx::query_as::<_, Element>(
            "UPDATE elements SET name = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(self.conn())
        .await?)
    }

    async fn delete_element(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM elements WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn environments(&mut self) -> StoreResult<Vec<Environment>> {
        let sql = format!("{ENVIRONMENT_SELECT} ORDER BY e.id");
        Ok(sqlx::query_as::<_, Environment>(&sql)
            .fetch_all(self.conn())
            .await?)
    }

    async fn environment(&mut self, id: Id) -> StoreResult<Option<Environment>> {
        let sql = format!("{ENVIRONMENT_SELECT} WHERE e.id = $1");
        Ok(sqlx::query_as::<_, Environment>(&sql)
            .bind(id)
            .fetch_optional(self.conn())
            .await?)
    }

    async fn insert_environment(
        &mut self,
        profile_id: Id,
        element_ids: &[Id],
    ) -> StoreResult<Environment> {
        let id: Id = sqlx::query_scalar(
            "INSERT INTO environments (profile_id) VALUES ($1) RETURNING id",
        )
        .bind(profile_id)
        .fetch_one(self.conn())
        .await
        .map_err(map_err)?;

        let mut element_ids = element_ids.to_vec();
        element_ids.sort_unstable();
        element_ids.dedup();
        for element_id in &element_ids {
            sqlx::query(
                "INSERT INTO environment_elements (environment_id, element_id) VALUES ($1, $2)",
            )
            .bind(id)
            .bind(element_id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        }

        Ok(Environment {
            id,
            profile_id,
            element_ids,
        })
    }

    async fn delete_environment(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM environments WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LibraryRepository for PgTx {
    async fn suites(&mut self, include_deleted: bool) -> StoreResult<Vec<Suite>> {
        Ok(sqlx::query_as::<_, Suite>(
            "SELECT * FROM suites WHERE $1 OR deleted_on IS NULL ORDER BY id",
        )
        .bind(include_deleted)
        .fetch_all(self.conn())
        .await?)
    }

    async fn suite(&mut self, id: Id, include_deleted: bool) -> StoreResult<Option<Suite>> {
        Ok(sqlx::query_as::<_, Suite>(
            "SELECT * FROM suites WHERE id = $1 AND ($2 OR deleted_on IS NULL)",
        )
        .bind(id)
        .bind(include_deleted)
        .fetch_optional(self.conn())
        .await?)
    }

    async fn insert_suite(&mut self, suite: &NewSuite, actor: Option<Id>) -> StoreResult<Suite> {
        sqlx::query_as::<_, Suite>(
            r"
            INSERT INTO suites (name, product_id, description, status, created_by, modified_by)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            ",
        )
        .bind(&suite.name)
        .bind(suite.product_id)
        .bind(&suite.description)
        .bind(suite.status.as_str())
        .bind(actor)
        .fetch_one(self.conn())
        .await
        .map_err(map_err)
    }

    async fn update_suite(
        &mut self,
        id: Id,
        changes: &SuiteChanges,
        actor: Option<Id>,
    ) -> StoreResult<Option<Suite>> {
        sqlx::query_as::<_, Suite>(
            r"
            UPDATE suites
            SET name = $2, product_id = $3, description = $4, status = $5,
                modified_by = $6, modified_on = NOW()
            WHERE id = $1 AND deleted_on IS NULL
            RETURNING *
            ",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(changes.product_id)
        .bind(&changes.description)
        .bind(changes.status.as_str())
        .bind(actor)
        .fetch_optional(self.conn())
        .await
        .map_err(map_err)
    }

    async fn soft_delete_suite(&mut self, id: Id, actor: Option<Id>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE suites SET deleted_by = $2, deleted_on = NOW() \
             WHERE id = $1 AND deleted_on IS NULL",
        )
        .bind(id)
        .bind(actor)
        .execute(self.conn())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_suite(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM suites WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn cases(&mut self) -> StoreResult<Vec<Case>> {
        Ok(sqlx::query_as::<_, Case>("SELECT * FROM cases ORDER BY id")
            .fetch_all(self.conn())
            .await?)
    }

    async fn case(&mut self, id: Id) -> StoreResult<Option<Case>> {
        Ok(sqlx::query_as::<_, Case>("SELECT * FROM cases WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?)
    }

    async fn insert_case(&mut self, product_id: Id) -> StoreResult<Case> {
        sqlx::query_as::<_, Case>("INSERT INTO cases (product_id) VALUES ($1) RETURNING *")
            .bind(product_id)
            .fetch_one(self.conn())
            .await
            .map_err(map_err)
    }

    async fn update_case(&mut self, id: Id, product_id: Id) -> StoreResult<Option<Case>> {
        sqlx::query_as::<_, Case>("UPDATE cases SET product_id = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(product_id)
            .fetch_optional(self.conn())
            .await
            .map_err(map_err)
    }

    async fn delete_case(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM cases WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn suitecases(&mut self) -> StoreResult<Vec<SuiteCase>> {
        Ok(
            sqlx::query_as::<_, SuiteCase>("SELECT * FROM suitecases ORDER BY id")
                .fetch_all(self.conn())
                .await?,
        )
    }

    async fn insert_suitecase(
        &mut self,
        suite_id: Id,
        case_id: Id,
        order: i32,
    ) -> StoreResult<SuiteCase> {
        sqlx::query_as::<_, SuiteCase>(
            "INSERT INTO suitecases (suite_id, case_id, sort_order) VALUES ($1, $2, $3) \
             RETURNING *",
        )
        .bind(suite_id)
        .bind(case_id)
        .bind(order)
        .fetch_one(self.conn())
        .await
        .map_err(map_err)
    }

    async fn clear_suitecases(&mut self, case_id: Id) -> StoreResult<()> {
        sqlx::query("DELETE FROM suitecases WHERE case_id = $1")
            .bind(case_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn casesteps(&mut self) -> StoreResult<Vec<CaseStep>> {
        Ok(
            sqlx::query_as::<_, CaseStep>("SELECT * FROM casesteps ORDER BY id")
                .fetch_all(self.conn())
                .await?,
        )
    }

    async fn casestep(&mut self, id: Id) -> StoreResult<Option<CaseStep>> {
        Ok(
            sqlx::query_as::<_, CaseStep>("SELECT * FROM casesteps WHERE id = $1")
                .bind(id)
                .fetch_optional(self.conn())
                .await?,
        )
    }

    async fn insert_casestep(&mut self, step: &NewCaseStep) -> StoreResult<CaseStep> {
        sqlx::query_as::<_, CaseStep>(
            r"
            INSERT INTO casesteps (caseversion_id, number, instruction, expected)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(step.caseversion_id)
        .bind(step.number)
        .bind(&step.instruction)
        .bind(&step.expected)
        .fetch_one(self.conn())
        .await
        .map_err(map_err)
    }

    async fn update_casestep(
        &mut self,
        id: Id,
        changes: &CaseStepChanges,
    ) -> StoreResult<Option<CaseStep>> {
        Ok(sqlx::query_as::<_, CaseStep>(
            "UPDATE casesteps SET number = $2, instruction = $3, expected = $4 \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(changes.number)
        .bind(&changes.instruction)
        .bind(&changes.expected)
        .fetch_optional(self.conn())
        .await?)
    }

    async fn delete_casestep(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM casesteps WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn caseversions(&mut self) -> StoreResult<Vec<CaseVersion>> {
        let sql = format!("{CASEVERSION_SELECT} ORDER BY cv.id");
        Ok(sqlx::query_as::<_, CaseVersion>(&sql)
            .fetch_all(self.conn())
            .await?)
    }

    async fn caseversion(&mut self, id: Id) -> StoreResult<Option<CaseVersion>> {
        self.load_caseversion(id).await
    }

    async fn insert_caseversion(
        &mut self,
        caseversion: &NewCaseVersion,
        actor: Option<Id>,
    ) -> StoreResult<CaseVersion> {
        let id: Id = sqlx::query_scalar(
            r"
            INSERT INTO caseversions (case_id, productversion_id, name, description, latest, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(caseversion.case_id)
        .bind(caseversion.productversion_id)
        .bind(&caseversion.name)
        .bind(&caseversion.description)
        .bind(caseversion.latest)
        .bind(actor)
        .fetch_one(self.conn())
        .await
        .map_err(map_err)?;

        self.link_caseversion(id, &caseversion.environment_ids, &caseversion.tag_ids)
            .await?;

        self.load_caseversion(id)
            .await?
            .ok_or_else(|| StoreError::Integrity(format!("case version vanished: {id}")))
    }

    async fn update_caseversion(
        &mut self,
        id: Id,
        changes: &CaseVersionChanges,
    ) -> StoreResult<Option<CaseVersion>> {
        let result = sqlx::query(
            "UPDATE caseversions SET name = $2, description = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.description)
        .execute(self.conn())
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query("DELETE FROM caseversion_environments WHERE caseversion_id = $1")
            .bind(id)
            .execute(self.conn())
            .await?;
        sqlx::query("DELETE FROM caseversion_tags WHERE caseversion_id = $1")
            .bind(id)
            .execute(self.conn())
            .await?;
        self.link_caseversion(id, &changes.environment_ids, &changes.tag_ids)
            .await?;

        self.load_caseversion(id).await
    }

    async fn delete_caseversion(&mut self, id: Id) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM caseversions WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }
}
