//! Suites, cases, case versions and case steps.

use super::{
    catalog::{Product, ProductVersionView, Tag, User},
    environments::EnvironmentView,
    Field, Id, Lookup, Scalar,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    #[default]
    Draft,
    Active,
    Disabled,
}

impl SuiteStatus {
    /// Canonical representation used in payloads and the `suites.status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown suite status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    pub id: Id,
    pub name: String,
    pub product_id: Id,
    pub description: String,
    pub status: SuiteStatus,
    pub created_by: Option<Id>,
    pub created_on: DateTime<Utc>,
    pub modified_by: Option<Id>,
    pub modified_on: DateTime<Utc>,
    pub deleted_by: Option<Id>,
    pub deleted_on: Option<DateTime<Utc>>,
}

impl Suite {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_on.is_some()
    }
}

impl Lookup for Suite {
    fn pk(&self) -> Id {
        self.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.id),
            "name" => Scalar::from(self.name.as_str()),
            "description" => Scalar::from(self.description.as_str()),
            "status" => Scalar::from(self.status.as_str()),
            "product" => Scalar::Int(self.product_id),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

/// Fields accepted when creating a suite.
#[derive(Debug, Clone)]
pub struct NewSuite {
    pub name: String,
    pub product_id: Id,
    pub description: String,
    pub status: SuiteStatus,
}

/// Fields replaced by a suite update.
#[derive(Debug, Clone)]
pub struct SuiteChanges {
    pub name: String,
    pub product_id: Id,
    pub description: String,
    pub status: SuiteStatus,
}

#[derive(Debug, Clone)]
pub struct SuiteView {
    pub suite: Suite,
    pub product: Product,
}

impl Lookup for SuiteView {
    fn pk(&self) -> Id {
        self.suite.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        if name == "product" {
            return Some(Field::Related(vec![&self.product]));
        }
        self.suite.field(name)
    }
}

/// Membership of a case in a suite, with its position in that suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteCase {
    pub id: Id,
    pub suite_id: Id,
    pub case_id: Id,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub id: Id,
    pub product_id: Id,
}

#[derive(Debug, Clone)]
pub struct CaseView {
    pub case: Case,
    /// Live (not soft-deleted) suites containing the case.
    pub suites: Vec<Suite>,
    pub memberships: Vec<SuiteCase>,
}

impl CaseView {
    /// Position of the case within `suite_id`.
    ///
    /// Scans the memberships in storage order and returns the first match.
    #[must_use]
    pub fn order_in_suite(&self, suite_id: Id) -> Option<i32> {
        self.memberships
            .iter()
            .find(|membership| membership.suite_id == suite_id)
            .map(|membership| membership.order)
    }
}

impl Lookup for CaseView {
    fn pk(&self) -> Id {
        self.case.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        match name {
            "id" => Some(Field::Value(Scalar::Int(self.case.id))),
            "product" => Some(Field::Value(Scalar::Int(self.case.product_id))),
            "suites" => Some(Field::Related(
                self.suites.iter().map(|s| s as &dyn Lookup).collect(),
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseStep {
    pub id: Id,
    pub caseversion_id: Id,
    pub number: i32,
    pub instruction: String,
    pub expected: String,
}

impl Lookup for CaseStep {
    fn pk(&self) -> Id {
        self.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.id),
            "caseversion" => Scalar::Int(self.caseversion_id),
            "number" => Scalar::Int(i64::from(self.number)),
            "instruction" => Scalar::from(self.instruction.as_str()),
            "expected" => Scalar::from(self.expected.as_str()),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

#[derive(Debug, Clone)]
pub struct NewCaseStep {
    pub caseversion_id: Id,
    pub number: i32,
    pub instruction: String,
    pub expected: String,
}

#[derive(Debug, Clone)]
pub struct CaseStepChanges {
    pub number: i32,
    pub instruction: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseVersion {
    pub id: Id,
    pub case_id: Id,
    pub productversion_id: Id,
    pub name: String,
    pub description: String,
    pub latest: bool,
    pub created_by: Option<Id>,
    pub created_on: DateTime<Utc>,
    pub environment_ids: Vec<Id>,
    pub tag_ids: Vec<Id>,
}

#[derive(Debug, Clone)]
pub struct NewCaseVersion {
    pub case_id: Id,
    pub productversion_id: Id,
    pub name: String,
    pub description: String,
    pub latest: bool,
    pub environment_ids: Vec<Id>,
    pub tag_ids: Vec<Id>,
}

#[derive(Debug, Clone)]
pub struct CaseVersionChanges {
    pub name: String,
    pub description: String,
    pub environment_ids: Vec<Id>,
    pub tag_ids: Vec<Id>,
}

#[derive(Debug, Clone)]
pub struct CaseVersionView {
    pub caseversion: CaseVersion,
    pub case: CaseView,
    pub productversion: ProductVersionView,
    pub environments: Vec<EnvironmentView>,
    pub tags: Vec<Tag>,
    pub steps: Vec<CaseStep>,
    pub created_by: Option<User>,
}

impl Lookup for CaseVersionView {
    fn pk(&self) -> Id {
        self.caseversion.id
    }

    fn field(&self, name: &str) -> Option<Field<'_>> {
        let value = match name {
            "id" => Scalar::Int(self.caseversion.id),
            "name" => Scalar::from(self.caseversion.name.as_str()),
            "description" => Scalar::from(self.caseversion.description.as_str()),
            "latest" => Scalar::Bool(self.caseversion.latest),
            "case" => return Some(Field::Related(vec![&self.case])),
            "productversion" => return Some(Field::Related(vec![&self.productversion])),
            "environments" => {
                return Some(Field::Related(
                    self.environments.iter().map(|e| e as &dyn Lookup).collect(),
                ))
            }
            "tags" => {
                return Some(Field::Related(
                    self.tags.iter().map(|t| t as &dyn Lookup).collect(),
                ))
            }
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case_view(memberships: Vec<SuiteCase>) -> CaseView {
        CaseView {
            case: Case {
                id: 1,
                product_id: 1,
            },
            suites: Vec::new(),
            memberships,
        }
    }

    #[test]
    fn order_in_suite_takes_first_membership() {
        let view = case_view(vec![
            SuiteCase {
                id: 1,
                suite_id: 7,
                case_id: 1,
                order: 3,
            },
            SuiteCase {
                id: 2,
                suite_id: 7,
                case_id: 1,
                order: 9,
            },
        ]);
        assert_eq!(view.order_in_suite(7), Some(3));
        assert_eq!(view.order_in_suite(8), None);
    }

    #[test]
    fn suite_status_round_trips_through_str() {
        for status in [SuiteStatus::Draft, SuiteStatus::Active, SuiteStatus::Disabled] {
            assert_eq!(status.as_str().parse::<SuiteStatus>(), Ok(status));
        }
        assert!("archived".parse::<SuiteStatus>().is_err());
    }
}
