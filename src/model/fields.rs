use super::Id;
use std::cmp::Ordering;

/// A single filterable value read from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl Scalar {
    /// Orders scalars of the same kind; `Null` sorts first and mixed kinds compare equal.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Option<i64>> for Scalar {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Int)
    }
}

/// A named field on a record: either a plain value or related records.
pub enum Field<'a> {
    Value(Scalar),
    Related(Vec<&'a dyn Lookup>),
}

/// Field access used by list filtering and ordering.
///
/// A relation used as the last segment of a filter path compares by primary
/// key, so `category=3` and `category__id=3` are equivalent.
pub trait Lookup: Send + Sync {
    fn pk(&self) -> Id;

    fn field(&self, name: &str) -> Option<Field<'_>>;
}
