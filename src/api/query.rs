//! Query string handling for list endpoints: filters, ordering and paging.
//!
//! Filter keys follow `field(__field)*(__lookup)?`. A relation at the end of
//! the path compares by primary key and a multi-valued relation matches when
//! any of its records matches. Filters are evaluated against [`Lookup`]
//! records, so the same grammar applies to every store backend.

use super::error::{ApiError, ApiResult};
use crate::model::{Field, Lookup, Scalar};
use serde_json::{json, Value};
use std::{cmp::Ordering, collections::BTreeMap};
use url::form_urlencoded;

/// Query parameters, last value wins for repeated keys.
pub type Params = BTreeMap<String, String>;

/// Keys that are never interpreted as filters.
pub const RESERVED: &[&str] = &[
    "limit",
    "offset",
    "order_by",
    "format",
    "username",
    "api_key",
    "permanent",
];

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 1000;

const NEGATION_SUFFIX: &str = "__ne";

#[must_use]
pub fn collect_params(pairs: Vec<(String, String)>) -> Params {
    pairs.into_iter().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filtering {
    /// Any lookup on the field itself.
    All,
    /// Lookups on the field and traversal into the related record.
    AllWithRelations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOp {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
}

impl LookupOp {
    fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "exact" => Self::Exact,
            "iexact" => Self::IExact,
            "contains" => Self::Contains,
            "icontains" => Self::IContains,
            "startswith" => Self::StartsWith,
            "in" => Self::In,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "isnull" => Self::IsNull,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub path: Vec<String>,
    pub op: LookupOp,
    pub value: String,
}

impl Filter {
    /// Parses one `key=value` pair against the resource's filtering map.
    ///
    /// # Errors
    /// `BadRequest` for unknown or non-filterable fields and for relation
    /// traversal on a field that does not allow it.
    pub fn parse(filtering: &[(&str, Filtering)], key: &str, value: &str) -> ApiResult<Self> {
        let mut path: Vec<String> = key.split("__").map(str::to_string).collect();
        let op = match path.as_slice() {
            [_, .., last] => LookupOp::parse(last),
            _ => None,
        };
        if op.is_some() {
            path.pop();
        }
        let op = op.unwrap_or(LookupOp::Exact);

        let field = path.first().map(String::as_str).unwrap_or_default();
        let Some((_, mode)) = filtering.iter().find(|(name, _)| *name == field) else {
            return Err(ApiError::BadRequest(format!(
                "The '{field}' field does not allow filtering."
            )));
        };
        if path.len() > 1 && *mode == Filtering::All {
            return Err(ApiError::BadRequest(format!(
                "Lookups are not allowed more than one level deep on the '{field}' field."
            )));
        }

        Ok(Self {
            path,
            op,
            value: value.to_string(),
        })
    }

    /// # Errors
    /// `BadRequest` when the path does not exist on the record or the value
    /// cannot be compared with the field.
    pub fn matches(&self, record: &dyn Lookup) -> ApiResult<bool> {
        let values = resolve(record, &self.path)?;

        if self.op == LookupOp::IsNull {
            let wanted = parse_bool(&self.value)?;
            let is_null = values.iter().all(|value| *value == Scalar::Null);
            return Ok(is_null == wanted);
        }

        for value in &values {
            if compare(value, self.op, &self.value)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Inclusion and exclusion filters parsed from a query string.
#[derive(Debug, Default)]
pub struct FilterSet {
    pub include: Vec<Filter>,
    pub exclude: Vec<Filter>,
}

impl FilterSet {
    /// Builds the filter set; with `negation`, keys ending in `__ne` go to the
    /// exclusion set with the suffix stripped.
    ///
    /// # Errors
    /// Propagates [`Filter::parse`] errors.
    pub fn parse(
        filtering: &[(&str, Filtering)],
        negation: bool,
        params: &Params,
    ) -> ApiResult<Self> {
        let mut set = Self::default();
        for (key, value) in params {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            match key.strip_suffix(NEGATION_SUFFIX) {
                Some(stripped) if negation => {
                    set.exclude.push(Filter::parse(filtering, stripped, value)?);
                }
                _ => set.include.push(Filter::parse(filtering, key, value)?),
            }
        }
        Ok(set)
    }

    /// Keeps records matching every inclusion filter, unless they also match
    /// every exclusion filter.
    ///
    /// # Errors
    /// Propagates [`Filter::matches`] errors.
    pub fn keep(&self, record: &dyn Lookup) -> ApiResult<bool> {
        for filter in &self.include {
            if !filter.matches(record)? {
                return Ok(false);
            }
        }
        if self.exclude.is_empty() {
            return Ok(true);
        }
        for filter in &self.exclude {
            if !filter.matches(record)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn resolve(record: &dyn Lookup, path: &[String]) -> ApiResult<Vec<Scalar>> {
    let Some((name, rest)) = path.split_first() else {
        return Ok(vec![Scalar::Int(record.pk())]);
    };
    match record.field(name) {
        None => Err(ApiError::BadRequest(format!(
            "The '{name}' field is not a valid field."
        ))),
        Some(Field::Value(value)) if rest.is_empty() => Ok(vec![value]),
        Some(Field::Value(_)) => Err(ApiError::BadRequest(format!(
            "The '{name}' field has no related fields."
        ))),
        Some(Field::Related(related)) => {
            let mut values = Vec::new();
            for record in related {
                values.extend(resolve(record, rest)?);
            }
            Ok(values)
        }
    }
}

/// Accepts a bare id or the trailing id of a resource URI.
pub(crate) fn parse_id(raw: &str) -> ApiResult<i64> {
    let trimmed = raw.trim().trim_end_matches('/');
    let candidate = trimmed.rsplit('/').next().unwrap_or(trimmed);
    candidate
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid value '{raw}' for an id filter.")))
}

fn parse_bool(raw: &str) -> ApiResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ApiError::BadRequest(format!(
            "Invalid value '{raw}' for a boolean filter."
        ))),
    }
}

fn compare(value: &Scalar, op: LookupOp, raw: &str) -> ApiResult<bool> {
    if op == LookupOp::In {
        for item in raw.split(',') {
            if compare(value, LookupOp::Exact, item)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    match value {
        Scalar::Null => Ok(false),
        Scalar::Bool(actual) => match op {
            LookupOp::Exact | LookupOp::IExact => Ok(*actual == parse_bool(raw)?),
            _ => Err(ApiError::BadRequest(
                "Only exact lookups are supported on boolean fields.".to_string(),
            )),
        },
        Scalar::Int(actual) => match op {
            LookupOp::Contains | LookupOp::IContains => Ok(actual.to_string().contains(raw)),
            LookupOp::StartsWith => Ok(actual.to_string().starts_with(raw)),
            _ => Ok(ordered(actual.cmp(&parse_id(raw)?), op)),
        },
        Scalar::Text(actual) => Ok(match op {
            LookupOp::IExact => actual.to_lowercase() == raw.to_lowercase(),
            LookupOp::Contains => actual.contains(raw),
            LookupOp::IContains => actual.to_lowercase().contains(&raw.to_lowercase()),
            LookupOp::StartsWith => actual.starts_with(raw),
            _ => ordered(actual.as_str().cmp(raw), op),
        }),
    }
}

fn ordered(ordering: Ordering, op: LookupOp) -> bool {
    match op {
        LookupOp::Gt => ordering == Ordering::Greater,
        LookupOp::Gte => ordering != Ordering::Less,
        LookupOp::Lt => ordering == Ordering::Less,
        LookupOp::Lte => ordering != Ordering::Greater,
        _ => ordering == Ordering::Equal,
    }
}

/// A parsed `order_by` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    /// # Errors
    /// `BadRequest` when the field is not in the resource's ordering list.
    pub fn parse(allowed: &[&str], params: &Params) -> ApiResult<Option<Self>> {
        let Some(raw) = params.get("order_by") else {
            return Ok(None);
        };
        let (field, descending) = raw
            .strip_prefix('-')
            .map_or((raw.as_str(), false), |field| (field, true));
        if !allowed.contains(&field) {
            return Err(ApiError::BadRequest(format!(
                "No matching '{field}' field for ordering on."
            )));
        }
        Ok(Some(Self {
            field: field.to_string(),
            descending,
        }))
    }

    fn key(&self, record: &dyn Lookup) -> Scalar {
        resolve(record, std::slice::from_ref(&self.field))
            .ok()
            .and_then(|values| values.into_iter().next())
            .unwrap_or(Scalar::Null)
    }

    /// Stable sort of `records` by the ordering field.
    pub fn sort<T: Lookup>(&self, records: &mut [T]) {
        records.sort_by(|a, b| {
            let ordering = self.key(a).compare(&self.key(b));
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

/// `limit`/`offset` paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    /// # Errors
    /// `BadRequest` for values that are not non-negative integers.
    pub fn from_params(params: &Params) -> ApiResult<Self> {
        let limit = match params.get("limit") {
            None => DEFAULT_LIMIT,
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                ApiError::BadRequest(format!(
                    "Invalid limit '{raw}' provided. Please provide a positive integer."
                ))
            })?,
        };
        let limit = if limit == 0 { MAX_LIMIT } else { limit.min(MAX_LIMIT) };

        let offset = match params.get("offset") {
            None => 0,
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                ApiError::BadRequest(format!(
                    "Invalid offset '{raw}' provided. Please provide a positive integer."
                ))
            })?,
        };

        Ok(Self { limit, offset })
    }

    pub fn slice<'a, T>(&self, records: &'a [T]) -> &'a [T] {
        let start = self.offset.min(records.len());
        let end = start.saturating_add(self.limit).min(records.len());
        &records[start..end]
    }

    /// The `meta` block of a list response.
    #[must_use]
    pub fn meta(&self, total_count: usize, path: &str, params: &Params) -> Value {
        let following = self.offset.saturating_add(self.limit);
        let next = (following < total_count)
            .then(|| page_url(path, params, self.limit, following));
        let previous = (self.offset > 0)
            .then(|| page_url(path, params, self.limit, self.offset.saturating_sub(self.limit)));
        json!({
            "limit": self.limit,
            "offset": self.offset,
            "total_count": total_count,
            "next": next,
            "previous": previous,
        })
    }
}

fn page_url(path: &str, params: &Params, limit: usize, offset: usize) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        if !matches!(key.as_str(), "limit" | "offset" | "api_key") {
            serializer.append_pair(key, value);
        }
    }
    serializer.append_pair("limit", &limit.to_string());
    serializer.append_pair("offset", &offset.to_string());
    format!("{path}?{}", serializer.finish())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{
        environments::{Category, Element, ElementView},
        Id,
    };

    const ELEMENT_FILTERING: &[(&str, Filtering)] = &[
        ("category", Filtering::AllWithRelations),
        ("name", Filtering::All),
    ];

    fn element(id: Id, name: &str, category_id: Id, category_name: &str) -> ElementView {
        ElementView {
            element: Element {
                id,
                name: name.to_string(),
                category_id,
            },
            category: Category {
                id: category_id,
                name: category_name.to_string(),
            },
        }
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn parse_defaults_to_exact() {
        let filter = Filter::parse(ELEMENT_FILTERING, "name", "Linux").unwrap();
        assert_eq!(filter.path, vec!["name"]);
        assert_eq!(filter.op, LookupOp::Exact);

        let filter = Filter::parse(ELEMENT_FILTERING, "category__name__icontains", "os").unwrap();
        assert_eq!(filter.path, vec!["category", "name"]);
        assert_eq!(filter.op, LookupOp::IContains);
    }

    #[test]
    fn parse_rejects_unknown_and_deep_lookups() {
        assert!(matches!(
            Filter::parse(ELEMENT_FILTERING, "id", "1"),
            Err(ApiError::BadRequest(_))
        ));
        let err = Filter::parse(ELEMENT_FILTERING, "name__first", "x").unwrap_err();
        assert!(err.to_string().contains("more than one level deep"));
    }

    #[test]
    fn related_field_compares_by_pk() {
        let record = element(1, "Linux", 7, "OS");
        let by_pk = Filter::parse(ELEMENT_FILTERING, "category", "7").unwrap();
        let by_uri = Filter::parse(ELEMENT_FILTERING, "category", "/api/v1/categories/7/").unwrap();
        let by_name = Filter::parse(ELEMENT_FILTERING, "category__name", "OS").unwrap();
        let other = Filter::parse(ELEMENT_FILTERING, "category__in", "1,2").unwrap();

        assert!(by_pk.matches(&record).unwrap());
        assert!(by_uri.matches(&record).unwrap());
        assert!(by_name.matches(&record).unwrap());
        assert!(!other.matches(&record).unwrap());
    }

    #[test]
    fn invalid_id_value_is_a_bad_request() {
        let record = element(1, "Linux", 7, "OS");
        let filter = Filter::parse(ELEMENT_FILTERING, "category", "seven").unwrap();
        assert!(matches!(filter.matches(&record), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn exclusions_apply_as_one_negated_conjunction() {
        let linux = element(1, "Linux", 7, "OS");
        let windows = element(2, "Windows", 7, "OS");
        let firefox = element(3, "Firefox", 8, "Browser");

        let set = FilterSet::parse(
            ELEMENT_FILTERING,
            true,
            &params(&[("name__ne", "Linux"), ("category__ne", "7")]),
        )
        .unwrap();
        assert_eq!(set.exclude.len(), 2);

        assert!(!set.keep(&linux).unwrap());
        assert!(set.keep(&windows).unwrap());
        assert!(set.keep(&firefox).unwrap());
    }

    #[test]
    fn negation_suffix_is_only_special_on_selection_resources() {
        let err = FilterSet::parse(ELEMENT_FILTERING, false, &params(&[("name__ne", "x")]));
        assert!(matches!(err, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn reserved_keys_are_not_filters() {
        let set = FilterSet::parse(
            ELEMENT_FILTERING,
            false,
            &params(&[("limit", "5"), ("username", "admin"), ("api_key", "k")]),
        )
        .unwrap();
        assert!(set.include.is_empty());
    }

    #[test]
    fn order_by_descending() {
        let mut records = vec![
            element(1, "b", 7, "OS"),
            element(2, "c", 7, "OS"),
            element(3, "a", 7, "OS"),
        ];
        let order = OrderBy::parse(&["id", "name"], &params(&[("order_by", "-name")]))
            .unwrap()
            .unwrap();
        order.sort(&mut records);
        let ids: Vec<Id> = records.iter().map(|record| record.element.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        assert!(OrderBy::parse(&["id"], &params(&[("order_by", "name")])).is_err());
    }

    #[test]
    fn page_limits_and_links() {
        let page = Page::from_params(&params(&[("limit", "0")])).unwrap();
        assert_eq!(page.limit, MAX_LIMIT);

        let query = params(&[("limit", "2"), ("offset", "2"), ("name", "a b")]);
        let page = Page::from_params(&query).unwrap();
        let meta = page.meta(5, "/api/v1/elements/", &query);
        assert_eq!(meta["total_count"], 5);
        assert_eq!(meta["next"], "/api/v1/elements/?name=a+b&limit=2&offset=4");
        assert_eq!(meta["previous"], "/api/v1/elements/?name=a+b&limit=2&offset=0");

        assert_eq!(page.slice(&[1, 2, 3, 4, 5]), &[3, 4]);
        assert!(Page::from_params(&params(&[("offset", "-1")])).is_err());
    }

    #[test]
    fn offset_past_the_end_is_an_empty_last_page() {
        let offset = usize::MAX.to_string();
        let query = params(&[("offset", offset.as_str())]);
        let page = Page::from_params(&query).unwrap();
        let meta = page.meta(3, "/api/v1/profiles/", &query);
        assert_eq!(meta["next"], Value::Null);
        assert!(meta["previous"].is_string());
        assert!(page.slice(&[1, 2, 3]).is_empty());
    }
}
