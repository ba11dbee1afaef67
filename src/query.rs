//! Normalization of store read requests.
//!
//! Grid and tree stores send their paging, sorting, grouping and filtering
//! state in several historical shapes. [`normalize`] folds all of them into one
//! [`QueryRequest`] and returns whatever keys it did not recognise so they can
//! be bound to further named parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::convert::{TypeDesc, convert};

/// Sort or group direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC", alias = "ASCENDING")]
    Ascending,
    #[serde(rename = "DESC", alias = "DESCENDING")]
    Descending,
}

impl SortDirection {
    /// Parse `ASC`/`DESC` (or the long forms), ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" | "ASCENDING" => Some(SortDirection::Ascending),
            "DESC" | "DESCENDING" => Some(SortDirection::Descending),
            _ => None,
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(Value::as_str)
            .and_then(Self::parse)
            .unwrap_or_default()
    }
}

/// A field and the direction to order it by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortInfo {
    pub property: String,
    pub direction: SortDirection,
}

impl SortInfo {
    pub fn new(property: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            property: property.into(),
            direction,
        }
    }

    fn from_json(raw: &Value) -> Option<Self> {
        let property = raw.get("property")?.as_str()?;
        Some(Self::new(property, SortDirection::from_value(raw.get("direction"))))
    }
}

/// Same shape as [`SortInfo`], but drives grouping instead of ordering.
pub type GroupInfo = SortInfo;

/// Comparison operator of a filter predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
    #[default]
    Eq,
    Ne,
    Like,
    In,
}

impl Comparison {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lt" | "<" => Some(Comparison::Lt),
            "lte" | "le" | "<=" => Some(Comparison::Lte),
            "gt" | ">" => Some(Comparison::Gt),
            "gte" | "ge" | ">=" => Some(Comparison::Gte),
            "eq" | "=" | "==" => Some(Comparison::Eq),
            "ne" | "!=" => Some(Comparison::Ne),
            "like" => Some(Comparison::Like),
            "in" => Some(Comparison::In),
            _ => None,
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        value
            .and_then(Value::as_str)
            .and_then(Self::parse)
            .unwrap_or_default()
    }
}

/// Typed operand of a filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FilterValue {
    Numeric(Number),
    String(String),
    Date(String),
    List(Vec<String>),
    Boolean(bool),
}

/// One filter predicate: `field <comparison> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub comparison: Comparison,
    pub value: FilterValue,
}

impl Filter {
    /// Build a filter from either a typed grid filter
    /// (`{type, field, comparison, value}`) or a store filter
    /// (`{property, value, operator?}`). Returns `None` for anything else.
    pub fn from_json(raw: &Map<String, Value>) -> Option<Self> {
        let source = raw.get("value");

        let Some(kind) = raw.get("type").and_then(Value::as_str) else {
            let field = raw.get("property")?.as_str()?.to_string();
            let comparison = Comparison::from_value(raw.get("operator"));
            let value = match source? {
                Value::Number(n) => FilterValue::Numeric(n.clone()),
                Value::Bool(b) => FilterValue::Boolean(*b),
                Value::String(s) => FilterValue::String(s.clone()),
                other => FilterValue::String(other.to_string()),
            };
            return Some(Self {
                field,
                comparison,
                value,
            });
        };

        let field = raw.get("field")?.as_str()?.to_string();
        let comparison = Comparison::from_value(raw.get("comparison"));
        let value = match kind {
            "numeric" => match convert(source?, &TypeDesc::Float).ok()? {
                Value::Number(n) => FilterValue::Numeric(n),
                _ => return None,
            },
            "string" => FilterValue::String(as_text(source?)),
            "date" => FilterValue::Date(as_text(source?)),
            "list" => match source? {
                Value::String(s) => {
                    FilterValue::List(s.split(',').map(str::to_string).collect())
                }
                Value::Array(items) => FilterValue::List(items.iter().map(as_text).collect()),
                _ => return None,
            },
            "boolean" => match convert(source?, &TypeDesc::Bool).ok()? {
                Value::Bool(b) => FilterValue::Boolean(b),
                _ => return None,
            },
            other => {
                warn!("Ignoring filter with unknown type '{}'", other);
                return None;
            }
        };

        Some(Self {
            field,
            comparison,
            value,
        })
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical read request handed to store read handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: Option<String>,
    pub start: Option<i64>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
    pub sorters: Vec<SortInfo>,
    pub groups: Vec<GroupInfo>,
    pub filters: Vec<Filter>,
    /// Input keys the normalizer did not consume.
    pub params: Map<String, Value>,
}

impl QueryRequest {
    pub fn first_sorter(&self) -> Option<&SortInfo> {
        self.sorters.first()
    }

    pub fn first_group(&self) -> Option<&GroupInfo> {
        self.groups.first()
    }

    pub fn filter(&self, field: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.field == field)
    }

    /// `start` and `limit` as a slice range over `total` rows.
    pub fn page_bounds(&self, total: usize) -> (usize, usize) {
        let start = self.start.unwrap_or(0).max(0) as usize;
        let start = start.min(total);
        let end = match self.limit {
            Some(limit) if limit > 0 => start.saturating_add(limit as usize).min(total),
            _ => total,
        };
        (start, end)
    }
}

const RECOGNIZED: &[&str] = &[
    "filter", "sort", "dir", "sorters", "group", "groupBy", "groupDir", "groups", "start",
    "limit", "page", "query",
];

/// Fold a raw read-request object into a [`QueryRequest`].
///
/// Returns the request and the unconsumed keys. The unconsumed keys are also
/// stored on the request as `params`.
pub fn normalize(raw: &Map<String, Value>) -> (QueryRequest, Map<String, Value>) {
    let mut request = QueryRequest::default();
    let mut extra = Map::new();

    for (key, value) in raw {
        if !RECOGNIZED.contains(&key.as_str()) {
            extra.insert(key.clone(), value.clone());
            continue;
        }

        match key.as_str() {
            "start" | "limit" | "page" => match paging_value(value) {
                Ok(number) => match key.as_str() {
                    "start" => request.start = number,
                    "limit" => request.limit = number,
                    _ => request.page = number,
                },
                Err(_) => {
                    warn!("Unparsable paging value {}={}, passing it through", key, value);
                    extra.insert(key.clone(), value.clone());
                }
            },
            "query" => request.query = value.as_str().map(str::to_string),
            "filter" => request.filters = parse_filters(value),
            _ => {}
        }
    }

    request.sorters = first_of(
        parse_sort_list(raw.get("sorters"))
            .or_else(|| parse_sort_list(raw.get("sort")))
            .or_else(|| legacy_sort(raw.get("sort"), raw.get("dir"))),
    );
    request.groups = first_of(
        parse_sort_list(raw.get("groups"))
            .or_else(|| parse_sort_list(raw.get("group")))
            .or_else(|| legacy_sort(raw.get("groupBy"), raw.get("groupDir"))),
    );

    derive_paging(&mut request);

    debug!("Normalized read request: {:?}", request);

    request.params = extra.clone();
    (request, extra)
}

/// Fill in whichever of `start`/`page` is missing. Both present are trusted.
fn derive_paging(request: &mut QueryRequest) {
    let Some(limit) = request.limit else {
        return;
    };

    match (request.start, request.page) {
        (None, Some(page)) => {
            request.start = page.checked_sub(1).and_then(|p| limit.checked_mul(p));
            if request.start.is_none() {
                warn!("Paging overflow for limit={} page={}, start left unset", limit, page);
            }
        }
        (Some(start), None) if limit > 0 => request.page = Some(start / limit + 1),
        _ => {}
    }
}

fn paging_value(value: &Value) -> Result<Option<i64>, crate::Error> {
    let converted = convert(value, &TypeDesc::Int)?;
    if converted.is_null() {
        return Ok(None);
    }
    converted
        .as_i64()
        .map(Some)
        .ok_or_else(|| crate::Error::conversion(TypeDesc::Int, value))
}

// Only the first entry is applied; clients rely on that behaviour.
fn first_of(sorters: Option<Vec<SortInfo>>) -> Vec<SortInfo> {
    sorters
        .and_then(|list| list.into_iter().next())
        .into_iter()
        .collect()
}

fn parse_sort_list(value: Option<&Value>) -> Option<Vec<SortInfo>> {
    let list = value?.as_array()?;
    Some(list.iter().filter_map(SortInfo::from_json).collect())
}

fn legacy_sort(property: Option<&Value>, direction: Option<&Value>) -> Option<Vec<SortInfo>> {
    let property = property?.as_str()?;
    let direction = direction?.as_str()?;
    let direction = SortDirection::parse(direction).unwrap_or_default();
    Some(vec![SortInfo::new(property, direction)])
}

fn parse_filters(value: &Value) -> Vec<Filter> {
    let parsed;
    let raw_filters = match value {
        Value::String(s) => match serde_json::from_str::<Vec<Value>>(s) {
            Ok(list) => {
                parsed = list;
                &parsed
            }
            Err(e) => {
                warn!("Ignoring unparsable filter string: {}", e);
                return Vec::new();
            }
        },
        Value::Array(list) => list,
        _ => return Vec::new(),
    };

    raw_filters
        .iter()
        .filter_map(Value::as_object)
        .filter_map(Filter::from_json)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn normalize_json(raw: Value) -> (QueryRequest, Map<String, Value>) {
        normalize(raw.as_object().unwrap())
    }

    #[test]
    fn page_derives_start() {
        let (request, _) = normalize_json(json!({"limit": 10, "page": 2}));
        assert_eq!(request.start, Some(10));
        assert_eq!(request.page, Some(2));
    }

    #[test]
    fn start_derives_page() {
        let (request, _) = normalize_json(json!({"limit": 10, "start": 30}));
        assert_eq!(request.page, Some(4));
    }

    #[test]
    fn start_and_page_are_trusted_as_given() {
        let (request, _) = normalize_json(json!({"limit": 10, "start": 5, "page": 7}));
        assert_eq!(request.start, Some(5));
        assert_eq!(request.page, Some(7));
    }

    #[test]
    fn zero_limit_does_not_derive_page() {
        let (request, _) = normalize_json(json!({"limit": 0, "start": 30}));
        assert_eq!(request.page, None);
    }

    #[test]
    fn paging_values_may_be_strings() {
        let (request, extra) = normalize_json(json!({"limit": "25", "start": "50", "page": "x"}));
        assert_eq!(request.limit, Some(25));
        assert_eq!(request.start, Some(50));
        assert_eq!(request.page, None);
        assert_eq!(extra.get("page"), Some(&json!("x")));
    }

    #[test]
    fn overflowing_page_leaves_start_unset() {
        let (request, _) = normalize_json(json!({"limit": i64::MAX, "page": 3}));
        assert_eq!(request.limit, Some(i64::MAX));
        assert_eq!(request.page, Some(3));
        assert_eq!(request.start, None);

        let (request, _) = normalize_json(json!({"limit": 10, "page": i64::MIN}));
        assert_eq!(request.start, None);
    }

    #[test]
    fn out_of_range_paging_value_is_passed_through() {
        let (request, extra) = normalize_json(json!({"limit": u64::MAX, "start": 20}));
        assert_eq!(request.limit, None);
        assert_eq!(request.start, Some(20));
        assert_eq!(extra.get("limit"), Some(&json!(u64::MAX)));
    }

    #[test]
    fn legacy_sort_and_dir() {
        let (request, extra) =
            normalize_json(json!({"sort": "id", "dir": "DESC", "start": 20, "limit": 10}));
        assert_eq!(
            request.sorters,
            vec![SortInfo::new("id", SortDirection::Descending)]
        );
        assert_eq!(request.page, Some(3));
        assert!(extra.is_empty());
    }

    #[test]
    fn sorter_list_beats_legacy_pair_and_only_first_entry_applies() {
        let (request, _) = normalize_json(json!({
            "sort": "ignored",
            "dir": "ASC",
            "sorters": [
                {"property": "name", "direction": "DESC"},
                {"property": "id", "direction": "ASC"}
            ]
        }));
        assert_eq!(
            request.sorters,
            vec![SortInfo::new("name", SortDirection::Descending)]
        );
    }

    #[test]
    fn sort_as_list_and_groups() {
        let (request, _) = normalize_json(json!({
            "sort": [{"property": "age", "direction": "ASC"}],
            "group": [{"property": "city", "direction": "DESC"}, {"property": "zip"}],
        }));
        assert_eq!(request.sorters, vec![SortInfo::new("age", SortDirection::Ascending)]);
        assert_eq!(request.groups, vec![SortInfo::new("city", SortDirection::Descending)]);
    }

    #[test]
    fn legacy_group_pair() {
        let (request, _) = normalize_json(json!({"groupBy": "city", "groupDir": "asc"}));
        assert_eq!(request.first_group(), Some(&SortInfo::new("city", SortDirection::Ascending)));
    }

    #[test]
    fn unrecognized_keys_become_extra_params() {
        let (request, extra) = normalize_json(json!({"limit": 5, "companyId": 7, "query": "ab"}));
        assert_eq!(extra, *json!({"companyId": 7}).as_object().unwrap());
        assert_eq!(request.params, extra);
        assert_eq!(request.query.as_deref(), Some("ab"));
    }

    #[test]
    fn filters_from_encoded_string_and_list() {
        let encoded = json!([
            {"type": "numeric", "field": "price", "comparison": "lt", "value": "12.5"},
            {"type": "list", "field": "state", "value": "open,closed"},
            {"type": "unknown", "field": "x", "value": 1}
        ])
        .to_string();
        let (request, _) = normalize_json(json!({ "filter": encoded }));
        assert_eq!(request.filters.len(), 2);
        assert_eq!(request.filters[0].comparison, Comparison::Lt);
        assert_eq!(
            request.filters[1].value,
            FilterValue::List(vec!["open".to_string(), "closed".to_string()])
        );

        let (request, _) = normalize_json(json!({
            "filter": [{"property": "active", "value": true}, {"property": "name", "value": "bo", "operator": "like"}]
        }));
        assert_eq!(request.filter("active").unwrap().value, FilterValue::Boolean(true));
        assert_eq!(request.filter("name").unwrap().comparison, Comparison::Like);
    }

    #[test]
    fn page_bounds_clamp_to_total() {
        let request = QueryRequest {
            start: Some(95),
            limit: Some(10),
            ..QueryRequest::default()
        };
        assert_eq!(request.page_bounds(100), (95, 100));
        assert_eq!(QueryRequest::default().page_bounds(3), (0, 3));
    }
}
