//! Canonical request context handed to every engine operation.

use crate::error::AppError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Row-limit and ordering for one include path (`related[<path>][limit|sort]`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelatedParams {
    pub limit: Option<i64>,
    pub sort: Option<String>,
}

/// Recognized query parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryParams {
    pub filter: BTreeMap<String, String>,
    pub sort: Option<String>,
    pub include: Vec<String>,
    pub page_offset: Option<String>,
    pub page_limit: Option<String>,
    pub related: BTreeMap<String, RelatedParams>,
}

/// Split `name[a][b]` into `("name", ["a", "b"])`.
fn bracketed(key: &str) -> Option<(&str, Vec<&str>)> {
    let open = key.find('[')?;
    let (head, mut rest) = key.split_at(open);
    let mut parts = Vec::new();
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        parts.push(&stripped[..close]);
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return None;
    }
    Some((head, parts))
}

impl QueryParams {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut params = QueryParams::default();
        for (key, value) in pairs {
            match key.as_str() {
                "sort" => params.sort = Some(value.clone()).filter(|s| !s.is_empty()),
                "include" => params.include.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                ),
                "page.offset" => params.page_offset = Some(value.clone()),
                "page.limit" => params.page_limit = Some(value.clone()),
                _ => match bracketed(key) {
                    Some(("filter", parts)) if parts.len() == 1 => {
                        params.filter.insert(parts[0].to_string(), value.clone());
                    }
                    Some(("page", parts)) if parts == ["offset"] => {
                        params.page_offset = Some(value.clone())
                    }
                    Some(("page", parts)) if parts == ["limit"] => {
                        params.page_limit = Some(value.clone())
                    }
                    Some(("related", parts)) if parts.len() == 2 => {
                        let entry = params.related.entry(parts[0].to_string()).or_default();
                        match parts[1] {
                            "limit" => entry.limit = value.trim().parse::<i64>().ok(),
                            "sort" => entry.sort = Some(value.clone()),
                            _ => {}
                        }
                    }
                    _ => {}
                },
            }
        }
        params
    }

    /// Limit for an include, matched on the last segment of each `related[...]` path.
    pub fn related_limit(&self, relation: &str) -> Option<i64> {
        self.related
            .iter()
            .filter(|(path, _)| last_segment(path) == relation)
            .find_map(|(_, p)| p.limit)
    }

    /// `(column, descending)` for an include, matched like [`Self::related_limit`].
    pub fn related_sort(&self, relation: &str) -> Option<(String, bool)> {
        self.related
            .iter()
            .filter(|(path, _)| last_segment(path) == relation)
            .find_map(|(_, p)| p.sort.as_deref())
            .map(|s| match s.strip_prefix('-') {
                Some(column) => (column.to_string(), true),
                None => (s.to_string(), false),
            })
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Method-independent view of one inbound request.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub params: QueryParams,
    pub body: Value,
}

impl RequestContext {
    pub fn new(params: QueryParams, body: Value) -> Self {
        RequestContext { params, body }
    }

    pub fn with_body(body: Value) -> Self {
        RequestContext {
            params: QueryParams::default(),
            body,
        }
    }

    /// Parse a raw body. An empty body is treated as `null`.
    pub fn parse_body(raw: &[u8]) -> Result<Value, AppError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(raw)
            .map_err(|_| AppError::InvalidRequest("Unable to decode body.".into()))
    }

    pub fn data(&self) -> Option<&Value> {
        self.body.get("data")
    }

    pub fn attributes(&self) -> Map<String, Value> {
        self.data()
            .and_then(|d| d.get("attributes"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn relationships(&self) -> Map<String, Value> {
        self.data()
            .and_then(|d| d.get("relationships"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_bracketed_and_dotted_parameters() {
        let params = QueryParams::from_pairs(&pairs(&[
            ("filter[name]", "acme"),
            ("sort", "-name"),
            ("include", "owner, invoices.lines"),
            ("page[offset]", "2"),
            ("page.limit", "-1"),
            ("related[invoices.lines][limit]", "3"),
            ("related[invoices.lines][sort]", "-amount"),
        ]));
        assert_eq!(params.filter.get("name").map(String::as_str), Some("acme"));
        assert_eq!(params.sort.as_deref(), Some("-name"));
        assert_eq!(params.include, vec!["owner", "invoices.lines"]);
        assert_eq!(params.page_offset.as_deref(), Some("2"));
        assert_eq!(params.page_limit.as_deref(), Some("-1"));
        assert_eq!(params.related_limit("lines"), Some(3));
        assert_eq!(params.related_sort("lines"), Some(("amount".to_string(), true)));
        assert_eq!(params.related_limit("invoices"), None);
    }

    #[test]
    fn non_numeric_related_limit_is_ignored() {
        let params = QueryParams::from_pairs(&pairs(&[("related[lines][limit]", "many")]));
        assert_eq!(params.related_limit("lines"), None);
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(RequestContext::parse_body(b"  ").unwrap(), Value::Null);
        assert!(RequestContext::parse_body(b"{nope").is_err());
    }
}
