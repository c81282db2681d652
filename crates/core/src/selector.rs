//! Label selector evaluation over object labels.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{CoreError, CoreResult};

static LABEL_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").unwrap());
static LABEL_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::In(k, vals) => labels.get(k).map(|v| vals.contains(v)).unwrap_or(false),
            Requirement::NotIn(k, vals) => labels.get(k).map(|v| !vals.contains(v)).unwrap_or(true),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Compiled label selector. An absent selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMatcher {
    reqs: Vec<Requirement>,
}

impl LabelMatcher {
    pub fn everything() -> Self { Self::default() }

    pub fn new(selector: Option<&LabelSelector>) -> CoreResult<Self> {
        let Some(sel) = selector else { return Ok(Self::everything()) };
        let mut reqs = Vec::new();
        if let Some(ml) = &sel.match_labels {
            for (k, v) in ml {
                validate_key(k)?;
                validate_value(v)?;
                reqs.push(Requirement::In(k.clone(), vec![v.clone()]));
            }
        }
        for expr in sel.match_expressions.iter().flatten() {
            reqs.push(compile_expression(expr)?);
        }
        Ok(Self { reqs })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.reqs.iter().all(|r| r.matches(labels))
    }
}

fn compile_expression(expr: &LabelSelectorRequirement) -> CoreResult<Requirement> {
    validate_key(&expr.key)?;
    let values = expr.values.clone().unwrap_or_default();
    for v in &values {
        validate_value(v)?;
    }
    let key = expr.key.clone();
    match expr.operator.as_str() {
        "In" | "NotIn" if values.is_empty() => {
            Err(CoreError::InvalidSelector(format!("{}: operator {} requires values", key, expr.operator)))
        }
        "In" => Ok(Requirement::In(key, values)),
        "NotIn" => Ok(Requirement::NotIn(key, values)),
        "Exists" | "DoesNotExist" if !values.is_empty() => {
            Err(CoreError::InvalidSelector(format!("{}: operator {} takes no values", key, expr.operator)))
        }
        "Exists" => Ok(Requirement::Exists(key)),
        "DoesNotExist" => Ok(Requirement::DoesNotExist(key)),
        other => Err(CoreError::InvalidSelector(format!("{}: unknown operator {:?}", key, other))),
    }
}

fn validate_key(k: &str) -> CoreResult<()> {
    if k.len() > 316 || !LABEL_KEY.is_match(k) {
        return Err(CoreError::InvalidSelector(format!("invalid label key {:?}", k)));
    }
    Ok(())
}

fn validate_value(v: &str) -> CoreResult<()> {
    if v.len() > 63 || !LABEL_VALUE.is_match(v) {
        return Err(CoreError::InvalidSelector(format!("invalid label value {:?}", v)));
    }
    Ok(())
}

/// Parse the comma-separated selector shorthand: `k=v`, `k==v`, `k!=v`, `k`, `!k`.
pub fn parse_selector(s: &str) -> CoreResult<LabelSelector> {
    let mut match_labels = BTreeMap::new();
    let mut exprs = Vec::new();
    for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let req = |key: &str, operator: &str, values: Option<Vec<String>>| LabelSelectorRequirement {
            key: key.trim().to_string(),
            operator: operator.to_string(),
            values,
        };
        if let Some((k, v)) = term.split_once("!=") {
            exprs.push(req(k, "NotIn", Some(vec![v.trim().to_string()])));
        } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
            match_labels.insert(k.trim().to_string(), v.trim().to_string());
        } else if let Some(k) = term.strip_prefix('!') {
            exprs.push(req(k, "DoesNotExist", None));
        } else {
            exprs.push(req(term, "Exists", None));
        }
    }
    let sel = LabelSelector {
        match_labels: if match_labels.is_empty() { None } else { Some(match_labels) },
        match_expressions: if exprs.is_empty() { None } else { Some(exprs) },
    };
    // surface validation errors at parse time
    LabelMatcher::new(Some(&sel))?;
    Ok(sel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn absent_selector_matches_everything() {
        let m = LabelMatcher::new(None).unwrap();
        assert!(m.matches(&labels(&[])));
        assert!(m.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn match_labels_and_expressions_are_anded() {
        let sel = LabelSelector {
            match_labels: Some(labels(&[("app", "web")])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".into(),
                operator: "NotIn".into(),
                values: Some(vec!["db".into()]),
            }]),
        };
        let m = LabelMatcher::new(Some(&sel)).unwrap();
        assert!(m.matches(&labels(&[("app", "web")])));
        assert!(m.matches(&labels(&[("app", "web"), ("tier", "fe")])));
        assert!(!m.matches(&labels(&[("app", "web"), ("tier", "db")])));
        assert!(!m.matches(&labels(&[("app", "api")])));
    }

    #[test]
    fn invalid_operator_is_rejected() {
        let sel = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement { key: "a".into(), operator: "Gt".into(), values: None }]),
        };
        assert!(LabelMatcher::new(Some(&sel)).is_err());
    }

    #[test]
    fn in_requires_values() {
        let sel = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement { key: "a".into(), operator: "In".into(), values: Some(vec![]) }]),
        };
        assert!(LabelMatcher::new(Some(&sel)).is_err());
    }

    #[test]
    fn parse_shorthand() {
        let sel = parse_selector("app=web, tier!=db,owner,!legacy").unwrap();
        let m = LabelMatcher::new(Some(&sel)).unwrap();
        assert!(m.matches(&labels(&[("app", "web"), ("owner", "x")])));
        assert!(!m.matches(&labels(&[("app", "web")])));
        assert!(!m.matches(&labels(&[("app", "web"), ("owner", "x"), ("legacy", "1")])));
        assert!(parse_selector("bad key=x").is_err());
    }
}
