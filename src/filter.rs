//! Normalizes and matches subscription predicates (spec §4.1).
//!
//! The label-selector grammar and matching semantics are grounded on
//! `kube_core::labels::{Selector, Expression}`: an equality/set-based
//! expression list, `,`-joined, evaluated as an AND of all expressions.
//! That module converts between `LabelSelector` and `Selector` but never
//! parses the raw query string a caller types in, so `parse_selector`
//! below is new, built to accept exactly the strings `Selector::to_selector_string`
//! can produce (`key=value`, `key!=value`, `key`, `!key`, `key in (a,b)`, `key notin (a,b)`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::api::core::v1::Event as K8sEvent;

/// Subscription mode (spec §1, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A filtered stream of cluster Event objects.
    Events,
    /// Edge-triggered fault detection over Pods, Nodes, Deployments, Jobs.
    Faults,
}

/// A single label-selector expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expression {
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Equal(String, String),
    NotEqual(String, String),
    Exists(String),
    DoesNotExist(String),
}

impl Expression {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Expression::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Expression::NotIn(key, values) => labels.get(key).is_none_or(|v| !values.contains(v)),
            Expression::Exists(key) => labels.contains_key(key),
            Expression::DoesNotExist(key) => !labels.contains_key(key),
            Expression::Equal(key, value) => labels.get(key) == Some(value),
            Expression::NotEqual(key, value) => labels.get(key) != Some(value),
        }
    }
}

/// A parsed, validated label selector. Honors the conventional
/// Kubernetes label-query grammar (spec §4.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(Vec<Expression>);

/// A label selector string failed to parse.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid label selector {0:?}: {1}")]
pub struct SelectorParseError(String, &'static str);

impl LabelSelector {
    /// Parse the conventional comma-joined label-selector grammar.
    pub fn parse(raw: &str) -> Result<Self, SelectorParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let mut exprs = Vec::new();
        for term in raw.split(',') {
            let term = term.trim();
            if term.is_empty() {
                return Err(SelectorParseError(raw.to_string(), "empty term"));
            }
            exprs.push(parse_term(term, raw)?);
        }
        Ok(Self(exprs))
    }

    /// Whether this selector matches every object (i.e. was empty).
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Evaluate the selector against a label map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|e| e.matches(labels))
    }
}

fn parse_term(term: &str, raw: &str) -> Result<Expression, SelectorParseError> {
    if let Some(key) = term.strip_prefix('!') {
        validate_key(key, raw)?;
        return Ok(Expression::DoesNotExist(key.to_string()));
    }
    if let Some(rest) = term.find("!=").map(|i| (term[..i].trim(), term[i + 2..].trim())) {
        validate_key(rest.0, raw)?;
        return Ok(Expression::NotEqual(rest.0.to_string(), rest.1.to_string()));
    }
    if let Some((key, rest)) = term.split_once(" notin ") {
        return Ok(Expression::NotIn(
            key.trim().to_string(),
            parse_value_set(rest, raw)?,
        ));
    }
    if let Some((key, rest)) = term.split_once(" in ") {
        return Ok(Expression::In(key.trim().to_string(), parse_value_set(rest, raw)?));
    }
    if let Some(i) = term.find('=') {
        let (key, value) = (term[..i].trim(), term[i + 1..].trim());
        validate_key(key, raw)?;
        return Ok(Expression::Equal(key.to_string(), value.to_string()));
    }
    validate_key(term, raw)?;
    Ok(Expression::Exists(term.to_string()))
}

fn parse_value_set(rest: &str, raw: &str) -> Result<BTreeSet<String>, SelectorParseError> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| SelectorParseError(raw.to_string(), "expected (v1,v2,...) after in/notin"))?;
    Ok(inner.split(',').map(|v| v.trim().to_string()).collect())
}

fn validate_key(key: &str, raw: &str) -> Result<(), SelectorParseError> {
    if key.is_empty() {
        return Err(SelectorParseError(raw.to_string(), "empty label key"));
    }
    Ok(())
}

/// The normalized predicate set a subscription carries (spec §3, §4.1).
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    /// Empty ⇒ cluster-wide; one ⇒ scope the API call; many ⇒ cluster-wide watch with client-side filtering.
    pub namespaces: Vec<String>,
    /// Parsed label selector, or `None` if the caller didn't specify one.
    pub label_selector: Option<LabelSelector>,
    /// `involvedObject.kind` to match, if any.
    pub involved_kind: Option<String>,
    /// `involvedObject.name` to match, if any.
    pub involved_name: Option<String>,
    /// `involvedObject.namespace` to match, if any.
    pub involved_namespace: Option<String>,
    /// Event type (`Normal`|`Warning`) to match, if any.
    pub event_type: Option<EventType>,
    /// Prefix the event `reason` must start with, if any.
    pub reason_prefix: Option<String>,
}

/// Kubernetes event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// `Normal` event type.
    Normal,
    /// `Warning` event type.
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        })
    }
}

impl EventType {
    /// Parse from the raw API string; unknown strings are rejected by the caller.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Normal" => Some(EventType::Normal),
            "Warning" => Some(EventType::Warning),
            _ => None,
        }
    }
}

/// Raw, unvalidated filter input as supplied by a tool call (spec §6 `events_subscribe`).
#[derive(Debug, Clone, Default)]
pub struct FilterInput {
    /// See [`FilterSet::namespaces`].
    pub namespaces: Vec<String>,
    /// Raw label-selector string, parsed by [`LabelSelector::parse`].
    pub label_selector: Option<String>,
    /// See [`FilterSet::involved_kind`].
    pub involved_kind: Option<String>,
    /// See [`FilterSet::involved_name`].
    pub involved_name: Option<String>,
    /// See [`FilterSet::involved_namespace`].
    pub involved_namespace: Option<String>,
    /// Raw event type string (`Normal`|`Warning`).
    pub event_type: Option<String>,
    /// See [`FilterSet::reason_prefix`].
    pub reason_prefix: Option<String>,
}

impl FilterSet {
    /// Normalize raw tool input into a canonical predicate set, validating selector syntax
    /// and the event-type enum. Does not yet enforce mode-specific constraints; call
    /// [`Self::validate_for_mode`] for that (spec §4.1).
    pub fn normalize(input: FilterInput) -> Result<Self, String> {
        let label_selector = match input.label_selector {
            Some(raw) if !raw.trim().is_empty() => {
                Some(LabelSelector::parse(&raw).map_err(|e| e.to_string())?)
            }
            _ => None,
        };
        let event_type = match input.event_type {
            Some(raw) if !raw.trim().is_empty() => {
                Some(EventType::parse(raw.trim()).ok_or_else(|| format!("invalid event type: {raw}"))?)
            }
            _ => None,
        };
        Ok(Self {
            namespaces: input.namespaces,
            label_selector,
            involved_kind: input.involved_kind,
            involved_name: input.involved_name,
            involved_namespace: input.involved_namespace,
            event_type,
            reason_prefix: input.reason_prefix,
        })
    }

    /// `faults` mode rejects `type="Normal"` (spec §3, §4.1): a fault signal is
    /// definitionally abnormal, so a filter that would only ever pass `Normal`
    /// events can never match anything meaningful in that mode.
    pub fn validate_for_mode(&self, mode: Mode) -> Result<(), String> {
        if mode == Mode::Faults && self.event_type == Some(EventType::Normal) {
            return Err("faults subscriptions cannot filter on type=Normal".to_string());
        }
        Ok(())
    }

    /// Match this filter set against an Event record (spec §3, §4.1).
    pub fn matches_event(&self, event: &K8sEvent) -> bool {
        let involved = &event.involved_object;
        let namespace = event.metadata.namespace.as_deref().unwrap_or_default();

        if !self.namespaces.is_empty() && !self.namespaces.iter().any(|n| n == namespace) {
            return false;
        }
        if let Some(labels) = &self.label_selector {
            let event_labels: BTreeMap<String, String> = event
                .metadata
                .labels
                .clone()
                .unwrap_or_default()
                .into_iter()
                .collect();
            if !labels.matches(&event_labels) {
                return false;
            }
        }
        if let Some(kind) = &self.involved_kind {
            if involved.kind.as_deref() != Some(kind.as_str()) {
                return false;
            }
        }
        if let Some(name) = &self.involved_name {
            if involved.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(ns) = &self.involved_namespace {
            if involved.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        if let Some(expected) = self.event_type {
            match event.type_.as_deref().and_then(EventType::parse) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
        if let Some(prefix) = &self.reason_prefix {
            if !event.reason.as_deref().unwrap_or_default().starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }

    /// Match this filter set against a fault-producing resource's identity and labels
    /// (spec §4.7 delivery fan-out: "whose filters `Matches` the signal's resource").
    pub fn matches_resource(&self, namespace: &str, kind: &str, name: &str, labels: &BTreeMap<String, String>) -> bool {
        if !self.namespaces.is_empty() && !self.namespaces.iter().any(|n| n == namespace) {
            return false;
        }
        if let Some(selector) = &self.label_selector {
            if !selector.matches(labels) {
                return false;
            }
        }
        if let Some(expected_kind) = &self.involved_kind {
            if expected_kind != kind {
                return false;
            }
        }
        if let Some(expected_name) = &self.involved_name {
            if expected_name != name {
                return false;
            }
        }
        if let Some(expected_ns) = &self.involved_namespace {
            if expected_ns != namespace {
                return false;
            }
        }
        true
    }
}
