//! Compilation of declared input topics into message filters.
//!
//! A filter's id is a content hash of its source, mappings, arguments and
//! identifiers, so identical configuration yields identical ids across
//! restarts and across operator instances. The hashing scheme is shared with
//! the other services of the analytics pipeline and must not change.

mod identify;

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{FilterType, InputTopic};

pub use identify::{ExtractError, FilterHandler, IdentifyError, Projection};

const DATA_SUFFIX: &str = ":data";
const OPERATOR_SOURCE_PREFIX: &str = "analytics.";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CompileError {
    #[error("no selector for {0:?}")]
    NoSelector(BTreeSet<String>),
    #[error("duplicate mapping destination '{dest}' in input topic '{topic}'")]
    DuplicateDestination { topic: String, dest: String },
    #[error("invalid operator filter value '{0}', expected <operator_id>[:<pipeline_id>]")]
    InvalidOperatorValue(String),
}

/// A named shape of handler input: the set of destination fields it expects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    pub name: String,
    pub args: BTreeSet<String>,
}

impl Selector {
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identifier {
    pub key: String,
    pub value: String,
}

impl Identifier {
    fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// `key` is the destination field with the `:data` suffix, `path` a dotted path into the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMapping {
    pub key: String,
    pub path: String,
}

impl FieldMapping {
    pub fn dest(&self) -> &str {
        self.key.strip_suffix(DATA_SUFFIX).unwrap_or(&self.key)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterSpec {
    pub id: String,
    pub source: String,
    pub mappings: Vec<FieldMapping>,
    pub identifiers: Vec<Identifier>,
    pub selector: Option<String>,
}

impl FilterSpec {
    fn compute_id(&self) -> String {
        let mut items = vec![
            self.source.clone(),
            hash_pairs(self.mappings.iter().map(|m| (m.key.as_str(), m.path.as_str()))),
            hash_pairs([("selector", self.selector.as_deref().unwrap_or("None"))]),
        ];
        for identifier in &self.identifiers {
            items.push(hash_pairs([
                ("key", identifier.key.as_str()),
                ("value", identifier.value.as_str()),
            ]));
        }
        hash_list(&items)
    }
}

fn hash_str(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn hash_list(items: &[String]) -> String {
    hash_str(&items.concat())
}

/// Order independent: every pair is rendered as `key + value` and the renderings are sorted.
fn hash_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut items: Vec<String> = pairs.into_iter().map(|(k, v)| format!("{k}{v}")).collect();
    items.sort();
    hash_list(&items)
}

fn identifiers(topic: &InputTopic, value: &str, pipeline_id: &str) -> Result<Vec<Identifier>, CompileError> {
    match topic.filter_type {
        FilterType::DeviceId => Ok(vec![
            Identifier::new("device_id", value),
            Identifier::new("service_id", &topic.name.replace('_', ":")),
        ]),
        FilterType::OperatorId => {
            let (operator_id, pipeline_id) = match value.split_once(':') {
                Some((_, p)) if p.contains(':') => {
                    return Err(CompileError::InvalidOperatorValue(value.to_string()))
                }
                Some((o, p)) => (o, p),
                None => (value, pipeline_id),
            };
            Ok(vec![
                Identifier::new("operator_id", operator_id),
                Identifier::new("pipeline_id", pipeline_id),
            ])
        }
        FilterType::ImportId => Ok(vec![Identifier::new("import_id", value)]),
    }
}

/// First declared selector whose args equal the destination set. An empty selector list means
/// the operator does not distinguish inputs.
fn resolve_selector(
    dests: &BTreeSet<String>,
    selectors: &[Selector],
) -> Result<Option<String>, CompileError> {
    if selectors.is_empty() {
        return Ok(None);
    }
    let mut matching = selectors.iter().filter(|s| &s.args == dests);
    let first = matching
        .next()
        .ok_or_else(|| CompileError::NoSelector(dests.clone()))?;
    let shadowed: Vec<&str> = matching.map(|s| s.name.as_str()).collect();
    if !shadowed.is_empty() {
        warn!(selector = %first.name, ?shadowed, "selectors with identical args, using the first");
    }
    Ok(Some(first.name.clone()))
}

/// Compiles one filter for a single `filter_value`.
pub fn compile_filter(
    topic: &InputTopic,
    filter_value: &str,
    pipeline_id: &str,
    selectors: &[Selector],
) -> Result<FilterSpec, CompileError> {
    let prefix = match topic.filter_type {
        FilterType::OperatorId => OPERATOR_SOURCE_PREFIX,
        _ => "",
    };

    let mut dests = BTreeSet::new();
    let mut mappings = Vec::with_capacity(topic.mappings.len());
    for mapping in &topic.mappings {
        if !dests.insert(mapping.dest.clone()) {
            return Err(CompileError::DuplicateDestination {
                topic: topic.name.clone(),
                dest: mapping.dest.clone(),
            });
        }
        mappings.push(FieldMapping {
            key: format!("{}{DATA_SUFFIX}", mapping.dest),
            path: format!("{prefix}{}", mapping.source),
        });
    }

    let mut filter = FilterSpec {
        id: String::new(),
        source: topic.name.clone(),
        mappings,
        identifiers: identifiers(topic, filter_value, pipeline_id)?,
        selector: resolve_selector(&dests, selectors)?,
    };
    filter.id = filter.compute_id();
    Ok(filter)
}

/// Compiles one filter per comma separated value of the input topic, e.g. for a device group
/// sharing the same service.
pub fn compile_input_topic(
    topic: &InputTopic,
    pipeline_id: &str,
    selectors: &[Selector],
) -> Result<Vec<FilterSpec>, CompileError> {
    topic
        .filter_value
        .split(',')
        .map(|value| {
            let filter = compile_filter(topic, value, pipeline_id, selectors)?;
            info!(
                id = %filter.id,
                source = %filter.source,
                filter_value = value,
                selector = ?filter.selector,
                "added filter"
            );
            Ok(filter)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mapping;

    fn device_topic(name: &str, value: &str, mappings: &[(&str, &str)]) -> InputTopic {
        InputTopic {
            name: name.to_string(),
            filter_type: FilterType::DeviceId,
            filter_value: value.to_string(),
            mappings: mappings
                .iter()
                .map(|(dest, source)| Mapping {
                    dest: dest.to_string(),
                    source: source.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_hash_str_is_lowercase_sha256() {
        assert_eq!(
            hash_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_pairs_sorts_renderings() {
        assert_eq!(
            hash_pairs([("b", "2"), ("a", "1")]),
            hash_pairs([("a", "1"), ("b", "2")])
        );
        assert_eq!(hash_pairs([("a", "1"), ("b", "2")]), hash_str("a1b2"));
    }

    #[test]
    fn test_device_identifiers() {
        let topic = device_topic("topic_a", "dev1", &[("value", "value.sensor")]);
        let filter = compile_filter(&topic, "dev1", "p", &[]).unwrap();
        assert_eq!(
            filter.identifiers,
            vec![
                Identifier::new("device_id", "dev1"),
                Identifier::new("service_id", "topic:a"),
            ]
        );
        assert_eq!(filter.selector, None);
        assert_eq!(
            filter.mappings,
            vec![FieldMapping {
                key: "value:data".to_string(),
                path: "value.sensor".to_string(),
            }]
        );
    }

    #[test]
    fn test_operator_identifiers_and_prefix() {
        let mut topic = device_topic("analytics-op", "op1", &[("value", "result")]);
        topic.filter_type = FilterType::OperatorId;

        let filter = compile_filter(&topic, "op1", "pipe-default", &[]).unwrap();
        assert_eq!(
            filter.identifiers,
            vec![
                Identifier::new("operator_id", "op1"),
                Identifier::new("pipeline_id", "pipe-default"),
            ]
        );
        assert_eq!(filter.mappings[0].path, "analytics.result");

        let filter = compile_filter(&topic, "op1:pipe-other", "pipe-default", &[]).unwrap();
        assert_eq!(filter.identifiers[1], Identifier::new("pipeline_id", "pipe-other"));

        assert_eq!(
            compile_filter(&topic, "a:b:c", "pipe-default", &[]).unwrap_err(),
            CompileError::InvalidOperatorValue("a:b:c".to_string())
        );
    }

    #[test]
    fn test_import_identifiers() {
        let mut topic = device_topic("import", "imp1", &[("value", "value")]);
        topic.filter_type = FilterType::ImportId;
        let filter = compile_filter(&topic, "imp1", "p", &[]).unwrap();
        assert_eq!(filter.identifiers, vec![Identifier::new("import_id", "imp1")]);
    }

    #[test]
    fn test_selector_resolution() {
        let topic = device_topic("topic", "test", &[("value", "value.sensor")]);
        let selectors = [Selector::new("s0", &["other"]), Selector::new("s1", &["value"])];
        let filter = compile_filter(&topic, "test", "p", &selectors).unwrap();
        assert_eq!(filter.selector.as_deref(), Some("s1"));

        let err = compile_filter(&topic, "test", "p", &selectors[..1]).unwrap_err();
        assert_eq!(
            err,
            CompileError::NoSelector(BTreeSet::from(["value".to_string()]))
        );
    }

    #[test]
    fn test_identical_selector_args_first_wins() {
        let topic = device_topic("topic", "test", &[("value", "value.sensor")]);
        let selectors = [Selector::new("first", &["value"]), Selector::new("second", &["value"])];
        let filter = compile_filter(&topic, "test", "p", &selectors).unwrap();
        assert_eq!(filter.selector.as_deref(), Some("first"));
    }

    #[test]
    fn test_duplicate_destination_is_rejected() {
        let topic = device_topic("topic", "test", &[("value", "a"), ("value", "b")]);
        assert!(matches!(
            compile_filter(&topic, "test", "p", &[]),
            Err(CompileError::DuplicateDestination { .. })
        ));
    }

    #[test]
    fn test_comma_separated_values() {
        let topic = device_topic("topic", "dev1,dev2,dev3", &[("value", "value.sensor")]);
        let filters = compile_input_topic(&topic, "p", &[]).unwrap();
        let devices: Vec<&str> = filters
            .iter()
            .map(|f| f.identifiers[0].value.as_str())
            .collect();
        assert_eq!(devices, vec!["dev1", "dev2", "dev3"]);

        let ids: BTreeSet<&str> = filters.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
    }
}
