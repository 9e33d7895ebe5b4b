use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::{compile_input_topic, CompileError, FieldMapping, FilterSpec, Selector};
use crate::config::InputTopic;

/// Message level failures: the message is dropped.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentifyError {
    #[error("no filter matches message from '{0}'")]
    NoFilter(String),
    #[error("message from '{topic}' matches filters with different identifier sets {key_sets:?}")]
    Ambiguous {
        topic: String,
        key_sets: Vec<Vec<String>>,
    },
    #[error("identifier '{key}' of message from '{topic}' is not a scalar")]
    MalformedIdentifier { topic: String, key: String },
    #[error("message from '{0}' is not a JSON object")]
    NotAnObject(String),
}

/// Filter level failures: the remaining filters still run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("field '{path}' missing from message")]
    MissingField { path: String },
}

/// Data projected for every filter sharing the same mappings.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub filter_ids: Vec<String>,
    pub data: Result<Map<String, Value>, ExtractError>,
}

/// Dispatch table over every compiled filter.
#[derive(Debug, Default)]
pub struct FilterHandler {
    filters: Vec<FilterSpec>,
    by_id: HashMap<String, usize>,
}

impl FilterHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_input_topics(
        topics: &[InputTopic],
        pipeline_id: &str,
        selectors: &[Selector],
    ) -> Result<Self, CompileError> {
        let mut handler = Self::new();
        for topic in topics {
            for filter in compile_input_topic(topic, pipeline_id, selectors)? {
                handler.add_filter(filter);
            }
        }
        Ok(handler)
    }

    /// Identical filters collapse into one, since their ids are equal.
    pub fn add_filter(&mut self, filter: FilterSpec) {
        if self.by_id.contains_key(&filter.id) {
            debug!(id = %filter.id, "filter already registered");
            return;
        }
        self.by_id.insert(filter.id.clone(), self.filters.len());
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&FilterSpec> {
        self.by_id.get(id).map(|i| &self.filters[*i])
    }

    pub fn selector(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(|f| f.selector.as_deref())
    }

    /// Distinct sources in registration order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for filter in &self.filters {
            if !sources.contains(&filter.source) {
                sources.push(filter.source.clone());
            }
        }
        sources
    }

    /// Finds every filter of `topic` whose identifiers all match top level fields of `message`,
    /// and projects the mapped fields once per distinct mapping table.
    pub fn identify(&self, topic: &str, message: &Value) -> Result<Vec<Projection>, IdentifyError> {
        let fields = message
            .as_object()
            .ok_or_else(|| IdentifyError::NotAnObject(topic.to_string()))?;

        let mut matched: Vec<&FilterSpec> = Vec::new();
        for filter in self.filters.iter().filter(|f| f.source == topic) {
            if matches(filter, fields, topic)? {
                matched.push(filter);
            }
        }
        if matched.is_empty() {
            return Err(IdentifyError::NoFilter(topic.to_string()));
        }

        let key_sets: BTreeSet<Vec<String>> = matched
            .iter()
            .map(|f| f.identifiers.iter().map(|i| i.key.clone()).collect())
            .collect();
        if key_sets.len() > 1 {
            return Err(IdentifyError::Ambiguous {
                topic: topic.to_string(),
                key_sets: key_sets.into_iter().collect(),
            });
        }

        let mut projections: Vec<(&[FieldMapping], Projection)> = Vec::new();
        for filter in matched {
            match projections
                .iter_mut()
                .find(|(mappings, _)| *mappings == filter.mappings.as_slice())
            {
                Some((_, projection)) => projection.filter_ids.push(filter.id.clone()),
                None => projections.push((
                    filter.mappings.as_slice(),
                    Projection {
                        filter_ids: vec![filter.id.clone()],
                        data: project(&filter.mappings, message),
                    },
                )),
            }
        }
        Ok(projections.into_iter().map(|(_, p)| p).collect())
    }
}

fn matches(filter: &FilterSpec, fields: &Map<String, Value>, topic: &str) -> Result<bool, IdentifyError> {
    for identifier in &filter.identifiers {
        let value = match fields.get(&identifier.key) {
            None => return Ok(false),
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
            Some(_) => {
                return Err(IdentifyError::MalformedIdentifier {
                    topic: topic.to_string(),
                    key: identifier.key.clone(),
                })
            }
        };
        if value != identifier.value {
            return Ok(false);
        }
    }
    Ok(true)
}

fn lookup<'a>(message: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(message, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn project(mappings: &[FieldMapping], message: &Value) -> Result<Map<String, Value>, ExtractError> {
    mappings
        .iter()
        .map(|mapping| {
            lookup(message, &mapping.path)
                .map(|value| (mapping.dest().to_string(), value.clone()))
                .ok_or_else(|| ExtractError::MissingField {
                    path: mapping.path.clone(),
                })
        })
        .collect()
}
