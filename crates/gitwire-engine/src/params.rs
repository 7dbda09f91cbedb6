// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Typed access to loosely shaped JSON payloads

use crate::error::EngineError;
use crate::paths::PathResolver;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Borrowed view over a payload object
#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> Params<'a> {
    /// Wrap a payload; `null` reads as an empty object.
    pub fn new(payload: &'a Value) -> Result<Self, EngineError> {
        match payload {
            Value::Object(fields) => Ok(Self {
                fields: Some(fields),
            }),
            Value::Null => Ok(Self { fields: None }),
            other => Err(EngineError::invalid(
                "payload",
                format!("expected an object, got {other}"),
            )),
        }
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields
            .and_then(|fields| fields.get(key))
            .filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &'static str) -> Result<&'a str, EngineError> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(_) => Err(EngineError::invalid(key, "expected a string")),
            None => Err(EngineError::MissingParameter(key)),
        }
    }

    pub fn opt_str(&self, key: &'static str) -> Result<Option<&'a str>, EngineError> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(EngineError::invalid(key, "expected a string")),
            None => Ok(None),
        }
    }

    pub fn flag(&self, key: &'static str) -> Result<bool, EngineError> {
        match self.get(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(EngineError::invalid(key, "expected a boolean")),
            None => Ok(false),
        }
    }

    pub fn opt_u32(&self, key: &'static str) -> Result<Option<u32>, EngineError> {
        match self.get(key) {
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| EngineError::invalid(key, "expected a non-negative integer")),
            None => Ok(None),
        }
    }

    /// A string or an array of strings
    pub fn str_list(&self, key: &'static str) -> Result<Vec<String>, EngineError> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| EngineError::invalid(key, "expected strings"))
                })
                .collect(),
            Some(_) => Err(EngineError::invalid(key, "expected a string or a list of strings")),
            None => Err(EngineError::MissingParameter(key)),
        }
    }

    /// Decode a nested object such as `author` or `headers`
    pub fn object<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>, EngineError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|err| EngineError::invalid(key, err.to_string()))
            })
            .transpose()
    }

    pub fn headers(&self) -> Result<BTreeMap<String, String>, EngineError> {
        Ok(self.object("headers")?.unwrap_or_default())
    }

    /// The `dir` field, resolved and checked
    pub fn dir(&self, resolver: &PathResolver) -> Result<PathBuf, EngineError> {
        Ok(resolver.resolve_value(self.fields.and_then(|fields| fields.get("dir")))?)
    }
}
