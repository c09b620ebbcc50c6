//! Op name <-> id resolution.
//!
//! `OpTable` is the host's side: names registered in order, id = position,
//! with `"ops"` fixed at id 0. `OpsMap` is the caller's immutable copy, parsed
//! once from the op 0 response.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::constants::{OPS_MAP_OP_ID, OPS_MAP_OP_NAME, OpId};
use crate::error::{BridgeError, ProtocolViolation};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpsMap {
    ids: HashMap<String, OpId>,
}

impl OpsMap {
    /// Parse the JSON object returned by op 0.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ProtocolViolation> {
        let ids: HashMap<String, OpId> = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolViolation::MalformedOpsMap(e.to_string()))?;
        Ok(Self { ids })
    }

    pub fn get(&self, name: &str) -> Option<OpId> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, OpId)> {
        self.ids.iter().map(|(name, id)| (name.as_str(), *id))
    }
}

#[derive(Debug, Clone)]
pub struct OpTable {
    names: Vec<String>,
    ids: HashMap<String, OpId>,
}

impl Default for OpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OpTable {
    pub fn new() -> Self {
        let mut table = Self {
            names: Vec::new(),
            ids: HashMap::new(),
        };
        table.names.push(OPS_MAP_OP_NAME.to_string());
        table.ids.insert(OPS_MAP_OP_NAME.to_string(), OPS_MAP_OP_ID);
        table
    }

    pub fn register(&mut self, name: &str) -> Result<OpId, BridgeError> {
        if self.ids.contains_key(name) {
            return Err(BridgeError::DuplicateOp(name.to_string()));
        }
        let op_id = self.names.len() as OpId;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), op_id);
        Ok(op_id)
    }

    pub fn id(&self, name: &str) -> Option<OpId> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, op_id: OpId) -> Option<&str> {
        self.names.get(op_id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Body of the op 0 response: `{"ops":0,"name":id,...}` as bytes.
    pub fn json_map(&self) -> Vec<u8> {
        let map: Map<String, Value> = self
            .names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), Value::from(id as OpId)))
            .collect();
        Value::Object(map).to_string().into_bytes()
    }
}
