//! Canonical entity records as seen by the engine.
//!
//! The entity store owns these records; the engine only reads them, applies
//! field operations, and writes them back inside a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::payload::{parse_reference, FieldChange, FieldKind, FieldOp, TargetType};
use crate::common::EntityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub entity_type: TargetType,
    pub fields: Map<String, Value>,
    /// Set when this record was merged away; points at the survivor.
    pub redirect_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn new(id: EntityId, entity_type: TargetType, now: DateTime<Utc>) -> Self {
        Self {
            id,
            entity_type,
            fields: Map::new(),
            redirect_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A record that has been merged into another one.
    pub fn is_tombstone(&self) -> bool {
        self.redirect_id.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Apply field operations in order; later changes to a field win.
    ///
    /// Changes must already be validated against the schema.
    pub fn apply_changes(&mut self, changes: &[FieldChange], now: DateTime<Utc>) {
        for change in changes {
            match &change.op {
                FieldOp::Set(value) => {
                    self.fields.insert(change.field.clone(), value.clone());
                }
                FieldOp::Clear => {
                    self.fields.remove(&change.field);
                }
                FieldOp::AddToSet(values) => {
                    let entry = self
                        .fields
                        .entry(change.field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        *entry = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = entry {
                        for value in values {
                            if !items.contains(value) {
                                items.push(value.clone());
                            }
                        }
                    }
                }
                FieldOp::RemoveFromSet(values) => {
                    if let Some(Value::Array(items)) = self.fields.get_mut(&change.field) {
                        items.retain(|item| !values.contains(item));
                    }
                }
            }
        }
        self.updated_at = now;
    }

    /// Every entity this record points at through reference fields.
    pub fn references(&self) -> Vec<(TargetType, EntityId)> {
        let mut refs = Vec::new();
        for (name, kind) in self.entity_type.fields() {
            let Some(referenced) = kind.referenced_type() else {
                continue;
            };
            match (kind, self.fields.get(*name)) {
                (FieldKind::Reference(_), Some(value)) => {
                    refs.extend(parse_reference(value).map(|id| (referenced, id)));
                }
                (FieldKind::ReferenceSet(_), Some(Value::Array(items))) => {
                    refs.extend(items.iter().filter_map(parse_reference).map(|id| (referenced, id)));
                }
                _ => {}
            }
        }
        refs
    }

    pub fn references_entity(&self, id: EntityId) -> bool {
        self.references().iter().any(|(_, referenced)| *referenced == id)
    }

    /// Point every reference to `from` at `to` instead.
    ///
    /// Set fields are de-duplicated afterwards. A single reference that would
    /// end up pointing at the record itself is cleared. Returns whether
    /// anything changed.
    pub fn redirect_references(&mut self, from: EntityId, to: EntityId, now: DateTime<Utc>) -> bool {
        let from_value = Value::String(from.to_string());
        let to_value = Value::String(to.to_string());
        let mut changed = false;

        for (name, kind) in self.entity_type.fields() {
            match kind {
                FieldKind::Reference(_) => {
                    if self.fields.get(*name) == Some(&from_value) {
                        if to == self.id {
                            self.fields.remove(*name);
                        } else {
                            self.fields.insert(name.to_string(), to_value.clone());
                        }
                        changed = true;
                    }
                }
                FieldKind::ReferenceSet(_) => {
                    if let Some(Value::Array(items)) = self.fields.get_mut(*name) {
                        if !items.contains(&from_value) {
                            continue;
                        }
                        let mut rewritten: Vec<Value> = Vec::with_capacity(items.len());
                        for item in items.drain(..) {
                            let item = if item == from_value {
                                to_value.clone()
                            } else {
                                item
                            };
                            if !rewritten.contains(&item) {
                                rewritten.push(item);
                            }
                        }
                        *items = rewritten;
                        changed = true;
                    }
                }
                _ => {}
            }
        }

        if changed {
            self.updated_at = now;
        }
        changed
    }
}
