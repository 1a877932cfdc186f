//! Typed payload diffs.
//!
//! A payload never carries an untyped map of changes: every target type has a
//! closed field schema, and every change is one of a fixed set of field
//! operations. Validation happens against the schema before an edit is
//! stored and again when it is applied.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::common::EntityId;
use crate::domains::edits::error::EditError;

/// Kind of canonical record an edit targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Performer,
    Studio,
    Scene,
    Tag,
    Image,
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetType::Performer => write!(f, "performer"),
            TargetType::Studio => write!(f, "studio"),
            TargetType::Scene => write!(f, "scene"),
            TargetType::Tag => write!(f, "tag"),
            TargetType::Image => write!(f, "image"),
        }
    }
}

impl std::str::FromStr for TargetType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "performer" => Ok(TargetType::Performer),
            "studio" => Ok(TargetType::Studio),
            "scene" => Ok(TargetType::Scene),
            "tag" => Ok(TargetType::Tag),
            "image" => Ok(TargetType::Image),
            _ => Err(anyhow::anyhow!("Invalid target type: {}", s)),
        }
    }
}

/// Shape of a single field in a target type's schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`
    Date,
    Integer,
    TextSet,
    Reference(TargetType),
    ReferenceSet(TargetType),
}

impl FieldKind {
    pub fn is_set(&self) -> bool {
        matches!(self, FieldKind::TextSet | FieldKind::ReferenceSet(_))
    }

    pub fn referenced_type(&self) -> Option<TargetType> {
        match self {
            FieldKind::Reference(target) | FieldKind::ReferenceSet(target) => Some(*target),
            _ => None,
        }
    }
}

const PERFORMER_FIELDS: &[(&str, FieldKind)] = &[
    ("name", FieldKind::Text),
    ("disambiguation", FieldKind::Text),
    ("gender", FieldKind::Text),
    ("birthdate", FieldKind::Date),
    ("country", FieldKind::Text),
    ("aliases", FieldKind::TextSet),
    ("urls", FieldKind::TextSet),
    ("images", FieldKind::ReferenceSet(TargetType::Image)),
];

const STUDIO_FIELDS: &[(&str, FieldKind)] = &[
    ("name", FieldKind::Text),
    ("parent", FieldKind::Reference(TargetType::Studio)),
    ("urls", FieldKind::TextSet),
    ("images", FieldKind::ReferenceSet(TargetType::Image)),
];

const SCENE_FIELDS: &[(&str, FieldKind)] = &[
    ("title", FieldKind::Text),
    ("details", FieldKind::Text),
    ("date", FieldKind::Date),
    ("duration", FieldKind::Integer),
    ("studio", FieldKind::Reference(TargetType::Studio)),
    ("performers", FieldKind::ReferenceSet(TargetType::Performer)),
    ("tags", FieldKind::ReferenceSet(TargetType::Tag)),
    ("urls", FieldKind::TextSet),
    ("images", FieldKind::ReferenceSet(TargetType::Image)),
];

const TAG_FIELDS: &[(&str, FieldKind)] = &[
    ("name", FieldKind::Text),
    ("description", FieldKind::Text),
    ("category", FieldKind::Text),
    ("aliases", FieldKind::TextSet),
];

const IMAGE_FIELDS: &[(&str, FieldKind)] = &[
    ("url", FieldKind::Text),
    ("width", FieldKind::Integer),
    ("height", FieldKind::Integer),
];

impl TargetType {
    pub fn fields(&self) -> &'static [(&'static str, FieldKind)] {
        match self {
            TargetType::Performer => PERFORMER_FIELDS,
            TargetType::Studio => STUDIO_FIELDS,
            TargetType::Scene => SCENE_FIELDS,
            TargetType::Tag => TAG_FIELDS,
            TargetType::Image => IMAGE_FIELDS,
        }
    }

    pub fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.fields()
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
    }

    /// Field every record of this type must carry.
    pub fn required_field(&self) -> &'static str {
        match self {
            TargetType::Scene => "title",
            TargetType::Image => "url",
            _ => "name",
        }
    }
}

/// Operation an edit performs on its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    Create,
    Modify,
    Destroy,
    Merge,
}

impl EditOperation {
    /// Destroy and merge remove an entity and get a longer review floor.
    pub fn is_destructive(&self) -> bool {
        matches!(self, EditOperation::Destroy | EditOperation::Merge)
    }
}

impl std::fmt::Display for EditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditOperation::Create => write!(f, "create"),
            EditOperation::Modify => write!(f, "modify"),
            EditOperation::Destroy => write!(f, "destroy"),
            EditOperation::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for EditOperation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "create" => Ok(EditOperation::Create),
            "modify" => Ok(EditOperation::Modify),
            "destroy" => Ok(EditOperation::Destroy),
            "merge" => Ok(EditOperation::Merge),
            _ => Err(anyhow::anyhow!("Invalid edit operation: {}", s)),
        }
    }
}

/// A single field-level operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FieldOp {
    Set(Value),
    Clear,
    AddToSet(Vec<Value>),
    RemoveFromSet(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub op: FieldOp,
}

impl FieldChange {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FieldOp::Set(value.into()),
        }
    }

    pub fn clear(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FieldOp::Clear,
        }
    }

    pub fn add<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            field: field.into(),
            op: FieldOp::AddToSet(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn remove<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            field: field.into(),
            op: FieldOp::RemoveFromSet(values.into_iter().map(Into::into).collect()),
        }
    }
}

/// The proposed change carried by an edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum EditPayload {
    Create {
        changes: Vec<FieldChange>,
    },
    Modify {
        changes: Vec<FieldChange>,
    },
    Destroy,
    /// Absorb `source_ids` into the edit's target, optionally adjusting the
    /// survivor's fields in the same step.
    Merge {
        source_ids: Vec<EntityId>,
        #[serde(default)]
        changes: Vec<FieldChange>,
    },
}

impl EditPayload {
    pub fn operation(&self) -> EditOperation {
        match self {
            EditPayload::Create { .. } => EditOperation::Create,
            EditPayload::Modify { .. } => EditOperation::Modify,
            EditPayload::Destroy => EditOperation::Destroy,
            EditPayload::Merge { .. } => EditOperation::Merge,
        }
    }

    pub fn changes(&self) -> &[FieldChange] {
        match self {
            EditPayload::Create { changes }
            | EditPayload::Modify { changes }
            | EditPayload::Merge { changes, .. } => changes,
            EditPayload::Destroy => &[],
        }
    }

    pub fn merge_sources(&self) -> &[EntityId] {
        match self {
            EditPayload::Merge { source_ids, .. } => source_ids,
            _ => &[],
        }
    }

    /// Every entity id mentioned by reference fields of the changes.
    pub fn referenced_ids(&self, target_type: TargetType) -> Vec<(TargetType, EntityId)> {
        let mut ids = Vec::new();
        for change in self.changes() {
            let Some(referenced) = target_type
                .field_kind(&change.field)
                .and_then(|kind| kind.referenced_type())
            else {
                continue;
            };
            let values: &[Value] = match &change.op {
                FieldOp::Set(value) => std::slice::from_ref(value),
                FieldOp::AddToSet(values) => values,
                FieldOp::Clear | FieldOp::RemoveFromSet(_) => &[],
            };
            for value in values {
                match value {
                    Value::Array(items) => ids.extend(
                        items
                            .iter()
                            .filter_map(parse_reference)
                            .map(|id| (referenced, id)),
                    ),
                    other => ids.extend(parse_reference(other).map(|id| (referenced, id))),
                }
            }
        }
        ids
    }

    /// Check the payload's structure against the target type's schema.
    ///
    /// Does not touch storage; existence of targets and references is
    /// checked by the caller inside a transaction.
    pub fn validate(
        &self,
        target_type: TargetType,
        target_id: Option<EntityId>,
    ) -> Result<(), EditError> {
        match self {
            EditPayload::Create { changes } => {
                if target_id.is_some() {
                    return Err(EditError::invalid("create edits must not name a target"));
                }
                validate_changes(target_type, changes)?;
                let required = target_type.required_field();
                let sets_required = changes.iter().any(|change| {
                    change.field == required
                        && matches!(&change.op, FieldOp::Set(Value::String(s)) if !s.trim().is_empty())
                });
                if !sets_required {
                    return Err(EditError::invalid(format!(
                        "new {} must set `{}`",
                        target_type, required
                    )));
                }
            }
            EditPayload::Modify { changes } => {
                require_target(target_id, EditOperation::Modify)?;
                if changes.is_empty() {
                    return Err(EditError::invalid("modify edits must change at least one field"));
                }
                validate_changes(target_type, changes)?;
            }
            EditPayload::Destroy => {
                require_target(target_id, EditOperation::Destroy)?;
            }
            EditPayload::Merge {
                source_ids,
                changes,
            } => {
                let target = require_target(target_id, EditOperation::Merge)?;
                if source_ids.is_empty() {
                    return Err(EditError::invalid("merge edits need at least one source"));
                }
                let mut seen = HashSet::new();
                for source in source_ids {
                    if *source == target {
                        return Err(EditError::invalid("an entity cannot be merged into itself"));
                    }
                    if !seen.insert(*source) {
                        return Err(EditError::invalid(format!(
                            "merge source {} listed more than once",
                            source
                        )));
                    }
                }
                validate_changes(target_type, changes)?;
            }
        }
        Ok(())
    }
}

fn require_target(target_id: Option<EntityId>, operation: EditOperation) -> Result<EntityId, EditError> {
    target_id.ok_or_else(|| EditError::invalid(format!("{} edits require a target id", operation)))
}

fn validate_changes(target_type: TargetType, changes: &[FieldChange]) -> Result<(), EditError> {
    for change in changes {
        let kind = target_type.field_kind(&change.field).ok_or_else(|| {
            EditError::invalid(format!("{} has no field `{}`", target_type, change.field))
        })?;

        match &change.op {
            FieldOp::Clear => {
                if change.field == target_type.required_field() {
                    return Err(EditError::invalid(format!(
                        "`{}` cannot be cleared",
                        change.field
                    )));
                }
            }
            FieldOp::Set(value) => {
                if change.field == target_type.required_field()
                    && value.as_str().is_some_and(|s| s.trim().is_empty())
                {
                    return Err(EditError::invalid(format!(
                        "`{}` cannot be blank",
                        change.field
                    )));
                }
                if kind.is_set() {
                    let Value::Array(items) = value else {
                        return Err(EditError::invalid(format!(
                            "`{}` expects a list of values",
                            change.field
                        )));
                    };
                    for item in items {
                        validate_element(&change.field, kind, item)?;
                    }
                } else {
                    validate_scalar(&change.field, kind, value)?;
                }
            }
            FieldOp::AddToSet(values) | FieldOp::RemoveFromSet(values) => {
                if !kind.is_set() {
                    return Err(EditError::invalid(format!(
                        "`{}` is not a set field",
                        change.field
                    )));
                }
                if values.is_empty() {
                    return Err(EditError::invalid(format!(
                        "set operation on `{}` has no values",
                        change.field
                    )));
                }
                for item in values {
                    validate_element(&change.field, kind, item)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_scalar(field: &str, kind: FieldKind, value: &Value) -> Result<(), EditError> {
    let valid = match kind {
        FieldKind::Text => value.is_string(),
        FieldKind::Date => value.as_str().is_some_and(is_fuzzy_date),
        FieldKind::Integer => value.as_i64().is_some(),
        FieldKind::Reference(_) => parse_reference(value).is_some(),
        FieldKind::TextSet | FieldKind::ReferenceSet(_) => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EditError::invalid(format!("invalid value for `{}`: {}", field, value)))
    }
}

fn validate_element(field: &str, kind: FieldKind, value: &Value) -> Result<(), EditError> {
    let valid = match kind {
        FieldKind::TextSet => value.as_str().is_some_and(|s| !s.trim().is_empty()),
        FieldKind::ReferenceSet(_) => parse_reference(value).is_some(),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EditError::invalid(format!("invalid element for `{}`: {}", field, value)))
    }
}

pub(crate) fn parse_reference(value: &Value) -> Option<EntityId> {
    value.as_str().and_then(|s| EntityId::parse(s).ok())
}

fn is_fuzzy_date(s: &str) -> bool {
    let candidate = match s.len() {
        4 => format!("{}-01-01", s),
        7 => format!("{}-01", s),
        _ => s.to_string(),
    };
    NaiveDate::parse_from_str(&candidate, "%Y-%m-%d").is_ok()
}
