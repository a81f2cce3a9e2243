//! One-of schema validation.
//!
//! Polymorphic specs are flattened to a [`SlotMap`] (`format -> {type}`) of the
//! populated slots. A slot is populated iff it is present; a present payload full
//! of default values still counts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use itertools::Itertools;
use thiserror::Error;

/// Populated slots of a polymorphic spec, `format -> {type}`.
pub type SlotMap<F, T> = BTreeMap<F, BTreeSet<T>>;

/// Violations detected at the admission boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("exactly one format must be set, found {formats}")]
    MultipleFormats { formats: String },

    #[error("exactly one format must be set, found none")]
    NoFormat,

    #[error("format '{format}' must set exactly one type, found {types}")]
    MultipleTypes { format: String, types: String },

    #[error("format '{format}' must set exactly one type, found none")]
    NoType { format: String },

    #[error("format cannot change after creation: was '{from}', now {to}")]
    FormatImmutable { from: String, to: String },

    #[error("type of format '{format}' cannot change after creation: was '{from}', now {to}")]
    TypeImmutable {
        format: String,
        from: String,
        to: String,
    },

    #[error("exactly one blob store backend must be set, found {backends}")]
    MultipleBackends { backends: String },

    #[error("exactly one blob store backend must be set, found none")]
    NoBackend,

    #[error("blob store backend cannot change after creation: was '{from}', now '{to}'")]
    BackendImmutable { from: String, to: String },

    #[error("'{field}' cannot change after creation: was '{from}', now '{to}'")]
    KeyImmutable {
        field: &'static str,
        from: String,
        to: String,
    },

    #[error("invalid '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    /// Create an invalid field error.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// How many members of a one-of group are populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cardinality<K> {
    None,
    One(K),
    Many(Vec<K>),
}

/// Classify a set of populated members.
pub fn cardinality<K: Copy + Ord>(populated: &BTreeSet<K>) -> Cardinality<K> {
    let mut iter = populated.iter().copied();
    match (iter.next(), iter.next()) {
        (None, _) => Cardinality::None,
        (Some(only), None) => Cardinality::One(only),
        (Some(_), Some(_)) => Cardinality::Many(populated.iter().copied().collect()),
    }
}

/// Render members as a sorted, quoted list for error messages.
pub fn describe<K: Display>(members: impl IntoIterator<Item = K>) -> String {
    let rendered = members.into_iter().map(|m| format!("'{m}'")).join(", ");
    if rendered.is_empty() {
        "none".to_string()
    } else {
        rendered
    }
}

/// Check that exactly one format and, within it, exactly one type is populated.
///
/// # Errors
///
/// Returns `MultipleFormats`/`NoFormat` for the format axis, then
/// `MultipleTypes`/`NoType` for the type axis of the single format.
pub fn validate_one_of<F, T>(slots: &SlotMap<F, T>) -> Result<(F, T), ValidationError>
where
    F: Copy + Ord + Display,
    T: Copy + Ord + Display,
{
    let formats: BTreeSet<F> = slots.keys().copied().collect();
    let format = match cardinality(&formats) {
        Cardinality::None => return Err(ValidationError::NoFormat),
        Cardinality::Many(many) => {
            return Err(ValidationError::MultipleFormats {
                formats: describe(many),
            });
        }
        Cardinality::One(format) => format,
    };

    let types = slots.get(&format).cloned().unwrap_or_default();
    match cardinality(&types) {
        Cardinality::None => Err(ValidationError::NoType {
            format: format.to_string(),
        }),
        Cardinality::Many(many) => Err(ValidationError::MultipleTypes {
            format: format.to_string(),
            types: describe(many),
        }),
        Cardinality::One(repo_type) => Ok((format, repo_type)),
    }
}

/// Check that every format/type populated in `old` is still populated in `new`.
///
/// # Errors
///
/// `FormatImmutable` when an old format is gone, `TypeImmutable` when an old
/// type is gone from its format.
pub fn validate_unchanged<F, T>(
    old: &SlotMap<F, T>,
    new: &SlotMap<F, T>,
) -> Result<(), ValidationError>
where
    F: Copy + Ord + Display,
    T: Copy + Ord + Display,
{
    for (format, old_types) in old {
        let Some(new_types) = new.get(format) else {
            return Err(ValidationError::FormatImmutable {
                from: format.to_string(),
                to: describe(new.keys()),
            });
        };
        if let Some(missing) = old_types.iter().find(|t| !new_types.contains(t)) {
            return Err(ValidationError::TypeImmutable {
                format: format.to_string(),
                from: missing.to_string(),
                to: describe(new_types),
            });
        }
    }
    Ok(())
}

/// Reject blank required string fields.
///
/// # Errors
///
/// Returns `InvalidField` if `value` is empty or whitespace.
pub fn require_non_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::invalid_field(field, "must not be empty"));
    }
    Ok(())
}

/// Reject a change of the field that forms the remote natural key.
///
/// # Errors
///
/// Returns `KeyImmutable` if `old` and `new` differ.
pub fn require_same_key(field: &'static str, old: &str, new: &str) -> Result<(), ValidationError> {
    if old != new {
        return Err(ValidationError::KeyImmutable {
            field,
            from: old.to_string(),
            to: new.to_string(),
        });
    }
    Ok(())
}
