//! Entity to document and back.

use crate::document::Document;
use crate::entity::StateEntity;
use crate::error::{SkippedField, StateError};

/// Capture every persisted field. The identity field is not included.
pub fn serialize<E: StateEntity>(entity: &E) -> Document {
    let mut document = Document::new();
    entity.visit_fields(&mut |name, field| {
        document.insert(name, field.capture());
    });
    document
}

/// Restore every field present in `document`.
///
/// Absent fields keep their current value. A stored null clears an
/// optional field. A field whose stored value does not convert, null
/// included, is left alone, logged and reported; the rest of the entity
/// still loads.
pub fn deserialize<E: StateEntity>(entity: &mut E, document: &Document) -> Vec<SkippedField> {
    let mut skipped = Vec::new();
    entity.visit_fields_mut(&mut |name, field| {
        let Some(value) = document.get(name) else {
            return;
        };
        if let Err(error) = field.restore(value) {
            tracing::warn!(
                namespace = E::SCHEMA.namespace,
                field = name,
                expected = error.expected,
                found = %error.found,
                "skipping incompatible stored value"
            );
            skipped.push(SkippedField { field: name, error });
        }
    });
    skipped
}

/// The entity's identity as a storage key.
pub fn identity_of<E: StateEntity>(entity: &E) -> String {
    entity.identity()
}

/// Parse `key` into the entity's identity field.
pub fn assign_identity<E: StateEntity>(entity: &mut E, key: &str) -> Result<(), StateError> {
    entity
        .assign_identity(key)
        .map_err(|error| StateError::InvalidKey {
            key: key.to_owned(),
            reason: format!("identity field `{}`: {error}", E::IDENTITY),
        })
}

/// Sum of every field's version.
///
/// Each counter only moves forward, so the sum changes whenever any field
/// is written and repeats only after a full `u64` wrap.
pub fn aggregate_version<E: StateEntity>(entity: &E) -> u64 {
    let mut total: u64 = 0;
    entity.visit_fields(&mut |_, field| {
        total = total.wrapping_add(field.version());
    });
    total
}

/// Release observers on every field.
pub(crate) fn teardown<E: StateEntity>(entity: &E) {
    entity.visit_fields(&mut |_, field| field.teardown());
}
