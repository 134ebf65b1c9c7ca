//! The entity contract.
//!
//! An entity is a `Default` struct with one identity field and any number
//! of persisted fields. Implement [`StateEntity`] with [`state_entity!`]
//! rather than by hand:
//!
//! ```
//! use std::time::Duration;
//!
//! use keepsake_reactive::{Reactive, ReactiveList};
//! use keepsake_state::{Backend, StateSchema, state_entity};
//!
//! #[derive(Default)]
//! struct Profile {
//!     id: String,
//!     coins: Reactive<i64>,
//!     titles: ReactiveList<String>,
//!     motto: String,
//! }
//!
//! state_entity!(
//!     Profile,
//!     schema: StateSchema::new("profiles")
//!         .autosave(Duration::from_secs(60))
//!         .backend(Backend::Json),
//!     identity: id,
//!     fields: [coins, titles, motto],
//! );
//! ```

use std::time::Duration;

use crate::error::CoercionError;
use crate::field::StateField;
use crate::storage::{Backend, validate_key};

/// Autosave interval used when a schema does not set one.
pub const DEFAULT_AUTOSAVE: Duration = Duration::from_secs(300);

/// Per-type persistence settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSchema {
    /// Directory name under the storage root; one per entity type.
    pub namespace: &'static str,
    /// Autosave interval. Zero disables autosave for the type.
    pub autosave: Duration,
    /// Document encoding.
    pub backend: Backend,
}

impl StateSchema {
    /// A YAML schema autosaving every [`DEFAULT_AUTOSAVE`].
    pub const fn new(namespace: &'static str) -> Self {
        Self {
            namespace,
            autosave: DEFAULT_AUTOSAVE,
            backend: Backend::Yaml,
        }
    }

    /// Replace the autosave interval.
    #[must_use]
    pub const fn autosave(mut self, interval: Duration) -> Self {
        self.autosave = interval;
        self
    }

    /// Replace the document encoding.
    #[must_use]
    pub const fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Check that the namespace can name a storage directory.
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.trim().is_empty() {
            return Err("namespace is empty".to_owned());
        }
        validate_key(self.namespace)
            .map_err(|err| format!("namespace is not a plain directory name: {err}"))
    }
}

/// A type the store can cache and persist.
///
/// Generated by [`state_entity!`](crate::state_entity). The identity field
/// is never part of the stored document; it is the document's key.
pub trait StateEntity: Default + Send + Sync + 'static {
    /// Persistence settings.
    const SCHEMA: StateSchema;

    /// Name of the identity field.
    const IDENTITY: &'static str;

    /// The identity rendered as a storage key.
    fn identity(&self) -> String;

    /// Parse `key` into the identity field.
    fn assign_identity(&mut self, key: &str) -> Result<(), CoercionError>;

    /// Call `visit` once per persisted field, in declaration order.
    fn visit_fields(&self, visit: &mut dyn FnMut(&'static str, &dyn StateField));

    /// Mutable counterpart of [`visit_fields`](Self::visit_fields).
    fn visit_fields_mut(&mut self, visit: &mut dyn FnMut(&'static str, &mut dyn StateField));
}

/// Implement [`StateEntity`] for a struct.
///
/// The identity field's type must implement [`KeyCodec`](crate::KeyCodec);
/// every listed field's type must implement [`StateField`].
#[macro_export]
macro_rules! state_entity {
    (
        $ty:ty,
        schema: $schema:expr,
        identity: $id:ident,
        fields: [$($field:ident),+ $(,)?] $(,)?
    ) => {
        impl $crate::StateEntity for $ty {
            const SCHEMA: $crate::StateSchema = $schema;
            const IDENTITY: &'static str = stringify!($id);

            fn identity(&self) -> ::std::string::String {
                $crate::KeyCodec::to_key(&self.$id)
            }

            fn assign_identity(
                &mut self,
                key: &str,
            ) -> ::core::result::Result<(), $crate::CoercionError> {
                self.$id = $crate::KeyCodec::from_key(key)?;
                Ok(())
            }

            fn visit_fields(
                &self,
                visit: &mut dyn FnMut(&'static str, &dyn $crate::StateField),
            ) {
                $(visit(stringify!($field), &self.$field);)+
            }

            fn visit_fields_mut(
                &mut self,
                visit: &mut dyn FnMut(&'static str, &mut dyn $crate::StateField),
            ) {
                $(visit(stringify!($field), &mut self.$field);)+
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use keepsake_reactive::Reactive;
    use uuid::Uuid;

    use super::*;

    #[derive(Default)]
    struct Wallet {
        owner: Uuid,
        balance: Reactive<u64>,
        label: String,
    }

    crate::state_entity!(
        Wallet,
        schema: StateSchema::new("wallets").autosave(Duration::ZERO),
        identity: owner,
        fields: [balance, label],
    );

    #[test]
    fn schema_defaults() {
        let schema = StateSchema::new("profiles");
        assert_eq!(schema.autosave, DEFAULT_AUTOSAVE);
        assert_eq!(schema.backend, Backend::Yaml);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn path_like_namespaces_are_rejected() {
        for namespace in ["", "  ", "a/b", "..", "a\\b"] {
            assert!(StateSchema::new(namespace).validate().is_err(), "{namespace:?}");
        }
    }

    #[test]
    fn generated_impl_visits_fields_in_order() {
        let wallet = Wallet::default();
        let mut names = Vec::new();
        wallet.visit_fields(&mut |name, _| names.push(name));

        assert_eq!(names, ["balance", "label"]);
        assert_eq!(Wallet::IDENTITY, "owner");
        assert_eq!(Wallet::SCHEMA.autosave, Duration::ZERO);
    }

    #[test]
    fn identity_parses_from_key() {
        let mut wallet = Wallet::default();
        let id = Uuid::now_v7();

        assert!(wallet.assign_identity(&id.to_string()).is_ok());
        assert_eq!(wallet.identity(), id.to_string());
        assert!(wallet.assign_identity("not-a-uuid").is_err());
    }
}
