//! Per-field capture and restore.
//!
//! Every field listed for an entity implements [`StateField`]. Observable
//! fields contribute their version to the entity's aggregate version and
//! release their observers when the entity leaves the cache; plain fields
//! do neither.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use chrono::{DateTime, Utc};
use keepsake_reactive::{Reactive, ReactiveList, ReactiveMap};
use serde_json::Value;
use uuid::Uuid;

use crate::codec::{FieldCodec, KeyCodec, decode_entries, encode_entries};
use crate::error::CoercionError;

/// One persisted field of an entity.
pub trait StateField {
    /// The field's current content in stored form.
    fn capture(&self) -> Value;

    /// Replace the content from a stored value.
    ///
    /// Observable values are restored silently so bound listeners do not
    /// fire mid-load. Collections are replaced wholesale.
    ///
    /// # Errors
    ///
    /// [`CoercionError`] when the stored value does not fit; the field is
    /// left unchanged.
    fn restore(&mut self, value: &Value) -> Result<(), CoercionError>;

    /// Mutation counter. Plain fields report 0.
    fn version(&self) -> u64 {
        0
    }

    /// Release observers; called when the owning entity is unloaded,
    /// deleted or shut down.
    fn teardown(&self) {}
}

impl<T> StateField for Reactive<T>
where
    T: FieldCodec + Clone + PartialEq + Send + Sync + 'static,
{
    fn capture(&self) -> Value {
        self.with(FieldCodec::encode)
    }

    fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
        self.set_silent(T::decode(value)?);
        Ok(())
    }

    fn version(&self) -> u64 {
        Self::version(self)
    }

    fn teardown(&self) {
        self.destroy();
    }
}

impl<T> StateField for ReactiveList<T>
where
    T: FieldCodec + Clone + Send + Sync + 'static,
{
    fn capture(&self) -> Value {
        Value::Array(self.snapshot().iter().map(FieldCodec::encode).collect())
    }

    fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
        self.replace_all(Vec::<T>::decode(value)?);
        Ok(())
    }

    fn version(&self) -> u64 {
        Self::version(self)
    }

    fn teardown(&self) {
        self.clear_listeners();
    }
}

impl<K, V> StateField for ReactiveMap<K, V>
where
    K: KeyCodec + Ord + Clone + Send + Sync + 'static,
    V: FieldCodec + Clone + Send + Sync + 'static,
{
    fn capture(&self) -> Value {
        encode_entries(self.snapshot().iter())
    }

    fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
        self.replace_all(decode_entries::<K, V>(value)?);
        Ok(())
    }

    fn version(&self) -> u64 {
        Self::version(self)
    }

    fn teardown(&self) {
        self.clear_listeners();
    }
}

macro_rules! plain_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StateField for $ty {
                fn capture(&self) -> Value {
                    self.encode()
                }

                fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
                    *self = <$ty as FieldCodec>::decode(value)?;
                    Ok(())
                }
            }
        )*
    };
}

plain_field!(
    i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, String, Uuid
);
plain_field!(DateTime<Utc>);

impl<T: FieldCodec> StateField for Option<T> {
    fn capture(&self) -> Value {
        self.encode()
    }

    fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
        *self = Self::decode(value)?;
        Ok(())
    }
}

impl<T: FieldCodec> StateField for Vec<T> {
    fn capture(&self) -> Value {
        self.encode()
    }

    fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
        *self = Self::decode(value)?;
        Ok(())
    }
}

impl<K: KeyCodec + Ord, V: FieldCodec> StateField for BTreeMap<K, V> {
    fn capture(&self) -> Value {
        self.encode()
    }

    fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
        *self = Self::decode(value)?;
        Ok(())
    }
}

impl<K, V, S> StateField for HashMap<K, V, S>
where
    K: KeyCodec + Eq + Hash,
    V: FieldCodec,
    S: BuildHasher + Default,
{
    fn capture(&self) -> Value {
        self.encode()
    }

    fn restore(&mut self, value: &Value) -> Result<(), CoercionError> {
        *self = Self::decode(value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[test]
    fn reactive_restore_is_silent_but_versioned() {
        let mut coins = Reactive::new(0_i64);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        coins.on_change(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(coins.restore(&json!(500)).is_ok());

        assert_eq!(coins.get(), 500);
        assert_eq!(StateField::version(&coins), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_restore_leaves_field_alone() {
        let mut coins = Reactive::new(7_u32);
        assert!(coins.restore(&json!("lots")).is_err());
        assert_eq!(coins.get(), 7);
        assert_eq!(coins.version(), 0);
    }

    #[test]
    fn collections_capture_and_replace_wholesale() {
        let mut tags = ReactiveList::of(["old".to_owned()]);
        assert!(tags.restore(&json!(["a", "b"])).is_ok());
        assert_eq!(tags.capture(), json!(["a", "b"]));

        let mut stats = ReactiveMap::<String, u32>::empty();
        assert!(stats.restore(&json!({"hp": 10, "mp": "4"})).is_ok());
        assert_eq!(stats.get(&"mp".to_owned()), Some(4));
        assert_eq!(stats.capture(), json!({"hp": 10, "mp": 4}));
    }

    #[test]
    fn plain_fields_report_version_zero() {
        let mut name = String::from("ada");
        assert!(name.restore(&json!("grace")).is_ok());
        assert_eq!(name, "grace");
        assert_eq!(StateField::version(&name), 0);
    }
}
