//! Per-slice field values of one snapshot.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::ids::{FieldId, SliceId};

use super::field::{FieldCore, Value};

struct ManagerInner {
    slice_id: SliceId,
    values: HashMap<FieldId, Value>,
}

/// Immutable `FieldId -> value` map of one slice.
///
/// Updates return a new manager, or the same one when nothing changed, so
/// snapshots can detect changed slices by pointer comparison.
#[derive(Clone)]
pub(crate) struct SliceStateManager {
    inner: Rc<ManagerInner>,
}

impl SliceStateManager {
    pub(crate) fn new(slice_id: SliceId, values: HashMap<FieldId, Value>) -> Self {
        Self {
            inner: Rc::new(ManagerInner { slice_id, values }),
        }
    }

    pub(crate) fn get(&self, field: &FieldId) -> Result<Value> {
        self.inner
            .values
            .get(field)
            .cloned()
            .ok_or_else(|| Error::FieldNotFound {
                slice: self.inner.slice_id.clone(),
                field: field.clone(),
            })
    }

    /// Replace `field`'s value. Returns `self` when the field's equality
    /// reports no change.
    pub(crate) fn update_field(&self, field: &FieldCore, value: Value) -> Result<Self> {
        let current = self.get(&field.id)?;
        if field.is_equal(&current, &value) {
            return Ok(self.clone());
        }

        let mut values = self.inner.values.clone();
        values.insert(field.id.clone(), value);
        Ok(Self::new(self.inner.slice_id.clone(), values))
    }

    pub(crate) fn ptr_eq(&self, other: &SliceStateManager) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AnyField, Key, SliceSpec, StoreState};

    #[test]
    fn unchanged_update_returns_same_manager() {
        let key = Key::new("mgr", &[]);
        let count = key.field(1).unwrap().with_partial_eq();
        let slice = key.slice(SliceSpec::new().field("count", &count)).unwrap();
        let state = StoreState::create(&[slice.clone()]).unwrap();

        let manager = state.slice_state(slice.id()).unwrap();
        let erased = count.erased();
        let core = &erased.core;
        let same = manager.update_field(core, Rc::new(1)).unwrap();
        let changed = manager.update_field(core, Rc::new(2)).unwrap();

        assert!(same.ptr_eq(manager));
        assert!(!changed.ptr_eq(manager));
        assert_eq!(changed.len(), manager.len());
        assert_eq!(*manager.get(count.id()).unwrap().downcast::<i32>().unwrap(), 1);
    }

    #[test]
    fn missing_field_names_slice() {
        let manager = SliceStateManager::new(SliceId::from("sl_x"), HashMap::new());
        let err = manager.get(&FieldId::from("f_y")).unwrap_err();
        assert_eq!(err.to_string(), "field f_y not found in slice sl_x");
    }
}
