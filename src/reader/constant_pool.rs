//! Constant pools of a chunk.
//!
//! Pools are read from the chain of checkpoint events first, holding values
//! whose pool-backed fields are still [`Reference`]s. A second pass resolves
//! every reference into the value it points to, following references across
//! pools on demand.

use crate::reader::byte_stream::ByteStream;
use crate::reader::type_descriptor::ClassMap;
use crate::reader::value_descriptor::{Object, Reference, Value};
use crate::reader::{Error, Result};
use crate::EVENT_TYPE_CONSTANT_POOL;
use rustc_hash::{FxHashMap, FxHashSet};
use std::io::{Read, Seek};
use std::sync::Arc;

#[derive(Debug)]
enum Entry {
    Pending(Value),
    Resolving,
    Resolved(Value),
}

#[derive(Debug, Default)]
pub struct ConstantPool {
    inner: FxHashMap<i64, Entry>,
    resolved: bool,
}

impl ConstantPool {
    pub fn get(&self, constant_index: i64) -> Option<&Value> {
        match self.inner.get(&constant_index)? {
            Entry::Pending(v) | Entry::Resolved(v) => Some(v),
            Entry::Resolving => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &Value)> {
        self.inner.iter().filter_map(|(&idx, e)| match e {
            Entry::Pending(v) | Entry::Resolved(v) => Some((idx, v)),
            Entry::Resolving => None,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

/// Constant pools of one chunk, keyed by class id.
#[derive(Debug, Default)]
pub struct ConstantPools {
    inner: FxHashMap<i64, ConstantPool>,
}

impl ConstantPools {
    /// Reads every checkpoint of the chain starting at `constant_pool_offset`.
    /// The extent of each checkpoint event is recorded in `extents` (offset to size).
    pub fn read_checkpoints<T: Read + Seek>(
        stream: &mut ByteStream<T>,
        constant_pool_offset: u64,
        body_size: u64,
        classes: &ClassMap,
        extents: &mut FxHashMap<u64, u64>,
    ) -> Result<Self> {
        let mut pools = Self::default();
        let mut visited = FxHashSet::default();
        let mut offset = constant_pool_offset as i64;

        loop {
            if offset < 0 || offset as u64 >= body_size || !visited.insert(offset) {
                return Err(Error::InvalidCheckpointOffset(offset));
            }
            stream.seek(offset as u64)?;
            let size = stream.read_i32()?;
            if size <= 0 {
                return Err(Error::ZeroSizedRecord(offset as u64));
            }
            extents.insert(offset as u64, size as u64);

            let delta = pools.read_checkpoint(stream, classes)?;
            log::trace!("read checkpoint at {} (size={}, delta={})", offset, size, delta);
            if delta == 0 {
                break;
            }
            offset += delta;
        }

        Ok(pools)
    }

    /// Reads one checkpoint event after its size field and returns the delta
    /// to the next checkpoint.
    fn read_checkpoint<T: Read>(
        &mut self,
        stream: &mut ByteStream<T>,
        classes: &ClassMap,
    ) -> Result<i64> {
        let event_type = stream.read_i64()?;
        if event_type != EVENT_TYPE_CONSTANT_POOL {
            return Err(Error::UnexpectedRecordType {
                expected: EVENT_TYPE_CONSTANT_POOL,
                actual: event_type,
            });
        }

        // start
        stream.read_i64()?;
        // duration
        stream.read_i64()?;

        let delta = stream.read_i64()?;
        // checkpoint type (flush, chunk header, statics, thread)
        stream.read_i8()?;
        let pool_count = stream.read_i32()?;

        for _ in 0..pool_count {
            let class_id = stream.read_i64()?;
            let constant_count = stream.read_i32()?;

            for _ in 0..constant_count {
                let constant_index = stream.read_i64()?;
                let value = Value::try_new(stream, class_id, classes)?;
                self.register(class_id, constant_index, value);
            }
        }

        Ok(delta)
    }

    pub fn register(&mut self, class_id: i64, constant_index: i64, value: Value) {
        let pool = self.inner.entry(class_id).or_default();
        pool.inner.insert(constant_index, Entry::Pending(value));
        pool.resolved = false;
    }

    pub fn get(&self, class_id: i64, constant_index: i64) -> Option<&Value> {
        self.inner.get(&class_id).and_then(|p| p.get(constant_index))
    }

    pub fn pool(&self, class_id: i64) -> Option<&ConstantPool> {
        self.inner.get(&class_id)
    }

    pub fn pools(&self) -> impl Iterator<Item = (i64, &ConstantPool)> {
        self.inner.iter().map(|(&id, p)| (id, p))
    }

    /// Resolves every pool that is not already resolved. Pools of event
    /// classes are not referenced by other values and are left as read.
    pub fn resolve_all(&mut self, classes: &ClassMap) -> Result<()> {
        let mut class_ids: Vec<i64> = self.inner.keys().copied().collect();
        class_ids.sort_unstable();

        for class_id in class_ids {
            if self.inner[&class_id].resolved {
                continue;
            }
            if classes.get(class_id).map_or(false, |c| c.is_event()) {
                continue;
            }

            let mut indices: Vec<i64> = self.inner[&class_id].inner.keys().copied().collect();
            indices.sort_unstable();
            for index in indices {
                self.resolve_entry(class_id, index, classes)?;
            }

            if let Some(pool) = self.inner.get_mut(&class_id) {
                pool.resolved = true;
            }
            log::trace!(
                "resolved constant pool {} ({})",
                class_id,
                classes.get(class_id).map_or("<unknown>", |c| c.name())
            );
        }
        Ok(())
    }

    /// Replaces every reference inside `value` by the value it points to.
    pub fn resolve_value(&mut self, value: Value, classes: &ClassMap) -> Result<Value> {
        match value {
            Value::Reference(r) => self.resolve_reference(r, classes),
            Value::Array(elems) => elems
                .into_iter()
                .map(|v| self.resolve_value(v, classes))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(obj) => {
                if !obj.fields.iter().any(|(_, v)| v.needs_resolution()) {
                    return Ok(Value::Object(obj));
                }
                let Object { class_id, fields } = Arc::unwrap_or_clone(obj);
                let fields = fields
                    .into_iter()
                    .map(|(name, v)| Ok((name, self.resolve_value(v, classes)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Object(Arc::new(Object { class_id, fields })))
            }
            v => Ok(v),
        }
    }

    fn resolve_reference(&mut self, r: Reference, classes: &ClassMap) -> Result<Value> {
        let value = match self.resolve_entry(r.class_id, r.index, classes)? {
            Some(value) => value,
            None if r.required => {
                return Err(Error::ConstantNotFound {
                    class_id: r.class_id,
                    index: r.index,
                })
            }
            None => Value::Null,
        };

        if r.required && !matches!(value, Value::String(_) | Value::Null | Value::Reference(_)) {
            return Err(Error::TypeMismatch {
                expected: "string",
                actual: value.type_name(),
            });
        }
        Ok(value)
    }

    /// Resolves the entry in place and returns a copy of the result, or `None`
    /// when the pool or the index does not exist.
    fn resolve_entry(
        &mut self,
        class_id: i64,
        index: i64,
        classes: &ClassMap,
    ) -> Result<Option<Value>> {
        let entry = match self.inner.get_mut(&class_id).and_then(|p| p.inner.get_mut(&index)) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let pending = match std::mem::replace(entry, Entry::Resolving) {
            Entry::Pending(v) => v,
            Entry::Resolved(v) => {
                *entry = Entry::Resolved(v.clone());
                return Ok(Some(v));
            }
            Entry::Resolving => {
                // the entry is part of a reference cycle; keep the reference
                log::warn!(
                    "cyclic constant pool reference to class {} index {} left unresolved",
                    class_id,
                    index
                );
                return Ok(Some(Value::Reference(Reference {
                    class_id,
                    index,
                    required: false,
                })));
            }
        };

        let resolved = self.resolve_value(pending, classes)?;
        if let Some(entry) = self.inner.get_mut(&class_id).and_then(|p| p.inner.get_mut(&index)) {
            *entry = Entry::Resolved(resolved.clone());
        }
        Ok(Some(resolved))
    }
}

impl Value {
    fn needs_resolution(&self) -> bool {
        match self {
            Value::Reference(_) => true,
            Value::Array(elems) => elems.iter().any(|v| v.needs_resolution()),
            Value::Object(obj) => obj.fields.iter().any(|(_, v)| v.needs_resolution()),
            _ => false,
        }
    }
}
