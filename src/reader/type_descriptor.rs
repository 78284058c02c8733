//! Descriptor of types declared in the JFR chunk.
//! ClassMetadata defines the "schema" of types.
//! Event and ConstantPool values are parsed based on declared ClassMetadata.
//!
//! Labels, units and other presentation properties are not stored on the
//! descriptors; they are derived on demand from the attached annotations.

use crate::reader::byte_stream::{ByteStream, StringType, MAX_PREALLOCATION};
use crate::reader::{Error, Result};
use crate::EVENT_SUPER_TYPE;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

#[derive(Debug)]
pub struct StringTable(Vec<Option<Arc<str>>>);

impl StringTable {
    pub fn try_new<T: Read>(stream: &mut ByteStream<T>) -> Result<StringTable> {
        let string_count = stream.read_i32()?;
        let string_count =
            usize::try_from(string_count).map_err(|_| Error::InvalidLength(string_count as i64))?;
        let mut strings = Vec::with_capacity(string_count.min(MAX_PREALLOCATION));

        for _ in 0..string_count {
            match stream.read_string()? {
                StringType::Null => strings.push(None),
                StringType::Empty => strings.push(Some(Arc::from(""))),
                StringType::Raw(s) => strings.push(Some(Arc::from(s))),
                StringType::ConstantPool(_) => return Err(Error::InvalidString),
            }
        }

        Ok(StringTable(strings))
    }

    pub fn get(&self, idx: i32) -> Result<&Arc<str>> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.0.get(i))
            .and_then(|s| s.as_ref())
            .ok_or(Error::InvalidStringIndex(idx))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Class id keyed lookup over the classes declared by one chunk.
#[derive(Debug, Default)]
pub struct ClassMap {
    inner: FxHashMap<i64, Arc<ClassMetadata>>,
}

impl ClassMap {
    pub fn register(&mut self, class: ClassMetadata) {
        self.inner.insert(class.class_id, Arc::new(class));
    }

    pub fn get(&self, class_id: i64) -> Option<&Arc<ClassMetadata>> {
        self.inner.get(&class_id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<ClassMetadata>> {
        self.inner.values().find(|c| c.name() == name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ClassMetadata>> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ClassMetadata {
    pub class_id: i64,
    pub name: Arc<str>,
    pub super_type: Option<Arc<str>>,
    pub simple_type: bool,
    pub fields: Vec<FieldMetadata>,
    pub settings: Vec<SettingMetadata>,
    pub annotations: Vec<AnnotationMetadata>,
}

impl ClassMetadata {
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub fn super_type(&self) -> Option<&str> {
        self.super_type.as_deref()
    }

    /// Whether this class describes recorded events rather than pool-only data.
    pub fn is_event(&self) -> bool {
        self.super_type() == Some(EVENT_SUPER_TYPE)
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn label(&self) -> Option<&str> {
        annotation_value(&self.annotations, "jdk.jfr.Label")
    }

    pub fn description(&self) -> Option<&str> {
        annotation_value(&self.annotations, "jdk.jfr.Description")
    }

    pub fn experimental(&self) -> bool {
        find_annotation(&self.annotations, "jdk.jfr.Experimental").is_some()
    }

    /// Category path, outermost first.
    pub fn category(&self) -> Vec<&str> {
        let mut category = vec![];
        if let Some(annot) = find_annotation(&self.annotations, "jdk.jfr.Category") {
            let mut idx = 0;
            while let Some(v) = annot.values.get(format!("value-{}", idx).as_str()) {
                category.push(v.as_ref());
                idx += 1;
            }
        }
        category
    }
}

#[derive(Debug, Clone)]
pub struct FieldMetadata {
    pub class_id: i64,
    pub name: Arc<str>,
    pub constant_pool: bool,
    pub dimension: i32,
    pub annotations: Vec<AnnotationMetadata>,
}

impl FieldMetadata {
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub fn is_array(&self) -> bool {
        self.dimension > 0
    }

    pub fn label(&self) -> Option<&str> {
        annotation_value(&self.annotations, "jdk.jfr.Label")
    }

    pub fn description(&self) -> Option<&str> {
        annotation_value(&self.annotations, "jdk.jfr.Description")
    }

    pub fn experimental(&self) -> bool {
        find_annotation(&self.annotations, "jdk.jfr.Experimental").is_some()
    }

    pub fn unsigned(&self) -> bool {
        find_annotation(&self.annotations, "jdk.jfr.Unsigned").is_some()
    }

    pub fn unit(&self) -> Option<Unit> {
        self.annotations.iter().find_map(|annot| {
            let value = annot.value();
            match annot.name()? {
                "jdk.jfr.MemoryAmount" | "jdk.jfr.DataAmount" => Some(Unit::Byte),
                "jdk.jfr.Percentage" => Some(Unit::PercentUnity),
                "jdk.jfr.MemoryAddress" => Some(Unit::AddressUnity),
                "jdk.jfr.Frequency" => Some(Unit::Hz),
                "jdk.jfr.Timespan" => match value? {
                    "NANOSECONDS" => Some(Unit::Nanosecond),
                    "MICROSECONDS" => Some(Unit::Microsecond),
                    "MILLISECONDS" => Some(Unit::Millisecond),
                    "SECONDS" => Some(Unit::Second),
                    _ => None,
                },
                "jdk.jfr.Timestamp" => match value? {
                    "NANOSECONDS_SINCE_EPOCH" => Some(Unit::EpochNano),
                    "MILLISECONDS_SINCE_EPOCH" => Some(Unit::EpochMilli),
                    "SECONDS_SINCE_EPOCH" => Some(Unit::EpochSecond),
                    _ => None,
                },
                _ => None,
            }
        })
    }

    pub fn tick_unit(&self) -> Option<TickUnit> {
        self.annotations.iter().find_map(|annot| {
            if annot.value() != Some("TICKS") {
                return None;
            }
            match annot.name()? {
                "jdk.jfr.Timespan" => Some(TickUnit::Timespan),
                "jdk.jfr.Timestamp" => Some(TickUnit::Timestamp),
                _ => None,
            }
        })
    }

    pub fn is_tick_timestamp(&self) -> bool {
        self.tick_unit() == Some(TickUnit::Timestamp)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationMetadata {
    pub class_id: i64,
    /// Name of the annotation class, filled once every class of the chunk is known.
    pub class_name: Option<Arc<str>>,
    pub values: HashMap<Arc<str>, Arc<str>>,
}

impl AnnotationMetadata {
    pub fn name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.values.get("value").map(|v| v.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingMetadata {
    pub name: Option<Arc<str>>,
    pub class_id: i64,
    pub default_value: Option<Arc<str>>,
    pub annotations: Vec<AnnotationMetadata>,
}

fn find_annotation<'a>(
    annotations: &'a [AnnotationMetadata],
    name: &str,
) -> Option<&'a AnnotationMetadata> {
    annotations.iter().find(|a| a.name() == Some(name))
}

fn annotation_value<'a>(annotations: &'a [AnnotationMetadata], name: &str) -> Option<&'a str> {
    find_annotation(annotations, name).and_then(|a| a.value())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Unit {
    Byte,
    PercentUnity,
    AddressUnity,
    Hz,
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    EpochNano,
    EpochMilli,
    EpochSecond,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Byte => "B",
            Unit::PercentUnity => "",
            Unit::AddressUnity => "",
            Unit::Hz => "hz",
            Unit::Nanosecond => "ns",
            Unit::Microsecond => "μs",
            Unit::Millisecond => "ms",
            Unit::Second => "s",
            Unit::EpochNano => "epoch_ns",
            Unit::EpochMilli => "epoch_ms",
            Unit::EpochSecond => "epoch_s",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TickUnit {
    Timespan,
    Timestamp,
}
