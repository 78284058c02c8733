//! Decoded events of a chunk and typed access to their attributes.

use crate::reader::chunk::ChunkClock;
use crate::reader::byte_stream::ByteStream;
use crate::reader::constant_pool::ConstantPools;
use crate::reader::de;
use crate::reader::registry::EventRegistry;
use crate::reader::type_descriptor::{ClassMap, ClassMetadata, TickUnit, Unit};
use crate::reader::value_descriptor::{Object, Value};
use crate::reader::{Error, Result};
use crate::{EVENT_TYPE_CONSTANT_POOL, EVENT_TYPE_METADATA};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Everything an event needs while it is decoded: the chunk's classes, its
/// resolved constant pools, its clock and the typed decoders.
pub(crate) struct EventContext<'a> {
    pub classes: &'a ClassMap,
    pub pools: &'a mut ConstantPools,
    pub clock: ChunkClock,
    pub registry: &'a EventRegistry,
}

/// Reads one event record after its size field.
///
/// Returns `None` for metadata and checkpoint records and for records of
/// classes that are not event kinds.
pub(crate) fn read_event<T: Read>(
    stream: &mut ByteStream<T>,
    ctx: &mut EventContext,
) -> Result<Option<GenericEvent>> {
    let event_type = stream.read_i64()?;
    if event_type == EVENT_TYPE_METADATA || event_type == EVENT_TYPE_CONSTANT_POOL {
        return Ok(None);
    }

    let class = ctx
        .classes
        .get(event_type)
        .ok_or(Error::ClassNotFound(event_type))?;
    if !class.is_event() {
        return Ok(None);
    }

    let mut attributes = FxHashMap::default();
    for field in class.fields.iter() {
        let value = Value::try_read_field(stream, field, ctx.classes)?;
        let value = ctx.pools.resolve_value(value, ctx.classes)?;
        attributes.insert(field.name.clone(), value);
    }

    let mut event = GenericEvent {
        class: class.clone(),
        attributes,
        clock: ctx.clock,
        typed: None,
    };
    event.typed = ctx.registry.decode(&event)?;
    Ok(Some(event))
}

/// One decoded event record with its attributes resolved.
#[derive(Clone)]
pub struct GenericEvent {
    pub class: Arc<ClassMetadata>,
    pub attributes: FxHashMap<Arc<str>, Value>,
    clock: ChunkClock,
    typed: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for GenericEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericEvent")
            .field("class", &self.class.name())
            .field("attributes", &self.attributes)
            .field("typed", &self.typed.is_some())
            .finish()
    }
}

impl GenericEvent {
    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Reads the attribute `name` converted to `T`.
    ///
    /// Conversions never truncate: widening is allowed, out-of-range values fail
    /// with [`Error::NumericOverflow`].
    pub fn get_attr<'a, T: FromValue<'a>>(&'a self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| Error::AttributeNotFound(name.to_string()))?;
        T::from_value(value)
    }

    /// Reads the numeric attribute `name` together with the unit its field
    /// declares. Tick-based timestamps are converted to nanoseconds since the
    /// epoch, tick-based durations to nanoseconds.
    pub fn quantity(&self, name: &str) -> Result<Quantity> {
        let field = self
            .class
            .field(name)
            .ok_or_else(|| Error::AttributeNotFound(name.to_string()))?;
        let value = self
            .get(name)
            .ok_or_else(|| Error::AttributeNotFound(name.to_string()))?;

        let number = match *value {
            Value::Byte(v) if field.unsigned() => Numeric::Int(v as u8 as i64),
            Value::Short(v) if field.unsigned() => Numeric::Int(v as u16 as i64),
            Value::Int(v) if field.unsigned() => Numeric::Int(v as u32 as i64),
            Value::Byte(v) => Numeric::Int(v as i64),
            Value::Short(v) => Numeric::Int(v as i64),
            Value::Int(v) => Numeric::Int(v as i64),
            Value::Long(v) => Numeric::Int(v),
            Value::Float(v) => Numeric::Float(v as f64),
            Value::Double(v) => Numeric::Float(v),
            _ => {
                return Err(Error::TypeMismatch {
                    expected: "number",
                    actual: value.type_name(),
                })
            }
        };

        let ticks = || number.as_i64().ok_or(Error::NumericOverflow("i64"));
        let quantity = match field.tick_unit() {
            Some(TickUnit::Timestamp) => Quantity {
                value: Numeric::Int(self.clock.ticks_to_nanos(ticks()?)),
                unit: Unit::EpochNano,
            },
            Some(TickUnit::Timespan) => Quantity {
                value: Numeric::Int(self.clock.ticks_to_duration_nanos(ticks()?)),
                unit: Unit::Nanosecond,
            },
            None => Quantity {
                value: number,
                unit: field.unit().ok_or_else(|| Error::NoUnit(name.to_string()))?,
            },
        };
        Ok(quantity)
    }

    /// Start of the event in nanoseconds since the epoch.
    pub fn start_time_nanos(&self) -> Option<i64> {
        match self.quantity("startTime") {
            Ok(q) => q.epoch_nanos(),
            Err(_) => self.get("startTime").and_then(|v| v.as_i64()),
        }
    }

    /// Deserializes the whole event into `T`, following field names.
    pub fn deserialize<'de, T: Deserialize<'de>>(&'de self) -> Result<T> {
        de::from_event(self)
    }

    /// Payload produced by the decoder registered for this event's class.
    pub fn typed<T: Any>(&self) -> Option<&T> {
        self.typed.as_ref().and_then(|t| t.downcast_ref())
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    /// The value as an integer. `None` for a float with a fractional part or
    /// outside the `i64` range.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Numeric::Int(v) => Some(v),
            // i64::MAX as f64 rounds up to 2^63, which is itself out of range
            Numeric::Float(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
                Some(v as i64)
            }
            Numeric::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Numeric::Int(v) => v as f64,
            Numeric::Float(v) => v,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quantity {
    pub value: Numeric,
    pub unit: Unit,
}

impl Quantity {
    /// The quantity as nanoseconds since the epoch, when it is a timestamp.
    pub fn epoch_nanos(&self) -> Option<i64> {
        let factor = match self.unit {
            Unit::EpochNano => 1,
            Unit::EpochMilli => 1_000_000,
            Unit::EpochSecond => 1_000_000_000,
            _ => return None,
        };
        self.value.as_i64()?.checked_mul(factor)
    }
}

/// Conversion of a resolved [`Value`] into a Rust type.
pub trait FromValue<'a>: Sized {
    fn from_value(value: &'a Value) -> Result<Self>;
}

fn mismatch<T>(expected: &'static str, value: &Value) -> Result<T> {
    Err(Error::TypeMismatch {
        expected,
        actual: value.type_name(),
    })
}

macro_rules! impl_from_value_int {
    ($($ty:ty),*) => {
        $(
            impl<'a> FromValue<'a> for $ty {
                fn from_value(value: &'a Value) -> Result<Self> {
                    match value.as_i64() {
                        Some(v) => <$ty>::try_from(v)
                            .map_err(|_| Error::NumericOverflow(stringify!($ty))),
                        None => mismatch("integer", value),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl<'a> FromValue<'a> for f32 {
    fn from_value(value: &'a Value) -> Result<Self> {
        match *value {
            Value::Float(v) => Ok(v),
            Value::Double(v) if v.is_finite() && (v.abs() > f32::MAX as f64) => {
                Err(Error::NumericOverflow("f32"))
            }
            Value::Double(v) => Ok(v as f32),
            _ => mismatch("float", value),
        }
    }
}

impl<'a> FromValue<'a> for f64 {
    fn from_value(value: &'a Value) -> Result<Self> {
        match *value {
            Value::Float(v) => Ok(v as f64),
            Value::Double(v) => Ok(v),
            _ => mismatch("float", value),
        }
    }
}

impl<'a> FromValue<'a> for bool {
    fn from_value(value: &'a Value) -> Result<Self> {
        match *value {
            Value::Boolean(v) => Ok(v),
            _ => mismatch("boolean", value),
        }
    }
}

impl<'a> FromValue<'a> for char {
    fn from_value(value: &'a Value) -> Result<Self> {
        match *value {
            Value::Char(v) => Ok(v),
            _ => mismatch("char", value),
        }
    }
}

/// A null string reads as the empty string.
impl<'a> FromValue<'a> for &'a str {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.as_ref()),
            Value::Null => Ok(""),
            _ => mismatch("string", value),
        }
    }
}

impl<'a> FromValue<'a> for String {
    fn from_value(value: &'a Value) -> Result<Self> {
        <&str>::from_value(value).map(str::to_string)
    }
}

impl<'a> FromValue<'a> for &'a Value {
    fn from_value(value: &'a Value) -> Result<Self> {
        Ok(value)
    }
}

impl<'a> FromValue<'a> for &'a Object {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(o) => Ok(o.as_ref()),
            _ => mismatch("object", value),
        }
    }
}

impl<'a> FromValue<'a> for &'a [Value] {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Array(a) => Ok(a.as_slice()),
            _ => mismatch("array", value),
        }
    }
}

/// `None` for absent values and references left unresolved by a cycle.
impl<'a, T: FromValue<'a>> FromValue<'a> for Option<T> {
    fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Null | Value::Reference(_) => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }
}

/// Events of one class within a chunk.
#[derive(Debug, Clone)]
pub struct EventCollection {
    pub class: Arc<ClassMetadata>,
    pub events: Vec<GenericEvent>,
}

impl EventCollection {
    pub fn new(class: Arc<ClassMetadata>) -> Self {
        Self {
            class,
            events: vec![],
        }
    }

    pub fn add(&mut self, event: GenericEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Events of a chunk grouped by class name.
#[derive(Debug, Clone, Default)]
pub struct ChunkEvents {
    inner: BTreeMap<Arc<str>, Arc<EventCollection>>,
}

impl ChunkEvents {
    pub(crate) fn from_collections(collections: BTreeMap<Arc<str>, EventCollection>) -> Self {
        Self {
            inner: collections
                .into_iter()
                .map(|(name, c)| (name, Arc::new(c)))
                .collect(),
        }
    }

    pub fn get(&self, class_name: &str) -> Option<&EventCollection> {
        self.inner.get(class_name).map(|c| c.as_ref())
    }

    pub fn collections(&self) -> impl Iterator<Item = &EventCollection> {
        self.inner.values().map(|c| c.as_ref())
    }

    pub fn events(&self) -> impl Iterator<Item = &GenericEvent> {
        self.collections().flat_map(|c| c.events.iter())
    }

    /// Number of event classes with at least one event.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.collections().map(|c| c.len()).sum()
    }

    /// Keeps the events accepted by `filter`, preserving the grouping by class.
    pub fn apply<F: EventFilter + ?Sized>(&self, filter: &F) -> ChunkEvents {
        let mut inner = BTreeMap::new();
        for (name, collection) in self.inner.iter() {
            match filter.predicate(&collection.class) {
                Predicate::AlwaysFalse => {}
                Predicate::AlwaysTrue => {
                    inner.insert(name.clone(), collection.clone());
                }
                Predicate::Test(test) => {
                    let mut filtered = EventCollection::new(collection.class.clone());
                    filtered
                        .events
                        .extend(collection.events.iter().filter(|e| test(e)).cloned());
                    inner.insert(name.clone(), Arc::new(filtered));
                }
            }
        }
        ChunkEvents { inner }
    }
}

/// Per-class decision of an [`EventFilter`].
pub enum Predicate<'f> {
    AlwaysTrue,
    AlwaysFalse,
    Test(Box<dyn Fn(&GenericEvent) -> bool + 'f>),
}

/// Selects events. The predicate is computed once per event class.
pub trait EventFilter {
    fn predicate(&self, class: &ClassMetadata) -> Predicate<'_>;
}

impl<F: Fn(&GenericEvent) -> bool> EventFilter for F {
    fn predicate(&self, _class: &ClassMetadata) -> Predicate<'_> {
        Predicate::Test(Box::new(move |e| self(e)))
    }
}

/// Accepts every event of the listed classes.
#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    names: Vec<String>,
}

impl ClassFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventFilter for ClassFilter {
    fn predicate(&self, class: &ClassMetadata) -> Predicate<'_> {
        if self.names.iter().any(|n| n == class.name()) {
            Predicate::AlwaysTrue
        } else {
            Predicate::AlwaysFalse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::test_util::{class_map, AnnotationDef, ClassDef, FieldDef};
    use assert_matches::assert_matches;

    fn clock() -> ChunkClock {
        ChunkClock {
            start_time_nanos: 1_000_000_000_000,
            start_ticks: 500,
            ticks_per_second: 1_000,
        }
    }

    fn allocation_event(size: Value, start: i64) -> GenericEvent {
        let classes = class_map(vec![
            ClassDef::new(1, "long"),
            ClassDef::new(2, "jdk.jfr.Timestamp"),
            ClassDef::new(3, "jdk.jfr.DataAmount"),
            ClassDef::new(4, "jdk.jfr.Unsigned"),
            ClassDef::new(5, "jdk.jfr.Timespan"),
            ClassDef::new(10, "jdk.ObjectAllocationSample")
                .super_type("jdk.jfr.Event")
                .field(
                    FieldDef::new("startTime", 1)
                        .annotation(AnnotationDef::new(2).value("value", "TICKS")),
                )
                .field(
                    FieldDef::new("weight", 1)
                        .annotation(AnnotationDef::new(3).value("value", "BYTES"))
                        .annotation(AnnotationDef::new(4)),
                )
                .field(
                    FieldDef::new("duration", 1)
                        .annotation(AnnotationDef::new(5).value("value", "TICKS")),
                )
                .field(FieldDef::new("name", 1)),
        ]);
        let class = classes.get(10).unwrap().clone();
        let attributes = [
            ("startTime", Value::Long(start)),
            ("weight", size),
            ("duration", Value::Long(2_000)),
            ("name", Value::Null),
        ]
        .into_iter()
        .map(|(k, v)| (Arc::from(k), v))
        .collect();
        GenericEvent {
            class,
            attributes,
            clock: clock(),
            typed: None,
        }
    }

    #[test]
    fn test_get_attr_conversions() {
        let event = allocation_event(Value::Int(300), 1_500);
        assert_eq!(300i64, event.get_attr::<i64>("weight").unwrap());
        assert_eq!(300u16, event.get_attr::<u16>("weight").unwrap());
        assert_matches!(event.get_attr::<i8>("weight"), Err(Error::NumericOverflow("i8")));
        assert_matches!(
            event.get_attr::<bool>("weight"),
            Err(Error::TypeMismatch { expected: "boolean", actual: "int" })
        );
        assert_eq!("", event.get_attr::<&str>("name").unwrap());
        assert_eq!(None, event.get_attr::<Option<i64>>("name").unwrap());
        assert_matches!(event.get_attr::<i64>("missing"), Err(Error::AttributeNotFound(_)));

        let event = allocation_event(Value::Int(-1), 1_500);
        assert_matches!(event.get_attr::<u32>("weight"), Err(Error::NumericOverflow("u32")));
    }

    #[test]
    fn test_quantity() {
        let event = allocation_event(Value::Int(-1), 1_500);
        assert_eq!(
            Quantity {
                value: Numeric::Int(u32::MAX as i64),
                unit: Unit::Byte
            },
            event.quantity("weight").unwrap()
        );
        // 1000 ticks after start at 1000 ticks per second
        assert_eq!(Some(1_001_000_000_000), event.start_time_nanos());
        assert_eq!(
            Quantity {
                value: Numeric::Int(2_000_000_000),
                unit: Unit::Nanosecond
            },
            event.quantity("duration").unwrap()
        );
        assert_matches!(event.quantity("name"), Err(Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_float_to_integer_never_truncates() {
        assert_eq!(Some(3), Numeric::Float(3.0).as_i64());
        assert_eq!(Some(-42), Numeric::Float(-42.0).as_i64());
        assert_eq!(None, Numeric::Float(1.5).as_i64());
        assert_eq!(None, Numeric::Float(f64::NAN).as_i64());
        assert_eq!(None, Numeric::Float(f64::INFINITY).as_i64());
        assert_eq!(None, Numeric::Float(9.3e18).as_i64());

        let seconds = Quantity {
            value: Numeric::Float(1.25),
            unit: Unit::EpochSecond,
        };
        assert_eq!(None, seconds.epoch_nanos());
        let millis = Quantity {
            value: Numeric::Float(2_000.0),
            unit: Unit::EpochMilli,
        };
        assert_eq!(Some(2_000_000_000), millis.epoch_nanos());

        let event = allocation_event(Value::Int(1), 1_500);
        let mut attributes = event.attributes.clone();
        attributes.insert(Arc::from("duration"), Value::Double(2.5));
        let event = GenericEvent { attributes, ..event };
        assert_matches!(event.quantity("duration"), Err(Error::NumericOverflow("i64")));
    }

    #[test]
    fn test_apply_filters() {
        let mut samples = EventCollection::new(allocation_event(Value::Int(1), 0).class.clone());
        samples.add(allocation_event(Value::Int(1), 0));
        samples.add(allocation_event(Value::Int(2048), 0));
        let events = ChunkEvents::from_collections(BTreeMap::from([(
            Arc::from("jdk.ObjectAllocationSample"),
            samples,
        )]));

        let large = |e: &GenericEvent| e.get_attr::<i64>("weight").map_or(false, |w| w > 1024);
        let filtered = events.apply(&large);
        assert_eq!(1, filtered.event_count());
        assert_eq!(1, filtered.len());

        let filtered = events.apply(&ClassFilter::new(["jdk.ExecutionSample"]));
        assert!(filtered.is_empty());

        let filtered = events.apply(&ClassFilter::new(["jdk.ObjectAllocationSample"]));
        assert_eq!(2, filtered.event_count());
    }
}
