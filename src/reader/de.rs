//! serde bridge over decoded values, so events can be read into plain structs.

use crate::reader::event::GenericEvent;
use crate::reader::type_descriptor::FieldMetadata;
use crate::reader::value_descriptor::{Object, Value};
use crate::reader::{Error, Result};
use serde::de::value::StrDeserializer;
use serde::de::{DeserializeSeed, IntoDeserializer, Visitor};
use serde::{forward_to_deserialize_any, Deserialize};
use std::fmt::Display;

pub fn from_value<'de, T: Deserialize<'de>>(value: &'de Value) -> Result<T> {
    T::deserialize(Deserializer::new(value))
}

pub fn from_event<'de, T: Deserialize<'de>>(event: &'de GenericEvent) -> Result<T> {
    T::deserialize(EventDeserializer { event })
}

pub struct Deserializer<'de> {
    value: &'de Value,
}

impl<'de> Deserializer<'de> {
    pub fn new(value: &'de Value) -> Self {
        Self { value }
    }
}

impl serde::de::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        Error::Deserialize(msg.to_string())
    }
}

struct ObjectDeserializer<'de> {
    field_idx: usize,
    value: &'de Object,
}

impl<'de> serde::de::MapAccess<'de> for ObjectDeserializer<'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        match self.value.fields.get(self.field_idx) {
            Some((name, _)) => {
                let key: StrDeserializer<Self::Error> = name.as_ref().into_deserializer();
                seed.deserialize(key).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let (_, value) = self
            .value
            .fields
            .get(self.field_idx)
            .ok_or_else(|| Error::Deserialize("value requested past the last field".to_string()))?;
        let value = seed.deserialize(Deserializer::new(value))?;
        self.field_idx += 1;
        Ok(value)
    }
}

struct ArrayDeserializer<'de> {
    array_idx: usize,
    value: &'de [Value],
}

impl<'de> serde::de::SeqAccess<'de> for ArrayDeserializer<'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        let Some(value) = self.value.get(self.array_idx) else {
            return Ok(None);
        };
        let value = seed.deserialize(Deserializer::new(value))?;
        self.array_idx += 1;
        Ok(Some(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.value.len() - self.array_idx)
    }
}

impl<'de> serde::Deserializer<'de> for Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Null => visitor.visit_unit(),
            Value::Boolean(v) => visitor.visit_bool(*v),
            Value::Byte(v) => visitor.visit_i8(*v),
            Value::Short(v) => visitor.visit_i16(*v),
            Value::Char(v) => visitor.visit_char(*v),
            Value::Int(v) => visitor.visit_i32(*v),
            Value::Long(v) => visitor.visit_i64(*v),
            Value::Float(v) => visitor.visit_f32(*v),
            Value::Double(v) => visitor.visit_f64(*v),
            Value::String(v) => visitor.visit_borrowed_str(v.as_ref()),
            Value::Array(array) => visitor.visit_seq(ArrayDeserializer {
                array_idx: 0,
                value: array,
            }),
            Value::Object(obj) => visitor.visit_map(ObjectDeserializer {
                field_idx: 0,
                value: obj,
            }),
            Value::Reference(r) => Err(Error::UnresolvedReference {
                class_id: r.class_id,
                index: r.index,
            }),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Null | Value::Reference(_) => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    // skipped fields may hold references left by a pool cycle
    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier struct
    }
}

/// Presents an event as a map in declared field order.
struct EventDeserializer<'de> {
    event: &'de GenericEvent,
}

struct EventFieldsDeserializer<'de> {
    event: &'de GenericEvent,
    fields: std::slice::Iter<'de, FieldMetadata>,
    current: Option<&'de Value>,
}

impl<'de> serde::de::MapAccess<'de> for EventFieldsDeserializer<'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        for field in self.fields.by_ref() {
            if let Some(value) = self.event.get(field.name()) {
                self.current = Some(value);
                let key: StrDeserializer<Self::Error> = field.name().into_deserializer();
                return seed.deserialize(key).map(Some);
            }
        }
        Ok(None)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let value = self
            .current
            .take()
            .ok_or_else(|| Error::Deserialize("value requested before key".to_string()))?;
        seed.deserialize(Deserializer::new(value))
    }
}

impl<'de> serde::Deserializer<'de> for EventDeserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_map(EventFieldsDeserializer {
            event: self.event,
            fields: self.event.class.fields.iter(),
            current: None,
        })
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any struct
    }
}
