//! Low-level representation of the decoded JFR values.
//!
//! Values are read from the chunk following the declared class schema. Until
//! the constant pools are resolved, pool-backed fields are kept as
//! [`Value::Reference`] placeholders.

use crate::reader::byte_stream::{ByteStream, StringType, MAX_PREALLOCATION};
use crate::reader::type_descriptor::{ClassMap, ClassMetadata, FieldMetadata};
use crate::reader::{Error, Result};
use std::io::Read;
use std::sync::Arc;

/// Inline (non pool) fields may only nest this deep. Class declarations can
/// refer to themselves, so a cyclic schema would otherwise never terminate.
const MAX_NESTING_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value: a null string or a pool reference with no entry behind it.
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Arc<str>),
    Array(Vec<Value>),
    Object(Arc<Object>),
    Reference(Reference),
}

/// Pointer into the constant pool of `class_id`.
///
/// A `required` reference fails resolution when the entry is missing. Others
/// resolve to [`Value::Null`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Reference {
    pub class_id: i64,
    pub index: i64,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub class_id: i64,
    pub fields: Vec<(Arc<str>, Value)>,
}

impl Object {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v)
    }
}

impl Value {
    pub fn try_new<T: Read>(
        stream: &mut ByteStream<T>,
        class_id: i64,
        classes: &ClassMap,
    ) -> Result<Value> {
        Self::read_value(stream, class_id, classes, 0)
    }

    /// Reads one declared field, including the element count of array fields.
    pub(crate) fn try_read_field<T: Read>(
        stream: &mut ByteStream<T>,
        field: &FieldMetadata,
        classes: &ClassMap,
    ) -> Result<Value> {
        Self::read_field(stream, field, classes, 0)
    }

    fn read_value<T: Read>(
        stream: &mut ByteStream<T>,
        class_id: i64,
        classes: &ClassMap,
        depth: usize,
    ) -> Result<Value> {
        let class = classes.get(class_id).ok_or(Error::ClassNotFound(class_id))?;

        if let Some(value) = Self::try_read_primitive(stream, class)? {
            return Ok(value);
        }
        if depth >= MAX_NESTING_DEPTH {
            return Err(Error::NestingTooDeep {
                class_id,
                limit: MAX_NESTING_DEPTH,
            });
        }

        let mut obj = Object {
            class_id: class.class_id,
            fields: Vec::with_capacity(class.fields.len()),
        };
        for field in class.fields.iter() {
            let value = Self::read_field(stream, field, classes, depth + 1)?;
            obj.fields.push((field.name.clone(), value));
        }

        Ok(Value::Object(Arc::new(obj)))
    }

    fn read_field<T: Read>(
        stream: &mut ByteStream<T>,
        field: &FieldMetadata,
        classes: &ClassMap,
        depth: usize,
    ) -> Result<Value> {
        if field.is_array() {
            let count = stream.read_i32()?;
            let count = usize::try_from(count).map_err(|_| Error::InvalidLength(count as i64))?;
            let mut elems = Vec::with_capacity(count.min(MAX_PREALLOCATION));
            for _ in 0..count {
                elems.push(Self::read_field_single(stream, field, classes, depth)?);
            }
            Ok(Value::Array(elems))
        } else {
            Self::read_field_single(stream, field, classes, depth)
        }
    }

    fn read_field_single<T: Read>(
        stream: &mut ByteStream<T>,
        field: &FieldMetadata,
        classes: &ClassMap,
        depth: usize,
    ) -> Result<Value> {
        if field.constant_pool {
            Ok(Value::Reference(Reference {
                class_id: field.class_id,
                index: stream.read_i64()?,
                required: false,
            }))
        } else {
            Self::read_value(stream, field.class_id, classes, depth)
        }
    }

    fn try_read_primitive<T: Read>(
        stream: &mut ByteStream<T>,
        class: &ClassMetadata,
    ) -> Result<Option<Value>> {
        let value = match class.name() {
            "int" => Value::Int(stream.read_i32()?),
            "long" => Value::Long(stream.read_i64()?),
            "float" => Value::Float(stream.read_f32()?),
            "double" => Value::Double(stream.read_f64()?),
            "char" => Value::Char(stream.read_char()?),
            "boolean" => Value::Boolean(stream.read_bool()?),
            "short" => Value::Short(stream.read_i16()?),
            "byte" => Value::Byte(stream.read_i8()?),
            "java.lang.String" => match stream.read_string()? {
                StringType::Null => Value::Null,
                StringType::Empty => Value::String(Arc::from("")),
                StringType::Raw(s) => Value::String(Arc::from(s)),
                StringType::ConstantPool(index) => Value::Reference(Reference {
                    class_id: class.class_id,
                    index,
                    required: true,
                }),
            },
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Char(_) => "char",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Reference(_) => "reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(obj) => obj.get(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Integral value widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}
