//! Writers for synthetic chunks used by the unit tests.

use crate::reader::byte_stream::{
    ByteStream, IntEncoding, STRING_ENCODING_CONSTANT_POOL, STRING_ENCODING_EMPTY_STRING,
    STRING_ENCODING_NULL, STRING_ENCODING_UTF8_BYTE_ARRAY,
};
use crate::reader::metadata::Metadata;
use crate::reader::type_descriptor::ClassMap;
use crate::{EVENT_TYPE_CONSTANT_POOL, EVENT_TYPE_METADATA, MAGIC};
use std::collections::HashMap;
use std::io::Cursor;

pub const HEADER_SIZE: usize = 68;

pub struct Writer {
    buf: Vec<u8>,
    encoding: IntEncoding,
}

impl Writer {
    pub fn new(encoding: IntEncoding) -> Self {
        Self {
            buf: vec![],
            encoding,
        }
    }

    fn varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8 & 0x7f) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    pub fn i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn i16(&mut self, v: i16) {
        match self.encoding {
            IntEncoding::Raw => self.buf.extend_from_slice(&v.to_be_bytes()),
            IntEncoding::Compressed => self.varint(v as u16 as u64),
        }
    }

    pub fn i32(&mut self, v: i32) {
        match self.encoding {
            IntEncoding::Raw => self.buf.extend_from_slice(&v.to_be_bytes()),
            IntEncoding::Compressed => self.varint(v as u32 as u64),
        }
    }

    pub fn i64(&mut self, v: i64) {
        match self.encoding {
            IntEncoding::Raw => self.buf.extend_from_slice(&v.to_be_bytes()),
            IntEncoding::Compressed => {
                let mut v = v as u64;
                for _ in 0..8 {
                    if v < 0x80 {
                        self.buf.push(v as u8);
                        return;
                    }
                    self.buf.push((v as u8 & 0x7f) | 0x80);
                    v >>= 7;
                }
                self.buf.push(v as u8);
            }
        }
    }

    pub fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn string_utf8(&mut self, s: &str) {
        self.i8(STRING_ENCODING_UTF8_BYTE_ARRAY);
        self.i32(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn string_null(&mut self) {
        self.i8(STRING_ENCODING_NULL);
    }

    pub fn string_empty(&mut self) {
        self.i8(STRING_ENCODING_EMPTY_STRING);
    }

    pub fn string_pool(&mut self, index: i64) {
        self.i8(STRING_ENCODING_CONSTANT_POOL);
        self.i64(index);
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Prefixes the content with its size, the size field included.
    pub fn into_record(self) -> Vec<u8> {
        let size = self.buf.len() + 4;
        self.into_record_with_size(size as u32)
    }

    /// Like [`Writer::into_record`], but declares `size` whatever the content.
    pub fn into_record_with_size(self, size: u32) -> Vec<u8> {
        let mut record = match self.encoding {
            // padded to four bytes like the JVM does for sizes
            IntEncoding::Compressed => vec![
                (size & 0x7f) as u8 | 0x80,
                ((size >> 7) & 0x7f) as u8 | 0x80,
                ((size >> 14) & 0x7f) as u8 | 0x80,
                ((size >> 21) & 0x7f) as u8,
            ],
            IntEncoding::Raw => size.to_be_bytes().to_vec(),
        };
        record.extend(self.buf);
        record
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attrs: vec![],
            children: vec![],
        }
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Root with the metadata element first and the region second.
    pub fn root(classes: &[ClassDef]) -> Self {
        let mut metadata = Element::new("metadata");
        metadata.children = classes.iter().map(ClassDef::to_element).collect();
        Element::new("root")
            .child(metadata)
            .child(Element::new("region").attr("locale", "en_US"))
    }
}

#[derive(Debug, Clone)]
pub struct AnnotationDef {
    class_id: i64,
    values: Vec<(String, String)>,
}

impl AnnotationDef {
    pub fn new(class_id: i64) -> Self {
        Self {
            class_id,
            values: vec![],
        }
    }

    pub fn value(mut self, key: &str, value: &str) -> Self {
        self.values.push((key.to_string(), value.to_string()));
        self
    }

    fn to_element(&self) -> Element {
        let mut e = Element::new("annotation").attr("class", &self.class_id.to_string());
        for (k, v) in self.values.iter() {
            e = e.attr(k, v);
        }
        e
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    name: String,
    class_id: i64,
    constant_pool: bool,
    dimension: i32,
    annotations: Vec<AnnotationDef>,
    attrs: Vec<(String, String)>,
}

impl FieldDef {
    pub fn new(name: &str, class_id: i64) -> Self {
        Self {
            name: name.to_string(),
            class_id,
            constant_pool: false,
            dimension: 0,
            annotations: vec![],
            attrs: vec![],
        }
    }

    pub fn constant_pool(mut self) -> Self {
        self.constant_pool = true;
        self
    }

    pub fn dimension(mut self, dimension: i32) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn annotation(mut self, annotation: AnnotationDef) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.push((key.to_string(), value.to_string()));
        self
    }

    fn to_element(&self) -> Element {
        let mut e = Element::new("field")
            .attr("name", &self.name)
            .attr("class", &self.class_id.to_string());
        if self.constant_pool {
            e = e.attr("constantPool", "true");
        }
        if self.dimension > 0 {
            e = e.attr("dimension", &self.dimension.to_string());
        }
        for (k, v) in self.attrs.iter() {
            e = e.attr(k, v);
        }
        e.children = self.annotations.iter().map(AnnotationDef::to_element).collect();
        e
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    class_id: i64,
    name: String,
    super_type: Option<String>,
    fields: Vec<FieldDef>,
    annotations: Vec<AnnotationDef>,
    attrs: Vec<(String, String)>,
}

impl ClassDef {
    pub fn new(class_id: i64, name: &str) -> Self {
        Self {
            class_id,
            name: name.to_string(),
            super_type: None,
            fields: vec![],
            annotations: vec![],
            attrs: vec![],
        }
    }

    pub fn super_type(mut self, super_type: &str) -> Self {
        self.super_type = Some(super_type.to_string());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn annotation(mut self, annotation: AnnotationDef) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.push((key.to_string(), value.to_string()));
        self
    }

    fn to_element(&self) -> Element {
        let mut e = Element::new("class")
            .attr("id", &self.class_id.to_string())
            .attr("name", &self.name);
        if let Some(super_type) = self.super_type.as_ref() {
            e = e.attr("superType", super_type);
        }
        for (k, v) in self.attrs.iter() {
            e = e.attr(k, v);
        }
        e.children = self
            .fields
            .iter()
            .map(FieldDef::to_element)
            .chain(self.annotations.iter().map(AnnotationDef::to_element))
            .collect();
        e
    }
}

struct Strings {
    indices: HashMap<String, i32>,
    strings: Vec<String>,
}

impl Strings {
    fn collect(root: &Element) -> Self {
        let mut strings = Strings {
            indices: HashMap::new(),
            strings: vec![],
        };
        strings.visit(root);
        strings
    }

    fn add(&mut self, s: &str) {
        if !self.indices.contains_key(s) {
            self.indices.insert(s.to_string(), self.strings.len() as i32);
            self.strings.push(s.to_string());
        }
    }

    fn visit(&mut self, e: &Element) {
        self.add(&e.name);
        for (k, v) in e.attrs.iter() {
            self.add(k);
            self.add(v);
        }
        e.children.iter().for_each(|c| self.visit(c));
    }

    fn index(&self, s: &str) -> i32 {
        self.indices[s]
    }
}

fn write_element(w: &mut Writer, strings: &Strings, e: &Element) {
    w.i32(strings.index(&e.name));
    w.i32(e.attrs.len() as i32);
    for (k, v) in e.attrs.iter() {
        w.i32(strings.index(k));
        w.i32(strings.index(v));
    }
    w.i32(e.children.len() as i32);
    for child in e.children.iter() {
        write_element(w, strings, child);
    }
}

/// Writes a metadata event without its size field.
pub fn write_metadata(w: &mut Writer, root: &Element) {
    let strings = Strings::collect(root);
    w.i64(EVENT_TYPE_METADATA);
    w.i64(0);
    w.i64(0);
    w.i64(1);
    w.i32(strings.strings.len() as i32);
    for s in strings.strings.iter() {
        w.string_utf8(s);
    }
    write_element(w, &strings, root);
}

pub fn class_map(classes: Vec<ClassDef>) -> ClassMap {
    let mut w = Writer::new(IntEncoding::Compressed);
    write_metadata(&mut w, &Element::root(&classes));
    let mut stream =
        ByteStream::with_int_encoding(Cursor::new(w.into_record()), IntEncoding::Compressed);
    stream.read_i32().unwrap();
    Metadata::try_new(&mut stream).unwrap().class_map
}

type ValueWriter = Box<dyn Fn(&mut Writer)>;

/// One checkpoint event holding constants of any number of pools.
#[derive(Default)]
pub struct CheckpointDef {
    pools: Vec<(i64, Vec<(i64, ValueWriter)>)>,
}

impl CheckpointDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(mut self, class_id: i64, index: i64, value: impl Fn(&mut Writer) + 'static) -> Self {
        let value: ValueWriter = Box::new(value);
        match self.pools.iter_mut().find(|(id, _)| *id == class_id) {
            Some((_, constants)) => constants.push((index, value)),
            None => self.pools.push((class_id, vec![(index, value)])),
        }
        self
    }
}

struct EventDef {
    class_id: i64,
    declared_size: Option<u32>,
    fields: ValueWriter,
}

/// Builds a complete chunk: header, metadata, the checkpoint chain, then events.
pub struct ChunkBuilder {
    encoding: IntEncoding,
    version: (i16, i16),
    start_time_nanos: i64,
    start_ticks: i64,
    ticks_per_second: i64,
    chunk_size_delta: i64,
    classes: Vec<ClassDef>,
    checkpoints: Vec<CheckpointDef>,
    events: Vec<EventDef>,
}

impl ChunkBuilder {
    pub fn new(encoding: IntEncoding) -> Self {
        Self {
            encoding,
            version: (2, 1),
            start_time_nanos: 1_700_000_000_000_000_000,
            start_ticks: 1_000,
            ticks_per_second: 1_000_000_000,
            chunk_size_delta: 0,
            classes: vec![],
            checkpoints: vec![],
            events: vec![],
        }
    }

    pub fn version(mut self, major: i16, minor: i16) -> Self {
        self.version = (major, minor);
        self
    }

    pub fn class(mut self, class: ClassDef) -> Self {
        self.classes.push(class);
        self
    }

    pub fn checkpoint(mut self, checkpoint: CheckpointDef) -> Self {
        self.checkpoints.push(checkpoint);
        self
    }

    pub fn event(mut self, class_id: i64, fields: impl Fn(&mut Writer) + 'static) -> Self {
        self.events.push(EventDef {
            class_id,
            declared_size: None,
            fields: Box::new(fields),
        });
        self
    }

    /// Adds an event record whose size field claims `size` bytes.
    pub fn event_with_size(
        mut self,
        class_id: i64,
        size: u32,
        fields: impl Fn(&mut Writer) + 'static,
    ) -> Self {
        self.events.push(EventDef {
            class_id,
            declared_size: Some(size),
            fields: Box::new(fields),
        });
        self
    }

    /// Declares a chunk size off by `delta` bytes from the real one.
    pub fn chunk_size_delta(mut self, delta: i64) -> Self {
        self.chunk_size_delta = delta;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut body = vec![];

        let metadata_offset = body.len();
        let mut w = Writer::new(self.encoding);
        write_metadata(&mut w, &Element::root(&self.classes));
        body.extend(w.into_record());

        let empty = CheckpointDef::default();
        let checkpoints: Vec<&CheckpointDef> = if self.checkpoints.is_empty() {
            vec![&empty]
        } else {
            self.checkpoints.iter().collect()
        };
        let mut previous: Option<usize> = None;
        for checkpoint in checkpoints {
            let offset = body.len();
            let mut w = Writer::new(self.encoding);
            w.i64(EVENT_TYPE_CONSTANT_POOL);
            w.i64(0);
            w.i64(0);
            w.i64(previous.map_or(0, |p| p as i64 - offset as i64));
            w.i8(0);
            w.i32(checkpoint.pools.len() as i32);
            for (class_id, constants) in checkpoint.pools.iter() {
                w.i64(*class_id);
                w.i32(constants.len() as i32);
                for (index, value) in constants.iter() {
                    w.i64(*index);
                    value(&mut w);
                }
            }
            body.extend(w.into_record());
            previous = Some(offset);
        }
        let constant_pool_offset = previous.unwrap_or_default();

        for event in self.events.iter() {
            let mut w = Writer::new(self.encoding);
            w.i64(event.class_id);
            (event.fields)(&mut w);
            match event.declared_size {
                Some(size) => body.extend(w.into_record_with_size(size)),
                None => body.extend(w.into_record()),
            }
        }

        let mut chunk = Vec::with_capacity(HEADER_SIZE + body.len());
        chunk.extend_from_slice(&MAGIC);
        chunk.extend_from_slice(&self.version.0.to_be_bytes());
        chunk.extend_from_slice(&self.version.1.to_be_bytes());
        let chunk_size = (HEADER_SIZE + body.len()) as i64 + self.chunk_size_delta;
        for v in [
            chunk_size,
            (HEADER_SIZE + constant_pool_offset) as i64,
            (HEADER_SIZE + metadata_offset) as i64,
            self.start_time_nanos,
            1_000_000_000,
            self.start_ticks,
            self.ticks_per_second,
        ] {
            chunk.extend_from_slice(&v.to_be_bytes());
        }
        let features: i32 = match self.encoding {
            IntEncoding::Compressed => 1,
            IntEncoding::Raw => 0,
        };
        chunk.extend_from_slice(&features.to_be_bytes());
        chunk.extend(body);
        chunk
    }
}
