//! Read JFR Metadata event.
//! Metadata event contains the type definitions to parse further constant pools and recorded events.
//!
//! Related JMC code: [ChunkMetadata.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder/src/main/java/org/openjdk/jmc/flightrecorder/internal/parser/v1/ChunkMetadata.java)

use crate::reader::byte_stream::ByteStream;
use crate::reader::type_descriptor::{
    AnnotationMetadata, ClassMap, ClassMetadata, FieldMetadata, SettingMetadata, StringTable,
};
use crate::reader::{Error, Result};
use crate::EVENT_TYPE_METADATA;
use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug)]
enum ElementType {
    Root(RootElement),
    Metadata(MetadataElement),
    Region(Region),
    Class(ClassElement),
    Field(FieldElement),
    Annotation(AnnotationMetadata),
    Setting(SettingElement),
}

impl ElementType {
    fn name(&self) -> &'static str {
        match self {
            ElementType::Root(_) => "root",
            ElementType::Metadata(_) => "metadata",
            ElementType::Region(_) => "region",
            ElementType::Class(_) => "class",
            ElementType::Field(_) => "field",
            ElementType::Annotation(_) => "annotation",
            ElementType::Setting(_) => "setting",
        }
    }

    /// Creates the element for a child named `name`, rejecting names the
    /// current element does not accept. Skipping an unknown subtree is not
    /// possible without knowing its layout, so this fails fast.
    fn child(&self, name: &str) -> Result<Self> {
        let child = match (self, name) {
            (ElementType::Root(_), "metadata") => ElementType::Metadata(MetadataElement::default()),
            (ElementType::Root(_), "region") => ElementType::Region(Region::default()),
            (ElementType::Metadata(_), "class") => ElementType::Class(ClassElement::default()),
            (ElementType::Class(_), "field") => ElementType::Field(FieldElement::default()),
            (ElementType::Class(_), "setting") => ElementType::Setting(SettingElement::default()),
            (ElementType::Class(_), "annotation")
            | (ElementType::Field(_), "annotation")
            | (ElementType::Setting(_), "annotation") => {
                ElementType::Annotation(AnnotationMetadata::default())
            }
            _ => {
                return Err(Error::UnexpectedElement {
                    parent: self.name(),
                    name: name.to_string(),
                })
            }
        };
        Ok(child)
    }

    fn append_child(&mut self, child: Self) {
        match (self, child) {
            (ElementType::Root(e), ElementType::Metadata(m)) => e.metadata = Some(m),
            (ElementType::Root(e), ElementType::Region(r)) => e.region = Some(r),
            (ElementType::Metadata(e), ElementType::Class(c)) => e.classes.push(c),
            (ElementType::Class(e), ElementType::Field(f)) => e.fields.push(f),
            (ElementType::Class(e), ElementType::Annotation(a)) => e.annotations.push(a),
            (ElementType::Class(e), ElementType::Setting(s)) => e.settings.push(s),
            (ElementType::Field(e), ElementType::Annotation(a)) => e.annotations.push(a),
            (ElementType::Setting(e), ElementType::Annotation(a)) => e.annotations.push(a),
            // `child` only ever produces the combinations above
            _ => {}
        }
    }

    fn set_attribute(&mut self, key: &Arc<str>, value: &Arc<str>) -> Result<()> {
        match self {
            ElementType::Class(c) => match key.as_ref() {
                "id" => c.class_id = parse_attribute(key, value)?,
                "name" => c.name = Some(value.clone()),
                "superType" => c.super_type = Some(value.clone()),
                "simpleType" => c.simple_type = parse_attribute(key, value)?,
                _ => {}
            },
            ElementType::Field(f) => match key.as_ref() {
                "name" => f.name = Some(value.clone()),
                "class" => f.class_id = parse_attribute(key, value)?,
                "constantPool" => f.constant_pool = parse_attribute(key, value)?,
                "dimension" => f.dimension = parse_attribute(key, value)?,
                _ => {}
            },
            ElementType::Annotation(a) => match key.as_ref() {
                "class" => a.class_id = parse_attribute(key, value)?,
                _ => {
                    a.values.insert(key.clone(), value.clone());
                }
            },
            ElementType::Setting(s) => match key.as_ref() {
                "name" => s.setting.name = Some(value.clone()),
                "class" => s.setting.class_id = parse_attribute(key, value)?,
                "defaultValue" => s.setting.default_value = Some(value.clone()),
                _ => {}
            },
            ElementType::Region(r) => match key.as_ref() {
                "locale" => r.locale = Some(value.clone()),
                "gmtOffset" => r.gmt_offset = Some(value.clone()),
                "ticksToMillis" => r.ticks_to_millis = Some(value.clone()),
                _ => {}
            },
            ElementType::Root(_) | ElementType::Metadata(_) => {}
        }
        Ok(())
    }
}

/// `bool` only accepts exactly `true` / `false`, integers must be decimal.
fn parse_attribute<T: FromStr>(key: &Arc<str>, value: &Arc<str>) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidAttribute {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default)]
struct RootElement {
    metadata: Option<MetadataElement>,
    region: Option<Region>,
}

#[derive(Debug, Default)]
struct MetadataElement {
    classes: Vec<ClassElement>,
}

#[derive(Debug, Default)]
struct ClassElement {
    annotations: Vec<AnnotationMetadata>,
    fields: Vec<FieldElement>,
    settings: Vec<SettingElement>,
    class_id: i64,
    name: Option<Arc<str>>,
    super_type: Option<Arc<str>>,
    simple_type: bool,
}

#[derive(Debug, Default)]
struct FieldElement {
    annotations: Vec<AnnotationMetadata>,
    name: Option<Arc<str>>,
    class_id: i64,
    constant_pool: bool,
    dimension: i32,
}

#[derive(Debug, Default)]
struct SettingElement {
    setting: SettingMetadata,
    annotations: Vec<AnnotationMetadata>,
}

/// Locale and clock information of the recording JVM.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub locale: Option<Arc<str>>,
    pub gmt_offset: Option<Arc<str>>,
    pub ticks_to_millis: Option<Arc<str>>,
}

#[derive(Debug)]
pub struct Metadata {
    pub start_time: i64,
    pub duration: i64,
    pub id: i64,
    pub class_map: ClassMap,
    pub region: Region,
}

impl Metadata {
    /// Reads the metadata event at the current stream position.
    /// The leading size field must already be consumed.
    pub fn try_new<T: Read>(stream: &mut ByteStream<T>) -> Result<Self> {
        let event_type = stream.read_i64()?;
        if event_type != EVENT_TYPE_METADATA {
            return Err(Error::UnexpectedRecordType {
                expected: EVENT_TYPE_METADATA,
                actual: event_type,
            });
        }
        let start_time = stream.read_i64()?;
        let duration = stream.read_i64()?;
        let id = stream.read_i64()?;

        let string_table = StringTable::try_new(stream)?;
        let root = Self::read_root(stream, &string_table)?;
        let region = root.region.clone().unwrap_or_default();
        let class_map = Self::declare_types(root)?;

        log::debug!(
            "read metadata id={} with {} strings and {} classes",
            id,
            string_table.len(),
            class_map.len()
        );

        Ok(Self {
            start_time,
            duration,
            id,
            class_map,
            region,
        })
    }

    fn read_root<T: Read>(
        stream: &mut ByteStream<T>,
        string_table: &StringTable,
    ) -> Result<RootElement> {
        let name = string_table.get(stream.read_i32()?)?;
        if name.as_ref() != "root" {
            return Err(Error::InvalidRootElement(name.to_string()));
        }

        match Self::read_element(stream, string_table, ElementType::Root(RootElement::default()))? {
            ElementType::Root(root) => Ok(root),
            _ => unreachable!("read_element returns the element it was given"),
        }
    }

    fn read_element<T: Read>(
        stream: &mut ByteStream<T>,
        string_table: &StringTable,
        mut current_element: ElementType,
    ) -> Result<ElementType> {
        let attribute_count = stream.read_i32()?;
        for _ in 0..attribute_count {
            let key = string_table.get(stream.read_i32()?)?;
            let value = string_table.get(stream.read_i32()?)?;
            current_element.set_attribute(key, value)?;
        }

        let children_count = stream.read_i32()?;
        for _ in 0..children_count {
            let name = string_table.get(stream.read_i32()?)?;
            let element = current_element.child(name.as_ref())?;
            let element = Self::read_element(stream, string_table, element)?;
            current_element.append_child(element);
        }

        Ok(current_element)
    }

    fn declare_types(root_element: RootElement) -> Result<ClassMap> {
        let mut class_map = ClassMap::default();
        let classes = match root_element.metadata {
            Some(m) => m.classes,
            None => return Ok(class_map),
        };

        // annotations refer to their annotation class by id
        let class_names: HashMap<i64, Arc<str>> = classes
            .iter()
            .filter_map(|c| c.name.clone().map(|n| (c.class_id, n)))
            .collect();
        let name_annotations = |annotations: Vec<AnnotationMetadata>| -> Vec<AnnotationMetadata> {
            annotations
                .into_iter()
                .map(|mut a| {
                    a.class_name = class_names.get(&a.class_id).cloned();
                    a
                })
                .collect()
        };

        for class_element in classes {
            let name = class_element.name.ok_or(Error::MissingAttribute {
                element: "class",
                key: "name",
            })?;

            let mut fields = Vec::with_capacity(class_element.fields.len());
            for field in class_element.fields {
                fields.push(FieldMetadata {
                    class_id: field.class_id,
                    name: field.name.ok_or(Error::MissingAttribute {
                        element: "field",
                        key: "name",
                    })?,
                    constant_pool: field.constant_pool,
                    dimension: field.dimension,
                    annotations: name_annotations(field.annotations),
                });
            }

            let settings = class_element
                .settings
                .into_iter()
                .map(|s| SettingMetadata {
                    annotations: name_annotations(s.annotations),
                    ..s.setting
                })
                .collect();

            class_map.register(ClassMetadata {
                class_id: class_element.class_id,
                name,
                super_type: class_element.super_type,
                simple_type: class_element.simple_type,
                fields,
                settings,
                annotations: name_annotations(class_element.annotations),
            });
        }

        Ok(class_map)
    }
}
