//! Decoder for Java Flight Recorder recordings.
//!
//! A recording is a sequence of self-contained chunks. Each chunk carries its own
//! type schema (the metadata event), constant pools (checkpoint events) and event
//! records. [`reader::JfrReader`] decodes chunks one at a time into
//! [`reader::Chunk`] values holding resolved [`reader::event::GenericEvent`]s.

pub mod decompress;
pub mod reader;

pub use reader::{decode, decode_with_options, DecodeError};

const MAGIC: [u8; 4] = [b'F', b'L', b'R', b'\0'];
const VERSION_1: Version = Version { major: 1, minor: 0 };
const VERSION_2: Version = Version { major: 2, minor: 0 };

const EVENT_TYPE_METADATA: i64 = 0;
const EVENT_TYPE_CONSTANT_POOL: i64 = 1;

/// Super type name marking a class as a user-visible event kind.
pub const EVENT_SUPER_TYPE: &str = "jdk.jfr.Event";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Version {
    pub major: i16,
    pub minor: i16,
}

impl Version {
    /// Whether this version is one the decoder was written against.
    /// Other versions are still decoded.
    pub fn is_known(&self) -> bool {
        *self == VERSION_1 || *self == VERSION_2
    }
}
