use crate::decompress::decompress;
use std::io::Read;

pub mod byte_stream;
pub mod chunk;
pub mod constant_pool;
pub mod de;
pub mod event;
pub mod metadata;
pub mod registry;
pub mod type_descriptor;
pub mod types;
pub mod value_descriptor;

#[cfg(test)]
pub(crate) mod test_util;

pub use chunk::{Chunk, ChunkClock, ChunkHeader, ChunkParseOptions};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a JFR chunk: magic {0:02x?}")]
    InvalidMagic([u8; 4]),
    #[error("chunk size {0} is smaller than the chunk header")]
    InvalidChunkSize(i64),
    #[error("{section} offset {offset} lies outside the chunk")]
    InvalidChunkOffset { section: &'static str, offset: i64 },
    #[error("chunk records end at {actual}, chunk body is {expected} bytes")]
    ChunkSizeMismatch { expected: u64, actual: u64 },
    #[error("record at {offset} declares {size} bytes but {consumed} were read")]
    RecordOverrun { offset: u64, size: u64, consumed: u64 },
    #[error("record at {0} has no size")]
    ZeroSizedRecord(u64),
    #[error("expected record type {expected}, found {actual}")]
    UnexpectedRecordType { expected: i64, actual: i64 },
    #[error("invalid checkpoint offset {0}")]
    InvalidCheckpointOffset(i64),
    #[error("varint does not fit in {bits} bits")]
    VarIntOverflow { bits: u32 },
    #[error("invalid string")]
    InvalidString,
    #[error("unknown string encoding {0}")]
    InvalidStringEncoding(i8),
    #[error("string table has no entry {0}")]
    InvalidStringIndex(i32),
    #[error("invalid length {0}")]
    InvalidLength(i64),
    #[error("root element is {0:?}")]
    InvalidRootElement(String),
    #[error("unexpected element {name:?} in {parent}")]
    UnexpectedElement { parent: &'static str, name: String },
    #[error("invalid value {value:?} for attribute {key}")]
    InvalidAttribute { key: String, value: String },
    #[error("{element} element has no {key} attribute")]
    MissingAttribute {
        element: &'static str,
        key: &'static str,
    },
    #[error("class {0} is not declared")]
    ClassNotFound(i64),
    #[error("values of class {class_id} nest deeper than {limit} levels")]
    NestingTooDeep { class_id: i64, limit: usize },
    #[error("constant pool of class {class_id} has no entry {index}")]
    ConstantNotFound { class_id: i64, index: i64 },
    #[error("reference to class {class_id} entry {index} is not resolved")]
    UnresolvedReference { class_id: i64, index: i64 },
    #[error("expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("value does not fit in {0}")]
    NumericOverflow(&'static str),
    #[error("event has no attribute {0:?}")]
    AttributeNotFound(String),
    #[error("attribute {0:?} has no unit")]
    NoUnit(String),
    #[error("deserialize error: {0}")]
    Deserialize(String),
    #[error("failed to decode chunk {phase} at offset {offset}")]
    Chunk {
        phase: &'static str,
        offset: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// The innermost error, below any chunk context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Chunk { source, .. } => source.root_cause(),
            e => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reads the chunks of a recording one after another.
pub struct JfrReader<R> {
    inner: R,
    options: ChunkParseOptions,
}

impl<R> JfrReader<R>
where
    R: Read,
{
    pub fn new(inner: R) -> Self {
        Self::with_options(inner, ChunkParseOptions::default())
    }

    pub fn with_options(inner: R, options: ChunkParseOptions) -> Self {
        Self { inner, options }
    }

    /// Decodes the next chunk. Returns `None` when the input ends where a
    /// chunk would start.
    pub fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        chunk::read_chunk(&mut self.inner, &mut self.options)
    }

    /// Iterates over the remaining chunks. Stops after the first error.
    pub fn chunks(&mut self) -> Chunks<'_, R> {
        Chunks {
            reader: self,
            done: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

pub struct Chunks<'a, R> {
    reader: &'a mut JfrReader<R>,
    done: bool,
}

impl<'a, R: Read> Iterator for Chunks<'a, R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Failure of [`decode`]. The chunks decoded before the failing one are kept.
#[derive(Debug, thiserror::Error)]
#[error("decoding stopped after {} chunks", chunks.len())]
pub struct DecodeError {
    pub chunks: Vec<Chunk>,
    #[source]
    pub error: Error,
}

/// Decodes every chunk of a possibly compressed recording.
pub fn decode<R: Read>(reader: R) -> std::result::Result<Vec<Chunk>, DecodeError> {
    decode_with_options(reader, ChunkParseOptions::default())
}

pub fn decode_with_options<R: Read>(
    reader: R,
    options: ChunkParseOptions,
) -> std::result::Result<Vec<Chunk>, DecodeError> {
    let mut chunks = vec![];
    let reader = decompress(reader).map_err(|e| DecodeError {
        chunks: vec![],
        error: e.into(),
    })?;
    for chunk in JfrReader::with_options(reader, options).chunks() {
        match chunk {
            Ok(chunk) => chunks.push(chunk),
            Err(error) => return Err(DecodeError { chunks, error }),
        }
    }
    Ok(chunks)
}
