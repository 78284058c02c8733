//! Decodes one chunk: header, metadata, constant pools, then the event records.
//!
//! Related JMC code: [ChunkLoaderV1.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder/src/main/java/org/openjdk/jmc/flightrecorder/internal/parser/v1/ChunkLoaderV1.java)

use crate::reader::byte_stream::{ByteStream, HeapByteStream, IntEncoding};
use crate::reader::constant_pool::{ConstantPool, ConstantPools};
use crate::reader::event::{read_event, ChunkEvents, EventCollection, EventContext};
use crate::reader::metadata::Metadata;
use crate::reader::registry::EventRegistry;
use crate::reader::type_descriptor::ClassMetadata;
use crate::reader::{Error, Result};
use crate::{Version, MAGIC};
use byteorder::{ReadBytesExt, BE};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, ErrorKind, Read};
use std::sync::Arc;

const FEATURES_COMPRESSED_INTS: i32 = 1;

/// Magic, version and the fixed header. Offsets in the header count from the
/// start of the chunk, offsets in [`ChunkHeader`] from the end of this prefix.
pub const HEADER_SIZE: u64 = 68;

/// The body buffer grows past this only as bytes actually arrive, so a corrupt
/// chunk size cannot reserve memory the input does not back.
const MAX_BODY_PREALLOCATION: u64 = 64 << 20;

#[derive(Debug, Clone)]
pub struct ChunkHeader {
    pub version: Version,
    pub chunk_size: i64,
    pub constant_pool_offset: u64,
    pub metadata_offset: u64,
    pub start_time_nanos: i64,
    pub duration_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: i64,
    pub features: i32,
}

impl ChunkHeader {
    pub fn is_ints_compressed(&self) -> bool {
        self.features & FEATURES_COMPRESSED_INTS != 0
    }

    pub fn int_encoding(&self) -> IntEncoding {
        if self.is_ints_compressed() {
            IntEncoding::Compressed
        } else {
            IntEncoding::Raw
        }
    }

    /// Size of the chunk after the header.
    pub fn body_size(&self) -> u64 {
        (self.chunk_size as u64).saturating_sub(HEADER_SIZE)
    }

    pub fn clock(&self) -> ChunkClock {
        ChunkClock {
            start_time_nanos: self.start_time_nanos,
            start_ticks: self.start_ticks,
            ticks_per_second: self.ticks_per_second,
        }
    }

    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        self.clock().ticks_to_nanos(ticks)
    }

    pub fn ticks_to_duration_nanos(&self, ticks: i64) -> i64 {
        self.clock().ticks_to_duration_nanos(ticks)
    }

    fn try_new<R: Read>(reader: &mut R, version: Version) -> Result<Self> {
        let chunk_size = reader.read_i64::<BE>()?;
        let constant_pool_offset = reader.read_i64::<BE>()?;
        let metadata_offset = reader.read_i64::<BE>()?;
        let start_time_nanos = reader.read_i64::<BE>()?;
        let duration_nanos = reader.read_i64::<BE>()?;
        let start_ticks = reader.read_i64::<BE>()?;
        let ticks_per_second = reader.read_i64::<BE>()?;
        let features = reader.read_i32::<BE>()?;

        if chunk_size < HEADER_SIZE as i64 {
            return Err(Error::InvalidChunkSize(chunk_size));
        }
        let body_size = chunk_size as u64 - HEADER_SIZE;
        let normalize = |section: &'static str, offset: i64| {
            offset
                .checked_sub(HEADER_SIZE as i64)
                .and_then(|o| u64::try_from(o).ok())
                .filter(|&o| o < body_size)
                .ok_or(Error::InvalidChunkOffset { section, offset })
        };

        Ok(Self {
            version,
            chunk_size,
            constant_pool_offset: normalize("constant pool", constant_pool_offset)?,
            metadata_offset: normalize("metadata", metadata_offset)?,
            start_time_nanos,
            duration_nanos,
            start_ticks,
            ticks_per_second,
            features,
        })
    }
}

/// Converts tick counts of one chunk to wall-clock nanoseconds.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChunkClock {
    pub start_time_nanos: i64,
    pub start_ticks: i64,
    pub ticks_per_second: i64,
}

impl ChunkClock {
    /// Nanoseconds since the epoch for a tick timestamp.
    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        let elapsed = (ticks as i128 - self.start_ticks as i128) * 1_000_000_000;
        let elapsed = match self.ticks_per_second {
            tps if tps > 0 => elapsed / tps as i128,
            _ => elapsed / 1_000_000_000,
        };
        clamp_i64(self.start_time_nanos as i128 + elapsed)
    }

    /// Nanoseconds for a tick duration.
    pub fn ticks_to_duration_nanos(&self, ticks: i64) -> i64 {
        match self.ticks_per_second {
            tps if tps > 0 => clamp_i64(ticks as i128 * 1_000_000_000 / tps as i128),
            _ => ticks,
        }
    }
}

fn clamp_i64(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

pub type ConstantPoolHook = Box<dyn FnMut(&ClassMetadata, &ConstantPool) + Send>;

/// Knobs for decoding chunks.
#[derive(Default)]
pub struct ChunkParseOptions {
    /// Called once for each constant pool after the pools are resolved.
    pub constant_pool_hook: Option<ConstantPoolHook>,
    pub registry: EventRegistry,
}

impl ChunkParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constant_pool_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&ClassMetadata, &ConstantPool) + Send + 'static,
    {
        self.constant_pool_hook = Some(Box::new(hook));
        self
    }

    pub fn with_registry(mut self, registry: EventRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl fmt::Debug for ChunkParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkParseOptions")
            .field("constant_pool_hook", &self.constant_pool_hook.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

/// A decoded chunk. Constant pools are consumed while decoding and not kept.
#[derive(Debug)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub metadata: Metadata,
    pub events: ChunkEvents,
}

trait Context<T> {
    fn context(self, phase: &'static str, offset: u64) -> Result<T>;
}

impl<T> Context<T> for Result<T> {
    fn context(self, phase: &'static str, offset: u64) -> Result<T> {
        self.map_err(|e| Error::Chunk {
            phase,
            offset,
            source: Box::new(e),
        })
    }
}

/// Reads the magic. `None` when the input ends before its first byte.
fn read_magic<R: Read>(reader: &mut R) -> Result<Option<[u8; 4]>> {
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        match reader.read(&mut magic[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(magic))
}

/// Decodes the next chunk of `reader`, or returns `None` at a clean end of input.
pub(crate) fn read_chunk<R: Read>(
    reader: &mut R,
    options: &mut ChunkParseOptions,
) -> Result<Option<Chunk>> {
    let magic = match read_magic(reader).context("header", 0)? {
        Some(magic) => magic,
        None => return Ok(None),
    };
    if magic != MAGIC {
        return Err(Error::InvalidMagic(magic)).context("header", 0);
    }

    let version = Version {
        major: reader.read_i16::<BE>().map_err(Error::from).context("header", 4)?,
        minor: reader.read_i16::<BE>().map_err(Error::from).context("header", 6)?,
    };
    if !version.is_known() {
        log::debug!("decoding chunk of unknown version {}.{}", version.major, version.minor);
    }

    let header = ChunkHeader::try_new(reader, version).context("header", 8)?;
    log::debug!(
        "chunk header: version={}.{} size={} metadata_offset={} constant_pool_offset={} compressed_ints={}",
        version.major,
        version.minor,
        header.chunk_size,
        header.metadata_offset,
        header.constant_pool_offset,
        header.is_ints_compressed()
    );

    let body_size = header.body_size();
    let mut body = Vec::with_capacity(body_size.min(MAX_BODY_PREALLOCATION) as usize);
    reader
        .by_ref()
        .take(body_size)
        .read_to_end(&mut body)
        .map_err(Error::from)
        .context("body", 0)?;
    if (body.len() as u64) < body_size {
        let eof = std::io::Error::from(ErrorKind::UnexpectedEof);
        return Err(Error::Io(eof)).context("body", body.len() as u64);
    }

    let mut stream = ByteStream::with_int_encoding(Cursor::new(body), header.int_encoding());
    let mut extents: FxHashMap<u64, u64> = FxHashMap::default();

    let metadata = read_metadata(&mut stream, header.metadata_offset, body_size, &mut extents)
        .context("metadata", header.metadata_offset)?;
    let classes = &metadata.class_map;

    let mut pools = ConstantPools::read_checkpoints(
        &mut stream,
        header.constant_pool_offset,
        body_size,
        classes,
        &mut extents,
    )
    .context("constant pool", header.constant_pool_offset)?;
    pools
        .resolve_all(classes)
        .context("resolve", header.constant_pool_offset)?;

    if let Some(hook) = options.constant_pool_hook.as_mut() {
        let mut class_ids: Vec<i64> = pools.pools().map(|(id, _)| id).collect();
        class_ids.sort_unstable();
        for class_id in class_ids {
            if let (Some(class), Some(pool)) = (classes.get(class_id), pools.pool(class_id)) {
                hook(class, pool);
            }
        }
    }

    let mut ctx = EventContext {
        classes,
        pools: &mut pools,
        clock: header.clock(),
        registry: &options.registry,
    };
    let mut collections: BTreeMap<Arc<str>, EventCollection> = BTreeMap::new();
    let mut offset = 0u64;

    while offset < body_size {
        if let Some(&size) = extents.get(&offset) {
            offset += size;
            continue;
        }

        let end = read_record(&mut stream, offset, body_size, &mut ctx, &mut collections)
            .context("event", offset)?;
        offset = end;
    }

    if offset != body_size {
        return Err(Error::ChunkSizeMismatch {
            expected: body_size,
            actual: offset,
        })
        .context("event", offset);
    }

    let events = ChunkEvents::from_collections(collections);
    log::debug!(
        "decoded chunk with {} classes and {} events",
        classes.len(),
        events.event_count()
    );

    Ok(Some(Chunk {
        header,
        metadata,
        events,
    }))
}

fn read_metadata(
    stream: &mut HeapByteStream,
    offset: u64,
    body_size: u64,
    extents: &mut FxHashMap<u64, u64>,
) -> Result<Metadata> {
    stream.seek(offset)?;
    let size = stream.read_i32()?;
    if size <= 0 {
        return Err(Error::ZeroSizedRecord(offset));
    }
    if offset + size as u64 > body_size {
        return Err(Error::ChunkSizeMismatch {
            expected: body_size,
            actual: offset + size as u64,
        });
    }
    extents.insert(offset, size as u64);
    Metadata::try_new(stream)
}

/// Decodes the record at `offset` and returns the offset following it.
fn read_record(
    stream: &mut HeapByteStream,
    offset: u64,
    body_size: u64,
    ctx: &mut EventContext,
    collections: &mut BTreeMap<Arc<str>, EventCollection>,
) -> Result<u64> {
    stream.seek(offset)?;
    let size = stream.read_i32()?;
    if size <= 0 {
        return Err(Error::ZeroSizedRecord(offset));
    }
    let end = offset + size as u64;
    if end > body_size {
        return Err(Error::ChunkSizeMismatch {
            expected: body_size,
            actual: end,
        });
    }

    if let Some(event) = read_event(stream, ctx)? {
        collections
            .entry(event.class.name.clone())
            .or_insert_with(|| EventCollection::new(event.class.clone()))
            .add(event);
    }

    let position = stream.position()?;
    if position > end {
        return Err(Error::RecordOverrun {
            offset,
            size: size as u64,
            consumed: position - offset,
        });
    }
    Ok(end)
}
