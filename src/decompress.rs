//! Detects compressed recordings by their leading bytes.

use std::io::{self, Cursor, ErrorKind, Read};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Compression {
    None,
    Gzip,
    Zip,
    Lz4,
}

impl Compression {
    pub fn detect(header: &[u8]) -> Self {
        if header.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if header.starts_with(&ZIP_MAGIC) {
            Compression::Zip
        } else if header.starts_with(&LZ4_FRAME_MAGIC) {
            Compression::Lz4
        } else {
            Compression::None
        }
    }
}

/// Returns a reader over the decompressed recording. Input with no known
/// signature is passed through unchanged.
pub fn decompress<'a, R: Read + 'a>(mut reader: R) -> io::Result<Box<dyn Read + 'a>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    let header = header[..filled].to_vec();
    let compression = Compression::detect(&header);
    let reader = Cursor::new(header).chain(reader);

    match compression {
        Compression::None => Ok(Box::new(reader)),
        #[cfg(feature = "gzip")]
        Compression::Gzip => {
            log::debug!("reading gzip compressed recording");
            Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
        }
        #[cfg(feature = "zip")]
        Compression::Zip => {
            log::debug!("reading zip compressed recording");
            Ok(Box::new(read_first_zip_entry(reader)?))
        }
        #[cfg(feature = "lz4")]
        Compression::Lz4 => {
            log::debug!("reading lz4 compressed recording");
            Ok(Box::new(lz4_flex::frame::FrameDecoder::new(reader)))
        }
        #[allow(unreachable_patterns)]
        other => Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("{:?} compressed recordings need the matching crate feature", other),
        )),
    }
}

/// The archive directory sits at the end, so the whole input is buffered.
/// Only the first entry is read.
#[cfg(feature = "zip")]
fn read_first_zip_entry<R: Read>(mut reader: R) -> io::Result<Cursor<Vec<u8>>> {
    let invalid = |e: zip::result::ZipError| io::Error::new(ErrorKind::InvalidData, e);

    let mut archive = vec![];
    reader.read_to_end(&mut archive)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(archive)).map_err(invalid)?;
    let mut entry = archive.by_index(0).map_err(invalid)?;
    log::debug!("decompressing zip entry {}", entry.name());

    let mut recording = Vec::with_capacity(entry.size().min(64 << 20) as usize);
    entry.read_to_end(&mut recording)?;
    Ok(Cursor::new(recording))
}
