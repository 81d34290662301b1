use bytes::Bytes;
use tokio::sync::mpsc::Sender;

use crate::error::{ArchiveError, Result};

const LOCAL_HEADER_SIG: u32 = 0x04034b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x08074b50;
const CENTRAL_HEADER_SIG: u32 = 0x02014b50;
const END_OF_CENTRAL_SIG: u32 = 0x06054b50;

const VERSION_NEEDED: u16 = 20;
const METHOD_STORE: u16 = 0;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8_NAMES: u16 = 1 << 11;

// Fixed DOS timestamp (1980-01-01 00:00); archive entries carry no real
// modification times.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = 0x0021;

const DIRECTORY_ATTR: u32 = 0x10;

/// Streaming ZIP serializer (store method, UTF-8 names).
///
/// File entries are written with the data-descriptor flag so their size and
/// CRC-32 can follow the data: an entry is opened before its first byte is
/// known and closed as soon as its stream ends, never buffered whole. The
/// central directory is emitted at `finish()`. The classic 32-bit limits
/// apply: entries and total size up to 4 GiB, at most 65535 entries.
pub(crate) struct ZipWriter {
    out: Sender<Result<Bytes>>,
    offset: u64,
    central: Vec<CentralRecord>,
    current: Option<OpenEntry>,
}

struct CentralRecord {
    name: Vec<u8>,
    flags: u16,
    crc: u32,
    size: u32,
    header_offset: u32,
    is_dir: bool,
}

struct OpenEntry {
    name: Vec<u8>,
    header_offset: u64,
    crc: crc32fast::Hasher,
    count: u64,
}

impl ZipWriter {
    pub fn new(out: Sender<Result<Bytes>>) -> Self {
        Self {
            out,
            offset: 0,
            central: Vec::new(),
            current: None,
        }
    }

    /// Writes a directory record. Directories have no body and no data
    /// descriptor; their name carries a trailing slash.
    pub async fn add_directory(&mut self, path_segments: &[String]) -> Result<()> {
        let name = format!("{}/", path_segments.join("/")).into_bytes();
        let header_offset = self.record_offset()?;

        let header = local_header(&name, FLAG_UTF8_NAMES);
        self.write_raw(header).await?;

        self.central.push(CentralRecord {
            name,
            flags: FLAG_UTF8_NAMES,
            crc: 0,
            size: 0,
            header_offset,
            is_dir: true,
        });
        Ok(())
    }

    /// Opens a file entry; the body follows via `write_file_chunk`.
    pub async fn begin_file(&mut self, path_segments: &[String]) -> Result<()> {
        debug_assert!(self.current.is_none());
        let name = path_segments.join("/").into_bytes();
        let header_offset = self.record_offset()?;

        let header = local_header(&name, FLAG_UTF8_NAMES | FLAG_DATA_DESCRIPTOR);
        self.write_raw(header).await?;

        self.current = Some(OpenEntry {
            name,
            header_offset: header_offset.into(),
            crc: crc32fast::Hasher::new(),
            count: 0,
        });
        Ok(())
    }

    pub async fn write_file_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let entry = self
            .current
            .as_mut()
            .ok_or_else(|| ArchiveError::Internal("file chunk without open entry".to_string()))?;

        entry.crc.update(&chunk);
        entry.count += chunk.len() as u64;
        if entry.count > u32::MAX as u64 {
            return Err(ArchiveError::EntryTooLarge {
                path: String::from_utf8_lossy(&entry.name).into_owned(),
                size: entry.count,
            });
        }

        let chunk_len = chunk.len() as u64;
        self.send(chunk).await?;
        self.offset += chunk_len;
        Ok(())
    }

    /// Closes the open file entry, emitting its data descriptor.
    pub async fn finish_file(&mut self) -> Result<()> {
        let entry = self
            .current
            .take()
            .ok_or_else(|| ArchiveError::Internal("finish_file without open entry".to_string()))?;

        let crc = entry.crc.finalize();
        let size = entry.count as u32;

        let mut descriptor = Vec::with_capacity(16);
        put_u32(&mut descriptor, DATA_DESCRIPTOR_SIG);
        put_u32(&mut descriptor, crc);
        put_u32(&mut descriptor, size);
        put_u32(&mut descriptor, size);
        self.write_raw(descriptor).await?;

        let header_offset = u32::try_from(entry.header_offset).map_err(|_| ArchiveError::ArchiveTooLarge)?;
        self.central.push(CentralRecord {
            name: entry.name,
            flags: FLAG_UTF8_NAMES | FLAG_DATA_DESCRIPTOR,
            crc,
            size,
            header_offset,
            is_dir: false,
        });
        Ok(())
    }

    /// Emits the central directory and end record.
    pub async fn finish(mut self) -> Result<()> {
        debug_assert!(self.current.is_none());

        let entry_count = u16::try_from(self.central.len()).map_err(|_| ArchiveError::TooManyEntries)?;
        let central_offset = u32::try_from(self.offset).map_err(|_| ArchiveError::ArchiveTooLarge)?;

        let mut central_size = 0u64;
        let records = std::mem::take(&mut self.central);
        for record in &records {
            let mut header = Vec::with_capacity(46 + record.name.len());
            put_u32(&mut header, CENTRAL_HEADER_SIG);
            put_u16(&mut header, VERSION_NEEDED); // version made by
            put_u16(&mut header, VERSION_NEEDED);
            put_u16(&mut header, record.flags);
            put_u16(&mut header, METHOD_STORE);
            put_u16(&mut header, DOS_TIME);
            put_u16(&mut header, DOS_DATE);
            put_u32(&mut header, record.crc);
            put_u32(&mut header, record.size);
            put_u32(&mut header, record.size);
            put_u16(&mut header, record.name.len() as u16);
            put_u16(&mut header, 0); // extra field
            put_u16(&mut header, 0); // comment
            put_u16(&mut header, 0); // disk number
            put_u16(&mut header, 0); // internal attributes
            put_u32(&mut header, if record.is_dir { DIRECTORY_ATTR } else { 0 });
            put_u32(&mut header, record.header_offset);
            header.extend_from_slice(&record.name);

            central_size += header.len() as u64;
            self.write_raw(header).await?;
        }

        let mut end = Vec::with_capacity(22);
        put_u32(&mut end, END_OF_CENTRAL_SIG);
        put_u16(&mut end, 0); // this disk
        put_u16(&mut end, 0); // central directory disk
        put_u16(&mut end, entry_count);
        put_u16(&mut end, entry_count);
        put_u32(&mut end, u32::try_from(central_size).map_err(|_| ArchiveError::ArchiveTooLarge)?);
        put_u32(&mut end, central_offset);
        put_u16(&mut end, 0); // comment length
        self.write_raw(end).await?;

        Ok(())
    }

    fn record_offset(&self) -> Result<u32> {
        u32::try_from(self.offset).map_err(|_| ArchiveError::ArchiveTooLarge)
    }

    async fn write_raw(&mut self, data: Vec<u8>) -> Result<()> {
        let len = data.len() as u64;
        self.send(Bytes::from(data)).await?;
        self.offset += len;
        Ok(())
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        // The receiver dropping means downstream stopped consuming; treat
        // it as a cancellation, not a fault.
        self.out
            .send(Ok(data))
            .await
            .map_err(|_| ArchiveError::Cancelled)
    }
}

fn local_header(name: &[u8], flags: u16) -> Vec<u8> {
    let mut header = Vec::with_capacity(30 + name.len());
    put_u32(&mut header, LOCAL_HEADER_SIG);
    put_u16(&mut header, VERSION_NEEDED);
    put_u16(&mut header, flags);
    put_u16(&mut header, METHOD_STORE);
    put_u16(&mut header, DOS_TIME);
    put_u16(&mut header, DOS_DATE);
    put_u32(&mut header, 0); // crc, in the data descriptor for files
    put_u32(&mut header, 0); // compressed size
    put_u32(&mut header, 0); // uncompressed size
    put_u16(&mut header, name.len() as u16);
    put_u16(&mut header, 0); // extra field length
    header.extend_from_slice(name);
    header
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
