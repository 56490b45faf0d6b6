//! Store-only ZIP container writer.
//!
//! Wallet bundles are plain ZIP archives. Entries are written uncompressed
//! ("stored") with a CRC-32 per entry, followed by the central directory and
//! the end-of-central-directory record, so any standard unpacker can open
//! the result.

use chrono::{Datelike, NaiveDateTime, Timelike};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

/// Version 2.0: the lowest version that every unpacker accepts for stored
/// entries with UTF-8 names.
const ZIP_VERSION: u16 = 20;
/// General purpose flag bit 11: file names are UTF-8.
const FLAG_UTF8: u16 = 0x0800;
const METHOD_STORED: u16 = 0;

/// CRC-32 (IEEE 802.3, reflected) lookup table.
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 == 0 { c >> 1 } else { 0xEDB8_8320 ^ (c >> 1) };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Compute the CRC-32 checksum ZIP uses for entry integrity.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = CRC_TABLE[idx] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// Normalise an entry name to a relative forward-slash path.
pub fn normalize_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Convert a timestamp to the (time, date) pair of MS-DOS fields.
///
/// Years before 1980 cannot be represented and clamp to 1980-01-01.
fn dos_datetime(ts: NaiveDateTime) -> (u16, u16) {
    if ts.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
    let year = u32::try_from(ts.year() - 1980).unwrap_or(0).min(127);
    let time = (clamp(ts.hour()) << 11) | (clamp(ts.minute()) << 5) | clamp(ts.second() / 2);
    let date = (clamp(year) << 9) | (clamp(ts.month()) << 5) | clamp(ts.day());
    (time, date)
}

/// Entry sizes and offsets are 32-bit in the classic ZIP format. Bundles are
/// a few hundred kilobytes, so saturating here never triggers in practice.
fn u32_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

struct PendingEntry {
    name: String,
    data: Vec<u8>,
}

/// Accumulates named blobs and serialises them as a ZIP archive.
pub struct ArchiveWriter {
    entries: Vec<PendingEntry>,
    modified: NaiveDateTime,
}

impl ArchiveWriter {
    /// Create a writer stamping every entry with `modified`.
    pub const fn new(modified: NaiveDateTime) -> Self {
        Self {
            entries: Vec::new(),
            modified,
        }
    }

    /// Append an entry. Order is preserved in the output.
    pub fn add(&mut self, name: &str, data: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.push(PendingEntry {
            name: normalize_name(name),
            data: data.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialise all entries. Identical inputs and timestamp give identical
    /// bytes.
    pub fn finish(&self) -> Vec<u8> {
        let (dos_time, dos_date) = dos_datetime(self.modified);
        let payload: usize = self
            .entries
            .iter()
            .map(|e| 30 + 46 + 2 * e.name.len() + e.data.len())
            .sum();
        let mut out = Vec::with_capacity(payload + 22);
        let mut central = Vec::new();

        for entry in &self.entries {
            let crc = crc32(&entry.data);
            let size = u32_len(entry.data.len());
            let name_len = u16::try_from(entry.name.len()).unwrap_or(u16::MAX);
            let offset = u32_len(out.len());

            put_u32(&mut out, LOCAL_HEADER_SIG);
            put_u16(&mut out, ZIP_VERSION);
            put_u16(&mut out, FLAG_UTF8);
            put_u16(&mut out, METHOD_STORED);
            put_u16(&mut out, dos_time);
            put_u16(&mut out, dos_date);
            put_u32(&mut out, crc);
            put_u32(&mut out, size);
            put_u32(&mut out, size);
            put_u16(&mut out, name_len);
            put_u16(&mut out, 0);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.data);

            put_u32(&mut central, CENTRAL_HEADER_SIG);
            put_u16(&mut central, ZIP_VERSION);
            put_u16(&mut central, ZIP_VERSION);
            put_u16(&mut central, FLAG_UTF8);
            put_u16(&mut central, METHOD_STORED);
            put_u16(&mut central, dos_time);
            put_u16(&mut central, dos_date);
            put_u32(&mut central, crc);
            put_u32(&mut central, size);
            put_u32(&mut central, size);
            put_u16(&mut central, name_len);
            put_u16(&mut central, 0); // extra
            put_u16(&mut central, 0); // comment
            put_u16(&mut central, 0); // disk number start
            put_u16(&mut central, 0); // internal attributes
            put_u32(&mut central, 0); // external attributes
            put_u32(&mut central, offset);
            central.extend_from_slice(entry.name.as_bytes());
        }

        let central_offset = u32_len(out.len());
        let central_size = u32_len(central.len());
        let count = u16::try_from(self.entries.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&central);

        put_u32(&mut out, END_OF_CENTRAL_DIR_SIG);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, count);
        put_u16(&mut out, count);
        put_u32(&mut out, central_size);
        put_u32(&mut out, central_offset);
        put_u16(&mut out, 0);

        out
    }
}

/// Pack an ordered list of `(name, bytes)` pairs in one call.
pub fn pack<N: AsRef<str>>(entries: &[(N, Vec<u8>)], modified: NaiveDateTime) -> Vec<u8> {
    let mut writer = ArchiveWriter::new(modified);
    for (name, data) in entries {
        writer.add(name.as_ref(), data.clone());
    }
    writer.finish()
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
