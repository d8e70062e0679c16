//! Builds small ZIP archives on the fly so tests don't need checked-in inputs.

#![allow(dead_code)]

use std::fs;
use std::io::Write;

use anyhow::{anyhow, Result};
use camino::Utf8PathBuf;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tempfile::TempDir;

pub const STORED: u16 = 0;
pub const DEFLATED: u16 = 8;
pub const UTF8_FLAG: u16 = 1 << 11;

/// 2021-03-04 05:06:08
pub const DOS_TIME: u16 = (5 << 11) | (6 << 5) | (8 / 2);
pub const DOS_DATE: u16 = ((2021 - 1980) << 9) | (3 << 5) | 4;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone)]
pub struct TestEntry {
    pub path: Vec<u8>,
    pub data: Vec<u8>,
    pub method: u16,
    pub flags: u16,
    /// Keep only this many bytes of the compressed payload
    /// (and record that as the compressed size).
    pub truncate_payload: Option<usize>,
    /// Record this CRC instead of the real one.
    pub crc_override: Option<u32>,
    /// Record this uncompressed size instead of the real one.
    pub size_override: Option<u32>,
    /// Extra field for the local header only
    pub local_extra: Vec<u8>,
}

impl TestEntry {
    pub fn new(path: &str, data: &[u8], method: u16) -> Self {
        Self {
            path: path.as_bytes().to_vec(),
            data: data.to_vec(),
            method,
            flags: 0,
            truncate_payload: None,
            crc_override: None,
            size_override: None,
            local_extra: Vec::new(),
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = match self.method {
            DEFLATED => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
                encoder.write_all(&self.data).expect("in-memory write");
                encoder.finish().expect("in-memory write")
            }
            // Unknown methods get stored bytes; nobody will decode them.
            _ => self.data.clone(),
        };
        if let Some(len) = self.truncate_payload {
            payload.truncate(len);
        }
        payload
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZipBuilder {
    entries: Vec<TestEntry>,
    comment: Vec<u8>,
    break_central_signature: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, path: &str, data: &[u8]) -> Self {
        self.entry(TestEntry::new(path, data, STORED))
    }

    pub fn deflated(self, path: &str, data: &[u8]) -> Self {
        self.entry(TestEntry::new(path, data, DEFLATED))
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Archive comment after the end of central directory record
    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Clobbers the signature of the first central directory record.
    pub fn break_central_signature(mut self) -> Self {
        self.break_central_signature = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut directory = Vec::new();

        for (i, entry) in self.entries.iter().enumerate() {
            let payload = entry.payload();
            let crc = entry
                .crc_override
                .unwrap_or_else(|| crc32fast::hash(&entry.data));
            let size = entry.size_override.unwrap_or(entry.data.len() as u32);
            let local_offset = out.len() as u32;

            out.extend_from_slice(&0x04034b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&entry.flags.to_le_bytes());
            out.extend_from_slice(&entry.method.to_le_bytes());
            out.extend_from_slice(&DOS_TIME.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&(entry.path.len() as u16).to_le_bytes());
            out.extend_from_slice(&(entry.local_extra.len() as u16).to_le_bytes());
            out.extend_from_slice(&entry.path);
            out.extend_from_slice(&entry.local_extra);
            out.extend_from_slice(&payload);

            let signature: u32 = if i == 0 && self.break_central_signature {
                0x02014b51
            } else {
                0x02014b50
            };
            directory.extend_from_slice(&signature.to_le_bytes());
            directory.extend_from_slice(&20u16.to_le_bytes()); // made by
            directory.extend_from_slice(&20u16.to_le_bytes()); // needed
            directory.extend_from_slice(&entry.flags.to_le_bytes());
            directory.extend_from_slice(&entry.method.to_le_bytes());
            directory.extend_from_slice(&DOS_TIME.to_le_bytes());
            directory.extend_from_slice(&DOS_DATE.to_le_bytes());
            directory.extend_from_slice(&crc.to_le_bytes());
            directory.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            directory.extend_from_slice(&size.to_le_bytes());
            directory.extend_from_slice(&(entry.path.len() as u16).to_le_bytes());
            directory.extend_from_slice(&0u16.to_le_bytes()); // extra
            directory.extend_from_slice(&0u16.to_le_bytes()); // comment
            directory.extend_from_slice(&0u16.to_le_bytes()); // disk
            directory.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
            directory.extend_from_slice(&0u32.to_le_bytes()); // external attributes
            directory.extend_from_slice(&local_offset.to_le_bytes());
            directory.extend_from_slice(&entry.path);
        }

        let directory_start = out.len() as u32;
        out.extend_from_slice(&directory);

        let count = self.entries.len() as u16;
        out.extend_from_slice(&0x06054b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&(directory.len() as u32).to_le_bytes());
        out.extend_from_slice(&directory_start.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }

    /// Writes the archive into `dir` as `name`.
    pub fn write(&self, dir: &TempDir, name: &str) -> Result<Utf8PathBuf> {
        write_bytes(dir, name, &self.build())
    }
}

pub fn write_bytes(dir: &TempDir, name: &str, bytes: &[u8]) -> Result<Utf8PathBuf> {
    let path = Utf8PathBuf::from_path_buf(dir.path().join(name))
        .map_err(|p| anyhow!("Temp path {} isn't UTF-8", p.display()))?;
    fs::write(&path, bytes)?;
    Ok(path)
}
