//! Write side of the seek-based file store.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::GeodexResult;
use crate::geo::GeoCoord;

use super::{FileOffset, COORD_FACTOR};

/// Sequential writer with support for backpatching already-written
/// positions (parent records embed child offsets known only later).
pub struct StoreWriter {
    file: File,
    path: PathBuf,
}

impl StoreWriter {
    /// Create (or truncate) a file for writing.
    pub fn create(path: &Path) -> GeodexResult<StoreWriter> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(StoreWriter {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_pos(&mut self) -> GeodexResult<FileOffset> {
        Ok(self.file.stream_position()?)
    }

    pub fn set_pos(&mut self, offset: FileOffset) -> GeodexResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Move the cursor back to the end of the file after a backpatch.
    pub fn seek_end(&mut self) -> GeodexResult<FileOffset> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    pub fn write_u8(&mut self, value: u8) -> GeodexResult<()> {
        self.file.write_all(&[value])?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> GeodexResult<()> {
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> GeodexResult<()> {
        self.file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> GeodexResult<()> {
        self.file.write_all(&value.to_bits().to_le_bytes())?;
        Ok(())
    }

    /// Write a LEB128 variable-length unsigned integer.
    pub fn write_vu64(&mut self, value: u64) -> GeodexResult<()> {
        let mut value = value;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.write_u8(byte)?;
                return Ok(());
            }
            self.write_u8(byte | 0x80)?;
        }
    }

    pub fn write_vu32(&mut self, value: u32) -> GeodexResult<()> {
        self.write_vu64(value as u64)
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> GeodexResult<()> {
        self.write_vu32(value.len() as u32)?;
        self.file.write_all(value.as_bytes())?;
        Ok(())
    }

    /// Write a coordinate as two scaled u32 values in renormalized space.
    pub fn write_coord(&mut self, coord: &GeoCoord) -> GeodexResult<()> {
        let lat_raw = ((coord.lat + 90.0) * COORD_FACTOR).round() as u32;
        let lon_raw = ((coord.lon + 180.0) * COORD_FACTOR).round() as u32;

        self.write_u32(lat_raw)?;
        self.write_u32(lon_raw)?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> GeodexResult<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// Flush and sync everything to disk, consuming the writer.
    pub fn finish(mut self) -> GeodexResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
