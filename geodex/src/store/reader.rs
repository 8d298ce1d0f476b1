//! Read side of the seek-based file store.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::errors::{GeodexError, GeodexResult};
use crate::geo::GeoCoord;

use super::{FileOffset, COORD_FACTOR};

/// Random-access reader over one index file.
///
/// The reader owns a single cursor; callers that share a reader across
/// threads must guard it with a lock. Each read advances the cursor.
pub struct StoreReader {
    file: File,
    path: PathBuf,
    size: u64,
}

impl StoreReader {
    /// Open an existing file for reading.
    pub fn open(path: &Path) -> GeodexResult<StoreReader> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        Ok(StoreReader {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Total file size in bytes, captured at open time.
    pub fn size(&self) -> u64 {
        self.size
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

    pub fn read_u8(&mut self) -> GeodexResult<u8> {
        let mut buf = [0u8; 1];
        self.file.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u32(&mut self) -> GeodexResult<u32> {
        let mut buf = [0u8; 4];
        self.file.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> GeodexResult<u64> {
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> GeodexResult<f64> {
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(f64::from_bits(u64::from_le_bytes(buf)))
    }

    /// Read a LEB128 variable-length unsigned integer.
    pub fn read_vu64(&mut self) -> GeodexResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;

        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(GeodexError::corrupt(format!(
                    "varint longer than 64 bits in '{}'",
                    self.path.display()
                )));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_vu32(&mut self) -> GeodexResult<u32> {
        let value = self.read_vu64()?;
        u32::try_from(value).map_err(|_| {
            GeodexError::corrupt(format!(
                "varint {} out of u32 range in '{}'",
                value,
                self.path.display()
            ))
        })
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> GeodexResult<String> {
        let len = self.read_vu32()? as usize;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| {
            GeodexError::corrupt(format!("invalid UTF-8 string in '{}'", self.path.display()))
        })
    }

    /// Read a coordinate stored as two scaled u32 values.
    pub fn read_coord(&mut self) -> GeodexResult<GeoCoord> {
        let lat_raw = self.read_u32()?;
        let lon_raw = self.read_u32()?;

        Ok(GeoCoord {
            lat: lat_raw as f64 / COORD_FACTOR - 90.0,
            lon: lon_raw as f64 / COORD_FACTOR - 180.0,
        })
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> GeodexResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreWriter;
    use tempfile::tempdir;

    #[test]
    fn test_primitive_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prim.dat");

        let mut writer = StoreWriter::create(&path).unwrap();
        writer.write_u8(0xab).unwrap();
        writer.write_u32(0xdeadbeef).unwrap();
        writer.write_u64(0x0123456789abcdef).unwrap();
        writer.write_f64(-12.375).unwrap();
        writer.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 0xab);
        assert_eq!(reader.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(reader.read_u64().unwrap(), 0x0123456789abcdef);
        assert_eq!(reader.read_f64().unwrap(), -12.375);
    }

    #[test]
    fn test_varint_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("varint.dat");
        let values = [0u64, 1, 127, 128, 300, 16383, 16384, 1 << 35, u64::MAX];

        let mut writer = StoreWriter::create(&path).unwrap();
        for value in values {
            writer.write_vu64(value).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        for value in values {
            assert_eq!(reader.read_vu64().unwrap(), value);
        }
    }

    #[test]
    fn test_string_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("string.dat");

        let mut writer = StoreWriter::create(&path).unwrap();
        writer.write_string("motorway").unwrap();
        writer.write_string("").unwrap();
        writer.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.read_string().unwrap(), "motorway");
        assert_eq!(reader.read_string().unwrap(), "");
    }

    #[test]
    fn test_coord_round_trip_precision() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coord.dat");
        let coords = [
            GeoCoord::new(0.0, 0.0),
            GeoCoord::new(51.507222, -0.1275),
            GeoCoord::new(-89.999999, 179.999999),
            GeoCoord::new(90.0, 180.0),
        ];

        let mut writer = StoreWriter::create(&path).unwrap();
        for coord in coords {
            writer.write_coord(&coord).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        for coord in coords {
            let read = reader.read_coord().unwrap();
            assert!((read.lat - coord.lat).abs() < 1e-6);
            assert!((read.lon - coord.lon).abs() < 1e-6);
        }
    }

    #[test]
    fn test_seek_and_pos() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seek.dat");

        let mut writer = StoreWriter::create(&path).unwrap();
        writer.write_u64(11).unwrap();
        writer.write_u64(22).unwrap();
        writer.write_u64(33).unwrap();
        writer.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        reader.set_pos(16).unwrap();
        assert_eq!(reader.get_pos().unwrap(), 16);
        assert_eq!(reader.read_u64().unwrap(), 33);
        assert_eq!(reader.size(), 24);
    }

    #[test]
    fn test_read_past_end_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.dat");

        let mut writer = StoreWriter::create(&path).unwrap();
        writer.write_u8(1).unwrap();
        writer.finish().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        let err = reader.read_u64().unwrap_err();
        assert!(matches!(err, GeodexError::Io(_)));
    }
}
