//! File-based byte source for elementary streams and raw video.
//!
//! Unlike a whole-file loader, the source streams: the pipeline pulls bounded
//! chunks through [`Read`] and the file is never held in memory at once.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use vstream_core::error::{EngineError, Result};

const READ_BUFFER: usize = 1024 * 1024;

/// Buffered reader over one input file.
pub struct FileByteSource {
    reader: BufReader<File>,
    path: PathBuf,
    len: u64,
    bytes_read: u64,
}

impl FileByteSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| {
            EngineError::Source(format!("Failed to open input file {}: {}", path.display(), e))
        })?;
        let len = file
            .metadata()
            .map_err(|e| {
                EngineError::Source(format!("Failed to stat {}: {}", path.display(), e))
            })?
            .len();

        tracing::info!(
            path = %path.display(),
            size_mb = len / (1024 * 1024),
            size_bytes = len,
            "Input source opened"
        );

        Ok(Self {
            reader: BufReader::with_capacity(READ_BUFFER, file),
            path,
            len,
            bytes_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl Read for FileByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::Interrupted {
                e
            } else {
                io::Error::new(e.kind(), format!("{}: {e}", self.path.display()))
            }
        })?;
        self.bytes_read += n as u64;
        if n == 0 {
            tracing::debug!(
                path = %self.path.display(),
                bytes = self.bytes_read,
                "Input source reached end of file"
            );
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vstream_io_{}_{name}", std::process::id()))
    }

    #[test]
    fn streams_whole_file() {
        let path = temp_path("source.bin");
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        fs::write(&path, &data).unwrap();

        let mut source = FileByteSource::open(&path).unwrap();
        assert_eq!(source.path(), path.as_path());
        assert_eq!(source.len(), 5000);
        assert!(!source.is_empty());
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(source.bytes_read(), 5000);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn empty_file_reads_nothing() {
        let path = temp_path("empty.bin");
        fs::write(&path, b"").unwrap();

        let mut source = FileByteSource::open(&path).unwrap();
        assert!(source.is_empty());
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.bytes_read(), 0);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_names_path() {
        let path = temp_path("does_not_exist.bin");
        let err = match FileByteSource::open(&path) {
            Ok(_) => panic!("opening a missing file must fail"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::Source(_)));
        assert!(err.to_string().contains("does_not_exist.bin"));
    }
}
