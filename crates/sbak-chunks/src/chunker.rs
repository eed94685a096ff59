//! Fixed-size chunking over any `Read` source
//!
//! Chunks come out lazily, in order, with ids `0..n` and the final chunk
//! truncated to whatever bytes remain. The sequence is not restartable.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

use sbak_core::{SbakError, SbakResult};

/// Default chunk size: 16 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// One plaintext chunk read from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the source, starting at 0
    pub id: u64,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug)]
pub struct Chunker<R: Read> {
    reader: BufReader<R>,
    chunk_size: usize,
    next_id: u64,
    bytes_read: u64,
    failed: bool,
}

impl Chunker<File> {
    /// Open a file for chunking.
    pub fn open(path: &Path, chunk_size: usize) -> SbakResult<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SbakError::NotFound(path.display().to_string()),
            _ => SbakError::Io(e),
        })?;
        Self::from_reader(file, chunk_size)
    }
}

impl<R: Read> Chunker<R> {
    pub fn from_reader(reader: R, chunk_size: usize) -> SbakResult<Self> {
        if chunk_size == 0 {
            return Err(SbakError::InvalidParams(
                "chunk size must be greater than zero".into(),
            ));
        }
        // Cap the read buffer; a 16 MiB BufReader buffer would just double memory
        let capacity = chunk_size.min(64 * 1024);
        Ok(Self {
            reader: BufReader::with_capacity(capacity, reader),
            chunk_size,
            next_id: 0,
            bytes_read: 0,
            failed: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total bytes handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Whether another chunk is available.
    ///
    /// A peek that fails with an I/O error reports `true`, so the error
    /// surfaces from the following `next_chunk` call instead of being lost.
    pub fn has_next(&mut self) -> bool {
        match self.reader.fill_buf() {
            Ok(buf) => !buf.is_empty(),
            Err(_) => true,
        }
    }

    /// Read the next chunk. Returns `Exhausted` once the source is drained.
    pub fn next_chunk(&mut self) -> SbakResult<Chunk> {
        let mut bytes = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(&mut bytes)?;

        if bytes.is_empty() {
            return Err(SbakError::Exhausted);
        }

        let chunk = Chunk {
            id: self.next_id,
            bytes,
        };
        self.next_id += 1;
        self.bytes_read += chunk.size() as u64;

        tracing::trace!(chunk = chunk.id, size = chunk.size(), "read chunk");
        Ok(chunk)
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = SbakResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.has_next() {
            return None;
        }
        match self.next_chunk() {
            Ok(chunk) => Some(Ok(chunk)),
            Err(SbakError::Exhausted) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn collect(data: &[u8], chunk_size: usize) -> Vec<Chunk> {
        Chunker::from_reader(Cursor::new(data.to_vec()), chunk_size)
            .unwrap()
            .collect::<SbakResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn empty_source_yields_no_chunks() {
        let mut chunker = Chunker::from_reader(Cursor::new(Vec::new()), 16).unwrap();
        assert!(!chunker.has_next());
        assert!(matches!(chunker.next_chunk(), Err(SbakError::Exhausted)));
    }

    #[test]
    fn last_chunk_is_truncated() {
        let data: Vec<u8> = (0u8..=255).cycle().take(10).collect();
        let chunks = collect(&data, 4);

        let sizes: Vec<usize> = chunks.iter().map(Chunk::size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(chunks[2].bytes, &data[8..]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let chunks = collect(&[7u8; 12], 4);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.size() == 4));
    }

    #[test]
    fn next_after_drain_is_exhausted() {
        let mut chunker = Chunker::from_reader(Cursor::new(vec![1u8; 5]), 8).unwrap();
        assert!(chunker.has_next());
        assert_eq!(chunker.next_chunk().unwrap().size(), 5);
        assert!(!chunker.has_next());
        assert!(matches!(chunker.next_chunk(), Err(SbakError::Exhausted)));
        assert_eq!(chunker.bytes_read(), 5);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let err = Chunker::from_reader(Cursor::new(vec![1u8]), 0).unwrap_err();
        assert!(matches!(err, SbakError::InvalidParams(_)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Chunker::open(Path::new("/nonexistent/sbak/input.bin"), 16).unwrap_err();
        assert!(matches!(err, SbakError::NotFound(_)));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "disk on fire"))
        }
    }

    #[test]
    fn read_error_surfaces_once() {
        let mut chunker = Chunker::from_reader(FailingReader, 16).unwrap();
        assert!(chunker.has_next(), "peek failure must not hide the error");
        assert!(matches!(chunker.next(), Some(Err(SbakError::Io(_)))));
        assert!(chunker.next().is_none());
    }

    proptest! {
        /// Chunks must cover the full input without gaps or overlap
        #[test]
        fn chunks_cover_full_input(
            data in proptest::collection::vec(any::<u8>(), 0..=8192),
            chunk_size in 1usize..=1024,
        ) {
            let chunks = collect(&data, chunk_size);
            let total: usize = chunks.iter().map(Chunk::size).sum();
            prop_assert_eq!(total, data.len());

            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.bytes.iter().copied()).collect();
            prop_assert_eq!(joined, data);
        }

        #[test]
        fn chunk_ids_are_contiguous(
            data in proptest::collection::vec(any::<u8>(), 1..=8192),
            chunk_size in 1usize..=1024,
        ) {
            let chunks = collect(&data, chunk_size);
            prop_assert_eq!(chunks.len(), data.len().div_ceil(chunk_size));
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.id, i as u64);
                if i + 1 < chunks.len() {
                    prop_assert_eq!(chunk.size(), chunk_size);
                }
            }
        }
    }
}
