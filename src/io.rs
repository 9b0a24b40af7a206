//! Seekable byte I/O (§4.1). Blocking, `std::io`-based — the base crate's
//! `io/sync.rs` already carried a `SyncReader`/`SyncWriter` split behind
//! `downcast`; this generalizes that idea to the two capabilities the engine
//! actually drives (a seekable input per demuxer, one seekable output file)
//! without the runtime-downcast machinery, which this crate has no use for
//! once every reader/writer is reached only through these traits.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::IoError;

/// A readable, seekable input. Implemented for any `Read + Seek` — every
/// demuxer needs a seekable byte stream with its size known a priori (§4.1).
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// A writable, seekable output.
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek> WriteSeek for T {}

pub type BoxSource = Box<dyn ReadSeek + Send>;
pub type BoxSink = Box<dyn WriteSeek + Send>;

/// Wraps a [`BoxSource`] with the small read/seek vocabulary every
/// demultiplexer needs: exact reads, absolute/relative seeks, position and
/// size queries, and a stripped line reader for `@file` option expansion.
pub struct Reader {
    path: String,
    inner: BoxSource,
    size: u64,
}

impl Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Reader, IoError> {
        let path_str = path.as_ref().display().to_string();
        let mut file = File::open(&path).map_err(|e| IoError::from_io(&path_str, e))?;
        let size = file
            .seek(SeekFrom::End(0))
            .map_err(|e| IoError::from_io(&path_str, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| IoError::from_io(&path_str, e))?;

        Ok(Reader {
            path: path_str,
            inner: Box::new(file),
            size,
        })
    }

    pub fn from_source(source: BoxSource, size: u64) -> Reader {
        Reader {
            path: String::new(),
            inner: source,
            size,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&mut self) -> Result<u64, IoError> {
        self.inner
            .seek(SeekFrom::Current(0))
            .map_err(|e| IoError::from_io(&self.path, e))
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, IoError> {
        self.inner
            .seek(pos)
            .map_err(|e| IoError::from_io(&self.path, e))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), IoError> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                IoError::Eof
            } else {
                IoError::from_io(&self.path, e)
            }
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, IoError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads up to `len` bytes, returning fewer only at end of file.
    pub fn read_to_vec(&mut self, len: usize) -> Result<Vec<u8>, IoError> {
        let mut buf = vec![0u8; len];
        let mut got = 0;
        while got < len {
            let n = self
                .inner
                .read(&mut buf[got..])
                .map_err(|e| IoError::from_io(&self.path, e))?;
            if n == 0 {
                buf.truncate(got);
                return Ok(buf);
            }
            got += n;
        }
        Ok(buf)
    }

    /// Reads one line, stripping the trailing newline — used by `@file`
    /// option expansion (§4.7).
    pub fn read_line_stripped(&mut self) -> Result<Option<String>, IoError> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        let mut read_any = false;

        loop {
            let n = self
                .inner
                .read(&mut byte)
                .map_err(|e| IoError::from_io(&self.path, e))?;
            if n == 0 {
                break;
            }
            read_any = true;
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }

        if !read_any {
            return Ok(None);
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Wraps a [`BoxSink`] with the write/seek vocabulary the container writer
/// needs, including back-patching an earlier region without disturbing
/// already-written bytes further along (§4.1, §4.6).
pub struct Writer {
    path: String,
    inner: BufWriter<BoxSink>,
}

impl Writer {
    pub fn create(path: impl AsRef<Path>) -> Result<Writer, IoError> {
        let path_str = path.as_ref().display().to_string();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| IoError::from_io(&path_str, e))?;

        Ok(Writer {
            path: path_str,
            inner: BufWriter::new(Box::new(file)),
        })
    }

    pub fn from_sink(sink: BoxSink) -> Writer {
        Writer {
            path: String::new(),
            inner: BufWriter::new(sink),
        }
    }

    pub fn tell(&mut self) -> Result<u64, IoError> {
        self.inner
            .stream_position()
            .map_err(|e| IoError::from_io(&self.path, e))
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        self.inner
            .write_all(bytes)
            .map_err(|e| IoError::from_io(&self.path, e))
    }

    /// Flushes buffered writes, then seeks. Every backward seek used to
    /// back-patch a reserved region must flush first so the freshest bytes
    /// are what gets overwritten and re-read (§4.1).
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, IoError> {
        self.inner
            .flush()
            .map_err(|e| IoError::from_io(&self.path, e))?;
        self.inner.seek(pos).map_err(IoError::SeekFailed)
    }

    /// Writes `bytes` at `offset` from the start of the stream, then
    /// restores the previous position. Used for every back-patch site in
    /// §4.6 (seek head, duration, segment size).
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<(), IoError> {
        let restore = self.tell()?;
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(bytes)?;
        self.seek(SeekFrom::Start(restore))?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), IoError> {
        self.inner
            .flush()
            .map_err(|e| IoError::from_io(&self.path, e))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn reader_from(bytes: &[u8]) -> Reader {
        Reader::from_source(Box::new(Cursor::new(bytes.to_vec())), bytes.len() as u64)
    }

    #[test]
    fn read_line_stripped_handles_crlf_and_missing_trailer() {
        let mut r = reader_from(b"first\r\nsecond\nthird");

        assert_eq!(r.read_line_stripped().unwrap().as_deref(), Some("first"));
        assert_eq!(r.read_line_stripped().unwrap().as_deref(), Some("second"));
        assert_eq!(r.read_line_stripped().unwrap().as_deref(), Some("third"));
        assert_eq!(r.read_line_stripped().unwrap(), None);
    }

    #[test]
    fn write_at_restores_prior_position() {
        let mut w = Writer::from_sink(Box::new(Cursor::new(Vec::<u8>::new())));
        w.write_all(b"0123456789").unwrap();
        let pos_before = w.tell().unwrap();

        w.write_at(2, b"XY").unwrap();

        assert_eq!(w.tell().unwrap(), pos_before);
    }
}
