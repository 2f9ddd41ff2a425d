use super::{ReadError, TraceSource};
use crate::memref::{MemRef, RECORD_SIZE};
use flate2::read::MultiGzDecoder;
use std::{
    fs::File,
    io::{self, BufReader, Read},
    marker::PhantomData,
    path::{Path, PathBuf},
};
use tracing::debug;

/// How the file bytes turn into record bytes
pub trait Backing {
    type Stream: Read;
    fn wrap(file: File) -> Self::Stream;
}

pub struct Plain;

impl Backing for Plain {
    type Stream = BufReader<File>;

    fn wrap(file: File) -> Self::Stream {
        BufReader::new(file)
    }
}

pub struct Gzip;

impl Backing for Gzip {
    // concatenated members are read as one stream
    type Stream = BufReader<MultiGzDecoder<File>>;

    fn wrap(file: File) -> Self::Stream {
        BufReader::new(MultiGzDecoder::new(file))
    }
}

pub type FileReader = StreamReader<Plain>;
pub type CompressedFileReader = StreamReader<Gzip>;

/// Reads fixed size records one at a time out of a byte stream.
///
/// Holds a single record buffer and the decoded event, so walking the trace
/// never allocates.
pub struct StreamReader<B: Backing> {
    path: PathBuf,
    /// None before init and once we're done
    stream: Option<B::Stream>,
    buf: [u8; RECORD_SIZE],
    current: Option<MemRef>,
    /// offset of the next record in the decoded stream
    offset: u64,
    _backing: PhantomData<B>,
}

impl<B: Backing> StreamReader<B> {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            stream: None,
            buf: [0; RECORD_SIZE],
            current: None,
            offset: 0,
            _backing: PhantomData,
        }
    }

    fn finish(&mut self) {
        self.stream = None;
        self.current = None;
    }

    fn next_record(&mut self) -> Result<(), ReadError> {
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Ok(()),
        };

        let got = match fill(stream, &mut self.buf) {
            Ok(got) => got,
            Err(source) => {
                self.finish();
                return Err(ReadError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if got == 0 {
            debug!("end of trace after {} bytes", self.offset);
            self.finish();
            return Ok(());
        }

        let offset = self.offset;
        if got < RECORD_SIZE {
            self.finish();
            return Err(ReadError::Truncated { offset, got });
        }

        match MemRef::decode(&self.buf) {
            Ok(m) => {
                self.current = Some(m);
                self.offset += RECORD_SIZE as u64;
                Ok(())
            }
            Err(kind) => {
                self.finish();
                Err(ReadError::UnknownKind { kind, offset })
            }
        }
    }
}

/// Reads until `buf` is full or the stream runs dry, returning how much was
/// read. Only a short count at the very end tells us the trace got cut off.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8; RECORD_SIZE]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<B: Backing> TraceSource for StreamReader<B> {
    fn init(&mut self) -> Result<(), ReadError> {
        if self.stream.is_some() || self.offset > 0 {
            // single pass, never rewinds
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|source| ReadError::Open {
            path: self.path.clone(),
            source,
        })?;
        self.stream = Some(B::wrap(file));

        self.next_record()
    }

    fn advance(&mut self) -> Result<(), ReadError> {
        self.next_record()
    }

    fn at_end(&self) -> bool {
        self.current.is_none()
    }

    fn current(&self) -> Option<&MemRef> {
        self.current.as_ref()
    }
}
