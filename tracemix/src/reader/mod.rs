//! Reads a trace as a forward-only sequence of [`MemRef`]s.
//!
//! Whether the file is gzip compressed or not is picked once in [`create`],
//! after that every reader looks the same to the caller.

pub mod stream;

use crate::memref::{MemRef, UnknownKind, RECORD_SIZE};
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub use stream::{CompressedFileReader, FileReader, StreamReader};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("Trace file name is empty")]
    EmptyName,
    #[error("failed to open trace {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to read from trace {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("truncated record at offset {offset}: got {got} of {} bytes", RECORD_SIZE)]
    Truncated { offset: u64, got: usize },
    #[error("{kind} at offset {offset}")]
    UnknownKind { kind: UnknownKind, offset: u64 },
}

/// A single pass over a trace.
///
/// The reader is its own cursor: `current` is the event under it and
/// `at_end` replaces comparing against an end marker.
pub trait TraceSource {
    /// Opens the backing file and loads the first event
    fn init(&mut self) -> Result<(), ReadError>;
    /// Moves to the next event, does nothing once at the end
    fn advance(&mut self) -> Result<(), ReadError>;
    fn at_end(&self) -> bool;
    /// `None` before `init` and after the last event
    fn current(&self) -> Option<&MemRef>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceFormat {
    /// Look at the magic bytes
    #[default]
    Auto,
    Plain,
    Gzip,
}

impl argh::FromArgValue for TraceFormat {
    fn from_arg_value(value: &str) -> Result<Self, String> {
        match value {
            "auto" => Ok(TraceFormat::Auto),
            "plain" | "raw" => Ok(TraceFormat::Plain),
            "gzip" | "gz" => Ok(TraceFormat::Gzip),
            _ => Err(format!("Unknown trace format: {}", value)),
        }
    }
}

/// Picks a reader for `path`. Fails right away for an empty name or a file
/// that can't be opened, nothing is read until [`TraceSource::init`].
pub fn create<P: AsRef<Path>>(
    path: P,
    format: TraceFormat,
) -> Result<Box<dyn TraceSource>, ReadError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(ReadError::EmptyName);
    }

    let format = match format {
        TraceFormat::Auto => sniff(path)?,
        forced => {
            // still make sure it's there
            File::open(path).map_err(|source| ReadError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            forced
        }
    };

    info!("Reading {} trace {}", format_name(format), path.display());

    Ok(match format {
        TraceFormat::Gzip => Box::new(CompressedFileReader::new(path)),
        _ => Box::new(FileReader::new(path)),
    })
}

fn format_name(format: TraceFormat) -> &'static str {
    match format {
        TraceFormat::Auto => "auto",
        TraceFormat::Plain => "plain",
        TraceFormat::Gzip => "gzip",
    }
}

fn sniff(path: &Path) -> Result<TraceFormat, ReadError> {
    let open_err = |source| ReadError::Open {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(open_err)?;

    let mut magic = Vec::with_capacity(GZIP_MAGIC.len());
    file.take(GZIP_MAGIC.len() as u64)
        .read_to_end(&mut magic)
        .map_err(open_err)?;

    debug!("magic {}", hex::encode(&magic));

    if magic == GZIP_MAGIC {
        Ok(TraceFormat::Gzip)
    } else {
        Ok(TraceFormat::Plain)
    }
}

/// Iterator view over a source that was already started.
///
/// Yields the event under the cursor before advancing, so nothing is read
/// ahead of what the caller has asked for. Stops for good after an error.
pub struct Events<'a, S: TraceSource + ?Sized> {
    source: &'a mut S,
    started: bool,
    failed: bool,
}

impl<'a, S: TraceSource + ?Sized> Events<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            started: false,
            failed: false,
        }
    }
}

impl<S: TraceSource + ?Sized> Iterator for Events<'_, S> {
    type Item = Result<MemRef, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if self.started {
            if let Err(e) = self.source.advance() {
                self.failed = true;
                return Some(Err(e));
            }
        }
        self.started = true;

        self.source.current().copied().map(Ok)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{create, Events, ReadError, TraceFormat, TraceSource};
    use crate::memref::{MemRef, RefKind};
    use flate2::{write::GzEncoder, Compression};
    use std::{
        ops::Deref,
        path::{Path, PathBuf},
        sync::atomic::{AtomicUsize, Ordering},
    };

    static FIXTURE: AtomicUsize = AtomicUsize::new(0);

    /// A unique path under the temp dir, the file is removed on drop
    pub struct Fixture(PathBuf);

    impl Deref for Fixture {
        type Target = Path;

        fn deref(&self) -> &Path {
            &self.0
        }
    }

    impl AsRef<Path> for Fixture {
        fn as_ref(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            // most fixtures are never created
            let _ = std::fs::remove_file(&self.0);
        }
    }

    pub fn fixture_path(name: &str) -> Fixture {
        let n = FIXTURE.fetch_add(1, Ordering::Relaxed);
        Fixture(std::env::temp_dir().join(format!(
            "tracemix-{}-{}-{}",
            std::process::id(),
            n,
            name
        )))
    }

    pub fn write_trace(name: &str, refs: &[MemRef]) -> Fixture {
        let path = fixture_path(name);
        let mut out = Vec::new();
        for r in refs {
            r.write_to(&mut out).unwrap();
        }
        std::fs::write(&path, out).unwrap();
        path
    }

    pub fn gz_bytes(refs: &[MemRef]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        for r in refs {
            r.write_to(&mut enc).unwrap();
        }
        enc.finish().unwrap()
    }

    pub fn write_gz_trace(name: &str, refs: &[MemRef]) -> Fixture {
        let path = fixture_path(name);
        std::fs::write(&path, gz_bytes(refs)).unwrap();
        path
    }

    /// Enough distinct records that the compressed stream spans many blocks
    pub fn long_trace() -> Vec<MemRef> {
        (0..4096u64)
            .map(|i| {
                let addr = i.wrapping_mul(0x9e37_79b9);
                MemRef::data(RefKind::Read, i % 7, 0x1000 + i * 4, addr, 8)
            })
            .collect()
    }

    fn sample() -> Vec<MemRef> {
        vec![
            MemRef::instr(7, 0x1000, 4),
            MemRef::data(RefKind::Read, 7, 0x1000, 0x7fff_0000, 8),
            MemRef::instr(7, 0x1004, 4),
            MemRef::data(RefKind::Write, 7, 0x1004, 0x7fff_0008, 4),
            MemRef::marker(7, 0x2a),
            MemRef::instr(8, 0x2000, 2),
        ]
    }

    fn drain(source: &mut dyn TraceSource) -> Vec<MemRef> {
        source.init().unwrap();
        Events::new(source).map(Result::unwrap).collect()
    }

    #[test]
    fn plain_and_gzip_read_the_same() {
        let refs = sample();
        let plain = write_trace("plain.trace", &refs);
        let gz = write_gz_trace("gz.trace.gz", &refs);

        let mut a = create(&plain, TraceFormat::Auto).unwrap();
        let mut b = create(&gz, TraceFormat::Auto).unwrap();

        assert_eq!(drain(a.as_mut()), refs);
        assert_eq!(drain(b.as_mut()), refs);
    }

    #[test]
    fn forced_format() {
        let refs = sample();
        let gz = write_gz_trace("forced.gz", &refs);

        let mut source = create(&gz, TraceFormat::Gzip).unwrap();
        assert_eq!(drain(source.as_mut()), refs);

        // reading gzip bytes as plain records is garbage, and gets rejected
        let mut source = create(&gz, TraceFormat::Plain).unwrap();
        let err = match source.init() {
            Err(e) => e,
            Ok(()) => Events::new(source.as_mut())
                .find_map(Result::err)
                .expect("garbage should not parse"),
        };
        assert!(matches!(
            err,
            ReadError::UnknownKind { .. } | ReadError::Truncated { .. }
        ));
    }

    #[test]
    fn cursor_walk() {
        let refs = sample();
        let path = write_trace("cursor.trace", &refs);
        let mut source = create(&path, TraceFormat::Plain).unwrap();

        assert!(source.current().is_none());
        source.init().unwrap();

        let mut seen = Vec::new();
        while !source.at_end() {
            seen.push(*source.current().unwrap());
            source.advance().unwrap();
        }
        assert_eq!(seen, refs);

        // advancing past the end is harmless
        source.advance().unwrap();
        assert!(source.at_end());
        assert!(source.current().is_none());
    }

    #[test]
    fn empty_name() {
        assert!(matches!(
            create("", TraceFormat::Auto),
            Err(ReadError::EmptyName)
        ));
        assert_eq!(
            ReadError::EmptyName.to_string(),
            "Trace file name is empty"
        );
    }

    #[test]
    fn missing_file() {
        let path = fixture_path("does-not-exist");
        assert!(matches!(
            create(&path, TraceFormat::Auto),
            Err(ReadError::Open { .. })
        ));
        assert!(matches!(
            create(&path, TraceFormat::Gzip),
            Err(ReadError::Open { .. })
        ));
    }

    #[test]
    fn empty_trace() {
        let path = write_trace("empty.trace", &[]);
        let mut source = create(&path, TraceFormat::Auto).unwrap();

        source.init().unwrap();
        assert!(source.at_end());
        assert_eq!(Events::new(source.as_mut()).count(), 0);
    }

    #[test]
    fn truncated() {
        let path = fixture_path("truncated.trace");
        let mut bytes = Vec::new();
        MemRef::instr(1, 0x1000, 4).write_to(&mut bytes).unwrap();
        MemRef::instr(1, 0x1004, 4).write_to(&mut bytes).unwrap();
        bytes.truncate(32 + 10);
        std::fs::write(&path, bytes).unwrap();

        let mut source = create(&path, TraceFormat::Auto).unwrap();
        source.init().unwrap();

        let mut events = Events::new(source.as_mut());
        assert_eq!(events.next().unwrap().unwrap().addr, 0x1000);
        assert!(matches!(
            events.next(),
            Some(Err(ReadError::Truncated {
                offset: 32,
                got: 10
            }))
        ));
        assert!(events.next().is_none());
        assert!(source.at_end());
    }

    #[test]
    fn multi_member_gzip() {
        let first = sample();
        let second = vec![MemRef::instr(9, 0x3000, 4), MemRef::marker(9, 1)];

        let path = fixture_path("members.trace.gz");
        let mut bytes = gz_bytes(&first);
        bytes.extend(gz_bytes(&second));
        std::fs::write(&path, bytes).unwrap();

        let mut source = create(&path, TraceFormat::Auto).unwrap();
        let seen = drain(source.as_mut());

        assert_eq!(seen.len(), first.len() + second.len());
        assert_eq!(&seen[..first.len()], &first[..]);
        assert_eq!(&seen[first.len()..], &second[..]);
    }

    #[test]
    fn cut_gzip() {
        let refs = long_trace();
        let bytes = gz_bytes(&refs);

        let path = fixture_path("cut.trace.gz");
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let mut source = create(&path, TraceFormat::Auto).unwrap();
        source.init().unwrap();

        let mut events = Events::new(source.as_mut());
        let mut read = 0;
        let err = loop {
            match events.next() {
                Some(Ok(m)) => {
                    assert_eq!(m, refs[read]);
                    read += 1;
                }
                Some(Err(e)) => break e,
                None => panic!("ran out after {} events without an error", read),
            }
        };

        assert!(read < refs.len());
        assert!(matches!(err, ReadError::Io { .. }));
        assert!(err.to_string().starts_with("failed to read from trace"));
        assert!(events.next().is_none());
    }

    #[test]
    fn fixtures_clean_up() {
        let path = write_trace("gone-after.trace", &sample());
        let kept = path.to_path_buf();
        assert!(kept.exists());

        drop(path);
        assert!(!kept.exists());
    }
}
