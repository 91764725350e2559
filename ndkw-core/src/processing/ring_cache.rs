use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Fixed-capacity byte ring exposed as a seekable stream.
///
/// Behaves like an append-only stream until `capacity` bytes have been
/// written, then overwrites the oldest bytes. Positions and lengths are
/// *virtual*: offset 0 is always the oldest retained byte, whatever its
/// physical location in the backing store.
///
/// The backing store can be anything seekable (a `Cursor<Vec<u8>>`, a
/// temp file). Only the region `[reference_start, reference_start + capacity)`
/// of the store is ever touched.
///
/// Overflow behavior: drops oldest bytes. A single write larger than the
/// capacity keeps only its last `capacity` bytes.
#[derive(Debug)]
pub struct RingCache<S> {
    inner: S,
    reference_start: u64,
    capacity: u64,
    written: u64,
    position: u64,
    wrap_offset: u64,
}

impl<S: Read + Write + Seek> RingCache<S> {
    /// Wrap `inner`, using its current position as the start of the ring.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(mut inner: S, capacity: u64) -> io::Result<Self> {
        assert!(capacity > 0, "ring cache capacity must be non-zero");
        let reference_start = inner.stream_position()?;
        Ok(Self {
            inner,
            reference_start,
            capacity,
            written: 0,
            position: 0,
            wrap_offset: 0,
        })
    }

    /// Number of logical bytes currently retained (never above capacity).
    pub fn len(&self) -> u64 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Current virtual position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Reset to empty. The backing store keeps its allocation.
    pub fn clear(&mut self) -> io::Result<()> {
        self.written = 0;
        self.position = 0;
        self.wrap_offset = 0;
        self.inner.seek(SeekFrom::Start(self.reference_start))?;
        Ok(())
    }

    /// Copy the whole logical content to `writer`.
    ///
    /// Leaves the cursor at the end so the next write appends.
    pub fn copy_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<u64> {
        self.seek(SeekFrom::Start(0))?;
        let mut chunk = vec![0u8; COPY_CHUNK.min(self.written as usize).max(1)];
        let mut copied = 0u64;
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            writer.write_all(&chunk[..n])?;
            copied += n as u64;
        }
        self.seek(SeekFrom::End(0))?;
        Ok(copied)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn physical_offset(&self) -> u64 {
        (self.position + self.wrap_offset) % self.capacity
    }

    fn sync_cursor(&mut self) -> io::Result<()> {
        let target = self.reference_start + self.physical_offset();
        self.inner.seek(SeekFrom::Start(target))?;
        Ok(())
    }
}

const COPY_CHUNK: usize = 1 << 16;

impl<S: Read + Write + Seek> Write for RingCache<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let accepted = buf.len();

        // Only the tail of an oversized write can survive.
        let data = if buf.len() as u64 > self.capacity {
            &buf[buf.len() - self.capacity as usize..]
        } else {
            buf
        };

        let physical = self.physical_offset();
        let until_wrap = (self.capacity - physical) as usize;
        if data.len() > until_wrap {
            let (tail, head) = data.split_at(until_wrap);
            self.inner.write_all(tail)?;
            self.inner.seek(SeekFrom::Start(self.reference_start))?;
            self.inner.write_all(head)?;
        } else {
            self.inner.write_all(data)?;
            if data.len() == until_wrap {
                self.inner.seek(SeekFrom::Start(self.reference_start))?;
            }
        }

        let end = self.position + data.len() as u64;
        if end > self.capacity {
            let overflow = end - self.capacity;
            self.wrap_offset = (self.wrap_offset + overflow) % self.capacity;
        }
        self.position = end.min(self.capacity);
        self.written = self.written.max(self.position);

        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Read + Write + Seek> Read for RingCache<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = (self.written - self.position) as usize;
        let to_read = buf.len().min(available);
        if to_read == 0 {
            return Ok(0);
        }

        let physical = self.physical_offset();
        let until_wrap = (self.capacity - physical) as usize;
        if to_read > until_wrap {
            self.inner.read_exact(&mut buf[..until_wrap])?;
            self.inner.seek(SeekFrom::Start(self.reference_start))?;
            self.inner.read_exact(&mut buf[until_wrap..to_read])?;
        } else {
            self.inner.read_exact(&mut buf[..to_read])?;
        }

        self.position += to_read as u64;
        if self.physical_offset() == 0 {
            self.inner.seek(SeekFrom::Start(self.reference_start))?;
        }
        Ok(to_read)
    }
}

impl<S: Read + Write + Seek> Seek for RingCache<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let written = self.written as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.position as i128 + offset as i128,
            SeekFrom::End(offset) => written + offset as i128,
        };
        self.position = target.clamp(0, written) as u64;
        self.sync_cursor()?;
        Ok(self.position)
    }
}

/// Backing store for a device's ring cache.
#[derive(Debug)]
pub enum CacheBacking {
    Memory(Cursor<Vec<u8>>),
    /// Anonymous temp file, removed by the OS once dropped.
    TempFile(File),
}

impl CacheBacking {
    pub fn memory(capacity: u64) -> Self {
        Self::Memory(Cursor::new(Vec::with_capacity(capacity as usize)))
    }

    pub fn temp_file() -> io::Result<Self> {
        Ok(Self::TempFile(tempfile::tempfile()?))
    }
}

impl Read for CacheBacking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.read(buf),
            Self::TempFile(file) => file.read(buf),
        }
    }
}

impl Write for CacheBacking {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.write(buf),
            Self::TempFile(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Memory(cursor) => cursor.flush(),
            Self::TempFile(file) => file.flush(),
        }
    }
}

impl Seek for CacheBacking {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Memory(cursor) => cursor.seek(pos),
            Self::TempFile(file) => file.seek(pos),
        }
    }
}
