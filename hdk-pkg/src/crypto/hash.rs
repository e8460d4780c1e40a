use std::io::{self, Write};

use sha1_smol::Sha1;

/// Compute SHA-1 hash of data
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.digest().bytes()
}

/// Write sink that hashes every byte passed through to `inner`.
///
/// The package footer hash covers everything written before it, so the
/// writer routes its whole output through one of these.
pub struct Sha1Writer<W> {
    inner: W,
    hasher: Sha1,
    written: u64,
}

impl<W: Write> Sha1Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            written: 0,
        }
    }

    /// Number of bytes hashed so far.
    pub const fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Digest of everything written so far. Does not reset the state.
    pub fn digest(&self) -> [u8; 20] {
        self.hasher.digest().bytes()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for Sha1Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
