//! Seekable AES-128-CTR stream.
//!
//! The keystream block for logical block `i` is `AES(key, iv + i)`, with the
//! counter treated as a big-endian 128-bit integer that wraps on overflow
//! (`ctr::Ctr128BE`). The cipher is repositioned from the logical offset on
//! every call, so reads can start anywhere without touching earlier bytes.
//!
//! Logical offset zero is wherever the inner stream was when the
//! `CtrStream` was built. [`CtrStream::open`] records that position up
//! front and sets a length; streams built with [`CtrStream::new`] resolve
//! it on the first seek from the inner position, so the inner stream must
//! only be moved through the `CtrStream` until then.
//!
//! Writes are append-only: the package writer emits the body strictly in
//! order, and the stream encrypts exactly the bytes it is given at the
//! current position. Callers must not seek backwards over data they have
//! already written.

use std::io::{self, Read, Seek, SeekFrom, Write};

use aes::Aes128;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};

/// Block size of the underlying cipher.
pub const CTR_BLOCK_SIZE: u64 = 16;

/// Scratch size used when encrypting on the write path.
const WRITE_CHUNK: usize = 0x4000;

/// Wraps a byte stream, XORing everything that passes through with the
/// AES-128-CTR keystream.
pub struct CtrStream<S> {
    inner: S,
    cipher: Ctr128BE<Aes128>,
    /// Inner-stream offset that corresponds to logical position zero.
    /// `None` until known.
    base: Option<u64>,
    /// Logical position relative to `base`.
    pos: u64,
    /// Declared length, if any. Reads stop and writes fail beyond it.
    len: Option<u64>,
}

impl<S> CtrStream<S> {
    /// Wrap `inner`, treating its current position as logical offset zero.
    ///
    /// Needs no `Seek`; for a seekable inner the starting offset is taken
    /// from the inner position on the first seek.
    pub fn new(inner: S, key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            inner,
            cipher: Ctr128BE::<Aes128>::new(key.into(), iv.into()),
            base: None,
            pos: 0,
            len: None,
        }
    }

    /// Limit the stream to `len` logical bytes.
    #[must_use]
    pub const fn with_length(mut self, len: u64) -> Self {
        self.len = Some(len);
        self
    }

    /// Current logical position.
    pub const fn position(&self) -> u64 {
        self.pos
    }

    /// Declared length, if any.
    pub const fn length(&self) -> Option<u64> {
        self.len
    }

    pub const fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// XOR `data` in place with the keystream, as if `data` started at
    /// logical `offset`. Offsets need not be block aligned.
    pub fn apply_keystream_at(&mut self, data: &mut [u8], offset: u64) {
        self.cipher.seek(offset);
        self.cipher.apply_keystream(data);
    }

    /// Bytes left before the declared length, or `u64::MAX` without one.
    fn remaining(&self) -> u64 {
        self.len.map_or(u64::MAX, |len| len.saturating_sub(self.pos))
    }
}

impl<S: Seek> CtrStream<S> {
    /// Wrap a seekable stream whose current position is logical offset zero
    /// and whose encrypted region is `len` bytes long.
    pub fn open(mut inner: S, key: &[u8; 16], iv: &[u8; 16], len: u64) -> io::Result<Self> {
        let base = inner.stream_position()?;
        let mut stream = Self::new(inner, key, iv).with_length(len);
        stream.base = Some(base);
        Ok(stream)
    }

    /// Inner offset of logical position zero. Reads and writes move both
    /// cursors by the same amount, so it is the inner position minus `pos`.
    fn base(&mut self) -> io::Result<u64> {
        if let Some(base) = self.base {
            return Ok(base);
        }
        let base = self
            .inner
            .stream_position()?
            .checked_sub(self.pos)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "inner stream is behind the logical position",
                )
            })?;
        self.base = Some(base);
        Ok(base)
    }
}

impl<S: Read> Read for CtrStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = std::cmp::min(buf.len() as u64, self.remaining()) as usize;
        if want == 0 {
            return Ok(0);
        }

        let n = self.inner.read(&mut buf[..want])?;
        let pos = self.pos;
        self.apply_keystream_at(&mut buf[..n], pos);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: Write> Write for CtrStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past the declared length of the encrypted region",
            ));
        }

        let mut scratch = vec![0u8; std::cmp::min(buf.len(), WRITE_CHUNK)];
        for chunk in buf.chunks(WRITE_CHUNK) {
            let out = &mut scratch[..chunk.len()];
            out.copy_from_slice(chunk);
            let pos = self.pos;
            self.apply_keystream_at(out, pos);
            self.inner.write_all(out)?;
            self.pos += chunk.len() as u64;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for CtrStream<S> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let base = self.base()?;

        let new_pos = match target {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => {
                let end = match self.len {
                    Some(len) => len,
                    None => {
                        let inner_end = self.inner.seek(SeekFrom::End(0))?;
                        self.inner.seek(SeekFrom::Start(base + self.pos))?;
                        inner_end.saturating_sub(base)
                    }
                };
                end.checked_add_signed(d)
            }
        };

        let new_pos = match new_pos {
            Some(p) if self.len.is_none_or(|len| p <= len) => p,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "seek outside the encrypted region",
                ));
            }
        };

        self.inner.seek(SeekFrom::Start(base + new_pos))?;
        self.pos = new_pos;
        Ok(new_pos)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use aes::Block;
    use aes::cipher::{BlockEncrypt, KeyInit};
    use proptest::prelude::*;

    use super::*;

    const KEY: [u8; 16] = [
        0x2E, 0x7B, 0x71, 0xD7, 0xC9, 0xC9, 0xA1, 0x4E, 0xA3, 0x22, 0x1F, 0x18, 0x88, 0x28, 0xB8,
        0xF8,
    ];
    const IV: [u8; 16] = [
        0x6C, 0xC6, 0x08, 0xD4, 0x6C, 0x84, 0xCE, 0x96, 0x7C, 0xDD, 0x83, 0xC1, 0xA6, 0xBB, 0x43,
        0x69,
    ];

    /// Reference encryption through the `ctr` crate.
    fn reference(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        let mut cipher = Ctr128BE::<Aes128>::new(key.into(), iv.into());
        cipher.apply_keystream(&mut out);
        out
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    /// Keystream block `i` straight from the block cipher.
    fn keystream_block(key: &[u8; 16], iv: &[u8; 16], i: u128) -> [u8; 16] {
        let counter = u128::from_be_bytes(*iv).wrapping_add(i);
        let mut block = Block::from(counter.to_be_bytes());
        Aes128::new(key.into()).encrypt_block(&mut block);
        block.into()
    }

    #[test]
    fn keystream_is_aes_of_incremented_counter() {
        let mut stream = CtrStream::new(Vec::<u8>::new(), &KEY, &IV);
        let mut data = [0u8; 40];
        stream.apply_keystream_at(&mut data, 24);

        assert_eq!(&data[..8], &keystream_block(&KEY, &IV, 1)[8..]);
        assert_eq!(&data[8..24], &keystream_block(&KEY, &IV, 2));
        assert_eq!(&data[24..], &keystream_block(&KEY, &IV, 3));

        let iv = [0xFF; 16];
        let mut data = [0u8; 32];
        stream = CtrStream::new(Vec::new(), &KEY, &iv);
        stream.apply_keystream_at(&mut data, 0);
        assert_eq!(&data[16..], &keystream_block(&KEY, &[0u8; 16], 0));
    }

    #[test]
    fn write_matches_reference_ctr() {
        let plain = sample(100);
        let mut stream = CtrStream::new(Vec::new(), &KEY, &IV);
        stream.write_all(&plain[..5]).unwrap();
        stream.write_all(&plain[5..37]).unwrap();
        stream.write_all(&plain[37..]).unwrap();

        assert_eq!(stream.into_inner(), reference(&KEY, &IV, &plain));
    }

    #[test]
    fn counter_wraps_at_128_bits() {
        let iv = [0xFF; 16];
        let plain = sample(48);
        let mut stream = CtrStream::new(Vec::new(), &KEY, &iv);
        stream.write_all(&plain).unwrap();

        assert_eq!(stream.into_inner(), reference(&KEY, &iv, &plain));
    }

    #[test]
    fn read_after_seek_decrypts_in_place() {
        let plain = sample(80);
        let cipher = reference(&KEY, &IV, &plain);

        let mut stream = CtrStream::open(Cursor::new(cipher), &KEY, &IV, 80).unwrap();
        stream.seek(SeekFrom::Start(21)).unwrap();
        let mut buf = [0u8; 30];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &plain[21..51]);

        stream.seek(SeekFrom::Current(-40)).unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &plain[11..14]);
    }

    #[test]
    fn respects_base_offset_of_inner_stream() {
        let plain = sample(40);
        let mut file = vec![0xAA; 7];
        file.extend(reference(&KEY, &IV, &plain));

        let mut cur = Cursor::new(file);
        cur.seek(SeekFrom::Start(7)).unwrap();
        let mut stream = CtrStream::open(cur, &KEY, &IV, 40).unwrap();

        stream.seek(SeekFrom::Start(16)).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, &plain[16..]);
    }

    #[test]
    fn new_takes_offset_zero_from_inner_position() {
        let plain = sample(32);
        let mut file = vec![0xAA; 7];
        file.extend(reference(&KEY, &IV, &plain));

        let mut cur = Cursor::new(file);
        cur.seek(SeekFrom::Start(7)).unwrap();
        let mut stream = CtrStream::new(cur, &KEY, &IV);

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &plain[..5]);

        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &plain[..4]);

        assert_eq!(stream.seek(SeekFrom::End(-2)).unwrap(), 30);
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &plain[30..]);
        assert_eq!(stream.get_ref().position(), 7 + 32);
    }

    #[test]
    fn failed_seek_leaves_stream_usable() {
        let plain = sample(32);
        let mut file = vec![0xAA; 3];
        file.extend(reference(&KEY, &IV, &plain));

        let mut cur = Cursor::new(file);
        cur.seek(SeekFrom::Start(3)).unwrap();
        let mut stream = CtrStream::new(cur, &KEY, &IV);

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();

        let err = stream.seek(SeekFrom::Current(-100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err = stream.seek(SeekFrom::End(-100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(stream.position(), 4);
        assert_eq!(stream.get_ref().position(), 3 + 4);

        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &plain[4..8]);
    }

    #[test]
    fn reads_stop_at_declared_length() {
        let plain = sample(64);
        let cipher = reference(&KEY, &IV, &plain);

        let mut stream = CtrStream::open(Cursor::new(cipher), &KEY, &IV, 20).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, &plain[..20]);
    }

    #[test]
    fn seek_past_declared_length_fails() {
        let mut stream = CtrStream::open(Cursor::new(vec![0u8; 64]), &KEY, &IV, 32).unwrap();
        assert!(stream.seek(SeekFrom::Start(32)).is_ok());
        let err = stream.seek(SeekFrom::Start(33)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err = stream.seek(SeekFrom::Current(-40)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn write_past_declared_length_fails() {
        let mut stream = CtrStream::new(Vec::new(), &KEY, &IV).with_length(8);
        stream.write_all(&[1, 2, 3, 4]).unwrap();
        let err = stream.write(&[0u8; 5]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert_eq!(stream.position(), 4);
    }

    proptest! {
        #[test]
        fn chunked_roundtrip_with_seeks(
            plain in proptest::collection::vec(any::<u8>(), 0..300),
            write_chunks in proptest::collection::vec(1usize..40, 1..20),
            read_chunks in proptest::collection::vec(1usize..40, 1..20),
            seek_to in 0usize..300,
        ) {
            let mut writer = CtrStream::new(Vec::new(), &KEY, &IV);
            let mut offset = 0usize;
            let mut chunks = write_chunks.iter().cycle();
            while offset < plain.len() {
                let n = std::cmp::min(*chunks.next().unwrap(), plain.len() - offset);
                writer.write_all(&plain[offset..offset + n]).unwrap();
                offset += n;
            }
            let cipher = writer.into_inner();
            prop_assert_eq!(&cipher, &reference(&KEY, &IV, &plain));

            let len = plain.len() as u64;
            let mut reader = CtrStream::open(Cursor::new(cipher), &KEY, &IV, len).unwrap();
            let mut out = Vec::new();
            let mut chunks = read_chunks.iter().cycle();
            loop {
                let mut buf = vec![0u8; *chunks.next().unwrap()];
                let n = reader.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            prop_assert_eq!(&out, &plain);

            let start = std::cmp::min(seek_to, plain.len());
            reader.seek(SeekFrom::Start(start as u64)).unwrap();
            let mut tail = Vec::new();
            reader.read_to_end(&mut tail).unwrap();
            prop_assert_eq!(&tail[..], &plain[start..]);
        }
    }
}
