//! AEAD-framed duplex stream.
//!
//! Wire format, per direction:
//!
//! ```text
//! [salt][seal(len BE u16)][seal(payload)][seal(len)][seal(payload)]...
//! ```
//!
//! The write side sends its salt lazily with the first chunk; the read side
//! waits for the peer's salt before opening anything. Both directions keep
//! their own subkey and nonce counter.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::cipher::{CipherKind, MAX_PAYLOAD, SessionCipher, TAG_LEN};

const READ_BUF_SIZE: usize = 16 * 1024;

/// Encrypts on write, decrypts on read.
///
/// Owns the wrapped stream; dropping it closes the underlying connection.
pub struct EncryptedStream<S> {
    inner: S,
    kind: CipherKind,
    key: Arc<[u8]>,
    reader: ReadState,
    writer: WriteState,
}

#[derive(Default)]
struct ReadState {
    cipher: Option<SessionCipher>,
    incoming: BytesMut,
    plaintext: Bytes,
    pending_len: Option<usize>,
    eof: bool,
}

#[derive(Default)]
struct WriteState {
    cipher: Option<SessionCipher>,
    outgoing: BytesMut,
}

impl<S> EncryptedStream<S> {
    pub(crate) fn new(inner: S, kind: CipherKind, key: Arc<[u8]>) -> Self {
        Self {
            inner,
            kind,
            key,
            reader: ReadState::default(),
            writer: WriteState::default(),
        }
    }

    /// Cipher used in both directions.
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Shared reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Mutable reference to the wrapped stream. Writing to it directly
    /// corrupts the framing.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwrap the raw stream. Buffered but unflushed ciphertext is lost.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: fmt::Debug> fmt::Debug for EncryptedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedStream")
            .field("inner", &self.inner)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ReadState {
    /// Try to open one chunk from `incoming`. Returns `false` when more
    /// ciphertext is needed.
    fn decode_chunk(&mut self, kind: CipherKind, key: &[u8]) -> io::Result<bool> {
        if self.cipher.is_none() {
            let salt_len = kind.salt_len();
            if self.incoming.len() < salt_len {
                return Ok(false);
            }
            let salt = self.incoming.split_to(salt_len);
            self.cipher = Some(SessionCipher::new(kind, key, &salt)?);
        }
        let Some(cipher) = self.cipher.as_mut() else {
            return Ok(false);
        };

        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if self.incoming.len() < 2 + TAG_LEN {
                    return Ok(false);
                }
                let sealed = self.incoming.split_to(2 + TAG_LEN);
                let header = cipher.open(&sealed)?;
                let len = usize::from(u16::from_be_bytes([header[0], header[1]]));
                if len > MAX_PAYLOAD {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("chunk length {len} exceeds {MAX_PAYLOAD}"),
                    ));
                }
                self.pending_len = Some(len);
                len
            }
        };

        if self.incoming.len() < len + TAG_LEN {
            return Ok(false);
        }
        let sealed = self.incoming.split_to(len + TAG_LEN);
        let payload = cipher.open(&sealed)?;
        self.pending_len = None;
        self.plaintext = Bytes::from(payload);
        Ok(true)
    }

    fn is_idle(&self) -> bool {
        self.incoming.is_empty() && self.pending_len.is_none()
    }
}

impl<S: AsyncWrite + Unpin> EncryptedStream<S> {
    /// Push buffered ciphertext into the inner stream.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.writer.outgoing.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.writer.outgoing))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write encrypted chunk",
                )));
            }
            self.writer.outgoing.advance(n);
        }
        Poll::Ready(Ok(()))
    }

    fn seal_chunk(&mut self, payload: &[u8]) -> io::Result<()> {
        if self.writer.cipher.is_none() {
            let mut salt = vec![0u8; self.kind.salt_len()];
            OsRng.fill_bytes(&mut salt);
            self.writer.cipher = Some(SessionCipher::new(self.kind, &self.key, &salt)?);
            self.writer.outgoing.extend_from_slice(&salt);
        }
        let Some(cipher) = self.writer.cipher.as_mut() else {
            return Ok(());
        };

        // payload.len() <= MAX_PAYLOAD, fits in u16
        let len = (payload.len() as u16).to_be_bytes();
        let sealed_len = cipher.seal(&len)?;
        let sealed_payload = cipher.seal(payload)?;
        self.writer.outgoing.reserve(sealed_len.len() + sealed_payload.len());
        self.writer.outgoing.extend_from_slice(&sealed_len);
        self.writer.outgoing.extend_from_slice(&sealed_payload);
        Ok(())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for EncryptedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.kind.is_aead() {
            return Pin::new(&mut this.inner).poll_read(cx, buf);
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            let reader = &mut this.reader;
            if !reader.plaintext.is_empty() {
                let n = buf.remaining().min(reader.plaintext.len());
                buf.put_slice(&reader.plaintext[..n]);
                reader.plaintext.advance(n);
                return Poll::Ready(Ok(()));
            }

            if reader.decode_chunk(this.kind, &this.key)? {
                continue;
            }

            if reader.eof {
                if reader.is_idle() {
                    return Poll::Ready(Ok(()));
                }
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "relay stream ended inside a chunk",
                )));
            }

            let mut scratch = [0u8; READ_BUF_SIZE];
            let mut read_buf = ReadBuf::new(&mut scratch);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
            let filled = read_buf.filled();
            if filled.is_empty() {
                this.reader.eof = true;
            } else {
                this.reader.incoming.extend_from_slice(filled);
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for EncryptedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.kind.is_aead() {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        }

        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let n = buf.len().min(MAX_PAYLOAD);
        this.seal_chunk(&buf[..n])?;

        // The chunk is accepted; whatever does not fit now goes out on the
        // next write or flush.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
