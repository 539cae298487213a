// RTMP handshake: the three-message C0/C1/C2 <-> S0/S1/S2 exchange that
// precedes the chunk stream, plus the obfuscated (RC4) variant used by
// older FMLE-style clients.

use std::pin::Pin;
use std::sync::LazyLock;
use std::task::{Context, Poll};

use hmac::{Hmac, Mac};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::{Result, RtmpError};
use crate::log::Logger;
use crate::log_debug;

/// Plain (unobfuscated) handshake version byte
pub const RTMP_VERSION_PLAIN: u8 = 3;

/// Obfuscated (RC4-keyed) handshake version byte
pub const RTMP_VERSION_OBFUSCATED: u8 = 6;

/// Size of a handshake signature (C1/S1 or C2/S2), in bytes
pub const RTMP_SIG_SIZE: usize = 1536;

const SHA256_DIGEST_LEN: usize = 32;
const KEY_LEN: usize = 16;

static SERVER_KEY: LazyLock<Vec<u8>> = LazyLock::new(|| {
    let mut v = b"Genuine Adobe Flash Media Server 001".to_vec();
    v.extend_from_slice(&RANDOM_CRUD);
    v
});

static CLIENT_KEY: LazyLock<Vec<u8>> = LazyLock::new(|| {
    let mut v = b"Genuine Adobe Flash Player 001".to_vec();
    v.extend_from_slice(&RANDOM_CRUD);
    v
});

const RANDOM_CRUD: [u8; 32] = [
    0xf0, 0xee, 0xc2, 0x4a, 0x80, 0x68, 0xbe, 0xe8, 0x2e, 0x00, 0xd0, 0xd1, 0x02, 0x9e, 0x7e, 0x57,
    0x6e, 0xec, 0x5d, 0x2d, 0x29, 0x80, 0x6f, 0xab, 0x93, 0xb8, 0xe6, 0x36, 0xcf, 0xeb, 0x31, 0xae,
];

/// RC4-derived keys applied to the connection after an obfuscated handshake.
/// `in_key` deciphers bytes read from the peer, `out_key` enciphers bytes
/// written to it.
#[derive(Clone)]
pub struct HandshakeKeys {
    pub in_key: Vec<u8>,
    pub out_key: Vec<u8>,
}

/// Outcome of a completed handshake
pub struct HandshakeResult {
    /// Present only when the obfuscated variant (version 6) was negotiated
    pub keys: Option<HandshakeKeys>,
}

fn calc_hmac(message: &[u8], key: &[u8]) -> [u8; SHA256_DIGEST_LEN] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts a key of any size");
    mac.update(message);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; SHA256_DIGEST_LEN];
    out.copy_from_slice(&result);
    out
}

/// The FMS digest offset is derived from the sum of 4 bytes at a fixed
/// location in C1, modulo the span available for the digest itself.
fn digest_offset(block: &[u8], base: usize, mod_len: usize) -> usize {
    let sum: u32 = block.iter().map(|b| *b as u32).sum();
    base + (sum as usize % mod_len)
}

fn random_signature() -> Vec<u8> {
    let mut bytes = vec![0u8; RTMP_SIG_SIZE - 8];
    StdRng::from_os_rng().fill_bytes(&mut bytes);
    let mut out = vec![0, 0, 0, 0, 1, 2, 3, 4];
    out.extend(bytes);
    out
}

/// Derives the RC4 (in, out) key pair for the obfuscated variant from the
/// already-exchanged C1 and S1 signatures.
fn derive_rc4_keys(c1: &[u8], s1: &[u8]) -> Result<HandshakeKeys> {
    if c1.len() < RTMP_SIG_SIZE || s1.len() < RTMP_SIG_SIZE {
        return Err(RtmpError::HandshakeFailed(
            "signature too small to derive obfuscation keys".to_string(),
        ));
    }

    let c1_off = digest_offset(&c1[772..776], 776, RTMP_SIG_SIZE - 776 - SHA256_DIGEST_LEN);
    let s1_off = digest_offset(&s1[772..776], 776, RTMP_SIG_SIZE - 776 - SHA256_DIGEST_LEN);

    let c1_digest = &c1[c1_off..c1_off + SHA256_DIGEST_LEN];
    let s1_digest = &s1[s1_off..s1_off + SHA256_DIGEST_LEN];

    let out_key_full = calc_hmac(c1_digest, &CLIENT_KEY);
    let in_key_full = calc_hmac(s1_digest, &SERVER_KEY);

    Ok(HandshakeKeys {
        in_key: in_key_full[..KEY_LEN].to_vec(),
        out_key: out_key_full[..KEY_LEN].to_vec(),
    })
}

/// Performs the server side of the handshake: read C0+C1, send S0+S1+S2,
/// read C2. The server always echoes back the version the client requested
/// in C0, so an obfuscated (version 6) client gets an obfuscated S0.
pub async fn do_server_handshake<S>(stream: &mut S, logger: &Logger) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut c0 = [0u8; 1];
    stream.read_exact(&mut c0).await?;

    let version = c0[0];
    if version != RTMP_VERSION_PLAIN && version != RTMP_VERSION_OBFUSCATED {
        return Err(RtmpError::UnsupportedVersion(version));
    }

    let mut c1 = vec![0u8; RTMP_SIG_SIZE];
    stream.read_exact(&mut c1).await?;

    log_debug!(logger, format!("received C0/C1, version={}", version));

    let s1 = random_signature();

    let mut s0s1s2 = Vec::with_capacity(1 + RTMP_SIG_SIZE * 2);
    s0s1s2.push(version);
    s0s1s2.extend_from_slice(&s1);
    s0s1s2.extend_from_slice(&c1);
    stream.write_all(&s0s1s2).await?;
    stream.flush().await?;

    let mut c2 = vec![0u8; RTMP_SIG_SIZE];
    stream.read_exact(&mut c2).await?;

    log_debug!(logger, "handshake complete (server)");

    let keys = if version == RTMP_VERSION_OBFUSCATED {
        Some(derive_rc4_keys(&c1, &s1)?)
    } else {
        None
    };

    Ok(HandshakeResult { keys })
}

/// Performs the client side of the handshake: write C0+C1, read S0+S1+S2,
/// write C2. `obfuscated` requests the RC4-keyed variant (version 6).
pub async fn do_client_handshake<S>(stream: &mut S, logger: &Logger, obfuscated: bool) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let c1 = random_signature();
    let requested_version = if obfuscated { RTMP_VERSION_OBFUSCATED } else { RTMP_VERSION_PLAIN };

    let mut c0c1 = Vec::with_capacity(1 + RTMP_SIG_SIZE);
    c0c1.push(requested_version);
    c0c1.extend_from_slice(&c1);
    stream.write_all(&c0c1).await?;
    stream.flush().await?;

    let mut s0 = [0u8; 1];
    stream.read_exact(&mut s0).await?;
    let version = s0[0];
    if version != RTMP_VERSION_PLAIN && version != RTMP_VERSION_OBFUSCATED {
        return Err(RtmpError::UnsupportedVersion(version));
    }

    let mut s1 = vec![0u8; RTMP_SIG_SIZE];
    stream.read_exact(&mut s1).await?;

    let mut s2 = vec![0u8; RTMP_SIG_SIZE];
    stream.read_exact(&mut s2).await?;

    log_debug!(logger, format!("received S0/S1/S2, version={}", version));

    stream.write_all(&s1).await?;
    stream.flush().await?;

    log_debug!(logger, "handshake complete (client)");

    let keys = if version == RTMP_VERSION_OBFUSCATED {
        Some(derive_rc4_keys(&c1, &s1)?)
    } else {
        None
    };

    Ok(HandshakeResult { keys })
}

/// A minimal RC4 stream cipher, used only to encipher/decipher the
/// connection after an obfuscated handshake negotiates a key pair.
pub struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Rc4 {
        let mut state = [0u8; 256];
        for (idx, s) in state.iter_mut().enumerate() {
            *s = idx as u8;
        }

        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Rc4 { state, i: 0, j: 0 }
    }

    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let k = self.state[(self.state[self.i as usize].wrapping_add(self.state[self.j as usize])) as usize];
            *byte ^= k;
        }
    }
}

/// Wraps a transport in the RC4 obfuscation negotiated by a version-6
/// handshake. Constructed with `keys: None`, it passes bytes through
/// unchanged, so every connection can be wrapped unconditionally regardless
/// of which variant was negotiated.
pub struct Rc4Stream<S> {
    inner: S,
    read_cipher: Option<Rc4>,
    write_cipher: Option<Rc4>,
    /// Enciphered bytes accepted from the caller but not yet handed to `inner`
    write_buf: Vec<u8>,
    write_pos: usize,
}

impl<S> Rc4Stream<S> {
    pub fn new(inner: S, keys: Option<HandshakeKeys>) -> Rc4Stream<S> {
        let (read_cipher, write_cipher) = match keys {
            Some(k) => (Some(Rc4::new(&k.in_key)), Some(Rc4::new(&k.out_key))),
            None => (None, None),
        };
        Rc4Stream { inner, read_cipher, write_cipher, write_buf: Vec::new(), write_pos: 0 }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// Drains as much of `write_buf[*write_pos..]` into `inner` as it will
/// accept without blocking. Never re-enciphers: bytes are only ever
/// encrypted once, when first accepted by `poll_write`.
fn drain_write_buf<S: AsyncWrite + Unpin>(
    inner: &mut S,
    write_buf: &mut Vec<u8>,
    write_pos: &mut usize,
    cx: &mut Context<'_>,
) -> Poll<std::io::Result<()>> {
    while *write_pos < write_buf.len() {
        match Pin::new(&mut *inner).poll_write(cx, &write_buf[*write_pos..]) {
            Poll::Ready(Ok(0)) => {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write obfuscated stream",
                )))
            }
            Poll::Ready(Ok(n)) => *write_pos += n,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }
    }
    write_buf.clear();
    *write_pos = 0;
    Poll::Ready(Ok(()))
}

impl<S: AsyncRead + Unpin> AsyncRead for Rc4Stream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            if let Some(cipher) = &mut this.read_cipher {
                cipher.apply_keystream(&mut buf.filled_mut()[before..]);
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rc4Stream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        let Some(cipher) = this.write_cipher.as_mut() else {
            return Pin::new(&mut this.inner).poll_write(cx, buf);
        };

        let mut enciphered = buf.to_vec();
        cipher.apply_keystream(&mut enciphered);
        this.write_buf.extend_from_slice(&enciphered);

        match drain_write_buf(&mut this.inner, &mut this.write_buf, &mut this.write_pos, cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            _ => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match drain_write_buf(&mut this.inner, &mut this.write_buf, &mut this.write_pos, cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match drain_write_buf(&mut this.inner, &mut this.write_buf, &mut this.write_pos, cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_shutdown(cx),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogConfig;

    #[tokio::test]
    async fn test_plain_handshake_round_trip() {
        let (mut client_io, mut server_io) = tokio::io::duplex(1 << 16);
        let logger = Logger::new(LogConfig::default());

        let server = tokio::spawn(async move {
            do_server_handshake(&mut server_io, &logger).await.unwrap()
        });

        let logger2 = Logger::new(LogConfig::default());
        let client_result = do_client_handshake(&mut client_io, &logger2, false).await.unwrap();
        let server_result = server.await.unwrap();

        assert!(client_result.keys.is_none());
        assert!(server_result.keys.is_none());
    }

    #[tokio::test]
    async fn test_obfuscated_handshake_derives_matching_keys() {
        let (mut client_io, mut server_io) = tokio::io::duplex(1 << 16);
        let logger = Logger::new(LogConfig::default());

        let server = tokio::spawn(async move {
            do_server_handshake(&mut server_io, &logger).await.unwrap()
        });

        let logger2 = Logger::new(LogConfig::default());
        let client_result = do_client_handshake(&mut client_io, &logger2, true).await.unwrap();
        let server_result = server.await.unwrap();

        let client_keys = client_result.keys.expect("client negotiated obfuscation");
        let server_keys = server_result.keys.expect("server negotiated obfuscation");

        // Each side's outbound key must match the other's inbound key.
        assert_eq!(client_keys.out_key, server_keys.in_key);
        assert_eq!(server_keys.out_key, client_keys.in_key);
    }

    #[tokio::test]
    async fn test_rc4_stream_round_trips_obfuscated_traffic() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);

        let client_keys = HandshakeKeys { in_key: vec![1u8; KEY_LEN], out_key: vec![2u8; KEY_LEN] };
        let server_keys = HandshakeKeys { in_key: vec![2u8; KEY_LEN], out_key: vec![1u8; KEY_LEN] };

        let mut client = Rc4Stream::new(client_io, Some(client_keys));
        let mut server = Rc4Stream::new(server_io, Some(server_keys));

        client.write_all(b"hello server").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 12];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello server");

        server.write_all(b"hello client").await.unwrap();
        server.flush().await.unwrap();
        let mut buf2 = [0u8; 12];
        client.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"hello client");
    }

    #[tokio::test]
    async fn test_rc4_stream_passthrough_without_keys() {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let mut client = Rc4Stream::new(client_io, None);
        let mut server = Rc4Stream::new(server_io, None);

        client.write_all(b"plaintext").await.unwrap();
        client.flush().await.unwrap();
        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"plaintext");
    }

    #[test]
    fn test_rc4_encrypt_decrypt_round_trip() {
        let key = b"0123456789abcdef";
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let mut enc = Rc4::new(key);
        let mut ciphertext = plaintext.to_vec();
        enc.apply_keystream(&mut ciphertext);
        assert_ne!(&ciphertext[..], &plaintext[..]);

        let mut dec = Rc4::new(key);
        let mut decoded = ciphertext.clone();
        dec.apply_keystream(&mut decoded);
        assert_eq!(&decoded[..], &plaintext[..]);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        assert!(matches!(
            RtmpError::UnsupportedVersion(9),
            RtmpError::UnsupportedVersion(9)
        ));
    }
}
