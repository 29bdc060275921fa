//! Payload encryption
//!
//! IAX2 encrypts everything after a short cleartext prefix (4 bytes for full
//! frames and video mini frames, 2 for audio mini frames) with AES-128 in a
//! zero-IV chained mode. The key is `MD5(challenge || password)`, the challenge
//! being the one exchanged in `AuthReq`.
//!
//! Before encryption 16 to 31 bytes of random padding are prepended so the
//! payload fills whole blocks. The low nibble of byte 15 records how much
//! padding beyond the first 16 bytes was added.

use std::fmt;

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use rand::RngCore;

use crate::error::CryptoError;
use crate::frame::FrameKind;

const BLOCK: usize = 16;

/// Per-call encryption state
#[derive(Clone, Default)]
pub struct Iax2Encryption {
    cipher: Option<Aes128>,
    enabled: bool,
}

impl fmt::Debug for Iax2Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iax2Encryption")
            .field("has_key", &self.cipher.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Iax2Encryption {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the AES key from the authentication challenge and the shared password.
    ///
    /// The key is fixed once set; later calls are ignored.
    pub fn set_challenge_and_password(&mut self, challenge: &str, password: &str) {
        if self.cipher.is_some() {
            return;
        }
        let mut hasher = Md5::new();
        hasher.update(challenge.as_bytes());
        hasher.update(password.as_bytes());
        let key = hasher.finalize();
        self.cipher = Some(Aes128::new(&key));
    }

    pub fn has_key(&self) -> bool {
        self.cipher.is_some()
    }

    /// Start encrypting; fails when no key was derived
    pub fn enable(&mut self) -> Result<(), CryptoError> {
        if self.cipher.is_none() {
            return Err(CryptoError::NoKey);
        }
        self.enabled = true;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn cipher(&self) -> Result<&Aes128, CryptoError> {
        self.cipher.as_ref().ok_or(CryptoError::NoKey)
    }

    /// Encrypt a whole datagram, leaving the cleartext prefix for `kind` intact
    pub fn encrypt(&self, datagram: &[u8], kind: FrameKind) -> Result<Bytes, CryptoError> {
        let header = kind.cleartext_len().min(datagram.len());
        let cipher = self.cipher()?;
        let body = encrypt_payload(cipher, &datagram[header..]);
        let mut out = BytesMut::with_capacity(header + body.len());
        out.extend_from_slice(&datagram[..header]);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }

    /// Decrypt a whole datagram, leaving the cleartext prefix for `kind` intact
    pub fn decrypt(&self, datagram: &[u8], kind: FrameKind) -> Result<Bytes, CryptoError> {
        let header = kind.cleartext_len();
        if datagram.len() < header + BLOCK {
            return Err(CryptoError::TooShort {
                required: header + BLOCK,
                available: datagram.len(),
            });
        }
        let region = &datagram[header..];
        if region.len() % BLOCK != 0 {
            return Err(CryptoError::NotBlockAligned(region.len()));
        }
        let cipher = self.cipher()?;
        let body = decrypt_payload(cipher, region)?;
        let mut out = BytesMut::with_capacity(header + body.len());
        out.extend_from_slice(&datagram[..header]);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }
}

fn encrypt_payload(cipher: &Aes128, plain: &[u8]) -> Vec<u8> {
    let padding = BLOCK + ((BLOCK - plain.len() % BLOCK) & 0x0F);
    let mut buf = vec![0u8; padding + plain.len()];
    rand::thread_rng().fill_bytes(&mut buf[..padding]);
    buf[15] = (buf[15] & 0xF0) | (padding as u8 & 0x0F);
    buf[padding..].copy_from_slice(plain);

    let mut last = [0u8; BLOCK];
    for chunk in buf.chunks_exact_mut(BLOCK) {
        for (b, l) in chunk.iter_mut().zip(last.iter()) {
            *b ^= l;
        }
        let block = GenericArray::from_mut_slice(chunk);
        cipher.encrypt_block(block);
        last.copy_from_slice(chunk);
    }
    buf
}

fn decrypt_payload(cipher: &Aes128, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = data.to_vec();
    let mut last = [0u8; BLOCK];
    for chunk in out.chunks_exact_mut(BLOCK) {
        let mut this_cipher = [0u8; BLOCK];
        this_cipher.copy_from_slice(chunk);
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        for (b, l) in chunk.iter_mut().zip(last.iter()) {
            *b ^= l;
        }
        last = this_cipher;
    }

    let padding = BLOCK + (out[15] & 0x0F) as usize;
    if padding > out.len() {
        return Err(CryptoError::BadPadding(padding));
    }
    Ok(out.split_off(padding))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> Iax2Encryption {
        let mut enc = Iax2Encryption::new();
        enc.set_challenge_and_password("214365879", "secret");
        enc.enable().unwrap();
        enc
    }

    #[test]
    fn test_round_trip_lengths() {
        let enc = keyed();
        for len in [0usize, 1, 15, 16, 17, 1000] {
            let mut datagram = vec![0x80, 0x01, 0x00, 0x02];
            datagram.extend((0..len).map(|i| i as u8));
            let sealed = enc.encrypt(&datagram, FrameKind::Full).unwrap();
            assert_eq!(&sealed[..4], &datagram[..4], "prefix untouched for len {}", len);
            assert_eq!((sealed.len() - 4) % 16, 0);
            assert!(sealed.len() >= datagram.len() + 16);
            let opened = enc.decrypt(&sealed, FrameKind::Full).unwrap();
            assert_eq!(opened.as_ref(), datagram.as_slice(), "len {}", len);
        }
    }

    #[test]
    fn test_mini_frame_prefix() {
        let enc = keyed();
        let datagram = [0x00, 0x07, 0x12, 0x34, 9, 9, 9];
        let sealed = enc.encrypt(&datagram, FrameKind::Mini).unwrap();
        assert_eq!(&sealed[..2], &datagram[..2]);
        assert_eq!(enc.decrypt(&sealed, FrameKind::Mini).unwrap().as_ref(), &datagram);
    }

    #[test]
    fn test_same_key_from_same_inputs() {
        let a = keyed();
        let b = keyed();
        let datagram = [0x80, 1, 0, 2, 1, 2, 3];
        let sealed = a.encrypt(&datagram, FrameKind::Full).unwrap();
        assert_eq!(b.decrypt(&sealed, FrameKind::Full).unwrap().as_ref(), &datagram);

        let mut other = Iax2Encryption::new();
        other.set_challenge_and_password("214365879", "wrong");
        let garbled = other.decrypt(&sealed, FrameKind::Full);
        assert!(garbled.map_or(true, |d| d.as_ref() != datagram));
    }

    #[test]
    fn test_rejects_malformed_ciphertext() {
        let enc = keyed();
        assert_eq!(
            enc.decrypt(&[0u8; 4 + 17], FrameKind::Full),
            Err(CryptoError::NotBlockAligned(17))
        );
        assert_eq!(
            enc.decrypt(&[0u8; 10], FrameKind::Full),
            Err(CryptoError::TooShort { required: 20, available: 10 })
        );
    }

    #[test]
    fn test_enable_requires_key() {
        let mut enc = Iax2Encryption::new();
        assert_eq!(enc.enable(), Err(CryptoError::NoKey));
        assert!(!enc.is_enabled());
        assert!(enc.encrypt(&[0; 8], FrameKind::Full).is_err());
    }
}
