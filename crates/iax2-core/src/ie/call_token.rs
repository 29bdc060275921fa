//! Anti-spoofing call tokens
//!
//! A token is `"<unix seconds>?<hex HMAC-SHA1>"` where the MAC covers the
//! seconds and the peer's IP address. Only the endpoint that issued a token can
//! produce a matching MAC, and it stops being accepted a few seconds later.

use std::net::IpAddr;

use hmac::digest::generic_array::GenericArray;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Secret length, one SHA-1 block
pub const TOKEN_SECRET_LEN: usize = 64;

/// Seconds a token stays valid after it was issued
pub const CALL_TOKEN_MAX_AGE_SECS: i64 = 3;

/// Issues and checks call tokens with a per-process secret
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha1,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Signer with a fresh random secret
    pub fn new() -> Self {
        let mut secret = [0u8; TOKEN_SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_secret(secret)
    }

    pub fn with_secret(secret: [u8; TOKEN_SECRET_LEN]) -> Self {
        let key = GenericArray::clone_from_slice(&secret);
        Self {
            mac: <HmacSha1 as KeyInit>::new(&key),
        }
    }

    fn keyed(&self, secs: i64, peer: IpAddr) -> HmacSha1 {
        let mut mac = self.mac.clone();
        mac.update(secs.to_string().as_bytes());
        mac.update(peer.to_string().as_bytes());
        mac
    }

    fn signature(&self, secs: i64, peer: IpAddr) -> String {
        hex::encode(self.keyed(secs, peer).finalize().into_bytes())
    }

    /// Token for `peer` issued at `now` (unix seconds)
    pub fn generate_at(&self, peer: IpAddr, now: i64) -> String {
        format!("{}?{}", now, self.signature(now, peer))
    }

    /// Token for `peer` issued now
    pub fn generate(&self, peer: IpAddr) -> String {
        self.generate_at(peer, chrono::Utc::now().timestamp())
    }

    /// Check a token presented by `peer` at `now` (unix seconds)
    pub fn verify_at(&self, token: &[u8], peer: IpAddr, now: i64) -> bool {
        let Ok(token) = std::str::from_utf8(token) else {
            return false;
        };
        let Some((secs, mac)) = token.split_once('?') else {
            return false;
        };
        let Ok(secs) = secs.parse::<i64>() else {
            return false;
        };
        if secs > now || now - secs > CALL_TOKEN_MAX_AGE_SECS {
            return false;
        }
        let Ok(presented) = hex::decode(mac) else {
            return false;
        };
        // constant-time comparison
        self.keyed(secs, peer).verify_slice(&presented).is_ok()
    }

    pub fn verify(&self, token: &[u8], peer: IpAddr) -> bool {
        self.verify_at(token, peer, chrono::Utc::now().timestamp())
    }
}

impl Default for TokenSigner {
    fn default() -> Self {
        Self::new()
    }
}
