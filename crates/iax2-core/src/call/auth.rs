//! Authentication helpers shared by the calling and the called side

use md5::{Digest, Md5};
use rand::Rng;

use crate::ie::{AUTH_MD5, AUTH_PLAINTEXT};

/// How to answer an `AuthReq`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChoice {
    Md5,
    Plaintext,
    /// Only RSA was offered, which this stack does not implement
    Unsupported,
}

/// Pick the method for answering an `AuthReq` advertising `methods`
pub fn select_method(methods: u16) -> AuthChoice {
    if methods & AUTH_MD5 != 0 {
        AuthChoice::Md5
    } else if methods & AUTH_PLAINTEXT != 0 {
        AuthChoice::Plaintext
    } else {
        // RSA alone, or nothing usable
        AuthChoice::Unsupported
    }
}

/// Lowercase hex MD5 of challenge followed by password
pub fn md5_response(challenge: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(challenge.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random nine digit challenge
pub fn generate_challenge() -> String {
    rand::thread_rng().gen_range(100_000_000u32..1_000_000_000).to_string()
}

/// Check an `AuthRep` against our password
pub fn verify_response(
    challenge: &str,
    password: &str,
    md5_result: Option<&str>,
    plaintext: Option<&str>,
) -> bool {
    if let Some(result) = md5_result {
        return result.eq_ignore_ascii_case(&md5_response(challenge, password));
    }
    plaintext == Some(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie::AUTH_RSA;

    #[test]
    fn test_md5_response_known_value() {
        // md5("") is well known; the response is plain hex of challenge||password
        assert_eq!(md5_response("", ""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_response("abc", ""), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_response("a", "bc"), md5_response("ab", "c"));
    }

    #[test]
    fn test_method_selection() {
        assert_eq!(select_method(AUTH_MD5 | AUTH_PLAINTEXT), AuthChoice::Md5);
        assert_eq!(select_method(AUTH_RSA | AUTH_MD5), AuthChoice::Md5);
        assert_eq!(select_method(AUTH_PLAINTEXT), AuthChoice::Plaintext);
        assert_eq!(select_method(AUTH_RSA), AuthChoice::Unsupported);
        assert_eq!(select_method(0), AuthChoice::Unsupported);
    }

    #[test]
    fn test_verify_response() {
        let challenge = generate_challenge();
        assert_eq!(challenge.len(), 9);
        let good = md5_response(&challenge, "pw");
        assert!(verify_response(&challenge, "pw", Some(&good), None));
        assert!(verify_response(&challenge, "pw", Some(&good.to_uppercase()), None));
        assert!(!verify_response(&challenge, "other", Some(&good), None));
        assert!(verify_response(&challenge, "pw", None, Some("pw")));
        assert!(!verify_response(&challenge, "pw", None, Some("nope")));
        assert!(!verify_response(&challenge, "pw", None, None));
    }
}
