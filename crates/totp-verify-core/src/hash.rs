//! Pincode hash verification across the supported crypt formats.
//!
//! Recognizes the `$id$` prefixed crypt formats (MD5-crypt, SHA-256-crypt,
//! SHA-512-crypt, bcrypt). The `pwhash`/`bcrypt` crates do the actual
//! hashing; this module only picks which one to call and compares results
//! in constant time.

use subtle::ConstantTimeEq;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CryptFormat {
    Md5,
    Sha256,
    Sha512,
    Bcrypt,
}

fn detect_format(stored: &str) -> Result<CryptFormat, Error> {
    if stored.starts_with("$1$") {
        Ok(CryptFormat::Md5)
    } else if stored.starts_with("$5$") {
        Ok(CryptFormat::Sha256)
    } else if stored.starts_with("$6$") {
        Ok(CryptFormat::Sha512)
    } else if stored.starts_with("$2a$") || stored.starts_with("$2b$") || stored.starts_with("$2y$") {
        Ok(CryptFormat::Bcrypt)
    } else {
        Err(Error::user_pincode("Unsupported hashcode format"))
    }
}

/// Verify `candidate` against `stored`, which must be one of the supported
/// crypt formats.
pub fn verify_pincode(candidate: &str, stored: &str) -> Result<bool, Error> {
    match detect_format(stored)? {
        CryptFormat::Md5 | CryptFormat::Sha256 | CryptFormat::Sha512 => {
            Ok(pwhash::unix_crypt::verify(candidate, stored))
        }
        CryptFormat::Bcrypt => bcrypt::verify(candidate, stored)
            .map_err(|_| Error::user_pincode("Unsupported hashcode format")),
    }
}

/// Constant-time byte comparison, used wherever a secret is compared to a
/// caller-supplied value outside of the crypt-format verifiers above (which
/// already perform the comparison internally).
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_crypt_prefixes() {
        assert_eq!(detect_format("$1$abcd$rest").unwrap(), CryptFormat::Md5);
        assert_eq!(detect_format("$5$abcd$rest").unwrap(), CryptFormat::Sha256);
        assert_eq!(detect_format("$6$abcd$rest").unwrap(), CryptFormat::Sha512);
        assert_eq!(detect_format("$2b$10$rest").unwrap(), CryptFormat::Bcrypt);
    }

    #[test]
    fn junk_prefix_is_unsupported() {
        let err = verify_pincode("1234", "$junk$passthepepper$thisisclearlyjunk").unwrap_err();
        assert!(matches!(err, Error::UserPincodeError(m) if m == "Unsupported hashcode format"));
    }

    #[test]
    fn bcrypt_round_trips() {
        let hashed = bcrypt::hash("s3cr3t", 4).unwrap();
        assert!(verify_pincode("s3cr3t", &hashed).unwrap());
        assert!(!verify_pincode("wrong", &hashed).unwrap());
    }

    #[test]
    fn ct_eq_rejects_length_mismatch() {
        assert!(!ct_eq(b"abc", b"abcd"));
    }
}
