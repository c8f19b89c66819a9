//! Random code generation for email verification.

use rand::Rng;

/// Length of a verification code.
pub const VERIFICATION_CODE_LEN: usize = 6;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a verification code from the thread-local RNG.
pub fn generate_verification_code() -> String {
    generate_code_with(&mut rand::thread_rng(), VERIFICATION_CODE_LEN)
}

/// Generates `len` characters drawn uniformly from `A-Z0-9`.
pub fn generate_code_with<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Whether `code` has the shape of a verification code.
pub fn is_verification_code(code: &str) -> bool {
    code.len() == VERIFICATION_CODE_LEN && code.bytes().all(|b| ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_generate_verification_code_shape() {
        for _ in 0..100 {
            let code = generate_verification_code();
            assert!(is_verification_code(&code), "bad code {code}");
        }
    }

    #[test]
    fn test_generate_code_with_seed_is_deterministic() {
        let a = generate_code_with(&mut StdRng::seed_from_u64(7), 12);
        let b = generate_code_with(&mut StdRng::seed_from_u64(7), 12);
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_generate_code_uses_whole_alphabet() {
        let mut rng = StdRng::seed_from_u64(42);
        let sample = generate_code_with(&mut rng, 5000);
        for &c in ALPHABET {
            assert!(sample.contains(c as char), "missing {}", c as char);
        }
    }

    #[test]
    fn test_is_verification_code() {
        assert!(is_verification_code("AB12CD"));
        assert!(!is_verification_code("ab12cd"));
        assert!(!is_verification_code("AB12C"));
        assert!(!is_verification_code("AB-2CD"));
    }
}
