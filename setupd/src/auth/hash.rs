use sha2::{Digest, Sha256};

/// Digest of a user's password, salted with the user name.
/// Both parts are length-prefixed so ("ab", "c") and ("a", "bc") differ.
pub fn password_hash(name: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [name, password] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(password_hash("admin", "secret"), password_hash("admin", "secret"));
        assert_eq!(password_hash("admin", "secret").len(), 64);
    }

    #[test]
    fn test_hash_salted_by_name() {
        assert_ne!(password_hash("admin", "secret"), password_hash("root", "secret"));
        assert_ne!(password_hash("ab", "c"), password_hash("a", "bc"));
    }

    #[test]
    fn test_hash_depends_on_password() {
        assert_ne!(password_hash("admin", "secret"), password_hash("admin", "Secret"));
    }
}
