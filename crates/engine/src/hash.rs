use sha2::{Digest, Sha256};

/// Salted one-way hashing of user passwords.
#[derive(Clone, Debug)]
pub struct PasswordHasher {
    salt: String,
}

impl PasswordHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Hex encoded `sha256(salt || password)`.
    pub fn hash(&self, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify(&self, password: &str, hash: &str) -> bool {
        self.hash(password) == hash
    }
}
