//! Cryptography used to keep the signing key encrypted at rest: the
//! password-bound credential cipher and the hashing helpers it is built on.

pub mod cipher;
pub mod integrity;

pub use cipher::{is_ciphertext, CipherError, CredentialCipher, KdfParams};
