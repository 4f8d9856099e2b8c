pub mod aes_gcm;
pub mod error;
pub mod hkdf;
pub mod kdf;
pub mod keys;
pub mod padding;
pub mod rand;
pub mod shamir;

pub use aes_gcm::{
    aes_gcm_decrypt, aes_gcm_encrypt, generate_nonce, AES_GCM_NONCE_LENGTH, AES_GCM_TAG_LENGTH,
    AES_KEY_LENGTH,
};
pub use error::CryptoError;
pub use hkdf::{derive_subkey, hkdf_derive};
pub use kdf::{derive_key, derive_master_key, KdfParams, MIN_SALT_LENGTH};
pub use keys::{MasterKey, SubKey, KEY_LENGTH};
pub use padding::{pad, unpad, PADDING_BLOCK_SIZE};
pub use rand::{OsRandom, RandomSource};
pub use shamir::{
    reconstruct, share_from_string, share_to_string, split, Share, MIN_THRESHOLD,
};
