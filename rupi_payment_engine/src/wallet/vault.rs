//! Signing-key vault.
//!
//! Chain signing keys are stored encrypted in the `chains` table as `salt:iv:ciphertext` (all hex). A legacy
//! two-part `iv:ciphertext` form with a fixed salt is still readable. The key-derivation password comes from the
//! process environment and must be at least 32 characters; derivation is scrypt (memory-hard) to a 32-byte key,
//! and the cipher is AES-256-CBC with PKCS7 padding.
//!
//! The decrypted content is either the raw hex signing key, or `ENV:<NAME>` to pull the actual key from the process
//! environment. Plaintext keys exist only in memory, wrapped in [`Secret`].
use std::env;

use aes::Aes256;
use cbc::{
    cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit},
    Decryptor,
};
use rpg_common::Secret;
use scrypt::{scrypt, Params};

use crate::traits::WalletError;

type Aes256CbcDec = Decryptor<Aes256>;

/// Minimum length of the key-derivation password.
pub const MIN_PASSWORD_LEN: usize = 32;

/// Salt used by blobs from before salts were stored per key.
const LEGACY_SALT: &[u8] = b"rupi-legacy-key-salt";

/// Decrypt an encrypted signing-key blob, resolving `ENV:` indirection.
pub fn decrypt_signing_key(blob: &str, password: &Secret<String>) -> Result<Secret<String>, WalletError> {
    if password.reveal().len() < MIN_PASSWORD_LEN {
        return Err(WalletError::Key(format!(
            "Key-derivation password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let parts: Vec<&str> = blob.split(':').collect();
    let (salt, iv_hex, ct_hex) = match parts.as_slice() {
        [salt_hex, iv, ct] => {
            let salt = hex::decode(salt_hex).map_err(|_| WalletError::Key("Salt is not valid hex".into()))?;
            (salt, *iv, *ct)
        },
        [iv, ct] => (LEGACY_SALT.to_vec(), *iv, *ct),
        _ => return Err(WalletError::Key("Encrypted key blob must be salt:iv:ciphertext or iv:ciphertext".into())),
    };
    let iv = hex::decode(iv_hex).map_err(|_| WalletError::Key("IV is not valid hex".into()))?;
    let ciphertext = hex::decode(ct_hex).map_err(|_| WalletError::Key("Ciphertext is not valid hex".into()))?;

    let mut key = [0u8; 32];
    let params = Params::new(15, 8, 1, 32).map_err(|e| WalletError::Key(format!("Bad scrypt parameters: {e}")))?;
    scrypt(password.reveal().as_bytes(), &salt, &params, &mut key)
        .map_err(|e| WalletError::Key(format!("Key derivation failed: {e}")))?;

    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| WalletError::Key(format!("Cipher initialisation failed: {e}")))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| WalletError::Key("Decryption failed (wrong password or corrupted blob)".into()))?;
    let decoded =
        String::from_utf8(plaintext).map_err(|_| WalletError::Key("Decrypted key is not valid UTF-8".into()))?;

    resolve_env_indirection(decoded.trim())
}

fn resolve_env_indirection(content: &str) -> Result<Secret<String>, WalletError> {
    let key = match content.strip_prefix("ENV:") {
        Some(var_name) => env::var(var_name)
            .map_err(|_| WalletError::Key(format!("Environment variable {var_name} is not set")))?,
        None => content.to_string(),
    };
    let stripped = key.strip_prefix("0x").unwrap_or(&key);
    if stripped.len() != 64 || !stripped.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(WalletError::Key("Signing key must be 32 bytes of hex".into()));
    }
    Ok(Secret::new(stripped.to_string()))
}

#[cfg(test)]
mod test {
    use aes::cipher::BlockEncryptMut;
    use cbc::Encryptor;
    use rand::RngCore;

    use super::*;

    type Aes256CbcEnc = Encryptor<Aes256>;

    fn password() -> Secret<String> {
        Secret::new("correct-horse-battery-staple-0123456789".to_string())
    }

    fn encrypt_blob(plaintext: &str, password: &Secret<String>, with_salt: bool) -> String {
        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);
        if with_salt {
            rand::thread_rng().fill_bytes(&mut salt);
        }
        let salt_bytes: &[u8] = if with_salt { &salt } else { LEGACY_SALT };
        let mut key = [0u8; 32];
        let params = Params::new(15, 8, 1, 32).unwrap();
        scrypt(password.reveal().as_bytes(), salt_bytes, &params, &mut key).unwrap();
        let cipher = Aes256CbcEnc::new_from_slices(&key, &iv).unwrap();
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        if with_salt {
            format!("{}:{}:{}", hex::encode(salt), hex::encode(iv), hex::encode(ciphertext))
        } else {
            format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
        }
    }

    const RAW_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn roundtrip_with_salt() {
        let blob = encrypt_blob(RAW_KEY, &password(), true);
        let key = decrypt_signing_key(&blob, &password()).unwrap();
        assert_eq!(key.reveal(), RAW_KEY);
    }

    #[test]
    fn roundtrip_legacy_format() {
        let blob = encrypt_blob(RAW_KEY, &password(), false);
        let key = decrypt_signing_key(&blob, &password()).unwrap();
        assert_eq!(key.reveal(), RAW_KEY);
    }

    #[test]
    fn wrong_password_fails() {
        let blob = encrypt_blob(RAW_KEY, &password(), true);
        let wrong = Secret::new("wrong-password-that-is-long-enough-000000".to_string());
        assert!(decrypt_signing_key(&blob, &wrong).is_err());
    }

    #[test]
    fn short_password_is_refused() {
        let blob = encrypt_blob(RAW_KEY, &password(), true);
        let short = Secret::new("too-short".to_string());
        let err = decrypt_signing_key(&blob, &short).unwrap_err();
        assert!(matches!(err, WalletError::Key(_)));
    }

    #[test]
    fn env_indirection_resolves() {
        env::set_var("TEST_VAULT_SIGNING_KEY", RAW_KEY);
        let blob = encrypt_blob("ENV:TEST_VAULT_SIGNING_KEY", &password(), true);
        let key = decrypt_signing_key(&blob, &password()).unwrap();
        assert_eq!(key.reveal(), RAW_KEY);
    }

    #[test]
    fn non_hex_key_content_is_rejected() {
        let blob = encrypt_blob("not-a-key", &password(), true);
        assert!(decrypt_signing_key(&blob, &password()).is_err());
    }
}
