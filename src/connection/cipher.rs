//! 连接级对称加密

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

/// 加解密能力
///
/// 返回 `None` 或空结果表示无法处理，调用方回退为明文。
pub trait Cipher: fmt::Debug + Send + Sync {
    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>>;

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// XChaCha20 nonce 长度
pub const NONCE_SIZE: usize = 24;

/// Poly1305 认证标签长度
pub const TAG_SIZE: usize = 16;

/// 密钥长度
pub const KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 加密，输出为 `nonce || ciphertext`
#[derive(Clone)]
pub struct XChaChaCipher {
    aead: XChaCha20Poly1305,
}

impl XChaChaCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// 随机生成密钥
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(&key)
    }
}

impl Cipher for XChaChaCipher {
    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self.aead.encrypt(XNonce::from_slice(&nonce), data).ok()?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Some(out)
    }

    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return None;
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.aead.decrypt(XNonce::from_slice(nonce), ciphertext).ok()
    }
}

impl fmt::Debug for XChaChaCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("XChaChaCipher { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = XChaChaCipher::generate();
        let sealed = cipher.encrypt(b"hello world").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 11 + TAG_SIZE);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"hello world");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = XChaChaCipher::new(&[1u8; KEY_SIZE]).encrypt(b"secret").unwrap();
        assert!(XChaChaCipher::new(&[2u8; KEY_SIZE]).decrypt(&sealed).is_none());
    }

    #[test]
    fn test_short_input_fails() {
        let cipher = XChaChaCipher::generate();
        assert!(cipher.decrypt(&[0u8; NONCE_SIZE]).is_none());
    }
}
