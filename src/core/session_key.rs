use aes::Aes256;
use aes::cipher::{
    block_padding::Pkcs7,
    generic_array::GenericArray,
    BlockDecrypt,
    BlockDecryptMut,
    BlockEncrypt,
    BlockEncryptMut,
    KeyInit,
    KeyIvInit,
};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{
    random_bytes,
    Error,
    error::Result,
};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha1 = Hmac<Sha1>;

pub const KEY_BYTES: usize = 32;

const IV_BYTES: usize = 16;
const HMAC_RANDOM_BYTES: usize = 3;

// Symmetric session cipher negotiated by the CM encryption handshake.
// The transmitted IV is itself AES-ECB encrypted; with the HMAC variant
// its preimage authenticates the plaintext.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; KEY_BYTES],
    hmac_iv: bool,
}

impl SessionKey {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_BYTES {
            return Err(Error::Argument(format!(
                "Session key must be {} bytes, got {}", KEY_BYTES, key.len()
            )));
        }

        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(key);
        Ok(Self {
            key: bytes,
            hmac_iv: false,
        })
    }

    pub fn with_hmac_iv(mut self, enabled: bool) -> Self {
        self.hmac_iv = enabled;
        self
    }

    pub fn uses_hmac_iv(&self) -> bool {
        self.hmac_iv
    }

    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_BYTES];
        match self.hmac_iv {
            true => {
                let prefix = random_bytes(HMAC_RANDOM_BYTES);
                let digest = self.iv_mac(&prefix, plain)?;
                iv[..HMAC_RANDOM_BYTES].copy_from_slice(&prefix);
                iv[HMAC_RANDOM_BYTES..].copy_from_slice(&digest[..IV_BYTES - HMAC_RANDOM_BYTES]);
            },
            false => {
                iv.copy_from_slice(&random_bytes(IV_BYTES));
            }
        }
        self.ecb_encrypt(&mut iv)?;

        let body = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| Error::Crypto(format!("Cipher setup failed: {}", e)))?
            .encrypt_padded_vec_mut::<Pkcs7>(plain);

        let mut out = Vec::with_capacity(IV_BYTES + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        if cipher.len() < IV_BYTES * 2 || cipher.len() % IV_BYTES != 0 {
            return Err(Error::Crypto(format!(
                "Ciphertext of {} bytes is not a whole number of blocks", cipher.len()
            )));
        }

        let (iv, body) = cipher.split_at(IV_BYTES);
        let plain = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| Error::Crypto(format!("Cipher setup failed: {}", e)))?
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| Error::Crypto(format!("Bad padding in received payload")))?;

        if self.hmac_iv {
            let mut preimage = [0u8; IV_BYTES];
            preimage.copy_from_slice(iv);
            self.ecb_decrypt(&mut preimage)?;

            let digest = self.iv_mac(&preimage[..HMAC_RANDOM_BYTES], &plain)?;
            if preimage[HMAC_RANDOM_BYTES..] != digest[..IV_BYTES - HMAC_RANDOM_BYTES] {
                return Err(Error::Crypto(format!("HMAC validation failed on received payload")));
            }
        }

        Ok(plain)
    }

    fn ecb_encrypt(&self, block: &mut [u8; IV_BYTES]) -> Result<()> {
        self.block_cipher()?
            .encrypt_block(GenericArray::from_mut_slice(block));
        Ok(())
    }

    fn ecb_decrypt(&self, block: &mut [u8; IV_BYTES]) -> Result<()> {
        self.block_cipher()?
            .decrypt_block(GenericArray::from_mut_slice(block));
        Ok(())
    }

    fn block_cipher(&self) -> Result<Aes256> {
        Aes256::new_from_slice(&self.key)
            .map_err(|e| Error::Crypto(format!("Cipher setup failed: {}", e)))
    }

    // keyed with the first half of the session key only
    fn iv_mac(&self, prefix: &[u8], plain: &[u8]) -> Result<Vec<u8>> {
        let mut mac = <HmacSha1 as Mac>::new_from_slice(&self.key[..KEY_BYTES / 2])
            .map_err(|e| Error::Crypto(format!("HMAC setup failed: {}", e)))?;

        mac.update(prefix);
        mac.update(plain);
        Ok(mac.finalize().into_bytes().as_slice().to_vec())
    }
}
