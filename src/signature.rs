use openssl::{ecdsa::EcdsaSig, error::ErrorStack, hash::MessageDigest, pkey::PKey, sign::Signer};
use thiserror::Error;

use crate::{
    base64::Base64,
    key_pair::{KeyAlgorithm, KeyPair},
};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    SigningError(#[from] ErrorStack),
    #[error("Empty HMAC key")]
    EmptyHmacKey,
}

/// 外部帳戶綁定（EAB）所使用的 HMAC 演算法。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HmacAlgorithm {
    #[default]
    Hs256,
    Hs384,
    Hs512,
}

impl HmacAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
        }
    }

    fn digest(&self) -> MessageDigest {
        match self {
            Self::Hs256 => MessageDigest::sha256(),
            Self::Hs384 => MessageDigest::sha384(),
            Self::Hs512 => MessageDigest::sha512(),
        }
    }
}

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用指定的金鑰對資料進行簽名，回傳 JWS 格式的簽名位元組。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// RSASSA-PKCS1-v1_5 簽名（RS256）。
struct RSASignature;

impl SignatureAlgorithmT for RSASignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// ECDSA 簽名；JWS 要求固定長度的 `r || s`，而非 OpenSSL 輸出的 DER。
struct EcdsaSignature {
    alg: KeyAlgorithm,
    size: usize,
}

impl SignatureAlgorithmT for EcdsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(self.alg.digest(), &key_pair.pri_key)?;
        signer.update(data)?;
        let der = signer.sign_to_vec()?;

        let sig = EcdsaSig::from_der(&der)?;
        let mut raw = sig.r().to_vec_padded(self.size as i32)?;
        raw.extend(sig.s().to_vec_padded(self.size as i32)?);
        Ok(raw)
    }
}

/// 簽名演算法工廠，依金鑰的演算法取得對應實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(key_pair: &KeyPair) -> Box<dyn SignatureAlgorithmT> {
        match key_pair.curve() {
            None => Box::new(RSASignature),
            Some(curve) => Box::new(EcdsaSignature {
                alg: key_pair.alg,
                size: curve.coordinate_size(),
            }),
        }
    }
}

/// 根據提供的 header、payload 與金鑰對，生成對應的簽名。
///
/// 簽名輸入為 `BASE64URL(header) || '.' || BASE64URL(payload)`。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64, SignatureError> {
    let signing_input = format!("{}.{}", header_b64.as_str(), payload_b64.as_str());
    let algorithm = SignatureAlgorithmFactory::get_algorithm(key_pair);

    let signature = algorithm.sign(signing_input.as_bytes(), key_pair)?;

    Ok(Base64::new(&signature))
}

/// 以 HMAC 金鑰簽名，用於外部帳戶綁定的內層 JWS。
pub fn create_hmac_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    mac_key: &[u8],
    alg: HmacAlgorithm,
) -> Result<Base64, SignatureError> {
    if mac_key.is_empty() {
        return Err(SignatureError::EmptyHmacKey);
    }

    let signing_input = format!("{}.{}", header_b64.as_str(), payload_b64.as_str());
    let key = PKey::hmac(mac_key)?;
    let mut signer = Signer::new(alg.digest(), &key)?;
    signer.update(signing_input.as_bytes())?;

    Ok(Base64::new(signer.sign_to_vec()?))
}
