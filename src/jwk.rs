use openssl::bn::BigNumContext;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// JWK相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的演算法。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(String),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，支援 RSA 與 EC 公鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    /// 橢圓曲線格式的 JWK。
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 格式的 JWK 結構，包含必要的公開參數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub n: String,
    pub e: String,
}

/// EC 格式的 JWK 結構，座標依曲線長度左側補零。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl RsaJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let rsa = key_pair
            .pub_key
            .rsa()
            .map_err(|e| JwkError::KeyConversionError(e.to_string()))?;

        let n = Base64::new(rsa.n().to_vec()).base64_url();
        let e = Base64::new(rsa.e().to_vec()).base64_url();

        Ok(RsaJwk { n, e })
    }
}

impl EcJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let curve = key_pair
            .curve()
            .ok_or_else(|| JwkError::UnsupportedAlgorithm(key_pair.alg.as_str().to_owned()))?;
        let convert = |e: openssl::error::ErrorStack| JwkError::KeyConversionError(e.to_string());

        let ec = key_pair.pub_key.ec_key().map_err(convert)?;
        let mut ctx = BigNumContext::new().map_err(convert)?;
        let mut x = openssl::bn::BigNum::new().map_err(convert)?;
        let mut y = openssl::bn::BigNum::new().map_err(convert)?;
        ec.public_key()
            .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)
            .map_err(convert)?;

        let size = curve.coordinate_size() as i32;
        Ok(EcJwk {
            crv: curve.jwk_name().to_owned(),
            x: Base64::new(x.to_vec_padded(size).map_err(convert)?).base64_url(),
            y: Base64::new(y.to_vec_padded(size).map_err(convert)?).base64_url(),
        })
    }
}

impl Jwk {
    /// 根據給定的金鑰對建立對應的 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        match key_pair.curve() {
            None => Ok(Jwk::Rsa(RsaJwk::from_key_pair(key_pair)?)),
            Some(_) => Ok(Jwk::Ec(EcJwk::from_key_pair(key_pair)?)),
        }
    }

    /// 將 JWK 序列化為 JSON 格式字串。
    pub fn to_json(&self) -> Result<String, JwkError> {
        serde_json::to_string(self).map_err(JwkError::from)
    }

    /// 產生 RFC 7638 要求的正規化 JSON：只含必要成員、依字典序排列、不含空白。
    ///
    /// 此字串的 SHA-256 即為 thumbprint，也是 key authorization 的一部分。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        match self {
            Jwk::Rsa(jwk) => {
                map.insert("e".to_string(), Value::String(jwk.e.clone()));
                map.insert("kty".to_string(), Value::String("RSA".to_string()));
                map.insert("n".to_string(), Value::String(jwk.n.clone()));
            }
            Jwk::Ec(jwk) => {
                map.insert("crv".to_string(), Value::String(jwk.crv.clone()));
                map.insert("kty".to_string(), Value::String("EC".to_string()));
                map.insert("x".to_string(), Value::String(jwk.x.clone()));
                map.insert("y".to_string(), Value::String(jwk.y.clone()));
            }
        }

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}
