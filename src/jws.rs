//! 此模組提供 JSON Web Signature (JWS) 的結構與簽名信封。
//!
//! 所有已認證的 ACME 請求都是一個 flattened JSON JWS。外部帳戶綁定與金鑰輪替
//! 需要把一個 JWS 當作另一個 JWS 的 payload，因此簽名被抽成可重用的
//! [`Jws::sign`] 原語：外層只是把內層的 JSON 當作 payload 再簽一次。

use std::result;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::{Base64, DecodeError},
    jwk::{Jwk, JwkError},
    key_pair::KeyPair,
    protection::{KeyReference, Protection, ProtectionError},
    signature::{create_hmac_signature, create_signature, HmacAlgorithm, SignatureError},
};

/// 表示一個 JSON Web Signature (JWS) 物件。
///
/// 各部分皆為 Base64 URL 安全編碼的字串；payload 為空字串時代表 POST-as-GET。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位。
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] DecodeError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = result::Result<T, JwsError>;

impl Jws {
    /// 以已編碼的三個部分建立 `Jws`。
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 以帳戶金鑰簽名 `payload`。
    ///
    /// # 參數
    ///
    /// - `payload`: 原始 payload 位元組；空切片代表 POST-as-GET。
    /// - `key_pair`: 簽名金鑰，同時決定 `alg`。
    /// - `kid`: 帳戶 URL；為 `None` 時改在保護頭中嵌入公鑰 `jwk`。
    /// - `url`: 請求目標 URL。
    /// - `nonce`: 外層請求必須提供；內層 JWS 則為 `None`。
    pub fn sign(
        payload: &[u8],
        key_pair: &KeyPair,
        kid: Option<&str>,
        url: &str,
        nonce: Option<String>,
    ) -> Result<Self> {
        let key = match kid {
            Some(kid) => KeyReference::Kid(kid.to_owned()),
            None => KeyReference::Jwk(Jwk::new(key_pair)?),
        };

        let mut protection = Protection::new(key_pair.alg.as_str()).key(key);
        if let Some(nonce) = nonce {
            protection = protection.nonce(nonce);
        }
        let header = protection.create_header(url).to_base64()?;
        let payload = Base64::new(payload);
        let signature = create_signature(&header, &payload, key_pair)?;

        Ok(Jws::new(&header, &payload, &signature))
    }

    /// 以 HMAC 金鑰簽名，產生外部帳戶綁定所需的內層 JWS。
    pub fn sign_hmac(
        payload: &[u8],
        mac_key: &[u8],
        alg: HmacAlgorithm,
        kid: &str,
        url: &str,
    ) -> Result<Self> {
        let header = Protection::new(alg.as_str())
            .key(KeyReference::Kid(kid.to_owned()))
            .create_header(url)
            .to_base64()?;
        let payload = Base64::new(payload);
        let signature = create_hmac_signature(&header, &payload, mac_key, alg)?;

        Ok(Jws::new(&header, &payload, &signature))
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 解碼保護頭，主要用於檢查與除錯。
    pub fn protected_header(&self) -> Result<serde_json::Value> {
        let raw = Base64::from_url(&self.header)?.decode()?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// 解碼後的 payload 位元組；POST-as-GET 時為空。
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        Ok(Base64::from_url(&self.payload)?.decode()?)
    }

    pub fn is_post_as_get(&self) -> bool {
        self.payload.is_empty()
    }
}
