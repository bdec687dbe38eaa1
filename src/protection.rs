use serde::Serialize;
use thiserror::Error;

use crate::{base64::Base64, jwk::Jwk};

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 保護頭中用來識別簽名金鑰的方式：`jwk` 與 `kid` 二擇一。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReference {
    /// 直接嵌入公鑰，僅用於尚無帳戶 URL 的請求（newAccount、以憑證金鑰撤銷等）。
    Jwk(Jwk),
    /// 帳戶 URL 或 EAB 的 key identifier。
    Kid(String),
}

/// 用於生成保護頭（Protected Header）的建構器。
pub struct Protection {
    alg: String,
    nonce: Option<String>,
    key: Option<KeyReference>,
}

/// 數字簽章的保護頭部，可序列化為 JSON 並轉換為 Base64 編碼字串。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    alg: String,
    /// 用於防止重放攻擊的隨機數；內層 JWS 不帶 nonce
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    /// 請求目標 URL
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    /// 將 [`ProtectedHeader`] 序列化後轉換為 Base64 格式。
    pub fn to_base64(&self) -> Result<Base64> {
        let json_str = serde_json::to_string(self)?;
        Ok(Base64::new(json_str.as_bytes()))
    }
}

impl Protection {
    /// 以 JWS 演算法名稱（例如 `ES256`、`RS256`、`HS256`）建立建構器。
    pub fn new(alg: impl Into<String>) -> Self {
        Self {
            alg: alg.into(),
            nonce: None,
            key: None,
        }
    }

    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn key(mut self, key: KeyReference) -> Self {
        self.key = Some(key);
        self
    }

    /// 根據目前設定的參數生成一個 [`ProtectedHeader`]。
    pub fn create_header(&self, url: impl Into<String>) -> ProtectedHeader {
        let (jwk, kid) = match &self.key {
            Some(KeyReference::Jwk(jwk)) => (Some(jwk.clone()), None),
            Some(KeyReference::Kid(kid)) => (None, Some(kid.clone())),
            None => (None, None),
        };

        ProtectedHeader {
            alg: self.alg.clone(),
            nonce: self.nonce.clone(),
            url: url.into(),
            jwk,
            kid,
        }
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}
