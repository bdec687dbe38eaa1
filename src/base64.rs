//! JWS 與 ACME 使用的 URL-safe、無填充 Base64 編碼。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

/// Base64 解碼失敗時回傳的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64url input: {0}")]
    Invalid(String),
}

/// 已完成 URL-safe 編碼的 Base64 字串。
///
/// # 示例
///
/// ```
/// # use acmekit::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 將任意位元組編碼為 URL-safe、無填充的 Base64。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: URL_SAFE_NO_PAD.encode(input.as_ref()),
        }
    }

    /// 從既有的 base64url 字串建立實例，會先驗證其格式。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        URL_SAFE_NO_PAD
            .decode(url_encoded)
            .map_err(|e| DecodeError::Invalid(e.to_string()))?;
        Ok(Self {
            encoded: url_encoded.to_owned(),
        })
    }

    /// 解碼回原始位元組。
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        URL_SAFE_NO_PAD
            .decode(&self.encoded)
            .map_err(|e| DecodeError::Invalid(e.to_string()))
    }

    /// 取得 URL-safe 編碼字串的擁有權副本。
    pub fn base64_url(&self) -> String {
        self.encoded.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}
