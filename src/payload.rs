use std::{error::Error, fmt, net::IpAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{base64::Base64, jwk::Jwk, jws::Jws};

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 該 trait 要求實作者能夠序列化、反序列化，並提供轉換成 JSON 字串的功能，
/// 同時必須實作自定義的驗證邏輯。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱或 IP 位址。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            type_: "dns".to_owned(),
            value: domain.into(),
        }
    }

    /// RFC 8738 的 IP 識別項。
    pub fn ip(addr: IpAddr) -> Self {
        Self {
            type_: "ip".to_owned(),
            value: addr.to_string(),
        }
    }

    /// 萬用字元網域（`*.example.com`）只能以 dns-01 驗證。
    pub fn is_wildcard(&self) -> bool {
        self.type_ == "dns" && self.value.starts_with("*.")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_, self.value)
    }
}

/// newAccount 請求的載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    #[serde(rename = "onlyReturnExisting")]
    pub only_return_existing: bool,
    #[serde(rename = "termsOfServiceAgreed")]
    pub terms_of_service_agreed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(
        rename = "externalAccountBinding",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_account_binding: Option<Jws>,
}

impl PayloadT for NewAccountPayload {
    /// 聯絡資訊必須是 URL 形式（例如 `mailto:`）。
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(bad) = self.contact.iter().find(|c| !c.contains(':')) {
            return Err(format!("Contact {bad:?} is not a URL").into());
        }
        Ok(())
    }
}

/// 更新帳戶聯絡資訊的載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    pub contact: Vec<String>,
}

impl PayloadT for UpdateAccountPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// 金鑰輪替內層 JWS 的載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyChangePayload {
    pub account: String,
    #[serde(rename = "oldKey")]
    pub old_key: Jwk,
}

impl PayloadT for KeyChangePayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.account.is_empty() {
            return Err("Account URL is required".into());
        }
        Ok(())
    }
}

/// 改變資源狀態的載荷，目前只用於停用帳戶與授權。
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: String,
}

impl StatusPayload {
    pub fn deactivated() -> Self {
        Self {
            status: "deactivated".to_owned(),
        }
    }
}

impl PayloadT for StatusPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// 表示建立新訂單時所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
    #[serde(rename = "notBefore", default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(rename = "notAfter", default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
}

impl NewOrderPayload {
    pub fn new(identifiers: Vec<Identifier>) -> Self {
        NewOrderPayload {
            identifiers,
            not_before: None,
            not_after: None,
        }
    }
}

impl PayloadT for NewOrderPayload {
    /// 驗證新訂單載荷資料：
    ///
    /// - 必須至少包含一個識別項。
    /// - 識別項類型只能是 `dns` 或 `ip`，且值不得為空。
    /// - `notBefore` 不得晚於 `notAfter`。
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.identifiers.is_empty() {
            return Err("At least one identifier is required".into());
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" && identifier.type_ != "ip" {
                return Err(format!("Unsupported identifier type {:?}", identifier.type_).into());
            }
            if identifier.value.is_empty() {
                return Err("Identifier value cannot be empty".into());
            }
        }
        if let (Some(nb), Some(na)) = (self.not_before, self.not_after) {
            if nb > na {
                return Err("notBefore is after notAfter".into());
            }
        }
        Ok(())
    }
}

/// 通知 CA 開始驗證挑戰的載荷，內容固定為空物件 `{}`。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl ChallengeValidationPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeValidationPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料。
///
/// 該載荷主要包含 DER 格式 CSR 的 Base64 URL 安全編碼字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_b64: &Base64) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: csr_b64.base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.csr_b64_str.is_empty() {
            return Err("CSR cannot be empty".into());
        }
        Ok(())
    }
}

/// 撤銷憑證的載荷。`reason` 為 RFC 5280 §5.3.1 的 CRLReason 代碼。
#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeCertificatePayload {
    pub certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<u8>,
}

impl PayloadT for RevokeCertificatePayload {
    fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        match self.reason {
            // 7 在 RFC 5280 中未使用
            Some(7) | Some(11..) => Err(format!("Invalid revocation reason {:?}", self.reason).into()),
            _ => Ok(()),
        }
    }
}
