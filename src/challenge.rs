use std::{error::Error as StdError, fmt, fs, path::PathBuf};

use chrono::{DateTime, Utc};
use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

use crate::{
    account::Account,
    base64::Base64,
    client::Client,
    error::{AcmeError, Result},
    payload::{ChallengeValidationPayload, Identifier, PayloadT},
};

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    /// 根據字串返回對應的挑戰類型，若不支援則返回 `None`。
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "http-01" => Some(Self::Http01),
            "dns-01" => Some(Self::Dns01),
            "tls-alpn-01" => Some(Self::TlsAlpn01),
            _ => None,
        }
    }

    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示 ACME 挑戰的狀態，用來追蹤挑戰進展。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// 判斷該狀態是否為終結狀態，即無法再進行狀態轉換。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }

    /// 返回狀態對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示一個 ACME 驗證挑戰，包含驗證所需的各項資料。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// 驗證挑戰的類型字串；未知類型會原樣保留。
    #[serde(rename = "type")]
    pub type_: String,
    /// 驗證挑戰的 URL
    pub url: String,
    /// 當前挑戰狀態
    pub status: ChallengeStatus,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    /// 驗證成功後可能返回的驗證時間
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
    /// 驗證失敗時 CA 附上的錯誤
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AcmeError>,
    /// 用於證明權限的 key authorization 字串，由客戶端以帳戶 thumbprint 計算
    #[serde(skip)]
    pub key_authorization: String,
}

impl Challenge {
    pub fn kind(&self) -> Option<ChallengeType> {
        ChallengeType::from_name(&self.type_)
    }

    pub(crate) fn authorize(&mut self, thumbprint: &str) {
        self.key_authorization = format!("{}.{}", self.token, thumbprint);
    }

    /// HTTP-01 回應應放置的路徑。
    pub fn http_path(&self) -> String {
        format!("/.well-known/acme-challenge/{}", self.token)
    }

    /// 針對 HTTP-01 挑戰返回應該作為 HTTP 文件內容的 key authorization，
    /// 若非 HTTP-01 則返回 `None`。
    pub fn http_content(&self) -> Option<&str> {
        if self.kind() == Some(ChallengeType::Http01) {
            Some(&self.key_authorization)
        } else {
            None
        }
    }

    /// 根據 key authorization 計算 DNS TXT 記錄值，使用 SHA-256 與 URL-safe Base64 編碼。
    pub fn dns_txt_value(&self) -> String {
        Base64::new(sha256(self.key_authorization.as_bytes())).base64_url()
    }

    /// TLS-ALPN-01 憑證中 acmeIdentifier 擴充的內容。
    pub fn tls_alpn_digest(&self) -> [u8; 32] {
        sha256(self.key_authorization.as_bytes())
    }
}

/// DNS-01 TXT 記錄的名稱；萬用字元網域使用其基底網域。
pub fn dns_record_name(identifier: &Identifier) -> String {
    let domain = identifier
        .value
        .strip_prefix("*.")
        .unwrap_or(&identifier.value);
    format!("_acme-challenge.{domain}")
}

/// 負責把驗證內容公開給 CA 的外部協作者。
///
/// 引擎只負責計算內容並在 `present` 完成後通知 CA；`cleanup` 在驗證結束後一定會被呼叫。
/// 同一張訂單的多個授權會同時處理，因此實作必須可跨執行緒共用。
pub trait ChallengeResponder: Sync {
    fn present(
        &self,
        identifier: &Identifier,
        challenge: &Challenge,
    ) -> std::result::Result<(), Box<dyn StdError + Send + Sync>>;

    fn cleanup(
        &self,
        identifier: &Identifier,
        challenge: &Challenge,
    ) -> std::result::Result<(), Box<dyn StdError + Send + Sync>>;
}

/// 將 HTTP-01 的 key authorization 寫入網站根目錄的回應器。
#[derive(Debug, Clone)]
pub struct Http01FileResponder {
    webroot: PathBuf,
}

impl Http01FileResponder {
    pub fn new(webroot: impl Into<PathBuf>) -> Self {
        Self {
            webroot: webroot.into(),
        }
    }

    /// token 只能是 base64url 字元，否則可能跳出 webroot。
    fn path(&self, challenge: &Challenge) -> std::result::Result<PathBuf, String> {
        let token = &challenge.token;
        let valid = !token.is_empty()
            && token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(format!("invalid challenge token {:?}", token));
        }
        Ok(self.webroot.join(".well-known/acme-challenge").join(token))
    }
}

impl ChallengeResponder for Http01FileResponder {
    fn present(
        &self,
        _identifier: &Identifier,
        challenge: &Challenge,
    ) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
        let content = challenge
            .http_content()
            .ok_or_else(|| format!("{} is not an http-01 challenge", challenge.type_))?;
        let path = self.path(challenge)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn cleanup(
        &self,
        _identifier: &Identifier,
        challenge: &Challenge,
    ) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
        match fs::remove_file(self.path(challenge)?) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Client {
    /// 讀取挑戰並以帳戶 thumbprint 計算 key authorization。
    pub fn fetch_challenge(&self, account: &Account, url: &str) -> Result<Challenge> {
        let response = self.post_as_get(url, &account.url, &account.key, &[200])?;
        let mut challenge: Challenge = response.json()?;
        challenge.authorize(&account.thumbprint()?);
        Ok(challenge)
    }

    /// 通知 CA 驗證內容已就緒，送出空物件 `{}`。
    pub fn accept_challenge(&self, account: &Account, challenge: &Challenge) -> Result<Challenge> {
        let payload = ChallengeValidationPayload::new().to_json_string()?;
        let response = self.post(
            &challenge.url,
            Some(&account.url),
            &account.key,
            payload.as_bytes(),
            &[200],
        )?;

        let mut updated: Challenge = response.json()?;
        updated.authorize(&account.thumbprint()?);
        log::debug!("accepted {} challenge {}", updated.type_, updated.url);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(kind: &str) -> Challenge {
        let mut challenge: Challenge = serde_json::from_str(&format!(
            r#"{{"type":"{kind}","url":"https://ca/chall/1","status":"pending","token":"evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA"}}"#
        ))
        .unwrap();
        challenge.authorize("nP1qzpXGymHBrUEepNY9HCsQk7K8KhOypzEt62jcerQ");
        challenge
    }

    #[test]
    fn test_key_authorization() {
        let c = challenge("http-01");
        assert_eq!(
            c.key_authorization,
            "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA.nP1qzpXGymHBrUEepNY9HCsQk7K8KhOypzEt62jcerQ"
        );
        assert_eq!(
            c.http_path(),
            "/.well-known/acme-challenge/evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA"
        );
        assert_eq!(c.http_content(), Some(c.key_authorization.as_str()));
        assert_eq!(c.kind(), Some(ChallengeType::Http01));
    }

    #[test]
    fn test_dns_values() {
        let c = challenge("dns-01");
        assert!(c.http_content().is_none());
        let expected = Base64::new(sha256(c.key_authorization.as_bytes())).base64_url();
        assert_eq!(c.dns_txt_value(), expected);
        assert_eq!(c.dns_txt_value().len(), 43);
        assert_eq!(c.tls_alpn_digest().to_vec(), Base64::from_url(&expected).unwrap().decode().unwrap());

        assert_eq!(
            dns_record_name(&Identifier::dns("*.example.com")),
            "_acme-challenge.example.com"
        );
        assert_eq!(
            dns_record_name(&Identifier::dns("www.example.com")),
            "_acme-challenge.www.example.com"
        );
    }

    #[test]
    fn test_unknown_type_kept() {
        let c = challenge("dns-account-01");
        assert_eq!(c.kind(), None);
        assert_eq!(c.type_, "dns-account-01");
    }

    #[test]
    fn test_invalid_challenge_error_parsed() {
        let c: Challenge = serde_json::from_str(
            r#"{
                "type": "http-01",
                "url": "https://ca/chall/2",
                "status": "invalid",
                "token": "t",
                "validated": "2025-01-01T00:00:00Z",
                "error": {
                    "type": "urn:ietf:params:acme:error:unauthorized",
                    "detail": "Invalid response from http://example.com/.well-known/acme-challenge/t: 404",
                    "status": 403
                }
            }"#,
        )
        .unwrap();
        assert!(c.status.is_terminal());
        assert_eq!(c.error.unwrap().status, 403);
        assert!(c.validated.is_some());
    }

    #[test]
    fn test_http01_file_responder() {
        let dir = tempfile::tempdir().unwrap();
        let responder = Http01FileResponder::new(dir.path());
        let c = challenge("http-01");
        let id = Identifier::dns("example.com");

        responder.present(&id, &c).unwrap();
        let path = dir
            .path()
            .join(".well-known/acme-challenge")
            .join(&c.token);
        assert_eq!(fs::read_to_string(&path).unwrap(), c.key_authorization);

        responder.cleanup(&id, &c).unwrap();
        assert!(!path.exists());
        responder.cleanup(&id, &c).unwrap();

        assert!(responder.present(&id, &challenge("dns-01")).is_err());
    }

    #[test]
    fn test_http01_file_responder_rejects_path_token() {
        let dir = tempfile::tempdir().unwrap();
        let responder = Http01FileResponder::new(dir.path().join("www"));
        let id = Identifier::dns("example.com");

        for token in ["../../../escaped", "a/b", ".", ""] {
            let mut c = challenge("http-01");
            c.token = token.to_owned();
            assert!(responder.present(&id, &c).is_err(), "{token:?}");
            assert!(responder.cleanup(&id, &c).is_err(), "{token:?}");
        }
        assert!(!dir.path().join("escaped").exists());
        assert!(!dir.path().join("www").exists());
    }
}
