use serde::{Deserialize, Serialize};

use crate::{
    error::{check_error, Result},
    transport::{HttpRequest, Transport},
};

/// Let's Encrypt 正式環境的目錄 URL。
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境的目錄 URL。
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// 表示與目錄相關的 API 結構，包含與帳號、nonce、訂單、金鑰輪替及撤銷憑證相關的 URL。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Directory {
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於訂單相關操作的 API 路徑。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    /// 預先授權端點，多數 CA 不提供。
    #[serde(rename = "newAuthz", default, skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(rename = "revokeCert")]
    pub revoke_cert: String,
    /// 帳戶金鑰輪替端點。
    #[serde(rename = "keyChange")]
    pub key_change: String,
    /// 用於取得續期資訊的 API 路徑，可能不存在。
    #[serde(rename = "renewalInfo", default, skip_serializing_if = "Option::is_none")]
    pub renewal_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

/// 目錄中的服務資訊。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    #[serde(default)]
    pub external_account_required: bool,
}

impl Directory {
    /// 從 CA 取得目錄。
    ///
    /// # 參數
    ///
    /// - `transport`: 用來送出 GET 請求的傳輸層。
    /// - `url`: 目錄的 URL。
    ///
    /// # 回傳
    ///
    /// 成功時回傳 `Directory`；狀態碼不是 200 時回傳對應的錯誤。
    pub fn fetch(transport: &dyn Transport, url: &str) -> Result<Self> {
        let response = transport.execute(HttpRequest::get(url))?;
        check_error(&response, &[200])?;
        let directory: Directory = response.json()?;

        log::debug!("resolved ACME directory {}", url);
        Ok(directory)
    }

    /// CA 是否要求外部帳戶綁定。
    pub fn external_account_required(&self) -> bool {
        self.meta
            .as_ref()
            .is_some_and(|m| m.external_account_required)
    }

    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref()?.terms_of_service.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        transport::{HttpResponse, MockTransport},
    };

    const LE_DIRECTORY: &str = r#"{
        "keyChange": "https://acme-staging-v02.api.letsencrypt.org/acme/key-change",
        "meta": {
            "caaIdentities": ["letsencrypt.org"],
            "termsOfService": "https://letsencrypt.org/documents/LE-SA-v1.4-April-3-2024.pdf",
            "website": "https://letsencrypt.org/docs/staging-environment/"
        },
        "newAccount": "https://acme-staging-v02.api.letsencrypt.org/acme/new-acct",
        "newNonce": "https://acme-staging-v02.api.letsencrypt.org/acme/new-nonce",
        "newOrder": "https://acme-staging-v02.api.letsencrypt.org/acme/new-order",
        "renewalInfo": "https://acme-staging-v02.api.letsencrypt.org/draft-ietf-acme-ari-03/renewalInfo",
        "revokeCert": "https://acme-staging-v02.api.letsencrypt.org/acme/revoke-cert"
    }"#;

    #[test]
    fn test_parse_lets_encrypt_directory() {
        let mock = MockTransport::new(|_| HttpResponse::new(200).with_body(LE_DIRECTORY));
        let dir = Directory::fetch(&mock, LETS_ENCRYPT_STAGING).unwrap();

        assert!(dir.new_nonce.ends_with("/acme/new-nonce"));
        assert!(dir.key_change.ends_with("/acme/key-change"));
        assert!(dir.new_authz.is_none());
        assert!(dir.renewal_info.is_some());
        assert!(!dir.external_account_required());
        assert_eq!(
            dir.meta.as_ref().unwrap().caa_identities,
            vec!["letsencrypt.org"]
        );
        assert!(dir.terms_of_service().unwrap().contains("LE-SA"));
    }

    #[test]
    fn test_external_account_required() {
        let body = LE_DIRECTORY.replace(
            r#""caaIdentities""#,
            r#""externalAccountRequired": true, "caaIdentities""#,
        );
        let mock = MockTransport::new(move |_| HttpResponse::new(200).with_body(body.clone()));
        let dir = Directory::fetch(&mock, "https://ca/dir").unwrap();
        assert!(dir.external_account_required());
    }

    #[test]
    fn test_non_200_is_error() {
        let mock = MockTransport::new(|_| {
            HttpResponse::new(503).with_body("upstream unavailable")
        });
        let err = Directory::fetch(&mock, "https://ca/dir").unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus { .. }));
    }
}
