use chrono::{DateTime, Utc};
use openssl::{asn1::Asn1Time, nid::Nid, x509::X509};
use thiserror::Error;

use crate::{
    account::Account,
    base64::Base64,
    client::Client,
    error::{Error, Result},
    key_pair::KeyPair,
    payload::{PayloadT, RevokeCertificatePayload},
};

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Certificate chain is empty")]
    EmptyChain,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type CertResult<T> = std::result::Result<T, CertificateError>;

/// 從 CA 下載的 PEM 憑證鏈，葉憑證在前、簽發者依序在後。
#[derive(Debug, Clone)]
pub struct CertificateChain {
    pem: String,
    certificates: Vec<X509>,
}

impl CertificateChain {
    /// 解析 `application/pem-certificate-chain` 內容。
    ///
    /// # 參數
    ///
    /// - `pem`: 一個或多個串接的 PEM 憑證
    ///
    /// # 回傳
    ///
    /// 至少包含一張憑證的憑證鏈，否則回傳 `CertificateError`
    pub fn from_pem(pem: &[u8]) -> CertResult<Self> {
        let certificates = X509::stack_from_pem(pem)?;
        if certificates.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(Self {
            pem: String::from_utf8_lossy(pem).into_owned(),
            certificates,
        })
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certificates
    }

    /// 葉憑證。
    pub fn leaf(&self) -> &X509 {
        &self.certificates[0]
    }

    pub fn issuers(&self) -> &[X509] {
        &self.certificates[1..]
    }

    pub fn to_pem(&self) -> &str {
        &self.pem
    }

    /// 葉憑證的 DER 編碼，撤銷時使用。
    pub fn leaf_der(&self) -> CertResult<Vec<u8>> {
        Ok(self.leaf().to_der()?)
    }

    pub fn leaf_common_name(&self) -> Option<String> {
        self.leaf()
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string())
    }

    /// 最上層簽發者的 CN，用來在替代鏈之間做選擇。
    pub fn root_common_name(&self) -> Option<String> {
        self.certificates
            .last()?
            .issuer_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string())
    }

    /// 葉憑證的到期時間。
    pub fn expires_at(&self) -> CertResult<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.leaf().not_after())?;
        let secs = diff.days as i64 * 86400 + diff.secs as i64;
        DateTime::from_timestamp(secs, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    /// 判斷證書是否應該進行續約
    ///
    /// # 參數
    ///
    /// - `threshold_days`: 續約閾值（以天為單位）
    ///
    /// # 回傳
    ///
    /// 剩餘有效時間不超過閾值（或已過期）時回傳 `true`
    pub fn should_renew(&self, threshold_days: u32) -> CertResult<bool> {
        let remaining = self.expires_at()? - Utc::now();
        Ok(remaining <= chrono::Duration::days(i64::from(threshold_days)))
    }
}

/// 撤銷請求的簽名方式。
#[derive(Debug, Clone, Copy)]
pub enum RevocationKey<'a> {
    /// 以簽發此憑證的帳戶簽名（`kid`）。
    Account(&'a Account),
    /// 以憑證本身的私鑰簽名（`jwk`）。
    Certificate(&'a KeyPair),
}

impl Client {
    /// 下載憑證鏈。
    pub fn fetch_certificate(&self, account: &Account, url: &str) -> Result<CertificateChain> {
        let response = self.post_as_get(url, &account.url, &account.key, &[200])?;
        let chain = CertificateChain::from_pem(&response.body)?;
        log::info!(
            "downloaded certificate chain {} ({} certificate(s))",
            url,
            chain.certificates().len()
        );
        Ok(chain)
    }

    /// 下載預設憑證鏈，以及 `Link: rel="alternate"` 提供的所有替代鏈。
    ///
    /// 回傳的第一個元素永遠是預設鏈。
    pub fn fetch_certificates(&self, account: &Account, url: &str) -> Result<Vec<CertificateChain>> {
        let response = self.post_as_get(url, &account.url, &account.key, &[200])?;
        let mut chains = vec![CertificateChain::from_pem(&response.body)?];

        for alternate in response.links("alternate") {
            log::debug!("fetching alternate chain {}", alternate);
            chains.push(self.fetch_certificate(account, &alternate)?);
        }
        Ok(chains)
    }

    /// 撤銷憑證。
    ///
    /// # 參數
    ///
    /// - `key`: 以帳戶或憑證私鑰簽名
    /// - `certificate_der`: 要撤銷的憑證（DER）
    /// - `reason`: RFC 5280 撤銷原因代碼
    pub fn revoke_certificate(
        &self,
        key: RevocationKey<'_>,
        certificate_der: &[u8],
        reason: Option<u8>,
    ) -> Result<()> {
        let payload = RevokeCertificatePayload {
            certificate: Base64::new(certificate_der).base64_url(),
            reason,
        };
        payload
            .validate()
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let body = payload.to_json_string()?;

        let url = &self.directory().revoke_cert;
        match key {
            RevocationKey::Account(account) => {
                self.post(url, Some(&account.url), &account.key, body.as_bytes(), &[200])?
            }
            RevocationKey::Certificate(key_pair) => {
                self.post(url, None, key_pair, body.as_bytes(), &[200])?
            }
        };

        log::info!("revoked certificate (reason: {:?})", reason);
        Ok(())
    }
}
