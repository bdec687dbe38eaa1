use std::result;

use openssl::{
    hash::MessageDigest,
    nid::Nid,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::{key_pair::KeyPair, payload::Identifier};

/// 建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
    #[error("Unsupported identifier type: {0}")]
    UnsupportedIdentifier(String),
}

type Result<T> = result::Result<T, CsrError>;

/// 主體 CN 的長度上限（RFC 5280 ub-common-name）。
const MAX_COMMON_NAME: usize = 64;

/// CSR 建構器，依識別項產生 DNS 與 IP 主體替代名稱 (SAN)。
///
/// 第一個不超過 64 字元的 DNS 名稱同時作為主體 CN。
///
/// # 範例
///
/// ```no_run
/// use acmekit::{csr::Csr, key_pair::{EcCurve, KeyPair}};
///
/// let key_pair = KeyPair::generate_ec(EcCurve::P256)?;
/// let der = Csr::new()
///     .dns("example.com")
///     .dns("www.example.com")
///     .to_der(&key_pair)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Csr {
    san_entries: Vec<Identifier>,
}

impl Csr {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以訂單的識別項建立 CSR。
    pub fn from_identifiers(identifiers: &[Identifier]) -> Self {
        Self {
            san_entries: identifiers.to_vec(),
        }
    }

    /// 新增一個 DNS 主體替代名稱。
    pub fn dns(mut self, dns_name: &str) -> Self {
        self.san_entries.push(Identifier::dns(dns_name));
        self
    }

    pub fn identifier(mut self, identifier: Identifier) -> Self {
        self.san_entries.push(identifier);
        self
    }

    /// 以指定的金鑰對簽署並建立 X509 證書簽名請求。
    ///
    /// # 錯誤
    ///
    /// - 未設定任何 SAN 時回傳 `CsrError::NoSanEntries`。
    /// - 識別項不是 `dns` 或 `ip` 時回傳 `CsrError::UnsupportedIdentifier`。
    pub fn build(&self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }

        let mut req_builder = X509Req::builder()?;

        let common_name = self
            .san_entries
            .iter()
            .find(|id| id.type_ == "dns" && id.value.len() <= MAX_COMMON_NAME);
        if let Some(cn) = common_name {
            let mut name = X509NameBuilder::new()?;
            name.append_entry_by_nid(Nid::COMMONNAME, &cn.value)?;
            req_builder.set_subject_name(&name.build())?;
        }

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            match entry.type_.as_str() {
                "dns" => san_builder.dns(&entry.value),
                "ip" => san_builder.ip(&entry.value),
                other => return Err(CsrError::UnsupportedIdentifier(other.to_owned())),
            };
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 建立 CSR 並以 DER 編碼，可直接用於 finalize。
    pub fn to_der(&self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}
