//! 協定引擎的錯誤分類。
//!
//! 錯誤分為三大類：
//!
//! - **傳輸錯誤**：連線失敗、逾時，或狀態碼不符且回應內容無法解析成 problem document。
//! - **協定錯誤**：CA 回傳的 problem document，即 [`AcmeError`]，可依 `type` URN 再細分。
//! - **狀態機錯誤**：輪詢逾時，或 order / authorization / challenge 進入終結失敗狀態。
//!
//! 使用 [`Error::kind`] 可在不比對字串的情況下區分上述類別。

use std::{fmt, time::Duration};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    certificate::CertificateError, csr::CsrError, jwk::JwkError, jws::JwsError,
    key_pair::KeyError, payload::Identifier, transport::HttpResponse,
};

/// ACME problem type URN 的共同前綴。
pub const PROBLEM_PREFIX: &str = "urn:ietf:params:acme:error:";

/// RFC 8555 §6.7 定義的 problem 類型（不含前綴）。
pub mod problem {
    pub const ACCOUNT_DOES_NOT_EXIST: &str = "accountDoesNotExist";
    pub const ALREADY_REVOKED: &str = "alreadyRevoked";
    pub const BAD_CSR: &str = "badCSR";
    pub const BAD_NONCE: &str = "badNonce";
    pub const BAD_PUBLIC_KEY: &str = "badPublicKey";
    pub const BAD_REVOCATION_REASON: &str = "badRevocationReason";
    pub const BAD_SIGNATURE_ALGORITHM: &str = "badSignatureAlgorithm";
    pub const CAA: &str = "caa";
    pub const COMPOUND: &str = "compound";
    pub const CONNECTION: &str = "connection";
    pub const DNS: &str = "dns";
    pub const EXTERNAL_ACCOUNT_REQUIRED: &str = "externalAccountRequired";
    pub const INCORRECT_RESPONSE: &str = "incorrectResponse";
    pub const INVALID_CONTACT: &str = "invalidContact";
    pub const MALFORMED: &str = "malformed";
    pub const ORDER_NOT_READY: &str = "orderNotReady";
    pub const RATE_LIMITED: &str = "rateLimited";
    pub const REJECTED_IDENTIFIER: &str = "rejectedIdentifier";
    pub const SERVER_INTERNAL: &str = "serverInternal";
    pub const TLS: &str = "tls";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const UNSUPPORTED_CONTACT: &str = "unsupportedContact";
    pub const UNSUPPORTED_IDENTIFIER: &str = "unsupportedIdentifier";
    pub const USER_ACTION_REQUIRED: &str = "userActionRequired";
}

/// CA 回傳的 problem document（`application/problem+json`）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeError {
    /// HTTP 狀態碼；若內容未提供，會以回應的狀態碼補上。
    #[serde(default)]
    pub status: u16,
    /// problem 類型 URN，例如 `urn:ietf:params:acme:error:malformed`。
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// 給人閱讀的說明。
    #[serde(default)]
    pub detail: String,
    /// 當 problem 屬於某個 identifier 時出現（通常在 subproblem 中）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    /// 批次請求中各 identifier 的個別錯誤。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
}

/// problem document 中針對單一 identifier 的子錯誤。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
}

impl AcmeError {
    /// 去除 `urn:ietf:params:acme:error:` 前綴後的 problem 類型。
    ///
    /// 非 ACME 命名空間的類型會原樣回傳。
    pub fn problem_type(&self) -> &str {
        self.error_type
            .strip_prefix(PROBLEM_PREFIX)
            .unwrap_or(&self.error_type)
    }

    /// 判斷是否為指定的 problem 類型，例如 [`problem::RATE_LIMITED`]。
    pub fn is(&self, problem_type: &str) -> bool {
        self.problem_type() == problem_type
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.is(problem::BAD_NONCE)
    }
}

impl fmt::Display for AcmeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acme: error code {} {:?}: {}",
            self.status, self.error_type, self.detail
        )?;
        for sub in &self.subproblems {
            match &sub.identifier {
                Some(id) => write!(f, "; {} {:?}: {}", id, sub.error_type, sub.detail)?,
                None => write!(f, "; {:?}: {}", sub.error_type, sub.detail)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for AcmeError {}

/// 錯誤大類，供呼叫端決定如何向使用者呈現。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 網路、逾時或無法解析的非預期狀態碼。
    Transport,
    /// CA 以 problem document 拒絕了請求。
    Protocol,
    /// 驗證失敗：資源進入 invalid 等終結狀態。
    Validation,
    /// 輪詢超過期限或被取消。
    Timeout,
    /// 本地處理失敗（金鑰、簽名、JSON 等）。
    Local,
}

/// 協定引擎的統一錯誤型別。
#[derive(Debug, Error)]
pub enum Error {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected response: {status}, expected one of {expected:?}, body: {body:?}")]
    UnexpectedStatus {
        status: StatusCode,
        expected: Vec<u16>,
        body: String,
    },
    #[error(transparent)]
    Acme(#[from] AcmeError),
    #[error("Timed out waiting for {resource} {url} (last status: {status})")]
    Timeout {
        resource: &'static str,
        url: String,
        status: String,
        cancelled: bool,
    },
    #[error("{resource} {url} is {status}{}", .error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    InvalidState {
        resource: &'static str,
        url: String,
        status: String,
        error: Option<AcmeError>,
    },
    #[error("{resource} {url} moved backwards from {from} to {to}")]
    StatusRegression {
        resource: &'static str,
        url: String,
        from: String,
        to: String,
    },
    #[error("Missing {0} header in response")]
    MissingHeader(&'static str),
    #[error("Request header error: {0}")]
    RequestHeader(#[from] reqwest::header::ToStrError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Challenge responder error: {0}")]
    Responder(String),
    #[error("No order list for account")]
    NoOrderList,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Request(e) if e.is_timeout() => ErrorKind::Timeout,
            Error::Request(_) | Error::UnexpectedStatus { .. } | Error::MissingHeader(_) => {
                ErrorKind::Transport
            }
            Error::Acme(_) => ErrorKind::Protocol,
            Error::InvalidState { .. } | Error::StatusRegression { .. } => ErrorKind::Validation,
            Error::Timeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Local,
        }
    }

    /// 若錯誤來自 CA 的 problem document，回傳該文件。
    ///
    /// 終結狀態錯誤所附帶的伺服器錯誤也會一併回傳。
    pub fn acme_error(&self) -> Option<&AcmeError> {
        match self {
            Error::Acme(e) => Some(e),
            Error::InvalidState { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// 檢查回應狀態碼是否屬於預期集合。
///
/// 狀態碼在 `expected` 之中時回傳 `Ok(())`；否則嘗試把內容解析成 problem document，
/// 成功則回傳 [`Error::Acme`]，失敗則回傳帶有原始狀態碼與內容的 [`Error::UnexpectedStatus`]。
pub fn check_error(response: &HttpResponse, expected: &[u16]) -> Result<()> {
    let status = response.status;
    if expected.contains(&status.as_u16()) {
        return Ok(());
    }

    match serde_json::from_slice::<AcmeError>(&response.body) {
        Ok(mut problem) if !problem.error_type.is_empty() => {
            if problem.status == 0 {
                problem.status = status.as_u16();
            }
            if !response.is_problem() {
                log::debug!(
                    "problem document served with content-type {:?}",
                    response.content_type()
                );
            }
            Err(Error::Acme(problem))
        }
        _ => Err(Error::UnexpectedStatus {
            status,
            expected: expected.to_vec(),
            body: response.text(),
        }),
    }
}

impl Error {
    pub(crate) fn timeout(
        resource: &'static str,
        url: &str,
        status: impl fmt::Display,
        elapsed: Duration,
        cancelled: bool,
    ) -> Self {
        log::warn!(
            "gave up waiting for {} {} after {:?} (cancelled: {})",
            resource,
            url,
            elapsed,
            cancelled
        );
        Error::Timeout {
            resource,
            url: url.to_owned(),
            status: status.to_string(),
            cancelled,
        }
    }
}
