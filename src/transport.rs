//! HTTP 傳輸層的抽象。
//!
//! 協定引擎只依賴 [`Transport`] 特徵；預設實作 [`ReqwestTransport`] 使用
//! `reqwest::blocking`，測試則可使用 [`MockTransport`] 攔截所有請求。

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LINK, LOCATION, RETRY_AFTER},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// 每個 ACME 回應都會攜帶的 nonce 標頭。
pub const REPLAY_NONCE: &str = "Replay-Nonce";
/// 已簽名請求的 Content-Type。
pub const JOSE_JSON: &str = "application/jose+json";
/// problem document 的 Content-Type。
pub const PROBLEM_JSON: &str = "application/problem+json";
/// 憑證鏈下載的 Content-Type。
pub const PEM_CERTIFICATE_CHAIN: &str = "application/pem-certificate-chain";

/// 傳送給 CA 的 HTTP 請求。
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::HEAD,
            ..Self::get(url)
        }
    }

    /// 建立以 `application/jose+json` 送出的 POST 請求。
    pub fn post_jose(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JOSE_JSON));
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: Some(body.into()),
        }
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// CA 的 HTTP 回應，內容已完整讀入記憶體。
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 以狀態碼建立空回應；無效的狀態碼會以 500 取代。
    pub fn new(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// 追加一個標頭；名稱或值不合法時忽略。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json<T: Serialize>(self, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        self.with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.header(REPLAY_NONCE).filter(|n| !n.is_empty())
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn is_problem(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.starts_with(PROBLEM_JSON))
    }

    /// 解析 `Retry-After`，支援秒數與 HTTP-date 兩種格式。
    ///
    /// 已過去的日期視為零秒。
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.header(RETRY_AFTER.as_str())?.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
        Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// 取出 `Link` 標頭中指定 `rel` 的所有 URL。
    pub fn links(&self, rel: &str) -> Vec<String> {
        self.headers
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|link| {
                let mut parts = link.split(';');
                let target = parts.next()?.trim();
                let url = target.strip_prefix('<')?.strip_suffix('>')?;
                let matches = parts.any(|param| {
                    param
                        .trim()
                        .strip_prefix("rel=")
                        .is_some_and(|r| r.trim_matches('"') == rel)
                });
                matches.then(|| url.to_owned())
            })
            .collect()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// 傳送 HTTP 請求的外部協作者。
///
/// 實作必須可在多執行緒間共用，引擎會同時為多個授權發出請求。
pub trait Transport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// 基於 `reqwest::blocking::Client` 的傳輸實作。
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 建立具備逾時與 User-Agent 設定的傳輸。
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// 模擬傳輸，以閉包產生回應並記錄所有請求，適用於測試環境。
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// 以指定的處理函式建立 `MockTransport`。
    ///
    /// # 範例
    ///
    /// ```
    /// # use acmekit::transport::{HttpResponse, MockTransport};
    /// let mock = MockTransport::new(|_| HttpResponse::new(200));
    /// ```
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 到目前為止收到的所有請求（依收到順序）。
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = (self.handler)(&request);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        Ok(response)
    }
}
