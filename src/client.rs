//! 協定引擎的客戶端上下文。
//!
//! [`Client`] 持有目錄、nonce 池、傳輸層與時鐘，所有帳戶、訂單與挑戰操作都是
//! `Client` 上的方法，不存在任何全域狀態。`Client` 可在多執行緒之間共用。

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    directory::{Directory, LETS_ENCRYPT_PRODUCTION},
    error::{check_error, Error, Result},
    jws::Jws,
    key_pair::KeyPair,
    nonce::NoncePool,
    poll::{Clock, PollOptions, SystemClock},
    transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport},
};

/// 客戶端設定，可由設定檔反序列化而來。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub directory_url: String,
    /// 單次 HTTP 請求的逾時秒數。
    pub timeout_secs: u64,
    pub user_agent: String,
    /// 預設輪詢間隔（毫秒）。
    pub poll_interval_ms: u64,
    /// 預設輪詢期限（秒）。
    pub poll_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory_url: LETS_ENCRYPT_PRODUCTION.to_owned(),
            timeout_secs: 30,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_owned(),
            poll_interval_ms: 1000,
            poll_timeout_secs: 90,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 依設定產生預設的輪詢參數。
    pub fn poll_options(&self) -> PollOptions {
        PollOptions::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.poll_timeout_secs),
        )
    }
}

/// 設定以整秒保存，不足一秒的部分進位，避免變成 0。
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// 用於構建 [`Client`] 實例的構造器，採用 builder 模式。
///
/// 未指定傳輸層時使用 [`ReqwestTransport`]，未指定時鐘時使用 [`SystemClock`]。
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以既有設定取代目前的所有設定值。
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn directory_url(mut self, url: &str) -> Self {
        self.config.directory_url = url.to_owned();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_secs = ceil_secs(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.config.user_agent = user_agent.to_owned();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout_secs = ceil_secs(timeout);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 建立客戶端並解析目錄。
    ///
    /// # 回傳
    ///
    /// 目錄無法取得或格式錯誤時回傳錯誤。
    pub fn build(self) -> Result<Client> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(
                self.config.timeout(),
                &self.config.user_agent,
            )?),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let directory = Directory::fetch(transport.as_ref(), &self.config.directory_url)?;

        Ok(Client {
            config: self.config,
            directory,
            nonces: NoncePool::new(),
            transport,
            clock,
        })
    }
}

/// ACME 客戶端上下文。
pub struct Client {
    config: ClientConfig,
    directory: Directory,
    nonces: NoncePool,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl Client {
    /// 以指定的目錄 URL 與預設設定建立客戶端。
    pub fn new(directory_url: &str) -> Result<Self> {
        ClientBuilder::new().directory_url(directory_url).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 依客戶端設定產生的預設輪詢參數。
    pub fn poll_options(&self) -> PollOptions {
        self.config.poll_options()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// 以 HEAD 請求向 newNonce 端點索取一個新的 nonce。
    pub fn fetch_nonce(&self) -> Result<String> {
        let response = self
            .transport
            .execute(HttpRequest::head(&self.directory.new_nonce))?;
        check_error(&response, &[200, 204])?;

        let nonce = response
            .replay_nonce()
            .ok_or(Error::MissingHeader("Replay-Nonce"))?;
        log::debug!("fetched fresh nonce from {}", self.directory.new_nonce);
        Ok(nonce.to_owned())
    }

    /// 未經認證的 GET，只用於目錄等公開資源。
    pub fn get(&self, url: &str, expected: &[u16]) -> Result<HttpResponse> {
        let response = self.transport.execute(HttpRequest::get(url))?;
        self.refill_nonce(&response);
        check_error(&response, expected)?;
        Ok(response)
    }

    /// 送出已簽名的 POST 請求。
    ///
    /// # 參數
    ///
    /// - `url`: 請求目標，同時寫入保護頭的 `url`。
    /// - `kid`: 帳戶 URL；為 `None` 時以 `jwk` 模式簽名。
    /// - `key`: 簽名金鑰。
    /// - `payload`: 請求內容；空切片代表 POST-as-GET。
    /// - `expected`: 可接受的狀態碼。
    ///
    /// # 回傳
    ///
    /// 狀態碼符合預期時回傳回應。CA 回傳 `badNonce` 時會以新的 nonce 重送一次，
    /// 其他錯誤直接回傳。
    pub fn post(
        &self,
        url: &str,
        kid: Option<&str>,
        key: &KeyPair,
        payload: &[u8],
        expected: &[u16],
    ) -> Result<HttpResponse> {
        match self.send_signed(url, kid, key, payload, expected) {
            Err(Error::Acme(problem)) if problem.is_bad_nonce() => {
                log::info!("retrying {} after badNonce: {}", url, problem.detail);
                self.send_signed(url, kid, key, payload, expected)
            }
            other => other,
        }
    }

    /// 以帳戶身分讀取資源（空 payload 的 POST）。
    pub fn post_as_get(
        &self,
        url: &str,
        kid: &str,
        key: &KeyPair,
        expected: &[u16],
    ) -> Result<HttpResponse> {
        self.post(url, Some(kid), key, b"", expected)
    }

    fn send_signed(
        &self,
        url: &str,
        kid: Option<&str>,
        key: &KeyPair,
        payload: &[u8],
        expected: &[u16],
    ) -> Result<HttpResponse> {
        let nonce = match self.nonces.take() {
            Some(nonce) => nonce,
            None => self.fetch_nonce()?,
        };
        let jws = Jws::sign(payload, key, kid, url, Some(nonce))?;

        log::debug!(
            "POST {} ({}{})",
            url,
            if kid.is_some() { "kid" } else { "jwk" },
            if payload.is_empty() { ", as GET" } else { "" }
        );
        let response = self
            .transport
            .execute(HttpRequest::post_jose(url, jws.to_json()?))?;
        self.refill_nonce(&response);
        check_error(&response, expected)?;

        Ok(response)
    }

    fn refill_nonce(&self, response: &HttpResponse) {
        if let Some(nonce) = response.replay_nonce() {
            self.nonces.put(nonce);
        }
    }
}
