//! 訂單的狀態機與簽發流程。
//!
//! 訂單狀態只會依 `pending → ready → processing → valid` 前進，任何非終結狀態都可能
//! 轉為 `invalid`。客戶端唯一能主動推進狀態的動作是 finalize；其他轉換都來自伺服器
//! 的回應，且每次更新都會檢查不得倒退。

use std::{fmt, panic, thread, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    account::Account,
    authorization::AuthorizationStatus,
    base64::Base64,
    certificate::CertificateChain,
    challenge::{ChallengeResponder, ChallengeType},
    client::Client,
    error::{AcmeError, Error, Result},
    payload::{FinalizeOrderPayload, Identifier, NewOrderPayload, PayloadT},
    poll::{PollOptions, Poller},
};

/// 訂單狀態，目前支援的狀態有 pending、ready、processing、valid 與 invalid。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Processing => 2,
            Self::Valid => 3,
            Self::Invalid => 4,
        }
    }

    /// 判斷從目前狀態轉換到 `next` 是否合法。停在原狀態永遠合法。
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == Self::Invalid || next.rank() > self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示訂單資料。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// 伺服器回傳的訂單 URL（取自 `Location`，不屬於訂單內容）
    #[serde(skip)]
    pub url: String,
    /// 訂單當前狀態
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// 證書主題識別符
    pub identifiers: Vec<Identifier>,
    #[serde(rename = "notBefore", default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(rename = "notAfter", default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    /// 授權 URL 列表
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AcmeError>,
}

impl Order {
    /// 以伺服器的新版本取代目前內容，狀態不得倒退。
    pub fn update(&mut self, next: Order) -> Result<()> {
        if !self.status.can_transition_to(next.status) {
            return Err(Error::StatusRegression {
                resource: "order",
                url: self.url.clone(),
                from: self.status.to_string(),
                to: next.status.to_string(),
            });
        }
        if self.status != next.status {
            log::debug!("order {} moved {} -> {}", self.url, self.status, next.status);
        }

        let url = std::mem::take(&mut self.url);
        *self = Order { url, ..next };
        Ok(())
    }

    fn invalid_state(&self) -> Error {
        Error::InvalidState {
            resource: "order",
            url: self.url.clone(),
            status: self.status.to_string(),
            error: self.error.clone(),
        }
    }
}

impl Client {
    /// 為指定的識別項建立新訂單。
    pub fn new_order(&self, account: &Account, identifiers: &[Identifier]) -> Result<Order> {
        self.new_order_with(account, NewOrderPayload::new(identifiers.to_vec()))
    }

    /// 以完整的載荷建立訂單，可指定 `notBefore` / `notAfter`。
    pub fn new_order_with(&self, account: &Account, payload: NewOrderPayload) -> Result<Order> {
        payload
            .validate()
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let body = payload.to_json_string()?;
        let response = self.post(
            &self.directory().new_order,
            Some(&account.url),
            &account.key,
            body.as_bytes(),
            &[201],
        )?;
        let url = response
            .location()
            .ok_or(Error::MissingHeader("Location"))?
            .to_owned();
        let mut order: Order = response.json()?;
        order.url = url;

        log::info!(
            "created order {} for {} identifier(s)",
            order.url,
            order.identifiers.len()
        );
        Ok(order)
    }

    /// 讀取訂單目前的狀態。
    pub fn fetch_order(&self, account: &Account, url: &str) -> Result<Order> {
        self.read_order(account, url).map(|(order, _)| order)
    }

    fn read_order(&self, account: &Account, url: &str) -> Result<(Order, Option<Duration>)> {
        let response = self.post_as_get(url, &account.url, &account.key, &[200])?;
        let mut order: Order = response.json()?;
        order.url = url.to_owned();
        Ok((order, response.retry_after()))
    }

    /// 輪詢訂單直到進入 `ready` 或 `valid`。
    ///
    /// 授權完成前訂單停在 `pending`，finalize 後停在 `processing`；兩者都會持續輪詢。
    /// 訂單變為 `invalid` 時回傳 [`Error::InvalidState`]。
    pub fn wait_for_order(
        &self,
        account: &Account,
        order: &mut Order,
        options: &PollOptions,
    ) -> Result<()> {
        let mut poller = Poller::new(self.clock(), options);
        loop {
            let (next, retry_after) = self.read_order(account, &order.url)?;
            order.update(next)?;
            match order.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => return Err(order.invalid_state()),
                OrderStatus::Pending | OrderStatus::Processing => {
                    poller.wait("order", &order.url, order.status, retry_after)?;
                }
            }
        }
    }

    /// 送出 DER 格式的 CSR 以最終確認訂單。
    ///
    /// 訂單已是 `valid` 時不做任何事；不是 `ready` 時直接回傳錯誤而不送出請求。
    pub fn finalize_order(&self, account: &Account, order: &mut Order, csr_der: &[u8]) -> Result<()> {
        match order.status {
            OrderStatus::Valid => return Ok(()),
            OrderStatus::Ready => {}
            status => {
                return Err(Error::InvalidRequest(format!(
                    "order {} is {status}, not ready",
                    order.url
                )))
            }
        }

        let payload = FinalizeOrderPayload::new(&Base64::new(csr_der)).to_json_string()?;
        let response = self.post(
            &order.finalize,
            Some(&account.url),
            &account.key,
            payload.as_bytes(),
            &[200],
        )?;
        order.update(response.json()?)?;

        log::info!("finalized order {} ({})", order.url, order.status);
        Ok(())
    }

    /// 完整的簽發流程：建立訂單、同時驗證所有授權、最終確認並下載憑證鏈。
    ///
    /// # 參數
    ///
    /// - `identifiers`: 憑證要涵蓋的識別項。
    /// - `kind`: 每個授權要使用的挑戰類型。
    /// - `responder`: 負責公開驗證內容的協作者。
    /// - `csr_der`: 涵蓋所有識別項的 CSR（DER）。
    pub fn obtain_certificate(
        &self,
        account: &Account,
        identifiers: &[Identifier],
        kind: ChallengeType,
        responder: &dyn ChallengeResponder,
        csr_der: &[u8],
    ) -> Result<CertificateChain> {
        let options = self.poll_options();
        let mut order = self.new_order(account, identifiers)?;

        if order.status == OrderStatus::Pending {
            self.authorize_all(account, &order.authorizations, kind, responder, &options)?;
        }
        self.wait_for_order(account, &mut order, &options)?;

        if order.status == OrderStatus::Ready {
            self.finalize_order(account, &mut order, csr_der)?;
            if order.status != OrderStatus::Valid {
                self.wait_for_order(account, &mut order, &options)?;
            }
        }
        if order.status != OrderStatus::Valid {
            return Err(order.invalid_state());
        }

        let certificate = order
            .certificate
            .as_deref()
            .ok_or_else(|| Error::InvalidRequest(format!("order {} has no certificate URL", order.url)))?;
        self.fetch_certificate(account, certificate)
    }

    /// 每個授權一個執行緒，各自擁有完整的輪詢期限。全部結束後回傳第一個錯誤。
    fn authorize_all(
        &self,
        account: &Account,
        urls: &[String],
        kind: ChallengeType,
        responder: &dyn ChallengeResponder,
        options: &PollOptions,
    ) -> Result<()> {
        let results: Vec<Result<()>> = thread::scope(|s| {
            let handles: Vec<_> = urls
                .iter()
                .map(|url| s.spawn(move || self.authorize(account, url, kind, responder, options)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                .collect()
        });

        results.into_iter().collect()
    }

    fn authorize(
        &self,
        account: &Account,
        url: &str,
        kind: ChallengeType,
        responder: &dyn ChallengeResponder,
        options: &PollOptions,
    ) -> Result<()> {
        let authz = self.fetch_authorization(account, url)?;
        match authz.status {
            AuthorizationStatus::Valid => return Ok(()),
            AuthorizationStatus::Processing => {
                return self.wait_for_authorization(account, url, options).map(|_| ())
            }
            AuthorizationStatus::Pending => {}
            status => {
                return Err(Error::InvalidState {
                    resource: "authorization",
                    url: url.to_owned(),
                    status: status.to_string(),
                    error: authz.error().cloned(),
                })
            }
        }

        let challenge = authz.challenge(kind).ok_or_else(|| {
            Error::InvalidRequest(format!("no {kind} challenge offered for {}", authz.identifier))
        })?;
        responder
            .present(&authz.identifier, challenge)
            .map_err(|e| Error::Responder(e.to_string()))?;

        let result = self
            .accept_challenge(account, challenge)
            .and_then(|_| self.wait_for_authorization(account, url, options));

        if let Err(e) = responder.cleanup(&authz.identifier, challenge) {
            log::warn!("cleanup of {} challenge for {} failed: {}", kind, authz.identifier, e);
        }
        result.map(|_| ())
    }
}
