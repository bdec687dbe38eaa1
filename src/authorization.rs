use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    account::Account,
    challenge::{Challenge, ChallengeType},
    client::Client,
    error::{AcmeError, Error, Result},
    payload::{Identifier, PayloadT, StatusPayload},
    poll::{PollOptions, Poller},
};

/// 授權狀態。`pending` 與 `processing` 會再變化，其餘皆為終結狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    /// 部分 CA 在驗證進行中回報此狀態。
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 單一識別項的授權，內含可選用的挑戰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(skip)]
    pub url: String,
    pub status: AuthorizationStatus,
    pub identifier: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    /// 取得指定類型的挑戰。
    pub fn challenge(&self, kind: ChallengeType) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.kind() == Some(kind))
    }

    /// 驗證失敗時，CA 附在挑戰上的錯誤。
    pub fn error(&self) -> Option<&AcmeError> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}

impl Client {
    /// 讀取授權，並為每個挑戰計算 key authorization。
    pub fn fetch_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        self.read_authorization(account, url).map(|(authz, _)| authz)
    }

    fn read_authorization(
        &self,
        account: &Account,
        url: &str,
    ) -> Result<(Authorization, Option<Duration>)> {
        let response = self.post_as_get(url, &account.url, &account.key, &[200])?;
        let mut authz: Authorization = response.json()?;
        authz.url = url.to_owned();

        let thumbprint = account.thumbprint()?;
        for challenge in &mut authz.challenges {
            challenge.authorize(&thumbprint);
        }
        Ok((authz, response.retry_after()))
    }

    /// 輪詢授權直到離開 `pending` / `processing`。
    ///
    /// # 回傳
    ///
    /// - `valid` 時回傳授權。
    /// - 其他終結狀態回傳 [`Error::InvalidState`]，附上挑戰的錯誤。
    /// - 期限到達或被取消時回傳 [`Error::Timeout`]。
    pub fn wait_for_authorization(
        &self,
        account: &Account,
        url: &str,
        options: &PollOptions,
    ) -> Result<Authorization> {
        let mut poller = Poller::new(self.clock(), options);
        loop {
            let (authz, retry_after) = self.read_authorization(account, url)?;
            match authz.status {
                AuthorizationStatus::Valid => {
                    log::info!("authorization for {} is valid", authz.identifier);
                    return Ok(authz);
                }
                AuthorizationStatus::Pending | AuthorizationStatus::Processing => {
                    poller.wait("authorization", url, authz.status, retry_after)?;
                }
                status => {
                    return Err(Error::InvalidState {
                        resource: "authorization",
                        url: url.to_owned(),
                        status: status.to_string(),
                        error: authz.error().cloned(),
                    });
                }
            }
        }
    }

    /// 停用授權，放棄對此識別項的驗證。
    pub fn deactivate_authorization(&self, account: &Account, url: &str) -> Result<Authorization> {
        let payload = StatusPayload::deactivated().to_json_string()?;
        let response = self.post(
            url,
            Some(&account.url),
            &account.key,
            payload.as_bytes(),
            &[200],
        )?;
        let mut authz: Authorization = response.json()?;
        authz.url = url.to_owned();
        Ok(authz)
    }
}
