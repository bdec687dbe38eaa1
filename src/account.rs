//! 模塊提供與 ACME 帳戶管理相關的功能，包括註冊、外部帳戶綁定、聯絡資訊更新、
//! 金鑰輪替與停用。

use serde::{Deserialize, Serialize};

use crate::{
    base64::Base64,
    client::Client,
    error::{Error, Result},
    jws::Jws,
    key_pair::KeyPair,
    payload::{
        KeyChangePayload, NewAccountPayload, PayloadT, StatusPayload, UpdateAccountPayload,
    },
    signature::HmacAlgorithm,
    transport::HttpResponse,
};

/// 帳戶狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// CA 發給使用者、用於外部帳戶綁定的憑據。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAccountBinding {
    pub key_identifier: String,
    /// CA 提供的 base64url MAC 金鑰。
    pub mac_key: String,
    pub algorithm: HmacAlgorithm,
}

impl ExternalAccountBinding {
    pub fn new(key_identifier: &str, mac_key: &str) -> Self {
        Self {
            key_identifier: key_identifier.to_owned(),
            mac_key: mac_key.to_owned(),
            algorithm: HmacAlgorithm::default(),
        }
    }

    pub fn algorithm(mut self, algorithm: HmacAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// 產生綁定 `key` 的內層 JWS。
    fn sign(&self, key: &KeyPair, new_account_url: &str) -> Result<Jws> {
        let mac_key = Base64::from_url(&self.mac_key)
            .and_then(|b| b.decode())
            .map_err(|e| Error::InvalidRequest(format!("EAB MAC key: {e}")))?;
        let jwk = key.jwk()?.to_json()?;

        Ok(Jws::sign_hmac(
            jwk.as_bytes(),
            &mac_key,
            self.algorithm,
            &self.key_identifier,
            new_account_url,
        )?)
    }
}

/// 表示 ACME 帳戶。
///
/// `url` 在註冊後即固定不變；`key` 只會被金鑰輪替替換。
#[derive(Debug, Clone)]
pub struct Account {
    /// ACME 帳戶 URL，簽名請求時作為 `kid`。
    pub url: String,
    /// 帳戶目前使用的密鑰對。
    pub key: KeyPair,
    pub status: AccountStatus,
    pub contact: Vec<String>,
    /// 帳戶訂單列表的 URL。
    pub orders: Option<String>,
    pub external_account_binding: Option<ExternalAccountBinding>,
}

impl Account {
    /// 帳戶金鑰的 RFC 7638 thumbprint。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.key.thumbprint()?)
    }

    /// 計算挑戰 token 對應的 key authorization（`token.thumbprint`）。
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        Ok(format!("{}.{}", token, self.thumbprint()?))
    }

    fn apply(&mut self, resource: AccountResource) {
        self.status = resource.status;
        self.contact = resource.contact;
        if resource.orders.is_some() {
            self.orders = resource.orders;
        }
    }
}

/// 伺服器回傳的帳戶物件。
#[derive(Debug, Deserialize)]
struct AccountResource {
    status: AccountStatus,
    #[serde(default)]
    contact: Vec<String>,
    #[serde(default)]
    orders: Option<String>,
}

/// 帳戶的訂單列表，`next` 為下一頁的 URL。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OrderList {
    #[serde(default)]
    pub orders: Vec<String>,
    #[serde(skip)]
    pub next: Option<String>,
}

/// 判斷是否需要送出聯絡資訊更新。內容相同時只需重新讀取帳戶。
pub fn needs_update(current: &[String], requested: &[String]) -> bool {
    current != requested
}

/// 用於註冊 [`Account`] 的構造器，採用 builder 模式。
///
/// ```no_run
/// # use acmekit::{account::AccountBuilder, client::Client, key_pair::{EcCurve, KeyPair}};
/// # fn main() -> acmekit::error::Result<()> {
/// let client = Client::new(acmekit::directory::LETS_ENCRYPT_STAGING)?;
/// let account = AccountBuilder::new(KeyPair::generate_ec(EcCurve::P256)?)
///     .contact("mailto:admin@example.com")
///     .terms_of_service_agreed(true)
///     .register(&client)?;
/// # Ok(())
/// # }
/// ```
pub struct AccountBuilder {
    key: KeyPair,
    contact: Vec<String>,
    terms_of_service_agreed: bool,
    only_return_existing: bool,
    external_account_binding: Option<ExternalAccountBinding>,
}

impl AccountBuilder {
    pub fn new(key: KeyPair) -> Self {
        Self {
            key,
            contact: Vec::new(),
            terms_of_service_agreed: false,
            only_return_existing: false,
            external_account_binding: None,
        }
    }

    /// 新增一筆聯絡資訊，例如 `mailto:admin@example.com`。
    pub fn contact(mut self, contact: &str) -> Self {
        self.contact.push(contact.to_owned());
        self
    }

    pub fn terms_of_service_agreed(mut self, agreed: bool) -> Self {
        self.terms_of_service_agreed = agreed;
        self
    }

    /// 只查詢既有帳戶，不建立新帳戶。
    pub fn only_return_existing(mut self, only: bool) -> Self {
        self.only_return_existing = only;
        self
    }

    pub fn external_account_binding(mut self, eab: ExternalAccountBinding) -> Self {
        self.external_account_binding = Some(eab);
        self
    }

    pub fn register(self, client: &Client) -> Result<Account> {
        client.register(
            self.key,
            NewAccountPayload {
                only_return_existing: self.only_return_existing,
                terms_of_service_agreed: self.terms_of_service_agreed,
                contact: self.contact,
                external_account_binding: None,
            },
            self.external_account_binding,
        )
    }
}

fn to_owned_contacts(contacts: &[&str]) -> Vec<String> {
    contacts.iter().map(|c| (*c).to_owned()).collect()
}

impl Client {
    /// 向 newAccount 端點註冊帳戶。
    ///
    /// # 參數
    ///
    /// - `key`: 帳戶金鑰，請求以 `jwk` 模式簽名。
    /// - `only_return_existing`: 為 `true` 時只回傳既有帳戶，不存在則由 CA 回報
    ///   `accountDoesNotExist`。
    /// - `terms_agreed`: 是否同意服務條款。
    /// - `contacts`: 聯絡 URL 列表。
    ///
    /// # 回傳
    ///
    /// 帳戶 URL 取自回應的 `Location` 標頭。對同一把金鑰重複註冊會得到相同的 URL。
    pub fn new_account(
        &self,
        key: KeyPair,
        only_return_existing: bool,
        terms_agreed: bool,
        contacts: &[&str],
    ) -> Result<Account> {
        let payload = NewAccountPayload {
            only_return_existing,
            terms_of_service_agreed: terms_agreed,
            contact: to_owned_contacts(contacts),
            external_account_binding: None,
        };
        self.register(key, payload, None)
    }

    /// 帶外部帳戶綁定的註冊。
    pub fn new_account_external_binding(
        &self,
        key: KeyPair,
        only_return_existing: bool,
        terms_agreed: bool,
        eab: ExternalAccountBinding,
        contacts: &[&str],
    ) -> Result<Account> {
        let payload = NewAccountPayload {
            only_return_existing,
            terms_of_service_agreed: terms_agreed,
            contact: to_owned_contacts(contacts),
            external_account_binding: None,
        };
        self.register(key, payload, Some(eab))
    }

    pub(crate) fn register(
        &self,
        key: KeyPair,
        mut payload: NewAccountPayload,
        eab: Option<ExternalAccountBinding>,
    ) -> Result<Account> {
        let new_account = &self.directory().new_account;
        if let Some(eab) = &eab {
            payload.external_account_binding = Some(eab.sign(&key, new_account)?);
        } else if self.directory().external_account_required() && !payload.only_return_existing {
            log::warn!(
                "{} requires external account binding but none was provided",
                new_account
            );
        }
        payload
            .validate()
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let body = payload.to_json_string()?;
        let response = self.post(new_account, None, &key, body.as_bytes(), &[200, 201])?;
        let url = response
            .location()
            .ok_or(Error::MissingHeader("Location"))?
            .to_owned();
        let resource: AccountResource = response.json()?;

        if response.status.as_u16() == 201 {
            log::info!("registered ACME account {}", url);
        } else {
            log::debug!("found existing ACME account {}", url);
        }

        Ok(Account {
            url,
            key,
            status: resource.status,
            contact: resource.contact,
            orders: resource.orders,
            external_account_binding: eab,
        })
    }

    /// 更新帳戶聯絡資訊。
    ///
    /// 聯絡資訊與目前相同時改送 POST-as-GET，以取得伺服器上最新的帳戶狀態。
    pub fn update_account(&self, account: &mut Account, contacts: &[&str]) -> Result<()> {
        let requested = to_owned_contacts(contacts);
        let payload = if needs_update(&account.contact, &requested) {
            UpdateAccountPayload { contact: requested }.to_json_string()?
        } else {
            String::new()
        };

        let response = self.post(
            &account.url,
            Some(&account.url),
            &account.key,
            payload.as_bytes(),
            &[200],
        )?;
        account.apply(response.json()?);
        Ok(())
    }

    /// 將帳戶金鑰輪替為 `new_key`。
    ///
    /// 內層 JWS 以新金鑰簽名並嵌入新公鑰，外層以舊金鑰與帳戶 URL 簽名。成功後只有
    /// `account.key` 被替換。
    pub fn account_key_change(&self, account: &mut Account, new_key: KeyPair) -> Result<()> {
        let key_change = &self.directory().key_change;
        let inner_payload = KeyChangePayload {
            account: account.url.clone(),
            old_key: account.key.jwk()?,
        };
        let inner = Jws::sign(
            inner_payload.to_json_string()?.as_bytes(),
            &new_key,
            None,
            key_change,
            None,
        )?;

        self.post(
            key_change,
            Some(&account.url),
            &account.key,
            inner.to_json()?.as_bytes(),
            &[200],
        )?;
        account.key = new_key;

        log::info!("rolled over key for account {}", account.url);
        Ok(())
    }

    /// 停用帳戶。停用後 CA 會拒絕此帳戶的所有請求。
    pub fn deactivate_account(&self, account: &mut Account) -> Result<()> {
        let payload = StatusPayload::deactivated().to_json_string()?;
        let response = self.post(
            &account.url,
            Some(&account.url),
            &account.key,
            payload.as_bytes(),
            &[200],
        )?;
        account.apply(response.json()?);

        log::info!("deactivated account {}", account.url);
        Ok(())
    }

    /// 讀取帳戶訂單列表的第一頁。
    pub fn fetch_order_list(&self, account: &Account) -> Result<OrderList> {
        let url = account.orders.as_deref().ok_or(Error::NoOrderList)?;
        self.fetch_order_list_page(account, url)
    }

    /// 讀取訂單列表的指定頁，通常為上一頁的 [`OrderList::next`]。
    pub fn fetch_order_list_page(&self, account: &Account, url: &str) -> Result<OrderList> {
        let response = self.post_as_get(url, &account.url, &account.key, &[200])?;
        order_list(&response)
    }
}

fn order_list(response: &HttpResponse) -> Result<OrderList> {
    let mut list: OrderList = response.json()?;
    list.next = response.links("next").into_iter().next();
    Ok(list)
}
