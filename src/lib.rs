//! # ACME Protocol Engine
//!
//! 本庫實作 RFC 8555 ACME 協定的客戶端引擎，可與 Let's Encrypt 等 CA 交互，
//! 從帳戶註冊、訂單建立、挑戰驗證一路到憑證下載與撤銷。
//!
//! ## 特性
//!
//! - 所有請求皆以 JWS 簽名（RS256、ES256、ES384、ES512），並自動管理 anti-replay nonce
//! - `badNonce` 錯誤會以新的 nonce 自動重試一次
//! - 訂單與授權的狀態只會前進，輪詢遵守 `Retry-After` 並有期限與取消機制
//! - 支援外部帳戶綁定 (EAB)、帳戶金鑰輪替與停用
//! - HTTP 層與時鐘皆可替換，方便以假 CA 測試
//!
//! ## 使用方式
//!
//! 1. **帳戶**（`account` 模組）：以 [`AccountBuilder`] 或 [`Client::new_account`] 註冊或找回帳戶。
//! 2. **訂單**（`order` 模組）：[`Client::obtain_certificate`] 一次完成整個簽發流程；
//!    也可以分別呼叫 [`Client::new_order`]、[`Client::accept_challenge`]、
//!    [`Client::wait_for_order`] 與 [`Client::finalize_order`]。
//! 3. **挑戰**（`challenge` 模組）：實作 [`ChallengeResponder`] 把驗證內容公開給 CA。
//!
//! ## 示例
//!
//! ```no_run
//! use acmekit::{
//!     AccountBuilder, ChallengeType, Client, Csr, EcCurve, Http01FileResponder, Identifier,
//!     KeyPair, LETS_ENCRYPT_STAGING,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(LETS_ENCRYPT_STAGING)?;
//!
//!     // 1. 註冊帳戶
//!     let account = AccountBuilder::new(KeyPair::generate_ec(EcCurve::P256)?)
//!         .contact("mailto:admin@example.com")
//!         .terms_of_service_agreed(true)
//!         .register(&client)?;
//!
//!     // 2. 準備 CSR
//!     let identifiers = [Identifier::dns("example.com")];
//!     let cert_key = KeyPair::generate_ec(EcCurve::P256)?;
//!     let csr = Csr::from_identifiers(&identifiers).to_der(&cert_key)?;
//!
//!     // 3. 以 HTTP-01 驗證並取得憑證
//!     let responder = Http01FileResponder::new("/var/www/html");
//!     let chain = client.obtain_certificate(
//!         &account,
//!         &identifiers,
//!         ChallengeType::Http01,
//!         &responder,
//!         &csr,
//!     )?;
//!     println!("{}", chain.to_pem());
//!
//!     Ok(())
//! }
//! ```
//!
//! 更多詳細 API 說明請參考各個模組的文檔。

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod csr;
pub mod directory;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod protection;
pub mod signature;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use account::{Account, AccountBuilder, AccountStatus, ExternalAccountBinding};
pub use authorization::{Authorization, AuthorizationStatus};
pub use certificate::{CertificateChain, RevocationKey};
pub use challenge::{Challenge, ChallengeResponder, ChallengeType, Http01FileResponder};
pub use client::{Client, ClientBuilder, ClientConfig};
pub use csr::Csr;
pub use directory::{Directory, LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING};
pub use error::{AcmeError, Error, ErrorKind, Result};
pub use key_pair::{EcCurve, KeyAlgorithm, KeyPair};
pub use order::{Order, OrderStatus};
pub use payload::Identifier;
pub use poll::{CancelToken, PollOptions};
