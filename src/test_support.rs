//! 測試用的假 CA：以 [`MockTransport`] 模擬一個遵守 RFC 8555 的伺服器。

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    x509::{X509Name, X509},
};
use reqwest::Method;
use serde_json::{json, Value};

use crate::{
    base64::Base64,
    client::{Client, ClientBuilder},
    poll::MockClock,
    transport::{HttpRequest, HttpResponse, MockTransport, PEM_CERTIFICATE_CHAIN, REPLAY_NONCE},
};

pub(crate) const BASE: &str = "https://ca.test";
const PROBLEM: &str = "urn:ietf:params:acme:error:";

pub(crate) struct FakeCa {
    pub transport: Arc<MockTransport>,
    pub clock: Arc<MockClock>,
    state: Arc<Mutex<CaState>>,
}

impl FakeCa {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(CaState::default()));
        let handler_state = Arc::clone(&state);
        let transport = MockTransport::new(move |req| {
            handler_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handle(req)
        });

        Self {
            transport: Arc::new(transport),
            clock: Arc::new(MockClock::new()),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{BASE}{path}")
    }

    pub fn client(&self) -> Client {
        ClientBuilder::new()
            .directory_url(&self.url("/directory"))
            .transport(self.transport.clone())
            .clock(self.clock.clone())
            .build()
            .unwrap()
    }

    /// 所有已簽名請求使用過的 nonce。
    pub fn used_nonces(&self) -> Vec<String> {
        self.state().used.clone()
    }

    /// 接下來 `n` 個簽名請求一律回傳 badNonce。
    pub fn reject_nonces(&self, n: usize) {
        self.state().reject_nonces = n;
    }

    pub fn require_external_account(&self) {
        self.state().external_account_required = true;
    }

    /// 挑戰被接受後，授權維持 pending 的輪詢次數。
    pub fn set_pending_polls(&self, n: usize) {
        self.state().pending_polls = n;
    }

    /// finalize 後，訂單維持 processing 的輪詢次數。
    pub fn set_processing_polls(&self, n: usize) {
        self.state().processing_polls = n;
    }

    pub fn set_retry_after(&self, secs: u64) {
        self.state().retry_after = Some(secs);
    }

    /// 讓指定識別項的驗證失敗。
    pub fn fail_identifier(&self, value: &str) {
        self.state().failing.insert(value.to_owned());
    }

    /// 伺服器端記錄的帳戶聯絡資訊。
    pub fn account_contact(&self, index: usize) -> Vec<String> {
        self.state().accounts[index].contact.clone()
    }

    pub fn account_eab_kid(&self, index: usize) -> Option<String> {
        self.state().accounts[index].eab_kid.clone()
    }

    pub fn finalized_csr(&self, order: usize) -> Option<String> {
        self.state().orders[order].csr.clone()
    }

    pub fn revoked(&self) -> Vec<(String, Option<u64>)> {
        self.state().revoked.clone()
    }

    fn state(&self) -> MutexGuard<'_, CaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct CaState {
    next_nonce: u64,
    issued: HashSet<String>,
    used: Vec<String>,
    reject_nonces: usize,
    external_account_required: bool,
    pending_polls: usize,
    processing_polls: usize,
    retry_after: Option<u64>,
    failing: HashSet<String>,
    accounts: Vec<FakeAccount>,
    orders: Vec<FakeOrder>,
    authzs: Vec<FakeAuthz>,
    revoked: Vec<(String, Option<u64>)>,
}

struct FakeAccount {
    jwk: Value,
    status: String,
    contact: Vec<String>,
    eab_kid: Option<String>,
    orders: Vec<usize>,
}

struct FakeOrder {
    identifiers: Vec<Value>,
    authzs: Vec<usize>,
    finalized: bool,
    processing_left: usize,
    csr: Option<String>,
}

struct FakeAuthz {
    identifier: Value,
    status: String,
    accepted: Option<String>,
    polls_left: usize,
}

struct Signed {
    header: Value,
    payload: Option<Value>,
}

fn decode_part(part: &Value) -> Option<Vec<u8>> {
    Base64::from_url(part.as_str()?).ok()?.decode().ok()
}

fn decode_jws(jws: &Value) -> Option<(Value, Vec<u8>)> {
    let header = serde_json::from_slice(&decode_part(&jws["protected"])?).ok()?;
    let payload = decode_part(&jws["payload"])?;
    Some((header, payload))
}

fn index_after(path: &str, prefix: &str) -> Option<usize> {
    path.strip_prefix(prefix)?.split('/').next()?.parse().ok()
}

impl CaState {
    fn handle(&mut self, req: &HttpRequest) -> HttpResponse {
        let path = req.url.strip_prefix(BASE).unwrap_or(&req.url).to_owned();
        if req.method == Method::GET && path == "/directory" {
            return HttpResponse::new(200).with_json(&json!({
                "newNonce": format!("{BASE}/new-nonce"),
                "newAccount": format!("{BASE}/new-acct"),
                "newOrder": format!("{BASE}/new-order"),
                "revokeCert": format!("{BASE}/revoke-cert"),
                "keyChange": format!("{BASE}/key-change"),
                "meta": {
                    "termsOfService": format!("{BASE}/terms"),
                    "externalAccountRequired": self.external_account_required,
                }
            }));
        }
        if req.method == Method::HEAD && path == "/new-nonce" {
            return self.empty(200);
        }
        if req.method == Method::POST {
            return self.handle_post(&path, req);
        }
        self.problem(405, "malformed", "method not allowed")
    }

    fn handle_post(&mut self, path: &str, req: &HttpRequest) -> HttpResponse {
        let Some(signed) = self.verify(req) else {
            return self.problem(400, "malformed", "request is not a JWS");
        };
        let signed = match signed {
            Ok(signed) => signed,
            Err(response) => return response,
        };
        if signed.header["url"] != req.url.as_str() {
            return self.problem(401, "unauthorized", "url header mismatch");
        }

        if path == "/new-acct" {
            return self.new_account(&signed);
        }
        if path == "/revoke-cert" {
            return self.revoke(&signed);
        }
        let known = ["/key-change", "/new-order"].contains(&path)
            || ["/acct/", "/order/", "/finalize/", "/authz/", "/chall/", "/cert/"]
                .iter()
                .any(|prefix| path.starts_with(prefix));
        if !known {
            return self.problem(404, "malformed", "Unable to find resource");
        }

        let Some(account) = signed.header["kid"]
            .as_str()
            .and_then(|kid| index_after(kid, &format!("{BASE}/acct/")))
            .filter(|i| *i < self.accounts.len())
        else {
            return self.problem(400, "accountDoesNotExist", "unknown kid");
        };
        if self.accounts[account].status != "valid" {
            return self.problem(403, "unauthorized", "account is not valid");
        }

        if path == "/key-change" {
            return self.key_change(account, &signed);
        }
        if path == "/new-order" {
            return self.new_order(account, &signed);
        }
        if path == format!("/acct/{account}/orders") {
            let urls: Vec<String> = self.accounts[account]
                .orders
                .iter()
                .map(|o| format!("{BASE}/order/{o}"))
                .collect();
            return self
                .json(200, &json!({ "orders": urls }))
                .with_header("Link", &format!("<{BASE}/acct/{account}/orders?cursor=2>;rel=\"next\""));
        }
        if path == format!("/acct/{account}") {
            return self.update_account(account, &signed);
        }
        if let Some(o) = index_after(path, "/order/").filter(|o| *o < self.orders.len()) {
            if self.orders[o].processing_left > 0 {
                self.orders[o].processing_left -= 1;
            }
            return self.order_response(200, o);
        }
        if let Some(o) = index_after(path, "/finalize/").filter(|o| *o < self.orders.len()) {
            return self.finalize(o, &signed);
        }
        if let Some(a) = index_after(path, "/authz/").filter(|a| *a < self.authzs.len()) {
            return self.authorization(a, &signed);
        }
        if let Some(a) = index_after(path, "/chall/").filter(|a| *a < self.authzs.len()) {
            let kind = path.rsplit('/').next().unwrap_or_default().to_owned();
            if signed.payload.is_some() && self.authzs[a].accepted.is_none() {
                self.authzs[a].accepted = Some(kind.clone());
                self.authzs[a].polls_left = self.pending_polls;
            }
            let body = self.challenge_json(a, &kind);
            return self.json(200, &body);
        }
        if let Some(o) = index_after(path, "/cert/").filter(|o| *o < self.orders.len()) {
            if !self.orders[o].finalized {
                return self.problem(404, "malformed", "no certificate");
            }
            let cn = self.orders[o].identifiers[0]["value"]
                .as_str()
                .unwrap_or_default()
                .to_owned();
            let alternate = path.ends_with("/alt");
            let chain = issue_chain(&cn, if alternate { "Alt Root" } else { "Fake Root" });
            let mut response = self
                .empty(200)
                .with_header("Content-Type", PEM_CERTIFICATE_CHAIN)
                .with_body(chain);
            if !alternate {
                response = response
                    .with_header("Link", &format!("<{BASE}/cert/{o}/alt>;rel=\"alternate\""));
            }
            return response;
        }

        self.problem(404, "malformed", "Unable to find resource")
    }

    /// 檢查 nonce；回傳 `None` 表示內容不是 JWS。
    fn verify(&mut self, req: &HttpRequest) -> Option<Result<Signed, HttpResponse>> {
        let jws: Value = req.body_json()?;
        let (header, payload) = decode_jws(&jws)?;

        let nonce = header["nonce"].as_str().unwrap_or_default().to_owned();
        if !self.issued.remove(&nonce) {
            return Some(Err(self.problem(400, "badNonce", "JWS has an invalid anti-replay nonce")));
        }
        self.used.push(nonce);
        if self.reject_nonces > 0 {
            self.reject_nonces -= 1;
            return Some(Err(self.problem(400, "badNonce", "JWS has an invalid anti-replay nonce")));
        }

        let payload = if payload.is_empty() {
            None
        } else {
            match serde_json::from_slice(&payload) {
                Ok(value) => Some(value),
                Err(_) => return None,
            }
        };
        Some(Ok(Signed { header, payload }))
    }

    fn new_account(&mut self, signed: &Signed) -> HttpResponse {
        if signed.header.get("kid").is_some() || signed.header.get("jwk").is_none() {
            return self.problem(400, "malformed", "newAccount must be signed with jwk");
        }
        let jwk = signed.header["jwk"].clone();
        let payload = signed.payload.clone().unwrap_or_default();

        if let Some(index) = self.accounts.iter().position(|a| a.jwk == jwk) {
            return self
                .account_response(200, index)
                .with_header("Location", &format!("{BASE}/acct/{index}"));
        }
        if payload["onlyReturnExisting"] == true {
            return self.problem(400, "accountDoesNotExist", "No account exists with the provided key");
        }

        let eab = &payload["externalAccountBinding"];
        let eab_kid = if eab.is_null() {
            None
        } else {
            let Some((header, inner)) = decode_jws(eab) else {
                return self.problem(400, "malformed", "bad externalAccountBinding");
            };
            let bound: Value = serde_json::from_slice(&inner).unwrap_or_default();
            if bound != jwk
                || header["url"] != format!("{BASE}/new-acct").as_str()
                || header.get("nonce").is_some()
                || !header["alg"].as_str().unwrap_or_default().starts_with("HS")
            {
                return self.problem(400, "malformed", "externalAccountBinding does not match");
            }
            header["kid"].as_str().map(str::to_owned)
        };
        if self.external_account_required && eab_kid.is_none() {
            return self.problem(403, "externalAccountRequired", "EAB required");
        }

        let contact = payload["contact"]
            .as_array()
            .map(|c| c.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default();
        self.accounts.push(FakeAccount {
            jwk,
            status: "valid".into(),
            contact,
            eab_kid,
            orders: Vec::new(),
        });
        let index = self.accounts.len() - 1;
        self.account_response(201, index)
            .with_header("Location", &format!("{BASE}/acct/{index}"))
    }

    fn update_account(&mut self, index: usize, signed: &Signed) -> HttpResponse {
        if let Some(payload) = &signed.payload {
            if payload["status"] == "deactivated" {
                self.accounts[index].status = "deactivated".into();
            }
            if let Some(contact) = payload["contact"].as_array() {
                self.accounts[index].contact = contact
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect();
            }
        }
        self.account_response(200, index)
    }

    fn key_change(&mut self, index: usize, signed: &Signed) -> HttpResponse {
        let Some((inner_header, inner_payload)) =
            signed.payload.as_ref().and_then(decode_jws)
        else {
            return self.problem(400, "malformed", "key change payload is not a JWS");
        };
        let inner: Value = serde_json::from_slice(&inner_payload).unwrap_or_default();
        let new_jwk = inner_header["jwk"].clone();

        if new_jwk.is_null()
            || inner_header.get("nonce").is_some()
            || inner_header["url"] != signed.header["url"]
            || inner["account"] != signed.header["kid"]
            || inner["oldKey"] != self.accounts[index].jwk
        {
            return self.problem(400, "malformed", "invalid key change request");
        }
        if self.accounts.iter().any(|a| a.jwk == new_jwk) {
            return self.problem(409, "malformed", "new key already in use");
        }

        self.accounts[index].jwk = new_jwk;
        self.account_response(200, index)
    }

    fn new_order(&mut self, account: usize, signed: &Signed) -> HttpResponse {
        let identifiers = signed
            .payload
            .as_ref()
            .and_then(|p| p["identifiers"].as_array().cloned())
            .unwrap_or_default();
        if identifiers.is_empty() {
            return self.problem(400, "malformed", "NewOrder request did not specify any identifiers");
        }

        let authzs = identifiers
            .iter()
            .map(|identifier| {
                self.authzs.push(FakeAuthz {
                    identifier: identifier.clone(),
                    status: "pending".into(),
                    accepted: None,
                    polls_left: 0,
                });
                self.authzs.len() - 1
            })
            .collect();
        self.orders.push(FakeOrder {
            identifiers,
            authzs,
            finalized: false,
            processing_left: 0,
            csr: None,
        });
        let index = self.orders.len() - 1;
        self.accounts[account].orders.push(index);

        self.order_response(201, index)
            .with_header("Location", &format!("{BASE}/order/{index}"))
    }

    fn finalize(&mut self, index: usize, signed: &Signed) -> HttpResponse {
        if self.order_status(index) != "ready" {
            return self.problem(403, "orderNotReady", "Order's status is not ready");
        }
        let csr = signed
            .payload
            .as_ref()
            .and_then(|p| p["csr"].as_str().map(str::to_owned));
        if csr.as_deref().and_then(|c| Base64::from_url(c).ok()).is_none() {
            return self.problem(400, "badCSR", "CSR is missing or malformed");
        }

        let order = &mut self.orders[index];
        order.csr = csr;
        order.finalized = true;
        order.processing_left = self.processing_polls;
        self.order_response(200, index)
    }

    fn authorization(&mut self, index: usize, signed: &Signed) -> HttpResponse {
        if let Some(payload) = &signed.payload {
            if payload["status"] == "deactivated" {
                self.authzs[index].status = "deactivated".into();
            }
        } else {
            let authz = &mut self.authzs[index];
            if authz.status == "pending" && authz.accepted.is_some() {
                if authz.polls_left > 0 {
                    authz.polls_left -= 1;
                } else {
                    let value = authz.identifier["value"].as_str().unwrap_or_default();
                    authz.status = if self.failing.contains(value) {
                        "invalid".into()
                    } else {
                        "valid".into()
                    };
                }
            }
        }

        let authz = &self.authzs[index];
        let challenges: Vec<Value> = ["http-01", "dns-01", "tls-alpn-01"]
            .iter()
            .map(|kind| self.challenge_json(index, kind))
            .collect();
        let body = json!({
            "status": authz.status,
            "expires": "2030-01-01T00:00:00Z",
            "identifier": authz.identifier,
            "challenges": challenges,
        });
        let pending = authz.status == "pending";
        let mut response = self.json(200, &body);
        if let (true, Some(secs)) = (pending, self.retry_after) {
            response = response.with_header("Retry-After", &secs.to_string());
        }
        response
    }

    fn revoke(&mut self, signed: &Signed) -> HttpResponse {
        let payload = signed.payload.clone().unwrap_or_default();
        let Some(cert) = payload["certificate"].as_str().map(str::to_owned) else {
            return self.problem(400, "malformed", "missing certificate");
        };
        if self.revoked.iter().any(|(c, _)| *c == cert) {
            return self.problem(400, "alreadyRevoked", "Certificate already revoked");
        }
        self.revoked.push((cert, payload["reason"].as_u64()));
        self.empty(200)
    }

    fn challenge_json(&self, index: usize, kind: &str) -> Value {
        let authz = &self.authzs[index];
        let path = match kind {
            "http-01" | "http" => "http",
            "dns-01" | "dns" => "dns",
            _ => "alpn",
        };
        let kind = match path {
            "http" => "http-01",
            "dns" => "dns-01",
            _ => "tls-alpn-01",
        };
        let accepted = authz.accepted.as_deref() == Some(path);
        let status = match (accepted, authz.status.as_str()) {
            (true, "valid") => "valid",
            (true, "invalid") => "invalid",
            (true, _) => "processing",
            _ => "pending",
        };
        let mut challenge = json!({
            "type": kind,
            "url": format!("{BASE}/chall/{index}/{path}"),
            "status": status,
            "token": format!("token-{index}"),
        });
        if status == "valid" {
            challenge["validated"] = json!("2025-01-01T00:00:00Z");
        }
        if status == "invalid" {
            challenge["error"] = json!({
                "type": format!("{PROBLEM}incorrectResponse"),
                "detail": "key authorization mismatch",
                "status": 403,
            });
        }
        challenge
    }

    fn order_status(&self, index: usize) -> &'static str {
        let order = &self.orders[index];
        let statuses: Vec<&str> = order
            .authzs
            .iter()
            .map(|a| self.authzs[*a].status.as_str())
            .collect();
        if statuses.iter().any(|s| *s != "pending" && *s != "valid") {
            "invalid"
        } else if statuses.iter().any(|s| *s == "pending") {
            "pending"
        } else if !order.finalized {
            "ready"
        } else if order.processing_left > 0 {
            "processing"
        } else {
            "valid"
        }
    }

    fn order_response(&mut self, status: u16, index: usize) -> HttpResponse {
        let order_status = self.order_status(index);
        let order = &self.orders[index];
        let mut body = json!({
            "status": order_status,
            "expires": "2030-01-01T00:00:00Z",
            "identifiers": order.identifiers,
            "authorizations": order
                .authzs
                .iter()
                .map(|a| format!("{BASE}/authz/{a}"))
                .collect::<Vec<_>>(),
            "finalize": format!("{BASE}/finalize/{index}"),
        });
        if order_status == "valid" {
            body["certificate"] = json!(format!("{BASE}/cert/{index}"));
        }
        let retry_after = self.retry_after.filter(|_| order_status == "processing");
        let mut response = self.json(status, &body);
        if let Some(secs) = retry_after {
            response = response.with_header("Retry-After", &secs.to_string());
        }
        response
    }

    fn account_response(&mut self, status: u16, index: usize) -> HttpResponse {
        let account = &self.accounts[index];
        let body = json!({
            "status": account.status,
            "contact": account.contact,
            "orders": format!("{BASE}/acct/{index}/orders"),
        });
        self.json(status, &body)
    }

    fn fresh_nonce(&mut self) -> String {
        self.next_nonce += 1;
        let nonce = format!("nonce-{}", self.next_nonce);
        self.issued.insert(nonce.clone());
        nonce
    }

    fn empty(&mut self, status: u16) -> HttpResponse {
        let nonce = self.fresh_nonce();
        HttpResponse::new(status).with_header(REPLAY_NONCE, &nonce)
    }

    fn json(&mut self, status: u16, body: &Value) -> HttpResponse {
        self.empty(status).with_json(body)
    }

    fn problem(&mut self, status: u16, kind: &str, detail: &str) -> HttpResponse {
        let body = json!({
            "type": format!("{PROBLEM}{kind}"),
            "detail": detail,
            "status": status,
        });
        self.empty(status)
            .with_header("Content-Type", "application/problem+json")
            .with_body(body.to_string())
    }
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(cn: &str) -> X509Name {
    let mut name = X509Name::builder().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    name.build()
}

fn certificate(subject: &str, issuer: &str, key: &PKey<Private>, signer: &PKey<Private>, days: u32) -> X509 {
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(rand_serial()).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name(subject)).unwrap();
    builder.set_issuer_name(&name(issuer)).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(days).unwrap())
        .unwrap();
    builder.sign(signer, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn rand_serial() -> u32 {
    let mut buf = [0u8; 4];
    openssl::rand::rand_bytes(&mut buf).unwrap();
    u32::from_be_bytes(buf) >> 1
}

/// 產生 `leaf` 在前、簽發者在後的 PEM 憑證鏈，葉憑證有效 90 天。
pub(crate) fn issue_chain(cn: &str, root: &str) -> Vec<u8> {
    let root_key = ec_key();
    let leaf_key = ec_key();
    let root_cert = certificate(root, root, &root_key, &root_key, 3650);
    let leaf_cert = certificate(cn, root, &leaf_key, &root_key, 90);

    let mut pem = leaf_cert.to_pem().unwrap();
    pem.extend(root_cert.to_pem().unwrap());
    pem
}
