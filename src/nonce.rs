use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

/// 池中最多保留的 nonce 數量，超過時丟棄最舊的。
const MAX_POOLED_NONCES: usize = 32;

/// 執行緒安全的一次性 nonce 快取。
///
/// 每個回應的 `Replay-Nonce` 都會放入池中，每次簽名請求從池中取出一個。
/// `take` 與 `put` 在同一把鎖下進行，因此同一個 nonce 不會被兩個請求同時取得。
#[derive(Debug, Default)]
pub struct NoncePool {
    nonces: Mutex<VecDeque<String>>,
}

impl NoncePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出一個 nonce；池為空時回傳 `None`，呼叫端需另向 newNonce 端點索取。
    ///
    /// 優先回傳最新放入的 nonce，較舊的 nonce 較可能已被伺服器淘汰。
    pub fn take(&self) -> Option<String> {
        self.lock().pop_back()
    }

    /// 放入一個新的 nonce。空字串與已在池中的值會被忽略。
    pub fn put(&self, nonce: impl Into<String>) {
        let nonce = nonce.into();
        if nonce.is_empty() {
            return;
        }

        let mut nonces = self.lock();
        if nonces.contains(&nonce) {
            return;
        }
        if nonces.len() >= MAX_POOLED_NONCES {
            nonces.pop_front();
        }
        nonces.push_back(nonce);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.nonces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
