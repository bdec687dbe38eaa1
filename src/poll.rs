//! 輪詢的時間來源、取消訊號與等待策略。
//!
//! 授權與訂單的狀態由 CA 在自己的時程上推進，客戶端只能反覆讀取。每一輪等待
//! 取 `Retry-After` 與設定間隔兩者中較大的值；若等待會超過期限或已被取消，
//! 立即回傳逾時錯誤而不是睡到期限才回來。

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::error::{Error, Result};

/// 預設的輪詢間隔。
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// 預設的整體輪詢期限。
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(90);

/// 可被多個執行緒共用的取消訊號。
///
/// 複製出的 token 共用同一個狀態，任何一份呼叫 [`CancelToken::cancel`]
/// 都會喚醒所有正在等待的輪詢。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 最多等待 `duration`，被取消時提早返回。回傳值表示是否已取消。
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// 時間來源。正式環境使用 [`SystemClock`]，測試使用 [`MockClock`]。
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// 睡眠 `duration`；若提供 `cancel` 且在期間被取消，應提早返回。
    fn sleep(&self, duration: Duration, cancel: Option<&CancelToken>);
}

/// 使用真實時間的時鐘。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: Option<&CancelToken>) {
        match cancel {
            Some(token) => {
                token.wait_timeout(duration);
            }
            None => std::thread::sleep(duration),
        }
    }
}

/// 虛擬時鐘：`sleep` 不會真的等待，只推進時間並記錄每次睡眠長度。
#[derive(Debug)]
pub struct MockClock {
    start: Instant,
    state: Mutex<MockClockState>,
}

#[derive(Debug, Default)]
struct MockClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Mutex::new(MockClockState::default()),
        }
    }

    /// 手動推進虛擬時間。
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// 依序回傳所有 `sleep` 的長度。
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.lock().elapsed
    }

    fn sleep(&self, duration: Duration, _cancel: Option<&CancelToken>) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// 單次輪詢的參數。
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// 兩次讀取之間的最短間隔；伺服器的 `Retry-After` 較長時以其為準。
    pub interval: Duration,
    /// 從開始輪詢起算的整體期限。
    pub timeout: Duration,
    pub cancel: Option<CancelToken>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            cancel: None,
        }
    }
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// 追蹤一次輪詢的期限。
pub(crate) struct Poller<'a> {
    clock: &'a dyn Clock,
    options: &'a PollOptions,
    started: Instant,
    /// `None` 表示期限超出時鐘可表示的範圍，視為沒有期限。
    deadline: Option<Instant>,
    attempts: u32,
}

impl<'a> Poller<'a> {
    pub(crate) fn new(clock: &'a dyn Clock, options: &'a PollOptions) -> Self {
        let started = clock.now();
        Self {
            clock,
            options,
            started,
            deadline: started.checked_add(options.timeout),
            attempts: 0,
        }
    }

    /// 在下一次讀取前等待。
    ///
    /// # 參數
    ///
    /// - `resource` / `url` / `status`: 用於日誌與逾時錯誤。
    /// - `retry_after`: 最近一次回應的 `Retry-After`。
    ///
    /// # 回傳
    ///
    /// 等待完成時回傳 `Ok(())`；已取消或等待會超過期限時回傳 [`Error::Timeout`]。
    pub(crate) fn wait(
        &mut self,
        resource: &'static str,
        url: &str,
        status: impl fmt::Display,
        retry_after: Option<Duration>,
    ) -> Result<()> {
        let cancelled = self.options.is_cancelled();
        let wait = retry_after
            .unwrap_or(Duration::ZERO)
            .max(self.options.interval);
        let now = self.clock.now();
        let past_deadline = match (now.checked_add(wait), self.deadline) {
            (None, _) => true,
            (Some(wake), Some(deadline)) => wake > deadline,
            (Some(_), None) => false,
        };

        if cancelled || past_deadline {
            return Err(Error::timeout(
                resource,
                url,
                status,
                now.saturating_duration_since(self.started),
                cancelled,
            ));
        }

        self.attempts += 1;
        log::debug!(
            "{} {} is {}, polling again in {:?} (attempt {})",
            resource,
            url,
            status,
            wait,
            self.attempts
        );
        self.clock.sleep(wait, self.options.cancel.as_ref());

        if self.options.is_cancelled() {
            return Err(Error::timeout(
                resource,
                url,
                status,
                self.clock.now().saturating_duration_since(self.started),
                true,
            ));
        }
        Ok(())
    }
}
