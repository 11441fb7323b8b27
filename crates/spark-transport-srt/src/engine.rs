//! 进程级引擎上下文：传输库句柄 + 共享多路复用器。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 传输库要求进程级初始化与清理，而测试、嵌入方可能重复调用初始化；
//!   这里用“受保护的单例 + 引用计数”让初始化幂等、清理对称；
//! - 套接字各自持有 `Arc<Engine>`，最后一次 [`cleanup_engine`] 只释放全局引用，
//!   存活的套接字不会因此失效，待它们全部释放后才真正拆除。
//!
//! ## 契约 (What)
//! - 在 [`init_engine`] 之前创建套接字返回 [`SrtError::NotInitialized`]；
//! - [`init_engine_with`] 的配置只在首次初始化时生效，之后的调用只增加引用；
//! - 多余的 [`cleanup_engine`] 调用是无害的空操作。

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::{Mutex, const_mutex};

use crate::{
    api::SrtApi, error::SrtError, loopback::LoopbackApi, poll::Multiplexer,
    reject::RejectCodeRange,
};

/// 引擎初始化参数。
#[derive(Clone)]
pub struct EngineConfig {
    api: Option<Arc<dyn SrtApi>>,
    reject_range: RejectCodeRange,
    poll_interval: Duration,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            api: None,
            reject_range: RejectCodeRange::DEFAULT,
            poll_interval: Multiplexer::DEFAULT_INTERVAL,
        }
    }

    /// 指定传输库后端；缺省使用进程内 [`LoopbackApi`]。
    pub fn with_api(mut self, api: Arc<dyn SrtApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// 指定拒绝码分段；仅作用于缺省后端。
    pub fn with_reject_range(mut self, range: RejectCodeRange) -> Self {
        self.reject_range = range;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("custom_api", &self.api.is_some())
            .field("reject_range", &self.reject_range)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// 已启动的引擎。
pub(crate) struct Engine {
    api: Arc<dyn SrtApi>,
    multiplexer: Multiplexer,
    reject_range: RejectCodeRange,
}

impl Engine {
    pub(crate) fn start(config: EngineConfig) -> Result<Self, SrtError> {
        let api = config.api.unwrap_or_else(|| {
            Arc::new(LoopbackApi::with_reject_range(config.reject_range)) as Arc<dyn SrtApi>
        });
        api.startup().map_err(SrtError::Startup)?;
        let multiplexer = match Multiplexer::with_interval(Arc::clone(&api), config.poll_interval) {
            Ok(multiplexer) => multiplexer,
            Err(error) => {
                api.cleanup();
                return Err(error);
            }
        };
        tracing::debug!(reject_range = ?config.reject_range, "srt engine started");
        Ok(Self {
            api,
            multiplexer,
            reject_range: config.reject_range,
        })
    }

    pub(crate) fn api(&self) -> &dyn SrtApi {
        self.api.as_ref()
    }

    pub(crate) fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    pub(crate) fn reject_range(&self) -> RejectCodeRange {
        self.reject_range
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.multiplexer.shutdown();
        self.api.cleanup();
        tracing::debug!("srt engine torn down");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("multiplexer", &self.multiplexer)
            .field("reject_range", &self.reject_range)
            .finish()
    }
}

struct Slot {
    engine: Arc<Engine>,
    references: usize,
}

static SLOT: Mutex<Option<Slot>> = const_mutex(None);

/// 以缺省配置初始化进程级引擎；可重复调用，每次调用需对应一次 [`cleanup_engine`]。
pub fn init_engine() -> Result<(), SrtError> {
    init_engine_with(EngineConfig::default())
}

/// 以指定配置初始化进程级引擎。
pub fn init_engine_with(config: EngineConfig) -> Result<(), SrtError> {
    let mut slot = SLOT.lock();
    if let Some(slot) = slot.as_mut() {
        if config.api.is_some() || config.reject_range != slot.engine.reject_range {
            tracing::warn!(
                ?config,
                "srt engine already initialized; new configuration ignored"
            );
        }
        slot.references += 1;
        return Ok(());
    }
    let engine = Engine::start(config)?;
    *slot = Some(Slot {
        engine: Arc::new(engine),
        references: 1,
    });
    Ok(())
}

/// 释放一次引用；最后一次释放拆除引擎（存活套接字持有的引用除外）。
pub fn cleanup_engine() {
    let released = {
        let mut slot = SLOT.lock();
        match slot.as_mut() {
            Some(current) if current.references > 1 => {
                current.references -= 1;
                None
            }
            Some(_) => slot.take(),
            None => {
                tracing::trace!("cleanup ignored: srt engine is not initialized");
                None
            }
        }
    };
    // 在锁外析构，避免拆除过程阻塞并发的初始化。
    drop(released);
}

pub fn is_engine_initialized() -> bool {
    SLOT.lock().is_some()
}

pub(crate) fn current() -> Result<Arc<Engine>, SrtError> {
    SLOT.lock()
        .as_ref()
        .map(|slot| Arc::clone(&slot.engine))
        .ok_or(SrtError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{SocketStatus, SrtApi},
        error::ErrorCode,
    };

    #[test]
    fn dropping_engine_cleans_up_transport() {
        let api = Arc::new(LoopbackApi::new());
        let engine = Engine::start(EngineConfig::new().with_api(api.clone()))
            .expect("engine starts");
        let fd = engine.api().create_socket().expect("create");
        assert_eq!(api.status(fd), SocketStatus::Init);
        drop(engine);
        assert_eq!(api.status(fd), SocketStatus::NonExist);
        assert_eq!(
            api.create_socket().map_err(|err| err.code()),
            Err(ErrorCode::InvalidOp)
        );
    }

    #[test]
    fn default_backend_uses_configured_range() {
        let range = RejectCodeRange::new(100, 200).expect("valid range");
        let engine = Engine::start(EngineConfig::new().with_reject_range(range))
            .expect("engine starts");
        assert_eq!(engine.reject_range(), range);
        assert_eq!(engine.multiplexer().registered(), 0);
    }
}
