//! 多路复用器（Multiplexer）：让非阻塞套接字上的调用线程挂起，直到传输库报告就绪。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 非阻塞模式下传输原语返回“暂不可用”，调用方需要一个既不忙等、又能被并发 `close`
//!   打断的挂起点；
//! - 每个进程只维护一个传输库 epoll 实例与一个轮询线程，所有非阻塞套接字共享；
//!   每个描述符对应一个 [`PollHandle`]，内部以互斥锁 + 条件变量承载就绪位。
//!
//! ## 契约 (What)
//! - [`Multiplexer::wait`] 只在以下三种情况返回：所需兴趣（或错误）就绪、超时、句柄被注销；
//!   超时为 `None` 或零时无限等待；
//! - 注销（[`Multiplexer::unregister`]）会唤醒该描述符上的全部等待者，使其得到
//!   [`WaitError::Cancelled`]；
//! - 就绪事件派发后立即撤销对应兴趣，避免水平触发造成的空转；错误位是粘滞的，
//!   一旦出现便不再清除。
//!
//! ## 实现要点 (How)
//! - 锁顺序固定为 `registry → desc → 传输库`，轮询线程在派发前先释放 registry；
//! - 轮询线程以固定间隔醒来检查关闭标志，`shutdown` 同时释放 epoll 实例以立即唤醒它。

use std::{
    collections::HashMap,
    fmt,
    ops::{BitAnd, BitOr, BitOrAssign},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::{
    api::{Descriptor, EpollId, SrtApi},
    error::{ApiError, ErrorCode, Operation, SrtError},
};

/// 就绪兴趣位集合。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interest(u8);

impl Interest {
    pub const EMPTY: Interest = Interest(0);
    pub const READABLE: Interest = Interest(0b001);
    pub const WRITABLE: Interest = Interest(0b010);
    /// 描述符进入错误/断开状态；总是隐式订阅。
    pub const ERROR: Interest = Interest(0b100);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_readable(self) -> bool {
        self.intersects(Self::READABLE)
    }

    pub const fn is_writable(self) -> bool {
        self.intersects(Self::WRITABLE)
    }

    pub const fn is_error(self) -> bool {
        self.intersects(Self::ERROR)
    }

    /// 移除部分兴趣位。
    pub const fn remove(self, other: Interest) -> Self {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("EMPTY");
        }
        let mut first = true;
        for (flag, name) in [
            (Self::READABLE, "READABLE"),
            (Self::WRITABLE, "WRITABLE"),
            (Self::ERROR, "ERROR"),
        ] {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// 等待失败的三种形态。
#[derive(Debug, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    /// 句柄被注销（套接字关闭或多路复用器停止）。
    Cancelled,
    Transport(ApiError),
}

impl WaitError {
    /// 以发起等待的操作为上下文转换为 [`SrtError`]。
    pub fn into_error(self, op: Operation) -> SrtError {
        match self {
            WaitError::TimedOut => SrtError::TimedOut { op },
            WaitError::Cancelled => SrtError::Cancelled { op },
            WaitError::Transport(source) => SrtError::Transport {
                op: Operation::Poll,
                source,
            },
        }
    }
}

#[derive(Default)]
struct DescState {
    ready: Interest,
    armed: Interest,
    closed: bool,
}

struct PollDesc {
    fd: Descriptor,
    state: Mutex<DescState>,
    wakeup: Condvar,
}

impl PollDesc {
    fn fire(&self, api: &dyn SrtApi, eid: EpollId, events: Interest) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.ready |= events;
        let remaining = state.armed.remove(events);
        if remaining != state.armed {
            state.armed = remaining;
            if let Err(error) = api.epoll_update(eid, self.fd, remaining) {
                tracing::debug!(fd = self.fd, %error, "failed to disarm fired interest");
            }
        }
        self.wakeup.notify_all();
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.wakeup.notify_all();
    }
}

/// 描述符在多路复用器中的注册凭证。
#[derive(Clone)]
pub struct PollHandle {
    desc: Arc<PollDesc>,
}

impl PollHandle {
    pub fn descriptor(&self) -> Descriptor {
        self.desc.fd
    }

    pub fn is_cancelled(&self) -> bool {
        self.desc.state.lock().closed
    }
}

impl fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollHandle").field("fd", &self.desc.fd).finish()
    }
}

struct Shared {
    api: Arc<dyn SrtApi>,
    eid: EpollId,
    registry: Mutex<HashMap<Descriptor, Arc<PollDesc>>>,
    shutdown: AtomicBool,
    interval: Duration,
}

impl Shared {
    fn run(&self) {
        tracing::debug!(eid = self.eid, "srt poller started");
        while !self.shutdown.load(Ordering::Acquire) {
            let events = match self.api.epoll_wait(self.eid, Some(self.interval)) {
                Ok(events) => events,
                Err(error) if error.code() == ErrorCode::InvalidPollId => break,
                Err(error) => {
                    tracing::warn!(eid = self.eid, %error, "srt epoll wait failed");
                    thread::sleep(self.interval);
                    continue;
                }
            };
            for (fd, ready) in events {
                let desc = self.registry.lock().get(&fd).cloned();
                match desc {
                    Some(desc) => desc.fire(self.api.as_ref(), self.eid, ready),
                    None => tracing::trace!(fd, "readiness for unregistered descriptor"),
                }
            }
        }
        tracing::debug!(eid = self.eid, "srt poller stopped");
    }
}

/// 进程级多路复用器。
pub struct Multiplexer {
    shared: Arc<Shared>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// 零时长与 `None` 同义，都表示不设时限。
pub(crate) fn finite_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|timeout| !timeout.is_zero())
}

impl Multiplexer {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(api: Arc<dyn SrtApi>) -> Result<Self, SrtError> {
        Self::with_interval(api, Self::DEFAULT_INTERVAL)
    }

    /// 创建 epoll 实例并启动轮询线程；`interval` 决定关闭检测的最大延迟。
    pub fn with_interval(api: Arc<dyn SrtApi>, interval: Duration) -> Result<Self, SrtError> {
        let eid = api
            .epoll_create()
            .map_err(SrtError::transport(Operation::Poll))?;
        let shared = Arc::new(Shared {
            api,
            eid,
            registry: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            interval,
        });
        let worker = Arc::clone(&shared);
        let poller = thread::Builder::new()
            .name("spark-srt-poller".into())
            .spawn(move || worker.run());
        let poller = match poller {
            Ok(handle) => handle,
            Err(error) => {
                if let Err(release_error) = shared.api.epoll_release(eid) {
                    tracing::debug!(eid, %release_error, "epoll release failed");
                }
                return Err(SrtError::Transport {
                    op: Operation::Poll,
                    source: ApiError::new(
                        ErrorCode::Resource,
                        format!("cannot spawn poller thread: {error}"),
                    ),
                });
            }
        };
        Ok(Self {
            shared,
            poller: Mutex::new(Some(poller)),
        })
    }

    /// 注册描述符；重复注册返回同一句柄。
    pub fn register(&self, fd: Descriptor) -> Result<PollHandle, SrtError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SrtError::Cancelled { op: Operation::Poll });
        }
        let mut registry = self.shared.registry.lock();
        if let Some(desc) = registry.get(&fd) {
            return Ok(PollHandle {
                desc: Arc::clone(desc),
            });
        }
        self.shared
            .api
            .epoll_add(self.shared.eid, fd, Interest::EMPTY)
            .map_err(SrtError::transport(Operation::Poll))?;
        let desc = Arc::new(PollDesc {
            fd,
            state: Mutex::new(DescState::default()),
            wakeup: Condvar::new(),
        });
        registry.insert(fd, Arc::clone(&desc));
        tracing::trace!(fd, "registered with srt poller");
        Ok(PollHandle { desc })
    }

    /// 挂起直到 `interest` 或错误就绪，返回实际就绪的位。
    pub fn wait(
        &self,
        handle: &PollHandle,
        interest: Interest,
        timeout: Option<Duration>,
    ) -> Result<Interest, WaitError> {
        let desc = &handle.desc;
        let wanted = interest | Interest::ERROR;
        let deadline = finite_timeout(timeout).map(|timeout| Instant::now() + timeout);
        let mut state = desc.state.lock();
        loop {
            if state.closed {
                return Err(WaitError::Cancelled);
            }
            let hit = state.ready & wanted;
            if !hit.is_empty() {
                // 错误位保持粘滞，后续等待者同样能观察到。
                state.ready = state.ready.remove(hit.remove(Interest::ERROR));
                return Ok(hit);
            }
            if !state.armed.contains(wanted) {
                state.armed |= wanted;
                self.shared
                    .api
                    .epoll_update(self.shared.eid, desc.fd, state.armed)
                    .map_err(WaitError::Transport)?;
            }
            match deadline {
                Some(deadline) => {
                    if desc.wakeup.wait_until(&mut state, deadline).timed_out() {
                        let hit = state.ready & wanted;
                        if state.closed || hit.is_empty() {
                            return Err(if state.closed {
                                WaitError::Cancelled
                            } else {
                                WaitError::TimedOut
                            });
                        }
                    }
                }
                None => desc.wakeup.wait(&mut state),
            }
        }
    }

    /// 注销描述符并唤醒全部等待者。
    pub fn unregister(&self, handle: &PollHandle) {
        let fd = handle.desc.fd;
        let removed = {
            let mut registry = self.shared.registry.lock();
            match registry.get(&fd) {
                Some(current) if Arc::ptr_eq(current, &handle.desc) => registry.remove(&fd),
                _ => None,
            }
        };
        handle.desc.cancel();
        if removed.is_some() {
            if let Err(error) = self.shared.api.epoll_remove(self.shared.eid, fd) {
                tracing::trace!(fd, %error, "epoll remove after close");
            }
        }
    }

    pub fn registered(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// 停止轮询线程、取消全部等待并释放 epoll 实例；可重复调用。
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let descs: Vec<Arc<PollDesc>> = self.shared.registry.lock().drain().map(|(_, desc)| desc).collect();
        for desc in descs {
            desc.cancel();
        }
        if let Err(error) = self.shared.api.epoll_release(self.shared.eid) {
            tracing::debug!(eid = self.shared.eid, %error, "epoll release failed");
        }
        if let Some(poller) = self.poller.lock().take() {
            if poller.join().is_err() {
                tracing::error!("srt poller thread panicked");
            }
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("eid", &self.shared.eid)
            .field("registered", &self.registered())
            .finish()
    }
}
