//! SRT 套接字句柄：生命周期状态机 + 阻塞/非阻塞双模驱动。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 每个 [`SrtSocket`] 独占一个传输库描述符，直到 [`SrtSocket::close`]；
//! - 阻塞与非阻塞两种模式统一表达为“执行原语 → 未就绪则挂起 → 重试”：
//!   阻塞模式把挂起交给传输库原语，非阻塞模式在 [`Multiplexer`](crate::Multiplexer) 上等待。
//!
//! ## 契约 (What)
//! - 监听者：`Created → Bound → Listening`；连接者：`Created → Connecting → Connected`；
//!   任意状态 → `Closed`（终态，幂等）；
//! - `close` 可以在其它线程上与进行中的 `accept`/`connect`/`read`/`write` 并发调用，
//!   后者以 [`SrtError::Cancelled`] 返回；关闭之后再发起的调用返回 [`SrtError::Closed`]；
//! - `connect` 失败时，拒绝原因在错误返回之前已写入套接字，可通过
//!   [`SrtSocket::get_reject_reason`] 读取。
//!
//! ## 实现要点 (How)
//! - 句柄是 `Arc` 包装的共享状态，克隆出的句柄可交给超时/看门狗线程调用 `close`；
//! - 关闭标志先于注销与释放描述符置位，保证并发路径总能区分“被取消”与“传输失败”；
//! - 最后一个句柄析构时隐式关闭。

use std::{
    fmt, io,
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI32, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
    api::{ApiResult, Descriptor, ListenHook, ListenRequest, SocketStatus, SrtApi},
    engine::{self, Engine},
    error::{ApiError, ErrorCode, Operation, SrtError},
    options::{self, OptionId, OptionKind, OptionValue, SocketConfig},
    policy::{AcceptPolicy, CandidateSocket},
    poll::{Interest, PollHandle, finite_timeout},
    reject::RejectReason,
};

/// 套接字层可观察的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketState {
    Created,
    Bound,
    Listening,
    Connecting,
    Connected,
    /// 建连失败或连接已断开。
    Broken,
    Closed,
}

#[derive(Clone, Copy, Debug, Default)]
struct Timeouts {
    read: Option<Duration>,
    write: Option<Duration>,
}

struct SocketInner {
    engine: Arc<Engine>,
    fd: Descriptor,
    host: String,
    port: u16,
    addr: SocketAddr,
    blocking: bool,
    state: Mutex<SocketState>,
    closed: AtomicBool,
    registration: Mutex<Option<PollHandle>>,
    policy: Mutex<Option<Arc<dyn AcceptPolicy>>>,
    reject: AtomicI32,
    timeouts: Mutex<Timeouts>,
}

impl SocketInner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::trace!(fd = self.fd, "close ignored: socket already closed");
            return;
        }
        if let Some(handle) = self.registration.lock().take() {
            self.engine.multiplexer().unregister(&handle);
        }
        if let Err(error) = self.engine.api().close(self.fd) {
            tracing::warn!(fd = self.fd, %error, "srt descriptor release failed");
        }
        self.policy.lock().take();
        *self.state.lock() = SocketState::Closed;
        tracing::debug!(fd = self.fd, addr = %self.addr, "srt socket closed");
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

/// SRT 套接字句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：以 `host:port + 选项映射` 描述一个监听者或连接者，
///   屏蔽传输库的事件循环细节；
/// - **契约 (What)**：
///   - 构造前必须调用 [`init_engine`](crate::init_engine)，否则返回 [`SrtError::NotInitialized`]；
///   - 选项在描述符创建后一次性下发，任一选项非法则描述符被释放、构造失败；
///   - 克隆得到的句柄共享同一描述符，任一克隆调用 `close` 对全体生效；
/// - **风险 (Trade-offs)**：阻塞模式下的调用会占用调用线程，异步场景请使用
///   `*_async` 方法（`runtime-tokio` 特性）。
#[derive(Clone)]
pub struct SrtSocket {
    inner: Arc<SocketInner>,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, SrtError> {
    let lookup = if host.is_empty() { "0.0.0.0" } else { host };
    let resolve_error = |source| SrtError::Resolve {
        host: lookup.to_owned(),
        port,
        source,
    };
    let candidates: Vec<SocketAddr> = (lookup, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .collect();
    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| {
            resolve_error(io::Error::new(
                io::ErrorKind::NotFound,
                "host resolved to no address",
            ))
        })
}

fn set_blocking_flags(api: &dyn SrtApi, fd: Descriptor, blocking: bool) -> Result<(), SrtError> {
    for id in [OptionId::SNDSYN, OptionId::RCVSYN] {
        options::set_typed(api, fd, id, OptionValue::Bool(blocking))?;
    }
    Ok(())
}

/// 映射为 `SRTO_RCVTIMEO`/`SRTO_SNDTIMEO` 取值；`-1` 表示无限等待。
fn timeout_millis(timeout: Option<Duration>) -> i32 {
    finite_timeout(timeout).map_or(-1, |timeout| {
        i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX).max(1)
    })
}

impl SrtSocket {
    /// 解析 `(名称, 值)` 选项映射并创建套接字。
    pub fn new<I, K, V>(host: &str, port: u16, options: I) -> Result<Self, SrtError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let config = SocketConfig::from_pairs(options)?;
        Self::with_config(host, port, &config)
    }

    pub fn with_config(host: &str, port: u16, config: &SocketConfig) -> Result<Self, SrtError> {
        Self::open(engine::current()?, host, port, config)
    }

    pub(crate) fn open(
        engine: Arc<Engine>,
        host: &str,
        port: u16,
        config: &SocketConfig,
    ) -> Result<Self, SrtError> {
        let addr = resolve(host, port)?;
        let api = engine.api();
        let fd = api
            .create_socket()
            .map_err(SrtError::transport(Operation::Create))?;
        let configured =
            set_blocking_flags(api, fd, config.blocking()).and_then(|()| config.apply(api, fd));
        if let Err(error) = configured {
            if let Err(close_error) = api.close(fd) {
                tracing::warn!(fd, %close_error, "srt descriptor release failed");
            }
            return Err(error);
        }
        tracing::debug!(fd, %addr, blocking = config.blocking(), "srt socket created");
        Ok(Self::from_parts(
            engine,
            fd,
            host.to_owned(),
            port,
            addr,
            config.blocking(),
            SocketState::Created,
        ))
    }

    fn from_parts(
        engine: Arc<Engine>,
        fd: Descriptor,
        host: String,
        port: u16,
        addr: SocketAddr,
        blocking: bool,
        state: SocketState,
    ) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                engine,
                fd,
                host,
                port,
                addr,
                blocking,
                state: Mutex::new(state),
                closed: AtomicBool::new(false),
                registration: Mutex::new(None),
                policy: Mutex::new(None),
                reject: AtomicI32::new(RejectReason::UNKNOWN.code()),
                timeouts: Mutex::new(Timeouts::default()),
            }),
        }
    }

    fn api(&self) -> &dyn SrtApi {
        self.inner.engine.api()
    }

    fn ensure_open(&self, op: Operation) -> Result<(), SrtError> {
        if self.is_closed() {
            Err(SrtError::Closed { op })
        } else {
            Ok(())
        }
    }

    fn expect_state(&self, op: Operation, expected: SocketState) -> Result<(), SrtError> {
        self.ensure_open(op)?;
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(SrtError::InvalidState { op, state })
        }
    }

    fn set_state(&self, next: SocketState) {
        let mut state = self.inner.state.lock();
        if *state != SocketState::Closed {
            *state = next;
        }
    }

    fn registration(&self, op: Operation) -> Result<PollHandle, SrtError> {
        let mut slot = self.inner.registration.lock();
        if self.is_closed() {
            return Err(SrtError::Cancelled { op });
        }
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = self.inner.engine.multiplexer().register(self.inner.fd)?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// 执行原语；非阻塞模式下遇到“暂不可用”则挂起等待 `interest` 后重试。
    fn drive<T, A, F>(
        &self,
        op: Operation,
        interest: Interest,
        timeout: Option<Duration>,
        mut attempt: A,
        fail: F,
    ) -> Result<T, SrtError>
    where
        A: FnMut(&dyn SrtApi, Descriptor) -> ApiResult<T>,
        F: FnOnce(ApiError) -> SrtError,
    {
        let deadline = finite_timeout(timeout).map(|timeout| Instant::now() + timeout);
        loop {
            if self.is_closed() {
                return Err(SrtError::Cancelled { op });
            }
            let error = match attempt(self.api(), self.inner.fd) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if self.is_closed() {
                return Err(SrtError::Cancelled { op });
            }
            if error.code() == ErrorCode::Timeout {
                return Err(SrtError::TimedOut { op });
            }
            if !error.is_would_block() || self.inner.blocking {
                return Err(fail(error));
            }
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                return Err(SrtError::TimedOut { op });
            }
            let handle = self.registration(op)?;
            tracing::trace!(fd = self.inner.fd, ?interest, "srt operation waiting for readiness");
            self.inner
                .engine
                .multiplexer()
                .wait(&handle, interest, remaining)
                .map_err(|error| error.into_error(op))?;
        }
    }

    /// 绑定 `host:port` 并开始监听；非阻塞模式同时注册到多路复用器。
    pub fn listen(&self, backlog: usize) -> Result<(), SrtError> {
        self.expect_state(Operation::Listen, SocketState::Created)?;
        let addr = self.inner.addr;
        if backlog == 0 {
            return Err(SrtError::Listen {
                addr,
                source: ApiError::new(ErrorCode::InvalidParam, "backlog must be positive"),
            });
        }
        self.api()
            .bind(self.inner.fd, addr)
            .map_err(|source| SrtError::Bind { addr, source })?;
        self.set_state(SocketState::Bound);
        self.api()
            .listen(self.inner.fd, backlog)
            .map_err(|source| SrtError::Listen { addr, source })?;
        self.set_state(SocketState::Listening);
        if !self.inner.blocking {
            self.registration(Operation::Listen)?;
        }
        tracing::debug!(fd = self.inner.fd, %addr, backlog, "srt socket listening");
        Ok(())
    }

    /// 取出下一个已完成握手的连接，顺序与传输库完成顺序一致。
    pub fn accept(&self) -> Result<(SrtSocket, SocketAddr), SrtError> {
        self.expect_state(Operation::Accept, SocketState::Listening)?;
        let timeout = self.inner.timeouts.lock().read;
        let (fd, peer) = self.drive(
            Operation::Accept,
            Interest::READABLE,
            timeout,
            |api, fd| api.accept(fd),
            |source| SrtError::Accept { source },
        )?;
        let api = self.api();
        if let Err(error) = set_blocking_flags(api, fd, self.inner.blocking) {
            if let Err(close_error) = api.close(fd) {
                tracing::warn!(fd, %close_error, "srt descriptor release failed");
            }
            return Err(error);
        }
        tracing::debug!(listener = self.inner.fd, fd, %peer, "srt connection accepted");
        let accepted = Self::from_parts(
            Arc::clone(&self.inner.engine),
            fd,
            peer.ip().to_string(),
            peer.port(),
            peer,
            self.inner.blocking,
            SocketState::Connected,
        );
        Ok((accepted, peer))
    }

    /// 连接到 `host:port`。
    pub fn connect(&self) -> Result<(), SrtError> {
        self.expect_state(Operation::Connect, SocketState::Created)?;
        self.set_state(SocketState::Connecting);
        self.inner
            .reject
            .store(RejectReason::UNKNOWN.code(), Ordering::Release);
        let addr = self.inner.addr;
        if let Err(source) = self.api().connect(self.inner.fd, addr) {
            return Err(self.connect_failed(source));
        }
        if !self.inner.blocking {
            let timeout = self.inner.timeouts.lock().write;
            let deadline = finite_timeout(timeout).map(|timeout| Instant::now() + timeout);
            loop {
                if self.is_closed() {
                    return Err(SrtError::Cancelled {
                        op: Operation::Connect,
                    });
                }
                match self.api().status(self.inner.fd) {
                    SocketStatus::Connected => break,
                    SocketStatus::Init | SocketStatus::Opened | SocketStatus::Connecting => {
                        let remaining = deadline
                            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
                        if remaining == Some(Duration::ZERO) {
                            return Err(SrtError::TimedOut {
                                op: Operation::Connect,
                            });
                        }
                        let handle = self.registration(Operation::Connect)?;
                        self.inner
                            .engine
                            .multiplexer()
                            .wait(&handle, Interest::WRITABLE, remaining)
                            .map_err(|error| error.into_error(Operation::Connect))?;
                    }
                    _ => {
                        let reason = self.api().reject_reason(self.inner.fd);
                        let code = if reason == RejectReason::TIMEOUT {
                            ErrorCode::NoServer
                        } else {
                            ErrorCode::ConnRejected
                        };
                        return Err(self.connect_failed(ApiError::new(
                            code,
                            format!("connection to {addr} was not established"),
                        )));
                    }
                }
            }
        }
        self.set_state(SocketState::Connected);
        tracing::debug!(fd = self.inner.fd, %addr, "srt socket connected");
        Ok(())
    }

    fn connect_failed(&self, source: ApiError) -> SrtError {
        let reason = self.api().reject_reason(self.inner.fd);
        self.inner.reject.store(reason.code(), Ordering::Release);
        if self.is_closed() {
            return SrtError::Cancelled {
                op: Operation::Connect,
            };
        }
        self.set_state(SocketState::Broken);
        let addr = self.inner.addr;
        tracing::debug!(fd = self.inner.fd, %addr, %reason, "srt connect failed");
        SrtError::Connect {
            addr,
            reason,
            source,
        }
    }

    /// 注销、释放描述符并进入 `Closed`；重复调用无副作用。
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// 安装闭包形式的接入策略，替换先前的策略。
    pub fn set_listen_callback<F>(&self, callback: F) -> Result<(), SrtError>
    where
        F: Fn(&CandidateSocket<'_>, i32, SocketAddr, &str) -> bool + Send + Sync + 'static,
    {
        self.set_accept_policy(callback)
    }

    /// 安装接入策略，替换先前的策略。
    pub fn set_accept_policy<P: AcceptPolicy>(&self, policy: P) -> Result<(), SrtError> {
        self.ensure_open(Operation::Configure)?;
        let policy: Arc<dyn AcceptPolicy> = Arc::new(policy);
        let listener = self.inner.fd;
        let hook_policy = Arc::clone(&policy);
        let hook: ListenHook = Arc::new(move |request: &ListenRequest<'_>| {
            let candidate = CandidateSocket::new(
                request.api,
                request.candidate,
                request.peer,
                request.stream_id,
            );
            let accepted = hook_policy.on_incoming(
                &candidate,
                request.handshake_version,
                request.peer,
                request.stream_id,
            );
            if !accepted {
                tracing::warn!(
                    listener,
                    candidate = request.candidate,
                    peer = %request.peer,
                    stream_id = request.stream_id,
                    reason = %candidate.reject_reason(),
                    "srt accept policy rejected connection"
                );
            }
            accepted
        });
        self.api()
            .set_listen_callback(listener, Some(hook))
            .map_err(SrtError::transport(Operation::Configure))?;
        *self.inner.policy.lock() = Some(policy);
        Ok(())
    }

    pub fn clear_listen_callback(&self) -> Result<(), SrtError> {
        self.ensure_open(Operation::Configure)?;
        self.api()
            .set_listen_callback(self.inner.fd, None)
            .map_err(SrtError::transport(Operation::Configure))?;
        self.inner.policy.lock().take();
        Ok(())
    }

    pub fn has_listen_callback(&self) -> bool {
        self.inner.policy.lock().is_some()
    }

    /// 最近一次建连失败的原因；成功或尚未建连时为 [`RejectReason::UNKNOWN`]。
    pub fn get_reject_reason(&self) -> RejectReason {
        let stored = RejectReason::new(self.inner.reject.load(Ordering::Acquire));
        if stored != RejectReason::UNKNOWN || self.is_closed() {
            return stored;
        }
        self.api().reject_reason(self.inner.fd)
    }

    /// 设置拒绝原因；原因码必须位于应用可用的分段内。
    pub fn set_reject_reason(&self, reason: RejectReason) -> Result<(), SrtError> {
        self.ensure_open(Operation::Configure)?;
        let range = self.inner.engine.reject_range();
        if !range.is_settable(reason.code()) {
            return Err(SrtError::Transport {
                op: Operation::Configure,
                source: ApiError::new(
                    ErrorCode::InvalidParam,
                    format!(
                        "reject code {} is below the application range starting at {}",
                        reason.code(),
                        range.predefined()
                    ),
                ),
            });
        }
        self.api()
            .set_reject_reason(self.inner.fd, reason)
            .map_err(SrtError::transport(Operation::Configure))
    }

    /// 按名称解析并写入一个选项。
    pub fn set_option(&self, name: &str, raw: &str) -> Result<(), SrtError> {
        self.ensure_open(Operation::Configure)?;
        options::apply(self.api(), self.inner.fd, name, raw)
    }

    /// 按名称读回一个选项。
    pub fn option(&self, name: &str) -> Result<OptionValue, SrtError> {
        self.ensure_open(Operation::Configure)?;
        options::read(self.api(), self.inner.fd, name)
    }

    fn set_typed(&self, id: OptionId, value: OptionValue) -> Result<(), SrtError> {
        self.ensure_open(Operation::Configure)?;
        options::set_typed(self.api(), self.inner.fd, id, value)
    }

    fn get_typed<T>(
        &self,
        id: OptionId,
        kind: OptionKind,
        extract: impl FnOnce(&OptionValue) -> Option<T>,
    ) -> Result<T, SrtError> {
        self.ensure_open(Operation::Configure)?;
        let value = options::get_typed(self.api(), self.inner.fd, id, kind)?;
        extract(&value).ok_or_else(|| SrtError::InvalidOptionValue {
            name: id.to_string(),
            value: value.to_string(),
            expected: kind,
        })
    }

    pub fn set_sockopt_int(&self, id: OptionId, value: i32) -> Result<(), SrtError> {
        self.set_typed(id, OptionValue::Int32(value))
    }

    pub fn set_sockopt_i64(&self, id: OptionId, value: i64) -> Result<(), SrtError> {
        self.set_typed(id, OptionValue::Int64(value))
    }

    pub fn set_sockopt_bool(&self, id: OptionId, value: bool) -> Result<(), SrtError> {
        self.set_typed(id, OptionValue::Bool(value))
    }

    pub fn set_sockopt_string(&self, id: OptionId, value: &str) -> Result<(), SrtError> {
        self.set_typed(id, OptionValue::String(value.to_owned()))
    }

    /// 以原始字节写入字符串类选项（`passphrase`、`streamid` 等）。
    pub fn set_sockopt_bytes(&self, id: OptionId, value: &[u8]) -> Result<(), SrtError> {
        self.ensure_open(Operation::Configure)?;
        options::set_bytes(self.api(), self.inner.fd, id, value)
    }

    pub fn get_sockopt_bytes(&self, id: OptionId) -> Result<Vec<u8>, SrtError> {
        self.ensure_open(Operation::Configure)?;
        options::get_bytes(self.api(), self.inner.fd, id)
    }

    pub fn get_sockopt_int(&self, id: OptionId) -> Result<i32, SrtError> {
        self.get_typed(id, OptionKind::Int32, OptionValue::as_i32)
    }

    pub fn get_sockopt_i64(&self, id: OptionId) -> Result<i64, SrtError> {
        self.get_typed(id, OptionKind::Int64, OptionValue::as_i64)
    }

    pub fn get_sockopt_bool(&self, id: OptionId) -> Result<bool, SrtError> {
        self.get_typed(id, OptionKind::Bool, OptionValue::as_bool)
    }

    pub fn get_sockopt_string(&self, id: OptionId) -> Result<String, SrtError> {
        self.get_typed(id, OptionKind::String, |value| value.as_str().map(str::to_owned))
    }

    /// 读取数据；对端关闭且队列耗尽后返回 `Ok(0)`。
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, SrtError> {
        self.ensure_open(Operation::Read)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let timeout = self.inner.timeouts.lock().read;
        let result = self.drive(
            Operation::Read,
            Interest::READABLE,
            timeout,
            |api, fd| api.recv(fd, &mut *buf),
            SrtError::transport(Operation::Read),
        );
        match result {
            Err(SrtError::Transport { source, .. }) if source.code() == ErrorCode::ConnLost => {
                Ok(0)
            }
            other => other,
        }
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, SrtError> {
        self.ensure_open(Operation::Write)?;
        let timeout = self.inner.timeouts.lock().write;
        self.drive(
            Operation::Write,
            Interest::WRITABLE,
            timeout,
            |api, fd| api.send(fd, buf),
            SrtError::transport(Operation::Write),
        )
    }

    /// 读/接受超时，`None` 或零表示无限等待；阻塞模式同步写入 `SRTO_RCVTIMEO`。
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SrtError> {
        if self.inner.blocking {
            self.set_typed(OptionId::RCVTIMEO, OptionValue::Int32(timeout_millis(timeout)))?;
        } else {
            self.ensure_open(Operation::Configure)?;
        }
        self.inner.timeouts.lock().read = timeout;
        Ok(())
    }

    /// 写/建连超时，`None` 或零表示无限等待；阻塞模式同步写入 `SRTO_SNDTIMEO`。
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<(), SrtError> {
        if self.inner.blocking {
            self.set_typed(OptionId::SNDTIMEO, OptionValue::Int32(timeout_millis(timeout)))?;
        } else {
            self.ensure_open(Operation::Configure)?;
        }
        self.inner.timeouts.lock().write = timeout;
        Ok(())
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.inner.timeouts.lock().read
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.inner.timeouts.lock().write
    }

    pub fn descriptor(&self) -> Descriptor {
        self.inner.fd
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// 构造时解析出的地址：监听者的绑定地址或连接者的目标地址。
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    pub fn is_blocking(&self) -> bool {
        self.inner.blocking
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SocketState {
        *self.inner.state.lock()
    }

    /// 传输库视角的描述符状态。
    pub fn status(&self) -> SocketStatus {
        if self.is_closed() {
            return SocketStatus::Closed;
        }
        self.api().status(self.inner.fd)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SrtError> {
        self.ensure_open(Operation::Configure)?;
        self.api()
            .local_addr(self.inner.fd)
            .map_err(SrtError::transport(Operation::Configure))
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, SrtError> {
        self.ensure_open(Operation::Configure)?;
        self.api()
            .peer_addr(self.inner.fd)
            .map_err(SrtError::transport(Operation::Configure))
    }
}

impl io::Read for SrtSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SrtSocket::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for SrtSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SrtSocket::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for SrtSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrtSocket")
            .field("fd", &self.inner.fd)
            .field("addr", &self.inner.addr)
            .field("blocking", &self.inner.blocking)
            .field("state", &self.state())
            .finish()
    }
}
