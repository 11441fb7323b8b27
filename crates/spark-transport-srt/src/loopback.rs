//! 进程内传输实现（LoopbackApi）。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 套接字层、选项编解码与多路复用器只依赖 [`SrtApi`] 契约；本实现把这份契约完整落在
//!   进程内，使引擎在没有原生传输库的环境中也能运行、也能被确定性地测试；
//! - 握手、拒绝原因、选项约束、事件多路复用的可观测行为与 libsrt 保持一致，
//!   拥塞控制、重传、加密与分包则不模拟。
//!
//! ## 契约 (What)
//! - 描述符单调分配、永不复用；监听者以 `SocketAddr` 为键，未指定 IP 匹配同端口任意 IP；
//! - 握手在 `connect` 内同步完成，监听回调调用期间不持有内部锁；
//! - 阻塞语义：`accept`/`connect`/`recv` 遵循 `SRTO_RCVSYN`，`send` 遵循 `SRTO_SNDSYN`，
//!   `SRTO_RCVTIMEO` 为正时阻塞等待会在到期后返回 `SRT_ETIMEOUT`；
//! - `epoll_wait` 对计算出的就绪状态做水平触发，`epoll_release` 立即唤醒等待者。
//!
//! ## 实现要点 (How)
//! - 全部状态位于单个互斥锁之下，任一状态变化都会广播条件变量；
//! - 握手分三段：加锁校验并创建候选描述符 → 解锁调用回调 → 加锁复核并入队。

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    api::{
        ApiResult, Descriptor, EpollId, ListenHook, ListenRequest, SocketStatus, SockOptValue,
        SrtApi,
    },
    error::{ApiError, ErrorCode},
    options::{Binding, OptionId, OptionKind},
    poll::Interest,
    reject::{RejectCodeRange, RejectReason},
};

/// 监听回调观察到的握手版本号（HSv5）。
pub const HANDSHAKE_VERSION: i32 = 5;

const EPHEMERAL_BASE: u16 = 49152;
const LIVE_PAYLOAD_SIZE: i32 = 1316;
const MAX_PAYLOAD_SIZE: i32 = 1456;
const LIVE_LATENCY_MS: i32 = 120;
const FILE_LINGER_SECS: i32 = 180;

type OptionStore = BTreeMap<OptionId, SockOptValue>;

fn default_options() -> OptionStore {
    use SockOptValue::{Bool, Int, Int64, Str};
    let mut store = OptionStore::from([
        (OptionId::MSS, Int(1500)),
        (OptionId::SNDSYN, Bool(true)),
        (OptionId::RCVSYN, Bool(true)),
        (OptionId::FC, Int(25600)),
        (OptionId::SNDBUF, Int(8192 * 1456)),
        (OptionId::RCVBUF, Int(8192 * 1456)),
        (OptionId::SNDTIMEO, Int(-1)),
        (OptionId::RCVTIMEO, Int(-1)),
        (OptionId::MAXBW, Int64(-1)),
        (OptionId::INPUTBW, Int64(0)),
        (OptionId::OHEADBW, Int(25)),
        (OptionId::PASSPHRASE, Str(String::new())),
        (OptionId::PBKEYLEN, Int(0)),
        (OptionId::IPTTL, Int(64)),
        (OptionId::IPTOS, Int(0)),
        (OptionId::SNDDROPDELAY, Int(0)),
        (OptionId::CONNTIMEO, Int(3000)),
        (OptionId::LOSSMAXTTL, Int(0)),
        (OptionId::MINVERSION, Int(0x01_00_00)),
        (OptionId::STREAMID, Str(String::new())),
        (OptionId::KMREFRESHRATE, Int(0x0100_0000)),
        (OptionId::KMPREANNOUNCE, Int(0x1000)),
        (OptionId::ENFORCEDENCRYPTION, Bool(true)),
        (OptionId::PEERIDLETIMEO, Int(5000)),
        (OptionId::PACKETFILTER, Str(String::new())),
    ]);
    apply_transtype_preset(&mut store, 0);
    store
}

/// `transtype` 会整体重置一组关联选项；未知数值按 live 处理。
fn apply_transtype_preset(store: &mut OptionStore, mode: i32) {
    use SockOptValue::{Bool, Int, Str};
    let file = mode == 1;
    let latency = if file { 0 } else { LIVE_LATENCY_MS };
    store.insert(OptionId::TRANSTYPE, Int(mode));
    store.insert(OptionId::TSBPDMODE, Bool(!file));
    store.insert(OptionId::TLPKTDROP, Bool(!file));
    store.insert(OptionId::NAKREPORT, Bool(!file));
    store.insert(OptionId::MESSAGEAPI, Bool(!file));
    store.insert(
        OptionId::CONGESTION,
        Str(if file { "file" } else { "live" }.to_owned()),
    );
    store.insert(
        OptionId::PAYLOADSIZE,
        Int(if file { 0 } else { LIVE_PAYLOAD_SIZE }),
    );
    store.insert(OptionId::LATENCY, Int(latency));
    store.insert(OptionId::RCVLATENCY, Int(latency));
    store.insert(OptionId::PEERLATENCY, Int(0));
    store.insert(OptionId::LINGER, Int(if file { FILE_LINGER_SECS } else { 0 }));
}

fn storage_kind(value: &SockOptValue) -> OptionKind {
    match value {
        SockOptValue::Int(_) => OptionKind::Int32,
        SockOptValue::Int64(_) => OptionKind::Int64,
        SockOptValue::Bool(_) => OptionKind::Bool,
        SockOptValue::Str(_) | SockOptValue::Bytes(_) => OptionKind::String,
    }
}

fn invalid_sock(fd: Descriptor) -> ApiError {
    ApiError::new(ErrorCode::InvalidSock, format!("descriptor {fd} does not exist"))
}

fn invalid_param(detail: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidParam, detail.into())
}

struct Entry {
    status: SocketStatus,
    options: OptionStore,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
    peer_fd: Option<Descriptor>,
    backlog: usize,
    handshaking: usize,
    pending: VecDeque<(Descriptor, SocketAddr)>,
    hook: Option<ListenHook>,
    reject: RejectReason,
    inbox: VecDeque<Vec<u8>>,
    offset: usize,
}

impl Entry {
    fn new(options: OptionStore) -> Self {
        Self {
            status: SocketStatus::Init,
            options,
            local: None,
            peer: None,
            peer_fd: None,
            backlog: 0,
            handshaking: 0,
            pending: VecDeque::new(),
            hook: None,
            reject: RejectReason::UNKNOWN,
            inbox: VecDeque::new(),
            offset: 0,
        }
    }

    fn flag(&self, id: OptionId) -> bool {
        matches!(self.options.get(&id), Some(SockOptValue::Bool(true)))
    }

    fn int(&self, id: OptionId) -> i32 {
        match self.options.get(&id) {
            Some(SockOptValue::Int(value)) => *value,
            _ => 0,
        }
    }

    fn raw(&self, id: OptionId) -> &[u8] {
        self.options
            .get(&id)
            .and_then(SockOptValue::as_bytes)
            .unwrap_or_default()
    }

    fn message_mode(&self) -> bool {
        self.flag(OptionId::MESSAGEAPI)
    }

    fn deadline(&self, id: OptionId) -> Option<Instant> {
        let millis = self.int(id);
        (millis > 0).then(|| Instant::now() + Duration::from_millis(millis as u64))
    }

    fn check_pre_binding(&self, id: OptionId) -> ApiResult<()> {
        match self.status {
            SocketStatus::Init | SocketStatus::Opened | SocketStatus::Connecting => Ok(()),
            SocketStatus::Listening => Err(ApiError::new(
                ErrorCode::BoundSock,
                format!("option {id} cannot be changed on a listening socket"),
            )),
            _ => Err(ApiError::new(
                ErrorCode::ConnSock,
                format!("option {id} cannot be changed after the connection is established"),
            )),
        }
    }
}

struct Handshake {
    listener: Descriptor,
    candidate: Descriptor,
    caller: SocketAddr,
    target: SocketAddr,
    stream_id: String,
    hook: Option<ListenHook>,
}

#[derive(Default)]
struct State {
    started: usize,
    next_fd: Descriptor,
    next_eid: EpollId,
    next_port: u16,
    sockets: HashMap<Descriptor, Entry>,
    bindings: HashMap<SocketAddr, Descriptor>,
    epolls: HashMap<EpollId, HashMap<Descriptor, Interest>>,
}

impl State {
    fn entry(&self, fd: Descriptor) -> ApiResult<&Entry> {
        self.sockets.get(&fd).ok_or_else(|| invalid_sock(fd))
    }

    fn entry_mut(&mut self, fd: Descriptor) -> ApiResult<&mut Entry> {
        self.sockets.get_mut(&fd).ok_or_else(|| invalid_sock(fd))
    }

    fn allocate_fd(&mut self) -> Descriptor {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    fn overlaps(bound: &SocketAddr, addr: &SocketAddr) -> bool {
        bound.port() == addr.port()
            && (bound.ip() == addr.ip() || bound.ip().is_unspecified() || addr.ip().is_unspecified())
    }

    fn ephemeral(&mut self, ip: IpAddr) -> ApiResult<SocketAddr> {
        for _ in EPHEMERAL_BASE..=u16::MAX {
            let port = self.next_port.max(EPHEMERAL_BASE);
            self.next_port = port.checked_add(1).unwrap_or(EPHEMERAL_BASE);
            if !self.bindings.keys().any(|bound| bound.port() == port) {
                return Ok(SocketAddr::new(ip, port));
            }
        }
        Err(ApiError::new(ErrorCode::Resource, "no ephemeral port available"))
    }

    fn find_listener(&self, addr: &SocketAddr) -> Option<Descriptor> {
        self.bindings
            .iter()
            .filter(|(bound, _)| Self::overlaps(bound, addr))
            .map(|(_, fd)| *fd)
            .find(|fd| {
                self.sockets
                    .get(fd)
                    .is_some_and(|entry| entry.status == SocketStatus::Listening)
            })
    }

    fn readiness(&self, fd: Descriptor) -> Interest {
        let Some(entry) = self.sockets.get(&fd) else {
            return Interest::ERROR;
        };
        let queued = if entry.inbox.is_empty() {
            Interest::EMPTY
        } else {
            Interest::READABLE
        };
        match entry.status {
            SocketStatus::Listening if !entry.pending.is_empty() => Interest::READABLE,
            SocketStatus::Connected => Interest::WRITABLE | queued,
            SocketStatus::Broken | SocketStatus::Closing | SocketStatus::Closed => {
                Interest::ERROR | queued
            }
            _ => Interest::EMPTY,
        }
    }

    /// 移除描述符；尚未被取走的候选连接一并关闭，对端转为 `Broken`。
    fn remove_socket(&mut self, fd: Descriptor) -> bool {
        let mut queue = vec![fd];
        let mut removed = false;
        while let Some(fd) = queue.pop() {
            let Some(entry) = self.sockets.remove(&fd) else {
                continue;
            };
            removed = true;
            if let Some(local) = entry.local {
                if self.bindings.get(&local) == Some(&fd) {
                    self.bindings.remove(&local);
                }
            }
            for set in self.epolls.values_mut() {
                set.remove(&fd);
            }
            if let Some(peer) = entry.peer_fd.and_then(|peer| self.sockets.get_mut(&peer)) {
                if matches!(
                    peer.status,
                    SocketStatus::Connected | SocketStatus::Connecting
                ) {
                    peer.status = SocketStatus::Broken;
                }
            }
            queue.extend(entry.pending.iter().map(|(candidate, _)| *candidate));
        }
        removed
    }

    fn collect_ready(&self, eid: EpollId) -> ApiResult<Vec<(Descriptor, Interest)>> {
        let set = self.epolls.get(&eid).ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidPollId, format!("epoll {eid} does not exist"))
        })?;
        Ok(set
            .iter()
            .filter(|(_, interest)| !interest.is_empty())
            .filter_map(|(fd, interest)| {
                let ready = self.readiness(*fd) & (*interest | Interest::ERROR);
                (!ready.is_empty()).then_some((*fd, ready))
            })
            .collect())
    }
}

/// 进程内 [`SrtApi`] 实现。
pub struct LoopbackApi {
    state: Mutex<State>,
    changed: Condvar,
    reject_range: RejectCodeRange,
}

impl LoopbackApi {
    pub fn new() -> Self {
        Self::with_reject_range(RejectCodeRange::DEFAULT)
    }

    /// 使用自定义的拒绝码分段，决定回调可写入的最小原因码。
    pub fn with_reject_range(reject_range: RejectCodeRange) -> Self {
        Self {
            state: Mutex::new(State {
                next_fd: 1,
                next_eid: 1,
                next_port: EPHEMERAL_BASE,
                ..State::default()
            }),
            changed: Condvar::new(),
            reject_range,
        }
    }

    pub fn reject_range(&self) -> RejectCodeRange {
        self.reject_range
    }

    /// 当前存活的描述符数量。
    pub fn open_descriptors(&self) -> usize {
        self.state.lock().sockets.len()
    }

    /// 阻塞等待状态变化；返回 `true` 表示到达截止时间。
    fn wait_changed(&self, state: &mut MutexGuard<'_, State>, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self.changed.wait_until(state, deadline).timed_out(),
            None => {
                self.changed.wait(state);
                false
            }
        }
    }

    fn begin_handshake(
        &self,
        state: &mut State,
        fd: Descriptor,
        target: SocketAddr,
    ) -> ApiResult<Result<Handshake, RejectReason>> {
        let entry = state.entry(fd)?;
        match entry.status {
            SocketStatus::Init | SocketStatus::Opened => {}
            SocketStatus::Connecting | SocketStatus::Connected => {
                return Err(ApiError::new(ErrorCode::ConnSock, "socket is already connected"));
            }
            SocketStatus::Listening => {
                return Err(ApiError::new(ErrorCode::InvalidOp, "listening socket cannot connect"));
            }
            _ => return Err(ApiError::new(ErrorCode::InvalidOp, "socket is broken")),
        }
        let bound = entry.local;
        let caller = match bound {
            Some(local) => local,
            None => {
                let ip = match target.ip() {
                    IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    ip => ip,
                };
                let local = state.ephemeral(ip)?;
                state.bindings.insert(local, fd);
                local
            }
        };
        let entry = state.entry_mut(fd)?;
        entry.local = Some(caller);
        entry.status = SocketStatus::Connecting;
        entry.reject = RejectReason::UNKNOWN;

        let Some(listener_fd) = state.find_listener(&target) else {
            return Ok(Err(RejectReason::TIMEOUT));
        };
        let listener = state.entry(listener_fd)?;
        let connector = state.entry(fd)?;
        if listener.pending.len() + listener.handshaking >= listener.backlog {
            return Ok(Err(RejectReason::BACKLOG));
        }
        if listener.message_mode() != connector.message_mode() {
            return Ok(Err(RejectReason::MESSAGEAPI));
        }
        let (expected, offered) = (
            listener.raw(OptionId::PASSPHRASE),
            connector.raw(OptionId::PASSPHRASE),
        );
        let enforced = listener.flag(OptionId::ENFORCEDENCRYPTION)
            || connector.flag(OptionId::ENFORCEDENCRYPTION);
        match (expected.is_empty(), offered.is_empty()) {
            (false, false) if expected != offered => return Ok(Err(RejectReason::BADSECRET)),
            (true, false) | (false, true) if enforced => return Ok(Err(RejectReason::UNSECURE)),
            _ => {}
        }

        let latency = listener
            .int(OptionId::LATENCY)
            .max(connector.int(OptionId::LATENCY));
        let stream_id = String::from_utf8_lossy(connector.raw(OptionId::STREAMID)).into_owned();
        let mut options = listener.options.clone();
        options.insert(
            OptionId::STREAMID,
            connector
                .options
                .get(&OptionId::STREAMID)
                .cloned()
                .unwrap_or_else(|| SockOptValue::Str(String::new())),
        );
        let bound = listener.local.unwrap_or(target);
        let local = if bound.ip().is_unspecified() {
            SocketAddr::new(caller.ip(), bound.port())
        } else {
            bound
        };
        let hook = listener.hook.clone();

        for id in [OptionId::LATENCY, OptionId::RCVLATENCY, OptionId::PEERLATENCY] {
            options.insert(id, SockOptValue::Int(latency));
            state
                .entry_mut(fd)?
                .options
                .insert(id, SockOptValue::Int(latency));
        }
        let candidate = state.allocate_fd();
        let mut entry = Entry::new(options);
        entry.status = SocketStatus::Connecting;
        entry.local = Some(local);
        entry.peer = Some(caller);
        entry.peer_fd = Some(fd);
        state.sockets.insert(candidate, entry);
        state.entry_mut(listener_fd)?.handshaking += 1;

        Ok(Ok(Handshake {
            listener: listener_fd,
            candidate,
            caller,
            target: local,
            stream_id,
            hook,
        }))
    }

    fn complete_handshake(
        &self,
        state: &mut State,
        fd: Descriptor,
        handshake: Handshake,
        accepted: bool,
    ) -> ApiResult<()> {
        let listening = match state.sockets.get_mut(&handshake.listener) {
            Some(listener) => {
                listener.handshaking = listener.handshaking.saturating_sub(1);
                listener.status == SocketStatus::Listening
            }
            None => false,
        };
        let candidate = state.sockets.remove(&handshake.candidate);
        if !state.sockets.contains_key(&fd) {
            self.changed.notify_all();
            return Err(invalid_sock(fd));
        }
        let mut candidate = match candidate {
            Some(candidate) if listening && accepted => candidate,
            Some(candidate) if listening => {
                let reason = if candidate.reject == RejectReason::UNKNOWN {
                    RejectReason::UNACCEPTABLE
                } else {
                    candidate.reject
                };
                return self.reject(state, fd, handshake.target, reason);
            }
            _ => return self.reject(state, fd, handshake.target, RejectReason::CLOSE),
        };

        candidate.status = SocketStatus::Connected;
        state.sockets.insert(handshake.candidate, candidate);
        let connector = state.entry_mut(fd)?;
        connector.status = SocketStatus::Connected;
        connector.peer = Some(handshake.target);
        connector.peer_fd = Some(handshake.candidate);
        state
            .entry_mut(handshake.listener)?
            .pending
            .push_back((handshake.candidate, handshake.caller));
        self.changed.notify_all();
        tracing::trace!(
            fd,
            candidate = handshake.candidate,
            stream_id = %handshake.stream_id,
            "loopback handshake completed"
        );
        Ok(())
    }

    fn reject(
        &self,
        state: &mut State,
        fd: Descriptor,
        target: SocketAddr,
        reason: RejectReason,
    ) -> ApiResult<()> {
        let entry = state.entry_mut(fd)?;
        entry.status = SocketStatus::Broken;
        entry.reject = reason;
        let blocking = entry.flag(OptionId::RCVSYN);
        self.changed.notify_all();
        tracing::debug!(fd, %target, %reason, "loopback handshake rejected");
        if blocking {
            let code = if reason == RejectReason::TIMEOUT {
                ErrorCode::NoServer
            } else {
                ErrorCode::ConnRejected
            };
            Err(ApiError::new(code, format!("connection to {target} rejected: {reason}")))
        } else {
            Ok(())
        }
    }

    fn validate(id: OptionId, value: &SockOptValue) -> ApiResult<()> {
        match (id, value) {
            (OptionId::PBKEYLEN, SockOptValue::Int(len)) if ![0, 16, 24, 32].contains(len) => {
                Err(invalid_param(format!("pbkeylen must be 0, 16, 24 or 32, got {len}")))
            }
            (OptionId::PASSPHRASE, secret)
                if secret
                    .as_bytes()
                    .is_some_and(|secret| !secret.is_empty() && !(10..=79).contains(&secret.len())) =>
            {
                Err(invalid_param("passphrase must be 10 to 79 characters long"))
            }
            (OptionId::PAYLOADSIZE, SockOptValue::Int(size))
                if !(0..=MAX_PAYLOAD_SIZE).contains(size) =>
            {
                Err(invalid_param(format!(
                    "payloadsize must be within 0..={MAX_PAYLOAD_SIZE}, got {size}"
                )))
            }
            (
                OptionId::LATENCY | OptionId::RCVLATENCY | OptionId::PEERLATENCY,
                SockOptValue::Int(latency),
            ) if *latency < 0 => Err(invalid_param("latency must not be negative")),
            _ => Ok(()),
        }
    }
}

impl Default for LoopbackApi {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopbackApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackApi")
            .field("started", &state.started)
            .field("sockets", &state.sockets.len())
            .field("epolls", &state.epolls.len())
            .finish()
    }
}

impl SrtApi for LoopbackApi {
    fn startup(&self) -> ApiResult<()> {
        self.state.lock().started += 1;
        Ok(())
    }

    fn cleanup(&self) {
        let mut state = self.state.lock();
        state.started = state.started.saturating_sub(1);
        if state.started == 0 {
            let sockets = state.sockets.len();
            state.sockets.clear();
            state.bindings.clear();
            state.epolls.clear();
            self.changed.notify_all();
            tracing::debug!(sockets, "loopback transport cleaned up");
        }
    }

    fn create_socket(&self) -> ApiResult<Descriptor> {
        let mut state = self.state.lock();
        if state.started == 0 {
            return Err(ApiError::new(ErrorCode::InvalidOp, "transport is not started"));
        }
        let fd = state.allocate_fd();
        state.sockets.insert(fd, Entry::new(default_options()));
        Ok(fd)
    }

    fn close(&self, fd: Descriptor) -> ApiResult<()> {
        let mut state = self.state.lock();
        if !state.remove_socket(fd) {
            return Err(invalid_sock(fd));
        }
        self.changed.notify_all();
        Ok(())
    }

    fn bind(&self, fd: Descriptor, addr: SocketAddr) -> ApiResult<()> {
        let mut state = self.state.lock();
        if state.entry(fd)?.status != SocketStatus::Init {
            return Err(ApiError::new(ErrorCode::InvalidOp, "socket is already bound"));
        }
        let addr = if addr.port() == 0 {
            state.ephemeral(addr.ip())?
        } else if state.bindings.keys().any(|bound| State::overlaps(bound, &addr)) {
            return Err(ApiError::new(
                ErrorCode::BindConflict,
                format!("address {addr} is already in use"),
            ));
        } else {
            addr
        };
        state.bindings.insert(addr, fd);
        let entry = state.entry_mut(fd)?;
        entry.local = Some(addr);
        entry.status = SocketStatus::Opened;
        Ok(())
    }

    fn listen(&self, fd: Descriptor, backlog: usize) -> ApiResult<()> {
        if backlog == 0 {
            return Err(invalid_param("backlog must be positive"));
        }
        let mut state = self.state.lock();
        let entry = state.entry_mut(fd)?;
        match entry.status {
            SocketStatus::Opened | SocketStatus::Listening => {
                entry.status = SocketStatus::Listening;
                entry.backlog = backlog;
                Ok(())
            }
            SocketStatus::Init => Err(ApiError::new(ErrorCode::UnboundSock, "socket is not bound")),
            _ => Err(ApiError::new(ErrorCode::ConnSock, "socket is connected")),
        }
    }

    fn accept(&self, fd: Descriptor) -> ApiResult<(Descriptor, SocketAddr)> {
        let mut state = self.state.lock();
        let deadline = state.entry(fd)?.deadline(OptionId::RCVTIMEO);
        loop {
            let entry = state.entry_mut(fd)?;
            if entry.status != SocketStatus::Listening {
                return Err(ApiError::new(ErrorCode::NoListen, "socket is not listening"));
            }
            if let Some(accepted) = entry.pending.pop_front() {
                return Ok(accepted);
            }
            if !entry.flag(OptionId::RCVSYN) {
                return Err(ApiError::new(ErrorCode::AsyncRcv, "no pending connection"));
            }
            if self.wait_changed(&mut state, deadline) {
                return Err(ApiError::new(ErrorCode::Timeout, "accept timed out"));
            }
        }
    }

    fn connect(&self, fd: Descriptor, addr: SocketAddr) -> ApiResult<()> {
        let mut state = self.state.lock();
        let handshake = match self.begin_handshake(&mut state, fd, addr)? {
            Ok(handshake) => handshake,
            Err(reason) => return self.reject(&mut state, fd, addr, reason),
        };
        let accepted = MutexGuard::unlocked(&mut state, || match &handshake.hook {
            Some(hook) => hook(&ListenRequest {
                api: self,
                candidate: handshake.candidate,
                handshake_version: HANDSHAKE_VERSION,
                peer: handshake.caller,
                stream_id: &handshake.stream_id,
            }),
            None => true,
        });
        self.complete_handshake(&mut state, fd, handshake, accepted)
    }

    fn status(&self, fd: Descriptor) -> SocketStatus {
        self.state
            .lock()
            .sockets
            .get(&fd)
            .map_or(SocketStatus::NonExist, |entry| entry.status)
    }

    fn send(&self, fd: Descriptor, data: &[u8]) -> ApiResult<usize> {
        let mut state = self.state.lock();
        let entry = state.entry(fd)?;
        match entry.status {
            SocketStatus::Connected => {}
            SocketStatus::Broken => {
                return Err(ApiError::new(ErrorCode::ConnLost, "connection was closed by peer"));
            }
            _ => return Err(ApiError::new(ErrorCode::NoConn, "socket is not connected")),
        }
        let payload = entry.int(OptionId::PAYLOADSIZE);
        if entry.int(OptionId::TRANSTYPE) != 1 && payload > 0 && data.len() > payload as usize {
            return Err(ApiError::new(
                ErrorCode::LargeMsg,
                format!("message of {} bytes exceeds payload size {payload}", data.len()),
            ));
        }
        let peer = entry
            .peer_fd
            .ok_or_else(|| ApiError::new(ErrorCode::NoConn, "socket has no peer"))?;
        let peer = state
            .sockets
            .get_mut(&peer)
            .ok_or_else(|| ApiError::new(ErrorCode::ConnLost, "peer is gone"))?;
        peer.inbox.push_back(data.to_vec());
        self.changed.notify_all();
        Ok(data.len())
    }

    fn recv(&self, fd: Descriptor, buf: &mut [u8]) -> ApiResult<usize> {
        let mut state = self.state.lock();
        let deadline = state.entry(fd)?.deadline(OptionId::RCVTIMEO);
        loop {
            let entry = state.entry_mut(fd)?;
            if !entry.inbox.is_empty() {
                let copied = if entry.message_mode() {
                    // 报文模式保留边界，超出缓冲区的部分被丢弃。
                    let message = entry.inbox.pop_front().unwrap_or_default();
                    let len = message.len().min(buf.len());
                    buf[..len].copy_from_slice(&message[..len]);
                    len
                } else {
                    let mut copied = 0;
                    while copied < buf.len() {
                        let Some(front) = entry.inbox.front() else {
                            break;
                        };
                        let rest = &front[entry.offset..];
                        let len = rest.len().min(buf.len() - copied);
                        buf[copied..copied + len].copy_from_slice(&rest[..len]);
                        copied += len;
                        entry.offset += len;
                        if entry.offset == front.len() {
                            entry.inbox.pop_front();
                            entry.offset = 0;
                        }
                    }
                    copied
                };
                return Ok(copied);
            }
            match entry.status {
                SocketStatus::Connected => {}
                SocketStatus::Broken => {
                    return Err(ApiError::new(ErrorCode::ConnLost, "connection was closed by peer"));
                }
                _ => return Err(ApiError::new(ErrorCode::NoConn, "socket is not connected")),
            }
            if !entry.flag(OptionId::RCVSYN) {
                return Err(ApiError::new(ErrorCode::AsyncRcv, "no data available"));
            }
            if self.wait_changed(&mut state, deadline) {
                return Err(ApiError::new(ErrorCode::Timeout, "receive timed out"));
            }
        }
    }

    fn get_option(&self, fd: Descriptor, id: OptionId) -> ApiResult<SockOptValue> {
        if id == OptionId::PASSPHRASE {
            return Err(ApiError::new(ErrorCode::InvalidOp, "passphrase is write-only"));
        }
        let state = self.state.lock();
        state
            .entry(fd)?
            .options
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidOp, format!("unsupported option {id}")))
    }

    fn set_option(&self, fd: Descriptor, id: OptionId, value: SockOptValue) -> ApiResult<()> {
        let spec = id
            .spec()
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidOp, format!("unsupported option {id}")))?;
        if spec.kind.storage() != storage_kind(&value) {
            return Err(invalid_param(format!(
                "option {id} expects {}, got {value:?}",
                spec.kind
            )));
        }
        Self::validate(id, &value)?;
        let mut state = self.state.lock();
        let entry = state.entry_mut(fd)?;
        if spec.binding == Binding::Pre {
            entry.check_pre_binding(id)?;
        }
        match (id, value) {
            (OptionId::TRANSTYPE, SockOptValue::Int(mode)) => {
                apply_transtype_preset(&mut entry.options, mode);
            }
            (OptionId::LATENCY, SockOptValue::Int(latency)) => {
                for id in [OptionId::LATENCY, OptionId::RCVLATENCY, OptionId::PEERLATENCY] {
                    entry.options.insert(id, SockOptValue::Int(latency));
                }
            }
            (id, value) => {
                entry.options.insert(id, value);
            }
        }
        Ok(())
    }

    fn local_addr(&self, fd: Descriptor) -> ApiResult<SocketAddr> {
        self.state
            .lock()
            .entry(fd)?
            .local
            .ok_or_else(|| ApiError::new(ErrorCode::UnboundSock, "socket is not bound"))
    }

    fn peer_addr(&self, fd: Descriptor) -> ApiResult<SocketAddr> {
        self.state
            .lock()
            .entry(fd)?
            .peer
            .ok_or_else(|| ApiError::new(ErrorCode::NoConn, "socket is not connected"))
    }

    fn set_listen_callback(&self, fd: Descriptor, hook: Option<ListenHook>) -> ApiResult<()> {
        self.state.lock().entry_mut(fd)?.hook = hook;
        Ok(())
    }

    fn set_reject_reason(&self, fd: Descriptor, reason: RejectReason) -> ApiResult<()> {
        if !self.reject_range.is_settable(reason.code()) {
            return Err(invalid_param(format!(
                "reject code {} is reserved for the transport",
                reason.code()
            )));
        }
        self.state.lock().entry_mut(fd)?.reject = reason;
        Ok(())
    }

    fn reject_reason(&self, fd: Descriptor) -> RejectReason {
        self.state
            .lock()
            .sockets
            .get(&fd)
            .map_or(RejectReason::UNKNOWN, |entry| entry.reject)
    }

    fn epoll_create(&self) -> ApiResult<EpollId> {
        let mut state = self.state.lock();
        let eid = state.next_eid;
        state.next_eid += 1;
        state.epolls.insert(eid, HashMap::new());
        Ok(eid)
    }

    fn epoll_add(&self, eid: EpollId, fd: Descriptor, interest: Interest) -> ApiResult<()> {
        self.epoll_update(eid, fd, interest)
    }

    fn epoll_update(&self, eid: EpollId, fd: Descriptor, interest: Interest) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.entry(fd)?;
        let set = state.epolls.get_mut(&eid).ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidPollId, format!("epoll {eid} does not exist"))
        })?;
        set.insert(fd, interest);
        self.changed.notify_all();
        Ok(())
    }

    fn epoll_remove(&self, eid: EpollId, fd: Descriptor) -> ApiResult<()> {
        let mut state = self.state.lock();
        let set = state.epolls.get_mut(&eid).ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidPollId, format!("epoll {eid} does not exist"))
        })?;
        set.remove(&fd);
        Ok(())
    }

    fn epoll_wait(
        &self,
        eid: EpollId,
        timeout: Option<Duration>,
    ) -> ApiResult<Vec<(Descriptor, Interest)>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        loop {
            let ready = state.collect_ready(eid)?;
            if !ready.is_empty() {
                return Ok(ready);
            }
            if self.wait_changed(&mut state, deadline) {
                return Ok(Vec::new());
            }
        }
    }

    fn epoll_release(&self, eid: EpollId) -> ApiResult<()> {
        let mut state = self.state.lock();
        if state.epolls.remove(&eid).is_none() {
            return Err(ApiError::new(
                ErrorCode::InvalidPollId,
                format!("epoll {eid} does not exist"),
            ));
        }
        self.changed.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn started() -> LoopbackApi {
        let api = LoopbackApi::new();
        api.startup().expect("startup");
        api
    }

    fn listener(api: &LoopbackApi, port: u16, backlog: usize) -> (Descriptor, SocketAddr) {
        let fd = api.create_socket().expect("create");
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        api.bind(fd, addr).expect("bind");
        api.listen(fd, backlog).expect("listen");
        (fd, addr)
    }

    fn set_str(api: &LoopbackApi, fd: Descriptor, id: OptionId, value: &str) {
        api.set_option(fd, id, SockOptValue::Str(value.to_owned()))
            .expect("set string option");
    }

    #[test]
    fn create_requires_startup_and_descriptors_are_not_reused() {
        let api = LoopbackApi::new();
        assert_eq!(
            api.create_socket().map_err(|err| err.code()),
            Err(ErrorCode::InvalidOp)
        );
        api.startup().expect("startup");
        let first = api.create_socket().expect("create");
        api.close(first).expect("close");
        let second = api.create_socket().expect("create");
        assert!(second > first);
        assert_eq!(api.status(first), SocketStatus::NonExist);
        assert_eq!(api.close(first).map_err(|err| err.code()), Err(ErrorCode::InvalidSock));
    }

    #[test]
    fn transtype_presets_reset_related_options() {
        let api = started();
        let fd = api.create_socket().expect("create");
        assert_eq!(api.get_option(fd, OptionId::MESSAGEAPI), Ok(SockOptValue::Bool(true)));
        api.set_option(fd, OptionId::TRANSTYPE, SockOptValue::Int(1))
            .expect("file mode");
        assert_eq!(api.get_option(fd, OptionId::MESSAGEAPI), Ok(SockOptValue::Bool(false)));
        assert_eq!(api.get_option(fd, OptionId::LATENCY), Ok(SockOptValue::Int(0)));
        assert_eq!(
            api.get_option(fd, OptionId::CONGESTION),
            Ok(SockOptValue::Str("file".into()))
        );
    }

    #[test]
    fn option_constraints_are_enforced() {
        let api = started();
        let fd = api.create_socket().expect("create");
        let code = |result: ApiResult<()>| result.map_err(|err| err.code());
        assert_eq!(
            code(api.set_option(fd, OptionId::PBKEYLEN, SockOptValue::Int(20))),
            Err(ErrorCode::InvalidParam)
        );
        assert_eq!(
            code(api.set_option(fd, OptionId::PASSPHRASE, SockOptValue::Str("short".into()))),
            Err(ErrorCode::InvalidParam)
        );
        assert_eq!(
            code(api.set_option(fd, OptionId::LATENCY, SockOptValue::Bool(true))),
            Err(ErrorCode::InvalidParam)
        );
        assert_eq!(
            api.get_option(fd, OptionId::PASSPHRASE).map_err(|err| err.code()),
            Err(ErrorCode::InvalidOp)
        );

        api.bind(fd, SocketAddr::from(([127, 0, 0, 1], 42001)))
            .expect("bind");
        api.listen(fd, 1).expect("listen");
        assert_eq!(
            code(api.set_option(fd, OptionId::LATENCY, SockOptValue::Int(10))),
            Err(ErrorCode::BoundSock)
        );
        api.set_option(fd, OptionId::LINGER, SockOptValue::Int(5))
            .expect("post option is always writable");
    }

    #[test]
    fn bind_conflicts_with_wildcard() {
        let api = started();
        let first = api.create_socket().expect("create");
        api.bind(first, SocketAddr::from(([0, 0, 0, 0], 42002)))
            .expect("bind");
        let second = api.create_socket().expect("create");
        assert_eq!(
            api.bind(second, SocketAddr::from(([127, 0, 0, 1], 42002)))
                .map_err(|err| err.code()),
            Err(ErrorCode::BindConflict)
        );
    }

    #[test]
    fn handshake_queues_connections_in_order() {
        let api = started();
        let (server, addr) = listener(&api, 42003, 3);
        let mut callers = Vec::new();
        for index in 0..3 {
            let fd = api.create_socket().expect("create");
            set_str(&api, fd, OptionId::STREAMID, &format!("caller-{index}"));
            api.connect(fd, addr).expect("connect");
            assert_eq!(api.status(fd), SocketStatus::Connected);
            callers.push(fd);
        }
        for index in 0..3 {
            let (accepted, peer) = api.accept(server).expect("accept");
            assert_eq!(peer, api.local_addr(callers[index]).expect("caller addr"));
            assert_eq!(
                api.get_option(accepted, OptionId::STREAMID),
                Ok(SockOptValue::Str(format!("caller-{index}")))
            );
        }
    }

    #[test]
    fn handshake_rejections_carry_reasons() {
        let api = started();
        let server = api.create_socket().expect("create");
        set_str(&api, server, OptionId::PASSPHRASE, "listener-secret");
        let addr = SocketAddr::from(([127, 0, 0, 1], 42004));
        api.bind(server, addr).expect("bind");
        api.listen(server, 1).expect("listen");

        let missing = api.create_socket().expect("create");
        let err = api
            .connect(missing, SocketAddr::from(([127, 0, 0, 1], 42999)))
            .expect_err("no listener");
        assert_eq!(err.code(), ErrorCode::NoServer);
        assert_eq!(api.reject_reason(missing), RejectReason::TIMEOUT);

        let mismatched = api.create_socket().expect("create");
        api.set_option(mismatched, OptionId::MESSAGEAPI, SockOptValue::Bool(false))
            .expect("stream api");
        assert!(api.connect(mismatched, addr).is_err());
        assert_eq!(api.reject_reason(mismatched), RejectReason::MESSAGEAPI);

        let wrong = api.create_socket().expect("create");
        set_str(&api, wrong, OptionId::PASSPHRASE, "another-secret");
        let err = api.connect(wrong, addr).expect_err("bad secret");
        assert_eq!(err.code(), ErrorCode::ConnRejected);
        assert_eq!(api.reject_reason(wrong), RejectReason::BADSECRET);

        let plain = api.create_socket().expect("create");
        assert!(api.connect(plain, addr).is_err());
        assert_eq!(api.reject_reason(plain), RejectReason::UNSECURE);

        let good = api.create_socket().expect("create");
        set_str(&api, good, OptionId::PASSPHRASE, "listener-secret");
        api.connect(good, addr).expect("matching secret");

        let late = api.create_socket().expect("create");
        set_str(&api, late, OptionId::PASSPHRASE, "listener-secret");
        assert!(api.connect(late, addr).is_err());
        assert_eq!(api.reject_reason(late), RejectReason::BACKLOG);
    }

    #[test]
    fn hook_runs_unlocked_and_sets_reason() {
        let api = Arc::new(started());
        let (server, addr) = listener(&api, 42005, 2);
        let hook: ListenHook = Arc::new(|request: &ListenRequest<'_>| {
            assert_eq!(request.handshake_version, HANDSHAKE_VERSION);
            assert_eq!(request.stream_id, "denied");
            request
                .api
                .set_reject_reason(request.candidate, RejectReason::FORBIDDEN)
                .expect("settable reason");
            assert!(
                request
                    .api
                    .set_reject_reason(request.candidate, RejectReason::BADSECRET)
                    .is_err()
            );
            false
        });
        api.set_listen_callback(server, Some(hook)).expect("hook");

        let caller = api.create_socket().expect("create");
        api.set_option(caller, OptionId::RCVSYN, SockOptValue::Bool(false))
            .expect("non-blocking");
        set_str(&api, caller, OptionId::STREAMID, "denied");
        api.connect(caller, addr).expect("non-blocking connect reports later");
        assert_eq!(api.status(caller), SocketStatus::Broken);
        assert_eq!(api.reject_reason(caller), RejectReason::FORBIDDEN);
        assert_eq!(api.open_descriptors(), 2);
    }

    #[test]
    fn byte_valued_string_options_share_storage() {
        let api = started();
        let (server, addr) = listener(&api, 42013, 2);
        assert_eq!(
            api.set_option(server, OptionId::LATENCY, SockOptValue::Bytes(vec![1]))
                .map_err(|err| err.code()),
            Err(ErrorCode::InvalidParam)
        );
        let seen = Arc::new(Mutex::new(String::new()));
        let hook: ListenHook = {
            let seen = Arc::clone(&seen);
            Arc::new(move |request: &ListenRequest<'_>| {
                *seen.lock() = request.stream_id.to_owned();
                true
            })
        };
        api.set_listen_callback(server, Some(hook)).expect("hook");

        let caller = api.create_socket().expect("create");
        let raw = vec![b'c', b'a', b'm', 0xff];
        assert_eq!(
            api.set_option(caller, OptionId::PASSPHRASE, SockOptValue::Bytes(b"short".to_vec()))
                .map_err(|err| err.code()),
            Err(ErrorCode::InvalidParam)
        );
        api.set_option(caller, OptionId::STREAMID, SockOptValue::Bytes(raw.clone()))
            .expect("bytes accepted for a string option");
        assert_eq!(
            api.get_option(caller, OptionId::STREAMID),
            Ok(SockOptValue::Bytes(raw.clone()))
        );
        api.connect(caller, addr).expect("connect");
        assert_eq!(*seen.lock(), "cam\u{fffd}");
        let (accepted, _) = api.accept(server).expect("accept");
        assert_eq!(
            api.get_option(accepted, OptionId::STREAMID),
            Ok(SockOptValue::Bytes(raw))
        );
    }

    #[test]
    fn rejection_without_reason_is_unacceptable() {
        let api = started();
        let (server, addr) = listener(&api, 42006, 1);
        api.set_listen_callback(server, Some(Arc::new(|_: &ListenRequest<'_>| false)))
            .expect("hook");
        let caller = api.create_socket().expect("create");
        assert!(api.connect(caller, addr).is_err());
        assert_eq!(api.reject_reason(caller), RejectReason::UNACCEPTABLE);
    }

    #[test]
    fn message_and_stream_modes_differ() {
        let api = started();
        let (server, addr) = listener(&api, 42007, 1);
        let caller = api.create_socket().expect("create");
        api.connect(caller, addr).expect("connect");
        let (accepted, _) = api.accept(server).expect("accept");

        api.send(caller, b"hello").expect("send");
        api.send(caller, b"world").expect("send");
        let mut buf = [0u8; 16];
        assert_eq!(api.recv(accepted, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(
            api.send(caller, &vec![0u8; 1400]).map_err(|err| err.code()),
            Err(ErrorCode::LargeMsg)
        );

        let (file_server, file_addr) = {
            let fd = api.create_socket().expect("create");
            api.set_option(fd, OptionId::TRANSTYPE, SockOptValue::Int(1))
                .expect("file");
            let addr = SocketAddr::from(([127, 0, 0, 1], 42008));
            api.bind(fd, addr).expect("bind");
            api.listen(fd, 1).expect("listen");
            (fd, addr)
        };
        let file_caller = api.create_socket().expect("create");
        api.set_option(file_caller, OptionId::TRANSTYPE, SockOptValue::Int(1))
            .expect("file");
        api.connect(file_caller, file_addr).expect("connect");
        let (file_accepted, _) = api.accept(file_server).expect("accept");
        api.send(file_caller, b"abc").expect("send");
        api.send(file_caller, b"defg").expect("send");
        let mut buf = [0u8; 5];
        assert_eq!(api.recv(file_accepted, &mut buf), Ok(5));
        assert_eq!(&buf, b"abcde");
        assert_eq!(api.recv(file_accepted, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"fg");
    }

    #[test]
    fn closing_peer_breaks_connection_after_drain() {
        let api = started();
        let (server, addr) = listener(&api, 42009, 1);
        let caller = api.create_socket().expect("create");
        api.connect(caller, addr).expect("connect");
        let (accepted, _) = api.accept(server).expect("accept");
        api.send(caller, b"last").expect("send");
        api.close(caller).expect("close");

        assert_eq!(api.status(accepted), SocketStatus::Broken);
        let mut buf = [0u8; 8];
        assert_eq!(api.recv(accepted, &mut buf), Ok(4));
        assert_eq!(
            api.recv(accepted, &mut buf).map_err(|err| err.code()),
            Err(ErrorCode::ConnLost)
        );
    }

    #[test]
    fn epoll_reports_level_triggered_readiness() {
        let api = started();
        let (server, addr) = listener(&api, 42010, 1);
        let eid = api.epoll_create().expect("epoll");
        api.epoll_add(eid, server, Interest::READABLE).expect("add");
        assert_eq!(
            api.epoll_wait(eid, Some(Duration::from_millis(10))),
            Ok(Vec::new())
        );

        let caller = api.create_socket().expect("create");
        api.connect(caller, addr).expect("connect");
        let ready = api
            .epoll_wait(eid, Some(Duration::from_millis(10)))
            .expect("wait");
        assert_eq!(ready, vec![(server, Interest::READABLE)]);
        // 水平触发：未取走前再次等待仍然就绪。
        assert_eq!(ready, api.epoll_wait(eid, None).expect("wait again"));

        api.epoll_release(eid).expect("release");
        assert_eq!(
            api.epoll_wait(eid, None).map_err(|err| err.code()),
            Err(ErrorCode::InvalidPollId)
        );
    }

    #[test]
    fn blocking_accept_wakes_on_close() {
        let api = Arc::new(started());
        let (server, _) = listener(&api, 42011, 1);
        let waiter = {
            let api = Arc::clone(&api);
            std::thread::spawn(move || api.accept(server).map_err(|err| err.code()))
        };
        std::thread::sleep(Duration::from_millis(30));
        api.close(server).expect("close");
        assert_eq!(waiter.join().expect("join"), Err(ErrorCode::InvalidSock));
    }

    #[test]
    fn receive_timeout_expires() {
        let api = started();
        let (server, addr) = listener(&api, 42012, 1);
        let caller = api.create_socket().expect("create");
        api.connect(caller, addr).expect("connect");
        let (accepted, _) = api.accept(server).expect("accept");
        api.set_option(accepted, OptionId::RCVTIMEO, SockOptValue::Int(20))
            .expect("rcvtimeo");
        let mut buf = [0u8; 4];
        assert_eq!(
            api.recv(accepted, &mut buf).map_err(|err| err.code()),
            Err(ErrorCode::Timeout)
        );
    }
}
