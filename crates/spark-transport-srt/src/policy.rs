//! 接入策略（AcceptPolicy）：监听者在握手过程中对每个入站连接做出同步裁决。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 鉴权、容量控制等判断必须在握手完成之前给出，否则对端会先看到连接成功再被断开；
//! - 扩展点刻意保持狭窄：只暴露候选连接、握手版本、对端地址与 stream id，
//!   回调返回布尔值，拒绝原因通过 [`CandidateSocket::set_reject_reason`] 附带。
//!
//! ## 契约 (What)
//! - 回调在传输库的握手线程上同步执行，可能与调用 `listen` 的线程不同；
//! - 返回 `false` 时，对端 `connect` 失败并读到回调设置的原因，未设置则为
//!   [`RejectReason::UNACCEPTABLE`]；
//! - 回调内只能设置不小于预定义段起点的原因码，内部段由传输库保留。
//!
//! ## 注意事项 (Trade-offs)
//! - 回调阻塞会拖慢同一监听者上的其它握手，耗时判断应提前缓存结果。

use std::net::SocketAddr;

use crate::{
    api::{Descriptor, SrtApi},
    error::{Operation, SrtError},
    options::{self, OptionValue},
    reject::RejectReason,
};

/// 监听回调契约。
pub trait AcceptPolicy: Send + Sync + 'static {
    /// 返回 `true` 接受连接，`false` 拒绝。
    fn on_incoming(
        &self,
        candidate: &CandidateSocket<'_>,
        handshake_version: i32,
        peer: SocketAddr,
        stream_id: &str,
    ) -> bool;
}

impl<F> AcceptPolicy for F
where
    F: Fn(&CandidateSocket<'_>, i32, SocketAddr, &str) -> bool + Send + Sync + 'static,
{
    fn on_incoming(
        &self,
        candidate: &CandidateSocket<'_>,
        handshake_version: i32,
        peer: SocketAddr,
        stream_id: &str,
    ) -> bool {
        self(candidate, handshake_version, peer, stream_id)
    }
}

/// 握手中的候选连接，仅在回调期间有效。
pub struct CandidateSocket<'a> {
    api: &'a dyn SrtApi,
    fd: Descriptor,
    peer: SocketAddr,
    stream_id: &'a str,
}

impl<'a> CandidateSocket<'a> {
    pub(crate) fn new(
        api: &'a dyn SrtApi,
        fd: Descriptor,
        peer: SocketAddr,
        stream_id: &'a str,
    ) -> Self {
        Self {
            api,
            fd,
            peer,
            stream_id,
        }
    }

    pub fn descriptor(&self) -> Descriptor {
        self.fd
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_id(&self) -> &str {
        self.stream_id
    }

    /// 附带拒绝原因；原因码落在传输库内部段时返回错误。
    pub fn set_reject_reason(&self, reason: RejectReason) -> Result<(), SrtError> {
        self.api
            .set_reject_reason(self.fd, reason)
            .map_err(SrtError::transport(Operation::Configure))
    }

    pub fn reject_reason(&self) -> RejectReason {
        self.api.reject_reason(self.fd)
    }

    /// 在握手阶段调整候选连接的选项。
    pub fn set_option(&self, name: &str, raw: &str) -> Result<(), SrtError> {
        options::apply(self.api, self.fd, name, raw)
    }

    pub fn option(&self, name: &str) -> Result<OptionValue, SrtError> {
        options::read(self.api, self.fd, name)
    }
}

impl std::fmt::Debug for CandidateSocket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSocket")
            .field("fd", &self.fd)
            .field("peer", &self.peer)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}
