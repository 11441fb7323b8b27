//! 外部传输库原语面（SRT 引擎）。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 拥塞控制、重传、加密、分包均由外部传输库负责，本 crate 只驱动它的原语；
//! - 以 trait 对象 [`SrtApi`] 描述这组原语，套接字层、选项编解码与多路复用器只依赖该契约，
//!   原生库绑定与进程内实现（[`LoopbackApi`](crate::LoopbackApi)）可以互换。
//!
//! ## 契约 (What)
//! - 数值约定与 libsrt 一致：描述符为 `i32`，选项以 [`OptionId`] 编号，错误以
//!   [`ErrorCode`](crate::ErrorCode) 表达；
//! - `accept`/`connect`/`recv` 是否阻塞由描述符上的 `SRTO_RCVSYN` 决定，`send` 由
//!   `SRTO_SNDSYN` 决定；非阻塞且未就绪时返回 `SRT_EASYNCRCV`/`SRT_EASYNCSND`；
//! - 非阻塞 `connect` 立即返回，结果通过可写/错误就绪事件与 [`SrtApi::status`] 观察；
//! - 监听回调在握手过程中同步调用，调用期间实现方不得持有内部锁，以便回调重入
//!   `set_reject_reason` 等原语。
//!
//! ## 注意事项 (Trade-offs)
//! - `epoll_wait` 采用水平触发语义，调用方负责在事件派发后撤销兴趣以避免空转。

use std::{net::SocketAddr, sync::Arc, time::Duration};

use crate::{error::ApiError, options::OptionId, poll::Interest, reject::RejectReason};

/// 传输库描述符。
pub type Descriptor = i32;

/// 传输库事件多路复用实例编号。
pub type EpollId = i32;

pub type ApiResult<T> = Result<T, ApiError>;

/// 描述符在传输库中的状态（`SRT_SOCKSTATUS`）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketStatus {
    Init,
    Opened,
    Listening,
    Connecting,
    Connected,
    Broken,
    Closing,
    Closed,
    NonExist,
}

/// 选项原语的值类型。
///
/// 字符串类选项（`passphrase`、`streamid`、`congestion`、`packetfilter`）在传输库中
/// 是字节数组：`Str` 与 `Bytes` 写入同一存储，`Bytes` 用于承载非 UTF-8 内容。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SockOptValue {
    Int(i32),
    Int64(i64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

impl SockOptValue {
    /// 字符串类取值的原始字节；其它类型返回 `None`。
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SockOptValue::Str(value) => Some(value.as_bytes()),
            SockOptValue::Bytes(value) => Some(value),
            _ => None,
        }
    }
}

/// 监听回调收到的握手请求。
pub struct ListenRequest<'a> {
    /// 回调可借此对候选描述符调用原语（设置拒绝原因、读写选项）。
    pub api: &'a dyn SrtApi,
    pub candidate: Descriptor,
    pub handshake_version: i32,
    pub peer: SocketAddr,
    pub stream_id: &'a str,
}

/// 监听回调：返回 `false` 拒绝本次握手。
pub type ListenHook = Arc<dyn Fn(&ListenRequest<'_>) -> bool + Send + Sync>;

/// 外部传输库的原语集合。
pub trait SrtApi: Send + Sync + 'static {
    /// 库级初始化；允许重复调用。
    fn startup(&self) -> ApiResult<()>;

    /// 与 `startup` 配对的库级清理。
    fn cleanup(&self);

    fn create_socket(&self) -> ApiResult<Descriptor>;

    fn close(&self, fd: Descriptor) -> ApiResult<()>;

    fn bind(&self, fd: Descriptor, addr: SocketAddr) -> ApiResult<()>;

    fn listen(&self, fd: Descriptor, backlog: usize) -> ApiResult<()>;

    /// 取出一个已完成握手的连接，按传输库完成顺序返回。
    fn accept(&self, fd: Descriptor) -> ApiResult<(Descriptor, SocketAddr)>;

    fn connect(&self, fd: Descriptor, addr: SocketAddr) -> ApiResult<()>;

    fn status(&self, fd: Descriptor) -> SocketStatus;

    fn send(&self, fd: Descriptor, data: &[u8]) -> ApiResult<usize>;

    fn recv(&self, fd: Descriptor, buf: &mut [u8]) -> ApiResult<usize>;

    fn get_option(&self, fd: Descriptor, id: OptionId) -> ApiResult<SockOptValue>;

    fn set_option(&self, fd: Descriptor, id: OptionId, value: SockOptValue) -> ApiResult<()>;

    fn local_addr(&self, fd: Descriptor) -> ApiResult<SocketAddr>;

    fn peer_addr(&self, fd: Descriptor) -> ApiResult<SocketAddr>;

    /// 安装或移除监听回调，替换先前的回调。
    fn set_listen_callback(&self, fd: Descriptor, hook: Option<ListenHook>) -> ApiResult<()>;

    fn set_reject_reason(&self, fd: Descriptor, reason: RejectReason) -> ApiResult<()>;

    /// 最近一次握手失败的原因；未失败时为 [`RejectReason::UNKNOWN`]。
    fn reject_reason(&self, fd: Descriptor) -> RejectReason;

    fn epoll_create(&self) -> ApiResult<EpollId>;

    fn epoll_add(&self, eid: EpollId, fd: Descriptor, interest: Interest) -> ApiResult<()>;

    fn epoll_update(&self, eid: EpollId, fd: Descriptor, interest: Interest) -> ApiResult<()>;

    fn epoll_remove(&self, eid: EpollId, fd: Descriptor) -> ApiResult<()>;

    /// 等待任一订阅描述符就绪；`timeout = None` 表示无限等待，超时返回空集合。
    fn epoll_wait(
        &self,
        eid: EpollId,
        timeout: Option<Duration>,
    ) -> ApiResult<Vec<(Descriptor, Interest)>>;

    /// 释放多路复用实例，并唤醒阻塞在其上的 `epoll_wait`。
    fn epoll_release(&self, eid: EpollId) -> ApiResult<()>;
}
