//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总 SRT 传输层对外暴露的全部错误语义：选项编解码、生命周期操作、多路复用等待；
//! - 将底层传输库返回的数值错误码（[`ErrorCode`]，与 libsrt 取值一致）包装为带上下文的
//!   [`SrtError`]，保证日志与告警能够直接定位到“哪个操作、哪个选项”。
//!
//! ## 设计要求（What）
//! - 每个操作对应稳定错误码 `spark.transport.srt.<op>_failed`，与 TCP/QUIC 传输的
//!   `OperationKind` 命名体系保持一致；
//! - [`SrtError::Cancelled`] 与真实的传输错误严格区分，调用方可据此避免把主动关闭误报为故障；
//! - 未对错误消息做本地化，统一使用英文描述，便于跨团队排障。

use std::{borrow::Cow, fmt, io, net::SocketAddr};

use thiserror::Error;

use crate::{options::OptionKind, reject::RejectReason, socket::SocketState};

/// 传输库错误码，数值与 libsrt 的 `SRT_ERRNO` 保持一致。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
#[non_exhaustive]
pub enum ErrorCode {
    /// `SRT_EUNKNOWN`
    Unknown = -1,
    /// `SRT_ECONNSETUP`
    ConnSetup = 1000,
    /// `SRT_ENOSERVER`：对端无应答。
    NoServer = 1001,
    /// `SRT_ECONNREJ`：握手被对端拒绝，具体原因见拒绝码。
    ConnRejected = 1002,
    /// `SRT_ESCLOSED`
    SocketClosed = 1005,
    /// `SRT_ECONNLOST`
    ConnLost = 2001,
    /// `SRT_ENOCONN`
    NoConn = 2002,
    /// `SRT_ERESOURCE`
    Resource = 3000,
    /// `SRT_EINVOP`
    InvalidOp = 5000,
    /// `SRT_EBOUNDSOCK`：选项只能在绑定前设置。
    BoundSock = 5001,
    /// `SRT_ECONNSOCK`：套接字已建立连接。
    ConnSock = 5002,
    /// `SRT_EINVPARAM`
    InvalidParam = 5003,
    /// `SRT_EINVSOCK`：描述符无效或已关闭。
    InvalidSock = 5004,
    /// `SRT_EUNBOUNDSOCK`
    UnboundSock = 5005,
    /// `SRT_ENOLISTEN`
    NoListen = 5006,
    /// `SRT_EDUPLISTEN`
    DupListen = 5011,
    /// `SRT_ELARGEMSG`
    LargeMsg = 5012,
    /// `SRT_EINVPOLLID`
    InvalidPollId = 5013,
    /// `SRT_EBINDCONFLICT`
    BindConflict = 5015,
    /// `SRT_EASYNCSND`：非阻塞发送暂不可写。
    AsyncSnd = 6001,
    /// `SRT_EASYNCRCV`：非阻塞接收/接受暂无数据。
    AsyncRcv = 6002,
    /// `SRT_ETIMEOUT`
    Timeout = 6003,
}

impl ErrorCode {
    /// 返回 libsrt 数值错误码。
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// libsrt 中的常量名，便于与原生文档对照。
    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "SRT_EUNKNOWN",
            ErrorCode::ConnSetup => "SRT_ECONNSETUP",
            ErrorCode::NoServer => "SRT_ENOSERVER",
            ErrorCode::ConnRejected => "SRT_ECONNREJ",
            ErrorCode::SocketClosed => "SRT_ESCLOSED",
            ErrorCode::ConnLost => "SRT_ECONNLOST",
            ErrorCode::NoConn => "SRT_ENOCONN",
            ErrorCode::Resource => "SRT_ERESOURCE",
            ErrorCode::InvalidOp => "SRT_EINVOP",
            ErrorCode::BoundSock => "SRT_EBOUNDSOCK",
            ErrorCode::ConnSock => "SRT_ECONNSOCK",
            ErrorCode::InvalidParam => "SRT_EINVPARAM",
            ErrorCode::InvalidSock => "SRT_EINVSOCK",
            ErrorCode::UnboundSock => "SRT_EUNBOUNDSOCK",
            ErrorCode::NoListen => "SRT_ENOLISTEN",
            ErrorCode::DupListen => "SRT_EDUPLISTEN",
            ErrorCode::LargeMsg => "SRT_ELARGEMSG",
            ErrorCode::InvalidPollId => "SRT_EINVPOLLID",
            ErrorCode::BindConflict => "SRT_EBINDCONFLICT",
            ErrorCode::AsyncSnd => "SRT_EASYNCSND",
            ErrorCode::AsyncRcv => "SRT_EASYNCRCV",
            ErrorCode::Timeout => "SRT_ETIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_raw())
    }
}

/// 传输库原语返回的错误：错误码 + 人类可读的细节。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {detail}")]
pub struct ApiError {
    code: ErrorCode,
    detail: Cow<'static, str>,
}

impl ApiError {
    pub fn new(code: ErrorCode, detail: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// 非阻塞原语“尚未就绪”的应答（EAGAIN 类），调用方应挂起等待后重试。
    pub fn is_would_block(&self) -> bool {
        matches!(self.code, ErrorCode::AsyncRcv | ErrorCode::AsyncSnd)
    }
}

/// 套接字层操作标签，决定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Configure,
    Bind,
    Listen,
    Accept,
    Connect,
    Read,
    Write,
    Poll,
}

impl Operation {
    /// 稳定错误码。
    pub const fn code(self) -> &'static str {
        match self {
            Operation::Create => "spark.transport.srt.create_failed",
            Operation::Configure => "spark.transport.srt.configure_failed",
            Operation::Bind => "spark.transport.srt.bind_failed",
            Operation::Listen => "spark.transport.srt.listen_failed",
            Operation::Accept => "spark.transport.srt.accept_failed",
            Operation::Connect => "spark.transport.srt.connect_failed",
            Operation::Read => "spark.transport.srt.read_failed",
            Operation::Write => "spark.transport.srt.write_failed",
            Operation::Poll => "spark.transport.srt.poll_failed",
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Operation::Create => "srt create",
            Operation::Configure => "srt configure",
            Operation::Bind => "srt bind",
            Operation::Listen => "srt listen",
            Operation::Accept => "srt accept",
            Operation::Connect => "srt connect",
            Operation::Read => "srt read",
            Operation::Write => "srt write",
            Operation::Poll => "srt poll",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// 错误分类，驱动上层的重试/告警策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 并发 `close` 导致的主动中断，不应计为故障。
    Cancelled,
    Timeout,
    Retryable,
    NonRetryable,
    /// 调用方提供的配置有误，修正前重试无意义。
    Configuration,
}

/// SRT 传输层统一错误。
///
/// # 教案式说明
/// - **意图 (Why)**：把选项、生命周期、等待三类失败收敛到一个枚举，`?` 即可跨层传播；
/// - **契约 (What)**：
///   - 选项类错误携带选项名与原始字符串，解析失败时不会产生任何副作用；
///   - [`SrtError::Connect`] 携带 [`RejectReason`]，其值在错误返回前已写入套接字；
///   - [`SrtError::Cancelled`] 只在操作进行中被并发 `close` 打断时出现，
///     [`SrtError::Closed`] 表示调用发生在 `close` 之后；
/// - **风险 (Trade-offs)**：变体使用 `String` 保存上下文，牺牲少量分配换取可读性。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SrtError {
    #[error("srt engine is not initialized; call `init_engine` first")]
    NotInitialized,

    #[error("srt engine startup failed: {0}")]
    Startup(#[source] ApiError),

    #[error("cannot resolve `{host}:{port}`: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("unknown srt option `{name}`")]
    UnknownOption { name: String },

    #[error("invalid value `{value}` for srt option `{name}` (expected {expected})")]
    InvalidOptionValue {
        name: String,
        value: String,
        expected: OptionKind,
    },

    #[error("srt option `{name}` rejected by transport: {source}")]
    OptionRejectedByTransport {
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("srt bind {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: ApiError,
    },

    #[error("srt listen on {addr} failed: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: ApiError,
    },

    #[error("srt accept failed: {source}")]
    Accept {
        #[source]
        source: ApiError,
    },

    #[error("srt connect to {addr} failed ({reason}): {source}")]
    Connect {
        addr: SocketAddr,
        reason: RejectReason,
        #[source]
        source: ApiError,
    },

    #[error("{op} failed: {source}")]
    Transport {
        op: Operation,
        #[source]
        source: ApiError,
    },

    #[error("{op} cancelled by concurrent close")]
    Cancelled { op: Operation },

    #[error("{op} timed out")]
    TimedOut { op: Operation },

    #[error("{op} attempted on a closed socket")]
    Closed { op: Operation },

    #[error("{op} is not permitted while the socket is {state:?}")]
    InvalidState { op: Operation, state: SocketState },
}

impl SrtError {
    pub(crate) fn transport(op: Operation) -> impl FnOnce(ApiError) -> SrtError {
        move |source| SrtError::Transport { op, source }
    }

    /// 稳定错误码，供日志与指标打标签。
    pub fn code(&self) -> &'static str {
        match self {
            SrtError::NotInitialized | SrtError::Startup(_) => "spark.transport.srt.engine_unavailable",
            SrtError::Resolve { .. } => Operation::Create.code(),
            SrtError::UnknownOption { .. }
            | SrtError::InvalidOptionValue { .. }
            | SrtError::OptionRejectedByTransport { .. } => Operation::Configure.code(),
            SrtError::Bind { .. } => Operation::Bind.code(),
            SrtError::Listen { .. } => Operation::Listen.code(),
            SrtError::Accept { .. } => Operation::Accept.code(),
            SrtError::Connect { .. } => Operation::Connect.code(),
            SrtError::Transport { op, .. } | SrtError::InvalidState { op, .. } => op.code(),
            SrtError::Cancelled { .. } => "spark.transport.srt.cancelled",
            SrtError::TimedOut { .. } => "spark.transport.srt.timeout",
            SrtError::Closed { .. } => "spark.transport.srt.closed",
        }
    }

    /// 按错误来源归类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            SrtError::Cancelled { .. } => ErrorCategory::Cancelled,
            SrtError::TimedOut { .. } => ErrorCategory::Timeout,
            SrtError::UnknownOption { .. }
            | SrtError::InvalidOptionValue { .. }
            | SrtError::OptionRejectedByTransport { .. }
            | SrtError::Resolve { .. }
            | SrtError::NotInitialized => ErrorCategory::Configuration,
            SrtError::Bind { .. } | SrtError::Listen { .. } => ErrorCategory::Retryable,
            SrtError::Connect { reason, .. } => {
                if *reason == RejectReason::BACKLOG
                    || *reason == RejectReason::TIMEOUT
                    || *reason == RejectReason::OVERLOAD
                {
                    ErrorCategory::Retryable
                } else {
                    ErrorCategory::NonRetryable
                }
            }
            SrtError::Transport { source, .. } | SrtError::Accept { source } => {
                match source.code() {
                    ErrorCode::Timeout => ErrorCategory::Timeout,
                    ErrorCode::ConnLost | ErrorCode::NoServer | ErrorCode::Resource => {
                        ErrorCategory::Retryable
                    }
                    _ => ErrorCategory::NonRetryable,
                }
            }
            SrtError::Startup(_) | SrtError::Closed { .. } | SrtError::InvalidState { .. } => {
                ErrorCategory::NonRetryable
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SrtError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SrtError::TimedOut { .. })
    }

    /// 建连失败时对端给出的拒绝原因。
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            SrtError::Connect { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<SrtError> for io::Error {
    fn from(err: SrtError) -> Self {
        use io::ErrorKind;
        let kind = match &err {
            SrtError::Cancelled { .. } => ErrorKind::ConnectionAborted,
            SrtError::TimedOut { .. } => ErrorKind::TimedOut,
            SrtError::Closed { .. } => ErrorKind::NotConnected,
            SrtError::Connect { .. } => ErrorKind::ConnectionRefused,
            SrtError::Bind { source, .. } if source.code() == ErrorCode::BindConflict => {
                ErrorKind::AddrInUse
            }
            SrtError::UnknownOption { .. } | SrtError::InvalidOptionValue { .. } => {
                ErrorKind::InvalidInput
            }
            SrtError::Transport { source, .. } => match source.code() {
                ErrorCode::ConnLost => ErrorKind::ConnectionReset,
                ErrorCode::NoConn => ErrorKind::NotConnected,
                ErrorCode::AsyncRcv | ErrorCode::AsyncSnd => ErrorKind::WouldBlock,
                ErrorCode::Timeout => ErrorKind::TimedOut,
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
