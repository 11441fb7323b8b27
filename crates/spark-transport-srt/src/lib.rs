#![doc = r#"
# spark-transport-srt

## 设计动机（Why）
- **定位**：该 crate 在 SRT（基于 UDP 的可靠、带拥塞控制的传输协议）之上提供面向连接的
  套接字抽象，覆盖创建、监听、接受、建连、关闭与强类型选项配置。
- **架构角色**：拥塞控制、重传、加密与分包由外部传输库负责；本 crate 驱动它的原语，
  契约收敛在 [`SrtApi`]，缺省后端为进程内的 [`LoopbackApi`]。
- **设计理念**：阻塞与非阻塞两种模式统一表达为“执行原语 → 未就绪则挂起 → 重试”，
  非阻塞模式唯一的挂起点是共享的 [`Multiplexer`]，并发 `close` 能及时打断任何挂起。

## 核心契约（What）
- **输入条件**：进程内先调用 [`init_engine`]（可重复调用，与 [`cleanup_engine`] 配对），
  再以 `host:port + 选项映射` 构造 [`SrtSocket`]；
- **输出保障**：选项按固定的名称→类型表解析，非法值在下发前被拒绝且不产生副作用；
  建连失败时 [`RejectReason`] 先写入套接字再返回 [`SrtError::Connect`]；
- **扩展点**：监听者可安装 [`AcceptPolicy`]，在握手过程中同步接受或拒绝入站连接并附带原因码。

## 实现策略（How）
- **多路复用**：单个轮询线程等待传输库的 epoll 实例，按描述符派发就绪位并立即撤销兴趣；
- **生命周期**：句柄内部以 `Arc` 共享状态，关闭标志先于注销置位，用于区分“被取消”与“传输失败”；
- **异步适配**：启用 `runtime-tokio` 特性后提供 `*_async` 方法，在 Tokio 阻塞线程池上运行。

## 风险与考量（Trade-offs）
- **线程占用**：每个挂起中的调用占用一个线程；高并发监听建议使用非阻塞模式配合少量工作线程；
- **后端差异**：[`LoopbackApi`] 不模拟网络时延与丢包，性能结论需要在原生后端上验证。
"#]

mod api;
mod engine;
mod error;
mod loopback;
mod options;
mod policy;
mod poll;
mod reject;
#[cfg(feature = "runtime-tokio")]
mod runtime;
mod socket;

pub use api::{
    ApiResult, Descriptor, EpollId, ListenHook, ListenRequest, SockOptValue, SocketStatus, SrtApi,
};
pub use engine::{EngineConfig, cleanup_engine, init_engine, init_engine_with, is_engine_initialized};
pub use error::{ApiError, ErrorCategory, ErrorCode, Operation, SrtError};
pub use loopback::{HANDSHAKE_VERSION, LoopbackApi};
pub use options::{
    BLOCKING_KEY, Binding, OPTION_TABLE, OptionId, OptionKind, OptionSpec, OptionValue,
    SocketConfig, TransType, apply as apply_option, lookup as lookup_option, parse_bool,
    read as read_option,
};
pub use policy::{AcceptPolicy, CandidateSocket};
pub use poll::{Interest, Multiplexer, PollHandle, WaitError};
pub use reject::{RejectClass, RejectCodeRange, RejectReason, code_to_string};
pub use socket::{SocketState, SrtSocket};
