//! Tokio 异步适配：把阻塞式套接字调用搬到 Tokio 的阻塞线程池。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 套接字层的挂起点（多路复用器等待或传输库阻塞原语）都会占用线程，
//!   直接在异步任务里调用会饿死运行时的工作线程；
//! - 借助 `spawn_blocking` 提供 `*_async` 方法，调用方即可在 `async` 代码中组合 SRT 操作。
//!
//! ## 契约 (What)
//! - 取消方式与同步接口一致：在任一克隆句柄上调用 `close`，挂起中的 Future 以
//!   [`SrtError::Cancelled`] 完成；
//! - 单纯丢弃 Future 不会中断底层调用，阻塞线程会继续运行到操作结束；
//! - 阻塞任务发生 panic 时，panic 在等待方线程上继续传播。

use std::net::SocketAddr;

use crate::{
    error::{Operation, SrtError},
    socket::SrtSocket,
};

async fn run_blocking<T, F>(op: Operation, task: F) -> Result<T, SrtError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SrtError> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(error) if error.is_cancelled() => Err(SrtError::Cancelled { op }),
        Err(error) => std::panic::resume_unwind(error.into_panic()),
    }
}

impl SrtSocket {
    pub async fn accept_async(&self) -> Result<(SrtSocket, SocketAddr), SrtError> {
        let socket = self.clone();
        run_blocking(Operation::Accept, move || socket.accept()).await
    }

    pub async fn connect_async(&self) -> Result<(), SrtError> {
        let socket = self.clone();
        run_blocking(Operation::Connect, move || socket.connect()).await
    }

    /// 读取至多 `max` 字节；返回空向量表示对端已关闭。
    pub async fn read_async(&self, max: usize) -> Result<Vec<u8>, SrtError> {
        let socket = self.clone();
        run_blocking(Operation::Read, move || {
            let mut buf = vec![0u8; max];
            let read = socket.read(&mut buf)?;
            buf.truncate(read);
            Ok(buf)
        })
        .await
    }

    pub async fn write_async(&self, data: Vec<u8>) -> Result<usize, SrtError> {
        let socket = self.clone();
        run_blocking(Operation::Write, move || socket.write(&data)).await
    }
}
