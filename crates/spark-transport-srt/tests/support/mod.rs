//! 集成测试共用的引擎守卫与看门狗。
//!
//! # 教案式说明
//! - **Why**：同一测试二进制中的用例并行执行、共享进程级引擎；以守卫对称地调用
//!   `init_engine`/`cleanup_engine`，任一用例提前 panic 也不会泄漏引用。
//! - **How**：看门狗线程在时限到达后关闭登记的套接字，挂起中的调用随即以
//!   `Cancelled` 返回，测试以失败而非卡死的方式暴露问题。
//! - **What**：`Watchdog::disarm` 返回是否在时限内解除。

#![allow(dead_code)]

use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::Duration,
};

use spark_transport_srt::{SrtSocket, cleanup_engine, init_engine};

pub const WATCHDOG: Duration = Duration::from_secs(1);

pub struct EngineGuard(());

impl Drop for EngineGuard {
    fn drop(&mut self) {
        cleanup_engine();
    }
}

pub fn engine() -> EngineGuard {
    init_engine().expect("引擎初始化失败");
    EngineGuard(())
}

pub struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<bool>>,
}

impl Watchdog {
    /// 时限到达后关闭 `sockets`。
    pub fn arm(limit: Duration, sockets: Vec<SrtSocket>) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        let worker = thread::spawn(move || match rx.recv_timeout(limit) {
            Err(RecvTimeoutError::Timeout) => {
                for socket in &sockets {
                    socket.close();
                }
                false
            }
            _ => true,
        });
        Self {
            disarm: Some(tx),
            worker: Some(worker),
        }
    }

    /// 解除看门狗；返回 `false` 表示看门狗已经触发过。
    pub fn disarm(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        if let Some(tx) = self.disarm.take() {
            let _ = tx.send(());
        }
        self.worker
            .take()
            .map(|worker| worker.join().expect("看门狗线程不应 panic"))
            .unwrap_or(true)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 建立一对已连接的套接字：`(accepted, connector)`。
pub fn connected_pair(port: u16, options: &[(&str, &str)]) -> (SrtSocket, SrtSocket) {
    let listener =
        SrtSocket::new("127.0.0.1", port, options.iter().copied()).expect("创建监听套接字失败");
    listener.listen(1).expect("监听失败");
    let connector =
        SrtSocket::new("127.0.0.1", port, options.iter().copied()).expect("创建连接套接字失败");
    connector.connect().expect("建连失败");
    let (accepted, _) = listener.accept().expect("接受连接失败");
    listener.close();
    (accepted, connector)
}
