//! 监听/接受状态机：积压队列、接受顺序与并发关闭。
//!
//! # 教案式说明
//! - **Why**：`accept` 是阻塞与非阻塞两条路径差异最大的地方，必须在两种模式下都能
//!   拿到全部已握手连接，并能被并发 `close` 及时打断。
//! - **How**：N 个连接者在各自线程上建连，主线程在看门狗保护下连续接受 N 次。
//! - **What**：得到 N 个不同的套接字与对端地址；看门狗不应触发。

mod support;

use std::{collections::HashSet, sync::mpsc, thread, time::Duration};

use spark_transport_srt::{OptionValue, SocketState, SrtError, SrtSocket};

fn accept_helper(connections: usize, port: u16, blocking: bool) {
    let _engine = support::engine();
    let options = [
        ("transtype", "file"),
        ("blocking", if blocking { "1" } else { "0" }),
    ];
    let listener = SrtSocket::new("localhost", port, options).expect("创建监听套接字");
    listener.listen(connections).expect("监听");

    let connectors: Vec<SrtSocket> = (0..connections)
        .map(|_| SrtSocket::new("localhost", port, options).expect("创建连接套接字"))
        .collect();
    let watchdog = support::Watchdog::arm(
        support::WATCHDOG,
        connectors
            .iter()
            .cloned()
            .chain(std::iter::once(listener.clone()))
            .collect(),
    );
    let workers: Vec<_> = connectors
        .iter()
        .cloned()
        .map(|connector| thread::spawn(move || connector.connect()))
        .collect();

    let mut accepted = Vec::new();
    let mut peers = HashSet::new();
    for _ in 0..connections {
        let (socket, peer) = listener.accept().expect("看门狗触发前应接受到连接");
        assert_eq!(socket.state(), SocketState::Connected);
        assert_eq!(socket.is_blocking(), blocking);
        peers.insert(peer);
        accepted.push(socket);
    }
    for worker in workers {
        worker.join().expect("连接线程不应 panic").expect("建连成功");
    }
    assert!(watchdog.disarm(), "看门狗不应触发");

    assert_eq!(peers.len(), connections, "对端地址应两两不同");
    let descriptors: HashSet<_> = accepted.iter().map(SrtSocket::descriptor).collect();
    assert_eq!(descriptors.len(), connections);
    for connector in &connectors {
        assert_eq!(connector.state(), SocketState::Connected);
        let local = connector.local_addr().expect("连接者本地地址");
        assert!(peers.contains(&local));
    }
}

#[test]
fn accept_nonblocking() {
    accept_helper(1, 46201, false);
}

#[test]
fn accept_blocking() {
    accept_helper(1, 46202, true);
}

#[test]
fn multiple_accept_nonblocking() {
    accept_helper(3, 46203, false);
}

#[test]
fn multiple_accept_blocking() {
    accept_helper(3, 46204, true);
}

/// 接受顺序与握手完成顺序一致。
#[test]
fn accept_order_follows_handshake_order() {
    let _engine = support::engine();
    let listener = SrtSocket::new("127.0.0.1", 46205, [("blocking", "0")]).expect("创建");
    listener.listen(3).expect("监听");
    let mut connectors = Vec::new();
    for index in 0..3 {
        let connector = SrtSocket::new(
            "127.0.0.1",
            46205,
            [("blocking", "0".to_owned()), ("streamid", format!("caller-{index}"))],
        )
        .expect("创建");
        connector.connect().expect("建连");
        connectors.push(connector);
    }
    for index in 0..3 {
        let (socket, peer) = listener.accept().expect("接受");
        assert_eq!(peer, connectors[index].local_addr().expect("本地地址"));
        assert_eq!(
            socket.option("streamid").expect("streamid"),
            OptionValue::String(format!("caller-{index}"))
        );
        assert_eq!(socket.peer_addr().expect("对端地址"), peer);
    }
}

/// 并发关闭能在看门狗时限内打断挂起中的 `accept`。
#[test]
fn close_cancels_pending_accept() {
    let _engine = support::engine();
    for (port, blocking) in [(46206, false), (46207, true)] {
        let listener = SrtSocket::new(
            "127.0.0.1",
            port,
            [("blocking", if blocking { "1" } else { "0" })],
        )
        .expect("创建");
        listener.listen(1).expect("监听");

        let (tx, rx) = mpsc::channel();
        let worker = listener.clone();
        thread::spawn(move || {
            let _ = tx.send(worker.accept().map(|(socket, _)| socket.descriptor()));
        });
        thread::sleep(Duration::from_millis(50));
        listener.close();

        let outcome = rx
            .recv_timeout(support::WATCHDOG)
            .expect("关闭后 accept 应在时限内返回");
        match outcome {
            Err(err) => assert!(err.is_cancelled(), "blocking={blocking}: {err}"),
            Ok(fd) => panic!("blocking={blocking}: unexpected connection {fd}"),
        }
        assert_eq!(listener.state(), SocketState::Closed);
        assert!(matches!(listener.accept(), Err(SrtError::Closed { .. })));
    }
}

/// 关闭两次不报错，且不会影响其它套接字。
#[test]
fn close_twice_is_harmless() {
    let _engine = support::engine();
    let (accepted, connector) = support::connected_pair(46208, &[("blocking", "1")]);
    connector.close();
    connector.close();
    accepted.close();
    accepted.close();
    assert!(connector.is_closed());
    assert!(accepted.is_closed());
}

/// 未被取走的候选连接随监听者一同关闭，其连接者转为断开。
#[test]
fn closing_listener_breaks_unaccepted_connections() {
    let _engine = support::engine();
    let listener = SrtSocket::new("127.0.0.1", 46209, [("blocking", "1")]).expect("创建");
    listener.listen(1).expect("监听");
    let connector = SrtSocket::new("127.0.0.1", 46209, [("blocking", "1")]).expect("创建");
    connector.connect().expect("建连");
    listener.close();

    let mut buf = [0u8; 4];
    assert_eq!(connector.read(&mut buf).expect("对端关闭后读取返回 EOF"), 0);
    assert!(connector.write(b"ping").is_err());
}
