//! 전송 어댑터 계약
//!
//! 코어는 소켓을 직접 열지 않는다. 전송 계층이 `Registry`의
//! on_connect/on_bytes/on_close를 호출하고, 코어는 이 트레이트로
//! ACK 송신과 연결 종료를 요청한다.

use bytes::Bytes;
use parking_lot::Mutex;

use crate::session::ConnectionId;

/// 코어가 소비하는 전송 계층 인터페이스
///
/// 두 메서드 모두 블로킹하지 않아야 한다. 송신은 큐 적재만 하고
/// 실제 쓰기는 전송 계층의 태스크가 수행한다.
pub trait Transport: Send + Sync {
    /// 프레임 바이트 송신 요청
    fn send(&self, connection_id: ConnectionId, bytes: Bytes);

    /// 연결 종료 요청
    fn close(&self, connection_id: ConnectionId);
}

/// 송신/종료 요청을 큐에 쌓기만 하는 전송 어댑터
///
/// 테스트와 로컬 실험용. 레지스트리가 무엇을 내보냈는지 검사할 수 있다.
#[derive(Default)]
pub struct QueueTransport {
    sent: Mutex<Vec<(ConnectionId, Bytes)>>,
    closed: Mutex<Vec<ConnectionId>>,
}

impl QueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 송신 요청된 프레임들
    pub fn sent(&self) -> Vec<(ConnectionId, Bytes)> {
        self.sent.lock().clone()
    }

    /// 지금까지 종료 요청된 연결들
    pub fn closed(&self) -> Vec<ConnectionId> {
        self.closed.lock().clone()
    }
}

impl Transport for QueueTransport {
    fn send(&self, connection_id: ConnectionId, bytes: Bytes) {
        self.sent.lock().push((connection_id, bytes));
    }

    fn close(&self, connection_id: ConnectionId) {
        self.closed.lock().push(connection_id);
    }
}
