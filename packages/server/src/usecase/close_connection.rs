//! UseCase: 接続のクローズ処理
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - CloseConnectionUseCase::execute() メソッド
//!
//! ### なぜこのテストが必要か
//! - reader / writer / エンジンのどこから閉じても、退出通知は一度だけでなければならない
//!
//! ### どのような状況を想定しているか
//! - 正常系：識別済み接続のクローズ
//! - エッジケース：同じ接続を二度閉じる、エンジン停止後に閉じる

use crate::{
    domain::ConnectionId,
    hub::{CloseSignal, HubError, HubHandle},
};

/// 接続クローズのユースケース
pub struct CloseConnectionUseCase {
    hub: HubHandle,
}

impl CloseConnectionUseCase {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    /// クローズシーケンスを実行
    ///
    /// CloseSignal を発火させてからエンジンに登録解除を依頼する。何度呼んでもよい。
    pub async fn execute(&self, conn_id: ConnectionId, closer: &CloseSignal) {
        if closer.close() {
            tracing::debug!(conn_id = %conn_id, "Close signal fired");
        }
        match self.hub.unregister(conn_id).await {
            Ok(()) => {}
            Err(HubError::EngineStopped) => {
                tracing::debug!(conn_id = %conn_id, "Engine already stopped");
            }
        }
    }
}
