//! UseCase: 受信フレームの処理
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - DispatchFrameUseCase::execute() / record_activity() メソッド
//! - 受信フレームの種類ごとの振り分け（識別・退出・チャット・ステータス要求・パススルー）
//!
//! ### なぜこのテストが必要か
//! - sender は必ず束縛済みの ID で上書きされ、なりすましできないことを保証
//! - チャットは送信者以外、パススルーは全員に届くことを確認
//! - ステータス要求の応答は要求した接続だけに届くことを確認
//!
//! ### どのような状況を想定しているか
//! - 正常系：識別済み接続からのチャット、明示的な退出、ステータス要求
//! - 異常系：JSON でないフレーム、未知の type
//! - エッジケース：未識別接続からの sender 付きチャット、heartbeat

use std::sync::Arc;

use crate::{
    domain::{ConnectionId, InboundMessage, OutboundMessage, UserId},
    hub::{HubHandle, RosterBuilder, RosterError},
    infrastructure::dto::websocket::decode_inbound,
};

use super::error::DispatchFrameError;

/// 接続ごとの状態（reader タスクが所有する）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    /// user_join で束縛された ID
    pub user_id: Option<UserId>,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId) -> Self {
        Self { id, user_id: None }
    }
}

/// フレーム処理のユースケース
pub struct DispatchFrameUseCase {
    hub: HubHandle,
    roster: Arc<RosterBuilder>,
}

impl DispatchFrameUseCase {
    pub fn new(hub: HubHandle, roster: Arc<RosterBuilder>) -> Self {
        Self { hub, roster }
    }

    /// 受信アクティビティを記録
    ///
    /// Presence の更新はエンジンが行う（登録中かつ識別済みの接続に限る）。
    pub async fn record_activity(&self, ctx: &ConnectionContext) -> Result<(), DispatchFrameError> {
        self.hub.touch(ctx.id).await?;
        Ok(())
    }

    /// テキストフレームを 1 つ処理
    pub async fn execute(
        &self,
        ctx: &mut ConnectionContext,
        text: &str,
    ) -> Result<(), DispatchFrameError> {
        let message = decode_inbound(text);
        tracing::debug!(conn_id = %ctx.id, "Dispatching {:?}", message);

        match message {
            InboundMessage::UserJoin { user_id } => {
                self.hub.identify(ctx.id, user_id.clone()).await?;
                ctx.user_id = Some(user_id);
            }
            InboundMessage::UserLeave => match ctx.user_id.take() {
                Some(_) => self.hub.release(ctx.id).await?,
                None => tracing::debug!(conn_id = %ctx.id, "user_leave from anonymous connection"),
            },
            InboundMessage::Chat { payload } => {
                let message = OutboundMessage::ChatText {
                    sender: ctx.user_id.clone(),
                    payload,
                };
                self.hub.relay(ctx.id, message, false).await?;
            }
            InboundMessage::ProfileUpdate { payload } => {
                let message = OutboundMessage::ProfileUpdate {
                    sender: ctx.user_id.clone(),
                    payload,
                };
                self.hub.relay(ctx.id, message, false).await?;
            }
            InboundMessage::StatusRequest => match self.roster.build().await {
                Ok(roster) => {
                    self.hub
                        .send_to(ctx.id, OutboundMessage::RosterSnapshot(roster))
                        .await?
                }
                Err(RosterError::Hub(e)) => return Err(e.into()),
                Err(e) => tracing::warn!(conn_id = %ctx.id, "Cannot answer status request: {}", e),
            },
            InboundMessage::Heartbeat => {}
            InboundMessage::PassThrough { raw } => {
                self.hub
                    .relay(ctx.id, OutboundMessage::PassThrough(raw), true)
                    .await?;
            }
        }
        Ok(())
    }
}
