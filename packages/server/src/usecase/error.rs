//! UseCase layer errors.

use thiserror::Error;

use crate::hub::HubError;

/// フレーム処理のエラー
///
/// デコード失敗や Presence Store の障害はここに現れない（ローカルで回復する）。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFrameError {
    #[error("hub unavailable: {0}")]
    Hub(#[from] HubError),
}
