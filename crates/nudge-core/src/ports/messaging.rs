//! MessagingGateway port - 外部メッセージ配送
//!
//! 配送は信頼できないリモート呼び出しとして扱います。
//! core は失敗をリトライしません（job store の retry policy に任せる）。

use async_trait::async_trait;

use crate::domain::DeliveryError;

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> Result<(), DeliveryError>;
}
