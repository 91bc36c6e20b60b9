//! HttpTransport - reqwest による実行サービスクライアント
//!
//! - `GET  {base}/health` : 2xx なら live
//! - `POST {base}/tasks`  : タスク JSON を送り `{accepted, position?}` を受け取る
//!
//! リクエスト全体のタイムアウトはゲートウェイ側の `tokio::time::timeout` が担う。
//! ここでは接続タイムアウトだけを設定する。

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::Task;
use crate::ports::{DispatchAck, ExecutionTransport, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ExecutionTransport for HttpTransport {
    async fn dispatch(&self, task: &Task) -> Result<DispatchAck, TransportError> {
        let resp = self
            .client
            .post(self.url("tasks"))
            .json(task)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let resp = error_for_status(resp).await?;

        let ack: DispatchAck = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        if !ack.accepted {
            return Err(TransportError::Rejected(task.id.to_string()));
        }
        debug!(task_id = %task.id, position = ?ack.position, "task accepted by execution service");
        Ok(ack)
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let resp = self
            .client
            .get(self.url("health"))
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        error_for_status(resp).await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
