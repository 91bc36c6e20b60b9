//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore / InMemoryDecisionStore**: テスト・開発用
//! - **FileTaskStore / FileDecisionStore**: role ごとの JSON ファイル（atomic write）
//! - **HttpTransport**: 実行サービスへの HTTP クライアント
//! - **MockTransport**: 可用性と遅延を制御できるテスト用トランスポート

pub mod atomic;
pub mod file_store;
pub mod http_transport;
pub mod inmem_store;
pub mod mock_transport;

// 主要な型を再エクスポート
pub use self::file_store::{FileDecisionStore, FileTaskStore};
pub use self::http_transport::HttpTransport;
pub use self::inmem_store::{InMemoryDecisionStore, InMemoryTaskStore};
pub use self::mock_transport::MockTransport;
