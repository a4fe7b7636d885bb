//! App - アプリケーション層
//!
//! scheduler と task catalog を組み合わせて backup を実行する。
//!
//! # 主要コンポーネント
//! - **BackupApp**: 1 回分の run (作業ディレクトリ管理 + stage 構成)
//! - **Daemon**: interval ごとに run を起動し、shutdown 時に実行中の run を待つ
//! - **RunState**: run の重複起動を防ぐフラグ

pub mod backup;
pub mod service;

pub use self::backup::{BackupApp, BackupJob, RunReport};
pub use self::service::{ActiveRun, Daemon, RunState};
