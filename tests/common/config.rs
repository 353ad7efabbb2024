//! Test configuration and session assembly

use super::collaborators::{MemoryRecord, RecordingChannel};
use mft_engine::{ChannelContext, Config, SessionInfo, TransferFile, TransferSession};
use std::sync::Arc;
use std::time::Duration;

/// Config with short network waits
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.network.net_op_timeout = Duration::from_millis(20);
    config.network.write_poll_interval = Duration::from_millis(2);
    config.tasks.retry_interval = Duration::from_millis(5);
    config
}

/// Session facts used by placeholder tests
pub fn test_info() -> SessionInfo {
    SessionInfo {
        local_host: "mft-local".to_string(),
        remote_host: "mft-partner".to_string(),
        rule: "nightly-export".to_string(),
        original_path: "/exports/in/ledger.csv".to_string(),
    }
}

/// Wire a session to the given collaborators and let the channel complete
/// the session's futures
pub fn build_session(
    record: Arc<MemoryRecord>,
    channel: Arc<RecordingChannel>,
    file: Arc<dyn TransferFile>,
    config: Config,
) -> Arc<TransferSession> {
    let ctx = Arc::new(ChannelContext::new(channel.clone()));
    channel.attach(&ctx);
    Arc::new(TransferSession::new(
        test_info(),
        record,
        file,
        ctx,
        Arc::new(config),
    ))
}
