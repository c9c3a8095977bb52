//! 上传临时文件的定期清理任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TeamRegistry;
use crate::config::TEMP_CLEAN_INTERVAL_SECS;
use crate::storage::Storage;

/// 启动后台清理任务；`temp_ttl` 为零时不启动。
pub fn spawn_background_tasks(storage: Arc<Storage>, teams: Arc<TeamRegistry>, temp_ttl: Duration) {
    if temp_ttl.is_zero() {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TEMP_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            for team in teams.names() {
                match storage.team(team).remove_stale_temp_files(temp_ttl).await {
                    Ok(0) => {}
                    Ok(removed) => debug!(team, removed, "stale temp cleanup"),
                    Err(err) => warn!(team, error = %err, "stale temp cleanup failed"),
                }
            }
        }
    });
}
