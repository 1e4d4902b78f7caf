use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

/// Background task that compacts the WAL once `threshold` appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when the append count has reached `threshold`. Returns whether it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not due");
        return Ok(false);
    }
    let records = engine.compact_wal().await?;
    info!(appends, records, "compacted WAL");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("timetable_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path).unwrap();

        for i in 0..3 {
            engine
                .resolve(NewTeacher {
                    name: format!("Teacher {i}"),
                })
                .await
                .unwrap();
        }

        assert!(!compact_if_needed(&engine, 4).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert!(compact_if_needed(&engine, 3).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.references().teachers.len(), 3);
    }
}
