//! Source watcher
//!
//! Polls the tracked branch and starts a run in every environment whenever
//! its head moves. This is the branch-push trigger of the pipeline.

use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::SourceFetchError;
use crate::service::fleet::Fleet;
use crate::service::source::SourceProvider;

pub struct SourceWatcher {
    source: Arc<dyn SourceProvider>,
    fleet: Arc<Fleet>,
    poll_interval: Duration,
    last_seen: Option<String>,
}

impl SourceWatcher {
    /// `last_seen` suppresses a run for a head that was already built
    pub fn new(
        source: Arc<dyn SourceProvider>,
        fleet: Arc<Fleet>,
        poll_interval: Duration,
        last_seen: Option<String>,
    ) -> Self {
        Self {
            source,
            fleet,
            poll_interval,
            last_seen,
        }
    }

    /// Starts the polling loop
    pub async fn run(mut self) {
        info!(
            "Watching source for new revisions (interval: {:?})",
            self.poll_interval
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(e) = self.poll_once().await {
                error!("Error during source poll: {}", e);
            }
        }
    }

    /// Performs a single poll; returns the revision that was triggered, if any
    pub async fn poll_once(&mut self) -> Result<Option<String>, SourceFetchError> {
        let head = self.source.latest_revision().await?;

        if self.last_seen.as_deref() == Some(head.as_str()) {
            debug!("Source head unchanged at {}", head);
            return Ok(None);
        }

        info!("New source revision {}", head);
        let started = self.fleet.enqueue_all(&head).await;
        info!("Started {} run(s) for revision {}", started.len(), head);

        self.last_seen = Some(head.clone());
        Ok(Some(head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RunRepository;
    use crate::service::testing::{StaticSource, test_pipeline};
    use cutover_core::domain::environment::BootstrapPhase;

    #[tokio::test(start_paused = true)]
    async fn test_triggers_only_on_head_change() {
        let built = test_pipeline("dev", BootstrapPhase::Initial, Arc::default());
        let runs = built.runs.clone();
        let mut fleet = Fleet::new();
        fleet.register(Arc::try_unwrap(built.pipeline).ok().unwrap()).unwrap();

        let source = Arc::new(StaticSource::new("rev1"));
        let mut watcher = SourceWatcher::new(
            source.clone(),
            Arc::new(fleet),
            Duration::from_secs(60),
            None,
        );

        assert_eq!(watcher.poll_once().await.unwrap().as_deref(), Some("rev1"));
        assert_eq!(watcher.poll_once().await.unwrap(), None);

        source.set_head("rev2");
        assert_eq!(watcher.poll_once().await.unwrap().as_deref(), Some("rev2"));

        let revisions: Vec<String> = runs
            .list_by_environment("dev")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.revision)
            .collect();
        assert_eq!(revisions.len(), 2);
        assert!(revisions.contains(&"rev1".to_string()));
        assert!(revisions.contains(&"rev2".to_string()));
    }

    #[tokio::test]
    async fn test_known_head_is_not_rebuilt() {
        let source = Arc::new(StaticSource::new("rev1"));
        let mut watcher = SourceWatcher::new(
            source,
            Arc::new(Fleet::new()),
            Duration::from_secs(60),
            Some("rev1".to_string()),
        );
        assert_eq!(watcher.poll_once().await.unwrap(), None);
    }
}
