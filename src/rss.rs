//! RSS feed ingestion.
//!
//! Polls the configured feeds and submits one task per previously unseen
//! entry into the worker pool. Feeds are fetched concurrently in small
//! batches with a pause between batches so a long feed list cannot spike
//! load; a feed that fails to download or parse is logged and skipped,
//! never fatal to the poll.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::config::{Config, FeedSource};
use crate::scheduler::TaskRunner;
use crate::storage::{TaskRecord, TaskStore};

/// Polls RSS feeds and feeds new articles into the task runner.
pub struct FeedManager {
    store: Arc<dyn TaskStore>,
    runner: Arc<TaskRunner>,
    config: Arc<Config>,
    client: Client,
}

impl FeedManager {
    /// Creates a feed manager over the configured feed list.
    pub fn new(store: Arc<dyn TaskStore>, runner: Arc<TaskRunner>, config: Arc<Config>) -> Self {
        Self {
            store,
            runner,
            config,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(concat!("podforge/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Polls every configured feed once.
    ///
    /// Feeds are processed in batches of `feed_batch_size` with
    /// `feed_batch_pause` between batches. Returns the number of newly
    /// submitted tasks.
    pub async fn poll_all(&self) -> usize {
        let feeds = &self.config.feeds;
        if feeds.is_empty() {
            info!("No feeds configured");
            return 0;
        }

        let mut submitted = 0;
        for (i, batch) in feeds.chunks(self.config.feed_batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.feed_batch_pause).await;
            }

            let results =
                futures::future::join_all(batch.iter().map(|feed| self.poll_feed(feed))).await;
            submitted += results.into_iter().sum::<usize>();
        }

        info!(feeds = feeds.len(), submitted, "Finished feed poll");
        submitted
    }

    /// Polls one feed; returns the number of tasks submitted from it.
    async fn poll_feed(&self, feed: &FeedSource) -> usize {
        let name = feed.name.as_deref().unwrap_or(&feed.url);

        let bytes = match self.download(&feed.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(feed = %name, error = %e, "Failed to download feed");
                return 0;
            }
        };

        let channel = match rss::Channel::read_from(&bytes[..]) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(feed = %name, error = %e, "Failed to parse feed");
                return 0;
            }
        };

        let mut submitted = 0;
        for item in channel.items() {
            let Some(link) = item.link() else { continue };

            match self.submit_entry(link).await {
                Ok(true) => submitted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(feed = %name, link = %link, error = %e, "Failed to submit entry")
                }
            }
        }

        if submitted > 0 {
            info!(feed = %name, submitted, "Submitted new feed entries");
        }
        submitted
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Creates and submits a task for a link not seen before.
    async fn submit_entry(&self, link: &str) -> Result<bool, crate::storage::RecordError> {
        if self.store.find_by_url(link).await?.is_some() {
            return Ok(false);
        }

        let record = TaskRecord::new(link);
        self.store.insert(&record).await?;
        self.runner.submit(&record.task_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryTaskStore;

    #[tokio::test]
    async fn test_submit_entry_dedups_by_url() {
        let store = Arc::new(InMemoryTaskStore::new());
        let config = Arc::new(Config::default());
        let runner = Arc::new(TaskRunner::new(
            store.clone(),
            crate::pipeline::steps::tests_support::null_services(),
            config.clone(),
        ));
        let manager = FeedManager::new(store.clone(), runner, config);

        let first = manager
            .submit_entry("https://example.com/post-1")
            .await
            .expect("submit");
        assert!(first);

        let second = manager
            .submit_entry("https://example.com/post-1")
            .await
            .expect("submit again");
        assert!(!second);

        let record = store
            .find_by_url("https://example.com/post-1")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(record.url, "https://example.com/post-1");
    }

    #[tokio::test]
    async fn test_poll_all_with_no_feeds() {
        let store = Arc::new(InMemoryTaskStore::new());
        let config = Arc::new(Config::default());
        let runner = Arc::new(TaskRunner::new(
            store.clone(),
            crate::pipeline::steps::tests_support::null_services(),
            config.clone(),
        ));
        let manager = FeedManager::new(store, runner, config);

        assert_eq!(manager.poll_all().await, 0);
    }
}
