//! Registry of live distributors
//!
//! Maps a camera key to its running [`Distributor`]. Creation is coalesced
//! through [`SingleFlight`], so concurrent viewers of one camera share a single
//! upstream stream. Distributors remove themselves when they drain, but only
//! if the entry still points at them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::distributor::{Distributor, DistributorConfig, DistributorStats, OnStop, Subscription};
use super::singleflight::SingleFlight;
use crate::camera::Camera;
use crate::error::{AppError, Result};

/// Attempts made when a subscribe races a draining distributor
const SUBSCRIBE_ATTEMPTS: usize = 3;

type StreamMap = Mutex<HashMap<String, Arc<Distributor>>>;

pub struct StreamRegistry {
    streams: Arc<StreamMap>,
    flight: SingleFlight<String, Result<Arc<Distributor>>>,
    config: DistributorConfig,
}

impl StreamRegistry {
    pub fn new(config: DistributorConfig) -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            flight: SingleFlight::new(),
            config,
        }
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// The running distributor for `key`, if any
    pub fn get(&self, key: &str) -> Option<Arc<Distributor>> {
        self.streams.lock().get(key).filter(|d| d.is_running()).cloned()
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }

    /// Stats of every registered distributor, ordered by camera key
    pub fn stats(&self) -> Vec<DistributorStats> {
        let streams: Vec<_> = self.streams.lock().values().cloned().collect();
        let mut stats: Vec<_> = streams.iter().map(|d| d.stats()).collect();
        stats.sort_by(|a, b| a.camera.cmp(&b.camera));
        stats
    }

    /// Return the running distributor for `key`, creating it with `factory`
    /// if there is none
    ///
    /// Concurrent callers for the same key share one `factory` run and see the
    /// same distributor or the same error.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<Arc<Distributor>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Distributor>>>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }

        let key = key.to_string();
        self.flight
            .run(&key, || async {
                if let Some(existing) = self.get(&key) {
                    return Ok(existing);
                }

                let distributor = factory().await?;
                self.register(&key, &distributor);
                Ok(distributor)
            })
            .await
    }

    /// Start (or join) the stream of `camera`
    pub async fn open(&self, camera: Arc<dyn Camera>) -> Result<Arc<Distributor>> {
        let key = camera.remote_addr().to_string();
        let config = self.config.clone();
        let on_stop = self.deregister_hook();

        self.get_or_create(&key, || async move {
            Distributor::start(camera, config, Some(on_stop))
                .await
                .map_err(AppError::Camera)
        })
        .await
    }

    /// Subscribe to `camera`'s stream, starting it if needed
    pub async fn subscribe(&self, camera: Arc<dyn Camera>) -> Result<Subscription> {
        let key = camera.remote_addr().to_string();

        for attempt in 1..=SUBSCRIBE_ATTEMPTS {
            let distributor = self.open(camera.clone()).await?;
            if let Some(subscription) = distributor.subscribe() {
                return Ok(subscription);
            }
            debug!(camera = %key, attempt, "Stream stopped before subscribe, retrying");
        }

        Err(AppError::StreamStopped(key))
    }

    /// Insert `distributor` unless it already left the running state
    ///
    /// Checked under the map lock, which the stop hook also takes, so a
    /// distributor that drains concurrently is never left behind.
    fn register(&self, key: &str, distributor: &Arc<Distributor>) {
        let mut streams = self.streams.lock();
        if distributor.is_running() {
            streams.insert(key.to_string(), distributor.clone());
            info!(camera = %key, streams = streams.len(), "Stream registered");
        }
    }

    /// Stop hook removing a distributor from this registry
    pub fn deregister_hook(&self) -> OnStop {
        let streams: Weak<StreamMap> = Arc::downgrade(&self.streams);
        Box::new(move |distributor| {
            let Some(streams) = streams.upgrade() else {
                return;
            };
            let mut streams = streams.lock();
            let key = distributor.key();
            if streams.get(key).is_some_and(|d| Arc::ptr_eq(d, distributor)) {
                streams.remove(key);
                info!(camera = %key, streams = streams.len(), "Stream deregistered");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::camera::testing::FakeCamera;
    use crate::error::CameraError;

    fn test_registry() -> Arc<StreamRegistry> {
        Arc::new(StreamRegistry::new(DistributorConfig {
            idle_interval: Duration::from_millis(50),
            ..Default::default()
        }))
    }

    async fn wait_stopped(distributor: &Distributor) {
        tokio::time::timeout(Duration::from_secs(2), distributor.stopped())
            .await
            .expect("distributor did not stop");
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_shares_one_factory_call() {
        let registry = test_registry();
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..10).map(|_| {
            let registry = registry.clone();
            let camera = camera.clone();
            let calls = calls.clone();
            async move {
                let config = registry.config().clone();
                let on_stop = registry.deregister_hook();
                registry
                    .get_or_create("cam", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Distributor::start(camera, config, Some(on_stop))
                            .await
                            .map_err(AppError::Camera)
                    })
                    .await
            }
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(camera.stream_calls(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_error() {
        let registry = test_registry();
        let camera = Arc::new(FakeCamera::new("cam").failing("refused"));
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..5).map(|_| {
            let registry = registry.clone();
            let camera = camera.clone();
            let calls = calls.clone();
            async move {
                let config = registry.config().clone();
                let on_stop = registry.deregister_hook();
                registry
                    .get_or_create("cam", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Keep the start in flight until every caller has joined
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Distributor::start(camera, config, Some(on_stop))
                            .await
                            .map_err(AppError::Camera)
                    })
                    .await
            }
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(camera.stream_calls(), 1);
        for result in results {
            assert_eq!(
                result.unwrap_err(),
                AppError::Camera(CameraError::StreamStart("refused".into()))
            );
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_idle_stream_is_removed() {
        let registry = test_registry();
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());

        let distributor = registry.open(camera).await.unwrap();
        assert!(registry.get("cam").is_some());

        wait_stopped(&distributor).await;
        assert!(registry.get("cam").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stale_stop_keeps_replacement() {
        let registry = test_registry();
        let old_camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let old = registry.open(old_camera.clone()).await.unwrap();
        let _old_sub = old.subscribe().unwrap();

        let new_camera = Arc::new(FakeCamera::new("cam").jpeg_native());
        let replacement = Distributor::start(new_camera, registry.config().clone(), None)
            .await
            .unwrap();
        let _new_sub = replacement.subscribe().unwrap();
        registry.streams.lock().insert("cam".into(), replacement.clone());

        old_camera.close();
        wait_stopped(&old).await;

        let current = registry.get("cam").unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
    }

    #[tokio::test]
    async fn test_stopped_distributor_is_not_reused() {
        let registry = test_registry();
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());

        let first = registry.open(camera.clone()).await.unwrap();
        wait_stopped(&first).await;

        let second = registry.open(camera.clone()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_running());
        assert_eq!(camera.stream_calls(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_share_one_stream() {
        let registry = test_registry();
        let camera = Arc::new(FakeCamera::new("cam").jpeg_native());

        let (a, b) = tokio::join!(registry.subscribe(camera.clone()), registry.subscribe(camera.clone()));
        let (mut a, mut b) = (a.unwrap(), b.unwrap());
        assert_eq!(camera.stream_calls(), 1);
        assert!(Arc::ptr_eq(a.distributor(), b.distributor()));

        assert!(camera.push_jpeg(Bytes::from_static(b"jpeg")).await);
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"jpeg"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"jpeg"));

        let stats = registry.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].camera, "cam");
        assert_eq!(stats[0].subscribers, 2);
    }

    #[tokio::test]
    async fn test_different_cameras_get_separate_streams() {
        let registry = test_registry();
        let a = registry.open(Arc::new(FakeCamera::new("a").jpeg_native())).await.unwrap();
        let b = registry.open(Arc::new(FakeCamera::new("b").jpeg_native())).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        let keys: Vec<_> = registry.stats().into_iter().map(|s| s.camera).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
