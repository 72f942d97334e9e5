//! Controller runtime
//!
//! A [`Controller`] feeds a [`WorkQueue`] from an initial list, watch
//! streams and an optional periodic resync, and drains it with a pool of
//! workers calling a [`Reconciler`]. The queue guarantees at most one
//! in-flight pass per object key; different keys run in parallel.

use crate::error::{ReconcileError, ReconcileResult};
use crate::queue::WorkQueue;
use async_trait::async_trait;
use futures::StreamExt;
use keel_client::{LabelSelector, ResourceClient, WatchEvent, WatchStream};
use keel_types::{DynamicObject, ObjectKey, Resource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// What to do with a key after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged; wait for the next change
    Done,
    /// Look again after the given delay
    RequeueAfter(Duration),
}

/// Converges one object kind
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Kind whose keys are reconciled
    type Object: Resource;

    /// Run one pass for `key`. Must be safe to call again at any time.
    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Action>;
}

type KeyMapper = Arc<dyn Fn(&DynamicObject) -> Option<ObjectKey> + Send + Sync>;

/// A watched kind and how its events map onto reconciled keys
struct Trigger {
    kind: &'static str,
    map: KeyMapper,
    /// Drop modifications that leave `metadata.generation` unchanged
    generation_only: bool,
}

/// Resolves once the shutdown flag is raised. A dropped sender never
/// triggers shutdown.
async fn shutdown_raised(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Queue-driven controller for one [`Reconciler`]
pub struct Controller<R: Reconciler> {
    name: &'static str,
    reconciler: Arc<R>,
    client: Arc<dyn ResourceClient>,
    workers: usize,
    resync: Option<Duration>,
    backoff_base: Duration,
    backoff_max: Duration,
    triggers: Vec<Trigger>,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(name: &'static str, reconciler: R, client: Arc<dyn ResourceClient>) -> Self {
        let primary = Trigger {
            kind: R::Object::KIND,
            map: Arc::new(|object: &DynamicObject| Some(object.key())),
            generation_only: false,
        };
        Self {
            name,
            reconciler: Arc::new(reconciler),
            client,
            workers: 1,
            resync: None,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            triggers: vec![primary],
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Re-enqueue every object of the kind at this interval
    pub fn resync_every(mut self, interval: Option<Duration>) -> Self {
        self.resync = interval;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Ignore events on the reconciled kind that only touch its status, so
    /// the reconciler's own status writes do not trigger another pass
    pub fn ignore_status_updates(mut self) -> Self {
        if let Some(primary) = self.triggers.first_mut() {
            primary.generation_only = true;
        }
        self
    }

    /// Reconcile the controlling owner when a child of kind `C` changes
    pub fn owns<C: Resource>(mut self) -> Self {
        self.triggers.push(Trigger {
            kind: C::KIND,
            generation_only: false,
            map: Arc::new(|object: &DynamicObject| {
                object
                    .metadata
                    .controller_owner()
                    .filter(|owner| owner.kind == R::Object::KIND)
                    .map(|owner| ObjectKey::new(object.metadata.namespace.clone(), owner.name.clone()))
            }),
        });
        self
    }

    /// Reconcile the object named by `label` when a `C` changes
    pub fn watches_label<C: Resource>(mut self, label: &'static str) -> Self {
        self.triggers.push(Trigger {
            kind: C::KIND,
            generation_only: false,
            map: Arc::new(move |object: &DynamicObject| {
                object
                    .metadata
                    .labels
                    .get(label)
                    .map(|name| ObjectKey::new(object.metadata.namespace.clone(), name.clone()))
            }),
        });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run until the shutdown flag is raised
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> ReconcileResult<()> {
        let queue = WorkQueue::new(self.backoff_base, self.backoff_max);
        let shared = Arc::new(Shared {
            name: self.name,
            reconciler: self.reconciler,
            queue: queue.clone(),
        });

        // Subscribe before listing so nothing between the two is missed
        let mut streams = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            let stream = self.client.watch(trigger.kind, None).await?;
            streams.push((trigger.kind, trigger.map.clone(), trigger.generation_only, stream));
        }

        let listed = enqueue_all(&*self.client, R::Object::KIND, &queue).await?;
        let listed_generations = generations_of(&listed);
        tracing::info!(
            controller = self.name,
            workers = self.workers,
            watches = streams.len(),
            "Controller started"
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for (kind, map, generation_only, stream) in streams {
            // Only the reconciled kind is filtered, and that is the kind listed above
            let generations = generation_only.then(|| listed_generations.clone());
            tasks.push(tokio::spawn(feed(
                self.name,
                kind,
                map,
                generations,
                stream,
                queue.clone(),
                shutdown.clone(),
            )));
        }

        if let Some(interval) = self.resync {
            tasks.push(tokio::spawn(resync::<R>(
                self.name,
                self.client.clone(),
                interval,
                queue.clone(),
                shutdown.clone(),
            )));
        }

        for _ in 0..self.workers {
            let shared = shared.clone();
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move { shared.work(shutdown).await }));
        }

        let mut shutdown = shutdown;
        shutdown_raised(&mut shutdown).await;
        queue.shutdown().await;

        let mut failure = None;
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(controller = self.name, error = %e, "Controller task failed");
                failure = Some(ReconcileError::Task(e.to_string()));
            }
        }

        tracing::info!(controller = self.name, "Controller stopped");
        failure.map_or(Ok(()), Err)
    }
}

/// Enqueue every object of `kind` and return what was listed
async fn enqueue_all(
    client: &dyn ResourceClient,
    kind: &str,
    queue: &Arc<WorkQueue>,
) -> ReconcileResult<Vec<DynamicObject>> {
    let objects = client.list(kind, None, &LabelSelector::everything()).await?;
    for object in &objects {
        queue.add(object.key()).await;
    }
    Ok(objects)
}

fn generations_of(objects: &[DynamicObject]) -> HashMap<ObjectKey, u64> {
    objects
        .iter()
        .map(|object| (object.key(), object.metadata.generation))
        .collect()
}

/// Whether an event should be delivered under generation filtering.
/// Unseen keys always pass.
fn generation_changed(generations: &mut HashMap<ObjectKey, u64>, event: &WatchEvent) -> bool {
    match event {
        WatchEvent::Deleted(object) => {
            generations.remove(&object.key());
            true
        }
        WatchEvent::Added(object) | WatchEvent::Modified(object) => {
            let generation = object.metadata.generation;
            generations.insert(object.key(), generation) != Some(generation)
        }
    }
}

async fn feed(
    controller: &'static str,
    kind: &'static str,
    map: KeyMapper,
    mut generations: Option<HashMap<ObjectKey, u64>>,
    mut stream: WatchStream,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(event) => {
                    if let Some(generations) = generations.as_mut() {
                        if !generation_changed(generations, &event) {
                            continue;
                        }
                    }
                    if let Some(key) = map(event.object()) {
                        queue.add(key).await;
                    }
                }
                None => {
                    tracing::warn!(controller, kind, "Watch stream closed");
                    return;
                }
            },
            _ = shutdown_raised(&mut shutdown) => return,
        }
    }
}

async fn resync<R: Reconciler>(
    controller: &'static str,
    client: Arc<dyn ResourceClient>,
    interval: Duration,
    queue: Arc<WorkQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; the initial list already covered it
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match enqueue_all(&*client, R::Object::KIND, &queue).await {
                    Ok(objects) => {
                        tracing::debug!(controller, count = objects.len(), "Resync enqueued objects")
                    }
                    Err(e) => tracing::warn!(controller, error = %e, "Resync list failed"),
                }
            }
            _ = shutdown_raised(&mut shutdown) => return,
        }
    }
}

struct Shared<R: Reconciler> {
    name: &'static str,
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
}

impl<R: Reconciler> Shared<R> {
    async fn work(&self, shutdown: watch::Receiver<bool>) {
        while let Some(key) = self.queue.get().await {
            self.process(&key, shutdown.clone()).await;
            self.queue.done(&key).await;
        }
    }

    async fn process(&self, key: &ObjectKey, mut shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!(
            "reconcile",
            controller = self.name,
            kind = R::Object::KIND,
            key = %key
        );

        let result = tokio::select! {
            result = self.reconciler.reconcile(key).instrument(span.clone()) => result,
            _ = shutdown_raised(&mut shutdown) => {
                tracing::debug!(parent: &span, "Abandoned pass on shutdown");
                return;
            }
        };

        match result {
            Ok(Action::Done) => self.queue.forget(key),
            Ok(Action::RequeueAfter(delay)) => {
                self.queue.forget(key);
                self.queue.add_after(key.clone(), delay);
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(parent: &span, error = %e, "Write conflict; retrying from a fresh read");
                self.queue.add(key.clone()).await;
            }
            Err(e) => {
                let delay = self.queue.add_rate_limited(key.clone());
                tracing::warn!(
                    parent: &span,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconcile failed"
                );
            }
        }
    }
}
