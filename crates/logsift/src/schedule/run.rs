use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{PluginOutcome, PluginState, ResolvedPlan, Schedule};
use crate::plugin::{self, HarnessLimits, Plugin, PluginError, PluginReport};
use crate::status::RunStatus;
use crate::store::IntermediateStore;
use crate::writer::{BulkWriter, EventSink, RetryPolicy};

#[derive(Clone)]
pub struct SchedulerOptions {
    pub plugin_concurrency: usize,
    pub limits: HarnessLimits,
    /// How long running plugins may keep going after cancellation.
    pub cancel_grace: Duration,
    pub sinks: Vec<Arc<dyn EventSink>>,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

pub struct Scheduler {
    options: SchedulerOptions,
    store: Arc<IntermediateStore>,
    status: Arc<RunStatus>,
}

type TaskResult = (usize, Result<PluginReport, PluginError>, Duration);

/// Mutable bookkeeping for one `run` call.
struct Tracker<'a> {
    schedule: &'a Schedule,
    status: &'a RunStatus,
    states: Vec<PluginState>,
    reports: Vec<Option<PluginReport>>,
    elapsed: Vec<Duration>,
    waiting_on: Vec<usize>,
    ready: VecDeque<usize>,
}

impl<'a> Tracker<'a> {
    fn new(schedule: &'a Schedule, status: &'a RunStatus) -> Self {
        let n = schedule.len();
        status.record_plugins(n);
        let mut tracker = Self {
            schedule,
            status,
            states: vec![PluginState::Pending; n],
            reports: vec![None; n],
            elapsed: vec![Duration::ZERO; n],
            waiting_on: schedule.nodes().iter().map(|n| n.dependencies.len()).collect(),
            ready: VecDeque::new(),
        };
        for &id in schedule.order() {
            if tracker.waiting_on[id] == 0 {
                tracker.make_ready(id);
            }
        }
        tracker
    }

    fn set(&mut self, id: usize, state: PluginState) {
        let schedule = self.schedule;
        debug!(plugin = %schedule.node(id).name, from = self.states[id].as_str(), to = state.as_str(), "Plugin state");
        self.status.plugin_transition(&self.states[id], &state);
        self.states[id] = state;
    }

    fn make_ready(&mut self, id: usize) {
        self.set(id, PluginState::Ready);
        self.ready.push_back(id);
    }

    fn completed(&mut self, id: usize, report: PluginReport) {
        info!(
            plugin = %self.schedule.node(id).name,
            documents = report.documents_read,
            bad_documents = report.bad_documents,
            events = report.events_written,
            "Plugin completed"
        );
        self.reports[id] = Some(report);
        self.set(id, PluginState::Completed);

        let schedule = self.schedule;
        for &dependent in &schedule.node(id).dependents {
            self.waiting_on[dependent] -= 1;
            if self.waiting_on[dependent] == 0 && self.states[dependent] == PluginState::Pending {
                self.make_ready(dependent);
            }
        }
    }

    fn failed(&mut self, id: usize, reason: String) {
        let name = self.schedule.node(id).name.clone();
        error!(plugin = %name, error = %reason, "Plugin failed");
        self.set(id, PluginState::Failed { reason });

        for dependent in self.schedule.transitive_dependents(id) {
            if self.states[dependent] == PluginState::Pending {
                warn!(
                    plugin = %self.schedule.node(dependent).name,
                    dependency = %name,
                    "Skipping plugin, dependency failed"
                );
                self.set(
                    dependent,
                    PluginState::DependencyFailed {
                        dependency: name.clone(),
                    },
                );
            }
        }
    }

    fn finished(&mut self, id: usize, result: Result<PluginReport, PluginError>, elapsed: Duration) {
        self.elapsed[id] = elapsed;
        match result {
            Ok(report) => self.completed(id, report),
            Err(PluginError::Interrupted) => {
                warn!(plugin = %self.schedule.node(id).name, "Plugin interrupted");
                self.set(id, PluginState::Cancelled);
            }
            Err(e) => self.failed(id, e.to_string()),
        }
    }

    /// Everything not yet running will never run.
    fn cancel_waiting(&mut self) {
        self.ready.clear();
        for id in 0..self.states.len() {
            if matches!(self.states[id], PluginState::Pending | PluginState::Ready) {
                self.set(id, PluginState::Cancelled);
            }
        }
    }

    fn into_outcomes(self) -> Vec<PluginOutcome> {
        let schedule = self.schedule;
        self.states
            .into_iter()
            .zip(self.reports)
            .zip(self.elapsed)
            .enumerate()
            .map(|(id, ((state, report), elapsed))| {
                let node = schedule.node(id);
                PluginOutcome {
                    name: node.name.clone(),
                    output: node.output.clone(),
                    workbook: node.workbook.clone(),
                    state,
                    report,
                    elapsed_ms: elapsed.as_millis() as u64,
                }
            })
            .collect()
    }
}

impl Scheduler {
    pub fn new(options: SchedulerOptions, store: Arc<IntermediateStore>, status: Arc<RunStatus>) -> Self {
        Self {
            options,
            store,
            status,
        }
    }

    /// Run every plugin at most once, dependencies first. Returns one outcome
    /// per plugin in registration order.
    pub async fn run(&self, plan: ResolvedPlan, cancel: &CancellationToken) -> Vec<PluginOutcome> {
        let (schedule, plugins) = plan.into_parts();
        let schedule = Arc::new(schedule);
        let mut instances: Vec<Option<Box<dyn Plugin>>> = plugins.into_iter().map(Some).collect();

        let mut tracker = Tracker::new(&schedule, &self.status);
        let semaphore = Arc::new(Semaphore::new(self.options.plugin_concurrency.max(1)));
        let interrupt = CancellationToken::new();
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut task_nodes: HashMap<Id, usize> = HashMap::new();

        info!(
            plugins = schedule.len(),
            concurrency = self.options.plugin_concurrency,
            "Running plugins"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            while let Some(&id) = tracker.ready.front() {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                tracker.ready.pop_front();
                let Some(plugin) = instances[id].take() else {
                    continue;
                };
                tracker.set(id, PluginState::Running);

                let store = Arc::clone(&self.store);
                let status = Arc::clone(&self.status);
                let schedule = Arc::clone(&schedule);
                let interrupt = interrupt.clone();
                let limits = self.options.limits;
                let mut writer = BulkWriter::new(
                    schedule.node(id).output.clone(),
                    self.options.sinks.clone(),
                    self.options.batch_size,
                    self.options.retry,
                );

                let handle = tasks.spawn(async move {
                    let _permit = permit;
                    let started = Instant::now();
                    let mut plugin = plugin;
                    let joined = tokio::task::spawn_blocking(move || {
                        let node = schedule.node(id);
                        plugin::execute(
                            plugin.as_mut(),
                            node,
                            &store,
                            &mut writer,
                            limits,
                            &status,
                            &interrupt,
                        )
                    })
                    .await;
                    let result = joined.unwrap_or_else(|e| Err(PluginError::Panicked(panic_message(e))));
                    (id, result, started.elapsed())
                });
                task_nodes.insert(handle.id(), id);
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                joined = tasks.join_next_with_id() => {
                    if let Some(joined) = joined {
                        settle(&mut tracker, &mut task_nodes, joined);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            info!(running = tasks.len(), "Run cancelled, no further plugins start");
            tracker.cancel_waiting();
            self.drain(&mut tracker, &mut tasks, &mut task_nodes, &interrupt).await;
        }

        tracker.into_outcomes()
    }

    /// Let running plugins finish within the grace period, then interrupt them.
    async fn drain(
        &self,
        tracker: &mut Tracker<'_>,
        tasks: &mut JoinSet<TaskResult>,
        task_nodes: &mut HashMap<Id, usize>,
        interrupt: &CancellationToken,
    ) {
        let deadline = Instant::now() + self.options.cancel_grace;
        while !tasks.is_empty() {
            match time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(joined)) => settle(tracker, task_nodes, joined),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        running = tasks.len(),
                        grace_ms = self.options.cancel_grace.as_millis() as u64,
                        "Grace period elapsed, interrupting running plugins"
                    );
                    interrupt.cancel();
                    while let Some(joined) = tasks.join_next_with_id().await {
                        settle(tracker, task_nodes, joined);
                    }
                }
            }
        }
    }
}

fn settle(
    tracker: &mut Tracker<'_>,
    task_nodes: &mut HashMap<Id, usize>,
    joined: Result<(Id, TaskResult), JoinError>,
) {
    match joined {
        Ok((task, (id, result, elapsed))) => {
            task_nodes.remove(&task);
            tracker.finished(id, result, elapsed);
        }
        Err(e) => {
            if let Some(id) = task_nodes.remove(&e.id()) {
                let result = if e.is_cancelled() {
                    Err(PluginError::Interrupted)
                } else {
                    Err(PluginError::Panicked(panic_message(e)))
                };
                tracker.finished(id, result, Duration::ZERO);
            }
        }
    }
}

fn panic_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BaseEvent, Event, TransformError};
    use crate::plugin::PluginDescriptor;
    use crate::schedule::resolve;
    use crate::store::{Document, Filter, Projection};
    use crate::writer::StoreSink;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Copies every input document to its output; optionally fails or blocks.
    struct Relay {
        name: &'static str,
        input: &'static str,
        deps: Vec<&'static str>,
        fail: bool,
        hold: Option<Arc<std::sync::Barrier>>,
        log: Arc<Mutex<Vec<String>>>,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Relay {
        fn new(name: &'static str, input: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                input,
                deps: Vec::new(),
                fail: false,
                hold: None,
                log: Arc::clone(log),
                live: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn after(mut self, dep: &'static str) -> Self {
            self.deps.push(dep);
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Plugin for Relay {
        fn descriptor(&self) -> PluginDescriptor {
            self.deps.iter().fold(
                PluginDescriptor::new(self.name, &format!("{}_out", self.name))
                    .reads(self.input)
                    .filter(Filter::All)
                    .projection(Projection::exclude(["noise"])),
                |d, dep| d.depends_on(dep),
            )
        }

        fn transform(&mut self, _: &str, doc: &Document) -> Result<Vec<Event>, TransformError> {
            Ok(vec![Event::new(self.name, BaseEvent::from_document(doc)?)])
        }

        fn finish(&mut self) -> Vec<Event> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(barrier) = &self.hold {
                barrier.wait();
            }
            std::thread::sleep(Duration::from_millis(20));
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().push(self.name.to_string());
            if self.fail {
                panic!("{} exploded", self.name);
            }
            Vec::new()
        }
    }

    fn seeded_store() -> Arc<IntermediateStore> {
        let store = Arc::new(IntermediateStore::new());
        let doc = match json!({
            "file_name": "a.log", "file_path": "worker1/a.log", "line_number": 1,
            "worker": "worker1", "timestamp": "2024-03-01T10:00:00.000Z", "noise": 1,
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        store.insert("hyper", doc);
        store
    }

    fn scheduler(store: &Arc<IntermediateStore>, concurrency: usize) -> Scheduler {
        Scheduler::new(
            SchedulerOptions {
                plugin_concurrency: concurrency,
                limits: HarnessLimits::default(),
                cancel_grace: Duration::from_millis(50),
                sinks: vec![Arc::new(StoreSink::new(Arc::clone(store))) as Arc<dyn EventSink>],
                batch_size: 10,
                retry: RetryPolicy::none(),
            },
            Arc::clone(store),
            Arc::new(RunStatus::new()),
        )
    }

    fn states(outcomes: &[PluginOutcome]) -> Vec<(&str, &str)> {
        outcomes.iter().map(|o| (o.name.as_str(), o.state.as_str())).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dependency_order_and_output_visibility() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = seeded_store();
        let plan = resolve(vec![
            Box::new(Relay::new("b", "a_out", &log).after("a")),
            Box::new(Relay::new("a", "hyper", &log)),
        ])
        .unwrap();

        let outcomes = scheduler(&store, 4).run(plan, &CancellationToken::new()).await;
        assert_eq!(states(&outcomes), vec![("b", "completed"), ("a", "completed")]);
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(store.count("a_out"), 1);
        assert_eq!(store.count("b_out"), 1);
        assert_eq!(outcomes[0].report.as_ref().unwrap().documents_read, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_cascades_to_transitive_dependents_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = seeded_store();
        let plan = resolve(vec![
            Box::new(Relay::new("a", "hyper", &log).failing()),
            Box::new(Relay::new("b", "a_out", &log).after("a")),
            Box::new(Relay::new("c", "b_out", &log).after("b")),
            Box::new(Relay::new("d", "hyper", &log)),
        ])
        .unwrap();

        let outcomes = scheduler(&store, 2).run(plan, &CancellationToken::new()).await;
        assert_eq!(
            states(&outcomes),
            vec![
                ("a", "failed"),
                ("b", "dependency_failed"),
                ("c", "dependency_failed"),
                ("d", "completed"),
            ]
        );
        assert!(matches!(
            &outcomes[0].state,
            PluginState::Failed { reason } if reason.contains("a exploded")
        ));
        assert!(matches!(
            &outcomes[2].state,
            PluginState::DependencyFailed { dependency } if dependency == "a"
        ));
        let ran = log.lock().clone();
        assert!(!ran.contains(&"b".to_string()) && !ran.contains(&"c".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_dependency_still_runs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = seeded_store();
        let plan = resolve(vec![
            Box::new(Relay::new("a", "hyper", &log)),
            Box::new(Relay::new("b", "a_out", &log).after("a").after("a")),
        ])
        .unwrap();

        let outcomes = scheduler(&store, 2).run(plan, &CancellationToken::new()).await;
        assert_eq!(states(&outcomes), vec![("a", "completed"), ("b", "completed")]);
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(store.count("b_out"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_dependency_output_still_completes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(IntermediateStore::new());
        let plan = resolve(vec![
            Box::new(Relay::new("a", "hyper", &log)),
            Box::new(Relay::new("b", "a_out", &log).after("a")),
        ])
        .unwrap();

        let outcomes = scheduler(&store, 1).run(plan, &CancellationToken::new()).await;
        assert_eq!(states(&outcomes), vec![("a", "completed"), ("b", "completed")]);
        assert_eq!(outcomes[1].report.as_ref().unwrap().documents_read, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_cap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = seeded_store();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let names = ["p1", "p2", "p3", "p4", "p5"];
        let plugins: Vec<Box<dyn Plugin>> = names
            .iter()
            .map(|&name| {
                let mut relay = Relay::new(name, "hyper", &log);
                relay.live = Arc::clone(&live);
                relay.peak = Arc::clone(&peak);
                Box::new(relay) as Box<dyn Plugin>
            })
            .collect();

        let outcomes = scheduler(&store, 2).run(resolve(plugins).unwrap(), &CancellationToken::new()).await;
        assert!(outcomes.iter().all(|o| o.state == PluginState::Completed));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_independent_plugins_run_concurrently() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = seeded_store();
        // Both must be inside finish() at once for the barrier to release.
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let mut a = Relay::new("a", "hyper", &log);
        a.hold = Some(Arc::clone(&barrier));
        let mut b = Relay::new("b", "hyper", &log);
        b.hold = Some(barrier);

        let outcomes = scheduler(&store, 2)
            .run(resolve(vec![Box::new(a), Box::new(b)]).unwrap(), &CancellationToken::new())
            .await;
        assert!(outcomes.iter().all(|o| o.state == PluginState::Completed));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = seeded_store();
        let plan = resolve(vec![
            Box::new(Relay::new("a", "hyper", &log)),
            Box::new(Relay::new("b", "a_out", &log).after("a")),
        ])
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = scheduler(&store, 2).run(plan, &cancel).await;
        assert_eq!(states(&outcomes), vec![("a", "cancelled"), ("b", "cancelled")]);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_plugins() {
        let store = seeded_store();
        let outcomes = scheduler(&store, 2)
            .run(resolve(vec![]).unwrap(), &CancellationToken::new())
            .await;
        assert!(outcomes.is_empty());
    }
}
