use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::asymmetry::{AsymmetryAggregator, YieldResult};
use super::config::{AcquisitionParameters, AnalysisSettings, PipelineSettings};
use super::error::PipelineError;
use super::hit::HitData;
use super::hit_queue::HitQueue;
use super::processor::HitProcessor;
use super::results::{Renderer, ResultRecord, ResultStore};
use super::session::HardwareSession;
use super::status::{PipelineState, PipelineStatus, RunCounters};

type Sinks = (Option<Box<dyn ResultStore>>, Option<Box<dyn Renderer>>);

/// State shared by the tasks of one run
struct SharedState {
    run_flag: AtomicBool,
    producer_done: AtomicBool,
    consumer_done: AtomicBool,
    fault: AtomicBool,
    queue: HitQueue,
    aggregator: Arc<AsymmetryAggregator>,
    counters: RunCounters,
    publications: AtomicU64,
    latest_result: Mutex<Option<YieldResult>>,
    latest_hit: Mutex<Option<HitData>>,
}

impl SharedState {
    fn new(settings: &PipelineSettings, analysis: &AnalysisSettings) -> Self {
        Self {
            run_flag: AtomicBool::new(false),
            producer_done: AtomicBool::new(false),
            consumer_done: AtomicBool::new(false),
            fault: AtomicBool::new(false),
            queue: HitQueue::new(settings.queue_capacity, settings.overflow_policy),
            aggregator: Arc::new(AsymmetryAggregator::new(analysis.binning, analysis.roi)),
            counters: RunCounters::new(),
            publications: AtomicU64::new(0),
            latest_result: Mutex::new(None),
            latest_hit: Mutex::new(None),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    Producer,
    Consumer,
    Timer,
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
            Self::Timer => "timer",
        }
    }
}

/// Marks a task as finished when it exits, by any path. A task that panics also clears the
/// run flag so the other tasks wind down.
struct TaskGuard {
    shared: Arc<SharedState>,
    task: Task,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("Pipeline {} task panicked; stopping the run", self.task.name());
            self.shared.fault.store(true, Ordering::Release);
            self.shared.run_flag.store(false, Ordering::Release);
        }
        match self.task {
            Task::Producer => self.shared.producer_done.store(true, Ordering::Release),
            Task::Consumer => self.shared.consumer_done.store(true, Ordering::Release),
            Task::Timer => (),
        }
    }
}

struct RunningTasks<S> {
    producer: JoinHandle<S>,
    consumer: JoinHandle<()>,
    timer: JoinHandle<Sinks>,
}

/// Producer: session -> queue, until the run flag clears. Hands the session back on exit
fn run_producer<S: HardwareSession>(
    mut session: S,
    shared: Arc<SharedState>,
    settings: PipelineSettings,
) -> S {
    let _guard = TaskGuard {
        shared: shared.clone(),
        task: Task::Producer,
    };
    while shared.run_flag.load(Ordering::Acquire) {
        match session.pull_hits() {
            Ok(hits) => {
                if !hits.is_empty() {
                    let dropped = shared.queue.push(hits);
                    if dropped > 0 {
                        log::warn!("Hit queue full, dropped {dropped} oldest hits");
                    }
                }
                std::thread::sleep(settings.poll_delay());
            }
            Err(e) => {
                shared.counters.note_comm_error();
                log::warn!("{e}; retrying");
                std::thread::sleep(settings.comm_retry_delay());
            }
        }
    }
    session
}

/// Consumer: queue -> `process` (the feature extraction into the aggregator). Exits only once
/// the producer is done and the queue has been drained after that.
fn run_consumer<F: FnMut(&HitData)>(
    shared: Arc<SharedState>,
    settings: PipelineSettings,
    mut process: F,
) {
    let _guard = TaskGuard {
        shared: shared.clone(),
        task: Task::Consumer,
    };
    loop {
        let producer_finished = shared.producer_done.load(Ordering::Acquire);
        let batch = shared.queue.try_pop_all();
        if batch.is_empty() {
            if producer_finished {
                break;
            }
            std::thread::sleep(settings.poll_delay());
            continue;
        }
        for hit in batch.iter() {
            process(hit);
        }
        if let Some(last) = batch.into_iter().last() {
            *shared.latest_hit.lock() = Some(last);
        }
    }
}

/// Aggregate, render and publish the current histograms
fn publish(
    shared: &SharedState,
    store: &mut Option<Box<dyn ResultStore>>,
    renderer: &mut Option<Box<dyn Renderer>>,
) {
    let analysis = shared.aggregator.analyze(shared.counters.hits_processed());
    analysis.result.log();

    if let Some(renderer) = renderer.as_mut() {
        renderer.render(&analysis);
        let latest_hit = shared.latest_hit.lock().take();
        if let Some(hit) = latest_hit {
            renderer.render_waveform(&hit);
        }
    }
    if let Some(store) = store.as_mut() {
        if let Err(e) = ResultRecord::new(&analysis).and_then(|record| store.append(&record)) {
            log::error!("Failed to publish result: {e}");
        }
    }

    *shared.latest_result.lock() = Some(analysis.result);
    shared.publications.fetch_add(1, Ordering::Relaxed);
}

/// Timer: publishes every interval, and once more after the consumer has finished
fn run_timer(shared: Arc<SharedState>, mut sinks: Sinks, settings: PipelineSettings) -> Sinks {
    let _guard = TaskGuard {
        shared: shared.clone(),
        task: Task::Timer,
    };
    let interval = settings.interval();
    let mut last_publish = Instant::now();
    loop {
        if shared.consumer_done.load(Ordering::Acquire) {
            publish(&shared, &mut sinks.0, &mut sinks.1);
            break;
        }
        std::thread::sleep(settings.poll_delay());
        if last_publish.elapsed() >= interval {
            publish(&shared, &mut sinks.0, &mut sinks.1);
            last_publish = Instant::now();
        }
    }
    sinks
}

/// PipelineScheduler runs the acquisition and analysis of a session.
///
/// `Idle -> Configuring -> Running -> Stopping -> Idle`. While running three threads share the
/// hit queue and the aggregator: the producer pulls hits from the session, the consumer extracts
/// pulse features and fills the histograms, and the timer publishes the yields at a fixed
/// interval. Stop joins the producer, then the consumer, then the timer, so every hit pushed is
/// processed and included in the last publication.
pub struct PipelineScheduler<S: HardwareSession + 'static> {
    session: Option<S>,
    settings: PipelineSettings,
    analysis: AnalysisSettings,
    state: PipelineState,
    shared: Arc<SharedState>,
    result_store: Option<Box<dyn ResultStore>>,
    renderer: Option<Box<dyn Renderer>>,
    tasks: Option<RunningTasks<S>>,
}

impl<S: HardwareSession + 'static> PipelineScheduler<S> {
    pub fn new(session: S, settings: PipelineSettings, analysis: AnalysisSettings) -> Self {
        Self {
            shared: Arc::new(SharedState::new(&settings, &analysis)),
            session: Some(session),
            settings,
            analysis,
            state: PipelineState::Idle,
            result_store: None,
            renderer: None,
            tasks: None,
        }
    }

    pub fn with_result_store(mut self, store: Box<dyn ResultStore>) -> Self {
        self.result_store = Some(store);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The session, unless it is owned by a running producer
    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    /// Histograms of the current (or last) run, for read-only access
    pub fn aggregator(&self) -> Arc<AsymmetryAggregator> {
        self.shared.aggregator.clone()
    }

    /// Operator action: clear every histogram of the current run
    pub fn reset_histograms(&self) {
        log::info!("Resetting the asymmetry histograms");
        self.shared.aggregator.reset_all();
    }

    /// True if a task of the current run panicked. The run should then be stopped
    pub fn fault_detected(&self) -> bool {
        self.shared.fault.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.state,
            queue: self.shared.queue.counters(),
            queued_bytes: self.shared.queue.queued_bytes(),
            publications: self.shared.publications.load(Ordering::Relaxed),
            latest_result: self.shared.latest_result.lock().clone(),
            fault: self.fault_detected(),
            ..Default::default()
        }
        .with_counters(&self.shared.counters)
    }

    fn set_state(&mut self, state: PipelineState) {
        log::info!("Pipeline {} -> {}", self.state, state);
        self.state = state;
    }

    fn prepare(&self, session: &mut S, params: &AcquisitionParameters) -> Result<(), PipelineError> {
        self.analysis.validate()?;
        self.settings.validate()?;
        session.configure(params)?;
        session.start()?;
        Ok(())
    }

    /// Configure the session and start a new run. Histograms and counters start empty
    pub fn start(&mut self, params: &AcquisitionParameters) -> Result<(), PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        let mut session = self.session.take().ok_or(PipelineError::SessionLost)?;

        self.set_state(PipelineState::Configuring);
        if let Err(e) = self.prepare(&mut session, params) {
            self.session = Some(session);
            self.set_state(PipelineState::Idle);
            return Err(e);
        }

        let shared = Arc::new(SharedState::new(&self.settings, &self.analysis));
        shared.run_flag.store(true, Ordering::Release);
        self.shared = shared.clone();

        let processor = HitProcessor::new(params, &self.analysis);
        let sinks: Sinks = (self.result_store.take(), self.renderer.take());

        let producer = {
            let shared = shared.clone();
            let settings = self.settings.clone();
            std::thread::spawn(move || run_producer(session, shared, settings))
        };
        let consumer = {
            let shared = shared.clone();
            let settings = self.settings.clone();
            std::thread::spawn(move || {
                let state = shared.clone();
                run_consumer(shared, settings, move |hit| {
                    processor.process(hit, &state.aggregator, &state.counters);
                })
            })
        };
        let timer = {
            let settings = self.settings.clone();
            std::thread::spawn(move || run_timer(shared, sinks, settings))
        };
        self.tasks = Some(RunningTasks {
            producer,
            consumer,
            timer,
        });
        self.set_state(PipelineState::Running);
        Ok(())
    }

    /// Stop the run and wait for every task to finish. The first failure is returned after
    /// the scheduler is back to Idle.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::InvalidState {
                action: "stop",
                state: self.state,
            });
        }
        self.set_state(PipelineState::Stopping);
        self.shared.run_flag.store(false, Ordering::Release);

        let mut failure: Option<PipelineError> = None;
        if let Some(tasks) = self.tasks.take() {
            match tasks.producer.join() {
                Ok(mut session) => {
                    if let Err(e) = session.stop() {
                        log::error!("Failed to stop the hardware session: {e}");
                        failure.get_or_insert(PipelineError::Session(e));
                    }
                    self.session = Some(session);
                }
                Err(_) => {
                    failure.get_or_insert(PipelineError::TaskPanicked(Task::Producer.name()));
                }
            }
            if tasks.consumer.join().is_err() {
                failure.get_or_insert(PipelineError::TaskPanicked(Task::Consumer.name()));
            }
            match tasks.timer.join() {
                Ok((store, renderer)) => {
                    self.result_store = store;
                    self.renderer = renderer;
                }
                Err(_) => {
                    failure.get_or_insert(PipelineError::TaskPanicked(Task::Timer.name()));
                }
            }
        }

        if let Some(store) = self.result_store.as_mut() {
            if let Err(e) = store.close() {
                log::error!("Failed to close the result store: {e}");
            }
        }
        let counters = self.shared.queue.counters();
        log::info!(
            "Run finished: {} hits pushed, {} processed, {} dropped",
            counters.pushed,
            counters.popped,
            counters.dropped
        );
        self.set_state(PipelineState::Idle);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: HardwareSession + 'static> Drop for PipelineScheduler<S> {
    fn drop(&mut self) {
        if self.state == PipelineState::Running {
            if let Err(e) = self.stop() {
                log::error!("Pipeline failed to stop cleanly: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardInfo;
    use crate::error::{CommError, ConfigurationError, SessionError};
    use crate::replay::ReplaySession;
    use std::time::Duration;

    /// A session which panics on its n-th pull
    struct PanickingSession {
        inner: ReplaySession,
        pulls: u32,
        panic_at: u32,
    }

    impl HardwareSession for PanickingSession {
        fn board_info(&self) -> &BoardInfo {
            self.inner.board_info()
        }
        fn configure(&mut self, params: &AcquisitionParameters) -> Result<(), ConfigurationError> {
            self.inner.configure(params)
        }
        fn start(&mut self) -> Result<(), SessionError> {
            self.inner.start()
        }
        fn pull_hits(&mut self) -> Result<Vec<HitData>, CommError> {
            self.pulls += 1;
            if self.pulls == self.panic_at {
                panic!("simulated producer failure");
            }
            self.inner.pull_hits()
        }
        fn stop(&mut self) -> Result<(), SessionError> {
            self.inner.stop()
        }
        fn is_running(&self) -> bool {
            self.inner.is_running()
        }
    }

    /// A renderer which panics on its first render
    struct PanickingRenderer;

    impl Renderer for PanickingRenderer {
        fn render(&mut self, _analysis: &crate::asymmetry::AnalysisSnapshot) {
            panic!("simulated renderer failure");
        }
    }

    fn wait_for_fault<S: HardwareSession + 'static>(scheduler: &PipelineScheduler<S>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !scheduler.fault_detected() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn replay() -> ReplaySession {
        let hits = (0..10).map(|i| HitData::new(0, i)).collect();
        ReplaySession::from_hits(hits).unwrap().with_max_passes(2)
    }

    #[test]
    fn test_state_machine() {
        let mut scheduler = PipelineScheduler::new(
            replay(),
            PipelineSettings::default(),
            AnalysisSettings::default(),
        );
        assert!(matches!(
            scheduler.stop(),
            Err(PipelineError::InvalidState {
                action: "stop",
                state: PipelineState::Idle
            })
        ));

        scheduler.start(&AcquisitionParameters::default()).unwrap();
        assert_eq!(scheduler.state(), PipelineState::Running);
        assert!(scheduler.session().is_none());
        assert!(matches!(
            scheduler.start(&AcquisitionParameters::default()),
            Err(PipelineError::InvalidState { action: "start", .. })
        ));

        std::thread::sleep(Duration::from_millis(20));
        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), PipelineState::Idle);
        assert!(!scheduler.session().unwrap().is_running());

        let status = scheduler.status();
        assert_eq!(status.queue.pushed, 20);
        assert_eq!(status.queue.popped, 20);
        assert_eq!(status.hits_processed, 20);
        // Hits carry no waveforms
        assert_eq!(status.missing_channel, 20);
        assert_eq!(status.publications, 1);
        assert!(status.latest_result.is_some());

        // A new run needs a full reconfigure and starts from empty counters
        scheduler.start(&AcquisitionParameters::default()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while scheduler.status().queue.pushed < 20 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        scheduler.stop().unwrap();
        let status = scheduler.status();
        assert_eq!(status.queue.pushed, 20);
        assert_eq!(status.hits_processed, 20);
        assert_eq!(status.missing_channel, 20);
        assert_eq!(status.publications, 1);
    }

    #[test]
    fn test_consumer_panic_is_contained() {
        let settings = PipelineSettings::default();
        let shared = Arc::new(SharedState::new(&settings, &AnalysisSettings::default()));
        shared.run_flag.store(true, Ordering::Release);
        shared.queue.push(vec![HitData::new(0, 1), HitData::new(0, 2)]);

        let consumer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                run_consumer(shared, settings, |hit| {
                    if hit.timestamp == 2 {
                        panic!("simulated processing failure");
                    }
                })
            })
        };
        assert!(consumer.join().is_err());
        assert!(shared.fault.load(Ordering::Acquire));
        assert!(!shared.run_flag.load(Ordering::Acquire));
        assert!(shared.consumer_done.load(Ordering::Acquire));
    }

    #[test]
    fn test_timer_panic_is_contained() {
        let settings = PipelineSettings {
            interval_secs: 1,
            ..Default::default()
        };
        let mut scheduler = PipelineScheduler::new(replay(), settings, AnalysisSettings::default())
            .with_renderer(Box::new(PanickingRenderer));
        scheduler.start(&AcquisitionParameters::default()).unwrap();
        wait_for_fault(&scheduler);
        assert!(scheduler.fault_detected());
        assert!(matches!(
            scheduler.stop(),
            Err(PipelineError::TaskPanicked("timer"))
        ));
        assert_eq!(scheduler.state(), PipelineState::Idle);

        // The producer and consumer still wound down cleanly
        let status = scheduler.status();
        assert_eq!(status.queue.pushed, status.queue.popped);
        assert!(!scheduler.session().unwrap().is_running());

        // The session survives, so the next run can start
        scheduler.start(&AcquisitionParameters::default()).unwrap();
        assert!(!scheduler.fault_detected());
        scheduler.stop().unwrap();
    }

    #[test]
    fn test_configuration_error_returns_to_idle() {
        let mut scheduler = PipelineScheduler::new(
            replay(),
            PipelineSettings::default(),
            AnalysisSettings::default(),
        );
        let params = AcquisitionParameters {
            beam_channel: 0,
            ..Default::default()
        };
        assert!(matches!(
            scheduler.start(&params),
            Err(PipelineError::Configuration(
                ConfigurationError::DuplicateChannel { .. }
            ))
        ));
        assert_eq!(scheduler.state(), PipelineState::Idle);
        assert!(scheduler.session().is_some());
    }

    #[test]
    fn test_producer_panic_is_contained() {
        let session = PanickingSession {
            inner: replay(),
            pulls: 0,
            panic_at: 1,
        };
        let mut scheduler = PipelineScheduler::new(
            session,
            PipelineSettings::default(),
            AnalysisSettings::default(),
        );
        scheduler.start(&AcquisitionParameters::default()).unwrap();
        wait_for_fault(&scheduler);
        assert!(scheduler.fault_detected());
        assert!(matches!(
            scheduler.stop(),
            Err(PipelineError::TaskPanicked("producer"))
        ));
        assert_eq!(scheduler.state(), PipelineState::Idle);
        assert!(matches!(
            scheduler.start(&AcquisitionParameters::default()),
            Err(PipelineError::SessionLost)
        ));
    }
}
