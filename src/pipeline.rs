use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::actuator::{Actuator, Brightness};
use crate::classifier::{Classifier, Confidences};
use crate::decider::{Command, Decider};
use crate::error::PipelineError;
use crate::join::join_timeout;
use crate::preprocess::prepare;
use crate::sampler::{AudioSource, FrameSink};
use crate::window::{SlidingWindow, WINDOW_SAMPLES};
use crate::{BrightnessConfig, Chunk, Config, DetectionConfig};

const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// What one processing cycle did.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The classifier failed; nothing was decided.
    Skipped,
    NoCommand(Confidences),
    Dispatched { command: Command, level: u8 },
    /// A command was decided but the actuator rejected it.
    DispatchFailed(Command),
}

/// Processor owns everything a cycle touches: the window, the classifier,
/// the decider and the brightness state.
pub struct Processor {
    window: SlidingWindow<WINDOW_SAMPLES>,
    classifier: Box<dyn Classifier>,
    decider: Decider,
    brightness: Brightness,
    log_probabilities: bool,
}

impl Processor {
    pub fn new(classifier: Box<dyn Classifier>, decider: Decider, brightness: Brightness) -> Self {
        Self {
            window: SlidingWindow::new(),
            classifier,
            decider,
            brightness,
            log_probabilities: false,
        }
    }

    /// Log every cycle's confidences at info level instead of debug.
    pub fn with_probability_logging(mut self, enabled: bool) -> Self {
        self.log_probabilities = enabled;
        self
    }

    pub fn level(&self) -> u8 {
        self.brightness.level()
    }

    pub fn process(&mut self, chunk: &Chunk) -> CycleOutcome {
        self.process_at(chunk, Instant::now())
    }

    /// Run one cycle for `chunk` as if it arrived at `now`.
    pub fn process_at(&mut self, chunk: &Chunk, now: Instant) -> CycleOutcome {
        self.window.push(&chunk.samples);
        let prepared = prepare(&self.window.snapshot(), WINDOW_SAMPLES);

        let confidences = match self.classifier.infer(&prepared) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("chunk {}: skipping cycle: {}", chunk.id, e);
                return CycleOutcome::Skipped;
            }
        };
        let log_level = if self.log_probabilities {
            log::Level::Info
        } else {
            log::Level::Debug
        };
        log::log!(
            log_level,
            "chunk {}: background {:.2}, decrease {:.2}, increase {:.2}",
            chunk.id,
            confidences.background,
            confidences.decrease,
            confidences.increase
        );

        match self.decider.decide(&confidences, now) {
            Command::None => CycleOutcome::NoCommand(confidences),
            command => match self.brightness.apply(command) {
                Some(level) => {
                    self.decider.dispatched(now);
                    CycleOutcome::Dispatched { command, level }
                }
                // Not armed: the next cycle may retry while the word is
                // still in the window.
                None => CycleOutcome::DispatchFailed(command),
            },
        }
    }
}

/// Build the capture callback. It never blocks: when the queue is full the
/// oldest queued frame is discarded to make room.
fn drop_oldest_sink(tx: Sender<Chunk>, rx: Receiver<Chunk>, dropped: Arc<AtomicUsize>) -> FrameSink {
    Box::new(move |chunk: Chunk| {
        let mut chunk = chunk;
        loop {
            match tx.try_send(chunk) {
                Ok(()) => return,
                Err(TrySendError::Full(c)) => {
                    if rx.try_recv().is_ok() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    chunk = c;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    })
}

/// StopHandle asks a running pipeline to stop from another thread.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Stage {
    Idle {
        classifier: Box<dyn Classifier>,
        actuator: Box<dyn Actuator>,
    },
    Running(thread::JoinHandle<Processor>),
    Stopped(Option<Processor>),
}

/// PipelineController wires capture to processing and owns their lifecycle.
pub struct PipelineController {
    source: Box<dyn AudioSource>,
    stage: Stage,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    detection: DetectionConfig,
    brightness: BrightnessConfig,
    queue_capacity: usize,
    poll_interval: Duration,
    shutdown_timeout: Duration,
}

impl PipelineController {
    pub fn new(
        config: &Config,
        source: Box<dyn AudioSource>,
        classifier: Box<dyn Classifier>,
        actuator: Box<dyn Actuator>,
    ) -> Self {
        Self {
            source,
            stage: Stage::Idle {
                classifier,
                actuator,
            },
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicUsize::new(0)),
            detection: config.detection.clone(),
            brightness: config.brightness.clone(),
            queue_capacity: config.audio.queue_capacity.max(1),
            poll_interval: Duration::from_millis(config.pipeline.poll_interval_ms.max(1)),
            shutdown_timeout: Duration::from_millis(config.pipeline.shutdown_timeout_ms),
        }
    }

    /// Read the initial level, open the audio source and spawn the
    /// processing loop. Returns once capture is running.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let (classifier, actuator) =
            match std::mem::replace(&mut self.stage, Stage::Stopped(None)) {
                Stage::Idle {
                    classifier,
                    actuator,
                } => (classifier, actuator),
                other => {
                    self.stage = other;
                    return Err(PipelineError::AlreadyStarted);
                }
            };

        let brightness = Brightness::new(
            actuator,
            self.brightness.step,
            self.brightness.fallback_level,
        );
        log::info!("brightness at {}%", brightness.level());
        let decider = Decider::new(
            self.detection.threshold,
            Duration::from_millis(self.detection.refractory_ms),
        );
        let processor = Processor::new(classifier, decider, brightness)
            .with_probability_logging(self.detection.log_probabilities);

        let (tx, rx) = bounded(self.queue_capacity);
        let sink = drop_oldest_sink(tx, rx.clone(), self.dropped.clone());

        self.running.store(true, Ordering::SeqCst);
        if let Err(e) = self.source.start(sink) {
            self.running.store(false, Ordering::SeqCst);
            self.stage = Stage::Stopped(Some(processor));
            return Err(e.into());
        }

        let running = self.running.clone();
        let poll_interval = self.poll_interval;
        let spawned = thread::Builder::new()
            .name("kws-processing".into())
            .spawn(move || PipelineController::mainloop(rx, running, processor, poll_interval));

        match spawned {
            Ok(hnd) => {
                self.stage = Stage::Running(hnd);
                log::info!("listening for brightness commands");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.source.stop();
                Err(e.into())
            }
        }
    }

    fn mainloop(
        frames: Receiver<Chunk>,
        running: Arc<AtomicBool>,
        mut processor: Processor,
        poll_interval: Duration,
    ) -> Processor {
        while running.load(Ordering::SeqCst) {
            let chunk = match frames.recv_timeout(poll_interval) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("audio queue closed, processing loop exiting");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            };
            if !running.load(Ordering::SeqCst) {
                break;
            }
            processor.process(&chunk);
        }
        processor
    }

    /// Block until the pipeline is asked to stop, by a signal, a
    /// [`StopHandle`], or the processing loop exiting on its own.
    pub fn wait(&self) {
        while self.running.load(Ordering::SeqCst) && !crate::signal::shutdown_requested() {
            thread::sleep(WAIT_INTERVAL);
        }
    }

    /// Stop capture and processing. Idempotent, and a no-op before `start`.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.source.stop();

        let hnd = match std::mem::replace(&mut self.stage, Stage::Stopped(None)) {
            Stage::Running(hnd) => hnd,
            other => {
                self.stage = other;
                return;
            }
        };

        match join_timeout(hnd, self.shutdown_timeout) {
            Some(Ok(processor)) => self.stage = Stage::Stopped(Some(processor)),
            Some(Err(_)) => log::error!("processing thread panicked"),
            None => log::warn!(
                "processing thread did not stop within {:?}, continuing teardown",
                self.shutdown_timeout
            ),
        }

        let dropped = self.frames_dropped();
        if dropped > 0 {
            log::warn!("dropped {} audio frames while processing fell behind", dropped);
        }
        log::info!("pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    pub fn frames_dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Brightness level held by the processing state, once it has stopped.
    pub fn level(&self) -> Option<u8> {
        match &self.stage {
            Stage::Stopped(Some(processor)) => Some(processor.level()),
            _ => None,
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}
