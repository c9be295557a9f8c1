// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Request dispatch
//!
//! One worker thread owns the engine session and handles requests in
//! arrival order. Cancellation and timeouts are settled from other threads
//! through the [`JobBoard`], which also suppresses results that arrive after
//! their job was already settled.

use super::{HostEvent, HostRequest};
use crate::classify::{ErrorClassification, ErrorCode};
use crate::config::RenderConfig;
use crate::engine::{EngineLoader, InterruptHandle};
use crate::error::Result;
use crate::job::{JobEvent, RenderRequest};
use crate::monitor::HealthMonitor;
use crate::session::Session;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Timer a watchdog waits on; cancelling it wakes the watchdog early
#[derive(Debug, Default)]
struct Deadline {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl Deadline {
    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    /// Block until the timeout elapses or the deadline is cancelled.
    /// Returns true when the timeout elapsed.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }
}

#[derive(Debug)]
struct ActiveJob {
    request_id: String,
    deadline: Arc<Deadline>,
    interrupt: Option<InterruptHandle>,
    /// A terminal event was already sent for this job
    settled: bool,
    timed_out: bool,
}

#[derive(Debug, Default)]
struct BoardState {
    active: Option<ActiveJob>,
    queued: VecDeque<String>,
    skipped: HashSet<String>,
}

/// Shared record of the running and queued renders
struct JobBoard {
    state: Mutex<BoardState>,
    events: Sender<HostEvent>,
}

impl JobBoard {
    fn new(events: Sender<HostEvent>) -> Self {
        Self {
            state: Mutex::new(BoardState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event receiver dropped; discarding event");
        }
    }

    fn enqueue(&self, request_id: &str) {
        self.lock().queued.push_back(request_id.to_string());
    }

    /// Drop a render from the queue without running it. True when it had
    /// been cancelled while waiting.
    fn discard_queued(&self, request_id: &str) -> bool {
        let mut state = self.lock();
        if let Some(pos) = state.queued.iter().position(|id| id == request_id) {
            state.queued.remove(pos);
        }
        state.skipped.remove(request_id)
    }

    fn was_cancelled(&self, request_id: &str) -> bool {
        self.lock().skipped.contains(request_id)
    }

    /// Move a queued render to running and arm its watchdog. False when it
    /// was cancelled while waiting, including during engine init.
    fn begin(
        self: &Arc<Self>,
        request_id: &str,
        timeout: Duration,
        interrupt: Option<InterruptHandle>,
        kill_on_timeout: bool,
    ) -> bool {
        let deadline = Arc::new(Deadline::default());
        {
            let mut state = self.lock();
            if let Some(pos) = state.queued.iter().position(|id| id == request_id) {
                state.queued.remove(pos);
            }
            if state.skipped.remove(request_id) {
                return false;
            }
            state.active = Some(ActiveJob {
                request_id: request_id.to_string(),
                deadline: Arc::clone(&deadline),
                interrupt,
                settled: false,
                timed_out: false,
            });
        }

        let board = Arc::clone(self);
        let id = request_id.to_string();
        let spawned = thread::Builder::new()
            .name(format!("watchdog-{}", id))
            .spawn(move || {
                if deadline.wait(timeout) {
                    board.timeout(&id, timeout, kill_on_timeout);
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("Could not start watchdog for {}: {}", request_id, e);
        }
        true
    }

    /// Forward a progress event unless the job was already settled
    fn job_event(&self, request_id: &str, event: JobEvent) {
        let state = self.lock();
        if let Some(active) = &state.active {
            if active.request_id == request_id && active.settled {
                return;
            }
        }
        let event = match event {
            JobEvent::Phase(phase) => HostEvent::Progress {
                request_id: Some(request_id.to_string()),
                stage: phase.name().to_string(),
                percent: phase.percent(),
                message: phase.label().to_string(),
            },
            JobEvent::Warning(message) => HostEvent::Warning {
                request_id: Some(request_id.to_string()),
                code: None,
                message,
            },
            JobEvent::Memory(warning) => HostEvent::MemoryWarning(warning),
        };
        self.emit(event);
    }

    /// Deliver the job's result and clear it. Returns true if the job timed
    /// out, in which case the result was suppressed.
    fn finish(&self, request_id: &str, event: HostEvent) -> bool {
        let mut state = self.lock();
        let Some(active) = state.active.take() else {
            self.emit(event);
            return false;
        };
        active.deadline.cancel();
        if let Some(interrupt) = &active.interrupt {
            interrupt.detach();
        }
        if active.settled {
            tracing::info!("Suppressing late result for {}", request_id);
        } else {
            self.emit(event);
        }
        active.timed_out
    }

    /// Cancel a running or queued render
    fn cancel(&self, request_id: &str) {
        let mut state = self.lock();

        if let Some(active) = state.active.as_mut() {
            if active.request_id == request_id {
                if active.settled {
                    tracing::debug!("Cancel for already settled job {}", request_id);
                    return;
                }
                active.settled = true;
                active.deadline.cancel();
                tracing::info!("Cancelled job {} (engine call keeps running)", request_id);
                self.emit(cancelled_event(request_id));
                return;
            }
        }

        if let Some(pos) = state.queued.iter().position(|id| id == request_id) {
            state.queued.remove(pos);
            state.skipped.insert(request_id.to_string());
            tracing::info!("Cancelled queued job {}", request_id);
            self.emit(cancelled_event(request_id));
            return;
        }

        tracing::debug!("Cancel for unknown job {}", request_id);
    }

    /// Watchdog expiry
    fn timeout(&self, request_id: &str, timeout: Duration, kill: bool) {
        let mut state = self.lock();
        let Some(active) = state.active.as_mut() else {
            return;
        };
        if active.request_id != request_id || active.settled {
            return;
        }
        active.settled = true;
        active.timed_out = true;
        tracing::warn!("Job {} timed out after {}ms", request_id, timeout.as_millis());

        let classification = ErrorClassification::for_code(
            ErrorCode::Timeout,
            format!("render exceeded {}ms", timeout.as_millis()),
        );
        self.emit(HostEvent::error(Some(request_id), &classification, Vec::new(), true));

        if kill {
            if let Some(interrupt) = &active.interrupt {
                interrupt.interrupt();
            }
        }
    }

    fn busy(&self) -> bool {
        let state = self.lock();
        state.active.is_some() || !state.queued.is_empty()
    }
}

fn cancelled_event(request_id: &str) -> HostEvent {
    let classification = ErrorClassification::for_code(ErrorCode::Cancelled, "cancelled by host");
    HostEvent::error(Some(request_id), &classification, Vec::new(), false)
}

/// Owns the session; runs on the worker thread
struct Worker {
    loader: Box<dyn EngineLoader>,
    config: RenderConfig,
    asset_dir: PathBuf,
    session: Option<Session>,
    monitor: HealthMonitor,
    board: Arc<JobBoard>,
}

impl Worker {
    fn run(mut self, requests: Receiver<HostRequest>) {
        while let Ok(request) = requests.recv() {
            self.handle(request);
        }
        self.discard_session();
        tracing::info!("Render worker stopped");
    }

    fn handle(&mut self, request: HostRequest) {
        match request {
            HostRequest::Init { asset_base_url } => {
                if let Some(dir) = asset_base_url {
                    self.asset_dir = PathBuf::from(dir);
                }
                self.start_session(None);
            }
            HostRequest::Render(request) => self.render(request),
            HostRequest::Cancel { request_id } => self.board.cancel(&request_id),
            HostRequest::MountFiles { files } => {
                let Some(session) = self.ensure_session() else {
                    return;
                };
                match session.mount_files(&files) {
                    Ok(report) => self.board.emit(HostEvent::FilesMounted {
                        count: report.mounted.len(),
                        rejected: report.rejected,
                    }),
                    Err(e) => {
                        let classification =
                            ErrorClassification::for_code(ErrorCode::MountFailed, e.to_string());
                        self.board
                            .emit(HostEvent::error(None, &classification, Vec::new(), false));
                    }
                }
            }
            HostRequest::ClearFiles => {
                if let Some(session) = self.session.as_mut() {
                    session.clear_files().log_failures();
                }
                self.board.emit(HostEvent::FilesCleared);
            }
            HostRequest::MountLibraries { libraries } => {
                let Some(session) = self.ensure_session() else {
                    return;
                };
                let report = session.mount_libraries(&libraries);
                let board = Arc::clone(&self.board);
                for (id, message) in &report.failed {
                    board.emit(HostEvent::Warning {
                        request_id: None,
                        code: Some(ErrorCode::LibraryMountFailed),
                        message: format!("Library {} unavailable: {}", id, message),
                    });
                }
                board.emit(HostEvent::LibrariesMounted {
                    count: report.available.len(),
                    failed: report.failed.into_iter().map(|(id, _)| id).collect(),
                });
            }
            HostRequest::ClearLibraries => {
                if let Some(session) = self.session.as_mut() {
                    session.clear_libraries().log_failures();
                }
                self.board.emit(HostEvent::LibrariesCleared);
            }
            HostRequest::Ping { id } => {
                self.sample_heap();
                self.monitor.record_ping(&id);
                self.board.emit(HostEvent::Pong {
                    id,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    initialized: self.session.is_some(),
                    busy: self.board.busy(),
                });
            }
            HostRequest::GetMemoryUsage => {
                self.sample_heap();
                self.board.emit(HostEvent::MemoryUsage(self.monitor.usage()));
            }
        }
    }

    fn sample_heap(&mut self) {
        if let Some(session) = &self.session {
            self.monitor.sample(session.heap_size());
        }
    }

    fn render(&mut self, request: RenderRequest) {
        let id = request.request_id.clone();
        if self.board.was_cancelled(&id) {
            self.board.discard_queued(&id);
            tracing::debug!("Skipping cancelled job {}", id);
            return;
        }
        // The job stays queued through an implicit init so a cancel meanwhile
        // still finds it
        if self.session.is_none() && !self.start_session(Some(&id)) {
            self.board.discard_queued(&id);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            self.board.discard_queued(&id);
            return;
        };

        let timeout = self.config.timeout_for(request.timeout_ms);
        let started = self.board.begin(
            &id,
            timeout,
            session.interrupt_handle(),
            self.config.kill_on_timeout,
        );
        if !started {
            tracing::debug!("Job {} cancelled during engine init", id);
            return;
        }

        let board = Arc::clone(&self.board);
        let outcome = session.render(&request, &mut self.monitor, &mut |event| {
            board.job_event(&id, event)
        });

        let (event, needs_restart) = match outcome {
            Ok(result) => (HostEvent::complete(result), false),
            Err(failure) => {
                let needs_restart = failure.error.needs_restart();
                (HostEvent::failure(&id, failure), needs_restart)
            }
        };
        let timed_out = self.board.finish(&id, event);

        if needs_restart || timed_out {
            tracing::warn!("Discarding engine session after job {}", id);
            self.discard_session();
        }
    }

    fn ensure_session(&mut self) -> Option<&mut Session> {
        if self.session.is_none() {
            self.start_session(None);
        }
        self.session.as_mut()
    }

    fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        self.monitor.set_initialized(false);
    }

    /// (Re)start the session. Failure is reported to the host, attributed
    /// to `request_id` when a render triggered it.
    fn start_session(&mut self, request_id: Option<&str>) -> bool {
        self.discard_session();

        let config = self.config.with_asset_dir(&self.asset_dir);
        let board = Arc::clone(&self.board);
        let started = Session::start(self.loader.as_ref(), &config, &mut |stage| {
            board.emit(HostEvent::Progress {
                request_id: None,
                stage: stage.name().to_string(),
                percent: stage.percent(),
                message: stage.message().to_string(),
            })
        });

        let session = match started {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Engine initialization failed: {}", e);
                let classification =
                    ErrorClassification::for_code(ErrorCode::InternalError, e.to_string())
                        .with_message(format!("Failed to initialize the render engine: {}", e));
                // A render cancelled during init already got its terminal event
                let request_id = request_id.filter(|id| !board.was_cancelled(id));
                board.emit(HostEvent::error(request_id, &classification, Vec::new(), true));
                return false;
            }
        };

        for warning in session.integrity_warnings() {
            board.emit(HostEvent::Warning {
                request_id: None,
                code: None,
                message: format!("Asset {}: {}", warning.artifact, warning.message),
            });
        }
        if !session.fonts().missing.is_empty() {
            board.emit(HostEvent::Warning {
                request_id: None,
                code: None,
                message: format!("Fonts unavailable: {}", session.fonts().missing.join(", ")),
            });
        }

        self.monitor.set_initialized(true);
        self.monitor.sample(session.heap_size());
        board.emit(HostEvent::Ready {
            capabilities: session.capabilities().clone(),
            init_duration_ms: session.init_duration().as_millis() as u64,
        });
        self.session = Some(session);
        true
    }
}

/// Host-facing handle to the render worker
pub struct Dispatcher {
    requests: Sender<HostRequest>,
    board: Arc<JobBoard>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the worker thread. Events for the host arrive on the returned
    /// receiver. The engine itself is loaded lazily by `init` or the first
    /// request that needs it.
    pub fn spawn(
        loader: Box<dyn EngineLoader>,
        config: RenderConfig,
    ) -> Result<(Self, Receiver<HostEvent>)> {
        let (event_tx, event_rx) = mpsc::channel();
        let (request_tx, request_rx) = mpsc::channel();
        let board = Arc::new(JobBoard::new(event_tx));

        let worker = Worker {
            loader,
            asset_dir: config.asset_dir.clone(),
            monitor: HealthMonitor::new(config.memory_limit_bytes, config.memory_warning_percent),
            config,
            session: None,
            board: Arc::clone(&board),
        };
        let worker = thread::Builder::new()
            .name("render-worker".to_string())
            .spawn(move || worker.run(request_rx))?;

        Ok((
            Self {
                requests: request_tx,
                board,
                worker,
            },
            event_rx,
        ))
    }

    /// Submit a request. `cancel` is settled immediately on the calling
    /// thread; everything else is queued for the worker.
    pub fn send(&self, request: HostRequest) {
        match request {
            HostRequest::Cancel { request_id } => self.board.cancel(&request_id),
            request => {
                if let HostRequest::Render(render) = &request {
                    self.board.enqueue(&render.request_id);
                }
                if self.requests.send(request).is_err() {
                    tracing::error!("Render worker is gone; request dropped");
                }
            }
        }
    }

    /// Report a request that could not be decoded
    pub fn reject(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("Rejected request: {}", message);
        let classification = ErrorClassification::for_code(ErrorCode::RenderFailed, message.clone())
            .with_message(format!("Invalid request: {}", message));
        self.board
            .emit(HostEvent::error(None, &classification, Vec::new(), false));
    }

    /// A render is running or waiting
    pub fn is_busy(&self) -> bool {
        self.board.busy()
    }

    /// Stop accepting requests, let the worker drain its queue, and tear
    /// down the session.
    pub fn shutdown(self) {
        let Dispatcher {
            requests, worker, ..
        } = self;
        drop(requests);
        if worker.join().is_err() {
            tracing::error!("Render worker panicked");
        }
    }
}
