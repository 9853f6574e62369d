//! Mailbox-driven scan orchestrator.
//!
//! One task owns all mutable state and reacts to messages: ticker ticks,
//! cycle completions, login results, cooldown timers and UI commands.
//! Capture, decode and network work run in spawned tasks that report
//! back through the same mailbox, tagged with the session id they were
//! started under.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::auth::{AuthAttempt, AuthClient, Endpoint, LoginOutcome};
use crate::capture::{CaptureMethod, FrameCapture, Region};
use crate::decode::{CandidateKind, DecodeEngine};
use crate::error::QrGateError;
use crate::perf::{PerfMonitor, ScanRecord, StageTimings};
use crate::roi::RoiPredictor;
use crate::scan::events::{CycleOutcome, Message, ScanCommand, ScanEvent, ScanHandle};
use crate::scan::phase::ScanPhase;
use crate::ticket::TicketTracker;

const MAILBOX_CAPACITY: usize = 256;

// ── ScanConfig ───────────────────────────────────────────────────

/// Timing and behaviour knobs for [`ScanOrchestrator`].
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Ticker period while scanning.
    pub poll_interval: Duration,
    /// Pause after an expired code.
    pub cooldown: Duration,
    /// Cool down and keep scanning after an expired code.
    pub auto_retry: bool,
    /// Initial user capture region (logical coordinates).
    pub region: Region,
    /// Narrow captures to the predicted code location.
    pub use_roi: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            cooldown: Duration::from_secs(3),
            auto_retry: true,
            // 800x800 centred on a 1920x1080 display
            region: Region::new(560, 140, 800, 800),
            use_roi: true,
        }
    }
}

// ── ScanServices ─────────────────────────────────────────────────

/// Long-lived collaborators, built once and shared with cycle and
/// login tasks.
#[derive(Clone)]
pub struct ScanServices {
    pub capture: Arc<dyn FrameCapture>,
    pub engine: Arc<DecodeEngine>,
    pub auth: AuthClient,
    pub tickets: Arc<TicketTracker>,
    pub roi: Arc<Mutex<RoiPredictor>>,
    pub perf: Arc<Mutex<PerfMonitor>>,
}

impl ScanServices {
    pub fn new(capture: Arc<dyn FrameCapture>, engine: DecodeEngine, auth: AuthClient) -> Self {
        Self {
            capture,
            engine: Arc::new(engine),
            auth,
            tickets: Arc::new(TicketTracker::new()),
            roi: Arc::new(Mutex::new(RoiPredictor::new())),
            perf: Arc::new(Mutex::new(PerfMonitor::new())),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── ScanSession ──────────────────────────────────────────────────

/// Detection stats for the ticket currently being submitted.
#[derive(Debug, Clone, Copy)]
struct PendingScan {
    capture: Duration,
    decode: Duration,
    method: CaptureMethod,
    candidate: CandidateKind,
}

/// State of one Start..Stop run.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: u64,
    pub started_at: Instant,
    pub last_ticket_at: Option<Instant>,
    /// Payload under submission; reused for a verification resubmit.
    pub pending_payload: Option<String>,
    pub awaiting_code: bool,
    /// Cooldowns entered after expired codes.
    pub retries: u32,
    /// Completed capture cycles.
    pub cycles: u64,
    pending_scan: Option<PendingScan>,
}

impl ScanSession {
    fn new(id: u64) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            last_ticket_at: None,
            pending_payload: None,
            awaiting_code: false,
            retries: 0,
            cycles: 0,
            pending_scan: None,
        }
    }
}

// ── ScanOrchestrator ─────────────────────────────────────────────

/// Owns the scan state machine. Drive it with [`ScanOrchestrator::run`]
/// (or [`ScanOrchestrator::spawn`]) and talk to it through the
/// [`ScanHandle`].
pub struct ScanOrchestrator {
    services: ScanServices,
    config: ScanConfig,
    phase: ScanPhase,
    region: Region,
    session: Option<ScanSession>,
    generation: u64,
    ticker: Option<CancellationToken>,
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
    /// Cycle guard kept while a detected ticket is resolved.
    held: Option<OwnedMutexGuard<()>>,
    mailbox: mpsc::WeakSender<Message>,
    inbox: mpsc::Receiver<Message>,
    events: mpsc::UnboundedSender<ScanEvent>,
}

impl ScanOrchestrator {
    pub fn new(
        services: ScanServices,
        config: ScanConfig,
    ) -> (Self, ScanHandle, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (events, events_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            services,
            region: config.region,
            config,
            phase: ScanPhase::Idle,
            session: None,
            generation: 0,
            ticker: None,
            cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
            held: None,
            mailbox: tx.downgrade(),
            inbox,
            events,
        };
        (orchestrator, ScanHandle::new(tx), events_rx)
    }

    /// Build the orchestrator and run it on the current runtime.
    pub fn spawn(
        services: ScanServices,
        config: ScanConfig,
    ) -> (ScanHandle, mpsc::UnboundedReceiver<ScanEvent>, JoinHandle<()>) {
        let (orchestrator, handle, events) = Self::new(services, config);
        let task = tokio::spawn(orchestrator.run());
        (handle, events, task)
    }

    pub fn phase(&self) -> &ScanPhase {
        &self.phase
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    /// Process messages until every [`ScanHandle`] is dropped or
    /// `shutdown` is requested.
    pub async fn run(mut self) {
        while let Some(msg) = self.inbox.recv().await {
            if !self.handle(msg) {
                break;
            }
        }
        self.stop_session();
        debug!("scan orchestrator exited");
    }

    fn handle(&mut self, msg: Message) -> bool {
        match msg {
            Message::Command(command) => self.on_command(command),
            Message::Tick { session } => self.on_tick(session),
            Message::CycleDone {
                session,
                outcome,
                guard,
            } => self.on_cycle_done(session, outcome, guard),
            Message::AuthDone {
                session,
                attempt,
                outcome,
            } => self.on_auth_done(session, attempt, outcome),
            Message::SmsSent { session, sent } => {
                if self.is_current(session) && self.phase == ScanPhase::AwaitingCode {
                    self.emit(ScanEvent::VerificationRequired { sms_sent: sent });
                }
            }
            Message::CooldownElapsed { session } => self.on_cooldown_elapsed(session),
            Message::Shutdown => return false,
        }
        true
    }

    // ── Commands ─────────────────────────────────────────────────

    fn on_command(&mut self, command: ScanCommand) {
        match command {
            ScanCommand::Start => self.start_session(),
            ScanCommand::Stop => {
                if self.phase.is_active() {
                    self.stop_session();
                    self.emit(ScanEvent::Log("scanning stopped".into()));
                }
            }
            ScanCommand::SetRegion(region) => {
                if region.is_empty() {
                    warn!("ignoring empty capture region {region}");
                    return;
                }
                self.region = region;
                lock(&self.services.roi).reset();
                self.emit(ScanEvent::Log(format!("capture region set to {region}")));
            }
            ScanCommand::SubmitVerificationCode(code) => self.resubmit_with_code(code),
            ScanCommand::CancelVerification => {
                if self.phase != ScanPhase::AwaitingCode {
                    return;
                }
                self.release_ticket();
                if let Some(session) = self.session.as_mut() {
                    session.awaiting_code = false;
                }
                self.emit(ScanEvent::Log("verification cancelled".into()));
                self.transition(ScanPhase::resume_scanning);
            }
        }
    }

    fn start_session(&mut self) {
        if !self.transition(ScanPhase::start) {
            self.emit(ScanEvent::Log("already scanning".into()));
            return;
        }
        self.generation += 1;
        let id = self.generation;
        self.session = Some(ScanSession::new(id));
        self.held = None;
        self.services.tickets.reset();
        self.spawn_ticker(id);

        let auth = self.services.auth.clone();
        tokio::spawn(async move {
            auth.warm_up().await;
        });
        self.emit(ScanEvent::Log(format!("scanning {}", self.region)));
    }

    fn stop_session(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        self.held = None;
        if let Some(session) = self.session.take() {
            debug!(
                "session {} ended after {} cycles ({:?})",
                session.id,
                session.cycles,
                session.started_at.elapsed()
            );
        }
        if self.phase.is_active() {
            self.phase.stop();
            info!("scan phase -> {}", self.phase);
            self.emit(ScanEvent::StatusChanged(self.phase.clone()));
        }
    }

    fn resubmit_with_code(&mut self, code: String) {
        if self.phase != ScanPhase::AwaitingCode {
            self.emit(ScanEvent::Log("no verification is pending".into()));
            return;
        }
        let code = code.trim();
        if code.is_empty() {
            self.emit(ScanEvent::Error("verification code is empty".into()));
            return;
        }
        let Some(payload) = self.session.as_ref().and_then(|s| s.pending_payload.clone()) else {
            self.release_ticket();
            self.transition(ScanPhase::resume_scanning);
            return;
        };
        if !self.transition(ScanPhase::resubmit) {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.awaiting_code = false;
        }
        self.submit(AuthAttempt::with_verification(payload, code));
    }

    // ── Scanning ─────────────────────────────────────────────────

    fn spawn_ticker(&mut self, session: u64) {
        let token = CancellationToken::new();
        self.ticker = Some(token.clone());
        let mailbox = self.mailbox.clone();
        let period = self.config.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(tx) = mailbox.upgrade() else { break };
                        match tx.try_send(Message::Tick { session }) {
                            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
        });
    }

    fn on_tick(&mut self, session: u64) {
        if !self.is_current(session) || !self.phase.is_scanning() {
            return;
        }
        let guard = match Arc::clone(&self.cycle_lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                trace!("previous cycle still running; tick skipped");
                return;
            }
        };
        let (area, predicted) = self.capture_area();
        let services = self.services.clone();
        self.spawn_reply(async move {
            let outcome = run_cycle(&services, area, predicted).await;
            Message::CycleDone {
                session,
                outcome,
                guard,
            }
        });
    }

    /// Predicted code area clamped to the user region, else the region.
    fn capture_area(&self) -> (Region, bool) {
        if self.config.use_roi {
            let predicted = lock(&self.services.roi).predict();
            if let Some(area) = predicted.and_then(|p| p.intersect(&self.region)) {
                return (area, true);
            }
        }
        (self.region, false)
    }

    fn on_cycle_done(&mut self, session: u64, outcome: CycleOutcome, guard: OwnedMutexGuard<()>) {
        if !self.is_current(session) {
            return;
        }
        if let Some(s) = self.session.as_mut() {
            s.cycles += 1;
        }
        match outcome {
            CycleOutcome::NoFrame => debug!("no capture backend produced a frame; cycle skipped"),
            CycleOutcome::Miss { predicted } => {
                if predicted {
                    lock(&self.services.roi).verify(false);
                }
            }
            CycleOutcome::Hit {
                hit,
                located,
                predicted,
                method,
                capture,
                decode,
            } => {
                {
                    let mut roi = lock(&self.services.roi);
                    if predicted {
                        roi.verify(true);
                    }
                    roi.record(located);
                }
                if !self.phase.is_scanning() {
                    return;
                }
                if !self.services.tickets.is_new(&hit.payload) {
                    trace!("ticket already handled; ignoring");
                    return;
                }
                info!(
                    "QR code found via {} candidate ({}, {method}) in {:?}",
                    hit.kind,
                    hit.decoder,
                    capture + decode
                );
                self.emit(ScanEvent::QrDetected(hit.payload.clone()));
                if !self.transition(ScanPhase::begin_submit) {
                    return;
                }
                if let Some(s) = self.session.as_mut() {
                    s.last_ticket_at = Some(Instant::now());
                    s.pending_payload = Some(hit.payload.clone());
                    s.pending_scan = Some(PendingScan {
                        capture,
                        decode,
                        method,
                        candidate: hit.kind,
                    });
                }
                self.held = Some(guard);
                self.submit(AuthAttempt::new(hit.payload));
            }
        }
    }

    // ── Login ────────────────────────────────────────────────────

    fn submit(&mut self, attempt: AuthAttempt) {
        let Some(session) = self.session.as_ref().map(|s| s.id) else {
            return;
        };
        let auth = self.services.auth.clone();
        self.spawn_reply(async move {
            let mut attempt = attempt;
            let outcome = auth.login(&mut attempt).await;
            Message::AuthDone {
                session,
                attempt,
                outcome,
            }
        });
    }

    fn on_auth_done(&mut self, session: u64, attempt: AuthAttempt, outcome: LoginOutcome) {
        if !self.is_current(session) || self.phase != ScanPhase::Submitting {
            debug!("dropping login result from an old session");
            return;
        }
        self.record_perf(&attempt, outcome == LoginOutcome::Success);
        info!("login attempt finished: {outcome}");

        match outcome {
            LoginOutcome::Success => {
                if let Some(last) = lock(&self.services.perf).last() {
                    info!("scan breakdown: {}", last.timings);
                }
                self.emit(ScanEvent::LoginSucceeded);
                self.stop_session();
            }
            LoginOutcome::NeedsVerification => {
                if !self.transition(ScanPhase::await_code) {
                    return;
                }
                if let Some(s) = self.session.as_mut() {
                    s.awaiting_code = true;
                }
                self.emit(ScanEvent::Log(
                    "first login from this device; requesting SMS code".into(),
                ));
                let auth = self.services.auth.clone();
                self.spawn_reply(async move {
                    let resp = auth.send_sms().await;
                    if !resp.is_ok() {
                        warn!("SMS request failed ({}): {}", resp.code, resp.msg);
                    }
                    Message::SmsSent {
                        session,
                        sent: resp.is_ok(),
                    }
                });
            }
            LoginOutcome::CodeExpired if self.config.auto_retry => {
                self.release_ticket();
                self.services.tickets.reset();
                if let Some(s) = self.session.as_mut() {
                    s.retries += 1;
                }
                if !self.transition(ScanPhase::begin_cooldown) {
                    return;
                }
                let delay = self.config.cooldown;
                self.emit(ScanEvent::Log(format!(
                    "QR code expired; scanning again in {delay:?}"
                )));
                self.spawn_reply(async move {
                    tokio::time::sleep(delay).await;
                    Message::CooldownElapsed { session }
                });
            }
            LoginOutcome::CodeExpired => {
                self.emit(ScanEvent::Error("QR code expired".into()));
                self.release_ticket();
                self.transition(ScanPhase::resume_scanning);
            }
            LoginOutcome::SessionExpired => {
                self.emit(ScanEvent::Error(
                    "session token expired; log in again".into(),
                ));
                self.stop_session();
            }
            LoginOutcome::Failed(msg) => {
                self.emit(ScanEvent::Error(msg));
                self.release_ticket();
                self.transition(ScanPhase::resume_scanning);
            }
        }
    }

    fn on_cooldown_elapsed(&mut self, session: u64) {
        if !self.is_current(session) || self.phase.cooldown_elapsed().is_none() {
            return;
        }
        self.services.tickets.reset();
        self.transition(ScanPhase::resume_scanning);
    }

    fn record_perf(&self, attempt: &AuthAttempt, success: bool) {
        let Some(scan) = self.session.as_ref().and_then(|s| s.pending_scan) else {
            return;
        };
        lock(&self.services.perf).record(ScanRecord {
            at: Instant::now(),
            timings: StageTimings {
                capture: scan.capture,
                decode: scan.decode,
                validate: attempt.time_on(Endpoint::Validate),
                confirm: attempt.time_on(Endpoint::Confirm),
            },
            method: scan.method,
            candidate: scan.candidate,
            success,
        });
    }

    // ── Internal ─────────────────────────────────────────────────

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    /// Forget the ticket under submission and let cycles run again.
    fn release_ticket(&mut self) {
        self.held = None;
        if let Some(s) = self.session.as_mut() {
            s.pending_payload = None;
            s.pending_scan = None;
        }
    }

    fn transition(&mut self, step: fn(&mut ScanPhase) -> Result<(), QrGateError>) -> bool {
        match step(&mut self.phase) {
            Ok(()) => {
                info!("scan phase -> {}", self.phase);
                self.emit(ScanEvent::StatusChanged(self.phase.clone()));
                true
            }
            Err(e) => {
                warn!("{e} (phase {})", self.phase);
                false
            }
        }
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }

    /// Run `work` in a task and post its result to the mailbox.
    fn spawn_reply<F>(&self, work: F)
    where
        F: Future<Output = Message> + Send + 'static,
    {
        let Some(tx) = self.mailbox.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let msg = work.await;
            let _ = tx.send(msg).await;
        });
    }
}

// ── Cycle ────────────────────────────────────────────────────────

async fn run_cycle(services: &ScanServices, area: Region, predicted: bool) -> CycleOutcome {
    let started = Instant::now();
    let capture = Arc::clone(&services.capture);
    let frame = match tokio::task::spawn_blocking(move || capture.capture(area)).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return CycleOutcome::NoFrame,
        Err(e) => {
            debug!("capture task failed: {e}");
            return CycleOutcome::NoFrame;
        }
    };
    let capture_time = started.elapsed();
    let method = frame.method();
    let (width, height, region) = (frame.width(), frame.height(), frame.region());

    let decode_started = Instant::now();
    match services.engine.scan(frame).await {
        Some(hit) => {
            let located = hit
                .bounds
                .map(|b| frame_to_screen(b, region, width, height))
                .unwrap_or(region);
            CycleOutcome::Hit {
                hit,
                located,
                predicted,
                method,
                capture: capture_time,
                decode: decode_started.elapsed(),
            }
        }
        None => CycleOutcome::Miss { predicted },
    }
}

/// Map a rectangle in frame pixels onto the logical `region` the frame
/// was captured from.
fn frame_to_screen(bounds: Region, region: Region, width: u32, height: u32) -> Region {
    if width == 0 || height == 0 {
        return region;
    }
    let sx = region.width as f64 / width as f64;
    let sy = region.height as f64 / height as f64;
    Region {
        x: region.x + (bounds.x as f64 * sx).round() as i32,
        y: region.y + (bounds.y as f64 * sy).round() as i32,
        width: (bounds.width as f64 * sx).round() as u32,
        height: (bounds.height as f64 * sy).round() as u32,
    }
}

// ── Tests ────────────────────────────────────────────────────────
