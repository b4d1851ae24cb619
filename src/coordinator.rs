//! Controller-side session state machine.
//!
//! Every input (user commands, worker exits, speech callbacks) arrives as a
//! `ControllerEvent` on one queue, and periodic work happens in `poll`. Both
//! run on the controller's main thread only, so the finalize guard is a plain
//! field: timer expiry, worker exit and user stop all go through `complete`,
//! and only the first one of a session gets past it.

use std::fmt;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::audio::{Announcer, BackgroundMusic};
use crate::config::CoordinatorConfig;
use crate::log;
use crate::logging::Logger;
use crate::session::ExerciseKind;
use crate::signal::{Marker, SignalChannel};
use crate::supervisor::{stop_worker, WorkerLauncher, WorkerProcess};
use crate::timer::{format_duration, SessionTimer, Tick};

const TICK: Duration = Duration::from_secs(1);

/// Increases with every launch; tags worker exit events.
pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Start(ExerciseKind),
    Reset,
    Stop,
    /// Session length in seconds for the next session, 0 = unbounded.
    SetDuration(u32),
    Status,
    Quit,
}

impl UserCommand {
    /// Console syntax: `squat`, `pushup`, `reset`, `stop`, `time <secs>`,
    /// `status`, `quit`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let head = words.next()?.to_ascii_lowercase();
        let command = match head.as_str() {
            "reset" | "r" => Self::Reset,
            "stop" => Self::Stop,
            "status" | "s" => Self::Status,
            "quit" | "exit" | "q" => Self::Quit,
            "time" | "duration" => Self::SetDuration(words.next()?.parse().ok()?),
            other => Self::Start(ExerciseKind::parse(other)?),
        };
        Some(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Command(UserCommand),
    WorkerExited(SessionId),
    /// The final summary has been spoken.
    AnnouncementDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTrigger {
    TimerExpired,
    WorkerExited,
    UserStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub kind: ExerciseKind,
    pub count: u32,
    pub trigger: CompletionTrigger,
    /// Training time, reported for unbounded sessions only.
    pub elapsed_secs: Option<u32>,
}

impl SessionReport {
    pub fn summary(&self) -> String {
        let mut text = format!("Completed {} {}", self.count, self.kind.plural());
        if let Some(secs) = self.elapsed_secs {
            text.push_str(&format!(", training time {}", format_duration(secs)));
        }
        text
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// What the front-end should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Launched { kind: ExerciseKind, session: SessionId },
    LaunchFailed(String),
    /// A worker is already running; the request was dropped.
    Rejected { running: ExerciseKind },
    /// The worker raised the start marker; the clock is running.
    TimingStarted { kind: ExerciseKind, duration_secs: u32 },
    Clock(String),
    ResetSent,
    NoSession,
    DurationSet(u32),
    Status(String),
    Finished(SessionReport),
    SummarySpoken,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Worker running, waiting for its start marker.
    AwaitingStart,
    Timing,
}

struct ActiveWorker<P> {
    kind: ExerciseKind,
    session: SessionId,
    process: P,
}

pub struct Coordinator<L: WorkerLauncher, A: Announcer> {
    launcher: L,
    signals: SignalChannel,
    announcer: A,
    music: BackgroundMusic,
    events: Sender<ControllerEvent>,
    config: CoordinatorConfig,
    logger: Logger,

    duration_secs: u32,
    timer: SessionTimer,
    next_tick: Option<Instant>,
    worker: Option<ActiveWorker<L::Process>>,
    phase: Phase,
    /// Set once the current session has been finalized. Cleared only by a
    /// successful launch.
    finalized: bool,
    last_session: SessionId,
    last_start_poll: Option<Instant>,
    last_liveness_poll: Option<Instant>,
    /// Summaries queued for speech whose completion has not come back yet.
    summaries_pending: usize,
    quit: bool,
}

impl<L: WorkerLauncher, A: Announcer> Coordinator<L, A> {
    pub fn new(
        launcher: L,
        signals: SignalChannel,
        announcer: A,
        music: BackgroundMusic,
        events: Sender<ControllerEvent>,
        config: &CoordinatorConfig,
        logger: Logger,
    ) -> Self {
        Self {
            launcher,
            signals,
            announcer,
            music,
            events,
            duration_secs: config.duration_secs,
            config: config.clone(),
            logger,
            timer: SessionTimer::new(),
            next_tick: None,
            worker: None,
            phase: Phase::Idle,
            finalized: true,
            last_session: 0,
            last_start_poll: None,
            last_liveness_poll: None,
            summaries_pending: 0,
            quit: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// True while a finished session's summary is still being spoken.
    pub fn awaiting_summary(&self) -> bool {
        self.summaries_pending > 0
    }

    /// How long the main loop may block before `poll` is due again.
    pub fn poll_interval(&self) -> Duration {
        self.config
            .start_poll()
            .min(self.config.liveness_poll())
            .max(Duration::from_millis(10))
    }

    pub fn handle(&mut self, event: ControllerEvent, now: Instant) -> Vec<Notice> {
        match event {
            ControllerEvent::Command(command) => self.handle_command(command, now),
            ControllerEvent::WorkerExited(session) => {
                let current = self.worker.as_ref().map(|w| w.session);
                if current != Some(session) {
                    // 前のセッションの終了通知
                    return Vec::new();
                }
                self.complete(CompletionTrigger::WorkerExited).into_iter().collect()
            }
            ControllerEvent::AnnouncementDone => {
                self.summaries_pending = self.summaries_pending.saturating_sub(1);
                vec![Notice::SummarySpoken]
            }
        }
    }

    /// Start-marker check, liveness check and timer ticks.
    pub fn poll(&mut self, now: Instant) -> Vec<Notice> {
        let mut notices = Vec::new();

        if self.phase == Phase::AwaitingStart
            && due(&mut self.last_start_poll, self.config.start_poll(), now)
        {
            if self.signals.take(Marker::Start) {
                self.timer.start(self.duration_secs);
                self.next_tick = Some(now + TICK);
                self.phase = Phase::Timing;
                if let Some(worker) = &self.worker {
                    log!(self.logger, "[timer] {} session started", worker.kind);
                    notices.push(Notice::TimingStarted {
                        kind: worker.kind,
                        duration_secs: self.duration_secs,
                    });
                }
            }
        }

        if self.worker.is_some()
            && due(&mut self.last_liveness_poll, self.config.liveness_poll(), now)
        {
            let alive = self.worker.as_mut().is_some_and(|w| w.process.is_alive());
            if !alive {
                notices.extend(self.complete(CompletionTrigger::WorkerExited));
                return notices;
            }
        }

        // 遅れた分はまとめて進める
        while let Some(due_at) = self.next_tick {
            if now < due_at {
                break;
            }
            self.next_tick = Some(due_at + TICK);
            match self.timer.tick() {
                Tick::Continue => notices.push(Notice::Clock(self.timer.clock())),
                Tick::Expired => {
                    notices.push(Notice::Clock(self.timer.clock()));
                    notices.extend(self.complete(CompletionTrigger::TimerExpired));
                    break;
                }
            }
        }
        notices
    }

    fn handle_command(&mut self, command: UserCommand, now: Instant) -> Vec<Notice> {
        match command {
            UserCommand::Start(kind) => self.start(kind, now),
            UserCommand::Reset => vec![self.reset()],
            UserCommand::Stop => match self.complete(CompletionTrigger::UserStop) {
                Some(notice) => vec![notice],
                None => vec![Notice::NoSession],
            },
            UserCommand::SetDuration(secs) => {
                self.duration_secs = secs;
                vec![Notice::DurationSet(secs)]
            }
            UserCommand::Status => vec![Notice::Status(self.status())],
            UserCommand::Quit => {
                let mut notices: Vec<Notice> =
                    self.complete(CompletionTrigger::UserStop).into_iter().collect();
                self.signals.acknowledge(Marker::Start);
                self.signals.acknowledge(Marker::Stop);
                self.quit = true;
                notices.push(Notice::Quit);
                notices
            }
        }
    }

    fn start(&mut self, kind: ExerciseKind, now: Instant) -> Vec<Notice> {
        let mut notices = Vec::new();
        if let Some(worker) = self.worker.as_mut() {
            if worker.process.is_alive() {
                log!(
                    self.logger,
                    "[worker] {} already running, ignoring start of {}",
                    worker.kind,
                    kind
                );
                return vec![Notice::Rejected { running: worker.kind }];
            }
            // 終了通知がまだ届いていない前のセッションを先に締める
            notices.extend(self.complete(CompletionTrigger::WorkerExited));
        }

        self.music.stop();
        self.timer = SessionTimer::new();
        self.next_tick = None;
        self.signals.acknowledge(Marker::Start);
        self.signals.acknowledge(Marker::Stop);
        self.signals.acknowledge(Marker::Reset);
        self.signals.clear_count(kind);

        let session = self.last_session + 1;
        match self.launcher.launch(kind, session, &self.events) {
            Ok(process) => {
                self.last_session = session;
                self.worker = Some(ActiveWorker { kind, session, process });
                self.finalized = false;
                self.phase = Phase::AwaitingStart;
                self.last_start_poll = None;
                self.last_liveness_poll = Some(now);
                self.music.play(kind);
                notices.push(Notice::Launched { kind, session });
            }
            Err(e) => {
                log!(self.logger, "[worker] launch failed: {e:#}");
                notices.push(Notice::LaunchFailed(format!("{e:#}")));
            }
        }
        notices
    }

    fn reset(&mut self) -> Notice {
        let alive = self.worker.as_mut().is_some_and(|w| w.process.is_alive());
        if !alive {
            return Notice::NoSession;
        }
        self.signals.raise(Marker::Reset);
        self.timer = SessionTimer::new();
        self.next_tick = None;
        // 古い開始シグナルで計測が始まらないように
        self.signals.acknowledge(Marker::Start);
        self.phase = Phase::AwaitingStart;
        self.last_start_poll = None;
        Notice::ResetSent
    }

    /// The single finalize path. Returns `None` when this session has already
    /// been finalized or nothing is running.
    fn complete(&mut self, trigger: CompletionTrigger) -> Option<Notice> {
        if self.finalized {
            return None;
        }
        let mut worker = self.worker.take()?;
        self.finalized = true;

        self.timer.stop();
        self.next_tick = None;
        self.music.stop();
        let outcome = stop_worker(
            &mut worker.process,
            &self.signals,
            self.config.stop_grace(),
            self.config.kill_grace(),
            &self.logger,
        );
        self.phase = Phase::Idle;

        let report = SessionReport {
            kind: worker.kind,
            count: self.signals.read_count(worker.kind),
            trigger,
            // 開始シグナル前に終わったセッションは経過時間なし
            elapsed_secs: (self.timer.is_started() && !self.timer.is_countdown())
                .then(|| self.timer.elapsed_secs()),
        };
        log!(
            self.logger,
            "[worker] session {} finished ({:?}, stop: {:?}): {}",
            worker.session,
            trigger,
            outcome,
            report
        );

        let events = self.events.clone();
        self.summaries_pending += 1;
        self.announcer.announce_then(
            &report.summary(),
            Box::new(move || {
                let _ = events.send(ControllerEvent::AnnouncementDone);
            }),
        );
        Some(Notice::Finished(report))
    }

    fn status(&self) -> String {
        // 計測中はそのセッションの長さ、それ以外は次のセッションの長さ
        let secs = if self.timer.is_active() {
            self.timer.target_secs()
        } else {
            self.duration_secs
        };
        let length = if secs == 0 {
            "unbounded".to_string()
        } else {
            format!("{}s", secs)
        };
        match (&self.worker, self.phase) {
            (Some(worker), Phase::Timing) => format!(
                "{} running (pid {}), clock {}, session length {}",
                worker.kind,
                worker.process.id(),
                self.timer.clock(),
                length
            ),
            (Some(worker), _) => format!(
                "{} running (pid {}), waiting for start signal, session length {}",
                worker.kind,
                worker.process.id(),
                length
            ),
            (None, _) => format!("idle, session length {}", length),
        }
    }
}

/// True when `interval` has passed since `last`, and records `now`.
fn due(last: &mut Option<Instant>, interval: Duration, now: Instant) -> bool {
    match *last {
        Some(at) if now.saturating_duration_since(at) < interval => false,
        _ => {
            *last = Some(now);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::RecordingAnnouncer;
    use crate::config::AudioConfig;
    use crate::supervisor::testing::{Behaviour, FakeLauncher};
    use std::sync::mpsc;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        signals: SignalChannel,
        events: mpsc::Receiver<ControllerEvent>,
        coordinator: Coordinator<FakeLauncher, RecordingAnnouncer>,
        t0: Instant,
    }

    impl Harness {
        fn new(duration_secs: u32) -> Self {
            let dir = TempDir::new().unwrap();
            let signals = SignalChannel::new(dir.path(), Logger::stderr_only());
            let (tx, rx) = mpsc::channel();
            let config = CoordinatorConfig {
                duration_secs,
                stop_grace_ms: 10,
                kill_grace_ms: 10,
                ..CoordinatorConfig::default()
            };
            let coordinator = Coordinator::new(
                FakeLauncher::new(),
                signals.clone(),
                RecordingAnnouncer::new(),
                BackgroundMusic::from_config(&AudioConfig::default(), Logger::stderr_only()),
                tx,
                &config,
                Logger::stderr_only(),
            );
            Self {
                _dir: dir,
                signals,
                events: rx,
                coordinator,
                t0: Instant::now(),
            }
        }

        fn at(&self, secs: f32) -> Instant {
            self.t0 + Duration::from_millis((secs * 1000.0).round() as u64)
        }

        fn command(&mut self, command: UserCommand, secs: f32) -> Vec<Notice> {
            let now = self.at(secs);
            self.coordinator.handle(ControllerEvent::Command(command), now)
        }

        /// Launch `kind` and let the worker signal the start.
        fn start_timing(&mut self, kind: ExerciseKind) {
            let notices = self.command(UserCommand::Start(kind), 0.0);
            assert!(matches!(notices[0], Notice::Launched { .. }));
            self.signals.raise(Marker::Start);
            let notices = self.coordinator.poll(self.at(0.1));
            assert!(notices.iter().any(|n| matches!(n, Notice::TimingStarted { .. })));
            assert_eq!(self.coordinator.phase(), Phase::Timing);
        }

        fn finished(notices: &[Notice]) -> Vec<SessionReport> {
            notices
                .iter()
                .filter_map(|n| match n {
                    Notice::Finished(report) => Some(report.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_parse_console_commands() {
        assert_eq!(UserCommand::parse("squat"), Some(UserCommand::Start(ExerciseKind::Squat)));
        assert_eq!(UserCommand::parse(" Pushup "), Some(UserCommand::Start(ExerciseKind::Pushup)));
        assert_eq!(UserCommand::parse("time 90"), Some(UserCommand::SetDuration(90)));
        assert_eq!(UserCommand::parse("time"), None);
        assert_eq!(UserCommand::parse("stop"), Some(UserCommand::Stop));
        assert_eq!(UserCommand::parse("jump"), None);
        assert_eq!(UserCommand::parse(""), None);
    }

    #[test]
    fn test_start_marker_starts_timer_and_is_acknowledged() {
        let mut h = Harness::new(60);
        h.command(UserCommand::Start(ExerciseKind::Squat), 0.0);
        assert_eq!(h.coordinator.phase(), Phase::AwaitingStart);
        assert!(h.coordinator.poll(h.at(0.05)).is_empty());

        h.signals.raise(Marker::Start);
        let notices = h.coordinator.poll(h.at(0.2));
        assert_eq!(
            notices,
            vec![Notice::TimingStarted { kind: ExerciseKind::Squat, duration_secs: 60 }]
        );
        assert!(!h.signals.is_raised(Marker::Start));

        let notices = h.coordinator.poll(h.at(1.2));
        assert_eq!(notices, vec![Notice::Clock("00:59".to_string())]);
    }

    #[test]
    fn test_worker_death_and_timer_expiry_in_same_poll_finalize_once() {
        let mut h = Harness::new(2);
        h.start_timing(ExerciseKind::Squat);
        h.signals.write_count(ExerciseKind::Squat, 9);

        // ワーカーが落ちた通知とタイマー満了が同じ周回で届く
        let session = h.coordinator.launcher.launched[0].1;
        h.coordinator.launcher.last().borrow_mut().alive = false;
        let mut notices = h.coordinator.poll(h.at(2.5));
        notices.extend(h.coordinator.handle(ControllerEvent::WorkerExited(session), h.at(2.5)));
        notices.extend(h.command(UserCommand::Stop, 2.5));
        notices.extend(h.coordinator.poll(h.at(5.0)));

        let reports = Harness::finished(&notices);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].count, 9);
        assert_eq!(h.coordinator.announcer.spoken(), vec!["Completed 9 squats"]);
        assert!(notices.contains(&Notice::NoSession));
    }

    #[test]
    fn test_timer_expiry_then_exit_and_stop_finalize_once() {
        let mut h = Harness::new(2);
        h.start_timing(ExerciseKind::Squat);
        h.signals.write_count(ExerciseKind::Squat, 7);

        // ワーカーは生きたまま、タイマー満了が先に締める
        let session = h.coordinator.launcher.launched[0].1;
        assert!(h.coordinator.launcher.last().borrow().alive);
        let mut notices = h.coordinator.poll(h.at(2.5));
        assert_eq!(Harness::finished(&notices)[0].trigger, CompletionTrigger::TimerExpired);

        notices.extend(h.coordinator.handle(ControllerEvent::WorkerExited(session), h.at(2.5)));
        notices.extend(h.command(UserCommand::Stop, 2.5));
        notices.extend(h.coordinator.poll(h.at(4.0)));

        assert_eq!(Harness::finished(&notices).len(), 1);
        assert!(notices.contains(&Notice::NoSession));
        assert_eq!(h.coordinator.announcer.spoken(), vec!["Completed 7 squats"]);
        let done = h
            .events
            .try_iter()
            .filter(|e| *e == ControllerEvent::AnnouncementDone)
            .count();
        assert_eq!(done, 1);
    }

    #[test]
    fn test_timer_expiry_stops_worker() {
        let mut h = Harness::new(2);
        h.start_timing(ExerciseKind::Pushup);
        h.signals.write_count(ExerciseKind::Pushup, 4);

        assert_eq!(Harness::finished(&h.coordinator.poll(h.at(1.1))).len(), 0);
        let notices = h.coordinator.poll(h.at(2.1));
        let reports = Harness::finished(&notices);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].trigger, CompletionTrigger::TimerExpired);
        assert_eq!(reports[0].elapsed_secs, None);
        assert!(!h.coordinator.launcher.last().borrow().alive);
        assert!(!h.signals.is_raised(Marker::Stop));
        assert_eq!(h.coordinator.phase(), Phase::Idle);

        // 完了コールバックはキューに戻ってくる
        assert_eq!(h.events.try_recv(), Ok(ControllerEvent::AnnouncementDone));
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let mut h = Harness::new(60);
        h.start_timing(ExerciseKind::Squat);
        h.signals.write_count(ExerciseKind::Squat, 5);

        for kind in ExerciseKind::ALL {
            let notices = h.command(UserCommand::Start(kind), 1.0);
            assert_eq!(notices, vec![Notice::Rejected { running: ExerciseKind::Squat }]);
        }
        assert_eq!(h.coordinator.launcher.launched.len(), 1);
        assert_eq!(h.signals.read_count(ExerciseKind::Squat), 5);
        assert_eq!(h.coordinator.phase(), Phase::Timing);
    }

    #[test]
    fn test_launch_failure_leaves_no_session() {
        let mut h = Harness::new(60);
        h.coordinator.launcher.fail = true;
        let notices = h.command(UserCommand::Start(ExerciseKind::Squat), 0.0);
        assert!(matches!(notices[0], Notice::LaunchFailed(_)));
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(h.command(UserCommand::Stop, 0.1), vec![Notice::NoSession]);
        assert_eq!(h.command(UserCommand::Reset, 0.1), vec![Notice::NoSession]);

        h.coordinator.launcher.fail = false;
        let notices = h.command(UserCommand::Start(ExerciseKind::Squat), 0.2);
        assert!(matches!(notices[0], Notice::Launched { .. }));
    }

    #[test]
    fn test_user_stop_reports_persisted_count() {
        let mut h = Harness::new(0);
        h.start_timing(ExerciseKind::Squat);
        for i in 1..=65 {
            h.coordinator.poll(h.at(i as f32 + 0.1));
        }
        h.signals.write_count(ExerciseKind::Squat, 12);

        let notices = h.command(UserCommand::Stop, 66.0);
        let reports = Harness::finished(&notices);
        assert_eq!(reports[0].trigger, CompletionTrigger::UserStop);
        assert_eq!(reports[0].elapsed_secs, Some(65));
        assert_eq!(reports[0].summary(), "Completed 12 squats, training time 1m 5s");
    }

    #[test]
    fn test_death_before_start_has_no_training_time_from_previous_session() {
        let mut h = Harness::new(0);
        h.start_timing(ExerciseKind::Squat);
        for i in 1..=65 {
            h.coordinator.poll(h.at(i as f32 + 0.1));
        }
        let notices = h.command(UserCommand::Stop, 66.0);
        assert_eq!(Harness::finished(&notices)[0].elapsed_secs, Some(65));

        h.command(UserCommand::SetDuration(60), 66.5);
        h.command(UserCommand::Start(ExerciseKind::Pushup), 67.0);
        h.coordinator.launcher.last().borrow_mut().alive = false;
        let notices = h.coordinator.poll(h.at(67.5));
        let reports = Harness::finished(&notices);
        assert_eq!(reports[0].trigger, CompletionTrigger::WorkerExited);
        assert_eq!(reports[0].elapsed_secs, None);
        assert_eq!(reports[0].summary(), "Completed 0 pushups");
    }

    #[test]
    fn test_status_shows_running_session_length() {
        let mut h = Harness::new(60);
        h.start_timing(ExerciseKind::Squat);
        h.command(UserCommand::SetDuration(30), 0.5);
        let Notice::Status(text) = &h.command(UserCommand::Status, 0.6)[0] else {
            panic!("expected status");
        };
        assert!(text.contains("session length 60s"), "{text}");
    }

    #[test]
    fn test_reset_keeps_worker_and_waits_for_new_start() {
        let mut h = Harness::new(60);
        h.start_timing(ExerciseKind::Pushup);
        h.coordinator.poll(h.at(1.1));

        assert_eq!(h.command(UserCommand::Reset, 1.5), vec![Notice::ResetSent]);
        assert!(h.signals.is_raised(Marker::Reset));
        assert_eq!(h.coordinator.phase(), Phase::AwaitingStart);
        assert!(h.coordinator.launcher.last().borrow().alive);
        assert!(h.coordinator.poll(h.at(3.0)).is_empty());

        h.signals.raise(Marker::Start);
        let notices = h.coordinator.poll(h.at(3.2));
        assert!(matches!(notices[0], Notice::TimingStarted { .. }));
    }

    #[test]
    fn test_stale_exit_does_not_finalize_new_session() {
        let mut h = Harness::new(60);
        h.start_timing(ExerciseKind::Squat);
        h.command(UserCommand::Stop, 1.0);

        h.command(UserCommand::Start(ExerciseKind::Pushup), 2.0);
        let notices = h.coordinator.handle(ControllerEvent::WorkerExited(1), h.at(2.1));
        assert!(notices.is_empty());
        assert_eq!(h.coordinator.phase(), Phase::AwaitingStart);

        let notices = h.coordinator.handle(ControllerEvent::WorkerExited(2), h.at(2.2));
        assert_eq!(Harness::finished(&notices)[0].kind, ExerciseKind::Pushup);
    }

    #[test]
    fn test_launch_clears_stale_count_and_markers() {
        let mut h = Harness::new(60);
        h.signals.write_count(ExerciseKind::Squat, 30);
        h.signals.raise(Marker::Start);
        h.signals.raise(Marker::Stop);

        h.command(UserCommand::Start(ExerciseKind::Squat), 0.0);
        assert_eq!(h.signals.read_count(ExerciseKind::Squat), 0);
        assert!(!h.signals.is_raised(Marker::Start));
        assert!(!h.signals.is_raised(Marker::Stop));
        // 開始シグナルが無いので計測は始まらない
        h.coordinator.poll(h.at(0.5));
        assert_eq!(h.coordinator.phase(), Phase::AwaitingStart);
    }

    #[test]
    fn test_worker_death_before_start_finalizes() {
        let mut h = Harness::new(60);
        h.command(UserCommand::Start(ExerciseKind::Squat), 0.0);
        h.coordinator.launcher.last().borrow_mut().alive = false;
        let notices = h.coordinator.poll(h.at(0.5));
        let reports = Harness::finished(&notices);
        assert_eq!(reports[0].trigger, CompletionTrigger::WorkerExited);
        assert_eq!(reports[0].count, 0);
    }

    #[test]
    fn test_stubborn_worker_is_killed_on_stop() {
        let mut h = Harness::new(60);
        h.coordinator.launcher.behaviour = Behaviour::Stubborn;
        h.start_timing(ExerciseKind::Squat);
        h.command(UserCommand::Stop, 1.0);
        assert_eq!(h.coordinator.launcher.last().borrow().kills, 1);
    }

    #[test]
    fn test_summary_is_pending_until_announcement_done() {
        let mut h = Harness::new(60);
        assert!(!h.coordinator.awaiting_summary());
        h.start_timing(ExerciseKind::Squat);
        h.command(UserCommand::Quit, 1.0);
        assert!(h.coordinator.awaiting_summary());

        let event = h.events.try_recv().unwrap();
        assert_eq!(h.coordinator.handle(event, h.at(1.5)), vec![Notice::SummarySpoken]);
        assert!(!h.coordinator.awaiting_summary());
    }

    #[test]
    fn test_quit_finalizes_and_cleans_markers() {
        let mut h = Harness::new(60);
        h.start_timing(ExerciseKind::Squat);
        h.signals.raise(Marker::Start);
        let notices = h.command(UserCommand::Quit, 1.0);
        assert_eq!(Harness::finished(&notices).len(), 1);
        assert_eq!(notices.last(), Some(&Notice::Quit));
        assert!(h.coordinator.should_quit());
        assert!(!h.signals.is_raised(Marker::Start));
        assert!(!h.signals.is_raised(Marker::Stop));
    }
}
