//! Speech and background music.
//!
//! Speech is fire-and-forget: `SpeechService` owns one background thread that
//! drains a FIFO of utterances. Callers never block on it; they get an
//! `Announcement` handle to poll for completion when they care.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use crate::config::AudioConfig;
use crate::log;
use crate::logging::Logger;
use crate::session::ExerciseKind;

/// Completion handle of a queued utterance.
#[derive(Clone, Debug)]
pub struct Announcement {
    done: Arc<AtomicBool>,
}

impl Announcement {
    pub fn pending() -> Self {
        Self {
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn finished() -> Self {
        Self {
            done: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn mark_finished(&self) {
        self.done.store(true, Ordering::Release);
    }
}

/// Sink for spoken cues, injected into whatever needs to talk.
pub trait Announcer {
    fn announce(&self, text: &str) -> Announcement;

    /// Like `announce`, then runs `then` once the text has been spoken (or
    /// dropped). Use it to post an event back to the caller's own queue.
    fn announce_then(&self, text: &str, then: Box<dyn FnOnce() + Send>) -> Announcement {
        let announcement = self.announce(text);
        then();
        announcement
    }

    /// Short audible cue (e.g. a counted rep).
    fn chime(&self) {}
}

/// Something that can actually produce speech. Calls block until done.
pub trait SpeechEngine: Send {
    fn speak(&mut self, text: &str) -> Result<()>;

    fn chime(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs an external TTS command with the text as its last argument.
pub struct CommandEngine {
    argv: Vec<String>,
}

impl CommandEngine {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            bail!("empty speech command");
        }
        Ok(Self { argv })
    }
}

impl SpeechEngine for CommandEngine {
    fn speak(&mut self, text: &str) -> Result<()> {
        let status = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("failed to run {}", self.argv[0]))?;
        if !status.success() {
            bail!("{} exited with {}", self.argv[0], status);
        }
        Ok(())
    }

    fn chime(&mut self) -> Result<()> {
        use std::io::Write;
        // 端末ベル
        let mut err = std::io::stderr();
        err.write_all(b"\x07")?;
        err.flush()?;
        Ok(())
    }
}

/// No TTS configured: utterances are only logged.
pub struct LogEngine {
    logger: Logger,
}

impl SpeechEngine for LogEngine {
    fn speak(&mut self, text: &str) -> Result<()> {
        log!(self.logger, "[speech] {}", text);
        Ok(())
    }
}

pub type EngineFactory = Box<dyn Fn() -> Result<Box<dyn SpeechEngine>> + Send>;

enum Job {
    Speak {
        text: String,
        done: Announcement,
        then: Option<Box<dyn FnOnce() + Send>>,
    },
    Chime,
}

/// Owned speech handle. Dropping it closes the queue; the thread exits once
/// the remaining utterances are spoken.
pub struct SpeechService {
    tx: mpsc::Sender<Job>,
}

impl SpeechService {
    pub fn from_config(config: &AudioConfig, logger: Logger) -> Self {
        let argv = config.speech_command.clone();
        let engine_logger = logger.clone();
        let factory: EngineFactory = if argv.is_empty() {
            Box::new(move || {
                Ok(Box::new(LogEngine {
                    logger: engine_logger.clone(),
                }) as Box<dyn SpeechEngine>)
            })
        } else {
            Box::new(move || {
                Ok(Box::new(CommandEngine::new(argv.clone())?) as Box<dyn SpeechEngine>)
            })
        };
        Self::start(factory, logger)
    }

    /// The factory is called lazily, and again after any engine failure.
    pub fn start(factory: EngineFactory, logger: Logger) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::spawn(move || {
            let mut engine: Option<Box<dyn SpeechEngine>> = None;
            for job in rx {
                if engine.is_none() {
                    match factory() {
                        Ok(e) => engine = Some(e),
                        Err(e) => log!(logger, "[speech] engine init failed: {e:#}"),
                    }
                }
                match job {
                    Job::Speak { text, done, then } => {
                        if let Some(e) = engine.as_mut() {
                            if let Err(err) = e.speak(&text) {
                                // 失敗した発話は捨てる。次の発話でエンジンを作り直す
                                log!(logger, "[speech] failed to speak {:?}: {err:#}", text);
                                engine = None;
                            }
                        }
                        done.mark_finished();
                        if let Some(callback) = then {
                            callback();
                        }
                    }
                    Job::Chime => {
                        if let Some(e) = engine.as_mut() {
                            if let Err(err) = e.chime() {
                                log!(logger, "[speech] chime failed: {err:#}");
                            }
                        }
                    }
                }
            }
        });
        Self { tx }
    }

    fn enqueue(&self, text: &str, then: Option<Box<dyn FnOnce() + Send>>) -> Announcement {
        let done = Announcement::pending();
        let job = Job::Speak {
            text: text.to_string(),
            done: done.clone(),
            then,
        };
        if let Err(mpsc::SendError(job)) = self.tx.send(job) {
            // スレッドが落ちている: 待たせないよう完了扱い
            if let Job::Speak { done, then, .. } = job {
                done.mark_finished();
                if let Some(callback) = then {
                    callback();
                }
            }
        }
        done
    }
}

impl Announcer for SpeechService {
    fn announce(&self, text: &str) -> Announcement {
        self.enqueue(text, None)
    }

    /// `then` runs on the speech thread.
    fn announce_then(&self, text: &str, then: Box<dyn FnOnce() + Send>) -> Announcement {
        self.enqueue(text, Some(then))
    }

    fn chime(&self) {
        let _ = self.tx.send(Job::Chime);
    }
}

/// Looping background track per exercise, played by an external player.
pub struct BackgroundMusic {
    command: Vec<String>,
    squat_track: Option<PathBuf>,
    pushup_track: Option<PathBuf>,
    player: Option<Child>,
    logger: Logger,
}

impl BackgroundMusic {
    pub fn from_config(config: &AudioConfig, logger: Logger) -> Self {
        Self {
            command: config.music_command.clone(),
            squat_track: config.squat_music.clone(),
            pushup_track: config.pushup_music.clone(),
            player: None,
            logger,
        }
    }

    /// Best effort: a missing player or track just means silence.
    pub fn play(&mut self, kind: ExerciseKind) {
        self.stop();
        let track = match kind {
            ExerciseKind::Squat => self.squat_track.as_ref(),
            ExerciseKind::Pushup => self.pushup_track.as_ref(),
        };
        let (Some(program), Some(track)) = (self.command.first(), track) else {
            return;
        };
        if !track.exists() {
            log!(self.logger, "[music] track not found: {}", track.display());
            return;
        }
        match Command::new(program)
            .args(&self.command[1..])
            .arg(track)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => self.player = Some(child),
            Err(e) => log!(self.logger, "[music] failed to start {}: {e}", program),
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.player.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for BackgroundMusic {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct ScriptedEngine {
        spoken: Arc<Mutex<Vec<String>>>,
        fail_on: &'static str,
    }

    impl SpeechEngine for ScriptedEngine {
        fn speak(&mut self, text: &str) -> Result<()> {
            if text == self.fail_on {
                bail!("device lost");
            }
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn wait_until(deadline: Duration, mut f: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        f()
    }

    #[test]
    fn test_fifo_order_and_reinit_after_failure() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let inits = Arc::new(Mutex::new(0usize));
        let (s, i) = (spoken.clone(), inits.clone());
        let factory: EngineFactory = Box::new(move || {
            *i.lock().unwrap() += 1;
            Ok(Box::new(ScriptedEngine {
                spoken: s.clone(),
                fail_on: "two",
            }) as Box<dyn SpeechEngine>)
        });
        let service = SpeechService::start(factory, Logger::stderr_only());

        service.announce("one");
        service.announce("two");
        let last = service.announce("three");

        assert!(wait_until(Duration::from_secs(2), || last.is_finished()));
        // 失敗した "two" は再試行されない
        assert_eq!(*spoken.lock().unwrap(), vec!["one", "three"]);
        assert_eq!(*inits.lock().unwrap(), 2);
    }

    #[test]
    fn test_announce_then_runs_callback_after_speaking() {
        let (tx, rx) = mpsc::channel();
        let service = SpeechService::from_config(&AudioConfig::default(), Logger::stderr_only());
        let handle = service.announce_then(
            "Completed 12 squats",
            Box::new(move || {
                let _ = tx.send("done");
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok("done"));
        assert!(handle.is_finished());
    }

    #[test]
    fn test_music_without_player_is_silent() {
        let mut music =
            BackgroundMusic::from_config(&AudioConfig::default(), Logger::stderr_only());
        music.play(ExerciseKind::Squat);
        assert!(music.player.is_none());
        music.stop();
    }
}
