#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use cachedag::exec::{ActionContext, TaskAction};

#[derive(Debug, Default)]
struct LogState {
    started: Vec<String>,
    finished: Vec<String>,
    running: BTreeSet<String>,
    /// Highest number of actions running at once while each task ran.
    peak_during: BTreeMap<String, usize>,
    peak: usize,
    /// Tasks that had finished when each task started.
    finished_at_start: BTreeMap<String, Vec<String>>,
}

/// Shared record of which actions ran, in what order, and how many ran at once.
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    inner: Arc<Mutex<LogState>>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self, task: &str) {
        let mut state = self.inner.lock().unwrap();
        state.started.push(task.to_string());
        let finished = state.finished.clone();
        state.finished_at_start.insert(task.to_string(), finished);
        state.running.insert(task.to_string());
        let now = state.running.len();
        state.peak = state.peak.max(now);
        let running: Vec<String> = state.running.iter().cloned().collect();
        for name in running {
            let peak = state.peak_during.entry(name).or_insert(0);
            *peak = (*peak).max(now);
        }
    }

    fn end(&self, task: &str) {
        let mut state = self.inner.lock().unwrap();
        state.running.remove(task);
        state.finished.push(task.to_string());
    }

    /// Task names in the order their actions started.
    pub fn started(&self) -> Vec<String> {
        self.inner.lock().unwrap().started.clone()
    }

    /// Task names in the order their actions returned.
    pub fn finished(&self) -> Vec<String> {
        self.inner.lock().unwrap().finished.clone()
    }

    pub fn runs_of(&self, task: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .started
            .iter()
            .filter(|t| t.as_str() == task)
            .count()
    }

    pub fn ran(&self, task: &str) -> bool {
        self.runs_of(task) > 0
    }

    pub fn peak_concurrency(&self) -> usize {
        self.inner.lock().unwrap().peak
    }

    /// Most actions observed running at once while `task` was running.
    pub fn peak_concurrency_during(&self, task: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .peak_during
            .get(task)
            .copied()
            .unwrap_or(0)
    }

    /// Position of `task` in the start order.
    pub fn start_index(&self, task: &str) -> Option<usize> {
        self.started().iter().position(|t| t == task)
    }

    pub fn finish_index(&self, task: &str) -> Option<usize> {
        self.finished().iter().position(|t| t == task)
    }

    /// Whether `earlier` had already finished when `later` started.
    pub fn finished_before_start(&self, earlier: &str, later: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .finished_at_start
            .get(later)
            .is_some_and(|done| done.iter().any(|t| t == earlier))
    }
}

#[derive(Debug, Clone)]
enum Behaviour {
    Succeed,
    Fail(String),
    Panic,
    WaitForCancel,
}

/// Configurable action that logs itself into an [`ActionLog`].
#[derive(Debug, Clone)]
pub struct RecordingAction {
    name: String,
    identity: String,
    log: ActionLog,
    sleep: Duration,
    writes: Vec<(PathBuf, Vec<u8>)>,
    behaviour: Behaviour,
}

impl RecordingAction {
    pub fn new(name: &str, log: &ActionLog) -> Self {
        Self {
            name: name.to_string(),
            identity: format!("recording:{name}"),
            log: log.clone(),
            sleep: Duration::ZERO,
            writes: Vec::new(),
            behaviour: Behaviour::Succeed,
        }
    }

    pub fn identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.sleep = duration;
        self
    }

    /// Write `contents` to `path` (relative to the project root) when run.
    pub fn writes(mut self, path: &str, contents: &str) -> Self {
        self.writes.push((PathBuf::from(path), contents.as_bytes().to_vec()));
        self
    }

    pub fn fails(mut self, message: &str) -> Self {
        self.behaviour = Behaviour::Fail(message.to_string());
        self
    }

    pub fn panics(mut self) -> Self {
        self.behaviour = Behaviour::Panic;
        self
    }

    /// Block until the run is cancelled (or five seconds pass), then error.
    pub fn waits_for_cancel(mut self) -> Self {
        self.behaviour = Behaviour::WaitForCancel;
        self
    }

    pub fn boxed(self) -> Arc<dyn TaskAction> {
        Arc::new(self)
    }
}

impl TaskAction for RecordingAction {
    fn run(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        self.log.begin(&self.name);
        let result = self.run_inner(ctx);
        self.log.end(&self.name);
        result
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }
}

impl RecordingAction {
    fn run_inner(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        if !self.sleep.is_zero() {
            std::thread::sleep(self.sleep);
        }
        match &self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Fail(message) => bail!("{message}"),
            Behaviour::Panic => panic!("action {} panicked", self.name),
            Behaviour::WaitForCancel => {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !ctx.is_cancelled() {
                    if Instant::now() > deadline {
                        bail!("{} was never cancelled", self.name);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                ctx.check_cancelled()?;
            }
        }
        for (path, contents) in &self.writes {
            let target = ctx.root_dir().join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, contents).with_context(|| format!("writing {target:?}"))?;
        }
        Ok(())
    }
}

/// Reads one file and writes its upper-cased content to another, counting runs.
#[derive(Debug, Clone)]
pub struct UppercaseAction {
    from: PathBuf,
    to: PathBuf,
    runs: Arc<Mutex<usize>>,
}

impl UppercaseAction {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: PathBuf::from(from),
            to: PathBuf::from(to),
            runs: Arc::new(Mutex::new(0)),
        }
    }

    /// Shared counter of how often the action actually ran.
    pub fn runs(&self) -> Arc<Mutex<usize>> {
        self.runs.clone()
    }
}

impl TaskAction for UppercaseAction {
    fn run(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        *self.runs.lock().unwrap() += 1;
        let source = std::fs::read_to_string(ctx.root_dir().join(&self.from))
            .with_context(|| format!("reading {:?}", self.from))?;
        let target = ctx.root_dir().join(&self.to);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, source.to_uppercase())?;
        Ok(())
    }

    fn identity(&self) -> String {
        format!("uppercase:{}->{}", self.from.display(), self.to.display())
    }
}

/// Read how many times an action ran from its shared counter.
pub fn count(runs: &Arc<Mutex<usize>>) -> usize {
    *runs.lock().unwrap()
}
