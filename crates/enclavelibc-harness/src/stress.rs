//! Invariant-checking stress scenarios.
//!
//! Each scenario gets a fresh domain over its own [`HostSupervisor`], so the
//! supervisor round-trip counts in a report belong to that scenario alone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use enclavelibc_core::host::SupervisorStats;
use enclavelibc_core::pthread::{
    Cond, CountingSemaphore, Mutex, RwLock, ThreadAttr, join, spawn_with,
};
use enclavelibc_core::{Domain, DomainConfig, HostSupervisor, ThreadError};

use crate::HarnessError;
use crate::structured_log::{LogEmitter, LogLevel, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Recursive mutex: never two holders.
    Mutex,
    /// Reader-writer lock: never a reader alongside a writer.
    Rwlock,
    /// Counting semaphore: completions never outrun posts.
    Semaphore,
    /// Two threads alternating turns through a condition variable.
    CondPingPong,
    /// Spawn/join churn over the descriptor arena.
    SpawnJoin,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Mutex,
        Scenario::Rwlock,
        Scenario::Semaphore,
        Scenario::CondPingPong,
        Scenario::SpawnJoin,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Scenario::Mutex => "mutex",
            Scenario::Rwlock => "rwlock",
            Scenario::Semaphore => "semaphore",
            Scenario::CondPingPong => "cond_ping_pong",
            Scenario::SpawnJoin => "spawn_join",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    pub threads: usize,
    pub iterations: usize,
    pub domain: DomainConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            iterations: 500,
            domain: DomainConfig::default(),
        }
    }
}

impl StressConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.threads == 0 || self.iterations == 0 {
            return Err(HarnessError::InvalidConfig(
                "threads and iterations must be non-zero".to_string(),
            ));
        }
        // Every worker plus the driving thread needs a descriptor.
        if self.threads >= self.domain.max_threads {
            return Err(HarnessError::InvalidConfig(format!(
                "{} threads need more than {} descriptors",
                self.threads, self.domain.max_threads
            )));
        }
        self.domain.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub threads: usize,
    pub iterations: usize,
    pub operations: u64,
    pub violations: u64,
    pub elapsed_ms: u64,
    #[serde(skip_deserializing)]
    pub supervisor: SupervisorStats,
}

impl ScenarioReport {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.violations == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub ok: bool,
    pub config: StressConfig,
    pub scenarios: Vec<ScenarioReport>,
}

// ---------------------------------------------------------------------------
// Runners
// ---------------------------------------------------------------------------

struct Tally {
    operations: AtomicU64,
    violations: AtomicU64,
}

impl Tally {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            operations: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        })
    }

    fn op(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    fn violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }
}

type Worker = std::thread::JoinHandle<Result<(), ThreadError>>;

fn join_workers(scenario: Scenario, workers: Vec<Worker>) -> Result<(), HarnessError> {
    for w in workers {
        w.join()
            .map_err(|_| HarnessError::WorkerPanicked(scenario.name()))??;
    }
    Ok(())
}

pub fn run_scenario(scenario: Scenario, cfg: &StressConfig) -> Result<ScenarioReport, HarnessError> {
    cfg.validate()?;
    let host = Arc::new(HostSupervisor::new());
    let domain = Domain::new(host.clone(), cfg.domain)?;
    let tally = Tally::new();
    info!(
        "{}: {} threads x {} iterations",
        scenario.name(),
        cfg.threads,
        cfg.iterations
    );

    let started = Instant::now();
    match scenario {
        Scenario::Mutex => mutex(&domain, cfg, &tally)?,
        Scenario::Rwlock => rwlock(&domain, cfg, &tally)?,
        Scenario::Semaphore => semaphore(&domain, cfg, &tally)?,
        Scenario::CondPingPong => cond_ping_pong(&domain, cfg, &tally)?,
        Scenario::SpawnJoin => spawn_join(&domain, cfg, &tally)?,
    }
    let report = ScenarioReport {
        scenario,
        threads: cfg.threads,
        iterations: cfg.iterations,
        operations: tally.operations.load(Ordering::Relaxed),
        violations: tally.violations.load(Ordering::Relaxed),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        supervisor: host.stats(),
    };
    if !report.ok() {
        warn!("{}: {} violations", scenario.name(), report.violations);
    }
    Ok(report)
}

/// Runs `scenarios` in order, logging a start and an end record for each.
pub fn run_suite(
    scenarios: &[Scenario],
    cfg: &StressConfig,
    log: &mut LogEmitter,
) -> Result<SuiteReport, HarnessError> {
    let mut reports = Vec::with_capacity(scenarios.len());
    for &scenario in scenarios {
        log.emit(LogLevel::Info, "scenario_start", |e| {
            e.with_scenario(scenario.name())
        })?;
        match run_scenario(scenario, cfg) {
            Ok(report) => {
                let details = serde_json::to_value(&report)?;
                let (level, outcome) = if report.ok() {
                    (LogLevel::Info, Outcome::Pass)
                } else {
                    (LogLevel::Error, Outcome::Fail)
                };
                log.emit(level, "scenario_end", |e| {
                    e.with_scenario(scenario.name())
                        .with_outcome(outcome)
                        .with_duration_ms(report.elapsed_ms)
                        .with_details(details)
                })?;
                reports.push(report);
            }
            Err(err) => {
                let errno = match &err {
                    HarnessError::Thread(e) => Some(e.errno()),
                    _ => None,
                };
                log.emit(LogLevel::Error, "scenario_end", |e| {
                    let e = e
                        .with_scenario(scenario.name())
                        .with_outcome(Outcome::Error)
                        .with_details(serde_json::json!({ "error": err.to_string() }));
                    match errno {
                        Some(code) => e.with_errno(code),
                        None => e,
                    }
                })?;
                log.flush()?;
                return Err(err);
            }
        }
    }
    log.flush()?;
    Ok(SuiteReport {
        ok: reports.iter().all(ScenarioReport::ok),
        config: cfg.clone(),
        scenarios: reports,
    })
}

fn mutex(domain: &Arc<Domain>, cfg: &StressConfig, tally: &Arc<Tally>) -> Result<(), HarnessError> {
    let m = Arc::new(Mutex::new());
    let holders = Arc::new(AtomicUsize::new(0));
    let workers = (0..cfg.threads)
        .map(|i| {
            let (d, m, holders, tally) = (domain.clone(), m.clone(), holders.clone(), tally.clone());
            let iterations = cfg.iterations;
            std::thread::spawn(move || -> Result<(), ThreadError> {
                let me = d.enter()?;
                for n in 0..iterations {
                    m.lock(&me)?;
                    let nested = (n + i) % 4 == 0;
                    if nested {
                        m.lock(&me)?;
                    }
                    if holders.fetch_add(1, Ordering::SeqCst) != 0 {
                        tally.violation();
                    }
                    holders.fetch_sub(1, Ordering::SeqCst);
                    if nested {
                        m.unlock(&me)?;
                    }
                    m.unlock(&me)?;
                    tally.op();
                }
                Ok(())
            })
        })
        .collect();
    join_workers(Scenario::Mutex, workers)?;
    m.destroy()?;
    Ok(())
}

fn rwlock(domain: &Arc<Domain>, cfg: &StressConfig, tally: &Arc<Tally>) -> Result<(), HarnessError> {
    let rw = Arc::new(RwLock::new());
    let readers_in = Arc::new(AtomicUsize::new(0));
    let writer_in = Arc::new(AtomicBool::new(false));
    let workers = (0..cfg.threads)
        .map(|i| {
            let (d, rw, readers_in, writer_in, tally) = (
                domain.clone(),
                rw.clone(),
                readers_in.clone(),
                writer_in.clone(),
                tally.clone(),
            );
            let iterations = cfg.iterations;
            std::thread::spawn(move || -> Result<(), ThreadError> {
                let me = d.enter()?;
                for n in 0..iterations {
                    if (n + i) % 4 == 0 {
                        rw.write(&me)?;
                        if writer_in.swap(true, Ordering::SeqCst)
                            || readers_in.load(Ordering::SeqCst) != 0
                        {
                            tally.violation();
                        }
                        writer_in.store(false, Ordering::SeqCst);
                    } else {
                        rw.read(&me)?;
                        readers_in.fetch_add(1, Ordering::SeqCst);
                        if writer_in.load(Ordering::SeqCst) {
                            tally.violation();
                        }
                        readers_in.fetch_sub(1, Ordering::SeqCst);
                    }
                    rw.unlock(&me)?;
                    tally.op();
                }
                Ok(())
            })
        })
        .collect();
    join_workers(Scenario::Rwlock, workers)?;
    rw.destroy()?;
    Ok(())
}

fn semaphore(
    domain: &Arc<Domain>,
    cfg: &StressConfig,
    tally: &Arc<Tally>,
) -> Result<(), HarnessError> {
    const INITIAL: u32 = 2;
    let sem = Arc::new(CountingSemaphore::new(INITIAL)?);
    let posts = Arc::new(AtomicUsize::new(0));
    let taken = Arc::new(AtomicUsize::new(0));
    let workers = (0..cfg.threads)
        .map(|_| {
            let (d, sem, posts, taken, tally) = (
                domain.clone(),
                sem.clone(),
                posts.clone(),
                taken.clone(),
                tally.clone(),
            );
            let iterations = cfg.iterations;
            std::thread::spawn(move || -> Result<(), ThreadError> {
                let me = d.enter()?;
                for _ in 0..iterations {
                    sem.wait(&me)?;
                    let done = taken.fetch_add(1, Ordering::SeqCst) + 1;
                    if done > posts.load(Ordering::SeqCst) + INITIAL as usize {
                        tally.violation();
                    }
                    tally.op();
                }
                Ok(())
            })
        })
        .collect::<Vec<_>>();

    let producer = domain.enter()?;
    let total = cfg.threads * cfg.iterations;
    let needed = total.saturating_sub(INITIAL as usize);
    for n in 0..needed {
        posts.fetch_add(1, Ordering::SeqCst);
        sem.post(&producer)?;
        if n % 32 == 0 {
            std::thread::yield_now();
        }
    }
    join_workers(Scenario::Semaphore, workers)?;
    let left = usize::try_from(sem.value()).unwrap_or(usize::MAX);
    if taken.load(Ordering::SeqCst) != total || left != (INITIAL as usize).saturating_sub(total) {
        tally.violation();
    }
    sem.destroy()?;
    Ok(())
}

fn cond_ping_pong(
    domain: &Arc<Domain>,
    cfg: &StressConfig,
    tally: &Arc<Tally>,
) -> Result<(), HarnessError> {
    let m = Arc::new(Mutex::new());
    let c = Arc::new(Cond::default());
    // Whose turn it is; only touched with `m` held.
    let turn = Arc::new(AtomicUsize::new(0));
    let workers = (0..2usize)
        .map(|side| {
            let (d, m, c, turn, tally) = (
                domain.clone(),
                m.clone(),
                c.clone(),
                turn.clone(),
                tally.clone(),
            );
            let iterations = cfg.iterations;
            std::thread::spawn(move || -> Result<(), ThreadError> {
                let me = d.enter()?;
                for _ in 0..iterations {
                    m.lock(&me)?;
                    while turn.load(Ordering::SeqCst) != side {
                        c.wait(&me, &m)?;
                    }
                    if !m.is_owned_by(&me) {
                        tally.violation();
                    }
                    turn.store(1 - side, Ordering::SeqCst);
                    c.broadcast(&me)?;
                    m.unlock(&me)?;
                    tally.op();
                }
                Ok(())
            })
        })
        .collect();
    join_workers(Scenario::CondPingPong, workers)?;
    c.destroy()?;
    m.destroy()?;
    Ok(())
}

fn spawn_join(
    domain: &Arc<Domain>,
    cfg: &StressConfig,
    tally: &Arc<Tally>,
) -> Result<(), HarnessError> {
    let main = domain.enter()?;
    for round in 0..cfg.iterations {
        let mut spawned = Vec::with_capacity(cfg.threads);
        for i in 0..cfg.threads {
            let expected = round * cfg.threads + i;
            match spawn_with(&main, &ThreadAttr::new(), move |_| Ok(expected)) {
                Ok(h) => spawned.push((h, expected)),
                // Joined workers give their descriptors back on their own schedule.
                Err(ThreadError::OutOfMemory) => break,
                Err(e) => return Err(e.into()),
            }
        }
        for (h, expected) in spawned {
            if join(&main, h)? != expected {
                tally.violation();
            }
            tally.op();
        }
    }
    Ok(())
}
