use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use enclavelibc_core::errno;
use enclavelibc_core::error::result_errno;
use enclavelibc_core::host;
use enclavelibc_core::pthread::{
    Cond, CondAttr, CountingSemaphore, Mutex, RwLock, ThreadAttr, TsdKey, key_create, key_delete,
    set_specific, spawn,
};
use enclavelibc_core::{Attached, Domain, DomainConfig, HostSupervisor, ThreadResult};

struct Fixture {
    domain: Arc<Domain>,
    x: Attached,
    y: Attached,
}

struct Case {
    primitive: &'static str,
    scenario: &'static str,
    expected_errno: i32,
    run: fn(&Fixture) -> ThreadResult<()>,
}

fn workspace_root() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest.parent().unwrap().parent().unwrap().to_path_buf()
}

fn soon(clock: enclavelibc_core::ClockKind) -> enclavelibc_core::Timespec {
    host::now(clock).saturating_add(Duration::from_millis(5))
}

fn matrix_cases() -> Vec<Case> {
    vec![
        Case {
            primitive: "mutex",
            scenario: "recursive_lock_by_owner",
            expected_errno: 0,
            run: |f| {
                let m = Mutex::new();
                m.lock(&f.x)?;
                m.lock(&f.x)?;
                m.unlock(&f.x)?;
                m.unlock(&f.x)
            },
        },
        Case {
            primitive: "mutex",
            scenario: "trylock_held_by_other",
            expected_errno: errno::EBUSY,
            run: |f| {
                let m = Mutex::new();
                m.lock(&f.x)?;
                m.try_lock(&f.y)
            },
        },
        Case {
            primitive: "mutex",
            scenario: "unlock_by_non_owner",
            expected_errno: errno::EPERM,
            run: |f| {
                let m = Mutex::new();
                m.lock(&f.x)?;
                m.unlock(&f.y)
            },
        },
        Case {
            primitive: "mutex",
            scenario: "destroy_while_owned",
            expected_errno: errno::EBUSY,
            run: |f| {
                let m = Mutex::new();
                m.lock(&f.x)?;
                m.destroy()
            },
        },
        Case {
            primitive: "cond",
            scenario: "timed_wait_expires",
            expected_errno: errno::ETIMEDOUT,
            run: |f| {
                let (c, m) = (Cond::default(), Mutex::new());
                m.lock(&f.x)?;
                c.timed_wait(&f.x, &m, soon(c.clock()))
            },
        },
        Case {
            primitive: "cond",
            scenario: "wait_without_mutex",
            expected_errno: errno::EPERM,
            run: |f| Cond::default().wait(&f.x, &Mutex::new()),
        },
        Case {
            primitive: "cond",
            scenario: "attr_bad_clock",
            expected_errno: errno::EINVAL,
            run: |_| CondAttr::new().set_clock(42),
        },
        Case {
            primitive: "rwlock",
            scenario: "recursive_write",
            expected_errno: errno::EBUSY,
            run: |f| {
                let rw = RwLock::new();
                rw.write(&f.x)?;
                rw.write(&f.x)
            },
        },
        Case {
            primitive: "rwlock",
            scenario: "try_write_under_reader",
            expected_errno: errno::EBUSY,
            run: |f| {
                let rw = RwLock::new();
                rw.read(&f.x)?;
                rw.try_write(&f.y)
            },
        },
        Case {
            primitive: "rwlock",
            scenario: "unlock_unheld",
            expected_errno: errno::EPERM,
            run: |f| RwLock::new().unlock(&f.x),
        },
        Case {
            primitive: "rwlock",
            scenario: "destroy_while_read",
            expected_errno: errno::EBUSY,
            run: |f| {
                let rw = RwLock::new();
                rw.read(&f.x)?;
                rw.destroy()
            },
        },
        Case {
            primitive: "sem",
            scenario: "trywait_empty",
            expected_errno: errno::EBUSY,
            run: |_| CountingSemaphore::new(0)?.try_wait(),
        },
        Case {
            primitive: "sem",
            scenario: "timed_wait_expires",
            expected_errno: errno::ETIMEDOUT,
            run: |f| {
                let clock = enclavelibc_core::ClockKind::Monotonic;
                CountingSemaphore::new(0)?.timed_wait(&f.x, soon(clock), clock)
            },
        },
        Case {
            primitive: "sem",
            scenario: "post_then_wait",
            expected_errno: 0,
            run: |f| {
                let s = CountingSemaphore::new(0)?;
                s.post(&f.x)?;
                s.wait(&f.x)
            },
        },
        Case {
            primitive: "tsd",
            scenario: "set_reserved_key",
            expected_errno: errno::EINVAL,
            run: |f| set_specific(&f.x, TsdKey::from_raw(0), 1),
        },
        Case {
            primitive: "tsd",
            scenario: "create_then_delete",
            expected_errno: 0,
            run: |f| {
                let k = key_create(&f.domain, None)?;
                key_delete(&f.domain, k)
            },
        },
        Case {
            primitive: "thread",
            scenario: "create_without_routine",
            expected_errno: errno::EINVAL,
            run: |f| spawn(&f.x, &ThreadAttr::new(), None, 0).map(|_| ()),
        },
        Case {
            primitive: "thread",
            scenario: "bad_detach_state",
            expected_errno: errno::EINVAL,
            run: |_| ThreadAttr::new().set_detach_state(9),
        },
    ]
}

#[test]
fn contract_matrix_matches_expected_and_emits_structured_logs() {
    let root = workspace_root();
    let out_dir = root.join("target/conformance");
    fs::create_dir_all(&out_dir).expect("create target/conformance");

    let log_path = out_dir.join("primitive_contract_matrix.log.jsonl");
    let report_path = out_dir.join("primitive_contract_matrix.report.json");

    let domain =
        Domain::new(Arc::new(HostSupervisor::new()), DomainConfig::default()).expect("domain");
    let mut log_lines = Vec::new();
    let mut mismatches = Vec::new();
    let mut total = 0usize;

    for case in matrix_cases() {
        total += 1;
        // Fresh threads per case so no case inherits another's holds.
        let fixture = Fixture {
            x: domain.enter().expect("x"),
            y: domain.enter().expect("y"),
            domain: Arc::clone(&domain),
        };
        let t0 = Instant::now();
        let got = result_errno(&(case.run)(&fixture));
        let timing_ns = t0.elapsed().as_nanos();

        let ok = got == case.expected_errno;
        if !ok {
            mismatches.push(format!(
                "{}:{} expected errno {} got {}",
                case.primitive, case.scenario, case.expected_errno, got
            ));
        }
        log_lines.push(
            json!({
                "trace_id": format!("primitive-contract:{}:{}", case.primitive, case.scenario),
                "primitive": case.primitive,
                "scenario": case.scenario,
                "expected_errno": case.expected_errno,
                "errno": got,
                "timing_ns": timing_ns as u64,
                "status": if ok { "ok" } else { "mismatch" },
            })
            .to_string(),
        );
    }

    fs::write(&log_path, format!("{}\n", log_lines.join("\n"))).expect("write jsonl log");

    let report = json!({
        "ok": mismatches.is_empty(),
        "total_cases": total,
        "passed_cases": total - mismatches.len(),
        "failed_cases": mismatches.len(),
        "log_jsonl": log_path.strip_prefix(&root).unwrap_or(&log_path).to_string_lossy(),
        "mismatches": &mismatches,
    });
    fs::write(
        &report_path,
        serde_json::to_string_pretty(&report).expect("serialize report"),
    )
    .expect("write report json");

    assert!(
        mismatches.is_empty(),
        "contract matrix mismatch(es): {:?}",
        mismatches
    );
}
