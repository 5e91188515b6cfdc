//! ## keel-core::selftest
//! **On-target check that accounting and the violation detector are live**
//!
//! Runs a short allocation workload in a scope per pool and verifies the
//! scope accessors, then provokes the temporary stack violations with the
//! skip countdown armed so they are observed without terminating.

use std::ptr::NonNull;

use keel_config::DiagnosticLevel;
use serde::Serialize;
use tracing::{info, warn};

use crate::alloc::{round_up, PoolId};
use crate::scope::ThreadContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelfTestReport {
    pub checks: Vec<CheckOutcome>,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    fn record(&mut self, name: String, result: Result<(), String>) {
        let (passed, detail) = match result {
            Ok(()) => (true, "ok".to_string()),
            Err(detail) => (false, detail),
        };
        if passed {
            info!(check = %name, "selftest passed");
        } else {
            warn!(check = %name, %detail, "selftest failed");
        }
        self.checks.push(CheckOutcome {
            name,
            passed,
            detail,
        });
    }
}

const FIRST: usize = 100;
const SECOND: usize = 200;

fn ensure(condition: bool, detail: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(detail())
    }
}

fn expected_bytes() -> u64 {
    (round_up(FIRST).unwrap_or(FIRST) + round_up(SECOND).unwrap_or(SECOND)) as u64
}

/// Runs every check on the calling thread's context.
pub fn run(ctx: &ThreadContext) -> SelfTestReport {
    let mut report = SelfTestReport::default();
    if !ctx.manager().is_enabled() {
        report.record(
            "manager_enabled".into(),
            Err("memory manager is disabled".into()),
        );
        return report;
    }

    for pool in PoolId::ALL {
        report.record(format!("accounting_{}", pool), check_accounting(ctx, pool));
    }

    if ctx.manager().checks_active() {
        let diagnostics = ctx.manager().diagnostics();
        let saved = diagnostics.pending_skips();
        let result = check_stack_violations(ctx);
        diagnostics.skip_next(saved);
        report.record("temporary_stack_violations".into(), result);
    } else {
        info!("checks inactive at this release tier; violation checks skipped");
    }
    report
}

fn check_accounting(ctx: &ThreadContext, pool: PoolId) -> Result<(), String> {
    let manager = ctx.manager();
    let (start_count, start_bytes);
    {
        let scope = ctx.enter_scope(pool);
        start_count = scope.total_allocation_count();
        start_bytes = scope.total_bytes_allocated();

        let first = ctx.allocate(FIRST).map_err(|e| e.to_string())?;
        let second = ctx.allocate(SECOND).map_err(|e| e.to_string())?;
        // SAFETY: both blocks are at least this large.
        unsafe {
            first.as_ptr().write_bytes(0x33, FIRST);
            second.as_ptr().write_bytes(0x33, SECOND);
        }

        ensure(scope.scope_allocation_count() == 2, || {
            format!("scope count {} != 2", scope.scope_allocation_count())
        })?;
        ensure(scope.previous_allocation_count() == start_count, || {
            "previous count moved".into()
        })?;
        ensure(scope.total_allocation_count() == start_count + 2, || {
            "total count mismatch".into()
        })?;
        ensure(scope.scope_bytes_allocated() == expected_bytes(), || {
            format!("scope bytes {} != {}", scope.scope_bytes_allocated(), expected_bytes())
        })?;
        ensure(scope.previous_bytes_allocated() == start_bytes, || {
            "previous bytes moved".into()
        })?;

        // Quiet release: the permanent pool would otherwise flag it.
        let was_shutting_down = manager.is_shutting_down();
        manager.set_shutting_down(true);
        let released = release_pair(ctx, second, first);
        manager.set_shutting_down(was_shutting_down);
        released?;

        ensure(scope.total_allocation_count() == start_count + 2, || {
            "cumulative count decreased after release".into()
        })?;
    }

    if pool != PoolId::Permanent {
        let scope = ctx.enter_scope(pool);
        ensure(scope.previous_allocation_count() == start_count + 2, || {
            "baseline of next scope does not include released blocks".into()
        })?;
        ensure(scope.previous_bytes_allocated() == start_bytes + expected_bytes(), || {
            "baseline bytes of next scope mismatch".into()
        })?;
    }
    Ok(())
}

fn release_pair(ctx: &ThreadContext, a: NonNull<u8>, b: NonNull<u8>) -> Result<(), String> {
    // SAFETY: both were allocated on this context's manager and not yet released.
    unsafe {
        ctx.release(a).map_err(|e| e.to_string())?;
        ctx.release(b).map_err(|e| e.to_string())
    }
}

fn check_stack_violations(ctx: &ThreadContext) -> Result<(), String> {
    let diagnostics = ctx.manager().diagnostics();
    let leak_detection = ctx.manager().diagnostic_level() == DiagnosticLevel::LeakDetection;
    let second;
    {
        let _scope = ctx.enter_scope(PoolId::TemporaryStack);
        let first = ctx.allocate(FIRST).map_err(|e| e.to_string())?;
        second = ctx.allocate(SECOND).map_err(|e| e.to_string())?;

        diagnostics.skip_next(1);
        // SAFETY: allocated above; releasing below the top is the point.
        let _ = unsafe { ctx.release(first) };
        ensure(diagnostics.pending_skips() == 0, || {
            "out-of-order release not detected".into()
        })?;

        // Only `first` was released, so leaving the scope must leak `second`.
        if leak_detection {
            diagnostics.skip_next(1);
        }
    }
    ensure(diagnostics.pending_skips() == 0, || "scope leak not detected".into())?;

    diagnostics.skip_next(1);
    // SAFETY: the block came from this manager; its scope is closed.
    let _ = unsafe { ctx.release(second) };
    ensure(diagnostics.pending_skips() == 0, || {
        "release after scope closed not detected".into()
    })
}
