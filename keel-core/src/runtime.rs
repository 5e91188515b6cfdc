//! ## keel-core::runtime
//! **Process-wide access point**
//!
//! The manager is created once by [`init`] and lives for the rest of the
//! process. Each thread reaches it through [`with_context`], which lazily
//! creates that thread's [`ThreadContext`]. Scope guards borrow the
//! context, so they cannot escape the closure.

use std::sync::Arc;

use keel_config::MemoryConfig;
use once_cell::sync::OnceCell;
use once_cell::unsync::OnceCell as LocalCell;

use crate::error::RuntimeError;
use crate::manager::MemoryManager;
use crate::scope::ThreadContext;

static MANAGER: OnceCell<Arc<MemoryManager>> = OnceCell::new();

thread_local! {
    static CONTEXT: LocalCell<ThreadContext> = const { LocalCell::new() };
}

/// Creates the process-wide manager from configuration.
pub fn init(config: &MemoryConfig) -> Result<Arc<MemoryManager>, RuntimeError> {
    install(MemoryManager::new(config))
}

/// Installs a pre-built manager, e.g. one with a custom failure handler.
pub fn install(manager: MemoryManager) -> Result<Arc<MemoryManager>, RuntimeError> {
    let manager = Arc::new(manager);
    MANAGER
        .set(Arc::clone(&manager))
        .map_err(|_| RuntimeError::AlreadyInitialized)?;
    Ok(manager)
}

pub fn manager() -> Result<&'static Arc<MemoryManager>, RuntimeError> {
    MANAGER.get().ok_or(RuntimeError::NotInitialized)
}

pub fn is_initialized() -> bool {
    MANAGER.get().is_some()
}

/// Runs `f` with this thread's context.
pub fn with_context<R>(f: impl FnOnce(&ThreadContext) -> R) -> Result<R, RuntimeError> {
    let manager = manager()?;
    Ok(CONTEXT.with(|cell| f(cell.get_or_init(|| ThreadContext::new(Arc::clone(manager))))))
}

/// Suppresses checks, logs the final pool report and disables bookkeeping.
pub fn shutdown() -> Result<(), RuntimeError> {
    manager()?.shutdown();
    Ok(())
}
