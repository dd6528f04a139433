use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Identifies an execution context (a hart running a process, or here, a thread).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) const fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static CURRENT: ContextId = ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
}

/// The id of the calling execution context. Stable for the context's lifetime.
#[must_use]
pub fn current_context() -> ContextId {
    CURRENT.with(|c| *c)
}
