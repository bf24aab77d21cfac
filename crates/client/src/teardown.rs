//! Session teardown hooks.

/// Cleanup invoked when the session transitions back to anonymous.
///
/// Holders of session-scoped resources (background cache refreshes, watch
/// intervals) register themselves with the session guard, which calls
/// `teardown` exactly once per teardown.
pub trait TeardownHook: Send + Sync {
    fn teardown(&self);
}
