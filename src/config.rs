//! Interpreter tunables.

/// Maximum number of map functions fused into a single node.
///
/// Fusing composes the transform functions instead of allocating a wrapper
/// node per `map`, but each fused function adds one native stack frame when
/// the composition is finally applied. Past this depth a fresh node is
/// allocated so per-node application cost stays bounded.
pub const FUSION_DEPTH_LIMIT: u32 = 127;

/// Number of synchronous suspension resumptions allowed before the
/// continuation is rescheduled through the trampoline.
///
/// Bounds native stack depth across chained effect boundaries that the
/// interpreter loop itself does not control.
pub const TRAMPOLINE_THRESHOLD: u32 = 127;
