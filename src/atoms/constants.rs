// ── Skiff Atoms: Constants ─────────────────────────────────────────────────
// Shared numeric and string constants for the engine.

/// Maximum persisted length of a tool result, in bytes. Anything longer is
/// cut at a char boundary and suffixed with [`TRUNCATION_SUFFIX`] by the
/// agent loop before the tool message is appended.
pub const MAX_TOOL_RESULT_BYTES: usize = 10_000;

/// Marker appended to truncated tool results.
pub const TRUNCATION_SUFFIX: &str = "\n... (truncated)";

/// Iteration cap for a single agent-loop invocation.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Wall-clock limit for a single tool execution.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Timeout for one chat-completions round trip.
pub const PROVIDER_TIMEOUT_SECS: u64 = 60;

/// Cadence at which the event stream re-reads chat state.
pub const EVENT_POLL_INTERVAL_MS: u64 = 1_000;

/// Titles are the first N chars of the first user message.
pub const TITLE_MAX_CHARS: usize = 100;
