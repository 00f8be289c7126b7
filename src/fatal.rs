//! Unrecoverable error category.
//!
//! A corrupted pool free-list or a failed accelerator call leaves state that
//! cannot be continued past in place. Errors in that category implement
//! [`Fatal`]; the top level hands them to [`terminate`] instead of treating
//! them like the recoverable results (pool exhaustion, unknown job types).

use tracing::error;

/// Exit status after a pool invariant violation.
pub const POOL_CORRUPTED_EXIT: i32 = 5;
/// Exit status after a device open, buffer acquisition or access failure.
pub const ACCELERATOR_EXIT: i32 = 1;
/// Exit status when hardware FFT dispatch is requested but unavailable.
pub const FFT_UNSUPPORTED_EXIT: i32 = 2;
/// Exit status when hardware Viterbi dispatch is requested but unavailable.
pub const VITERBI_UNSUPPORTED_EXIT: i32 = 3;

/// An error that must terminate the process.
pub trait Fatal: std::error::Error {
    /// Process exit status used by [`terminate`].
    fn exit_code(&self) -> i32;
}

/// Log `err` and exit the process with its exit status. Never returns.
pub fn terminate(err: &dyn Fatal) -> ! {
    error!(error = %err, code = err.exit_code(), "fatal error, terminating");
    std::process::exit(err.exit_code())
}
