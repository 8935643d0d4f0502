//! Invocation-level failures.
//!
//! Any of these aborts the current invocation. None of them aborts the sweep: the sweep loop
//! logs the failure and moves on to the next parameter combination.

use failure_derive::Fail;

/// Why an invocation did not produce results.
#[derive(Debug, Fail)]
pub enum InvocationError {
    /// A configuration substitution or build command failed on some server.
    #[fail(
        display = "configuration push failed on {}: `{}`: {}",
        server, command, cause
    )]
    ConfigurationPush {
        server: String,
        command: String,
        cause: String,
    },

    /// The derived configuration could not be computed.
    #[fail(display = "invalid configuration for {}: {}", server, reason)]
    Configuration { server: String, reason: String },

    /// A benchmark process could not be started.
    #[fail(display = "failed to launch on {}: `{}`: {}", server, command, cause)]
    Launch {
        server: String,
        command: String,
        cause: String,
    },

    /// Not every process reported readiness in time.
    #[fail(
        display = "barrier timed out after {:?}: {} of {} processes ready, waiting on {}",
        timeout, ready, total, waiting
    )]
    BarrierTimeout {
        timeout: std::time::Duration,
        ready: usize,
        total: usize,
        /// `server (node N)` for each process that never signalled.
        waiting: String,
    },

    /// A process closed its output without ever reporting readiness.
    #[fail(
        display = "node {} on {} exited before becoming ready: `{}`",
        node, server, command
    )]
    ExitedBeforeReady {
        server: String,
        node: usize,
        command: String,
    },

    /// A process exited with a non-zero code after release.
    #[fail(
        display = "node {} on {} exited with code {}: `{}`",
        node, server, exit, command
    )]
    Process {
        server: String,
        node: usize,
        command: String,
        exit: i32,
    },

    /// A telemetry value could not be reduced.
    #[fail(display = "node {} on {}: {}", node, server, cause)]
    Extraction {
        server: String,
        node: usize,
        cause: ExtractionError,
    },
}

/// A captured field value that cannot be folded under its reduction.
#[derive(Debug, Clone, PartialEq, Fail)]
#[fail(
    display = "field `{}` captured non-numeric value {:?} for a {} reduction",
    field, value, reduction
)]
pub struct ExtractionError {
    pub field: String,
    pub value: String,
    pub reduction: &'static str,
}

/// A field-extraction rule that cannot be used.
#[derive(Debug, Clone, PartialEq, Fail)]
pub enum SchemaError {
    #[fail(display = "invalid pattern {:?}: {}", pattern, cause)]
    BadPattern { pattern: String, cause: String },

    #[fail(
        display = "pattern {:?} must have exactly one named capture group, found {}",
        pattern, found
    )]
    CaptureGroups { pattern: String, found: usize },

    #[fail(display = "field `{}` is declared more than once", field)]
    Duplicate { field: String },
}
