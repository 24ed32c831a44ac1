/// Where the most recent send is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendState {
    #[default]
    Idle,
    /// Request issued, no byte received yet.
    Awaiting,
    Receiving,
    PollingFallback,
    Finalized,
    Stopped,
    Errored,
}

/// How a single `send_message` call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// No thread was selected or the text was blank.
    Rejected,
    Finalized,
    Stopped,
    /// The stream closed without a single byte.
    EmptyStream,
    /// Nothing arrived before the first-byte timer fired.
    TimedOut,
    /// Reconciliation polling hit its deadline; the placeholder is left as is.
    Unresolved,
    /// The thread changed underneath the operation, results were dropped.
    Stale,
    Misconfigured,
}
