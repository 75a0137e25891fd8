use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

/// Error taxonomy of the bot core.
///
/// Handler-local gateway failures are caught and logged inside the tick so
/// the loop can retry; `Invariant` is the only fatal variant and terminates
/// the symbol's loop.
#[derive(Debug, Error)]
pub enum BotError {
    /// Network or auth failure talking to the exchange. The current tick
    /// aborts and is retried on the next one.
    #[error("exchange gateway unavailable: {0}")]
    Gateway(String),

    /// A remembered order id is no longer open on the exchange.
    #[error("stale order reference: {0}")]
    StaleOrder(String),

    /// Degenerate risk inputs, e.g. the stop price equals the average entry
    /// price. Construction aborts, no orders are placed.
    #[error("degenerate risk inputs: {0}")]
    DegenerateRisk(String),

    /// No persisted ladder record matches the given identifier.
    #[error("no stored ladder for identifier {0}")]
    ModelNotFound(String),

    /// A state the loop must not guess its way out of.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}
