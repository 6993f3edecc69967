use crate::core::pacing::PacingError;
use crate::post::race_results::ResultsError;
use helpers::general::InputValueError;

/// Errors a race can end with. Transport problems, stalled racers and timeouts are handled
/// inside the race and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    /// Appending the outcome failed, the caller has to tear down the observer session.
    #[error("results store failure: {0}")]
    ResultsStore(#[from] ResultsError),

    #[error("invalid race configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    InvalidInput(#[from] InputValueError),

    #[error("invalid pacing for racer {racer}: {source}")]
    Pacing { racer: String, source: PacingError },

    #[error("failed to spawn racer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("race has already been run")]
    AlreadyRun,
}
