pub mod app;

pub mod analyzer;

pub mod coordinator;

pub mod records;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The external systems the claim engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    GuessLedger,
    ClaimLedger,
    PayoutGateway,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Collaborator::GuessLedger => "guess ledger",
            Collaborator::ClaimLedger => "claim ledger",
            Collaborator::PayoutGateway => "payout gateway",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{collaborator} unavailable: {source:#}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid user id '{0}'")]
    InvalidUserId(String),
}

impl Error {
    pub(crate) fn unavailable(collaborator: Collaborator) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Error::CollaboratorUnavailable {
            collaborator,
            source,
        }
    }
}
