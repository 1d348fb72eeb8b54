use crate::api::Problem;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while talking to an ACME provider.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The directory could not be fetched or did not decode.
    #[error("failed to fetch directory from {url}: {reason}")]
    DirectoryFetch { url: String, reason: String },

    /// No usable `Replay-Nonce` header was returned.
    #[error("nonce error: {0}")]
    Nonce(String),

    /// The ACME provider answered with an RFC 7807 problem document.
    #[error("ACME problem {status} ({problem_type}): {detail}")]
    AcmeProtocol {
        status: u16,
        problem_type: String,
        detail: String,
    },

    #[error("failed to sign request: {0}")]
    Signing(#[source] ecdsa::Error),

    #[error("failed to generate key pair: {0}")]
    KeyGeneration(String),

    #[error("no {challenge_type} challenge offered for {identifier}")]
    ChallengeNotFound {
        challenge_type: String,
        identifier: String,
    },

    /// A request needing the account URL (`kid`) was made before the account was resolved.
    #[error("account URL is not known yet")]
    AccountNotResolved,

    #[error("invalid key material: {0}")]
    KeyFormat(String),

    #[error("failed to build CSR: {0}")]
    Csr(String),

    /// Finalize was accepted but the order has no certificate URL yet.
    #[error("certificate not ready, order status is {status:?}")]
    CertificateNotReady {
        status: Option<crate::api::OrderStatus>,
    },

    /// The order was finalized with a CSR whose private key it does not hold.
    #[error("certificate private key is not known for this order")]
    MissingCertificateKey,

    /// The CA returned an order for different identifiers than requested.
    #[error("order identifier mismatch: requested {requested:?}, got {returned:?}")]
    OrderMismatch {
        requested: Vec<crate::api::Identifier>,
        returned: Vec<crate::api::Identifier>,
    },

    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid PEM certificate chain: {0}")]
    Pem(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if the CA rejected the request nonce.
    pub fn is_bad_nonce(&self) -> bool {
        matches!(self, Error::AcmeProtocol { problem_type, .. } if Problem::type_is_bad_nonce(problem_type))
    }
}

impl From<Problem> for Error {
    fn from(problem: Problem) -> Self {
        Error::AcmeProtocol {
            status: problem.status.unwrap_or_default(),
            detail: problem.detail.unwrap_or_default(),
            problem_type: problem._type,
        }
    }
}
