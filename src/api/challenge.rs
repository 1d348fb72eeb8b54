use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Challenge`].
///
/// See [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// An ACME challenge object.
///
/// Represents a server's offer to validate a client's possession of an identifier in a specific
/// way.
///
/// See [RFC 8555 §7.1.5].
///
/// # Example JSON
///
/// ```json
/// {
///   "type": "dns-01",
///   "status": "pending",
///   "url": "https://acme-staging-v02.api.letsencrypt.org/acme/challenge/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs/216789599",
///   "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
/// }
/// ```
///
/// [RFC 8555 §7.1.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Type of challenge encoded in the object.
    #[serde(rename = "type")]
    pub _type: String,

    /// URL to which a response can be posted.
    pub url: String,

    /// Status of this challenge.
    pub status: ChallengeStatus,

    /// Time at which the server validated this challenge.
    ///
    /// Uses RFC 3339 format.
    pub validated: Option<String>,

    /// Error that occurred while the server was validating the challenge, if any.
    pub error: Option<api::Problem>,

    /// Random value that uniquely identifies the challenge.
    pub token: String,
}

impl Challenge {
    /// Challenge type proving control of a domain through a `TXT` record.
    pub const DNS_01: &'static str = "dns-01";

    /// Returns true if the challenge is of type `dns-01`.
    pub fn is_dns_01(&self) -> bool {
        self._type == Self::DNS_01
    }
}
