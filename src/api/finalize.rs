use serde::{Deserialize, Serialize};

/// Payload of the finalize request, carrying the signed CSR.
///
/// See [RFC 8555 §7.4].
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    /// Certificate Signing Request (CSR) in base64url-encoded DER, without padding.
    ///
    /// Not PEM: there are no armor lines and no line breaks.
    pub csr: String,
}

impl Finalize {
    pub(crate) fn new(csr_der_b64url: &str) -> Self {
        Self {
            csr: csr_der_b64url.to_owned(),
        }
    }
}
