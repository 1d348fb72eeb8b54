use serde::{Deserialize, Serialize};

/// Names a subject of an order or authorization.
///
/// Only `dns` identifiers are ever created by this crate.
///
/// See [RFC 8555 §9.7.7].
///
/// [RFC 8555 §9.7.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-9.7.7
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub(crate) fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    /// Whether both name the same subject. Domain names compare without regard to ASCII case.
    pub(crate) fn matches(&self, other: &Identifier) -> bool {
        self._type == other._type && self.value.eq_ignore_ascii_case(&other.value)
    }
}
