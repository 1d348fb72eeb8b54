use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Order`].
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// An ACME order object.
///
/// Represents a client's request for a certificate and is used to track the progress of that order
/// through to issuance.
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "pending",
///   "expires": "2019-01-09T08:26:43.570360537Z",
///   "identifiers": [
///     {
///       "type": "dns",
///       "value": "acmetest.algesten.se"
///     }
///   ],
///   "authorizations": [
///     "https://example.com/acme/authz/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs"
///   ],
///   "finalize": "https://example.com/acme/finalize/7738992/18234324"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    pub identifiers: Vec<api::Identifier>,

    /// Requested value of the `notBefore` field of the certificate.
    ///
    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,

    /// Requested value of the `notAfter` field of the certificate.
    ///
    /// Uses RFC 3339 format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<api::Problem>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorizations: Option<Vec<String>>,

    /// URL that a CSR must be POSTed to once all of the order's authorizations are satisfied.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finalize: String,

    /// URL for the certificate that has been issued in response to this order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl Order {
    pub(crate) fn from_identifiers(identifiers: Vec<api::Identifier>) -> Self {
        Self {
            identifiers,
            ..Default::default()
        }
    }

    /// Returns the first authorization URL, which belongs to the primary identifier.
    pub fn first_authorization(&self) -> Option<&str> {
        self.authorizations
            .as_ref()
            .and_then(|authorizations| authorizations.first())
            .map(String::as_str)
    }

    /// Returns all domains associated with this order.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect()
    }

    // Let's Encrypt was observed to return domains in alternate order which
    // may flip primary with SAN(s).
    //
    // This overwrites self without changing the order of the domains. CAs may also return
    // the domains lower-cased.
    pub(crate) fn overwrite(&mut self, mut from_api: Self) -> crate::Result<()> {
        // Make sure the lists are the same.
        if from_api.identifiers.len() != self.identifiers.len()
            || from_api
                .identifiers
                .iter()
                .any(|id| !self.identifiers.iter().any(|ours| ours.matches(id)))
        {
            return Err(crate::Error::OrderMismatch {
                requested: self.identifiers.clone(),
                returned: from_api.identifiers,
            });
        }
        // Then preserve the original order.
        from_api.identifiers = std::mem::take(&mut self.identifiers);
        *self = from_api;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_order_payload() {
        let order = Order::from_identifiers(vec![api::Identifier::dns("example.com")]);
        let json = serde_json::to_string(&order).unwrap();
        assert_eq!(json, r#"{"identifiers":[{"type":"dns","value":"example.com"}]}"#);
    }

    #[test]
    fn test_overwrite_keeps_requested_order() {
        let mut order = Order::from_identifiers(vec![
            api::Identifier::dns("a.example.com"),
            api::Identifier::dns("b.example.com"),
        ]);

        let from_api = Order {
            status: Some(OrderStatus::Pending),
            identifiers: vec![
                api::Identifier::dns("b.example.com"),
                api::Identifier::dns("a.example.com"),
            ],
            finalize: "https://ca/finalize/1".to_owned(),
            ..Default::default()
        };

        order.overwrite(from_api).unwrap();
        assert_eq!(order.domains(), ["a.example.com", "b.example.com"]);
        assert_eq!(order.finalize, "https://ca/finalize/1");
    }

    #[test]
    fn test_overwrite_accepts_lower_cased_identifiers() {
        let mut order = Order::from_identifiers(vec![api::Identifier::dns("Example.COM")]);

        let from_api = Order {
            status: Some(OrderStatus::Pending),
            identifiers: vec![api::Identifier::dns("example.com")],
            ..Default::default()
        };

        order.overwrite(from_api).unwrap();
        assert_eq!(order.domains(), ["Example.COM"]);
        assert_eq!(order.status, Some(OrderStatus::Pending));
    }

    #[test]
    fn test_overwrite_rejects_foreign_identifiers() {
        let mut order = Order::from_identifiers(vec![api::Identifier::dns("a.example.com")]);

        let from_api = Order {
            identifiers: vec![api::Identifier::dns("c.example.com")],
            ..Default::default()
        };

        assert!(matches!(
            order.overwrite(from_api),
            Err(crate::Error::OrderMismatch { .. })
        ));
    }
}
