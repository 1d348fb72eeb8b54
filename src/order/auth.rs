use std::sync::Arc;

use sha2::{Digest as _, Sha256};

use crate::{
    acc::{AccountInner, AccountKey},
    api,
    error::{Error, Result},
    jws::Jwk,
    util::{base64url, jwk_thumbprint},
};

/// An authorization ([ownership proof]) for a domain name.
///
/// Each authorization for an order much be progressed to a valid state before the ACME API
/// will issue a certificate.
///
/// Authorizations may or may not be required depending on previous orders against the same
/// ACME account. The ACME API decides if the authorization is needed.
///
/// [ownership proof]: crate#domain-ownership
#[derive(Debug)]
pub struct Auth {
    inner: Arc<AccountInner>,
    api_auth: api::Authorization,
    auth_url: String,
}

impl Auth {
    pub(crate) fn new(
        inner: &Arc<AccountInner>,
        api_auth: api::Authorization,
        auth_url: &str,
    ) -> Self {
        Auth {
            inner: inner.clone(),
            api_auth,
            auth_url: auth_url.to_owned(),
        }
    }

    /// Domain name for this authorization.
    pub fn domain_name(&self) -> &str {
        &self.api_auth.identifier.value
    }

    /// URL this authorization was fetched from.
    pub fn url(&self) -> &str {
        &self.auth_url
    }

    /// Whether we actually need to do the authorization. This might not be needed if we have
    /// proven ownership of the domain recently in a previous order.
    pub fn need_challenge(&self) -> bool {
        !matches!(self.api_auth.status, api::AuthorizationStatus::Valid)
    }

    /// Get the dns challenge.
    ///
    /// The dns challenge is a `TXT` record that must put created under:
    ///
    /// ```text
    /// _acme-challenge.<domain-to-be-proven>.  TXT  <proof>
    /// ```
    ///
    /// Fails with [`Error::ChallengeNotFound`] if the CA did not offer `dns-01` for this
    /// identifier.
    pub fn dns_challenge(&self) -> Result<Challenge> {
        self.api_auth
            .dns_challenge()
            .map(|c| Challenge::new(&self.inner, c.clone()))
            .ok_or_else(|| Error::ChallengeNotFound {
                challenge_type: api::Challenge::DNS_01.to_owned(),
                identifier: self.domain_name().to_owned(),
            })
    }

    /// Returns a reference to the authorization's API object.
    ///
    /// Useful for debugging.
    pub fn api_auth(&self) -> &api::Authorization {
        &self.api_auth
    }
}

/// A `dns-01` challenge as obtained from the [`Auth`].
///
/// See [RFC 8555 §8.4].
///
/// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
#[derive(Debug, Clone)]
pub struct Challenge {
    inner: Arc<AccountInner>,
    api_challenge: api::Challenge,
}

impl Challenge {
    fn new(inner: &Arc<AccountInner>, api_challenge: api::Challenge) -> Self {
        Challenge {
            inner: inner.clone(),
            api_challenge,
        }
    }

    /// The CA-issued token.
    pub fn token(&self) -> &str {
        &self.api_challenge.token
    }

    /// URL the challenge response is posted to.
    pub fn url(&self) -> &str {
        &self.api_challenge.url
    }

    /// Returns true if this challenge needs validation.
    ///
    /// It might already been done in a previous order for the same account.
    pub fn need_validate(&self) -> bool {
        matches!(self.api_challenge.status, api::ChallengeStatus::Pending)
    }

    /// Returns the proof content for DNS validation.
    ///
    /// Proof is to be placed in a DNS TXT record like so:
    ///
    /// ```plain
    /// _acme-challenge.<domain-to-be-proven>.  TXT  <proof>
    /// ```
    pub fn dns_proof(&self) -> Result<String> {
        dns_record_text(self.token(), self.inner.transport.account_key())
    }

    /// Tells the CA the proof is in place. Validation then happens on the CA's side.
    pub(crate) async fn submit(&self) -> Result<api::Challenge> {
        let res = self
            .inner
            .transport
            .call_kid(&self.api_challenge.url, &api::EmptyObject)
            .await?;

        res.json::<api::Challenge>()
    }

    /// Returns a reference to the challenge's API object.
    ///
    /// Useful for debugging.
    pub fn api_challenge(&self) -> &api::Challenge {
        &self.api_challenge
    }
}

/// Key authorization: `token || '.' || base64url(JWK thumbprint)`.
///
/// See [RFC 8555 §8.1].
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub fn key_authorization(token: &str, key: &AccountKey) -> Result<String> {
    key_authorization_for(token, &key.public_jwk())
}

/// Value of the `_acme-challenge` TXT record: base64url(SHA-256(key authorization)).
pub fn dns_record_text(token: &str, key: &AccountKey) -> Result<String> {
    dns_record_text_for(token, &key.public_jwk())
}

fn key_authorization_for(token: &str, jwk: &Jwk) -> Result<String> {
    let thumb = base64url(&jwk_thumbprint(jwk)?);
    Ok(format!("{token}.{thumb}"))
}

fn dns_record_text_for(token: &str, jwk: &Jwk) -> Result<String> {
    let key_auth = key_authorization_for(token, jwk)?;
    Ok(base64url(&Sha256::digest(key_auth)))
}
