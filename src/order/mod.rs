//! Order life cycle.
//!
//! An order goes through a life cycle of different states that require various actions by
//! the user. The [`Order`] façade wraps the actual [`api::Order`] and tracks where the order
//! stands from the client's point of view in an [`OrderPhase`]:
//!
//! 1. [`Created`](OrderPhase::Created): the order exists, ownership has to be proven.
//!    * [`Order`] -> [`Auth`] -> [`Challenge`]
//! 2. [`Pending`](OrderPhase::Pending): the challenge response was submitted.
//! 3. [`Finalizing`](OrderPhase::Finalizing): the CSR was submitted, the CA has not issued yet.
//! 4. [`Valid`](OrderPhase::Valid): the certificate is ready for download.
//!
//! Any of these may end in [`Invalid`](OrderPhase::Invalid) when the CA gives up on the order.
//! A failed call never moves the order to another phase.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::{
    acc::{self, AccountInner},
    api,
    cert::{Certificate, GeneratedCsr},
    error::{Error, Result},
};

mod auth;

pub use self::auth::{dns_record_text, key_authorization, Auth, Challenge};

/// Client-side phase of an [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderPhase {
    /// Order was created, no challenge submitted yet.
    Created,

    /// Challenge response submitted, waiting for the CA to validate.
    Pending,

    /// CSR submitted, waiting for the CA to issue.
    Finalizing,

    /// Certificate issued.
    Valid,

    /// The CA marked the order as invalid.
    Invalid,
}

impl OrderPhase {
    /// Phase after the CA reported `api_order`, never moving backwards.
    fn advance(self, api_order: &api::Order) -> Self {
        if self == OrderPhase::Invalid {
            return self;
        }

        let reported = match (api_order.status, &api_order.certificate) {
            (Some(api::OrderStatus::Invalid), _) => OrderPhase::Invalid,
            (Some(api::OrderStatus::Valid), Some(_)) => OrderPhase::Valid,
            (Some(api::OrderStatus::Valid | api::OrderStatus::Processing), _) => {
                OrderPhase::Finalizing
            }
            (Some(api::OrderStatus::Ready), _) => OrderPhase::Pending,
            (Some(api::OrderStatus::Pending) | None, _) => OrderPhase::Created,
        };

        self.max(reported)
    }
}

/// An order created by [`Account::new_order`].
///
/// An order is created using one or many domains (a primary `CN` and possible multiple
/// alt names). All domains in the order must have authorizations ([confirmed ownership])
/// before the order can progress to submitting a [CSR].
///
/// The ACME API provider might "remember" for a time that you already own a domain, which
/// means you might not need to prove the ownership every time. Use [`Auth::need_challenge`] to
/// first check whether you really need to handle authorizations.
///
/// [`Account::new_order`]: crate::Account::new_order
/// [confirmed ownership]: crate#domain-ownership
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
#[derive(Debug, Clone)]
pub struct Order {
    inner: Arc<AccountInner>,
    api_order: api::Order,
    url: String,
    phase: OrderPhase,
    certificate_key: Option<Zeroizing<String>>,
}

impl Order {
    pub(crate) fn new(inner: &Arc<AccountInner>, api_order: api::Order, url: String) -> Self {
        let phase = OrderPhase::Created.advance(&api_order);

        Order {
            inner: inner.clone(),
            api_order,
            url,
            phase,
            certificate_key: None,
        }
    }

    /// Where this order stands.
    pub fn phase(&self) -> OrderPhase {
        self.phase
    }

    /// The order URL as returned in the `Location` header on creation.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The primary domain name of the order.
    pub fn domain_name(&self) -> &str {
        self.api_order
            .identifiers
            .first()
            .map(|identifier| identifier.value.as_str())
            .unwrap_or_default()
    }

    /// The certificate URL, known once the CA has issued.
    pub fn certificate_url(&self) -> Option<&str> {
        self.api_order.certificate.as_deref()
    }

    /// Private key (PKCS#8 PEM) of the CSR passed to [`finalize_csr`](Self::finalize_csr).
    pub fn certificate_key(&self) -> Option<&str> {
        self.certificate_key.as_deref().map(String::as_str)
    }

    /// Fetches the authorization of the primary domain.
    pub async fn authorization(&self) -> Result<Auth> {
        let auth_url = self
            .api_order
            .first_authorization()
            .ok_or_else(|| Error::ChallengeNotFound {
                challenge_type: api::Challenge::DNS_01.to_owned(),
                identifier: self.domain_name().to_owned(),
            })?;

        self.fetch_authorization(auth_url).await
    }

    /// Provide the authorizations. The number of authorizations will be the same as
    /// the number of domains requests, i.e. at least one (the primary CN), but possibly
    /// more (for alt names).
    ///
    /// If the order includes new domain names that have not been authorized before, this
    /// list might contain a mix of already valid and not yet valid auths.
    pub async fn authorizations(&self) -> Result<Vec<Auth>> {
        let mut result = vec![];

        if let Some(authorizations) = &self.api_order.authorizations {
            for auth_url in authorizations {
                result.push(self.fetch_authorization(auth_url).await?);
            }
        }

        Ok(result)
    }

    async fn fetch_authorization(&self, auth_url: &str) -> Result<Auth> {
        let res = self.inner.transport.post_as_get(auth_url, None).await?;
        let api_auth = res.json::<api::Authorization>()?;
        Ok(Auth::new(&self.inner, api_auth, auth_url))
    }

    /// Tells the CA the challenge response is in place.
    ///
    /// Moves a freshly created order to [`OrderPhase::Pending`].
    pub async fn submit_challenge(&mut self, challenge: &Challenge) -> Result<()> {
        let api_challenge = challenge.submit().await?;
        log::debug!(
            "Challenge {} is {:?}",
            api_challenge.url,
            api_challenge.status
        );

        if self.phase == OrderPhase::Created {
            self.phase = OrderPhase::Pending;
        }

        Ok(())
    }

    /// Finalizes the order by submitting the base64url-encoded DER `csr`.
    ///
    /// Returns the certificate URL when the CA issued right away. When the CA is still
    /// processing, the order stays in [`OrderPhase::Finalizing`] and this returns
    /// [`Error::CertificateNotReady`]; call [`refresh`](Self::refresh) later to pick up the
    /// certificate URL.
    pub async fn finalize(&mut self, csr: &str) -> Result<String> {
        let finalize = api::Finalize::new(csr);

        // if the CSR is invalid, we will get a 4xx code back
        let res = self
            .inner
            .transport
            .call_kid(&self.api_order.finalize, &finalize)
            .await?;

        let api_order = res.json::<api::Order>()?;
        self.update(api_order)?;
        self.phase = self.phase.max(OrderPhase::Finalizing);

        if self.phase == OrderPhase::Invalid {
            if let Some(problem) = self.api_order.error.clone() {
                return Err(problem.into());
            }
        }

        self.certificate_url()
            .map(ToOwned::to_owned)
            .ok_or(Error::CertificateNotReady {
                status: self.api_order.status,
            })
    }

    /// Like [`finalize`](Self::finalize), keeping the CSR's private key with the order.
    ///
    /// The key is kept whatever the outcome, so a certificate issued after
    /// [`Error::CertificateNotReady`] can still be picked up with [`certificate`](Self::certificate).
    pub async fn finalize_csr(&mut self, csr: GeneratedCsr) -> Result<String> {
        self.certificate_key = Some(csr.private_key_pem);
        self.finalize(&csr.csr_der_b64url).await
    }

    /// Refresh the order state against the ACME API.
    ///
    /// RFC 8555 calls this a "POST-as-GET" against the order URL. A single request is
    /// made; polling is up to the caller.
    pub async fn refresh(&mut self) -> Result<()> {
        let res = self.inner.transport.post_as_get(&self.url, None).await?;
        let api_order = res.json::<api::Order>()?;
        self.update(api_order)
    }

    fn update(&mut self, from_api: api::Order) -> Result<()> {
        let mut api_order = self.api_order.clone();
        api_order.overwrite(from_api)?;

        self.phase = self.phase.advance(&api_order);
        self.api_order = api_order;

        log::debug!("Order {} is {:?}", self.url, self.phase);
        Ok(())
    }

    /// Request download of the issued certificate chain.
    ///
    /// Returns one PEM document per certificate, leaf first.
    pub async fn download_certificate(&self) -> Result<Vec<String>> {
        let url = self.issued_url()?;
        acc::download_certificate(&self.inner, url).await
    }

    /// Downloads the issued certificate chain and pairs it with the key kept by
    /// [`finalize_csr`](Self::finalize_csr).
    pub async fn certificate(&self) -> Result<Certificate> {
        let url = self.issued_url()?;

        let private_key_pem = self
            .certificate_key
            .clone()
            .ok_or(Error::MissingCertificateKey)?;

        let pem_chain = acc::download_certificate(&self.inner, url).await?;

        Ok(Certificate::new(private_key_pem, pem_chain.join("\n")))
    }

    fn issued_url(&self) -> Result<&str> {
        if let Some(url) = self.certificate_url() {
            return Ok(url);
        }

        match &self.api_order.error {
            Some(problem) if self.phase == OrderPhase::Invalid => Err(problem.clone().into()),
            _ => Err(Error::CertificateNotReady {
                status: self.api_order.status,
            }),
        }
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.api_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cert,
        test::{with_directory_server, with_server, CaBehavior, TestServer},
        Account, Directory, DirectoryUrl,
    };

    async fn account(server: &TestServer) -> Account {
        let dir = Directory::fetch(DirectoryUrl::Other(&server.url))
            .await
            .unwrap();
        dir.register_account().await.unwrap()
    }

    fn order_with_status(status: api::OrderStatus, certificate: Option<&str>) -> api::Order {
        api::Order {
            status: Some(status),
            certificate: certificate.map(ToOwned::to_owned),
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_advance() {
        use api::OrderStatus::*;

        let created = OrderPhase::Created;
        assert_eq!(
            created.advance(&order_with_status(Pending, None)),
            OrderPhase::Created
        );
        assert_eq!(
            created.advance(&order_with_status(Ready, None)),
            OrderPhase::Pending
        );
        assert_eq!(
            created.advance(&order_with_status(Processing, None)),
            OrderPhase::Finalizing
        );
        assert_eq!(
            created.advance(&order_with_status(Valid, Some("https://ca/cert/1"))),
            OrderPhase::Valid
        );
        assert_eq!(
            created.advance(&order_with_status(Invalid, None)),
            OrderPhase::Invalid
        );

        // never backwards
        assert_eq!(
            OrderPhase::Pending.advance(&order_with_status(Pending, None)),
            OrderPhase::Pending
        );
        assert_eq!(
            OrderPhase::Invalid.advance(&order_with_status(Valid, Some("https://ca/cert/1"))),
            OrderPhase::Invalid
        );
    }

    #[tokio::test]
    async fn test_order_life_cycle() {
        let server = with_directory_server();
        let acc = account(&server).await;

        let mut ord = acc.new_order("acme-test.example.com", &[]).await.unwrap();
        assert_eq!(ord.phase(), OrderPhase::Created);
        assert_eq!(ord.domain_name(), "acme-test.example.com");
        assert!(ord.certificate_url().is_none());

        let challenge = ord.authorization().await.unwrap().dns_challenge().unwrap();
        ord.submit_challenge(&challenge).await.unwrap();
        assert_eq!(ord.phase(), OrderPhase::Pending);
        assert_eq!(server.state.challenge_requests(), [serde_json::json!({})]);

        let csr = cert::generate_csr(ord.domain_name()).unwrap();
        let cert_url = ord.finalize(&csr.csr_der_b64url).await.unwrap();
        assert_eq!(cert_url, format!("{}/acme/cert/1", server.url));
        assert_eq!(ord.phase(), OrderPhase::Valid);
        assert_eq!(
            server.state.finalize_requests(),
            [serde_json::json!({ "csr": csr.csr_der_b64url })]
        );

        let chain = ord.download_certificate().await.unwrap();
        assert_eq!(chain, crate::test::cert_chain());

        // finalized with a bare CSR, so there is no key to pair the chain with
        assert!(ord.certificate_key().is_none());
        assert!(matches!(
            ord.certificate().await,
            Err(Error::MissingCertificateKey)
        ));
    }

    #[tokio::test]
    async fn test_finalize_before_issuance() {
        let server = with_server(CaBehavior {
            certificate_pending: true,
            ..Default::default()
        });
        let acc = account(&server).await;
        let mut ord = acc.new_order("acme-test.example.com", &[]).await.unwrap();

        let csr = cert::generate_csr(ord.domain_name()).unwrap();
        let err = ord.finalize(&csr.csr_der_b64url).await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::CertificateNotReady {
                    status: Some(api::OrderStatus::Processing)
                }
            ),
            "{err}"
        );
        assert_eq!(ord.phase(), OrderPhase::Finalizing);

        assert!(matches!(
            ord.download_certificate().await,
            Err(Error::CertificateNotReady { .. })
        ));

        // the CA issues in the meantime
        ord.refresh().await.unwrap();
        assert_eq!(ord.phase(), OrderPhase::Valid);
        assert_eq!(
            ord.certificate_url(),
            Some(format!("{}/acme/cert/1", server.url).as_str())
        );
    }

    #[tokio::test]
    async fn test_rejected_finalize_keeps_phase() {
        let server = with_server(CaBehavior {
            reject_csr: true,
            ..Default::default()
        });
        let acc = account(&server).await;
        let mut ord = acc.new_order("acme-test.example.com", &[]).await.unwrap();

        let challenge = ord.authorization().await.unwrap().dns_challenge().unwrap();
        ord.submit_challenge(&challenge).await.unwrap();

        let csr = cert::generate_csr(ord.domain_name()).unwrap();
        match ord.finalize(&csr.csr_der_b64url).await.unwrap_err() {
            Error::AcmeProtocol {
                status,
                problem_type,
                ..
            } => {
                assert_eq!(status, 403);
                assert_eq!(problem_type, "urn:ietf:params:acme:error:unauthorized");
            }
            err => panic!("unexpected error: {err}"),
        }

        assert_eq!(ord.phase(), OrderPhase::Pending);
    }
}
