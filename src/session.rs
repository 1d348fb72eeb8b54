use crate::{
    acc::{Account, AccountKey},
    cert::{generate_csr, Certificate},
    dir::{Directory, DirectoryUrl},
    error::Result,
    jws::PrivateJwk,
    order::{Order, OrderPhase},
    req::http_client,
};

/// Name of the TXT record proving control over a domain, relative to that domain.
pub const DNS_RECORD_NAME: &str = "_acme-challenge";

/// What has to be published in DNS before the order can be finalized.
#[derive(Debug)]
pub struct DnsChallenge {
    /// Always [`DNS_RECORD_NAME`].
    pub record_name: &'static str,

    /// Value of the TXT record.
    pub record_text: String,

    /// The order waiting on this challenge.
    pub order: Order,
}

impl DnsChallenge {
    /// Fully qualified name of the TXT record, e.g. `_acme-challenge.example.com`.
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.record_name, self.order.domain_name())
    }
}

/// An issued certificate together with its freshly generated private key.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// Where the CA published the certificate.
    pub certificate_url: String,

    /// Certificate chain, one PEM document per certificate, leaf first.
    pub pem_chain: Vec<String>,

    pub certificate: Certificate,
}

/// One account on one ACME provider, driving DNS-01 issuance.
///
/// ```no_run
/// # async fn run() -> acme::Result<()> {
/// use acme::{DirectoryUrl, Session};
///
/// let session = Session::connect(DirectoryUrl::LetsEncryptStaging, None).await?;
/// let mut challenge = session.request_dns_challenge("example.com").await?;
///
/// println!("{} TXT {}", challenge.fqdn(), challenge.record_text);
/// // ... publish the record and wait for it to propagate ...
///
/// let issued = session
///     .submit_dns_challenge_and_finalize(&mut challenge.order)
///     .await?;
/// println!("{}", issued.certificate.certificate());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Session {
    directory: Directory,
    account: Account,
}

impl Session {
    /// Fetches the directory and resolves the account.
    ///
    /// Without `account_key` a new key is generated and a new account registered. With a key, the
    /// account previously registered for it is looked up.
    pub async fn connect(url: DirectoryUrl<'_>, account_key: Option<AccountKey>) -> Result<Self> {
        Self::connect_with_client(url, account_key, http_client()?).await
    }

    /// Like [`connect`](Self::connect), using `client` for all requests.
    pub async fn connect_with_client(
        url: DirectoryUrl<'_>,
        account_key: Option<AccountKey>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let directory = Directory::fetch_with_client(url, client).await?;

        let account = match account_key {
            Some(key) => directory.load_account(key).await?,
            None => directory.register_account().await?,
        };

        log::info!("Using account {}", account.account_url());

        Ok(Session { directory, account })
    }

    /// Creates an order for `domain_name` and returns the TXT record to publish.
    pub async fn request_dns_challenge(&self, domain_name: &str) -> Result<DnsChallenge> {
        let order = self.account.new_order(domain_name, &[]).await?;

        let challenge = order.authorization().await?.dns_challenge()?;
        let record_text = challenge.dns_proof()?;

        log::info!("Publish {DNS_RECORD_NAME}.{domain_name} TXT {record_text}");

        Ok(DnsChallenge {
            record_name: DNS_RECORD_NAME,
            record_text,
            order,
        })
    }

    /// Tells the CA the TXT record is in place, finalizes the order with a fresh CSR and
    /// downloads the certificate.
    ///
    /// No polling happens in between. If the CA is not done validating or issuing,
    /// this fails and `order` reflects how far it got. The certificate key generated for the
    /// CSR stays with `order` (see [`Order::certificate_key`]), and calling this again with
    /// the same order picks up where it stopped: the challenge is submitted once and the
    /// order is finalized once.
    pub async fn submit_dns_challenge_and_finalize(
        &self,
        order: &mut Order,
    ) -> Result<IssuedCertificate> {
        if order.phase() < OrderPhase::Finalizing {
            let auth = order.authorization().await?;

            if order.phase() == OrderPhase::Created {
                let challenge = auth.dns_challenge()?;
                order.submit_challenge(&challenge).await?;
            }

            let csr = generate_csr(auth.domain_name())?;
            order.finalize_csr(csr).await?;
        } else if order.phase() == OrderPhase::Finalizing {
            order.refresh().await?;
        }

        let certificate = order.certificate().await?;
        let pem_chain = certificate.pem_chain()?;

        let certificate_url = order.certificate_url().unwrap_or_default().to_owned();
        log::info!("Certificate issued at {certificate_url}");

        Ok(IssuedCertificate {
            certificate_url,
            pem_chain,
            certificate,
        })
    }

    /// Exports the account key so a later session can reuse the account.
    pub fn export_jwk(&self) -> PrivateJwk {
        self.account.export_jwk()
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }
}
