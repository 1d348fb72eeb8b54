use std::{collections::HashSet, iter, sync::Arc};

use crate::{
    api,
    cert::split_pem_chain,
    error::{Error, Result},
    jws::PrivateJwk,
    order::Order,
    req::CONTENT_TYPE_PEM_CHAIN,
    trans::Transport,
};

mod account_key;

pub use self::account_key::AccountKey;

#[derive(Debug, Clone)]
pub(crate) struct AccountInner {
    pub transport: Transport,
    pub api_account: api::Account,
    pub api_directory: api::Directory,
}

/// Account with an ACME provider.
///
/// Accounts are created using [`Directory::register_account()`] or resolved from an existing key
/// using [`Directory::load_account()`].
///
/// This library uses elliptic curve P-256 for accessing the account.
///
/// [`Directory::register_account()`]: crate::Directory::register_account()
/// [`Directory::load_account()`]: crate::Directory::load_account()
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        api_account: api::Account,
        api_directory: api::Directory,
    ) -> Self {
        Self {
            inner: Arc::new(AccountInner {
                transport,
                api_account,
                api_directory,
            }),
        }
    }

    /// The CA-assigned account URL, used as `kid` in every request after account creation.
    pub fn account_url(&self) -> &str {
        // set by `Directory::resolve_account` before an `Account` is handed out
        self.inner.transport.key_id().unwrap_or_default()
    }

    /// Key signing this account's requests.
    pub fn account_key(&self) -> &AccountKey {
        self.inner.transport.account_key()
    }

    /// Exports the account key (public and private members) for reuse in a later session.
    pub fn export_jwk(&self) -> PrivateJwk {
        self.account_key().export_jwk()
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// Each order has a required `primary_name` (which will be set as the certificates `CN`) and a
    /// variable number of `alt_names`. Duplicate names are dropped, ignoring ASCII case.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain names
    /// supplied are exactly the same.
    pub async fn new_order(&self, primary_name: &str, alt_names: &[&str]) -> Result<Order> {
        let mut identifiers = Vec::new();
        let mut dedup = HashSet::new();
        for domain in iter::once(primary_name).chain(alt_names.iter().copied()) {
            if dedup.insert(domain.to_ascii_lowercase()) {
                identifiers.push(api::Identifier::dns(domain));
            }
        }

        let mut order = api::Order::from_identifiers(identifiers);

        let new_order_url = self.inner.api_directory.new_order.as_str();

        let res = self.inner.transport.call_kid(new_order_url, &order).await?;
        let api_order = res.json::<api::Order>()?;
        let order_url = res.expect_header("location")?;

        order.overwrite(api_order)?;
        Ok(Order::new(&self.inner, order, order_url))
    }

    /// Downloads the certificate chain issued at `certificate_url`.
    ///
    /// Returns one PEM document per certificate, leaf first.
    pub async fn download_certificate(&self, certificate_url: &str) -> Result<Vec<String>> {
        download_certificate(&self.inner, certificate_url).await
    }

    /// Returns a reference to the account's API object.
    ///
    /// Useful for debugging.
    pub fn api_account(&self) -> &api::Account {
        &self.inner.api_account
    }
}

pub(crate) async fn download_certificate(
    inner: &AccountInner,
    certificate_url: &str,
) -> Result<Vec<String>> {
    let res = inner
        .transport
        .post_as_get(certificate_url, Some(CONTENT_TYPE_PEM_CHAIN))
        .await?;

    let chain = split_pem_chain(res.body())?;
    if chain.is_empty() {
        return Err(Error::Pem("no certificates in response".to_owned()));
    }

    Ok(chain)
}
