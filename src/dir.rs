use std::sync::Arc;

use crate::{
    acc::AccountKey,
    api,
    error::{Error, Result},
    req::{http_client, req_get},
    trans::{NoncePool, Transport},
    Account,
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org";

/// Enumeration of known ACME API authorities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt authority.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt authority.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Base URL of an arbitrary authority. The directory is expected at `{url}/directory`.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    /// Maps the names `letsencrypt` and `letsencrypt-staging` (case-insensitive) to the known
    /// authorities. Anything else is taken as an authority base URL.
    pub fn parse(authority: &'a str) -> Self {
        if authority.eq_ignore_ascii_case("letsencrypt") {
            DirectoryUrl::LetsEncrypt
        } else if authority.eq_ignore_ascii_case("letsencrypt-staging") {
            DirectoryUrl::LetsEncryptStaging
        } else {
            DirectoryUrl::Other(authority)
        }
    }

    fn authority(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }

    /// The URL of the directory document.
    pub fn to_url(&self) -> String {
        format!("{}/directory", self.authority().trim_end_matches('/'))
    }
}

/// Entry point for accessing an ACME API.
///
/// Holds the fetched directory and the session's nonce pool, which is seeded during
/// [`fetch()`](Self::fetch).
#[derive(Debug, Clone)]
pub struct Directory {
    client: reqwest::Client,
    nonce_pool: Arc<NoncePool>,
    api_directory: api::Directory,
}

impl Directory {
    /// Fetches the directory using a default HTTP client.
    pub async fn fetch(url: DirectoryUrl<'_>) -> Result<Directory> {
        Self::fetch_with_client(url, http_client()?).await
    }

    /// Fetches the directory using `client` for this and all following requests.
    pub async fn fetch_with_client(
        url: DirectoryUrl<'_>,
        client: reqwest::Client,
    ) -> Result<Directory> {
        let dir_url = url.to_url();
        let fetch_err = |reason: String| Error::DirectoryFetch {
            url: dir_url.clone(),
            reason,
        };

        log::debug!("Fetch directory: {dir_url}");

        let res = req_get(&client, &dir_url)
            .await
            .map_err(|err| fetch_err(err.to_string()))?;

        if !res.status().is_success() {
            return Err(fetch_err(format!("{} body: {}", res.status(), res.body())));
        }

        let api_directory = serde_json::from_str::<api::Directory>(res.body())
            .map_err(|err| fetch_err(format!("malformed directory: {err}")))?;

        let nonce_pool = Arc::new(NoncePool::new(&api_directory.new_nonce));
        nonce_pool.seed(&client).await?;

        Ok(Directory {
            client,
            nonce_pool,
            api_directory,
        })
    }

    /// Generates a new account key and registers an account for it.
    pub async fn register_account(&self) -> Result<Account> {
        self.resolve_account(AccountKey::generate(), false).await
    }

    /// Logs in to the account previously registered for `account_key`.
    pub async fn load_account(&self, account_key: AccountKey) -> Result<Account> {
        self.resolve_account(account_key, true).await
    }

    /// Posts to newAccount, signed with the bare JWK since no key ID exists yet.
    ///
    /// With `only_return_existing` the server only looks up an existing account. For existing
    /// accounts the server returns a 200 with the `Location` header set to the key ID (kid).
    pub async fn resolve_account(
        &self,
        account_key: AccountKey,
        only_return_existing: bool,
    ) -> Result<Account> {
        let acc = api::Account::new_account_request(only_return_existing);

        let mut transport = Transport::new(
            self.client.clone(),
            Arc::clone(&self.nonce_pool),
            account_key,
        );

        let res = transport
            .call_jwk(&self.api_directory.new_account, &acc)
            .await?;

        let api_account = res.json::<api::Account>()?;
        let kid = res.expect_header("location")?;
        log::debug!("Key ID is: {kid}");

        // fill in the server returned key ID
        transport.set_key_id(kid);

        Ok(Account::new(
            transport,
            api_account,
            self.api_directory.clone(),
        ))
    }

    /// Returns a reference to the directory's API object.
    ///
    /// Useful for debugging.
    pub fn api_directory(&self) -> &api::Directory {
        &self.api_directory
    }

    #[cfg(test)]
    pub(crate) fn nonce_pool(&self) -> &NoncePool {
        &self.nonce_pool
    }
}
