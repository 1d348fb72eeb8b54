use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    acc::AccountKey,
    error::{Error, Result},
    jws::{self, JwsProtectedHeader, Payload},
    req::{req_head, req_post, AcmeResponse},
};

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against newAccount url
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `call_kid()` / `post_as_get()` for all calls after that.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    client: reqwest::Client,
    account_key: AccountKey,

    /// Account URL, set once we contacted the ACME API to figure out the key ID.
    key_id: Option<String>,

    nonce_pool: Arc<NoncePool>,
}

impl Transport {
    pub fn new(
        client: reqwest::Client,
        nonce_pool: Arc<NoncePool>,
        account_key: AccountKey,
    ) -> Self {
        Transport {
            client,
            account_key,
            key_id: None,
            nonce_pool,
        }
    }

    /// Update the key ID once it is known (part of setting up the transport).
    pub fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid);
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// The key used in the transport.
    pub fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    /// Make call using the full JWK.
    ///
    /// Only needed for the newAccount request.
    pub async fn call_jwk<T>(&self, url: &str, body: &T) -> Result<AcmeResponse>
    where
        T: Serialize + ?Sized,
    {
        let payload = Payload::json(body)?;
        let jwk = self.account_key.public_jwk();

        self.do_call(url, &payload, None, |nonce| {
            JwsProtectedHeader::new_jwk(jwk.clone(), url, nonce)
        })
        .await
    }

    /// Make call using the key ID.
    pub async fn call_kid<T>(&self, url: &str, body: &T) -> Result<AcmeResponse>
    where
        T: Serialize + ?Sized,
    {
        let payload = Payload::json(body)?;
        self.call_kid_payload(url, &payload, None).await
    }

    /// POST-as-GET using the key ID, see [RFC 8555 §6.3].
    ///
    /// [RFC 8555 §6.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.3
    pub async fn post_as_get(&self, url: &str, accept: Option<&str>) -> Result<AcmeResponse> {
        self.call_kid_payload(url, &Payload::Empty, accept).await
    }

    async fn call_kid_payload(
        &self,
        url: &str,
        payload: &Payload,
        accept: Option<&str>,
    ) -> Result<AcmeResponse> {
        let kid = self.key_id.as_deref().ok_or(Error::AccountNotResolved)?;

        self.do_call(url, payload, accept, |nonce| {
            JwsProtectedHeader::new_kid(kid, url, nonce)
        })
        .await
    }

    async fn do_call<F>(
        &self,
        url: &str,
        payload: &Payload,
        accept: Option<&str>,
        make_header: F,
    ) -> Result<AcmeResponse>
    where
        F: Fn(String) -> JwsProtectedHeader,
    {
        // A rejected nonce is retried exactly once, using the nonce handed out with the error.
        let mut retried = false;

        loop {
            let nonce = self.nonce_pool.take_nonce(&self.client).await?;

            let protected = make_header(nonce);
            let jws = jws::sign(&self.account_key, &protected, payload)?;
            let body = serde_json::to_string(&jws)?;

            log::debug!("Call endpoint: {url}");

            let res = req_post(&self.client, url, body, accept).await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.extract_nonce(&res);

            if let Some(problem) = res.problem() {
                if problem.is_bad_nonce() && !retried {
                    log::debug!("Retrying on bad nonce");
                    retried = true;
                    continue;
                }

                return Err(problem.into());
            }

            return Ok(res);
        }
    }
}

/// Holder of the single current anti-replay nonce.
///
/// A nonce is taken out of the pool when it is used, so it can never be sent twice.
#[derive(Default, Debug)]
pub(crate) struct NoncePool {
    nonce_url: String,
    current: Mutex<Option<String>>,
}

impl NoncePool {
    pub fn new(nonce_url: &str) -> Self {
        NoncePool {
            nonce_url: nonce_url.to_owned(),
            ..Default::default()
        }
    }

    /// HEAD request against newNonce. Used to seed the pool and whenever it runs dry.
    pub async fn fetch_nonce(&self, client: &reqwest::Client) -> Result<String> {
        log::debug!("Request new nonce");
        let res = req_head(client, &self.nonce_url).await?;

        res.header(REPLAY_NONCE)
            .filter(|nonce| is_valid_nonce(nonce))
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                Error::Nonce(format!(
                    "no valid Replay-Nonce header from {} ({})",
                    self.nonce_url,
                    res.status()
                ))
            })
    }

    /// Fetch a nonce and store it as the current one.
    pub async fn seed(&self, client: &reqwest::Client) -> Result<()> {
        let nonce = self.fetch_nonce(client).await?;
        *self.current.lock() = Some(nonce);
        Ok(())
    }

    pub(crate) fn extract_nonce(&self, res: &AcmeResponse) {
        match res.header(REPLAY_NONCE) {
            Some(nonce) if is_valid_nonce(nonce) => {
                log::trace!("Extracting new nonce");
                *self.current.lock() = Some(nonce.to_owned());
            }

            // see https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
            Some(nonce) => log::debug!("Ignoring invalid replay-nonce: {nonce:?}"),

            None => {}
        }
    }

    async fn take_nonce(&self, client: &reqwest::Client) -> Result<String> {
        let current = self.current.lock().take();

        if let Some(nonce) = current {
            log::trace!("Use current nonce");
            return Ok(nonce);
        }

        self.fetch_nonce(client).await
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Option<String> {
        self.current.lock().clone()
    }
}

const REPLAY_NONCE: &str = "replay-nonce";

/// Nonces are base64url octet strings without padding.
fn is_valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use reqwest::{
        header::{HeaderMap, HeaderValue},
        StatusCode,
    };

    use super::*;

    fn response_with_nonce(nonce: &'static str) -> AcmeResponse {
        let mut headers = HeaderMap::new();
        headers.insert(REPLAY_NONCE, HeaderValue::from_static(nonce));
        AcmeResponse::new(StatusCode::OK, headers, String::new())
    }

    #[test]
    fn test_valid_nonce() {
        assert!(is_valid_nonce("8_uBBV3N2DBRJczhoiB46ugJKUkUHxGzVe6xIMpjHFM"));
        assert!(!is_valid_nonce(""));
        assert!(!is_valid_nonce("abc="));
        assert!(!is_valid_nonce("a+b/c"));
    }

    #[test]
    fn test_extract_replaces_current_nonce() {
        let pool = NoncePool::new("http://127.0.0.1/new-nonce");

        pool.extract_nonce(&response_with_nonce("first"));
        assert_eq!(pool.current().as_deref(), Some("first"));

        pool.extract_nonce(&response_with_nonce("second"));
        assert_eq!(pool.current().as_deref(), Some("second"));

        pool.extract_nonce(&response_with_nonce("bad=nonce"));
        assert_eq!(pool.current().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_take_consumes_nonce() {
        let pool = NoncePool::new("http://127.0.0.1/new-nonce");
        pool.extract_nonce(&response_with_nonce("once"));

        let client = reqwest::Client::new();
        assert_eq!(pool.take_nonce(&client).await.unwrap(), "once");
        assert!(pool.current().is_none());
    }
}
