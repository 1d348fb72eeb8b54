use std::time::Duration;

use reqwest::{header::HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    api::Problem,
    error::{Error, Result},
};

pub(crate) const CONTENT_TYPE_JOSE: &str = "application/jose+json";
pub(crate) const CONTENT_TYPE_PROBLEM: &str = "application/problem+json";
pub(crate) const CONTENT_TYPE_PEM_CHAIN: &str = "application/pem-certificate-chain";

/// HTTP client used when the caller does not supply one.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(30))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub(crate) async fn req_get(client: &reqwest::Client, url: &str) -> Result<AcmeResponse> {
    log::trace!("GET {url}");
    let res = client.get(url).send().await?;
    Ok(AcmeResponse::read(res).await)
}

pub(crate) async fn req_head(client: &reqwest::Client, url: &str) -> Result<AcmeResponse> {
    log::trace!("HEAD {url}");
    let res = client.head(url).send().await?;
    Ok(AcmeResponse::read(res).await)
}

pub(crate) async fn req_post(
    client: &reqwest::Client,
    url: &str,
    body: String,
    accept: Option<&str>,
) -> Result<AcmeResponse> {
    log::trace!("POST {url} {body}");

    let mut req = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_JOSE)
        .body(body);

    if let Some(accept) = accept {
        req = req.header(reqwest::header::ACCEPT, accept);
    }

    let res = req.send().await?;
    Ok(AcmeResponse::read(res).await)
}

/// Fully read response from the ACME API.
#[derive(Debug)]
pub(crate) struct AcmeResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl AcmeResponse {
    async fn read(res: reqwest::Response) -> Self {
        let status = res.status();
        let headers = res.headers().clone();

        // letsencrypt sometimes closes the TLS abruptly causing io error
        // even though we did capture the body.
        let body = res.text().await.unwrap_or_default();

        AcmeResponse {
            status,
            headers,
            body,
        }
    }

    #[cfg(test)]
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: String) -> Self {
        AcmeResponse {
            status,
            headers,
            body,
        }
    }

    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub(crate) fn expect_header(&self, name: &'static str) -> Result<String> {
        self.header(name)
            .map(ToOwned::to_owned)
            .ok_or(Error::MissingHeader(name))
    }

    pub(crate) fn body(&self) -> &str {
        &self.body
    }

    /// Returns the problem document for unsuccessful responses.
    pub(crate) fn problem(&self) -> Option<Problem> {
        // ok responses pass through
        if self.status.is_success() {
            return None;
        }

        let mut problem = match serde_json::from_str::<Problem>(&self.body) {
            Ok(problem) => problem,

            Err(err) if self.is_problem_json() => Problem {
                _type: "problemJsonFail".to_owned(),
                detail: Some(format!(
                    "Failed to deserialize {CONTENT_TYPE_PROBLEM} ({err}) body: {}",
                    self.body
                )),
                ..Default::default()
            },

            Err(_) => Problem {
                _type: "httpReqError".to_owned(),
                detail: Some(format!("{} body: {}", self.status, self.body)),
                ..Default::default()
            },
        };

        problem.status.get_or_insert(self.status.as_u16());

        Some(problem)
    }

    /// Decodes the body into the endpoint's success schema.
    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T> {
        log::debug!("{}", self.body);
        parse_body(&self.body)
    }

    fn is_problem_json(&self) -> bool {
        self.header(reqwest::header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with(CONTENT_TYPE_PROBLEM))
    }
}

/// Parses `body` as `T`, falling back to an RFC 7807 problem document.
///
/// A body that is not a `T` but is a problem with `status >= 400` becomes
/// [`Error::AcmeProtocol`]; anything else is reported as a JSON error against `T`.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    match serde_json::from_str::<T>(body) {
        Ok(value) => Ok(value),
        Err(err) => match serde_json::from_str::<Problem>(body) {
            Ok(problem) if problem.is_error() => Err(problem.into()),
            _ => Err(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderValue, CONTENT_TYPE};

    use super::*;
    use crate::api;

    #[test]
    fn test_parse_success_schema() {
        let acc: api::Account = parse_body(r#"{"status": "valid"}"#).unwrap();
        assert!(acc.is_status_valid());
    }

    #[test]
    fn test_parse_problem_in_success_body() {
        let err = parse_body::<api::Account>(
            r#"{"status": 400, "detail": "Terms of service must be agreed"}"#,
        )
        .unwrap_err();

        match err {
            Error::AcmeProtocol { status, detail, .. } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "Terms of service must be agreed");
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn test_parse_garbage_is_json_error() {
        let err = parse_body::<api::Directory>("not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_problem_from_error_status() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_PROBLEM));

        let res = AcmeResponse::new(
            StatusCode::BAD_REQUEST,
            headers,
            r#"{"type": "urn:ietf:params:acme:error:badNonce", "detail": "JWS has an invalid anti-replay nonce"}"#
                .to_owned(),
        );

        let problem = res.problem().unwrap();
        assert!(problem.is_bad_nonce());
        assert_eq!(problem.status, Some(400));
    }

    #[test]
    fn test_problem_from_plain_error() {
        let res = AcmeResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            "oops".to_owned(),
        );

        let problem = res.problem().unwrap();
        assert_eq!(problem._type, "httpReqError");
        assert_eq!(problem.status, Some(500));
        assert!(problem.detail.unwrap().contains("oops"));
    }

    #[test]
    fn test_no_problem_on_success() {
        let res = AcmeResponse::new(StatusCode::CREATED, HeaderMap::new(), "{}".to_owned());
        assert!(res.problem().is_none());
    }
}
