//! In-process mock ACME CA for the unit tests.
//!
//! The CA hands out a fresh nonce with every response and refuses anything that does not look
//! like a well-formed, correctly signed RFC 8555 request: unknown or reused nonces, a `url`
//! header not matching the request target, `jwk` outside of newAccount or `kid` inside it.

use std::{
    collections::HashSet,
    net::TcpListener,
    sync::{Arc, OnceLock},
};

use actix_web::{
    dev::ServerHandle,
    http::{header, Method, StatusCode},
    web, App, HttpRequest, HttpResponse, HttpServer,
};
use base64::prelude::*;
use p256::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};

use crate::req::{CONTENT_TYPE_PEM_CHAIN, CONTENT_TYPE_PROBLEM};

static RE_URL: OnceLock<Regex> = OnceLock::new();

fn re_url() -> &'static Regex {
    RE_URL.get_or_init(|| Regex::new("<URL>").unwrap())
}

pub const DNS_TOKEN: &str = "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8";

/// Knobs for making the mock CA misbehave.
#[derive(Debug, Clone, Default)]
pub struct CaBehavior {
    /// Serve a directory that is not JSON.
    pub malformed_directory: bool,

    /// Answer HEAD newNonce without a `Replay-Nonce` header.
    pub omit_new_nonce_header: bool,

    /// Answer newAccount with a 400 problem document.
    pub reject_terms_of_service: bool,

    /// Number of newAccount attempts answered with `badNonce` before accepting.
    pub bad_nonce_failures: usize,

    /// Lower-case the identifiers of new orders, as Let's Encrypt does.
    pub lowercase_identifiers: bool,

    /// Leave `dns-01` out of the offered challenges.
    pub omit_dns_challenge: bool,

    /// Answer finalize with a `processing` order without certificate URL.
    pub certificate_pending: bool,

    /// Answer finalize with a 403 problem document.
    pub reject_csr: bool,
}

#[derive(Debug, Default)]
struct Recorded {
    next_nonce: u64,
    outstanding_nonces: HashSet<String>,
    used_nonces: Vec<String>,
    nonce_requests: usize,
    protected_headers: Vec<Value>,
    account_jwk: Option<Value>,
    new_account_attempts: usize,
    new_account_requests: Vec<Value>,
    new_order_requests: Vec<Value>,
    challenge_requests: Vec<Value>,
    finalize_requests: Vec<Value>,
    identifiers: Value,
    challenge_submitted: bool,
    finalized: bool,
    issued: bool,
}

impl Recorded {
    fn issue_nonce(&mut self) -> String {
        self.next_nonce += 1;
        let nonce = BASE64_URL_SAFE_NO_PAD.encode(format!("mock-nonce-{}", self.next_nonce));
        self.outstanding_nonces.insert(nonce.clone());
        nonce
    }
}

/// What the mock CA saw, shared between the server and the test.
#[derive(Debug)]
pub struct CaState {
    url: String,
    behavior: CaBehavior,
    recorded: Mutex<Recorded>,
}

impl CaState {
    fn new(url: String, behavior: CaBehavior) -> Self {
        CaState {
            url,
            behavior,
            recorded: Mutex::default(),
        }
    }

    /// Decoded newAccount payloads, excluding attempts rejected with `badNonce`.
    pub fn new_account_requests(&self) -> Vec<Value> {
        self.recorded.lock().new_account_requests.clone()
    }

    /// Number of signed newAccount requests that reached the CA.
    pub fn new_account_attempts(&self) -> usize {
        self.recorded.lock().new_account_attempts
    }

    pub fn new_order_requests(&self) -> Vec<Value> {
        self.recorded.lock().new_order_requests.clone()
    }

    pub fn challenge_requests(&self) -> Vec<Value> {
        self.recorded.lock().challenge_requests.clone()
    }

    pub fn finalize_requests(&self) -> Vec<Value> {
        self.recorded.lock().finalize_requests.clone()
    }

    /// Decoded protected headers of all signed requests, in arrival order.
    pub fn protected_headers(&self) -> Vec<Value> {
        self.recorded.lock().protected_headers.clone()
    }

    /// Nonces of all signed requests, in arrival order.
    pub fn used_nonces(&self) -> Vec<String> {
        self.recorded.lock().used_nonces.clone()
    }

    /// Number of HEAD requests against newNonce.
    pub fn nonce_requests(&self) -> usize {
        self.recorded.lock().nonce_requests
    }

    fn get_directory(&self) -> HttpResponse {
        const BODY: &str = r#"{
    "keyChange": "<URL>/acme/key-change",
    "newAccount": "<URL>/acme/new-acct",
    "newNonce": "<URL>/acme/new-nonce",
    "newOrder": "<URL>/acme/new-order",
    "revokeCert": "<URL>/acme/revoke-cert",
    "meta": {
        "termsOfService": "<URL>/terms",
        "caaIdentities": ["testdir.org"]
    }
    }"#;

        let body = if self.behavior.malformed_directory {
            "<html>not a directory</html>".to_owned()
        } else {
            re_url().replace_all(BODY, self.url.as_str()).into_owned()
        };

        HttpResponse::Ok()
            .content_type("application/json")
            .body(body)
    }

    fn head_new_nonce(&self) -> HttpResponse {
        let mut rec = self.recorded.lock();
        rec.nonce_requests += 1;

        let mut res = HttpResponse::build(StatusCode::OK);
        res.insert_header((header::CACHE_CONTROL, "no-store"));

        if !self.behavior.omit_new_nonce_header {
            res.insert_header(("Replay-Nonce", rec.issue_nonce()));
        }

        res.finish()
    }

    fn post(&self, req: &HttpRequest, body: &[u8]) -> HttpResponse {
        let mut rec = self.recorded.lock();

        let reply = self
            .handle_post(&mut rec, req, body)
            .unwrap_or_else(|reply| reply);

        let mut res = HttpResponse::build(reply.status);
        res.insert_header(("Replay-Nonce", rec.issue_nonce()))
            .content_type(reply.content_type);

        if let Some(location) = reply.location {
            res.insert_header((header::LOCATION, location));
        }

        res.body(reply.body)
    }

    fn handle_post(
        &self,
        rec: &mut Recorded,
        req: &HttpRequest,
        body: &[u8],
    ) -> Result<Reply, Reply> {
        let jws = serde_json::from_slice::<Value>(body)
            .map_err(|_| Reply::problem(StatusCode::BAD_REQUEST, "malformed", "not JSON"))?;

        let protected = decode_part(&jws, "protected")
            .and_then(|protected| serde_json::from_slice::<Value>(&protected).ok())
            .ok_or_else(|| {
                Reply::problem(StatusCode::BAD_REQUEST, "malformed", "bad protected header")
            })?;
        rec.protected_headers.push(protected.clone());

        let nonce = protected["nonce"].as_str().unwrap_or_default().to_owned();
        rec.used_nonces.push(nonce.clone());
        if !rec.outstanding_nonces.remove(&nonce) {
            return Err(Reply::problem(
                StatusCode::BAD_REQUEST,
                "badNonce",
                "unknown or reused nonce",
            ));
        }

        let path = req.path();
        if protected["url"] != format!("{}{path}", self.url) {
            return Err(Reply::problem(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "url header does not match request",
            ));
        }

        if protected["alg"] != "ES256" {
            return Err(Reply::problem(
                StatusCode::BAD_REQUEST,
                "badSignatureAlgorithm",
                "only ES256 is supported",
            ));
        }

        let jwk = if path == "/acme/new-acct" {
            if protected.get("kid").is_some() || protected.get("jwk").is_none() {
                return Err(Reply::problem(
                    StatusCode::BAD_REQUEST,
                    "malformed",
                    "newAccount must be signed with jwk",
                ));
            }
            protected["jwk"].clone()
        } else {
            if protected.get("jwk").is_some()
                || protected["kid"] != format!("{}/acme/acct/1", self.url)
            {
                return Err(Reply::problem(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "requests must be signed with the account kid",
                ));
            }
            rec.account_jwk.clone().unwrap_or_default()
        };

        if !verify_signature(&jwk, &jws) {
            return Err(Reply::problem(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "signature does not verify",
            ));
        }

        // `None` for POST-as-GET
        let payload = match jws["payload"].as_str() {
            Some("") => None,
            _ => Some(
                decode_part(&jws, "payload")
                    .and_then(|payload| serde_json::from_slice::<Value>(&payload).ok())
                    .ok_or_else(|| {
                        Reply::problem(StatusCode::BAD_REQUEST, "malformed", "bad payload")
                    })?,
            ),
        };

        match (path, payload) {
            ("/acme/new-acct", Some(payload)) => self.post_new_acct(rec, jwk, payload),
            ("/acme/new-order", Some(payload)) => Ok(self.post_new_order(rec, payload)),
            ("/acme/order/1", None) => Ok(Reply::json(StatusCode::OK, self.order_json(rec))),
            ("/acme/authz/1", None) => Ok(self.post_authz(rec)),
            ("/acme/chall/3", Some(payload)) => Ok(self.post_dns_challenge(rec, payload)),
            ("/acme/finalize/1", Some(payload)) => self.post_finalize(rec, payload),
            ("/acme/cert/1", None) => self.post_certificate(rec, req),
            _ => Err(Reply::problem(
                StatusCode::NOT_FOUND,
                "malformed",
                "no such resource",
            )),
        }
    }

    fn post_new_acct(
        &self,
        rec: &mut Recorded,
        jwk: Value,
        payload: Value,
    ) -> Result<Reply, Reply> {
        rec.new_account_attempts += 1;
        if rec.new_account_attempts <= self.behavior.bad_nonce_failures {
            return Err(Reply::problem(
                StatusCode::BAD_REQUEST,
                "badNonce",
                "nonce expired",
            ));
        }

        rec.new_account_requests.push(payload.clone());

        if self.behavior.reject_terms_of_service || payload["termsOfServiceAgreed"] != true {
            return Err(Reply {
                status: StatusCode::BAD_REQUEST,
                location: None,
                content_type: CONTENT_TYPE_PROBLEM,
                body: json!({ "status": 400, "detail": "Terms of service must be agreed" })
                    .to_string(),
            });
        }

        let status = if payload["onlyReturnExisting"] == true {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };

        rec.account_jwk = Some(jwk);

        let account = json!({
            "status": "valid",
            "orders": format!("{}/acme/acct/1/orders", self.url),
        });

        Ok(Reply::json(status, account).with_location(format!("{}/acme/acct/1", self.url)))
    }

    fn post_new_order(&self, rec: &mut Recorded, payload: Value) -> Reply {
        rec.new_order_requests.push(payload.clone());
        rec.identifiers = payload["identifiers"].clone();

        if self.behavior.lowercase_identifiers {
            if let Some(identifiers) = rec.identifiers.as_array_mut() {
                for id in identifiers {
                    let value = id["value"].as_str().unwrap_or_default().to_ascii_lowercase();
                    id["value"] = Value::String(value);
                }
            }
        }

        Reply::json(StatusCode::CREATED, self.order_json(rec))
            .with_location(format!("{}/acme/order/1", self.url))
    }

    fn order_json(&self, rec: &Recorded) -> Value {
        let status = if rec.issued {
            "valid"
        } else if rec.finalized {
            "processing"
        } else if rec.challenge_submitted {
            "ready"
        } else {
            "pending"
        };

        let mut order = json!({
            "status": status,
            "expires": "2019-01-09T08:26:43.570360537Z",
            "identifiers": rec.identifiers,
            "authorizations": [format!("{}/acme/authz/1", self.url)],
            "finalize": format!("{}/acme/finalize/1", self.url),
        });

        if rec.issued {
            order["certificate"] = json!(format!("{}/acme/cert/1", self.url));
        }

        order
    }

    fn post_authz(&self, rec: &Recorded) -> Reply {
        const CHALLENGES: &str = r#"[
        {
            "type": "http-01",
            "status": "pending",
            "url": "<URL>/acme/chall/1",
            "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
        },
        {
            "type": "tls-alpn-01",
            "status": "pending",
            "url": "<URL>/acme/chall/2",
            "token": "WCdRWkCy4THTD_j5IH4ISAzr59lFIg5wzYmKxuOJ1lU"
        },
        {
            "type": "dns-01",
            "status": "pending",
            "url": "<URL>/acme/chall/3",
            "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
        }
        ]"#;

        let mut challenges = serde_json::from_str::<Vec<Value>>(
            &re_url().replace_all(CHALLENGES, self.url.as_str()),
        )
        .unwrap();

        if self.behavior.omit_dns_challenge {
            challenges.retain(|challenge| challenge["type"] != "dns-01");
        }

        let status = if rec.challenge_submitted {
            "valid"
        } else {
            "pending"
        };

        let authz = json!({
            "identifier": rec.identifiers[0],
            "status": status,
            "expires": "2019-01-09T08:26:43Z",
            "challenges": challenges,
        });

        Reply::json(StatusCode::OK, authz)
    }

    fn post_dns_challenge(&self, rec: &mut Recorded, payload: Value) -> Reply {
        rec.challenge_requests.push(payload);
        rec.challenge_submitted = true;

        let challenge = json!({
            "type": "dns-01",
            "status": "processing",
            "url": format!("{}/acme/chall/3", self.url),
            "token": DNS_TOKEN,
        });

        Reply::json(StatusCode::OK, challenge)
    }

    fn post_finalize(&self, rec: &mut Recorded, payload: Value) -> Result<Reply, Reply> {
        rec.finalize_requests.push(payload);

        if self.behavior.reject_csr {
            return Err(Reply::problem(
                StatusCode::FORBIDDEN,
                "unauthorized",
                "order is not ready",
            ));
        }

        rec.finalized = true;
        rec.issued = !self.behavior.certificate_pending;
        let order = self.order_json(rec);

        // a pending certificate is issued by the time the order is polled
        rec.issued = true;

        Ok(Reply::json(StatusCode::OK, order))
    }

    fn post_certificate(&self, rec: &Recorded, req: &HttpRequest) -> Result<Reply, Reply> {
        if !rec.issued {
            return Err(Reply::problem(
                StatusCode::NOT_FOUND,
                "malformed",
                "certificate not issued",
            ));
        }

        let accept = req
            .headers()
            .get(header::ACCEPT)
            .and_then(|accept| accept.to_str().ok());
        if accept != Some(CONTENT_TYPE_PEM_CHAIN) {
            return Err(Reply::problem(
                StatusCode::NOT_ACCEPTABLE,
                "malformed",
                "only PEM chains are served",
            ));
        }

        Ok(Reply {
            status: StatusCode::OK,
            location: None,
            content_type: CONTENT_TYPE_PEM_CHAIN,
            body: cert_chain().join("\n"),
        })
    }
}

struct Reply {
    status: StatusCode,
    location: Option<String>,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn json(status: StatusCode, body: Value) -> Self {
        Reply {
            status,
            location: None,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    fn problem(status: StatusCode, problem_type: &str, detail: &str) -> Self {
        let problem = json!({
            "type": format!("urn:ietf:params:acme:error:{problem_type}"),
            "detail": detail,
            "status": status.as_u16(),
        });

        Reply {
            status,
            location: None,
            content_type: CONTENT_TYPE_PROBLEM,
            body: problem.to_string(),
        }
    }

    fn with_location(mut self, location: String) -> Self {
        self.location = Some(location);
        self
    }
}

fn decode_part(jws: &Value, part: &str) -> Option<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD.decode(jws[part].as_str()?).ok()
}

fn verify_signature(jwk: &Value, jws: &Value) -> bool {
    let coordinate = |name: &str| {
        jwk[name]
            .as_str()
            .and_then(|c| BASE64_URL_SAFE_NO_PAD.decode(c).ok())
            .filter(|c| c.len() == 32)
    };

    let (Some(x), Some(y)) = (coordinate("x"), coordinate("y")) else {
        return false;
    };

    let point = p256::EncodedPoint::from_affine_coordinates(
        p256::FieldBytes::from_slice(&x),
        p256::FieldBytes::from_slice(&y),
        false,
    );

    let Ok(key) = VerifyingKey::from_encoded_point(&point) else {
        return false;
    };

    let Some(signature) = decode_part(jws, "signature")
        .and_then(|signature| Signature::from_slice(&signature).ok())
    else {
        return false;
    };

    let signing_input = format!(
        "{}.{}",
        jws["protected"].as_str().unwrap_or_default(),
        jws["payload"].as_str().unwrap_or_default()
    );

    key.verify(signing_input.as_bytes(), &signature).is_ok()
}

/// The chain served by the mock CA, one PEM document per certificate.
pub fn cert_chain() -> Vec<String> {
    [&b"mock leaf certificate"[..], &b"mock issuer certificate"[..]]
        .into_iter()
        .map(|der| pem::encode_string("CERTIFICATE", pem::LineEnding::LF, der).unwrap())
        .collect()
}

async fn route(req: HttpRequest, body: web::Bytes, state: web::Data<CaState>) -> HttpResponse {
    match (req.method(), req.path()) {
        (&Method::GET, "/directory") => state.get_directory(),
        (&Method::HEAD, "/acme/new-nonce") => state.head_new_nonce(),
        (&Method::POST, path) if path.starts_with("/acme/") => state.post(&req, &body),
        (_, _) => HttpResponse::NotFound().finish(),
    }
}

pub struct TestServer {
    /// Authority base URL, the directory lives at `{url}/directory`.
    pub url: String,
    pub state: Arc<CaState>,
    handle: ServerHandle,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
    }
}

pub fn with_directory_server() -> TestServer {
    with_server(CaBehavior::default())
}

pub fn with_server(behavior: CaBehavior) -> TestServer {
    let lst = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = lst.local_addr().unwrap().port();

    let url = format!("http://127.0.0.1:{port}");
    let state = Arc::new(CaState::new(url.clone(), behavior));
    let data = web::Data::from(Arc::clone(&state));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .default_service(web::to(route))
    })
    .listen(lst)
    .unwrap()
    .workers(1)
    .disable_signals()
    .run();

    let handle = server.handle();

    tokio::spawn(server);

    TestServer { url, state, handle }
}

#[tokio::test]
pub async fn test_make_directory() {
    let server = with_directory_server();
    let res = reqwest::get(format!("{}/directory", server.url))
        .await
        .unwrap();
    assert!(res.status().is_success());
}
