//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use p256::ecdsa::{signature::Signer as _, Signature};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    acc::AccountKey,
    error::{Error, Result},
    util::base64url,
};

/// The only signature algorithm used for account keys.
pub const ALG_ES256: &str = "ES256";

/// JWT Protected Header scheme as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsProtectedHeader {
    /// Algorithm. Always `ES256`.
    alg: String,

    /// A unique value that enables the verifier of a JWS to recognize when replay has occurred.
    ///
    /// As defined in [RFC 8555 §6.5].
    ///
    /// [RFC 8555 §6.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5
    nonce: String,

    /// Defined in [RFC 8555 §6.4].
    ///
    /// > The "url" header parameter specifies the URL (RFC 3986) to which this JWS object is
    /// directed.
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    url: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    /// Key ID.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtectedHeader {
    pub fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: ALG_ES256.to_owned(),
            nonce,
            url: url.to_owned(),
            jwk: Some(jwk),
            kid: None,
        }
    }

    pub fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: ALG_ES256.to_owned(),
            nonce,
            url: url.to_owned(),
            jwk: None,
            kid: Some(kid.to_owned()),
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn jwk(&self) -> Option<&Jwk> {
        self.jwk.as_ref()
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }
}

/// Public part of an EC P-256 JSON Web Key.
///
/// Only the members required for the [RFC 7638] thumbprint are carried.
///
/// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
// LEXICAL ORDER OF FIELDS MATTER!
pub struct Jwk {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl Jwk {
    /// Creates a P-256 JWK from base64url-encoded affine coordinates.
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        Jwk {
            crv: "P-256".to_owned(),
            kty: "EC".to_owned(),
            x: x.into(),
            y: y.into(),
        }
    }

    pub fn crv(&self) -> &str {
        &self.crv
    }

    pub fn kty(&self) -> &str {
        &self.kty
    }

    pub fn x(&self) -> &str {
        &self.x
    }

    pub fn y(&self) -> &str {
        &self.y
    }
}

/// Full EC P-256 JSON Web Key, including the private scalar `d`.
///
/// Produced by [`Session::export_jwk()`] so the account can be reused in a later session.
///
/// [`Session::export_jwk()`]: crate::Session::export_jwk()
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateJwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
    pub d: Zeroizing<String>,
}

impl PrivateJwk {
    /// Strips the private member.
    pub fn public(&self) -> Jwk {
        Jwk {
            crv: self.crv.clone(),
            kty: self.kty.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
        }
    }
}

/// JWS payload as it goes into the signing input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// POST-as-GET: the payload is the empty string, not base64url of `""`.
    Empty,

    /// Serialized JSON.
    Json(String),
}

impl Payload {
    pub fn json<T: Serialize + ?Sized>(payload: &T) -> Result<Self> {
        Ok(Payload::Json(serde_json::to_string(payload)?))
    }

    fn encode(&self) -> String {
        match self {
            Payload::Empty => String::new(),
            Payload::Json(json) => base64url(json),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedJsonJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

/// Construct JWS with protected header according to [RFC 7515 §5.1].
///
/// The signing input is `protected.payload`; the result uses the flattened JSON serialization.
///
/// [RFC 7515 §5.1]: https://datatracker.ietf.org/doc/html/rfc7515#section-5.1
pub fn sign(
    key: &AccountKey,
    protected: &JwsProtectedHeader,
    payload: &Payload,
) -> Result<FlattenedJsonJws> {
    let protected = base64url(&serde_json::to_string(protected)?);
    let payload = payload.encode();

    let to_sign = format!("{protected}.{payload}");
    let signature: Signature = key
        .signing_key()
        .try_sign(to_sign.as_bytes())
        .map_err(Error::Signing)?;

    Ok(FlattenedJsonJws {
        protected,
        payload,
        signature: base64url(&signature.to_bytes()),
    })
}
