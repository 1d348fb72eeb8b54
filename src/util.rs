use base64::prelude::*;
use sha2::{Digest as _, Sha256};

use crate::{error::Result, jws::Jwk};

/// Encodes `input` as base64url without padding.
pub fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// Computes the [RFC 7638] thumbprint (SHA-256) of a public JWK.
///
/// The required members are serialized in lexical order, which is the declaration order of
/// [`Jwk`]'s fields.
///
/// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
pub fn jwk_thumbprint(jwk: &Jwk) -> Result<[u8; 32]> {
    let jwk_json = serde_json::to_vec(jwk)?;
    Ok(Sha256::digest(jwk_json).into())
}
