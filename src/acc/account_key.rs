use base64::prelude::*;
use p256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint as _};
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use zeroize::Zeroizing;

use crate::{
    error::{Error, Result},
    jws::{Jwk, PrivateJwk},
    util::base64url,
};

/// ECDSA P-256 key pair identifying an ACME account.
///
/// The private key never leaves the process except through the explicit export methods.
#[derive(Clone)]
pub struct AccountKey {
    signing_key: SigningKey,
}

impl AccountKey {
    /// Generates a fresh random key.
    pub fn generate() -> AccountKey {
        let csprng = &mut rand::thread_rng();
        AccountKey {
            signing_key: SigningKey::from(p256::SecretKey::random(csprng)),
        }
    }

    /// Restores a key previously produced by [`export_jwk()`](Self::export_jwk).
    ///
    /// The public coordinates must match the private scalar.
    pub fn from_jwk(jwk: &PrivateJwk) -> Result<AccountKey> {
        if jwk.kty != "EC" || jwk.crv != "P-256" {
            return Err(Error::KeyFormat(format!(
                "unsupported JWK kty={} crv={}",
                jwk.kty, jwk.crv
            )));
        }

        let d = Zeroizing::new(
            BASE64_URL_SAFE_NO_PAD
                .decode(jwk.d.as_bytes())
                .map_err(|err| Error::KeyFormat(format!("JWK member d: {err}")))?,
        );

        let signing_key = SigningKey::from_slice(&d)
            .map_err(|err| Error::KeyFormat(format!("JWK member d: {err}")))?;

        let key = AccountKey { signing_key };

        if key.public_jwk() != jwk.public() {
            return Err(Error::KeyFormat(
                "JWK public coordinates do not match private key".to_owned(),
            ));
        }

        Ok(key)
    }

    /// Reads a PKCS#8 PEM encoded P-256 private key.
    pub fn from_pem(pem: &str) -> Result<AccountKey> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|err| Error::KeyFormat(format!("failed to read PEM: {err}")))?;
        Ok(AccountKey { signing_key })
    }

    /// Writes the private key as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        self.signing_key
            .to_pkcs8_pem(pem::LineEnding::LF)
            .map_err(|err| Error::KeyFormat(format!("private_key_to_pem: {err}")))
    }

    /// The public JWK, as transmitted in the `newAccount` request.
    pub fn public_jwk(&self) -> Jwk {
        let point = self.signing_key.verifying_key().to_encoded_point(false);

        // uncompressed points always carry both coordinates
        let x = point.x().map(base64url).unwrap_or_default();
        let y = point.y().map(base64url).unwrap_or_default();

        Jwk::new(x, y)
    }

    /// Exports public and private members so the account can be reused later.
    pub fn export_jwk(&self) -> PrivateJwk {
        let public = self.public_jwk();
        let d = Zeroizing::new(base64url(&self.signing_key.to_bytes()));

        PrivateJwk {
            crv: public.crv().to_owned(),
            kty: public.kty().to_owned(),
            x: public.x().to_owned(),
            y: public.y().to_owned(),
            d,
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("jwk", &self.public_jwk())
            .finish_non_exhaustive()
    }
}
