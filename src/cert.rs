use std::io::{BufReader, Cursor};

use der::{asn1::Ia5String, Encode as _};
use pkcs8::EncodePrivateKey as _;
use rsa::{pkcs1v15, RsaPrivateKey};
use sha2::Sha256;
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
};
use zeroize::Zeroizing;

use crate::{
    error::{Error, Result},
    util::base64url,
};

/// Size of the RSA keys generated for issued certificates.
pub const RSA_KEY_BITS: usize = 2048;

/// Output of [`generate_csr()`].
#[derive(Debug, Clone)]
pub struct GeneratedCsr {
    /// The CSR in base64url-encoded DER, as expected in the `csr` field of a finalize request.
    pub csr_der_b64url: String,

    /// The certificate's private key as PKCS#8 PEM. Never sent to the CA.
    pub private_key_pem: Zeroizing<String>,
}

/// Generates a fresh RSA key pair and a CSR for `domain_name` signed with it.
///
/// The CSR's subject is `CN=<domain_name>` and it carries a Subject Alternative Name extension
/// with `domain_name` as its single DNS entry.
pub fn generate_csr(domain_name: &str) -> Result<GeneratedCsr> {
    let private_key = create_rsa_key()?;

    let csr = create_csr(&private_key, &[domain_name])?;

    // this is not the same as PEM.
    let csr_der = csr.to_der().map_err(|err| Error::Csr(err.to_string()))?;

    let private_key_pem = private_key
        .to_pkcs8_pem(pem::LineEnding::LF)
        .map_err(|err| Error::KeyGeneration(format!("PKCS#8 export: {err}")))?;

    Ok(GeneratedCsr {
        csr_der_b64url: base64url(&csr_der),
        private_key_pem,
    })
}

/// Make an RSA private key (from which we can derive a public key).
pub fn create_rsa_key() -> Result<RsaPrivateKey> {
    let csprng = &mut rand::thread_rng();
    RsaPrivateKey::new(csprng, RSA_KEY_BITS).map_err(|err| Error::KeyGeneration(err.to_string()))
}

/// Creates a CSR with `domains` and signs it with `private_key` using RSA-SHA256.
///
/// The first item of `domains` is picked for the CSR's Common Name (CN). All domains are added to a
/// Subject Alternative Name (SAN) extension.
pub(crate) fn create_csr(
    private_key: &RsaPrivateKey,
    domains: &[&str],
) -> Result<x509_cert::request::CertReq> {
    let primary_domain = domains
        .first()
        .ok_or_else(|| Error::Csr("no domains".to_owned()))?;

    let subject = format!("CN={primary_domain}")
        .parse::<Name>()
        .map_err(|err| Error::Csr(format!("subject: {err}")))?;

    let signer = pkcs1v15::SigningKey::<Sha256>::new(private_key.clone());

    let mut csr =
        CsrBuilder::new(subject, &signer).map_err(|err| Error::Csr(err.to_string()))?;

    let alt_names = domains
        .iter()
        .map(|domain| Ia5String::new(domain).map(GeneralName::DnsName))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| Error::Csr(format!("invalid domain name: {err}")))?;

    csr.add_extension(&SubjectAltName(alt_names))
        .map_err(|err| Error::Csr(err.to_string()))?;

    csr.build::<pkcs1v15::Signature>()
        .map_err(|err| Error::Csr(format!("build csr: {err}")))
}

/// Splits a `application/pem-certificate-chain` body into one PEM document per certificate.
pub(crate) fn split_pem_chain(body: &str) -> Result<Vec<String>> {
    let mut rdr = BufReader::new(Cursor::new(body));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| {
            let cert = res.map_err(|err| Error::Pem(err.to_string()))?;
            pem::encode_string("CERTIFICATE", pem::LineEnding::LF, &cert)
                .map_err(|err| Error::Pem(err.to_string()))
        })
        .collect()
}

/// Encapsulated certificate chain and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    private_key_pem: Zeroizing<String>,
    certificate: String,
}

impl Certificate {
    pub(crate) fn new(private_key_pem: Zeroizing<String>, certificate: String) -> Self {
        Certificate {
            private_key_pem,
            certificate,
        }
    }

    /// The private key in PKCS#8 PEM format.
    pub fn private_key(&self) -> &str {
        &self.private_key_pem
    }

    /// The issued certificate chain in PEM format.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The issued certificate chain, one PEM document per certificate, leaf first.
    pub fn pem_chain(&self) -> Result<Vec<String>> {
        split_pem_chain(&self.certificate)
    }

    /// The issued certificate chain in DER format.
    pub fn certificate_chain(&self) -> Result<Vec<Vec<u8>>> {
        let mut rdr = BufReader::new(Cursor::new(self.certificate()));

        rustls_pemfile::certs(&mut rdr)
            .map(|res| res.map(|cert| cert.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| Error::Pem(err.to_string()))
    }
}
