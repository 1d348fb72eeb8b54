//! Provisioning certificates from ACME (Automatic Certificate Management Environment) providers
//! such as [Let's Encrypt](https://letsencrypt.org/), proving domain control with `dns-01`.
//!
//! It follows the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555) spec, using ACME v2 to
//! issue certificates.
//!
//! # Usage
//!
//! A [`Session`] binds one ACME account to one provider. Issuing a certificate takes two calls with
//! a DNS change in between:
//!
//! 1. [`Session::request_dns_challenge()`] creates an order and returns the TXT record to publish.
//! 2. Once the record is visible, [`Session::submit_dns_challenge_and_finalize()`] asks the CA to
//!    validate it, submits a CSR for a freshly generated RSA key and downloads the certificate.
//!
//! The account key can be exported with [`Session::export_jwk()`] and passed back to
//! [`Session::connect()`] later to keep using the same account.
//!
//! ## Examples
//!
//! A complete usage example is provided in the source repository:
//!
//! - `demos/dns-01.rs`, run with `cargo run --example dns-01`
//!
//! # Domain Ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the domain they are issued
//! for. With `dns-01`, this means proving you control the DNS server answering name lookups
//! against the domain, by publishing:
//!
//! ```text
//! _acme-challenge.<domain>.  TXT  <base64url(SHA-256(token "." thumbprint))>
//! ```
//!
//! See [`dns_challenge`] and [`dns_record_text`].
//!
//! ## Lower Level Access
//!
//! [`Directory`], [`Account`] and [`Order`](order::Order) expose the individual steps for callers
//! who want to drive the order life cycle themselves, e.g. to poll the order with
//! [`refresh`](order::Order::refresh) between validation and issuance.
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused.
//! This library never polls on its own; balance any polling you add against the real risk of
//! having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`dns_challenge`]: crate::order::Auth::dns_challenge()
//! [`dns_record_text`]: crate::order::dns_record_text()
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cert;
mod dir;
mod error;
mod req;
mod session;
mod trans;
mod util;

pub mod api;
pub mod jws;
pub mod order;

#[cfg(test)]
mod test;

pub use crate::{
    acc::{Account, AccountKey},
    cert::{create_rsa_key, generate_csr, Certificate, GeneratedCsr, RSA_KEY_BITS},
    dir::{Directory, DirectoryUrl},
    error::{Error, Result},
    jws::{Jwk, PrivateJwk},
    session::{DnsChallenge, IssuedCertificate, Session, DNS_RECORD_NAME},
    util::{base64url, jwk_thumbprint},
};
