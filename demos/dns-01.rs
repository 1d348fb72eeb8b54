use std::{env, fs, path::Path, time::Duration};

use acme::{AccountKey, DirectoryUrl, PrivateJwk, Session};
use tokio::io::{AsyncBufReadExt as _, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Use `letsencrypt` for production uses.
    let authority = env::var("ACME_DIRECTORY").unwrap_or_else(|_| "letsencrypt-staging".to_owned());
    let domain = env::var("ACME_DOMAIN").unwrap_or_else(|_| "example.org".to_owned());

    // Where the account key is kept between runs.
    let jwk_path = env::var("ACME_ACCOUNT_JWK").unwrap_or_else(|_| "account.jwk.json".to_owned());

    let account_key = if Path::new(&jwk_path).exists() {
        let jwk = serde_json::from_str::<PrivateJwk>(&fs::read_to_string(&jwk_path)?)?;
        Some(AccountKey::from_jwk(&jwk)?)
    } else {
        None
    };

    // Registers a new account when no key was stored yet.
    let session = Session::connect(DirectoryUrl::parse(&authority), account_key).await?;
    fs::write(&jwk_path, serde_json::to_string_pretty(&session.export_jwk())?)?;

    // Order a new TLS certificate for the domain.
    let mut challenge = session.request_dns_challenge(&domain).await?;

    // The proof goes into a TXT record that must be visible to the CA before continuing.
    println!("Create this DNS record and press enter once it has propagated:");
    println!();
    println!("  {}.  TXT  \"{}\"", challenge.fqdn(), challenge.record_text);

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    // The library does not poll. While the CA is not done issuing, the order keeps the
    // certificate key and a repeated call only checks on the order again.
    let mut attempts = 0;
    let issued = loop {
        match session
            .submit_dns_challenge_and_finalize(&mut challenge.order)
            .await
        {
            Err(acme::Error::CertificateNotReady { status }) if attempts < 10 => {
                attempts += 1;
                println!("Order is {status:?}, checking again in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            res => break res?,
        }
    };

    fs::write(format!("{domain}.crt"), issued.certificate.certificate())?;
    fs::write(format!("{domain}.key"), issued.certificate.private_key())?;
    println!("Certificate written to {domain}.crt ({})", issued.certificate_url);

    Ok(())
}
