//! aws-keyhub
//!
//! Logs in on the AWS CLI through KeyHub:
//! 1. Parses command-line arguments and reads the aws-keyhub configuration once
//! 2. Obtains a SAML assertion through the KeyHub device flow, or from stdin
//! 3. Lets the user pick one of the AWS roles granted by the assertion
//! 4. Assumes that role with STS and verifies the resulting identity
//! 5. Writes the temporary credentials to the requested AWS profile

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info};
use tokio::io::AsyncReadExt;

use aws_keyhub::cli::{Args, Command, LoginTarget};
use aws_keyhub::config::{self, Config};
use aws_keyhub::login::{AssertionHook, Login};
use aws_keyhub::roles::TerminalPrompt;
use aws_keyhub::updater::CredentialsUpdater;

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        verbose,
        config: config_override,
        credentials_path,
        aws_config_file,
        command,
    } = Args::parse();

    // RUST_LOG still wins over both defaults.
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let config_path = config::resolve_path(config_override)?;

    match command {
        Command::Configure => {
            Config::prompt()?.save(&config_path)?;
            info!("Configuration of aws-keyhub completed. You can now use the `login` command.");
            Ok(())
        }
        Command::Login { target, no_browser } => {
            let login = prepare_login(&config_path, credentials_path, aws_config_file, target)?;
            login.with_device_flow(!no_browser, &TerminalPrompt).await
        }
        Command::Saml { target } => {
            let login = prepare_login(&config_path, credentials_path, aws_config_file, target)?;
            login_with_delivered_response(&login).await
        }
    }
}

fn prepare_login(
    config_path: &std::path::Path,
    credentials_path: Option<std::path::PathBuf>,
    aws_config_file: Option<std::path::PathBuf>,
    LoginTarget { role_arn, profile }: LoginTarget,
) -> Result<Login> {
    config::ensure_aws_cli_configured(&config::aws_cli_config_path(aws_config_file)?)?;
    Ok(Login {
        config: Config::load(config_path)?,
        updater: CredentialsUpdater::new(credentials_path)?,
        role_arn,
        profile,
    })
}

/// Runs the login once for the first SAML response handed to the hook.
///
/// The body arrives on stdin the way a browser would POST it to the AWS
/// sign-in page; the reader task is joined before returning.
async fn login_with_delivered_response(login: &Login) -> Result<()> {
    let (hook, delivered) = AssertionHook::channel();
    let reader = tokio::spawn(async move {
        let mut body = String::new();
        tokio::io::stdin().read_to_string(&mut body).await?;
        hook.deliver(body);
        anyhow::Ok(())
    });

    let saml_response = match delivered.await {
        Ok(body) => body,
        Err(_) => {
            reader.await.context("SAML response reader failed")??;
            bail!("No SAML response was delivered");
        }
    };
    login.complete(&saml_response, &TerminalPrompt).await?;
    reader.await.context("SAML response reader failed")?
}
