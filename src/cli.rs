//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Log in on the AWS CLI via KeyHub.
///
/// Retrieves temporary AWS credentials by exchanging a KeyHub OAuth2 device
/// login for a SAML assertion, which is then used with AWS STS.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the aws-keyhub configuration [default: ~/.aws-keyhub/config-v2.json]
    #[arg(long, global = true, env = "AWS_KEYHUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to AWS credentials file [default: ~/.aws/credentials]
    #[arg(short, long, global = true, env = "AWS_SHARED_CREDENTIALS_FILE")]
    pub credentials_path: Option<PathBuf>,

    /// Path to the AWS CLI config file, which must exist before logging in [default: ~/.aws/config]
    #[arg(long, global = true, env = "AWS_CONFIG_FILE")]
    pub aws_config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the login flow to retrieve AWS credentials
    Login {
        #[command(flatten)]
        target: LoginTarget,

        /// Do not open the KeyHub verification page in a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Log in with a SAML response POST body (SAMLResponse=...) read from stdin
    Saml {
        #[command(flatten)]
        target: LoginTarget,
    },
    /// Configure the settings for aws-keyhub
    Configure,
}

#[derive(ClapArgs)]
pub struct LoginTarget {
    /// Log in with this role ARN instead of asking which role to use
    #[arg(short, long, env = "AWS_KEYHUB_ROLE_ARN")]
    pub role_arn: Option<String>,

    /// AWS profile to write the credentials to
    #[arg(short, long, default_value = "keyhub")]
    pub profile: String,
}
