//! Federated AWS CLI login through Topicus KeyHub.
//!
//! A login exchanges a KeyHub OAuth2 device-flow session for a SAML
//! assertion, lets the user pick one of the AWS roles it grants, assumes
//! that role with STS and stores the temporary credentials as an AWS
//! profile.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod keyhub;
pub mod login;
pub mod roles;
pub mod saml;
pub mod updater;
pub mod xml;

pub use error::LoginError;
