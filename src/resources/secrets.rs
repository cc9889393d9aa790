//! Credentials secrets

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use rand::Rng;

use super::{
    backup_credentials_secret_name, labels, object_meta, operator_credentials_secret_name,
    watched_labels,
};
use crate::crd::Jenkins;

/// Jenkins user the operator authenticates as
pub const OPERATOR_USER_NAME: &str = "jenkins-operator";
/// Secret key holding the operator user name
pub const USER_NAME_KEY: &str = "user";
/// Secret key holding the operator password
pub const PASSWORD_KEY: &str = "password";
/// Secret key holding the operator API token
pub const TOKEN_KEY: &str = "token";
/// Secret key holding the RFC 3339 time the token was generated
pub const TOKEN_CREATION_TIME_KEY: &str = "tokenCreationTime";
/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 20;

const PASSWORD_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate an alphanumeric password from the given source of randomness
pub fn generate_password<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| PASSWORD_ALPHABET[rng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

/// Secret with the operator user and a fresh password.
///
/// Created once; the token keys are added later when a token is issued.
pub fn operator_credentials_secret<R: Rng + ?Sized>(jenkins: &Jenkins, rng: &mut R) -> Secret {
    Secret {
        metadata: object_meta(jenkins, operator_credentials_secret_name(jenkins), labels(jenkins)),
        data: Some(BTreeMap::from([
            (
                USER_NAME_KEY.to_string(),
                ByteString(OPERATOR_USER_NAME.as_bytes().to_vec()),
            ),
            (
                PASSWORD_KEY.to_string(),
                ByteString(generate_password(rng, PASSWORD_LENGTH).into_bytes()),
            ),
        ])),
        ..Default::default()
    }
}

/// Empty, watched secret the user fills with backup strategy credentials
pub fn backup_credentials_secret(jenkins: &Jenkins) -> Secret {
    Secret {
        metadata: object_meta(
            jenkins,
            backup_credentials_secret_name(jenkins),
            watched_labels(jenkins),
        ),
        ..Default::default()
    }
}
