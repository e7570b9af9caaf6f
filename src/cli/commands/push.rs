use crate::auth::push::DEFAULT_FCM_ENDPOINT;
use clap::{builder::PossibleValuesParser, Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;

pub const ARG_PUSH_PROVIDER: &str = "push-provider";
pub const ARG_FCM_PROJECT_ID: &str = "fcm-project-id";
pub const ARG_FCM_ACCESS_TOKEN: &str = "fcm-access-token";
pub const ARG_FCM_SERVICE_ACCOUNT: &str = "fcm-service-account";
pub const ARG_FCM_ENDPOINT: &str = "fcm-endpoint";

#[derive(Debug, Clone)]
pub enum Options {
    /// Log messages instead of delivering them.
    Log,
    Fcm {
        /// Falls back to the service-account key's `project_id`.
        project_id: Option<String>,
        credentials: FcmCredentialSource,
        endpoint: String,
    },
}

/// Where FCM bearer tokens come from. The key file is read at startup.
#[derive(Debug, Clone)]
pub enum FcmCredentialSource {
    ServiceAccount(PathBuf),
    AccessToken(SecretString),
}

impl Options {
    /// Parse push provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if FCM is selected without credentials, or with a
    /// static token but no project id.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read = |id: &str| -> Option<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        match matches
            .get_one::<String>(ARG_PUSH_PROVIDER)
            .map_or("log", String::as_str)
        {
            "fcm" => {
                let project_id = read(ARG_FCM_PROJECT_ID);
                // a service account wins over a static token
                let credentials = if let Some(path) = read(ARG_FCM_SERVICE_ACCOUNT) {
                    FcmCredentialSource::ServiceAccount(PathBuf::from(path))
                } else if let Some(token) = read(ARG_FCM_ACCESS_TOKEN) {
                    if project_id.is_none() {
                        anyhow::bail!("missing required argument: --{ARG_FCM_PROJECT_ID}");
                    }
                    FcmCredentialSource::AccessToken(SecretString::from(token))
                } else {
                    anyhow::bail!(
                        "missing required argument: --{ARG_FCM_SERVICE_ACCOUNT} or --{ARG_FCM_ACCESS_TOKEN}"
                    );
                };

                Ok(Self::Fcm {
                    project_id,
                    credentials,
                    endpoint: read(ARG_FCM_ENDPOINT)
                        .unwrap_or_else(|| DEFAULT_FCM_ENDPOINT.to_string()),
                })
            }
            _ => Ok(Self::Log),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUSH_PROVIDER)
                .long(ARG_PUSH_PROVIDER)
                .help("Push delivery backend")
                .env("NOPASS_PUSH_PROVIDER")
                .default_value("log")
                .value_parser(PossibleValuesParser::new(["log", "fcm"])),
        )
        .arg(
            Arg::new(ARG_FCM_PROJECT_ID)
                .long(ARG_FCM_PROJECT_ID)
                .help("Firebase project id")
                .env("NOPASS_FCM_PROJECT_ID"),
        )
        .arg(
            Arg::new(ARG_FCM_SERVICE_ACCOUNT)
                .long(ARG_FCM_SERVICE_ACCOUNT)
                .help("Path to a Google service-account JSON key, access tokens are minted and refreshed from it")
                .env("NOPASS_FCM_SERVICE_ACCOUNT"),
        )
        .arg(
            Arg::new(ARG_FCM_ACCESS_TOKEN)
                .long(ARG_FCM_ACCESS_TOKEN)
                .help("Static OAuth2 access token for the FCM HTTP v1 API, it is never refreshed")
                .env("NOPASS_FCM_ACCESS_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FCM_ENDPOINT)
                .long(ARG_FCM_ENDPOINT)
                .help("FCM API base URL")
                .env("NOPASS_FCM_ENDPOINT")
                .default_value(DEFAULT_FCM_ENDPOINT),
        )
}
