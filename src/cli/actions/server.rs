use crate::{
    api,
    auth::{
        code::{CodeGenerator, FixedCodeGenerator, RandomCodeGenerator},
        push::{
            FcmConfig, FcmCredentials, FcmPushProvider, LogPushProvider, PushProvider,
            ServiceAccountKey,
        },
        store::{IdentityStore, MemoryStore, PgStore, TrustStore},
        AuthService,
    },
    cli::commands::{auth, push},
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub auth: auth::Options,
    pub push: push::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the push provider cannot
/// be built, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let (identities, trust): (Arc<dyn IdentityStore>, Arc<dyn TrustStore>) =
        if let Some(dsn) = &args.dsn {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;

            let store = Arc::new(PgStore::new(pool));
            store.ensure_schema().await?;
            info!("Using postgres store");
            let identities: Arc<dyn IdentityStore> = store.clone();
            let trust: Arc<dyn TrustStore> = store;
            (identities, trust)
        } else {
            warn!("No --dsn given, identities are kept in memory");
            let store = Arc::new(MemoryStore::new());
            let identities: Arc<dyn IdentityStore> = store.clone();
            let trust: Arc<dyn TrustStore> = store;
            (identities, trust)
        };

    let codes: Arc<dyn CodeGenerator> = match &args.auth.static_otp {
        Some(code) => {
            warn!("Issuing a static challenge code, do not use in production");
            Arc::new(FixedCodeGenerator::new(code.clone()))
        }
        None => Arc::new(RandomCodeGenerator::new(args.auth.otp_digits)),
    };

    let provider: Arc<dyn PushProvider> = match args.push {
        push::Options::Log => Arc::new(LogPushProvider),
        push::Options::Fcm {
            project_id,
            credentials,
            endpoint,
        } => {
            let (credentials, key_project_id) = match credentials {
                push::FcmCredentialSource::ServiceAccount(path) => {
                    let key = ServiceAccountKey::from_file(&path)?;
                    info!(client_email = %key.client_email(), "Using FCM service account");
                    let key_project_id = key.project_id().map(str::to_string);
                    (FcmCredentials::ServiceAccount(key), key_project_id)
                }
                push::FcmCredentialSource::AccessToken(token) => {
                    warn!("Using a static FCM access token, it will not be refreshed");
                    (FcmCredentials::AccessToken(token), None)
                }
            };
            let project_id = project_id
                .or(key_project_id)
                .context("missing required argument: --fcm-project-id")?;

            Arc::new(FcmPushProvider::new(
                FcmConfig::new(project_id, credentials).with_endpoint(endpoint),
            )?)
        }
    };

    let service = Arc::new(AuthService::new(
        args.auth.policy,
        identities,
        trust,
        codes,
        provider,
    ));

    api::new(args.port, service).await
}
