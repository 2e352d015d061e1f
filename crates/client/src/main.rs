//! Chatdesk console entry point.
//!
//! Headless runner: connects to the backend, keeps the conversation list
//! live and logs alerts until interrupted.

use std::sync::Arc;

use anyhow::Context;
use chatdesk_client::credentials::CredentialProvider;
use chatdesk_client::notify::{default_sound, LogNotifier};
use chatdesk_client::{
    logging, ApiClient, ChatConfig, ChatSession, Credential, DispatcherOptions, NotificationDispatcher,
    Operator, ReconnectConfig, SessionOptions, StaticCredentials, Storage, StoredCredentials,
    StreamConnection, TtlCache,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("chatdesk_client=debug,chatdesk=info");

    let config = ChatConfig::from_env().context("invalid configuration")?;
    let storage = match &config.data_dir {
        Some(dir) => Some(Storage::at(dir)),
        None => Storage::default_location(),
    };
    if storage.is_none() {
        warn!("no data directory available, settings and caches will not persist");
    }

    let configured = match (&config.session_key, &config.auth_seed) {
        (Some(key), Some(seed)) => Credential::new(key.as_str(), seed.as_str()),
        _ => None,
    };
    let credentials: Arc<dyn CredentialProvider> = match (configured, &storage) {
        (Some(credential), _) => Arc::new(StaticCredentials::new(Some(credential))),
        (None, Some(storage)) => Arc::new(StoredCredentials::new(storage.clone())),
        (None, None) => Arc::new(StaticCredentials::new(None)),
    };

    let api = ApiClient::new(credentials.clone()).with_base_url(config.api_base_url.clone());
    let connection = StreamConnection::native(ReconnectConfig::from(&config.timings));

    let dispatcher = NotificationDispatcher::new(DispatcherOptions {
        storage: storage.clone(),
        notifier: Arc::new(LogNotifier),
        sound: default_sound(config.sound_asset.clone()),
        operator_id: config.operator_id.clone(),
        force_all: config.force_alerts,
    });
    dispatcher.request_permission().await;
    let alerts = dispatcher.attach(&connection);

    let session = ChatSession::spawn(
        Arc::new(api),
        connection.clone(),
        SessionOptions {
            timings: config.timings.clone(),
            operator: Operator {
                id: config.operator_id.clone(),
                name: config.operator_name.clone(),
            },
            page_size: config.message_page_size,
            cache: storage.map(TtlCache::new),
        },
    );
    session.load_conversations();

    match credentials
        .credential()
        .and_then(|c| c.stream_url(&config.backend_host))
    {
        Some(url) => connection.connect(&url),
        None => warn!("no operator credential, live updates disabled"),
    }

    let mut snapshots = session.watch();
    let mut revision = 0;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.conversations_revision != revision {
                    revision = snapshot.conversations_revision;
                    dispatcher.seed_conversations(&snapshot.conversations);
                }
                info!(
                    connection = snapshot.connection.label(),
                    conversations = snapshot.conversations.len(),
                    pending = snapshot.pending_sends,
                    error = snapshot.last_error.as_deref().unwrap_or(""),
                    "chat state"
                );
            }
            _ = &mut interrupted => {
                info!("shutting down");
                break;
            }
        }
    }

    session.shutdown().await;
    connection.disconnect();
    alerts.abort();
    Ok(())
}
