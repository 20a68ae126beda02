//! Broker session registry.
//!
//! One live MQTT session per user, keyed by account username. The
//! registry is an injected object owned by the server, not a global;
//! lifecycle operations serialize per username so two concurrent
//! connects for the same account cannot clobber each other's session,
//! while different users proceed independently.

use std::sync::Arc;

use cabio_core::config::BrokerConfig;
use cabio_storage::User;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::feed::Feed;
use crate::publish::CommandPayload;
use crate::router::FeedRouter;

/// A live broker session for one user.
pub struct BrokerSession {
    /// Distinguishes this session from any replacement under the same
    /// username, so a dying event loop only deregisters itself.
    session_id: Uuid,
    broker_username: String,
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl BrokerSession {
    /// Broker-side username of this session.
    pub fn broker_username(&self) -> &str {
        &self.broker_username
    }
}

type SessionMap = Arc<DashMap<String, BrokerSession>>;

/// Process-wide session registry, injected where needed.
pub struct SessionRegistry {
    config: BrokerConfig,
    router: Arc<FeedRouter>,
    sessions: SessionMap,
    /// Per-username critical sections for connect/disconnect/reconnect.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new(config: BrokerConfig, router: Arc<FeedRouter>) -> Self {
        Self {
            config,
            router,
            sessions: Arc::new(DashMap::new()),
            locks: DashMap::new(),
        }
    }

    fn user_lock(&self, username: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Is there a live session for this username?
    pub fn is_connected(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Open a broker session for a user.
    ///
    /// Fails with `MissingCredentials` when the account has no broker
    /// username/key, `AlreadyConnected` when a session exists, and
    /// `Transport` when the handshake fails or times out. A session that
    /// fails its handshake is never registered and is not retried here.
    pub async fn connect(&self, user: &User) -> Result<()> {
        let lock = self.user_lock(&user.username);
        let _guard = lock.lock().await;

        if self.sessions.contains_key(&user.username) {
            return Err(BridgeError::AlreadyConnected(user.username.clone()));
        }
        self.open_session(user).await
    }

    /// Tear down any existing session, then connect again. Idempotent on
    /// the teardown side: reconnecting a disconnected user just connects.
    pub async fn reconnect(&self, user: &User) -> Result<()> {
        let lock = self.user_lock(&user.username);
        let _guard = lock.lock().await;

        self.teardown(&user.username).await;
        self.open_session(user).await
    }

    /// Disconnect a user's session after verifying their password.
    ///
    /// Reauthentication protects against a stolen API session silently
    /// severing the device link. A missing session is a warning, not an
    /// error.
    pub async fn disconnect(&self, user: &User, current_password: &str) -> Result<()> {
        if !bcrypt::verify(current_password, &user.password_hash)? {
            return Err(BridgeError::BadCredentials);
        }

        let lock = self.user_lock(&user.username);
        let _guard = lock.lock().await;

        if self.teardown(&user.username).await {
            info!(username = %user.username, "broker session disconnected");
        } else {
            warn!(username = %user.username, "no active broker session to disconnect");
        }
        Ok(())
    }

    /// Remove and close a session without reauthentication. Used
    /// internally and by rollback paths that just created the session.
    pub async fn teardown(&self, username: &str) -> bool {
        match self.sessions.remove(username) {
            Some((_, session)) => {
                let _ = session.client.disconnect().await;
                session.task.abort();
                true
            }
            None => false,
        }
    }

    /// Connect every user at startup. One user's failure never blocks
    /// the rest; failures are logged and skipped. Returns the number of
    /// sessions established.
    pub async fn connect_all(&self, users: &[User]) -> usize {
        let mut connected = 0;
        for user in users {
            match self.connect(user).await {
                Ok(()) => {
                    connected += 1;
                }
                Err(e) => {
                    error!(username = %user.username, error = %e, "startup connect failed");
                }
            }
        }
        info!(connected, total = users.len(), "startup broker connects finished");
        connected
    }

    /// Publish a command on the requesting user's session.
    ///
    /// Synchronous from the caller's perspective: returns once the
    /// publish is accepted or fails. `NotConnected` when the user has no
    /// session, `PublishFailed` on transport failure or timeout.
    pub async fn publish_command(
        &self,
        username: &str,
        feed: Feed,
        payload: &CommandPayload,
    ) -> Result<()> {
        let (client, broker_username) = match self.sessions.get(username) {
            Some(session) => (session.client.clone(), session.broker_username.clone()),
            None => return Err(BridgeError::NotConnected(username.to_string())),
        };

        let topic = feed.topic_for(&broker_username);
        let body = serde_json::to_vec(payload)?;

        match timeout(
            self.config.publish_timeout,
            client.publish(topic.as_str(), QoS::AtLeastOnce, false, body),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(username, topic = %topic, "command published");
                Ok(())
            }
            Ok(Err(e)) => Err(BridgeError::PublishFailed(e.to_string())),
            Err(_) => Err(BridgeError::PublishFailed(format!(
                "publish to {} timed out",
                topic
            ))),
        }
    }

    /// Establish the session: handshake, subscribe, register, spawn the
    /// event loop task. Callers must hold the user's lock.
    async fn open_session(&self, user: &User) -> Result<()> {
        let (broker_username, broker_key) = match (&user.broker_username, &user.broker_key) {
            (Some(u), Some(k)) if !u.is_empty() && !k.is_empty() => (u.clone(), k.clone()),
            _ => return Err(BridgeError::MissingCredentials(user.username.clone())),
        };

        // Randomized client id: the broker closes both sides of an id
        // collision, so every attempt gets a fresh one.
        let client_id = format!("client-{}-{}", user.id, random_suffix());
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_credentials(&broker_username, &broker_key);
        options.set_keep_alive(self.config.keep_alive);
        if self.config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 10);

        // Drive the event loop inline until the broker acknowledges the
        // connection. A transport error here closes the attempt without
        // ever registering a session.
        match timeout(self.config.connect_timeout, wait_for_connack(&mut event_loop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BridgeError::Transport(format!(
                    "connect to {}:{} timed out",
                    self.config.host, self.config.port
                )))
            }
        }

        for feed in Feed::ALL {
            client
                .subscribe(feed.topic_for(&broker_username), QoS::AtLeastOnce)
                .await
                .map_err(|e| BridgeError::Transport(e.to_string()))?;
        }

        let session_id = Uuid::new_v4();
        // The loop task holds off until the session is registered, so an
        // instant transport failure still finds the entry to deregister.
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_session_loop(
            event_loop,
            ready_rx,
            self.sessions.clone(),
            user.username.clone(),
            session_id,
            self.router.clone(),
        ));

        self.sessions.insert(
            user.username.clone(),
            BrokerSession {
                session_id,
                broker_username,
                client,
                task,
            },
        );
        let _ = ready_tx.send(());

        info!(username = %user.username, "broker session established");
        Ok(())
    }
}

/// Poll until the broker acknowledges the connection.
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<()> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(BridgeError::Transport(e.to_string())),
        }
    }
}

/// Per-session event loop: routes inbound publishes until the transport
/// fails, then deregisters this session (and only this one).
async fn run_session_loop(
    mut event_loop: EventLoop,
    ready: oneshot::Receiver<()>,
    sessions: SessionMap,
    username: String,
    session_id: Uuid,
    router: Arc<FeedRouter>,
) {
    let _ = ready.await;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                router.handle_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!(username = %username, "broker initiated disconnect");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(username = %username, error = %e, "broker session error, closing");
                break;
            }
        }
    }

    // A reconnect may already have replaced this session; only remove
    // the entry if it is still ours.
    sessions.remove_if(&username, |_, session| session.session_id == session_id);
    info!(username = %username, "broker session closed");
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queues::IngestionQueues;
    use crate::resolve::CabinetResolver;
    use cabio_storage::{Role, Stores};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_registry(dir: &TempDir, host: &str, port: u16) -> SessionRegistry {
        let stores = Stores::open(dir.path()).unwrap();
        let (queues, _receivers) = IngestionQueues::new();
        let router = Arc::new(FeedRouter::new(CabinetResolver::new(stores), queues));
        let config = BrokerConfig {
            host: host.to_string(),
            port,
            tls: false,
            keep_alive: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(1),
        };
        SessionRegistry::new(config, router)
    }

    fn test_user(password_hash: &str) -> User {
        User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            fullname: "Alice".to_string(),
            email: "a@example.com".to_string(),
            password_hash: password_hash.to_string(),
            role: Role::User,
            broker_username: Some("aio_user".to_string()),
            broker_key: Some("aio_key".to_string()),
            phone_number: None,
            refresh_token: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir, "127.0.0.1", 1);

        let mut user = test_user("hash");
        user.broker_key = None;
        let err = registry.connect(&user).await.unwrap_err();
        assert!(matches!(err, BridgeError::MissingCredentials(_)));
        assert!(!registry.is_connected("alice"));
    }

    #[tokio::test]
    async fn test_connect_transport_error_registers_nothing() {
        let dir = TempDir::new().unwrap();
        // Nothing listens on port 1; the handshake must fail fast and
        // leave the registry empty.
        let registry = test_registry(&dir, "127.0.0.1", 1);

        let err = registry.connect(&test_user("hash")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_all_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir, "127.0.0.1", 1);

        let mut without_creds = test_user("hash");
        without_creds.username = "bob".to_string();
        without_creds.broker_username = None;

        // Both fail (one on credentials, one on transport), but the loop
        // visits every user and reports zero sessions.
        let connected = registry
            .connect_all(&[test_user("hash"), without_creds])
            .await;
        assert_eq!(connected, 0);
    }

    #[tokio::test]
    async fn test_disconnect_verifies_password() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir, "127.0.0.1", 1);

        let hash = bcrypt::hash("secret", 4).unwrap();
        let user = test_user(&hash);

        let err = registry.disconnect(&user, "wrong").await.unwrap_err();
        assert!(matches!(err, BridgeError::BadCredentials));

        // Correct password with no live session: a warning, not an error.
        registry.disconnect(&user, "secret").await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_without_session_fails() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir, "127.0.0.1", 1);

        let payload = CommandPayload::manual("a@example.com", "dev-1", 2, true);
        let err = registry
            .publish_command("alice", Feed::Relay, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_teardown_without_session_is_noop() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir, "127.0.0.1", 1);
        assert!(!registry.teardown("alice").await);
    }
}
