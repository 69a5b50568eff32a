//! WebSocket trade server.
//!
//! Accepts connections, authenticates characters, routes the JSON
//! control channel (invitations, ping) and hands binary trade frames
//! to the [`TradeNetworkHandler`]. The in-process [`Directory`] backs
//! the [`CharacterGateway`] seam with account balances, inventories
//! and per-connection outbound queues.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::network::auth::{derive_character_id, validate_token, AuthConfig};
use crate::network::codec::PlainItemWire;
use crate::network::handler::{CharacterGateway, TradeNetworkHandler};
use crate::network::protocol::{
    AuthRequest, ControlError, ControlMessage, ControlResponse, ErrorCode,
};
use crate::network::registry::{RegistryError, TradeRegistry};
use crate::trade::item::{ItemStack, UniformStacking};
use crate::trade::session::CharacterId;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections idle longer than this are dropped.
    pub idle_timeout: Duration,
    /// Table slots on each side of a trade.
    pub slots_per_side: usize,
    /// Largest stack a table slot may hold.
    pub max_stack: u32,
    /// Cash granted to newly seen accounts. Development convenience.
    pub starting_cash: u64,
    /// Token validation settings.
    pub auth: AuthConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            slots_per_side: crate::DEFAULT_SLOTS_PER_SIDE,
            max_stack: crate::DEFAULT_MAX_STACK,
            starting_cash: 0,
            auth: AuthConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Trade server errors.
#[derive(Debug, thiserror::Error)]
pub enum TradeServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// One queued outbound message. The sender task picks the frame type:
/// control responses go out as text, trade messages as binary.
#[derive(Debug)]
pub enum Outbound {
    /// JSON control response.
    Control(ControlResponse),
    /// Encoded trade frame.
    Trade(Vec<u8>),
}

struct Account {
    name: String,
    cash: u64,
    inventory: Vec<Option<ItemStack>>,
}

/// In-process character system: accounts plus the outbound queue of
/// each connected character. Implements [`CharacterGateway`] so the
/// trade handler never sees connections directly.
///
/// Locks are synchronous and never held across an await.
pub struct Directory {
    accounts: StdRwLock<BTreeMap<CharacterId, Account>>,
    senders: StdRwLock<BTreeMap<CharacterId, mpsc::Sender<Outbound>>>,
}

impl Directory {
    fn new() -> Self {
        Self {
            accounts: StdRwLock::new(BTreeMap::new()),
            senders: StdRwLock::new(BTreeMap::new()),
        }
    }

    /// Create the account on first sight; refresh the display name on
    /// every login.
    pub fn ensure_account(&self, id: CharacterId, name: String, starting_cash: u64) {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        accounts
            .entry(id)
            .and_modify(|account| account.name = name.clone())
            .or_insert_with(|| Account {
                name,
                cash: starting_cash,
                inventory: Vec::new(),
            });
    }

    fn register_sender(&self, id: CharacterId, sender: mpsc::Sender<Outbound>) {
        let mut senders = self
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if senders.insert(id, sender).is_some() {
            debug!(who = %id.short_hex(), "replaced outbound queue for reconnecting character");
        }
    }

    /// Remove the outbound queue only if `sender` is still the one
    /// registered, returning whether it was. After a reconnect the
    /// queue belongs to the new connection, and the stale connection's
    /// teardown must leave it alone.
    fn unregister_sender_if_current(
        &self,
        id: CharacterId,
        sender: &mpsc::Sender<Outbound>,
    ) -> bool {
        let mut senders = self
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match senders.get(&id) {
            Some(current) if current.same_channel(sender) => {
                senders.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Queue a control response for a connected character.
    pub fn send_control(&self, id: CharacterId, response: ControlResponse) -> bool {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        match senders.get(&id) {
            Some(sender) => sender.try_send(Outbound::Control(response)).is_ok(),
            None => false,
        }
    }

    /// Whether an account exists for this character.
    pub fn knows(&self, id: CharacterId) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Connected character count.
    pub fn online_count(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl CharacterGateway for Directory {
    fn display_name(&self, id: CharacterId) -> Option<String> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|account| account.name.clone())
    }

    fn is_reachable(&self, id: CharacterId) -> bool {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn take_cash(&self, id: CharacterId, amount: u64) -> bool {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match accounts.get_mut(&id) {
            Some(account) if account.cash >= amount => {
                account.cash -= amount;
                true
            }
            _ => false,
        }
    }

    fn give_cash(&self, id: CharacterId, amount: u64) {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(account) = accounts.get_mut(&id) {
            account.cash = account.cash.saturating_add(amount);
        } else {
            warn!(who = %id.short_hex(), amount, "cash credit for unknown account dropped");
        }
    }

    fn take_item(&self, id: CharacterId, inventory_slot: u8, quantity: u8) -> Option<ItemStack> {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let account = accounts.get_mut(&id)?;
        let slot = account.inventory.get_mut(usize::from(inventory_slot))?;
        let stack = slot.as_mut()?;
        let taken = stack.quantity.min(u32::from(quantity));
        if taken == 0 {
            return None;
        }
        stack.quantity -= taken;
        let kind = stack.kind;
        if stack.quantity == 0 {
            *slot = None;
        }
        Some(ItemStack::new(kind, taken))
    }

    fn give_item(&self, id: CharacterId, stack: ItemStack) {
        let mut accounts = self
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(account) = accounts.get_mut(&id) else {
            warn!(who = %id.short_hex(), "item credit for unknown account dropped");
            return;
        };
        // The inventory grows rather than lose a returned stack.
        if let Some(empty) = account.inventory.iter_mut().find(|s| s.is_none()) {
            *empty = Some(stack);
        } else {
            account.inventory.push(Some(stack));
        }
    }

    fn send_frame(&self, id: CharacterId, frame: Vec<u8>) -> bool {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        match senders.get(&id) {
            Some(sender) => sender.try_send(Outbound::Trade(frame)).is_ok(),
            None => false,
        }
    }
}

/// Connected client state, keyed by socket address.
struct ConnectedClient {
    character_id: Option<CharacterId>,
    last_activity: Instant,
    /// This connection's outbound queue, used to prove ownership of
    /// the directory registration at teardown time.
    sender: mpsc::Sender<Outbound>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;
/// Pending invitations, invitee to inviter. One pending invitation per
/// invitee; a newer one replaces it.
type Invites = Arc<RwLock<BTreeMap<CharacterId, CharacterId>>>;

/// The trade server.
pub struct TradeServer {
    config: ServerConfig,
    directory: Arc<Directory>,
    handler: Arc<TradeNetworkHandler>,
    clients: Clients,
    invites: Invites,
    shutdown_tx: broadcast::Sender<()>,
}

impl TradeServer {
    /// Create a server with its directory, registry and handler wired
    /// together.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let directory = Arc::new(Directory::new());
        let registry = Arc::new(TradeRegistry::new(config.slots_per_side));
        let handler = Arc::new(TradeNetworkHandler::new(
            directory.clone(),
            registry,
            Arc::new(UniformStacking {
                max_stack: config.max_stack,
            }),
            Arc::new(PlainItemWire),
        ));

        Self {
            config,
            directory,
            handler,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            invites: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the accept loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), TradeServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("trade server listening on {}", self.config.bind_addr);

        let cleanup_clients = self.clients.clone();
        let cleanup_directory = self.directory.clone();
        let cleanup_handler = self.handler.clone();
        let cleanup_invites = self.invites.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(
                cleanup_clients,
                cleanup_directory,
                cleanup_handler,
                cleanup_invites,
                idle_timeout,
            )
            .await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connected = self.clients.read().await.len();
                            if connected >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Spawn the task owning one WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let directory = self.directory.clone();
        let handler = self.handler.clone();
        let invites = self.invites.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("websocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Outbound>(64);

            {
                let mut clients = clients.write().await;
                clients.insert(
                    addr,
                    ConnectedClient {
                        character_id: None,
                        last_activity: Instant::now(),
                        sender: msg_tx.clone(),
                    },
                );
            }

            let sender_task = tokio::spawn(async move {
                while let Some(outbound) = msg_rx.recv().await {
                    let frame = match outbound {
                        Outbound::Control(response) => match response.to_json() {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                error!("failed to serialize control response: {}", e);
                                continue;
                            }
                        },
                        Outbound::Trade(bytes) => Message::Binary(bytes),
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let control = match ControlMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid control message from {}: {}", addr, e);
                                        let _ = msg_tx.send(Outbound::Control(ControlResponse::Error(
                                            ControlError {
                                                code: ErrorCode::InvalidInput,
                                                message: "invalid message format".to_string(),
                                            },
                                        ))).await;
                                        continue;
                                    }
                                };

                                Self::touch(&clients, addr).await;
                                Self::handle_control(
                                    addr, control, &clients, &directory, &handler, &invites,
                                    &config, &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                Self::touch(&clients, addr).await;
                                let character = {
                                    let clients = clients.read().await;
                                    clients.get(&addr).and_then(|c| c.character_id)
                                };
                                match character {
                                    Some(id) => handler.handle_frame(id, &data).await,
                                    None => {
                                        debug!("binary frame from unauthenticated {}", addr);
                                        let _ = msg_tx.send(Outbound::Control(ControlResponse::Error(
                                            ControlError {
                                                code: ErrorCode::NotAuthenticated,
                                                message: "authenticate before trading".to_string(),
                                            },
                                        ))).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) => {
                                Self::touch(&clients, addr).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("websocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(Outbound::Control(ControlResponse::Shutdown {
                            reason: "server shutting down".to_string(),
                        })).await;
                        break;
                    }
                }
            }

            sender_task.abort();

            let dropped = {
                let mut clients = clients.write().await;
                clients.remove(&addr)
            };
            if let Some(client) = dropped {
                if let Some(id) = client.character_id {
                    Self::drop_character(id, &client.sender, &directory, &handler, &invites).await;
                }
            }
            info!("client {} cleaned up", addr);
        });
    }

    /// Tear down everything tied to a character whose connection went
    /// away: outbound queue, pending invitations, and any open trade.
    /// No-op when the character already reconnected and the directory
    /// registration belongs to the newer connection.
    async fn drop_character(
        id: CharacterId,
        sender: &mpsc::Sender<Outbound>,
        directory: &Arc<Directory>,
        handler: &Arc<TradeNetworkHandler>,
        invites: &Invites,
    ) {
        if !directory.unregister_sender_if_current(id, sender) {
            debug!(who = %id.short_hex(), "stale connection closed after reconnect, keeping state");
            return;
        }
        {
            let mut invites = invites.write().await;
            invites.remove(&id);
            invites.retain(|_, inviter| *inviter != id);
        }
        handler.handle_disconnect(id).await;
    }

    async fn touch(clients: &Clients, addr: SocketAddr) {
        let mut clients = clients.write().await;
        if let Some(client) = clients.get_mut(&addr) {
            client.last_activity = Instant::now();
        }
    }

    async fn authenticated_character(clients: &Clients, addr: SocketAddr) -> Option<CharacterId> {
        clients.read().await.get(&addr).and_then(|c| c.character_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_control(
        addr: SocketAddr,
        msg: ControlMessage,
        clients: &Clients,
        directory: &Arc<Directory>,
        handler: &Arc<TradeNetworkHandler>,
        invites: &Invites,
        config: &ServerConfig,
        sender: &mpsc::Sender<Outbound>,
    ) {
        match msg {
            ControlMessage::Auth(auth) => {
                Self::handle_auth(addr, auth, clients, directory, config, sender).await;
            }
            ControlMessage::Invite { target } => {
                Self::handle_invite(addr, target, clients, directory, handler, invites, sender)
                    .await;
            }
            ControlMessage::AcceptInvite => {
                Self::handle_accept_invite(addr, clients, directory, handler, invites, sender)
                    .await;
            }
            ControlMessage::DeclineInvite => {
                Self::handle_decline_invite(addr, clients, directory, invites).await;
            }
            ControlMessage::Ping { timestamp } => {
                let _ = sender
                    .send(Outbound::Control(ControlResponse::Pong {
                        timestamp,
                        server_time: now_millis(),
                    }))
                    .await;
            }
        }
    }

    async fn handle_auth(
        addr: SocketAddr,
        auth: AuthRequest,
        clients: &Clients,
        directory: &Arc<Directory>,
        config: &ServerConfig,
        sender: &mpsc::Sender<Outbound>,
    ) {
        let character_id = if config.auth.is_configured() {
            match validate_token(&auth.token, &config.auth) {
                Ok(claims) => claims.character_id(),
                Err(e) => {
                    debug!("auth failed for {}: {}", addr, e);
                    let _ = sender
                        .send(Outbound::Control(ControlResponse::AuthResult {
                            success: false,
                            character_id: None,
                            error: Some(e.to_string()),
                            server_version: config.version.clone(),
                        }))
                        .await;
                    return;
                }
            }
        } else {
            // Development mode: the token is taken as a raw account id.
            derive_character_id(&auth.token)
        };

        let name = auth
            .display_name
            .unwrap_or_else(|| format!("char-{}", character_id.short_hex()));
        directory.ensure_account(character_id, name, config.starting_cash);
        directory.register_sender(character_id, sender.clone());

        {
            let mut clients = clients.write().await;
            if let Some(client) = clients.get_mut(&addr) {
                client.character_id = Some(character_id);
            }
        }

        let _ = sender
            .send(Outbound::Control(ControlResponse::AuthResult {
                success: true,
                character_id: Some(hex::encode(character_id.as_bytes())),
                error: None,
                server_version: config.version.clone(),
            }))
            .await;

        debug!("client {} authenticated as {}", addr, character_id.short_hex());
    }

    async fn handle_invite(
        addr: SocketAddr,
        target: String,
        clients: &Clients,
        directory: &Arc<Directory>,
        handler: &Arc<TradeNetworkHandler>,
        invites: &Invites,
        sender: &mpsc::Sender<Outbound>,
    ) {
        let Some(from) = Self::authenticated_character(clients, addr).await else {
            Self::send_error(sender, ErrorCode::NotAuthenticated, "must authenticate first").await;
            return;
        };

        let Some(target) = parse_character_id(&target) else {
            Self::send_error(sender, ErrorCode::InvalidInput, "malformed character id").await;
            return;
        };

        if target == from {
            Self::send_error(sender, ErrorCode::InvalidInput, "cannot trade with yourself").await;
            return;
        }
        if !directory.is_reachable(target) {
            Self::send_error(sender, ErrorCode::CharacterUnavailable, "character is not online")
                .await;
            return;
        }
        if handler.registry().session_for(from).await.is_some()
            || handler.registry().session_for(target).await.is_some()
        {
            Self::send_error(sender, ErrorCode::AlreadyTrading, "a trade is already open").await;
            return;
        }

        invites.write().await.insert(target, from);

        let from_name = directory.display_name(from).unwrap_or_default();
        directory.send_control(
            target,
            ControlResponse::Invited {
                from: hex::encode(from.as_bytes()),
                from_name,
            },
        );
        let _ = sender
            .send(Outbound::Control(ControlResponse::InviteDelivered {
                target: hex::encode(target.as_bytes()),
            }))
            .await;
    }

    async fn handle_accept_invite(
        addr: SocketAddr,
        clients: &Clients,
        directory: &Arc<Directory>,
        handler: &Arc<TradeNetworkHandler>,
        invites: &Invites,
        sender: &mpsc::Sender<Outbound>,
    ) {
        let Some(me) = Self::authenticated_character(clients, addr).await else {
            Self::send_error(sender, ErrorCode::NotAuthenticated, "must authenticate first").await;
            return;
        };

        let inviter = invites.write().await.remove(&me);
        let Some(inviter) = inviter else {
            Self::send_error(sender, ErrorCode::InvalidInput, "no pending invitation").await;
            return;
        };

        // The inviter becomes the source side of the session.
        match handler.open_trade(inviter, me).await {
            Ok(()) => {}
            Err(e @ RegistryError::AlreadyTrading(_)) | Err(e @ RegistryError::SelfTrade) => {
                Self::send_error(sender, ErrorCode::AlreadyTrading, &e.to_string()).await;
                directory.send_control(
                    inviter,
                    ControlResponse::InviteFailed {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    async fn handle_decline_invite(
        addr: SocketAddr,
        clients: &Clients,
        directory: &Arc<Directory>,
        invites: &Invites,
    ) {
        let Some(me) = Self::authenticated_character(clients, addr).await else {
            return;
        };
        if let Some(inviter) = invites.write().await.remove(&me) {
            directory.send_control(
                inviter,
                ControlResponse::InviteFailed {
                    reason: "invitation declined".to_string(),
                },
            );
        }
    }

    async fn send_error(sender: &mpsc::Sender<Outbound>, code: ErrorCode, message: &str) {
        let _ = sender
            .send(Outbound::Control(ControlResponse::Error(ControlError {
                code,
                message: message.to_string(),
            })))
            .await;
    }

    /// Periodically drop idle connections and sweep registry mappings
    /// whose session closed without release.
    async fn run_cleanup_loop(
        clients: Clients,
        directory: Arc<Directory>,
        handler: Arc<TradeNetworkHandler>,
        invites: Invites,
        idle_timeout: Duration,
    ) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let idle: Vec<_> = {
                let clients = clients.read().await;
                clients
                    .iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in idle {
                let dropped = {
                    let mut clients = clients.write().await;
                    clients.remove(&addr)
                };
                if let Some(client) = dropped {
                    if let Some(id) = client.character_id {
                        Self::drop_character(id, &client.sender, &directory, &handler, &invites)
                            .await;
                    }
                }
                info!("removed idle client {}", addr);
            }

            handler.registry().cleanup().await;
        }
    }

    /// Signal the accept loop and all connections to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Characters currently in an open trade.
    pub async fn characters_trading(&self) -> usize {
        self.handler.registry().characters_trading().await
    }

    /// The character directory, exposed for operational tooling.
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }
}

fn parse_character_id(hex_id: &str) -> Option<CharacterId> {
    let bytes = hex::decode(hex_id).ok()?;
    let raw: [u8; 16] = bytes.try_into().ok()?;
    Some(CharacterId(raw))
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::item::ItemKind;

    const A: CharacterId = CharacterId([1; 16]);
    const B: CharacterId = CharacterId([2; 16]);

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.slots_per_side, 8);
        assert!(!config.auth.is_configured());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = TradeServer::new(config);

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.characters_trading().await, 0);
        server.shutdown();
    }

    #[test]
    fn test_directory_cash_floor() {
        let directory = Directory::new();
        directory.ensure_account(A, "a".into(), 50);

        assert!(directory.take_cash(A, 30));
        assert!(!directory.take_cash(A, 30));
        directory.give_cash(A, 10);
        assert!(directory.take_cash(A, 30));
        assert!(!directory.take_cash(B, 1));
    }

    #[test]
    fn test_directory_inventory_grows_for_returns() {
        let directory = Directory::new();
        directory.ensure_account(A, "a".into(), 0);

        directory.give_item(A, ItemStack::new(ItemKind(7), 3));
        directory.give_item(A, ItemStack::new(ItemKind(8), 1));

        let taken = directory.take_item(A, 0, 2).unwrap();
        assert_eq!(taken, ItemStack::new(ItemKind(7), 2));
        // One unit left in slot 0.
        let rest = directory.take_item(A, 0, 5).unwrap();
        assert_eq!(rest, ItemStack::new(ItemKind(7), 1));
        assert!(directory.take_item(A, 0, 1).is_none());
        // The emptied slot is reused first.
        directory.give_item(A, ItemStack::new(ItemKind(9), 4));
        assert_eq!(directory.take_item(A, 0, 4), Some(ItemStack::new(ItemKind(9), 4)));
    }

    #[test]
    fn test_directory_name_refresh_keeps_balance() {
        let directory = Directory::new();
        directory.ensure_account(A, "first".into(), 100);
        assert!(directory.take_cash(A, 40));

        directory.ensure_account(A, "renamed".into(), 100);
        assert_eq!(directory.display_name(A).as_deref(), Some("renamed"));
        // Re-login does not re-grant starting cash.
        assert!(directory.take_cash(A, 60));
        assert!(!directory.take_cash(A, 1));
    }

    #[test]
    fn test_directory_reachability_tracks_senders() {
        let directory = Directory::new();
        directory.ensure_account(A, "a".into(), 0);
        assert!(!directory.is_reachable(A));

        let (tx, mut rx) = mpsc::channel(4);
        directory.register_sender(A, tx.clone());
        assert!(directory.is_reachable(A));
        assert!(directory.send_frame(A, vec![1, 2, 3]));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Trade(bytes)) if bytes == vec![1, 2, 3]));

        assert!(directory.unregister_sender_if_current(A, &tx));
        assert!(!directory.is_reachable(A));
        assert!(!directory.send_frame(A, vec![1]));
    }

    #[test]
    fn test_stale_connection_cannot_unregister_replacement() {
        let directory = Directory::new();
        directory.ensure_account(A, "a".into(), 0);

        let (old_tx, _old_rx) = mpsc::channel(4);
        directory.register_sender(A, old_tx.clone());
        let (new_tx, mut new_rx) = mpsc::channel(4);
        directory.register_sender(A, new_tx.clone());

        // The replaced connection's teardown is a no-op; delivery
        // keeps flowing through the new queue.
        assert!(!directory.unregister_sender_if_current(A, &old_tx));
        assert!(directory.is_reachable(A));
        assert!(directory.send_frame(A, vec![7]));
        assert!(matches!(new_rx.try_recv(), Ok(Outbound::Trade(bytes)) if bytes == vec![7]));

        assert!(directory.unregister_sender_if_current(A, &new_tx));
        assert!(!directory.is_reachable(A));
    }

    #[tokio::test]
    async fn test_reconnect_survives_old_connection_teardown() {
        let directory = Arc::new(Directory::new());
        directory.ensure_account(A, "a".into(), 0);
        directory.ensure_account(B, "b".into(), 0);
        let handler = Arc::new(TradeNetworkHandler::new(
            directory.clone(),
            Arc::new(TradeRegistry::new(8)),
            Arc::new(UniformStacking { max_stack: 100 }),
            Arc::new(PlainItemWire),
        ));
        let invites: Invites = Arc::new(RwLock::new(BTreeMap::new()));

        let (old_tx, _old_rx) = mpsc::channel(8);
        directory.register_sender(A, old_tx.clone());
        let (b_tx, _b_rx) = mpsc::channel(8);
        directory.register_sender(B, b_tx);
        handler.open_trade(A, B).await.unwrap();

        // A reconnects, then the first connection finishes closing.
        let (new_tx, _new_rx) = mpsc::channel(8);
        directory.register_sender(A, new_tx.clone());
        TradeServer::drop_character(A, &old_tx, &directory, &handler, &invites).await;

        // The new connection and the open trade survive.
        assert!(directory.is_reachable(A));
        assert!(handler.registry().session_for(A).await.is_some());

        // Teardown of the live connection still cancels the trade.
        TradeServer::drop_character(A, &new_tx, &directory, &handler, &invites).await;
        assert!(!directory.is_reachable(A));
        assert!(handler.registry().session_for(A).await.is_none());
    }

    #[test]
    fn test_parse_character_id() {
        let id = parse_character_id("0102030405060708090a0b0c0d0e0f10").unwrap();
        assert_eq!(id.as_bytes()[0], 1);
        assert_eq!(id.as_bytes()[15], 16);
        assert!(parse_character_id("xyz").is_none());
        assert!(parse_character_id("0102").is_none());
    }
}
