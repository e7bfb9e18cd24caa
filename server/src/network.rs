//! Server network layer handling UDP communications and intent dispatch

use crate::client_manager::{ClientManager, ConnectionId};
use crate::gateway::{Gateway, Outgoing};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ClientPacket, ServerPacket, CLIENT_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest datagram the receiver accepts
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

const STATS_INTERVAL: Duration = Duration::from_secs(30);
/// Empty rooms older than this are deleted on the stats tick.
const UNCLAIMED_ROOM_TTL: Duration = Duration::from_secs(60);

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: ClientPacket,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: ConnectionId,
    },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: ServerPacket,
        addr: SocketAddr,
    },
}

/// Server settings taken from the command line
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub max_clients: usize,
    pub client_timeout: Duration,
    pub seed: Option<u64>,
}

/// Main server coordinating networking and the gateway.
///
/// All room state lives in the gateway, which is only touched from the main
/// loop in [`Server::run`], so intents are applied strictly one at a time.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    gateway: Gateway,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(&config.addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.client_timeout,
            ))),
            gateway: Gateway::new(config.seed),
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that can stop the main loop with [`ServerMessage::Shutdown`]
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<ClientPacket>(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that drops silent connections
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &ServerPacket,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: ServerPacket, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Resolves connection ids to addresses and queues the packets
    async fn deliver(&self, outgoing: Vec<Outgoing>) {
        if outgoing.is_empty() {
            return;
        }

        let clients = self.clients.read().await;
        for Outgoing { to, packet } in outgoing {
            match clients.addr_of(to) {
                Some(addr) => self.send_packet(packet, addr),
                None => debug!("Dropping packet for departed connection {}", to),
            }
        }
    }

    /// Runs the disconnect path for a connection that is already gone from
    /// the client manager
    async fn connection_lost(&mut self, client_id: ConnectionId) {
        let outgoing = self.gateway.disconnect(client_id);
        self.deliver(outgoing).await;
    }

    /// Processes an incoming packet
    async fn handle_packet(&mut self, packet: ClientPacket, addr: SocketAddr) {
        if let ClientPacket::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            let client_id = clients.find_client_by_addr(addr);
            if let Some(client_id) = client_id {
                clients.touch(client_id);
            }
            client_id
        };

        let Some(client_id) = client_id else {
            warn!("Packet from unconnected address {}", addr);
            self.send_packet(
                ServerPacket::Error {
                    message: "Not connected".to_string(),
                },
                addr,
            );
            return;
        };

        match packet {
            ClientPacket::Heartbeat => {}
            ClientPacket::Disconnect => {
                self.clients.write().await.remove_client(client_id);
                self.connection_lost(client_id).await;
            }
            intent => {
                let outgoing = self.gateway.handle(client_id, intent);
                self.deliver(outgoing).await;
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != CLIENT_VERSION {
            warn!("Rejecting client {} with version {}", addr, client_version);
            self.send_packet(
                ServerPacket::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        // Remove existing connection if present
        let existing_client_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };
        if let Some(existing_id) = existing_client_id {
            info!("Removing existing client {} from {}", existing_id, addr);
            self.clients.write().await.remove_client(existing_id);
            self.connection_lost(existing_id).await;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };

        let response = match client_id {
            Some(client_id) => ServerPacket::Connected { client_id },
            None => {
                warn!("Server full, refusing {}", addr);
                ServerPacket::Disconnected {
                    reason: "Server full".to_string(),
                }
            }
        };
        self.send_packet(response, addr);
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut stats_interval = interval(STATS_INTERVAL);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.connection_lost(client_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    let swept = self.gateway.sweep_unclaimed_rooms(UNCLAIMED_ROOM_TTL);
                    if swept > 0 {
                        info!("Deleted {} rooms nobody joined", swept);
                    }
                    let client_count = self.clients.read().await.len();
                    if client_count > 0 {
                        debug!(
                            "{} connections, {} sessions, {} rooms",
                            client_count,
                            self.gateway.session_count(),
                            self.gateway.registry().len()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{
        Animal, DiceResult, Face, Herd, TradeItems, LOG_WINDOW, MAX_PENDING_TRADES,
        MAX_PLAYERS_PER_ROOM,
    };
    use std::net::{IpAddr, Ipv4Addr};

    fn test_config() -> ServerConfig {
        ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            max_clients: 1,
            client_timeout: Duration::from_secs(5),
            seed: Some(3),
        }
    }

    async fn exchange(socket: &UdpSocket, packet: &ClientPacket) -> ServerPacket {
        socket.send(&serialize(packet).unwrap()).await.unwrap();
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buffer))
            .await
            .expect("no reply from server")
            .unwrap();
        deserialize(&buffer[..len]).unwrap()
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        tx.send(ServerMessage::PacketReceived {
            packet: ClientPacket::Connect { client_version: 1 },
            addr,
        })
        .unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(packet, ClientPacket::Connect { client_version: 1 });
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_worst_case_room_fits_one_datagram() {
        const MAX_UDP_PAYLOAD: usize = 65_507;

        let mut gateway = Gateway::new(Some(1));
        let created = gateway.handle(
            1,
            ClientPacket::CreateRoom {
                name: "\u{1F404}".repeat(32),
            },
        );
        let room_id = match &created[0].packet {
            ServerPacket::RoomCreated { room } => room.id,
            other => panic!("Unexpected packet {:?}", other),
        };

        let mut players = Vec::new();
        for connection in 1..=MAX_PLAYERS_PER_ROOM as ConnectionId {
            let out = gateway.handle(
                connection,
                ClientPacket::RegisterPlayer {
                    nick: "\u{1F416}".repeat(24),
                },
            );
            let player_id = match &out[0].packet {
                ServerPacket::PlayerRegistered { player_id, .. } => *player_id,
                other => panic!("Unexpected packet {:?}", other),
            };
            gateway.handle(
                connection,
                ClientPacket::JoinRoom {
                    room_id,
                    player_id,
                    nick: String::new(),
                },
            );
            players.push(player_id);
        }
        for connection in 1..=MAX_PLAYERS_PER_ROOM as ConnectionId {
            gateway.handle(connection, ClientPacket::PlayerReady);
        }

        let every_animal: TradeItems = Animal::ALL.iter().map(|&animal| (animal, 1)).collect();
        for _ in 0..MAX_PENDING_TRADES + 5 {
            gateway.handle(
                1,
                ClientPacket::ProposeTradeToPlayer {
                    target_player_id: players[1],
                    offered_items: TradeItems::new(),
                    requested_items: every_animal.clone(),
                },
            );
        }

        let mut room = gateway.registry().room(room_id).unwrap().snapshot();
        let game = room.game.as_mut().unwrap();
        assert_eq!(game.pending_trades.len(), MAX_PENDING_TRADES);
        // Longer than any line the game writes, even with two maximal nicks.
        let log = vec!["\u{1F33E}".repeat(100); LOG_WINDOW];
        game.log = log.clone();

        let packet = ServerPacket::DiceRollResult {
            player_id: players[0],
            nick: "\u{1F416}".repeat(24),
            dice_result: DiceResult::new(Face::Horse, Face::Fox),
            log,
            before: Herd::new(),
            after: Herd::new(),
            updated_room: room,
        };
        let data = serialize(&packet).unwrap();
        assert!(
            data.len() < MAX_UDP_PAYLOAD,
            "worst-case broadcast is {} bytes",
            data.len()
        );
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let config = ServerConfig {
            addr: "not an address".to_string(),
            ..test_config()
        };
        tokio_test::block_on(async {
            assert!(Server::new(config).await.is_err());

            let server = tokio_test::assert_ok!(Server::new(test_config()).await);
            assert_ne!(server.local_addr().unwrap().port(), 0);
        });
    }

    #[tokio::test]
    async fn test_connect_and_server_full() {
        let mut server = Server::new(test_config()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let control = server.control();
        let handle = tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });

        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        first.connect(server_addr).await.unwrap();
        assert_eq!(
            exchange(&first, &ClientPacket::Connect { client_version: CLIENT_VERSION }).await,
            ServerPacket::Connected { client_id: 1 }
        );

        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        second.connect(server_addr).await.unwrap();
        assert_eq!(
            exchange(&second, &ClientPacket::Connect { client_version: CLIENT_VERSION }).await,
            ServerPacket::Disconnected {
                reason: "Server full".to_string()
            }
        );
        assert!(matches!(
            exchange(&second, &ClientPacket::ListRooms).await,
            ServerPacket::Error { .. }
        ));

        control.send(ServerMessage::Shutdown).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_refused() {
        let mut server = Server::new(test_config()).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let control = server.control();
        let handle = tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(server_addr).await.unwrap();
        assert_eq!(
            exchange(&socket, &ClientPacket::Connect { client_version: 99 }).await,
            ServerPacket::Disconnected {
                reason: "Protocol version mismatch".to_string()
            }
        );

        control.send(ServerMessage::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }
}
