//! Relay network layer: UDP transport, peer registry and room scheduling

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::error::MatchError;
use crate::room::MatchContext;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PeerId, RoomId, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: PeerId,
        room: Option<RoomId>,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the relay loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// UDP relay hosting any number of rooms
///
/// The relay never simulates anything itself. It routes packets between
/// peers, and each room's [`MatchContext`] decides which peer runs the
/// authoritative loop and when that changes hands.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    rooms: HashMap<RoomId, MatchContext>,
    config: ServerConfig,
    epoch: Instant,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            rooms: HashMap::new(),
            config,
            epoch: Instant::now(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn room(&self, room_id: RoomId) -> Option<&MatchContext> {
        self.rooms.get(&room_id)
    }

    /// Milliseconds since the relay started; the clock every room runs on.
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 4096];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(GameMessage::SendPacket { packet, addr }) = game_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that drops peers whose transport went silent
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.client_timeout;

        tokio::spawn(async move {
            let mut interval = interval(std::time::Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for (client_id, room) in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id, room }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn reject(&self, addr: SocketAddr, reason: impl ToString) {
        self.send_packet(
            Packet::Rejected {
                reason: reason.to_string(),
            },
            addr,
        );
    }

    /// Sends everything a room queued and drops the room once it is empty.
    async fn flush_room(&mut self, room_id: RoomId) {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let outbound = room.drain_outbound();
        let empty = room.is_empty();

        {
            let clients = self.clients.read().await;
            for message in outbound {
                match clients.addr_of(message.to) {
                    Some(addr) => self.send_packet(message.packet, addr),
                    None => debug!("Dropping packet for departed peer {}", message.to),
                }
            }
        }

        if empty {
            info!("Room {room_id} is empty, closing it");
            self.rooms.remove(&room_id);
        }
    }

    /// Routes one datagram to the peer's room
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let now = self.now_ms();
        let peer = {
            let mut clients = self.clients.write().await;
            clients.get_or_add(addr)
        };
        let Some(peer) = peer else {
            warn!("Relay full, refusing {}", addr);
            self.reject(addr, "Relay full");
            return;
        };

        let current_room = {
            let clients = self.clients.read().await;
            clients.room_of(peer)
        };

        match (packet, current_room) {
            (
                Packet::JoinRoom {
                    room_id,
                    name,
                    client_version,
                },
                _,
            ) => {
                if client_version != PROTOCOL_VERSION {
                    warn!("Peer {peer} speaks protocol {client_version}, expected {PROTOCOL_VERSION}");
                    self.reject(addr, "Protocol version mismatch");
                    return;
                }
                if let Some(old_room) = current_room.filter(|&r| r != room_id) {
                    self.leave_room(peer, old_room, now).await;
                }
                self.join_room(peer, room_id, &name, addr, now).await;
            }
            (Packet::Ping { timestamp }, None) => {
                self.send_packet(Packet::Pong { timestamp }, addr);
            }
            (_, None) => {
                self.reject(addr, "Join a room first");
            }
            (Packet::LeaveRoom, Some(room_id)) => {
                self.leave_room(peer, room_id, now).await;
            }
            (packet, Some(room_id)) => {
                let result = match self.rooms.get_mut(&room_id) {
                    Some(room) => room.handle(peer, packet, now),
                    None => Err(MatchError::UnknownRoom(room_id)),
                };
                if let Err(e) = result {
                    warn!("Peer {peer} in room {room_id}: {e}");
                    self.reject(addr, e);
                }
                self.flush_room(room_id).await;
            }
        }
    }

    async fn join_room(&mut self, peer: PeerId, room_id: RoomId, name: &str, addr: SocketAddr, now: u64) {
        let match_config = self.config.match_config.clone();
        let room = self
            .rooms
            .entry(room_id)
            .or_insert_with(|| MatchContext::new(room_id, match_config));

        match room.join(peer, name, now) {
            Ok(()) => {
                let mut clients = self.clients.write().await;
                clients.set_room(peer, Some(room_id), Some(name));
            }
            Err(e) => {
                warn!("Peer {peer} could not join room {room_id}: {e}");
                self.reject(addr, e);
            }
        }
        self.flush_room(room_id).await;
    }

    async fn leave_room(&mut self, peer: PeerId, room_id: RoomId, now: u64) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            if let Err(e) = room.leave(peer, now) {
                debug!("Leave from peer {peer}: {e}");
            }
        }
        {
            let mut clients = self.clients.write().await;
            clients.set_room(peer, None, None);
        }
        self.flush_room(room_id).await;
    }

    /// Fires every room's due timers
    async fn poll_rooms(&mut self) {
        let now = self.now_ms();
        let room_ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        for room_id in room_ids {
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.poll(now);
            }
            self.flush_room(room_id).await;
        }
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut poll_interval = interval(self.config.poll_interval);

        info!("Relay started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id, room }) => {
                            info!("Peer {client_id} timed out");
                            if let Some(room_id) = room {
                                let now = self.now_ms();
                                if let Some(room) = self.rooms.get_mut(&room_id) {
                                    let _ = room.leave(client_id, now);
                                }
                                self.flush_room(room_id).await;
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Relay shutting down");
                            break;
                        }
                    }
                },

                _ = poll_interval.tick() => {
                    self.poll_rooms().await;
                },
            }
        }

        Ok(())
    }
}
