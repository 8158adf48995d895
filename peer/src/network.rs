use crate::input::BallChaser;
use crate::session::PeerSession;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{timestamp_ms, Packet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// A peer connected to the relay over UDP
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session: PeerSession,
    planner: Option<BallChaser>,
    fake_ping_ms: u64,
    tick_interval: Duration,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        session: PeerSession,
        fake_ping_ms: u64,
        tick_interval: Duration,
        play: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            session,
            planner: play.then(|| BallChaser::new(shared::Team::Spectator)),
            fake_ping_ms,
            tick_interval,
        })
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    /// Sends one packet, holding it back by half the simulated latency.
    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn send_all(&self, packets: Vec<Packet>) {
        if packets.is_empty() {
            return;
        }
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }
        for packet in packets {
            let result = match serialize(&packet) {
                Ok(data) => self.socket.send_to(&data, self.server_addr).await.map(|_| ()),
                Err(e) => {
                    error!("Failed to encode packet: {}", e);
                    continue;
                }
            };
            if let Err(e) = result {
                error!("Error sending packet: {}", e);
            }
        }
    }

    /// Feeds the planner's buttons into the session.
    fn plan_input(&mut self) -> Option<Packet> {
        let planner = self.planner.as_mut()?;
        planner.set_team(self.session.my_team()?);
        let (me, ball) = self.session.positions()?;
        let input = planner.plan(me, ball);
        self.session.set_input(input)
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Joining room via {}", self.server_addr);
        self.send_packet(&self.session.join_packet()).await?;

        let mut tick_interval = interval(self.tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut buffer = [0u8; 4096];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    let replies = self.session.handle(packet, timestamp_ms());
                                    self.send_all(replies).await;
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let mut outgoing = self.session.tick(timestamp_ms());
                    outgoing.extend(self.plan_input());
                    self.send_all(outgoing).await;
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Leaving room");
                    break;
                }
            }
        }

        if self.session.peer_id().is_some() {
            let _ = self.send_packet(&Packet::LeaveRoom).await;
        }

        Ok(())
    }
}
