//! Broadcast coordinator: one Tokio task that knows who is in which room.
//!
//! Every connection registers here with its outbound queue. Room changes
//! and publishes go through the same command channel and are applied one
//! at a time, in arrival order. So a message published after a member
//! switched rooms is never delivered to the room they left, and two
//! messages published in the same room reach every member in the same
//! order.
//!
//! Delivery never waits on a member. A member whose queue is full when a
//! message arrives is evicted: the coordinator drops its sender, and the
//! connection owning the receiver sees the queue close.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chatwire_protocol::{Envelope, Identity, NewMessageEvent, RoomName, SendMessageEvent};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::{Clock, RoomError, SystemClock};

/// Default capacity of the coordinator's command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Identifies one connection to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// A member's outbound queue. Bounded: a member that lets it fill up is
/// evicted.
pub type MemberSender = mpsc::Sender<Envelope>;

enum Command {
    Join {
        member: MemberId,
        identity: Identity,
        sender: MemberSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        member: MemberId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    ChangeRoom {
        member: MemberId,
        room: RoomName,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Publish {
        member: MemberId,
        event: SendMessageEvent,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    MembersIn {
        room: Option<RoomName>,
        reply: oneshot::Sender<Vec<MemberId>>,
    },
    Shutdown,
}

/// Handle to the running coordinator. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHandle {
    sender: mpsc::Sender<Command>,
}

impl BroadcastHandle {
    /// Spawns a coordinator stamping messages with the system clock.
    pub fn spawn() -> Self {
        Self::spawn_with(Arc::new(SystemClock), DEFAULT_COMMAND_BUFFER)
    }

    /// Spawns a coordinator with an explicit clock and command buffer.
    pub fn spawn_with(clock: Arc<dyn Clock>, command_buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(command_buffer.max(1));
        let actor = Coordinator {
            members: HashMap::new(),
            clock,
            receiver: rx,
        };
        tokio::spawn(actor.run());
        Self { sender: tx }
    }

    /// Registers `member` in the lobby (no room).
    pub async fn join(
        &self,
        member: MemberId,
        identity: Identity,
        sender: MemberSender,
    ) -> Result<(), RoomError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Join {
            member,
            identity,
            sender,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Unavailable)?
    }

    /// Forgets `member`. Nothing more is delivered to its queue.
    pub async fn leave(&self, member: MemberId) -> Result<(), RoomError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Leave { member, reply }).await?;
        rx.await.map_err(|_| RoomError::Unavailable)?
    }

    /// Moves `member` into `room`.
    pub async fn change_room(&self, member: MemberId, room: RoomName) -> Result<(), RoomError> {
        if room.is_empty() {
            return Err(RoomError::EmptyRoomName);
        }
        let (reply, rx) = oneshot::channel();
        self.command(Command::ChangeRoom {
            member,
            room,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Unavailable)?
    }

    /// Broadcasts `event` to everyone in `member`'s current room,
    /// `member` included.
    ///
    /// Returns once the message sits in every recipient's queue (or the
    /// recipient was evicted). It does not wait for queue space.
    ///
    /// # Errors
    /// [`RoomError::UnknownMember`] if `member` never joined, left, or was
    /// evicted.
    pub async fn publish(&self, member: MemberId, event: SendMessageEvent) -> Result<(), RoomError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Publish {
            member,
            event,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Unavailable)?
    }

    /// Members currently in `room` (`None` for the lobby), sorted.
    pub async fn members_in(&self, room: Option<RoomName>) -> Result<Vec<MemberId>, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::MembersIn { room, reply }).await?;
        rx.await.map_err(|_| RoomError::Unavailable)
    }

    /// Stops the coordinator after the commands already queued.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.command(Command::Shutdown).await
    }

    async fn command(&self, command: Command) -> Result<(), RoomError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RoomError::Unavailable)
    }
}

struct Member {
    identity: Identity,
    room: Option<RoomName>,
    sender: MemberSender,
}

struct Coordinator {
    members: HashMap<MemberId, Member>,
    clock: Arc<dyn Clock>,
    receiver: mpsc::Receiver<Command>,
}

impl Coordinator {
    async fn run(mut self) {
        tracing::info!("broadcast coordinator started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                Command::Join {
                    member,
                    identity,
                    sender,
                    reply,
                } => {
                    let _ = reply.send(self.handle_join(member, identity, sender));
                }
                Command::Leave { member, reply } => {
                    let _ = reply.send(self.handle_leave(member));
                }
                Command::ChangeRoom {
                    member,
                    room,
                    reply,
                } => {
                    let _ = reply.send(self.handle_change_room(member, room));
                }
                Command::Publish {
                    member,
                    event,
                    reply,
                } => {
                    let _ = reply.send(self.handle_publish(member, event));
                }
                Command::MembersIn { room, reply } => {
                    let _ = reply.send(self.members_in(room.as_ref()));
                }
                Command::Shutdown => break,
            }
        }

        tracing::info!(members = self.members.len(), "broadcast coordinator stopped");
    }

    fn handle_join(
        &mut self,
        member: MemberId,
        identity: Identity,
        sender: MemberSender,
    ) -> Result<(), RoomError> {
        if self.members.contains_key(&member) {
            return Err(RoomError::AlreadyJoined(member));
        }
        tracing::info!(%member, %identity, "member joined");
        self.members.insert(
            member,
            Member {
                identity,
                room: None,
                sender,
            },
        );
        Ok(())
    }

    fn handle_leave(&mut self, member: MemberId) -> Result<(), RoomError> {
        let gone = self
            .members
            .remove(&member)
            .ok_or(RoomError::UnknownMember(member))?;
        tracing::info!(%member, identity = %gone.identity, "member left");
        Ok(())
    }

    fn handle_change_room(&mut self, member: MemberId, room: RoomName) -> Result<(), RoomError> {
        let entry = self
            .members
            .get_mut(&member)
            .ok_or(RoomError::UnknownMember(member))?;
        tracing::debug!(%member, %room, "member changed room");
        entry.room = Some(room);
        Ok(())
    }

    fn handle_publish(
        &mut self,
        member: MemberId,
        event: SendMessageEvent,
    ) -> Result<(), RoomError> {
        let publisher = self
            .members
            .get(&member)
            .ok_or(RoomError::UnknownMember(member))?;

        let message = NewMessageEvent {
            message: event.message,
            from: publisher.identity.clone(),
            sent: self.clock.now_millis(),
        };
        let envelope = match Envelope::from_event(&message) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(%member, error = %e, "failed to encode new_message");
                return Ok(());
            }
        };

        let room = publisher.room.clone();
        let mut evicted = Vec::new();
        for (id, recipient) in self.members.iter().filter(|(_, m)| m.room == room) {
            match recipient.sender.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        member = %id,
                        identity = %recipient.identity,
                        "outbound queue full, evicting"
                    );
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(member = %id, "outbound queue closed, dropping member");
                    evicted.push(*id);
                }
            }
        }
        for id in evicted {
            self.members.remove(&id);
        }

        tracing::debug!(%member, room = ?room, "message broadcast");
        Ok(())
    }

    fn members_in(&self, room: Option<&RoomName>) -> Vec<MemberId> {
        let mut ids: Vec<MemberId> = self
            .members
            .iter()
            .filter(|(_, m)| m.room.as_ref() == room)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
