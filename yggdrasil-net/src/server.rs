//! Role-aware TCP server for show clients.
//!
//! Accepts connections, binds identities, turns client messages into
//! `ShowCommand`s, and fans out role-filtered state syncs after every
//! accepted command. The main thread owns connection metadata; each socket
//! gets a blocking reader thread, and a single writer thread owns all write
//! halves so a slow client can never block the show.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};

use yggdrasil_types::projection::{audience_view, controller_view, projector_view};
use yggdrasil_types::{FactionId, SeatId, ShowCommand, ShowState, UserId};

use crate::framing::{frame_bytes, read_frame, write_frame};
use crate::protocol::{ClientMessage, ConnId, Role, ServerMessage, ViewPayload};

/// What kind of frame is being queued — determines the drop policy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FrameKind {
    /// Full state sync — superseded by a newer sync.
    Sync,
    /// Identity, errors, pings, reconnect requests — never dropped.
    Control,
}

/// A queued frame awaiting delivery to a slow client.
struct QueuedFrame {
    data: Vec<u8>,
    /// Bytes already written (for partial write resume).
    offset: usize,
    kind: FrameKind,
}

/// Maximum frames in a connection's outbox before declaring it stalled.
const MAX_OUTBOX_DEPTH: usize = 8;

/// Write timeout for client sockets.
const WRITE_TIMEOUT: Duration = Duration::from_millis(10);

/// Connection write half — owned by the writer thread.
struct ConnWriter {
    stream: TcpStream,
    outbox: VecDeque<QueuedFrame>,
}

impl ConnWriter {
    /// Try to write a frame directly; queue the remainder on partial write
    /// or timeout.
    fn send_frame(&mut self, data: &[u8], kind: FrameKind) -> io::Result<()> {
        match self.stream.write(data) {
            Ok(n) if n == data.len() => Ok(()),
            Ok(n) => {
                self.queue_frame(data[n..].to_vec(), kind);
                Ok(())
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                self.queue_frame(data.to_vec(), kind);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply the drop policy and push a frame into the outbox. A new sync
    /// supersedes any unstarted queued sync — only the latest state matters.
    fn queue_frame(&mut self, data: Vec<u8>, kind: FrameKind) {
        if kind == FrameKind::Sync {
            self.outbox
                .retain(|f| f.kind != FrameKind::Sync || f.offset > 0);
        }
        self.outbox.push_back(QueuedFrame {
            data,
            offset: 0,
            kind,
        });
    }

    /// Drain the outbox. Returns Ok(true) if it emptied.
    fn flush_outbox(&mut self) -> io::Result<bool> {
        while let Some(front) = self.outbox.front_mut() {
            let remaining = &front.data[front.offset..];
            match self.stream.write(remaining) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    front.offset += n;
                    if front.offset >= front.data.len() {
                        self.outbox.pop_front();
                    } else {
                        return Ok(false);
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn is_stalled(&self) -> bool {
        self.outbox.len() > MAX_OUTBOX_DEPTH
    }
}

// ── Writer thread protocol ──────────────────────────────────────

enum WriterCommand {
    AddConn { conn: ConnId, stream: TcpStream },
    RemoveConn { conn: ConnId },
    SendTo {
        conn: ConnId,
        frame: Vec<u8>,
        kind: FrameKind,
    },
    Broadcast { frame: Vec<u8>, kind: FrameKind },
    Shutdown,
}

enum WriterFeedback {
    /// Write failed or outbox overflowed — main thread should drop.
    ConnStalled { conn: ConnId },
}

fn writer_thread(cmd_rx: Receiver<WriterCommand>, feedback_tx: Sender<WriterFeedback>) {
    let mut writers: HashMap<ConnId, ConnWriter> = HashMap::new();

    loop {
        let mut got_command = false;
        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    got_command = true;
                    match cmd {
                        WriterCommand::AddConn { conn, stream } => {
                            writers.insert(
                                conn,
                                ConnWriter {
                                    stream,
                                    outbox: VecDeque::new(),
                                },
                            );
                        }
                        WriterCommand::RemoveConn { conn } => {
                            writers.remove(&conn);
                        }
                        WriterCommand::SendTo { conn, frame, kind } => {
                            if let Some(writer) = writers.get_mut(&conn) {
                                let failed = (!writer.outbox.is_empty()
                                    && writer.flush_outbox().is_err())
                                    || writer.send_frame(&frame, kind).is_err()
                                    || writer.is_stalled();
                                if failed {
                                    writers.remove(&conn);
                                    let _ =
                                        feedback_tx.send(WriterFeedback::ConnStalled { conn });
                                }
                            }
                        }
                        WriterCommand::Broadcast { frame, kind } => {
                            let mut stalled = Vec::new();
                            for (&conn, writer) in &mut writers {
                                let failed = (!writer.outbox.is_empty()
                                    && writer.flush_outbox().is_err())
                                    || writer.send_frame(&frame, kind).is_err()
                                    || writer.is_stalled();
                                if failed {
                                    stalled.push(conn);
                                }
                            }
                            for conn in stalled {
                                writers.remove(&conn);
                                let _ = feedback_tx.send(WriterFeedback::ConnStalled { conn });
                            }
                        }
                        WriterCommand::Shutdown => return,
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => return,
            }
        }

        // One outbox flush pass across all writers.
        let mut stalled = Vec::new();
        for (&conn, writer) in &mut writers {
            if !writer.outbox.is_empty() {
                match writer.flush_outbox() {
                    Err(_) => stalled.push(conn),
                    Ok(_) => {
                        if writer.is_stalled() {
                            stalled.push(conn);
                        }
                    }
                }
            }
        }
        for conn in stalled {
            writers.remove(&conn);
            let _ = feedback_tx.send(WriterFeedback::ConnStalled { conn });
        }

        if !got_command {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

// ── Reader threads ──────────────────────────────────────────────

enum ConnEvent {
    Message(ConnId, ClientMessage),
    Closed(ConnId),
}

fn conn_reader_thread(conn: ConnId, stream: TcpStream, tx: Sender<ConnEvent>) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame::<_, ClientMessage>(&mut reader) {
            Ok(msg) => {
                if tx.send(ConnEvent::Message(conn, msg)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("reader for {:?} finished: {}", conn, e);
                let _ = tx.send(ConnEvent::Closed(conn));
                break;
            }
        }
    }
}

// ── The server ──────────────────────────────────────────────────

/// Heartbeat policy: ping at `interval`; a connection whose last sign of
/// life is older than `interval + missed_pongs * pong_timeout` is dropped
/// and a disconnect command synthesised for its user.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub missed_pongs: u32,
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            missed_pongs: 2,
            pong_timeout: Duration::from_secs(5),
        }
    }
}

/// Connection metadata — stays on the main thread.
struct ConnInfo {
    role: Role,
    /// Identity bound at join; overrides any user id in later messages.
    user_id: Option<UserId>,
    /// Faction room, joined on assignment.
    faction: Option<FactionId>,
    last_seen: Instant,
}

/// A connection awaiting its Join message.
struct PendingConn {
    stream: TcpStream,
}

/// Something the main loop should feed into the Conductor.
#[derive(Debug)]
pub enum ServerInput {
    /// Command originated by a connection; errors route back to it.
    Command { conn: ConnId, command: ShowCommand },
    /// Command synthesised by the transport (heartbeat expiry, stalled
    /// writer).
    Internal { command: ShowCommand },
}

pub struct ShowServer {
    listener: TcpListener,
    pending: HashMap<ConnId, PendingConn>,
    conns: HashMap<ConnId, ConnInfo>,
    event_rx: Receiver<ConnEvent>,
    event_tx: Sender<ConnEvent>,
    next_conn_id: u64,
    heartbeat: HeartbeatConfig,
    last_ping: Instant,
    id_seed: u64,
    writer_tx: Sender<WriterCommand>,
    writer_feedback_rx: Receiver<WriterFeedback>,
    writer_handle: Option<JoinHandle<()>>,
}

impl ShowServer {
    pub fn bind(addr: &str, heartbeat: HeartbeatConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        let (event_tx, event_rx) = mpsc::channel();
        let (writer_tx, writer_rx) = mpsc::channel();
        let (feedback_tx, feedback_rx) = mpsc::channel();
        let writer_handle = thread::spawn(move || {
            writer_thread(writer_rx, feedback_tx);
        });

        let id_seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            | 1;

        info!("show server listening on {}", addr);

        Ok(Self {
            listener,
            pending: HashMap::new(),
            conns: HashMap::new(),
            event_rx,
            event_tx,
            next_conn_id: 0,
            heartbeat,
            last_ping: Instant::now(),
            id_seed,
            writer_tx,
            writer_feedback_rx: feedback_rx,
            writer_handle: Some(writer_handle),
        })
    }

    /// Accept pending TCP connections; they become live after Join.
    pub fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    // Accepted streams may inherit nonblocking from the
                    // listener (macOS/BSD). The reader thread needs blocking.
                    if let Err(e) = stream.set_nonblocking(false) {
                        error!("failed to set stream blocking: {}", e);
                        continue;
                    }
                    let conn = ConnId::new(self.next_conn_id);
                    self.next_conn_id += 1;

                    let read_stream = match stream.try_clone() {
                        Ok(s) => s,
                        Err(e) => {
                            error!("failed to clone stream: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_write_timeout(Some(WRITE_TIMEOUT)) {
                        error!("failed to set write timeout: {}", e);
                        continue;
                    }

                    let tx = self.event_tx.clone();
                    thread::spawn(move || {
                        conn_reader_thread(conn, read_stream, tx);
                    });

                    self.pending.insert(conn, PendingConn { stream });
                    info!("connection {:?} from {}, awaiting join", conn, addr);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Drain client messages into conductor inputs. Needs the current state
    /// to answer Join handshakes with an immediate sync.
    pub fn poll(&mut self, state: &ShowState) -> Vec<ServerInput> {
        let mut out = Vec::new();

        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                ConnEvent::Closed(conn) => {
                    if let Some(command) = self.drop_conn(conn, "socket closed") {
                        out.push(ServerInput::Internal { command });
                    }
                }
                ConnEvent::Message(conn, msg) => {
                    if let Some(info) = self.conns.get_mut(&conn) {
                        info.last_seen = Instant::now();
                    }
                    self.handle_message(conn, msg, state, &mut out);
                }
            }
        }
        out
    }

    fn handle_message(
        &mut self,
        conn: ConnId,
        msg: ClientMessage,
        state: &ShowState,
        out: &mut Vec<ServerInput>,
    ) {
        match msg {
            ClientMessage::Join {
                mode,
                user_id,
                seat_id,
                faction,
            } => self.handle_join(conn, mode, user_id, seat_id, faction, state, out),
            ClientMessage::Pong => {
                // last_seen already updated.
            }
            ClientMessage::ReconnectUser { last_version, .. } => {
                // The wire user id is ignored; the socket-bound identity wins.
                match self.bound_audience(conn) {
                    Some(user_id) => out.push(ServerInput::Command {
                        conn,
                        command: ShowCommand::UserReconnect {
                            user_id,
                            last_version,
                        },
                    }),
                    None => self.send_error(conn, "reconnect before join", None),
                }
            }
            ClientMessage::Vote {
                faction_vote,
                personal_vote,
            } => match self.bound_audience(conn) {
                Some(user_id) => out.push(ServerInput::Command {
                    conn,
                    command: ShowCommand::SubmitVote {
                        user_id,
                        faction_vote,
                        personal_vote,
                    },
                }),
                None => self.send_error(conn, "votes require an audience session", None),
            },
            ClientMessage::CoupVote => match self.bound_audience(conn) {
                Some(user_id) => out.push(ServerInput::Command {
                    conn,
                    command: ShowCommand::SubmitCoupVote { user_id },
                }),
                None => self.send_error(conn, "coup votes require an audience session", None),
            },
            ClientMessage::FigTreeResponse { text } => match self.bound_audience(conn) {
                Some(user_id) => out.push(ServerInput::Command {
                    conn,
                    command: ShowCommand::SubmitFigTreeResponse { user_id, text },
                }),
                None => self.send_error(conn, "responses require an audience session", None),
            },
            ClientMessage::Command { command: value } => {
                let role = self.conns.get(&conn).map(|c| c.role);
                if role != Some(Role::Controller) {
                    warn!("non-controller {:?} sent a command", conn);
                    self.send_error(conn, "commands require the controller role", None);
                    return;
                }
                let name = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .map(|s| s.to_string());
                match serde_json::from_value::<ShowCommand>(value) {
                    Ok(mut command) => {
                        // Anti-impersonation: any user id in the command is
                        // rewritten from the socket-bound identity.
                        if let (Some(field), Some(bound)) = (
                            command.user_id_mut(),
                            self.conns.get(&conn).and_then(|c| c.user_id.clone()),
                        ) {
                            *field = bound;
                        }
                        out.push(ServerInput::Command { conn, command });
                    }
                    Err(e) => {
                        self.send_error(conn, format!("unknown command: {e}"), name);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_join(
        &mut self,
        conn: ConnId,
        mode: Role,
        user_id: Option<UserId>,
        seat_id: Option<SeatId>,
        faction: Option<FactionId>,
        state: &ShowState,
        out: &mut Vec<ServerInput>,
    ) {
        let Some(mut pending) = self.pending.remove(&conn) else {
            warn!("{:?} sent join after already joining", conn);
            return;
        };
        let user_id = user_id.unwrap_or_else(|| self.generate_user_id());

        // Identity and first sync go straight onto the stream before the
        // write half moves to the writer thread.
        let identity = ServerMessage::Identity {
            user_id: user_id.clone(),
        };
        if let Err(e) = write_frame(&mut pending.stream, &identity) {
            warn!("failed to send identity to {:?}: {}", conn, e);
            return;
        }
        let sync = ServerMessage::StateSync {
            view: view_for(mode, state, &user_id),
        };
        if let Err(e) = write_frame(&mut pending.stream, &sync) {
            warn!("failed to send initial sync to {:?}: {}", conn, e);
            return;
        }

        let _ = self.writer_tx.send(WriterCommand::AddConn {
            conn,
            stream: pending.stream,
        });
        self.conns.insert(
            conn,
            ConnInfo {
                role: mode,
                user_id: Some(user_id.clone()),
                faction,
                last_seen: Instant::now(),
            },
        );
        info!("{:?} joined as {:?} ({})", conn, mode, user_id);

        if mode == Role::Audience {
            out.push(ServerInput::Command {
                conn,
                command: ShowCommand::UserConnect {
                    user_id,
                    seat_id,
                    faction,
                },
            });
        }
    }

    /// The socket-bound audience identity, if this is a joined audience
    /// connection.
    fn bound_audience(&self, conn: ConnId) -> Option<UserId> {
        self.conns
            .get(&conn)
            .filter(|c| c.role == Role::Audience)
            .and_then(|c| c.user_id.clone())
    }

    fn generate_user_id(&mut self) -> UserId {
        // Xorshift over a clock seed; ids only need uniqueness per show.
        let mut x = self.id_seed;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.id_seed = x;
        format!("user-{:012x}", x & 0xffff_ffff_ffff)
    }

    /// Drop a connection; returns a synthesised disconnect for its user.
    fn drop_conn(&mut self, conn: ConnId, reason: &str) -> Option<ShowCommand> {
        self.pending.remove(&conn);
        let _ = self.writer_tx.send(WriterCommand::RemoveConn { conn });
        let info = self.conns.remove(&conn)?;
        info!("dropping {:?} ({:?}): {}", conn, info.role, reason);
        match (info.role, info.user_id) {
            (Role::Audience, Some(user_id)) => Some(ShowCommand::UserDisconnect { user_id }),
            _ => None,
        }
    }

    /// Heartbeat tick: ping everyone at the configured interval, drop
    /// connections that went silent, surface writer stalls.
    pub fn tick_heartbeat(&mut self) -> Vec<ServerInput> {
        let mut out = Vec::new();

        while let Ok(WriterFeedback::ConnStalled { conn }) = self.writer_feedback_rx.try_recv() {
            if let Some(command) = self.drop_conn(conn, "write stalled") {
                out.push(ServerInput::Internal { command });
            }
        }

        let now = Instant::now();
        if now.duration_since(self.last_ping) >= self.heartbeat.interval {
            self.last_ping = now;
            let cutoff =
                self.heartbeat.interval + self.heartbeat.pong_timeout * self.heartbeat.missed_pongs;
            let dead: Vec<ConnId> = self
                .conns
                .iter()
                .filter(|(_, c)| now.duration_since(c.last_seen) > cutoff)
                .map(|(&conn, _)| conn)
                .collect();
            for conn in dead {
                if let Some(command) = self.drop_conn(conn, "heartbeat timeout") {
                    out.push(ServerInput::Internal { command });
                }
            }
            self.broadcast(&ServerMessage::Ping, FrameKind::Control);
        }
        out
    }

    /// Send every connection its role projection. One frame per controller
    /// and projector socket, one per audience socket (user-specific).
    pub fn broadcast_state(&mut self, state: &ShowState) {
        let mut shared: HashMap<Role, Vec<u8>> = HashMap::new();
        let mut sends: Vec<(ConnId, Vec<u8>)> = Vec::new();

        for (&conn, info) in &self.conns {
            let frame = match info.role {
                Role::Audience => {
                    let Some(user_id) = info.user_id.as_ref() else {
                        continue;
                    };
                    match frame_bytes(&ServerMessage::StateSync {
                        view: ViewPayload::Audience(audience_view(state, user_id)),
                    }) {
                        Ok(f) => f,
                        Err(e) => {
                            error!("failed to serialise audience sync: {}", e);
                            continue;
                        }
                    }
                }
                role => {
                    if !shared.contains_key(&role) {
                        let view = match role {
                            Role::Controller => ViewPayload::Controller(controller_view(state)),
                            _ => ViewPayload::Projector(projector_view(state)),
                        };
                        match frame_bytes(&ServerMessage::StateSync { view }) {
                            Ok(f) => {
                                shared.insert(role, f);
                            }
                            Err(e) => {
                                error!("failed to serialise {:?} sync: {}", role, e);
                                continue;
                            }
                        }
                    }
                    match shared.get(&role) {
                        Some(f) => f.clone(),
                        None => continue,
                    }
                }
            };
            sends.push((conn, frame));
        }

        for (conn, frame) in sends {
            let _ = self.writer_tx.send(WriterCommand::SendTo {
                conn,
                frame,
                kind: FrameKind::Sync,
            });
        }
    }

    /// Record a user's faction room (audience connections only).
    pub fn join_faction_room(&mut self, user_id: &UserId, faction: FactionId) {
        for info in self.conns.values_mut() {
            if info.role == Role::Audience && info.user_id.as_deref() == Some(user_id.as_str()) {
                info.faction = Some(faction);
            }
        }
    }

    pub fn send_error(
        &mut self,
        conn: ConnId,
        message: impl Into<String>,
        command: Option<String>,
    ) {
        let msg = ServerMessage::Error {
            message: message.into(),
            command,
        };
        match frame_bytes(&msg) {
            Ok(frame) => {
                let _ = self.writer_tx.send(WriterCommand::SendTo {
                    conn,
                    frame,
                    kind: FrameKind::Control,
                });
            }
            Err(e) => error!("failed to serialise error frame: {}", e),
        }
    }

    /// Ask every client to tear down and re-join.
    pub fn force_reconnect_all(&mut self) {
        self.broadcast(&ServerMessage::ForceReconnect, FrameKind::Control);
    }

    fn broadcast(&mut self, msg: &ServerMessage, kind: FrameKind) {
        match frame_bytes(msg) {
            Ok(frame) => {
                let _ = self.writer_tx.send(WriterCommand::Broadcast { frame, kind });
            }
            Err(e) => error!("failed to serialise broadcast: {}", e),
        }
    }

    pub fn client_count(&self) -> usize {
        self.conns.len()
    }

    /// Stop the writer thread. Reader threads die with their sockets.
    pub fn shutdown(mut self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }
    }
}

fn view_for(role: Role, state: &ShowState, user_id: &UserId) -> ViewPayload {
    match role {
        Role::Controller => ViewPayload::Controller(controller_view(state)),
        Role::Projector => ViewPayload::Projector(projector_view(state)),
        Role::Audience => ViewPayload::Audience(audience_view(state, user_id)),
    }
}
