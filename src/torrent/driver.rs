use super::choker::Choker;
use super::context::{wait_stopped, TorrentContext};
use super::events::TorrentEvent;
use super::mode::{SessionLink, TransferMode};
use super::registry::{Command, PeerStats, SessionId};
use crate::constants::{BACKOFF_EXPONENT_CAP, TRACKER_MIN_INTERVAL};
use crate::peer::{Block, BlockAddress, Message, PeerError, PeerSession, PeerTransport};
use crate::torrent::TorrentError;
use crate::tracker::{AnnounceRequest, Tracker, TrackerEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// How a connection attempt ended.
#[derive(Debug)]
enum SessionEnd {
    /// The session was admitted and has since closed.
    Closed,
    /// The connection failed before admission.
    Failed(PeerError),
    /// Not admitted, or the torrent is stopping. Never retried.
    Refused,
}

/// Runs one connection from handshake to close.
async fn run_session<M: TransferMode>(
    ctx: Arc<TorrentContext>,
    mode: Arc<M>,
    stream: TcpStream,
    outbound: bool,
) -> SessionEnd {
    if ctx.is_stopping() {
        return SessionEnd::Refused;
    }
    let mut stop = ctx.stop_signal();
    let mut transport = match PeerTransport::new(stream) {
        Ok(transport) => transport,
        Err(e) => return SessionEnd::Failed(e),
    };
    let addr = transport.peer_addr();
    let mut session = PeerSession::new(addr, ctx.metadata().piece_count(), outbound);

    let handshake = timeout(
        ctx.config().handshake_timeout,
        session.handshake(
            &mut transport,
            *ctx.metadata().info_hash(),
            ctx.config().peer_id,
        ),
    );
    let peer_id = tokio::select! {
        result = handshake => match result {
            Ok(Ok(peer_id)) => peer_id,
            Ok(Err(e)) => {
                debug!("Handshake with {} failed: {}", addr, e);
                return SessionEnd::Failed(e);
            }
            Err(_) => {
                debug!("Handshake with {} timed out", addr);
                return SessionEnd::Failed(PeerError::Timeout);
            }
        },
        _ = wait_stopped(&mut stop) => return SessionEnd::Refused,
    };

    if ctx.is_stopping() {
        return SessionEnd::Refused;
    }
    let Some((id, mut commands)) = ctx.registry().admit(peer_id, addr) else {
        debug!("Refusing {} ({:?}): peer limit reached or already connected", addr, peer_id);
        return SessionEnd::Refused;
    };

    let direction = if session.is_outbound() { "outbound" } else { "inbound" };
    info!("Peer {} connected as {} session {} ({:?})", addr, direction, id, peer_id);
    ctx.emit(TorrentEvent::PeerConnected { addr, peer_id });

    let result = drive(
        &ctx,
        &*mode,
        id,
        &mut session,
        &mut transport,
        &mut commands,
        &mut stop,
    )
    .await;

    match result {
        Ok(()) => debug!("Session {} with {} closed", id, addr),
        Err(e) => debug!("Session {} with {} ended: {}", id, addr, e),
    }

    session.close();
    mode.on_disconnect(&ctx, &mut SessionLink::new(id, &mut session));
    ctx.registry().remove(id);
    ctx.emit(TorrentEvent::PeerDisconnected { addr });
    SessionEnd::Closed
}

/// The message loop of an admitted session.
async fn drive<M: TransferMode>(
    ctx: &TorrentContext,
    mode: &M,
    id: SessionId,
    session: &mut PeerSession,
    transport: &mut PeerTransport,
    commands: &mut UnboundedReceiver<Command>,
    stop: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<(), PeerError> {
    let period = ctx.config().keepalive_interval;
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let verified = ctx.verified();
    if !verified.is_empty() {
        send(transport, &mut keepalive, &Message::Bitfield(verified.to_bytes())).await?;
    }

    loop {
        if ctx.is_stopping() {
            return Ok(());
        }

        tokio::select! {
            result = transport.receive_message() => {
                let message = result?;
                handle_message(ctx, mode, id, session, transport, &mut keepalive, message).await?;
            }
            command = commands.recv() => match command {
                Some(Command::Close) | None => return Ok(()),
                Some(command) => handle_command(session, transport, &mut keepalive, command).await?,
            },
            _ = keepalive.tick() => {
                trace!("Keep-alive to {}", session.addr);
                transport.send_message(&Message::KeepAlive).await?;
            }
            _ = wait_stopped(stop) => return Ok(()),
            _ = std::future::ready(()), if session.has_uploads() => {
                if let Some(block) = session.next_upload() {
                    let mut link = SessionLink::new(id, session);
                    mode.handle_request(ctx, &mut link, block).await;
                    flush(transport, &mut keepalive, link.take_outgoing()).await?;
                }
            }
        }

        publish_stats(ctx, id, session);
    }
}

async fn handle_message<M: TransferMode>(
    ctx: &TorrentContext,
    mode: &M,
    id: SessionId,
    session: &mut PeerSession,
    transport: &mut PeerTransport,
    keepalive: &mut Interval,
    message: Message,
) -> Result<(), PeerError> {
    if ctx.is_stopping() {
        return Ok(());
    }

    session.apply(&message)?;
    let mut link = SessionLink::new(id, session);

    match message {
        Message::KeepAlive | Message::NotInterested | Message::Port(_) => {}
        Message::Choke => mode.handle_choke(ctx, &mut link).await,
        Message::Unchoke => mode.handle_unchoke(ctx, &mut link).await,
        Message::Interested => {
            let session = link.session_mut();
            if session.choking.am_choking
                && ctx.registry().unchoked_count() < ctx.config().max_unchoked
            {
                session.choking.am_choking = false;
                publish_stats(ctx, id, session);
                link.send(Message::Unchoke);
            }
        }
        Message::Have { piece } => mode.handle_have(ctx, &mut link, piece).await,
        Message::Bitfield(_) => mode.handle_bitfield(ctx, &mut link).await,
        Message::Request {
            index,
            begin,
            length,
        } => {
            if !link.session().choking.am_choking {
                link.session_mut()
                    .queue_upload(BlockAddress::new(index, begin, length));
            }
        }
        Message::Piece { index, begin, data } => {
            ctx.monitor().add_received(data.len() as u64);
            mode.handle_piece(ctx, &mut link, Block::new(index, begin, data))
                .await;
        }
        Message::Cancel {
            index,
            begin,
            length,
        } => {
            link.session_mut()
                .cancel_upload(&BlockAddress::new(index, begin, length));
        }
    }

    let outgoing = link.take_outgoing();
    flush(transport, keepalive, outgoing).await
}

async fn handle_command(
    session: &mut PeerSession,
    transport: &mut PeerTransport,
    keepalive: &mut Interval,
    command: Command,
) -> Result<(), PeerError> {
    match command {
        Command::Send(message) => send(transport, keepalive, &message).await,
        Command::SetChoking(choking) => {
            if session.choking.am_choking == choking {
                return Ok(());
            }
            session.choking.am_choking = choking;
            let message = if choking {
                session.clear_uploads();
                Message::Choke
            } else {
                Message::Unchoke
            };
            send(transport, keepalive, &message).await
        }
        Command::SetInterested(interested) => {
            if session.choking.am_interested == interested {
                return Ok(());
            }
            session.choking.am_interested = interested;
            let message = if interested {
                Message::Interested
            } else {
                Message::NotInterested
            };
            send(transport, keepalive, &message).await
        }
        Command::Cancel(block) => {
            if !session.remove_request(&block) {
                return Ok(());
            }
            send(transport, keepalive, &Message::cancel(block)).await
        }
        Command::Close => Ok(()),
    }
}

async fn send(
    transport: &mut PeerTransport,
    keepalive: &mut Interval,
    message: &Message,
) -> Result<(), PeerError> {
    transport.send_message(message).await?;
    keepalive.reset();
    Ok(())
}

async fn flush(
    transport: &mut PeerTransport,
    keepalive: &mut Interval,
    messages: Vec<Message>,
) -> Result<(), PeerError> {
    for message in &messages {
        send(transport, keepalive, message).await?;
    }
    Ok(())
}

fn publish_stats(ctx: &TorrentContext, id: SessionId, session: &mut PeerSession) {
    let stats = PeerStats {
        download_rate: session.download_rate(),
        upload_rate: session.upload_rate(),
        interested: session.choking.peer_interested,
        choked: session.choking.am_choking,
    };
    ctx.registry().update_stats(id, stats);
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.saturating_sub(1).min(BACKOFF_EXPONENT_CAP))
}

/// Connects to `addr` and keeps reconnecting with exponential backoff until
/// the attempts run out or the torrent stops.
pub(crate) fn spawn_outbound<M: TransferMode>(
    ctx: &Arc<TorrentContext>,
    mode: &Arc<M>,
    addr: SocketAddr,
) {
    if ctx.is_stopping() || ctx.registry().contains_addr(&addr) || !ctx.claim_endpoint(addr) {
        return;
    }

    let task_ctx = ctx.clone();
    let mode = mode.clone();
    let handle = tokio::spawn(async move {
        connect_loop(&task_ctx, mode, addr).await;
        task_ctx.release_endpoint(&addr);
    });
    ctx.track(handle);
}

async fn connect_loop<M: TransferMode>(ctx: &Arc<TorrentContext>, mode: Arc<M>, addr: SocketAddr) {
    let mut stop = ctx.stop_signal();
    let mut attempt = 0u32;

    loop {
        if ctx.is_stopping() {
            return;
        }

        trace!("Connecting to {}", addr);
        let connect = timeout(ctx.config().connect_timeout, TcpStream::connect(addr));
        let end = tokio::select! {
            result = connect => match result {
                Ok(Ok(stream)) => run_session(ctx.clone(), mode.clone(), stream, true).await,
                Ok(Err(e)) => SessionEnd::Failed(e.into()),
                Err(_) => SessionEnd::Failed(PeerError::Timeout),
            },
            _ = wait_stopped(&mut stop) => return,
        };

        match end {
            SessionEnd::Refused => return,
            SessionEnd::Failed(e @ (PeerError::InfoHashMismatch | PeerError::SelfConnection)) => {
                debug!("Not retrying {}: {}", addr, e);
                return;
            }
            SessionEnd::Failed(e) => trace!("Connection to {} failed: {}", addr, e),
            SessionEnd::Closed => attempt = 0,
        }

        if ctx.is_stopping() {
            return;
        }
        attempt += 1;
        if attempt > ctx.config().max_reconnect_attempts {
            debug!("Giving up on {} after {} attempts", addr, attempt - 1);
            return;
        }

        let delay = backoff(ctx.config().reconnect_base_delay, attempt);
        debug!("Reconnecting to {} in {:?} (attempt {})", addr, delay, attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_stopped(&mut stop) => return,
        }
    }
}

/// Binds `addr` and runs every accepted connection through the driver.
pub(crate) async fn listen<M: TransferMode>(
    ctx: &Arc<TorrentContext>,
    mode: &Arc<M>,
    addr: SocketAddr,
) -> Result<SocketAddr, TorrentError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("Listening for peers on {}", local_addr);

    let task_ctx = ctx.clone();
    let mode = mode.clone();
    let handle = tokio::spawn(async move {
        let mut stop = task_ctx.stop_signal();
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        if task_ctx.is_stopping() {
                            break;
                        }
                        trace!("Inbound connection from {}", peer);
                        let session_ctx = task_ctx.clone();
                        let mode = mode.clone();
                        task_ctx.track(tokio::spawn(async move {
                            run_session(session_ctx, mode, stream, false).await;
                        }));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                _ = wait_stopped(&mut stop) => break,
            }
        }
    });
    ctx.track(handle);

    Ok(local_addr)
}

/// Periodically reallocates upload slots.
pub(crate) fn spawn_choker(ctx: &Arc<TorrentContext>) {
    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        let mut choker = Choker::new(task_ctx.config().max_unchoked);
        let mut stop = task_ctx.stop_signal();
        let period = task_ctx.config().choking_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if task_ctx.is_stopping() {
                        break;
                    }
                    let stats = task_ctx.registry().stats();
                    for (id, unchoke) in choker.compute(&stats, task_ctx.is_seeding()) {
                        trace!("Choker: session {} unchoke={}", id, unchoke);
                        task_ctx.registry().send(id, Command::SetChoking(!unchoke));
                    }
                }
                _ = wait_stopped(&mut stop) => break,
            }
        }
    });
    ctx.track(handle);
}

fn announce_request(ctx: &TorrentContext, event: TrackerEvent) -> AnnounceRequest {
    let transfer = ctx.monitor().snapshot();
    AnnounceRequest {
        info_hash: *ctx.metadata().info_hash(),
        peer_id: ctx.config().peer_id,
        port: ctx.config().listen_port,
        uploaded: transfer.sent,
        downloaded: transfer.received,
        left: ctx.strategist().remaining_bytes(),
        event,
    }
}

/// Announces to `tracker` and connects to the peers it returns.
pub(crate) fn spawn_tracker<M: TransferMode, T: Tracker>(
    ctx: &Arc<TorrentContext>,
    mode: &Arc<M>,
    tracker: Arc<T>,
) {
    let task_ctx = ctx.clone();
    let mode = mode.clone();
    let handle = tokio::spawn(async move {
        let ctx = task_ctx;
        let mut stop = ctx.stop_signal();
        let mut events = ctx.subscribe();
        let mut event = TrackerEvent::Started;

        'announce: while !ctx.is_stopping() {
            let delay = match tracker.announce(announce_request(&ctx, event)).await {
                Ok(response) => {
                    debug!(
                        "Tracker announce ({}) returned {} peers",
                        event.as_str(),
                        response.peers.len()
                    );
                    for peer in &response.peers {
                        spawn_outbound(&ctx, &mode, *peer);
                    }
                    response.next_announce(TRACKER_MIN_INTERVAL)
                }
                Err(e) => {
                    warn!("Tracker announce failed: {}", e);
                    ctx.emit(TorrentEvent::Error(format!("announce failed: {}", e)));
                    TRACKER_MIN_INTERVAL
                }
            };
            event = TrackerEvent::None;

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    received = events.recv() => match received {
                        Ok(TorrentEvent::Completed) => {
                            event = TrackerEvent::Completed;
                            break;
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = wait_stopped(&mut stop) => break 'announce,
                }
            }
        }

        if let Err(e) = tracker
            .announce(announce_request(&ctx, TrackerEvent::Stopped))
            .await
        {
            debug!("Stopped announce failed: {}", e);
        }
    });
    ctx.track(handle);
}
