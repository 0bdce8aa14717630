//! OpenFlow Session Layer: accepts switch connections, performs the Hello/Features
//! handshake, and thereafter dispatches typed messages to the classifier and poller. Reads
//! happen on a single per-connection task so message processing is serialised per switch;
//! writes from any task (classifier, poller, installer) are serialised through a bounded
//! `mpsc` queue drained by a dedicated writer task, so no write-path mutex is ever needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use bytes::BytesMut;
use parking_lot::RwLock;
use qos_proto::ofp::action::{Action, OFPP_CONTROLLER};
use qos_proto::ofp::header::{OfpHeader, OFP_HEADER_LEN, OFP_VERSION};
use qos_proto::ofp::message::{ErrorMsg, OfpMessage};
use qos_proto::ofp::OxmMatch;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier;
use crate::installer;
use crate::poller;
use crate::state::SharedState;

const OFPET_HELLO_FAILED: u16 = 0;
const OFPHFC_INCOMPATIBLE: u16 = 0;
const WRITE_QUEUE_DEPTH: usize = 64;

/// A connected switch: the dpid it announced and the channel that reaches its writer task.
pub struct Session {
    pub dpid: u64,
    pub peer_addr: SocketAddr,
    tx: mpsc::Sender<BytesMut>,
    xid: AtomicU32,
}

impl Session {
    fn next_xid(&self) -> u32 {
        self.xid.fetch_add(1, Ordering::Relaxed)
    }

    /// Encodes `msg` with a freshly allocated xid and enqueues it for the writer task.
    pub async fn send(&self, msg: &OfpMessage) -> Result<()> {
        let xid = self.next_xid();
        let buf = msg.encode(xid);
        self.tx
            .send(buf)
            .await
            .map_err(|_| anyhow!("session {} writer task gone", self.dpid))
    }
}

pub type SessionMap = Arc<RwLock<HashMap<u64, Arc<Session>>>>;

pub async fn accept_loop(state: Arc<SharedState>) -> Result<()> {
    let socket = state.config.ofp_listen_socket();
    let listener = TcpListener::bind(&socket)
        .await
        .with_context(|| format!("binding OpenFlow listener on {socket}"))?;
    info!(%socket, "qos-controller listening for OpenFlow connections");

    loop {
        let (stream, peer_addr) = listener.accept().await.context("accepting switch connection")?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                warn!(%peer_addr, error = %e, "switch session ended");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, state: Arc<SharedState>) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (mut read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel::<BytesMut>(WRITE_QUEUE_DEPTH);
    let writer_handle = tokio::spawn(write_loop(write_half, rx));

    let mut handshake_xid = 0u32;
    let mut next_xid = || {
        let xid = handshake_xid;
        handshake_xid += 1;
        xid
    };

    tx.send(OfpMessage::Hello.encode(next_xid()))
        .await
        .map_err(|_| anyhow!("writer task gone before handshake"))?;

    let (header, body) = read_frame(&mut read_half).await?;
    match OfpMessage::decode(&header, &body) {
        Ok(OfpMessage::Hello) if header.version == OFP_VERSION => {}
        other => {
            let reason = match other {
                Ok(_) => "unexpected first message".to_string(),
                Err(e) => e.to_string(),
            };
            warn!(%peer_addr, version = header.version, reason, "rejecting incompatible switch");
            let err = OfpMessage::Error(ErrorMsg {
                error_type: OFPET_HELLO_FAILED,
                code: OFPHFC_INCOMPATIBLE,
                data: b"only OpenFlow 1.3 is spoken here".to_vec(),
            });
            let _ = tx.send(err.encode(next_xid())).await;
            writer_handle.abort();
            bail!("incompatible OpenFlow version {:#x} from {peer_addr}", header.version);
        }
    }

    tx.send(OfpMessage::FeaturesRequest.encode(next_xid()))
        .await
        .map_err(|_| anyhow!("writer task gone before features request"))?;
    let (header, body) = read_frame(&mut read_half).await?;
    let features = match OfpMessage::decode(&header, &body)? {
        OfpMessage::FeaturesReply(f) => f,
        other => bail!("expected FeaturesReply, got {other:?}"),
    };
    let dpid = features.datapath_id;
    info!(dpid, %peer_addr, n_tables = features.n_tables, "switch connected");

    let session = Arc::new(Session {
        dpid,
        peer_addr,
        tx: tx.clone(),
        xid: AtomicU32::new(1),
    });
    state.sessions.write().insert(dpid, session.clone());

    if let Err(e) = install_table_miss(&session).await {
        warn!(dpid, error = %e, "failed to install table-miss rule");
    }

    let cancel = CancellationToken::new();
    let poller_handle = tokio::spawn(poller::run(state.clone(), session.clone(), cancel.clone()));

    let result = read_loop(&mut read_half, state.clone(), session.clone()).await;

    state.sessions.write().remove(&dpid);
    cancel.cancel();
    poller_handle.abort();
    writer_handle.abort();
    info!(dpid, %peer_addr, "switch disconnected");
    result
}

async fn install_table_miss(session: &Session) -> Result<()> {
    installer::add_flow(
        session,
        0,
        0,
        0,
        0,
        OxmMatch::new(vec![]),
        vec![Action::output(OFPP_CONTROLLER)],
    )
    .await
}

async fn read_loop(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    state: Arc<SharedState>,
    session: Arc<Session>,
) -> Result<()> {
    loop {
        let (header, body) = read_frame(read_half).await?;
        match OfpMessage::decode(&header, &body) {
            Ok(msg) => dispatch(state.clone(), session.clone(), msg),
            Err(e) => debug!(dpid = session.dpid, error = %e, "dropping unparseable message"),
        }
    }
}

fn dispatch(state: Arc<SharedState>, session: Arc<Session>, msg: OfpMessage) {
    match msg {
        OfpMessage::EchoRequest(data) => {
            let session = session.clone();
            tokio::spawn(async move {
                let _ = session.send(&OfpMessage::EchoReply(data)).await;
            });
        }
        OfpMessage::PacketIn(packet_in) => {
            tokio::spawn(async move {
                classifier::handle_packet_in(state, session, packet_in).await;
            });
        }
        OfpMessage::PortStatsReply(stats) => {
            tokio::spawn(async move {
                poller::handle_port_stats_reply(state, session.dpid, stats).await;
            });
        }
        OfpMessage::QueueStatsReply(stats) => {
            tokio::spawn(async move {
                poller::handle_queue_stats_reply(state, session.dpid, stats).await;
            });
        }
        OfpMessage::PortStatus(p) => {
            info!(dpid = session.dpid, port = p.port_no, link_down = p.link_down, "port status");
        }
        OfpMessage::Error(e) => {
            warn!(dpid = session.dpid, error_type = e.error_type, code = e.code, "switch reported error");
        }
        other => {
            debug!(dpid = session.dpid, msg = ?other, "unhandled message type");
        }
    }
}

async fn write_loop(mut write_half: tokio::net::tcp::OwnedWriteHalf, mut rx: mpsc::Receiver<BytesMut>) {
    while let Some(buf) = rx.recv().await {
        if let Err(e) = write_half.write_all(&buf).await {
            warn!(error = %e, "switch write failed, closing session");
            return;
        }
    }
}

async fn read_frame(read_half: &mut tokio::net::tcp::OwnedReadHalf) -> Result<(OfpHeader, Vec<u8>)> {
    let mut header_buf = [0u8; OFP_HEADER_LEN];
    read_half
        .read_exact(&mut header_buf)
        .await
        .context("reading OpenFlow header")?;
    let header = OfpHeader::decode(&header_buf)?;
    let body_len = (header.length as usize).saturating_sub(OFP_HEADER_LEN);
    let mut body = vec![0u8; body_len];
    if body_len > 0 {
        read_half.read_exact(&mut body).await.context("reading OpenFlow body")?;
    }
    Ok((header, body))
}
