//! Cross-node work distribution.
//!
//! Rank 0 is the master; everyone else pulls. The protocol is two message
//! kinds, each carrying one `i32`: a request (payload ignored) and a
//! response holding the next work-item index, or [`NO_MORE_WORK`] once the
//! plan is exhausted. The channel only needs to be reliable and ordered,
//! so the TCP mapping below is a one-byte tag plus the little-endian
//! payload over one connection per worker.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, info, warn};

use fovea_core::error::{EngineError, Result};

/// Response payload meaning the plan is exhausted.
pub const NO_MORE_WORK: i32 = -1;

const TAG_REQUEST: u8 = 1;
const TAG_RESPONSE: u8 = 2;
const HELLO_MAGIC: u32 = 0x464F_5645; // "FOVE"
const CONNECT_RETRY: Duration = Duration::from_millis(200);
const CONNECT_ATTEMPTS: u32 = 150;

/// The engine's view of the job's process group.
pub trait Cluster: Send {
    fn rank(&self) -> u32;
    fn world(&self) -> u32;

    /// Master: wait up to `timeout` for a pending work request and return
    /// the requesting rank.
    fn poll_request(&mut self, timeout: Duration) -> Result<Option<u32>>;

    /// Master: answer `worker` with a work-item index or [`NO_MORE_WORK`].
    fn respond(&mut self, worker: u32, item: i32) -> Result<()>;

    /// Worker: ask the master for the next work-item index, blocking.
    fn request_work(&mut self) -> Result<i32>;
}

/// Trivial cluster for a single-process job.
pub struct SingleNode;

impl Cluster for SingleNode {
    fn rank(&self) -> u32 {
        0
    }

    fn world(&self) -> u32 {
        1
    }

    fn poll_request(&mut self, _timeout: Duration) -> Result<Option<u32>> {
        Ok(None)
    }

    fn respond(&mut self, _worker: u32, _item: i32) -> Result<()> {
        Err(EngineError::Comm("single-node job has no workers".into()))
    }

    fn request_work(&mut self) -> Result<i32> {
        Err(EngineError::Comm("single-node job has no master".into()))
    }
}

fn comm_err(what: &str, err: std::io::Error) -> EngineError {
    EngineError::Comm(format!("{what}: {err}"))
}

fn write_frame(stream: &mut TcpStream, tag: u8, payload: i32) -> Result<()> {
    let mut frame = [0u8; 5];
    frame[0] = tag;
    frame[1..].copy_from_slice(&payload.to_le_bytes());
    stream
        .write_all(&frame)
        .map_err(|e| comm_err("send frame", e))
}

fn read_frame(stream: &mut TcpStream) -> Result<(u8, i32)> {
    let mut frame = [0u8; 5];
    stream
        .read_exact(&mut frame)
        .map_err(|e| comm_err("receive frame", e))?;
    let payload = i32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]);
    Ok((frame[0], payload))
}

enum Role {
    Master {
        pending: Receiver<u32>,
        writers: Arc<Mutex<HashMap<u32, TcpStream>>>,
    },
    Worker {
        stream: TcpStream,
    },
}

/// TCP implementation of the request/response channel.
pub struct TcpCluster {
    rank: u32,
    world: u32,
    local_addr: Option<SocketAddr>,
    role: Role,
}

impl TcpCluster {
    /// Bind the master side. Worker connections are accepted in the
    /// background, so construction returns before the cluster is complete;
    /// requests only ever arrive from connected workers.
    pub fn master(addr: &str, world: u32) -> Result<Self> {
        if world < 2 {
            return Err(EngineError::Comm(
                "a TCP cluster needs at least two ranks".into(),
            ));
        }
        let listener = TcpListener::bind(addr).map_err(|e| comm_err("bind", e))?;
        let local_addr = listener.local_addr().map_err(|e| comm_err("local addr", e))?;
        info!(%local_addr, world, "cluster master listening");

        let (pending_tx, pending) = unbounded();
        let writers: Arc<Mutex<HashMap<u32, TcpStream>>> = Arc::new(Mutex::new(HashMap::new()));
        {
            let writers = writers.clone();
            std::thread::Builder::new()
                .name("fovea-accept".into())
                .spawn(move || accept_loop(listener, world, pending_tx, writers))
                .map_err(|e| comm_err("spawn accept thread", e))?;
        }

        Ok(Self {
            rank: 0,
            world,
            local_addr: Some(local_addr),
            role: Role::Master { pending, writers },
        })
    }

    /// Connect a worker rank to the master, retrying while the master is
    /// still coming up.
    pub fn worker(addr: &str, rank: u32, world: u32) -> Result<Self> {
        if rank == 0 || rank >= world {
            return Err(EngineError::Comm(format!(
                "invalid worker rank {rank} in a world of {world}"
            )));
        }
        let mut last_err = None;
        let mut stream = None;
        for _ in 0..CONNECT_ATTEMPTS {
            match TcpStream::connect(addr) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(CONNECT_RETRY);
                }
            }
        }
        let mut stream = stream.ok_or_else(|| {
            comm_err(
                "connect to master",
                last_err.unwrap_or_else(|| std::io::Error::other("no attempt made")),
            )
        })?;
        stream
            .set_nodelay(true)
            .map_err(|e| comm_err("set nodelay", e))?;

        let mut hello = [0u8; 8];
        hello[..4].copy_from_slice(&HELLO_MAGIC.to_le_bytes());
        hello[4..].copy_from_slice(&rank.to_le_bytes());
        stream
            .write_all(&hello)
            .map_err(|e| comm_err("send hello", e))?;
        debug!(rank, addr, "connected to cluster master");

        Ok(Self {
            rank,
            world,
            local_addr: None,
            role: Role::Worker { stream },
        })
    }

    /// Master's bound address, for tests that bind port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

fn accept_loop(
    listener: TcpListener,
    world: u32,
    pending: Sender<u32>,
    writers: Arc<Mutex<HashMap<u32, TcpStream>>>,
) {
    let mut connected = 0;
    while connected + 1 < world {
        let (mut stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "cluster accept failed");
                continue;
            }
        };
        let mut hello = [0u8; 8];
        if let Err(err) = stream.read_exact(&mut hello) {
            warn!(%peer, error = %err, "dropping connection without hello");
            continue;
        }
        let magic = u32::from_le_bytes([hello[0], hello[1], hello[2], hello[3]]);
        let rank = u32::from_le_bytes([hello[4], hello[5], hello[6], hello[7]]);
        if magic != HELLO_MAGIC || rank == 0 || rank >= world {
            warn!(%peer, magic, rank, "dropping connection with bad hello");
            continue;
        }
        let _ = stream.set_nodelay(true);
        let reader = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                warn!(rank, error = %err, "could not clone worker stream");
                continue;
            }
        };
        if let Ok(mut map) = writers.lock() {
            map.insert(rank, stream);
        }
        debug!(rank, %peer, "worker joined the cluster");
        connected += 1;

        let pending = pending.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("fovea-peer-{rank}"))
            .spawn(move || request_reader(reader, rank, pending));
        if let Err(err) = spawned {
            warn!(rank, error = %err, "could not spawn peer reader");
        }
    }
}

fn request_reader(mut stream: TcpStream, rank: u32, pending: Sender<u32>) {
    loop {
        match read_frame(&mut stream) {
            Ok((TAG_REQUEST, _)) => {
                if pending.send(rank).is_err() {
                    return;
                }
            }
            Ok((tag, _)) => {
                warn!(rank, tag, "unexpected frame from worker");
                return;
            }
            // EOF when the worker exits its pull loop.
            Err(_) => return,
        }
    }
}

impl Cluster for TcpCluster {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn world(&self) -> u32 {
        self.world
    }

    fn poll_request(&mut self, timeout: Duration) -> Result<Option<u32>> {
        match &self.role {
            Role::Master { pending, .. } => match pending.recv_timeout(timeout) {
                Ok(rank) => Ok(Some(rank)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(EngineError::Comm("accept thread exited".into()))
                }
            },
            Role::Worker { .. } => Err(EngineError::Comm("worker cannot poll requests".into())),
        }
    }

    fn respond(&mut self, worker: u32, item: i32) -> Result<()> {
        match &self.role {
            Role::Master { writers, .. } => {
                let mut map = writers
                    .lock()
                    .map_err(|_| EngineError::Comm("writer table poisoned".into()))?;
                let stream = map.get_mut(&worker).ok_or_else(|| {
                    EngineError::Comm(format!("no connection for worker rank {worker}"))
                })?;
                write_frame(stream, TAG_RESPONSE, item)
            }
            Role::Worker { .. } => Err(EngineError::Comm("worker cannot respond".into())),
        }
    }

    fn request_work(&mut self) -> Result<i32> {
        match &mut self.role {
            Role::Worker { stream } => {
                write_frame(stream, TAG_REQUEST, 0)?;
                let (tag, payload) = read_frame(stream)?;
                if tag != TAG_RESPONSE {
                    return Err(EngineError::Comm(format!(
                        "expected response frame, got tag {tag}"
                    )));
                }
                Ok(payload)
            }
            Role::Master { .. } => Err(EngineError::Comm("master cannot request work".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_response_round_trip() {
        let mut master = TcpCluster::master("127.0.0.1:0", 2).unwrap();
        let addr = master.local_addr().unwrap().to_string();

        let worker = std::thread::spawn(move || {
            let mut cluster = TcpCluster::worker(&addr, 1, 2).unwrap();
            let mut got = Vec::new();
            loop {
                match cluster.request_work().unwrap() {
                    NO_MORE_WORK => break,
                    item => got.push(item),
                }
            }
            got
        });

        let mut served = 0;
        while served < 3 {
            if let Some(rank) = master.poll_request(Duration::from_millis(100)).unwrap() {
                master.respond(rank, served).unwrap();
                served += 1;
            }
        }
        let rank = loop {
            if let Some(rank) = master.poll_request(Duration::from_millis(100)).unwrap() {
                break rank;
            }
        };
        master.respond(rank, NO_MORE_WORK).unwrap();

        assert_eq!(worker.join().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn single_node_has_no_peers() {
        let mut cluster = SingleNode;
        assert_eq!(cluster.world(), 1);
        assert!(cluster.poll_request(Duration::from_millis(1)).unwrap().is_none());
        assert!(cluster.respond(1, 0).is_err());
        assert!(cluster.request_work().is_err());
    }
}
