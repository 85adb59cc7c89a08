//! TCP plumbing and the main loop: accept loop, per-client reader
//! sessions, fixed-cadence broadcast, and the as-fast-as-possible
//! simulation loop that drives [`World`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use shared::wire::{MessageReader, MessageWriter, PipeError};
use shared::{MessageId, Point, SimParameters, StateUpdate};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::client::{ClientEntry, ClientHandle};
use crate::game::{SharedParameters, World};

/// How many broadcast intervals between status log lines.
const STATUS_EVERY: u64 = 250;

/// The dedicated server: one listener task, one reader task per client,
/// and the owning main loop for simulation and broadcast.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Mutex<Vec<ClientEntry>>>,
    params: Arc<SharedParameters>,
    world: World,
    update_interval: Duration,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listen socket and build the crystal. Port `0` picks any
    /// free port; the chosen one is available via [`Server::local_port`].
    pub async fn bind(
        host: &str,
        port: u16,
        num_atoms: [usize; 3],
        update_interval: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        let params = Arc::new(SharedParameters::new());
        Ok(Self {
            listener,
            registry: Arc::new(Mutex::new(Vec::new())),
            params: Arc::clone(&params),
            world: World::new(num_atoms, params),
            update_interval,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Run the server forever: spawn the listener, then loop simulating
    /// with a variable timestep and broadcasting at the fixed cadence.
    /// The loop never sleeps; it yields cooperatively once per iteration.
    pub async fn run(mut self) {
        let (domain_min, domain_max) = self.world.crystal().domain();
        let num_atoms = self.world.crystal().num_atoms();
        tokio::spawn(listen_loop(
            self.listener,
            Arc::clone(&self.registry),
            Arc::clone(&self.params),
            domain_min,
            domain_max,
            num_atoms,
        ));

        let mut last = Instant::now();
        let mut next_update = last + self.update_interval;
        let mut broadcasts: u64 = 0;
        let mut ticks_since_status: u64 = 0;
        loop {
            let now = Instant::now();
            let dt = (now - last).as_secs_f32();
            last = now;

            {
                let mut clients = self.registry.lock().await;
                self.world.tick(&mut clients, dt);
            }
            ticks_since_status += 1;

            if now >= next_update {
                let mut clients = self.registry.lock().await;
                broadcast(&self.world, &mut clients).await;
                next_update += self.update_interval;
                broadcasts += 1;
                if broadcasts % STATUS_EVERY == 0 {
                    let elapsed = STATUS_EVERY as f64 * self.update_interval.as_secs_f64();
                    debug!(
                        "{} clients, {:.0} ticks/s",
                        clients.len(),
                        ticks_since_status as f64 / elapsed
                    );
                    ticks_since_status = 0;
                }
            }

            tokio::task::yield_now().await;
        }
    }
}

/// Accept connections until the task is dropped. A failed accept or a
/// failure while setting up one client never takes the listener down.
async fn listen_loop(
    listener: TcpListener,
    registry: Arc<Mutex<Vec<ClientEntry>>>,
    params: Arc<SharedParameters>,
    domain_min: Point,
    domain_max: Point,
    num_atoms: [i32; 3],
) {
    let mut next_client_id: u64 = 1;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("accept failed: {err}");
                continue;
            }
        };

        let id = next_client_id;
        next_client_id += 1;
        info!("client {id} connecting from {addr}");
        if let Err(err) = stream.set_nodelay(true) {
            debug!("client {id}: could not disable Nagle: {err}");
        }

        let (read, write) = stream.into_split();
        let handle = Arc::new(ClientHandle::new(id, addr, MessageWriter::new(write)));
        let reader = tokio::spawn(client_session(
            MessageReader::new(read),
            Arc::clone(&handle),
            Arc::clone(&params),
            domain_min,
            domain_max,
            num_atoms,
        ));

        let mut clients = registry.lock().await;
        clients.push(ClientEntry {
            handle,
            reader,
            atom_locks: Vec::new(),
            // one behind the server so the first broadcast echoes the
            // currently applied parameters to the new client
            seen_parameter_version: 0,
        });
    }
}

/// Reader task for one client. Whatever way the session ends, the dead
/// flag hands cleanup (atom locks, registry entry) to the main loop.
async fn client_session(
    mut reader: MessageReader<OwnedReadHalf>,
    handle: Arc<ClientHandle>,
    params: Arc<SharedParameters>,
    domain_min: Point,
    domain_max: Point,
    num_atoms: [i32; 3],
) {
    let id = handle.id;
    match run_session(&mut reader, &handle, &params, domain_min, domain_max, num_atoms).await {
        Ok(()) => info!("client {id} disconnected"),
        Err(err) if err.is_clean_close() => info!("client {id} closed the connection"),
        Err(err) => warn!("client {id}: {err}"),
    }
    handle.mark_dead();
}

async fn run_session(
    reader: &mut MessageReader<OwnedReadHalf>,
    handle: &ClientHandle,
    params: &SharedParameters,
    domain_min: Point,
    domain_max: Point,
    num_atoms: [i32; 3],
) -> Result<(), PipeError> {
    // Connect the client by sending the crystal's size; only after this is
    // it eligible for broadcast.
    {
        let mut writer = handle.writer.lock().await;
        writer
            .write_connect_reply(domain_min, domain_max, num_atoms)
            .await?;
        writer.flush().await?;
    }
    handle.set_connected();

    let mut scratch = StateUpdate::default();
    loop {
        match reader.read_message_id().await? {
            MessageId::ClientParamUpdate => {
                let values = reader.read_parameters().await?;
                params.submit(values);
            }
            MessageId::ClientUpdate => {
                reader.read_state_update(&mut scratch).await?;
                handle.input.lock().unwrap().publish(&mut scratch);
            }
            MessageId::DisconnectRequest => {
                let mut writer = handle.writer.lock().await;
                writer.write_message_id(MessageId::DisconnectReply).await?;
                // half-close: the reply is the last thing the client sees
                writer.shutdown().await?;
                return Ok(());
            }
            other => {
                return Err(PipeError::Malformed(format!(
                    "unexpected message {other:?} from client"
                )));
            }
        }
    }
}

/// Send a parameter echo (when this client is behind) and a full atom
/// snapshot to every connected client. Called with the registry lock held.
async fn broadcast(world: &World, clients: &mut [ClientEntry]) {
    let version = world.applied_version();
    let values = world.applied_parameters();
    for entry in clients.iter_mut() {
        if !entry.handle.is_connected() || entry.handle.is_dead() {
            continue;
        }
        if let Err(err) = send_update(world, entry, version, &values).await {
            // the reader task owns error reporting; just stop broadcasting
            debug!(
                "client {}: broadcast failed ({err}), marking for removal",
                entry.handle.id
            );
            entry.handle.mark_dead();
        }
    }
}

async fn send_update(
    world: &World,
    entry: &mut ClientEntry,
    version: u64,
    values: &SimParameters,
) -> Result<(), PipeError> {
    let mut writer = entry.handle.writer.lock().await;
    if entry.seen_parameter_version != version {
        writer.write_message_id(MessageId::ServerParamUpdate).await?;
        writer.write_parameters(values).await?;
        entry.seen_parameter_version = version;
    }
    writer.write_message_id(MessageId::ServerUpdate).await?;
    world.crystal().write_atom_states(&mut *writer).await?;
    writer.flush().await?;
    Ok(())
}
