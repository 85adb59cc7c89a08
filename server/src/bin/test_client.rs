//! Headless test client: connects to a running server, grabs the atom
//! nearest the domain center, swings it around for a while, pushes a
//! parameter update, and disconnects cleanly. Useful for smoke-testing a
//! server by hand:
//!
//! ```text
//! RUST_LOG=info cargo run --bin shared-jello-server -- --port 26000
//! cargo run --bin test_client -- 127.0.0.1:26000
//! ```

use std::error::Error;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec3;
use shared::wire::{MessageReader, MessageWriter, PipeError};
use shared::{DraggerState, MessageId, OnTransform, Ray, SimParameters, StateUpdate};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(about = "Headless client that smacks the shared Jell-O crystal around")]
struct Args {
    /// Server address, e.g. 127.0.0.1:26000
    addr: String,

    /// How long to keep dragging before disconnecting
    #[arg(long, default_value_t = 5.0)]
    seconds: f64,
}

async fn read_snapshot<R: AsyncRead + Unpin>(
    reader: &mut MessageReader<R>,
    num_atoms: [i32; 3],
) -> Result<Vec<OnTransform>, PipeError> {
    let count = (num_atoms[0] * num_atoms[1] * num_atoms[2]) as usize;
    let mut poses = Vec::with_capacity(count);
    for _ in 0..count {
        poses.push(reader.read_transform().await?);
    }
    Ok(poses)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.addr).await?;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    let mut reader = MessageReader::new(read);
    let mut writer = MessageWriter::new(write);

    match reader.read_message_id().await? {
        MessageId::ConnectReply => {}
        other => return Err(format!("expected connect reply, got {other:?}").into()),
    }
    let (min, max, num_atoms) = reader.read_connect_reply().await?;
    println!(
        "connected: {}x{}x{} crystal in {min:?}..{max:?}",
        num_atoms[0], num_atoms[1], num_atoms[2]
    );

    // soften the crystal a bit
    writer.write_message_id(MessageId::ClientParamUpdate).await?;
    writer
        .write_parameters(&SimParameters {
            atom_mass: 1.0,
            attenuation: 0.3,
            gravity: 4.0,
        })
        .await?;
    writer.flush().await?;

    let center = (min + max) * 0.5;
    let start = Instant::now();
    let mut snapshots: u64 = 0;

    while start.elapsed().as_secs_f64() < args.seconds {
        let t = start.elapsed().as_secs_f32();
        let origin = center + Vec3::new(t.sin() * 0.5, t.cos() * 0.5, 0.0);
        let update = StateUpdate {
            draggers: vec![DraggerState {
                id: 1,
                ray_based: false,
                ray: Ray::new(origin, Vec3::NEG_Z),
                transform: OnTransform::from_translation(origin),
                active: true,
            }],
        };
        writer.write_state_update(&update).await?;
        writer.flush().await?;

        // drain the stream until the next snapshot
        loop {
            match reader.read_message_id().await? {
                MessageId::ServerParamUpdate => {
                    let params = reader.read_parameters().await?;
                    println!("server parameters: {params:?}");
                }
                MessageId::ServerUpdate => {
                    let poses = read_snapshot(&mut reader, num_atoms).await?;
                    snapshots += 1;
                    if snapshots % 50 == 0 {
                        println!("snapshot {snapshots}: atom 0 at {:?}", poses[0].translation);
                    }
                    break;
                }
                other => return Err(format!("unexpected message {other:?}").into()),
            }
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // let go of the atom, then ask to leave
    let release = StateUpdate {
        draggers: vec![DraggerState {
            id: 1,
            ray_based: false,
            ray: Ray::new(center, Vec3::NEG_Z),
            transform: OnTransform::from_translation(center),
            active: false,
        }],
    };
    writer.write_state_update(&release).await?;
    writer.write_message_id(MessageId::DisconnectRequest).await?;
    writer.flush().await?;

    loop {
        match reader.read_message_id().await? {
            MessageId::DisconnectReply => break,
            MessageId::ServerParamUpdate => {
                reader.read_parameters().await?;
            }
            MessageId::ServerUpdate => {
                read_snapshot(&mut reader, num_atoms).await?;
            }
            other => return Err(format!("unexpected message {other:?}").into()),
        }
    }
    println!("disconnected cleanly after {snapshots} snapshots");
    Ok(())
}
