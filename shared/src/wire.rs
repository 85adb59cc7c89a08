//! Framed, typed message I/O over one TCP connection (or anything that
//! implements the async read/write traits).
//!
//! The wire byte order is **little-endian**, independent of host order; on a
//! big-endian host the `to_le_bytes`/`from_le_bytes` conversions perform the
//! swap. Each message is a one-byte [`MessageId`] followed by its payload.
//! Writes are buffered and must be finished with [`MessageWriter::flush`];
//! a writer is expected to be guarded by a per-connection mutex so whole
//! messages (or message groups) hit the stream atomically. Reads are
//! single-consumer and need no lock.
//!
//! Short reads and writes fail the whole message with [`PipeError::Io`];
//! the codec never retries.

use glam::Quat;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::geometry::{OnTransform, Point, Ray, Scalar, Vector};
use crate::protocol::{DraggerState, MessageId, SimParameters, StateUpdate, MAX_DRAGGERS};

/// Errors surfaced by the codec. `Io` covers everything the transport can
/// do wrong (short read, reset, closed mid-message); the other variants are
/// protocol violations by the peer.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: unknown message id {0:#04x}")]
    UnknownMessage(u8),
    #[error("protocol error: {0}")]
    Malformed(String),
}

impl PipeError {
    /// True when the peer simply closed the connection (EOF between
    /// messages), as opposed to a mid-message failure or a violation.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, PipeError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Typed reader over the incoming byte stream of one connection.
pub struct MessageReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    pub async fn read_message_id(&mut self) -> Result<MessageId, PipeError> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf).await?;
        MessageId::from_u8(buf[0]).ok_or(PipeError::UnknownMessage(buf[0]))
    }

    pub async fn read_u8(&mut self) -> Result<u8, PipeError> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf[0])
    }

    pub async fn read_i32(&mut self) -> Result<i32, PipeError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf).await?;
        Ok(i32::from_le_bytes(buf))
    }

    pub async fn read_u32(&mut self) -> Result<u32, PipeError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }

    pub async fn read_scalar(&mut self) -> Result<Scalar, PipeError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf).await?;
        Ok(Scalar::from_le_bytes(buf))
    }

    pub async fn read_point(&mut self) -> Result<Point, PipeError> {
        let x = self.read_scalar().await?;
        let y = self.read_scalar().await?;
        let z = self.read_scalar().await?;
        Ok(Point::new(x, y, z))
    }

    pub async fn read_vector(&mut self) -> Result<Vector, PipeError> {
        self.read_point().await
    }

    pub async fn read_ray(&mut self) -> Result<Ray, PipeError> {
        let origin = self.read_point().await?;
        let direction = self.read_vector().await?;
        Ok(Ray::new(origin, direction))
    }

    pub async fn read_transform(&mut self) -> Result<OnTransform, PipeError> {
        let translation = self.read_vector().await?;
        let x = self.read_scalar().await?;
        let y = self.read_scalar().await?;
        let z = self.read_scalar().await?;
        let w = self.read_scalar().await?;
        Ok(OnTransform::new(translation, Quat::from_xyzw(x, y, z, w)))
    }

    /// Payload of `CLIENT_PARAMUPDATE` / `SERVER_PARAMUPDATE`.
    pub async fn read_parameters(&mut self) -> Result<SimParameters, PipeError> {
        let atom_mass = self.read_scalar().await?;
        let attenuation = self.read_scalar().await?;
        let gravity = self.read_scalar().await?;
        Ok(SimParameters {
            atom_mass,
            attenuation,
            gravity,
        })
    }

    /// Payload of `CONNECT_REPLY`: domain bounds and atom grid size.
    pub async fn read_connect_reply(&mut self) -> Result<(Point, Point, [i32; 3]), PipeError> {
        let min = self.read_point().await?;
        let max = self.read_point().await?;
        let mut num_atoms = [0i32; 3];
        for n in num_atoms.iter_mut() {
            *n = self.read_i32().await?;
        }
        Ok((min, max, num_atoms))
    }

    /// Payload of `CLIENT_UPDATE`, decoded into `update` so the dragger
    /// allocation is reused frame to frame.
    pub async fn read_state_update(&mut self, update: &mut StateUpdate) -> Result<(), PipeError> {
        let count = self.read_i32().await?;
        if count < 0 || count as usize > MAX_DRAGGERS {
            return Err(PipeError::Malformed(format!(
                "dragger count {count} out of range"
            )));
        }
        update.draggers.clear();
        for _ in 0..count {
            let id = self.read_u32().await?;
            let ray_based = self.read_i32().await? != 0;
            let ray = self.read_ray().await?;
            let transform = self.read_transform().await?;
            let active = self.read_u8().await? != 0;
            update.draggers.push(DraggerState {
                id,
                ray_based,
                ray,
                transform,
                active,
            });
        }
        Ok(())
    }
}

/// Typed writer over the outgoing byte stream of one connection.
pub struct MessageWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub async fn write_message_id(&mut self, id: MessageId) -> Result<(), PipeError> {
        self.inner.write_all(&[id as u8]).await?;
        Ok(())
    }

    pub async fn write_u8(&mut self, v: u8) -> Result<(), PipeError> {
        self.inner.write_all(&[v]).await?;
        Ok(())
    }

    pub async fn write_i32(&mut self, v: i32) -> Result<(), PipeError> {
        self.inner.write_all(&v.to_le_bytes()).await?;
        Ok(())
    }

    pub async fn write_u32(&mut self, v: u32) -> Result<(), PipeError> {
        self.inner.write_all(&v.to_le_bytes()).await?;
        Ok(())
    }

    pub async fn write_scalar(&mut self, v: Scalar) -> Result<(), PipeError> {
        self.inner.write_all(&v.to_le_bytes()).await?;
        Ok(())
    }

    pub async fn write_point(&mut self, p: Point) -> Result<(), PipeError> {
        self.write_scalar(p.x).await?;
        self.write_scalar(p.y).await?;
        self.write_scalar(p.z).await?;
        Ok(())
    }

    pub async fn write_vector(&mut self, v: Vector) -> Result<(), PipeError> {
        self.write_point(v).await
    }

    pub async fn write_ray(&mut self, ray: &Ray) -> Result<(), PipeError> {
        self.write_point(ray.origin).await?;
        self.write_vector(ray.direction).await?;
        Ok(())
    }

    pub async fn write_transform(&mut self, t: &OnTransform) -> Result<(), PipeError> {
        self.write_vector(t.translation).await?;
        self.write_scalar(t.rotation.x).await?;
        self.write_scalar(t.rotation.y).await?;
        self.write_scalar(t.rotation.z).await?;
        self.write_scalar(t.rotation.w).await?;
        Ok(())
    }

    pub async fn write_parameters(&mut self, p: &SimParameters) -> Result<(), PipeError> {
        self.write_scalar(p.atom_mass).await?;
        self.write_scalar(p.attenuation).await?;
        self.write_scalar(p.gravity).await?;
        Ok(())
    }

    pub async fn write_connect_reply(
        &mut self,
        min: Point,
        max: Point,
        num_atoms: [i32; 3],
    ) -> Result<(), PipeError> {
        self.write_message_id(MessageId::ConnectReply).await?;
        self.write_point(min).await?;
        self.write_point(max).await?;
        for n in num_atoms {
            self.write_i32(n).await?;
        }
        Ok(())
    }

    pub async fn write_state_update(&mut self, update: &StateUpdate) -> Result<(), PipeError> {
        self.write_message_id(MessageId::ClientUpdate).await?;
        self.write_i32(update.draggers.len() as i32).await?;
        for d in &update.draggers {
            self.write_u32(d.id).await?;
            self.write_i32(d.ray_based as i32).await?;
            self.write_ray(&d.ray).await?;
            self.write_transform(&d.transform).await?;
            self.write_u8(d.active as u8).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), PipeError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and half-close the write side; the peer observes EOF after the
    /// last message.
    pub async fn shutdown(&mut self) -> Result<(), PipeError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
