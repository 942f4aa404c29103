//! Zero-copy transmission to non-blocking sockets

use std::future::Future;
use std::io;
use std::os::fd::{AsFd, OwnedFd};

use tokio::io::Interest;
use tokio::net::{TcpStream, UnixStream};

use super::handle::Buffer;

/// Readiness-driven stream socket
///
/// Implemented for the tokio stream types that client connections run on.
/// All methods take `&self` so the reading connection task and the sending
/// worker can share one socket.
pub trait StreamSocket: AsFd + Send + Sync + 'static {
    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send;

    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send;

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    fn try_io<R>(&self, interest: Interest, f: impl FnOnce() -> io::Result<R>) -> io::Result<R>;
}

macro_rules! impl_stream_socket {
    ($ty:ty) => {
        impl StreamSocket for $ty {
            fn readable(&self) -> impl Future<Output = io::Result<()>> + Send {
                <$ty>::readable(self)
            }

            fn writable(&self) -> impl Future<Output = io::Result<()>> + Send {
                <$ty>::writable(self)
            }

            fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
                <$ty>::try_read(self, buf)
            }

            fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
                <$ty>::try_write(self, buf)
            }

            fn try_io<R>(
                &self,
                interest: Interest,
                f: impl FnOnce() -> io::Result<R>,
            ) -> io::Result<R> {
                <$ty>::try_io(self, interest, f)
            }
        }
    };
}

impl_stream_socket!(TcpStream);
impl_stream_socket!(UnixStream);

/// Write all of `data`, waiting for writability as needed
pub async fn write_all<S: StreamSocket>(socket: &S, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        socket.writable().await?;
        match socket.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Buffer {
    /// Send the full content to a non-blocking socket
    ///
    /// Resumes on writability until every byte is out. The cursor is not
    /// used or moved.
    pub async fn transmit_async<S: StreamSocket>(&self, socket: &S) -> io::Result<()> {
        let size = self.size();
        let mut offset = 0u64;

        while offset < size {
            socket.writable().await?;
            let result = socket.try_io(Interest::WRITABLE, || {
                send_chunk(socket, self.store_fd(), offset, (size - offset) as usize)
            });

            match result {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => offset += n as u64,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

/// Move up to `count` bytes at `offset` from the store into `out`
#[cfg(target_os = "linux")]
pub(crate) fn send_chunk(
    out: impl AsFd,
    input: &OwnedFd,
    offset: u64,
    count: usize,
) -> io::Result<usize> {
    let mut cursor = offset;
    Ok(rustix::fs::sendfile(out, input, Some(&mut cursor), count)?)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn send_chunk(
    out: impl AsFd,
    input: &OwnedFd,
    offset: u64,
    count: usize,
) -> io::Result<usize> {
    let mut chunk = vec![0u8; count.min(64 * 1024)];
    let n = rustix::io::pread(input, &mut chunk, offset)?;
    Ok(rustix::io::write(out, &chunk[..n])?)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn test_transmit_async_large_payload() {
        let (tx, mut rx) = UnixStream::pair().unwrap();
        let payload: Vec<u8> = (0..=250u8).cycle().take(1 << 20).collect();
        let buffer = Buffer::from_slice(&payload).unwrap();

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            rx.read_to_end(&mut received).await.unwrap();
            received
        });

        buffer.transmit_async(&tx).await.unwrap();
        drop(tx);

        assert_eq!(reader.await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_write_all_then_transmit() {
        let (tx, mut rx) = UnixStream::pair().unwrap();
        let buffer = Buffer::from_slice(b"body").unwrap();

        write_all(&tx, b"head:").await.unwrap();
        buffer.transmit_async(&tx).await.unwrap();
        drop(tx);

        let mut received = Vec::new();
        rx.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"head:body");
    }

    #[tokio::test]
    async fn test_transmit_async_to_closed_peer() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(rx);

        let buffer = Buffer::from_slice(&[1u8; 4096]).unwrap();
        assert!(buffer.transmit_async(&tx).await.is_err());
    }
}
