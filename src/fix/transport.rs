// =============================================================================
// FIX transport — TCP + TLS byte stream to the broker gateway
// =============================================================================

use std::os::fd::AsRawFd;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },
    #[error("TLS setup failed: {0}")]
    TlsSetup(#[from] native_tls::Error),
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        source: native_tls::Error,
    },
    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    Closed,
}

/// A connected, TLS-protected stream with trading-grade socket options.
pub struct FixTransport {
    stream: TlsStream<TcpStream>,
}

impl FixTransport {
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|source| TransportError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;

        tcp.set_nodelay(true)?;
        enable_keepalive(&tcp)?;

        let connector = tokio_native_tls::TlsConnector::from(
            native_tls::TlsConnector::builder().build()?,
        );
        let stream = connector
            .connect(host, tcp)
            .await
            .map_err(|source| TransportError::Handshake {
                host: host.to_string(),
                source,
            })?;

        info!(host, port, "TLS connected");
        Ok(Self { stream })
    }

    /// Read available bytes. `Ok(0)` never escapes — EOF maps to `Closed`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.stream.read(buf).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    /// Write a complete frame. Either all bytes go out or the call fails;
    /// a partially-written FIX message would desynchronise the broker.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn enable_keepalive(tcp: &TcpStream) -> std::io::Result<()> {
    let fd = tcp.as_raw_fd();
    let on: libc::c_int = 1;
    // SAFETY: fd is a live socket owned by `tcp`; setsockopt only reads `on`.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
