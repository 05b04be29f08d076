use std::io::ErrorKind;

use tokio::net::{UnixListener, UnixStream};

use super::{Address, Channel};
use crate::error::TransportError;

pub type ServerChannel = Channel<UnixStream>;
pub type ClientChannel = Channel<UnixStream>;

/// Accepts client connections on a Unix domain socket.
pub struct Listener {
    inner: UnixListener,
}

impl Listener {
    /// Bind `address`, first removing a socket file left behind by a dead server.
    pub fn bind(address: &Address) -> std::io::Result<Self> {
        if let Err(e) = remove_stale(address) {
            tracing::warn!(address = %address, error = %e, "could not remove stale socket");
        }
        let inner = UnixListener::bind(address.as_str())?;
        Ok(Self { inner })
    }

    pub async fn accept(&mut self) -> std::io::Result<ServerChannel> {
        let (stream, _) = self.inner.accept().await?;
        Ok(Channel::new(stream))
    }
}

/// Remove the socket file at `address`; a missing file is not an error.
pub fn remove_stale(address: &Address) -> std::io::Result<()> {
    match std::fs::remove_file(address.as_str()) {
        Ok(()) => {
            tracing::debug!(path = address.as_str(), "removed stale IPC socket");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Connect to the server at `address`.
///
/// A missing socket file, or one nobody is listening on, is reported as
/// [`TransportError::Unavailable`].
pub async fn connect(address: &Address) -> Result<ClientChannel, TransportError> {
    match UnixStream::connect(address.as_str()).await {
        Ok(stream) => Ok(Channel::new(stream)),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            Err(TransportError::Unavailable(address.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
