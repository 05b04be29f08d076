use std::io::ErrorKind;

use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

use super::{Address, Channel};
use crate::error::TransportError;

pub type ServerChannel = Channel<NamedPipeServer>;
pub type ClientChannel = Channel<NamedPipeClient>;

/// `ERROR_PIPE_BUSY`: every instance of the pipe is connected.
const ERROR_PIPE_BUSY: i32 = 231;

/// Accepts client connections on a named pipe.
///
/// A pipe instance serves exactly one client, so a fresh instance is created
/// as soon as the pending one is connected.
pub struct Listener {
    address: Address,
    next: NamedPipeServer,
}

impl Listener {
    pub fn bind(address: &Address) -> std::io::Result<Self> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(address.as_str())?;
        Ok(Self {
            address: address.clone(),
            next,
        })
    }

    pub async fn accept(&mut self) -> std::io::Result<ServerChannel> {
        self.next.connect().await?;
        let fresh = ServerOptions::new().create(self.address.as_str())?;
        let connected = std::mem::replace(&mut self.next, fresh);
        Ok(Channel::new(connected))
    }
}

/// Named pipes disappear with their last handle; nothing to clean up.
pub fn remove_stale(_address: &Address) -> std::io::Result<()> {
    Ok(())
}

/// Connect to the server at `address`.
///
/// A missing or fully busy pipe is reported as [`TransportError::Unavailable`].
pub async fn connect(address: &Address) -> Result<ClientChannel, TransportError> {
    match ClientOptions::new().open(address.as_str()) {
        Ok(pipe) => Ok(Channel::new(pipe)),
        Err(e) if e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
            Err(TransportError::Unavailable(address.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
