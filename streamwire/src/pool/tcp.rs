use std::sync::Arc;

use streamwire_config::shared::ConnectionConfig;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::codec::WireCodec;
use crate::concurrency::cancel::CancelRx;
use crate::connection::base::Connection;
use crate::error::{ErrorKind, WireResult};
use crate::pool::base::ConnectionFactory;
use crate::wire_error;

/// Opens plain TCP connections described by a [`ConnectionConfig`].
pub struct TcpConnectionFactory<C> {
    codec: Arc<C>,
}

impl<C> TcpConnectionFactory<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec: Arc::new(codec),
        }
    }
}

impl<C> ConnectionFactory for TcpConnectionFactory<C>
where
    C: WireCodec<Stream = TcpStream>,
{
    type Codec = C;
    type Parameters = ConnectionConfig;

    fn validate(&self, config: &ConnectionConfig) -> WireResult<()> {
        config.validate().map_err(|err| {
            wire_error!(
                ErrorKind::InvalidArgument,
                "Invalid connection configuration",
                err
            )
        })
    }

    async fn connect(&self, id: u64, config: &ConnectionConfig) -> WireResult<Connection<C>> {
        let address = format!("{}:{}", config.host, config.port);
        let stream = timeout(config.connect_timeout(), TcpStream::connect(&address))
            .await?
            .map_err(|err| {
                wire_error!(
                    ErrorKind::ConnectionFailed,
                    "Could not connect to server",
                    format!("{address}: {err}")
                )
            })?;
        stream.set_nodelay(true)?;
        debug!(connection_id = id, %address, "tcp stream established");

        Connection::open(id, self.codec.clone(), stream, &CancelRx::never()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::codec::ScriptedCodec;

    #[test]
    fn test_validate_rejects_missing_host() {
        let factory = TcpConnectionFactory::new(ScriptedCodec::<TcpStream>::new());
        let err = factory
            .validate(&ConnectionConfig::new("", 5432))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
