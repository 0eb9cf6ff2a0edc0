//! MQTT session setup shared by the registration and probe legs.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::tokio_rustls::rustls::ClientConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, TlsConfiguration, Transport};

/// Keep-alive interval for both legs.
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 10;

/// Upper bound on flushing a DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Parameters of one MQTT over TLS connection.
#[derive(Debug, Clone)]
pub struct MqttEndpoint<'a> {
    /// Broker hostname.
    pub host: &'a str,
    /// Broker port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: &'a str,
    /// MQTT username; the password is empty (certificate authentication).
    pub username: String,
}

/// Create a client and its event loop; nothing is sent until the loop is polled.
pub fn connect(endpoint: MqttEndpoint<'_>, tls: Arc<ClientConfig>) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(endpoint.client_id, endpoint.host, endpoint.port);
    options
        .set_credentials(endpoint.username, "")
        .set_clean_session(true)
        .set_keep_alive(KEEP_ALIVE)
        .set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(tls)));

    AsyncClient::new(options, REQUEST_CAPACITY)
}

/// Send DISCONNECT and drive the loop until it is written or the connection drops.
pub async fn shutdown(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.disconnect().await {
        tracing::debug!("Disconnect request not queued: {}", e);
        return;
    }

    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
        tracing::debug!("Disconnect not flushed within {:?}", DISCONNECT_GRACE);
    }
}
