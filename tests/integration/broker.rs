//! Local MQTT over TLS responder
//!
//! Stands in for both the provisioning endpoint and the hub. It serves one
//! connection at a time, records every packet it cares about, and answers a
//! register request on `$dps/registrations/res/<status>/?$rid=<rid>` when
//! configured to.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rumqttc::mqttbytes::{self, v4};
use rumqttc::tokio_rustls::TlsAcceptor;
use rumqttc::tokio_rustls::rustls::ServerConfig;
use rumqttc::{ConnAck, ConnectReturnCode, Packet, Publish, QoS, SubAck, SubscribeReasonCode};
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

const MAX_PACKET_SIZE: usize = 64 * 1024;

/// What the broker saw, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// CONNECT with client id and username
    Connect {
        client_id: String,
        username: Option<String>,
    },
    /// One SUBSCRIBE filter
    Subscribe(String),
    /// PUBLISH from the client
    Publish { topic: String, payload: String },
    /// DISCONNECT
    Disconnect,
}

/// Reply sent to a register request
#[derive(Debug, Clone)]
struct RegistrationReply {
    status: u16,
    body: String,
}

type Events = Arc<Mutex<Vec<BrokerEvent>>>;

/// Mock MQTT broker for integration tests
pub struct MockBroker {
    port: u16,
    ca_pem: Vec<u8>,
    events: Events,
}

impl MockBroker {
    /// Start a broker that accepts connections but never publishes
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Start a broker that answers register requests with `status` and `body`
    pub async fn registration(status: u16, body: &str) -> Self {
        Self::spawn(Some(RegistrationReply {
            status,
            body: body.to_string(),
        }))
        .await
    }

    /// Port the broker listens on (127.0.0.1)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// PEM CA certificate that issued the broker's server certificate
    pub fn ca_pem(&self) -> Vec<u8> {
        self.ca_pem.clone()
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<BrokerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until `count` DISCONNECTs were seen, then return all events
    pub async fn events_after_disconnects(&self, count: usize) -> Vec<BrokerEvent> {
        for _ in 0..200 {
            let events = self.events();
            if events.iter().filter(|e| **e == BrokerEvent::Disconnect).count() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("Broker saw fewer than {} disconnects: {:?}", count, self.events());
    }

    async fn spawn(reply: Option<RegistrationReply>) -> Self {
        let (ca_pem, server_config) = server_tls();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Bind failed");
        let port = listener.local_addr().expect("Local address").port();
        let events: Events = Arc::default();

        let recorded = Arc::clone(&events);
        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    return;
                };
                // Clients that reject the server certificate fail here.
                let Ok(stream) = acceptor.accept(tcp).await else {
                    continue;
                };
                serve(stream, reply.as_ref(), &recorded).await;
            }
        });

        Self {
            port,
            ca_pem,
            events,
        }
    }
}

/// Test CA and a 127.0.0.1 server certificate issued by it.
fn server_tls() -> (Vec<u8>, ServerConfig) {
    let ca_key = KeyPair::generate().expect("CA key");
    let mut ca_params = CertificateParams::default();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "Mock Broker CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let ca_cert = ca_params.self_signed(&ca_key).expect("CA certificate");

    let server_key = KeyPair::generate().expect("Server key");
    let mut server_params = CertificateParams::default();
    server_params
        .distinguished_name
        .push(DnType::CommonName, "127.0.0.1");
    server_params.subject_alt_names = vec![SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST))];
    server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .expect("Server certificate");

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![server_cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server_key.serialize_der())),
        )
        .expect("Server TLS config");

    (ca_cert.pem().into_bytes(), config)
}

async fn serve<S>(mut stream: S, reply: Option<&RegistrationReply>, events: &Events)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut incoming = BytesMut::with_capacity(4096);

    loop {
        let packet = loop {
            match v4::read(&mut incoming, MAX_PACKET_SIZE) {
                Ok(packet) => break packet,
                Err(mqttbytes::Error::InsufficientBytes(_)) => {}
                Err(_) => return,
            }
            match stream.read_buf(&mut incoming).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        let mut outgoing = BytesMut::new();
        match packet {
            Packet::Connect(connect) => {
                events.lock().unwrap().push(BrokerEvent::Connect {
                    client_id: connect.client_id,
                    username: connect.login.map(|login| login.username),
                });
                ConnAck::new(ConnectReturnCode::Success, false)
                    .write(&mut outgoing)
                    .unwrap();
            }
            Packet::Subscribe(subscribe) => {
                let mut codes = Vec::new();
                for filter in &subscribe.filters {
                    events
                        .lock()
                        .unwrap()
                        .push(BrokerEvent::Subscribe(filter.path.clone()));
                    codes.push(SubscribeReasonCode::Success(QoS::AtMostOnce));
                }
                SubAck::new(subscribe.pkid, codes)
                    .write(&mut outgoing)
                    .unwrap();
            }
            Packet::Publish(publish) => {
                events.lock().unwrap().push(BrokerEvent::Publish {
                    topic: publish.topic.clone(),
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                });
                if let Some(reply) = reply {
                    let rid = publish
                        .topic
                        .split_once("?$rid=")
                        .map(|(_, rid)| rid)
                        .unwrap_or_default();
                    let topic = format!("$dps/registrations/res/{}/?$rid={}", reply.status, rid);
                    Publish::new(topic, QoS::AtMostOnce, reply.body.clone())
                        .write(&mut outgoing)
                        .unwrap();
                }
            }
            Packet::Disconnect => {
                events.lock().unwrap().push(BrokerEvent::Disconnect);
                return;
            }
            _ => {}
        }

        if !outgoing.is_empty() {
            if stream.write_all(&outgoing).await.is_err() {
                return;
            }
            if stream.flush().await.is_err() {
                return;
            }
        }
    }
}
