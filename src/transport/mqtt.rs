//! MQTT adapter for the notification transport.
//!
//! Topic layout under a configurable prefix (default `navicap`):
//!
//! | Topic                          | Direction | Meaning                                  |
//! |--------------------------------|-----------|------------------------------------------|
//! | `{prefix}/obstacle`            | out       | obstacle notifications and read answers  |
//! | `{prefix}/config_state`        | out       | merged config echo and read answers      |
//! | `{prefix}/config/set`          | in        | partial config update (write)            |
//! | `{prefix}/{topic}/get`         | in        | read request                             |
//! | `{prefix}/{topic}/notify`      | in        | `ON` / `OFF` subscription toggle         |
//! | `{prefix}/client/status`       | in        | `online` / `offline` from the client     |
//! | `{prefix}/availability`        | out       | `online`, retained; last will `offline`  |
//!
//! The rumqttc connection runs on its own thread and forwards inbound events over an mpsc
//! channel, so the distribution loop stays single-threaded.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{SubscriberHandle, Topic, Transport, TransportEvent};

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// MQTT endpoint parsed from a broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Parse a broker address.
///
/// Supports formats:
/// - `host:port` (plain TCP or TLS based on tls_override)
/// - `mqtt://host:port`, `tcp://host:port` (plain TCP)
/// - `mqtts://host:port`, `ssl://host:port` (TLS)
/// - `[ipv6]:port`
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid MQTT port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok((host.to_string(), port))
}

/// The device broker is expected on loopback unless remote brokers are explicitly allowed.
pub fn validate_loopback_addr(endpoint: &MqttEndpoint, original: &str) -> Result<()> {
    let host = endpoint.host.as_str();
    if host == "localhost" {
        return Ok(());
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "MQTT broker must be loopback: {} (use --allow-remote-mqtt to override)",
        original
    ))
}

/// Map an inbound publish onto a transport event. Returns `None` for topics outside the
/// layout or payloads that do not parse.
pub fn route_incoming(prefix: &str, topic: &str, payload: &[u8]) -> Option<TransportEvent> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    if rest == "config/set" {
        return Some(TransportEvent::Write {
            topic: Topic::ConfigWrite,
            payload: payload.to_vec(),
        });
    }

    let text = std::str::from_utf8(payload).ok()?.trim();
    if rest == "client/status" {
        let peer = format!("{}/client", prefix);
        return match text.to_ascii_lowercase().as_str() {
            PAYLOAD_ONLINE => Some(TransportEvent::Connected { peer }),
            PAYLOAD_OFFLINE => Some(TransportEvent::Disconnected { peer }),
            _ => None,
        };
    }

    let (name, action) = rest.split_once('/')?;
    let target = Topic::from_name(name)?;
    match action {
        "get" if target.is_readable() => Some(TransportEvent::Read { topic: target }),
        "notify" if target.is_notifiable() => match text.to_ascii_uppercase().as_str() {
            "ON" | "1" | "TRUE" => Some(TransportEvent::Subscribe {
                topic: target,
                handle: SubscriberHandle::new(format!("{}/{}", prefix, name)),
            }),
            "OFF" | "0" | "FALSE" => Some(TransportEvent::Unsubscribe { topic: target }),
            _ => None,
        },
        _ => None,
    }
}

/// Connection settings for `MqttTransport::connect`.
#[derive(Clone, Debug)]
pub struct MqttTransportOptions {
    pub broker: String,
    pub use_tls: bool,
    pub allow_remote: bool,
    pub client_id: String,
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttTransportOptions {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1:1883".to_string(),
            use_tls: false,
            allow_remote: false,
            client_id: "navicap-publish".to_string(),
            prefix: "navicap".to_string(),
            username: None,
            password: None,
        }
    }
}

pub struct MqttTransport {
    client: Client,
    prefix: String,
    stop: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttTransport {
    /// Connect to the broker and start forwarding inbound events to `events`.
    pub fn connect(options: &MqttTransportOptions, events: Sender<TransportEvent>) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&options.broker, options.use_tls)?;
        if !options.allow_remote {
            validate_loopback_addr(&endpoint, &options.broker)?;
        }

        let mut mqtt = MqttOptions::new(&options.client_id, &endpoint.host, endpoint.port);
        mqtt.set_keep_alive(Duration::from_secs(30));
        mqtt.set_clean_start(true);
        if let Some(user) = options.username.as_deref() {
            mqtt.set_credentials(user, options.password.clone().unwrap_or_default());
        }
        mqtt.set_last_will(LastWill::new(
            format!("{}/availability", options.prefix),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        mqtt.set_transport(if endpoint.use_tls {
            rumqttc::Transport::tls_with_default_config()
        } else {
            rumqttc::Transport::tcp()
        });

        let (client, connection) = Client::new(mqtt, 10);
        log::info!(
            "MQTT transport configured: {}:{} (TLS: {}, prefix: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            options.prefix
        );

        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_connection(
            client.clone(),
            connection,
            options.prefix.clone(),
            events,
            Arc::clone(&stop),
        );
        Ok(Self {
            client,
            prefix: options.prefix.clone(),
            stop,
            connection_handle: Some(handle),
        })
    }

    fn publish(&self, topic: Topic, payload: &[u8]) -> Result<()> {
        self.client.publish(
            format!("{}/{}", self.prefix, topic),
            QoS::AtLeastOnce,
            false,
            payload.to_vec(),
        )?;
        Ok(())
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.client.publish(
            format!("{}/availability", self.prefix),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Transport for MqttTransport {
    fn notify(&mut self, topic: Topic, _handle: &SubscriberHandle, payload: &[u8]) -> Result<()> {
        self.publish(topic, payload)
    }

    fn respond(&mut self, topic: Topic, payload: &[u8]) -> Result<()> {
        self.publish(topic, payload)
    }
}

fn inbound_filters(prefix: &str) -> Vec<String> {
    let mut filters = vec![
        format!("{}/config/set", prefix),
        format!("{}/client/status", prefix),
    ];
    for topic in Topic::ALL.into_iter().filter(|t| t.is_readable()) {
        filters.push(format!("{}/{}/get", prefix, topic));
        filters.push(format!("{}/{}/notify", prefix, topic));
    }
    filters
}

fn spawn_connection(
    client: Client,
    mut connection: Connection,
    prefix: String,
    events: Sender<TransportEvent>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let broker_peer = format!("{}/broker", prefix);
        let mut connected = false;
        for event in connection.iter() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let forwarded = match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    connected = true;
                    log::info!("MQTT connected");
                    // Clean sessions drop subscriptions on every reconnect.
                    for filter in inbound_filters(&prefix) {
                        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                            log::warn!("MQTT subscribe {} failed: {}", filter, e);
                        }
                    }
                    if let Err(e) = client.try_publish(
                        format!("{}/availability", prefix),
                        QoS::AtLeastOnce,
                        true,
                        PAYLOAD_ONLINE.as_bytes().to_vec(),
                    ) {
                        log::warn!("MQTT availability publish failed: {}", e);
                    }
                    None
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => {
                            let routed = route_incoming(&prefix, topic, &publish.payload);
                            if routed.is_none() {
                                log::debug!("Ignoring MQTT publish on {}", topic);
                            }
                            routed
                        }
                        Err(e) => {
                            log::warn!("Skipping publish with invalid topic: {}", e);
                            None
                        }
                    }
                }
                Ok(_) => None,
                Err(e) => {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    log::warn!("MQTT connection error: {}. Reconnecting...", e);
                    std::thread::sleep(RECONNECT_DELAY);
                    if connected {
                        connected = false;
                        Some(TransportEvent::Disconnected {
                            peer: broker_peer.clone(),
                        })
                    } else {
                        None
                    }
                }
            };
            if let Some(event) = forwarded {
                if events.send(event).is_err() {
                    log::debug!("Event receiver dropped, stopping MQTT connection thread");
                    break;
                }
            }
        }
    })
}
