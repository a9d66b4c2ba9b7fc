use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::MqttSettings;
use crate::frame::Frame;

use super::{AlertDispatcher, AlertEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
struct MqttEndpoint {
    host: String,
    port: u16,
    use_tls: bool,
}

/// Publishes each alert as JSON to `<topic_prefix>/alert` with QoS 1.
pub struct MqttDispatcher {
    client: Client,
    topic: String,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttDispatcher {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker_addr)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "publishing alerts to MQTT broker {}:{} (TLS: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls
        );
        Ok(Self {
            client,
            topic: alert_topic(&settings.topic_prefix),
            connection_handle: Some(spawn_connection(connection)),
        })
    }
}

fn spawn_connection(mut connection: Connection) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

impl AlertDispatcher for MqttDispatcher {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn dispatch(&mut self, event: &AlertEvent, _snapshot: Option<&Frame>) -> Result<()> {
        let payload = serde_json::to_vec(event).context("failed to serialize alert")?;
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("failed to publish alert to {}", self.topic))?;
        Ok(())
    }
}

impl Drop for MqttDispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.client.disconnect() {
            log::debug!("MQTT disconnect failed: {}", e);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

fn alert_topic(prefix: &str) -> String {
    format!("{}/alert", prefix.trim_end_matches('/'))
}

fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
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
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().context("invalid MQTT port")?;
            Ok((host.to_string(), port))
        }
        None if !addr.is_empty() => Ok((addr.to_string(), 1883)),
        None => Err(anyhow!("empty MQTT broker address")),
    }
}
