use iothub::client::{keep_alive, telemetry_will};
use iothub::{Config, Device};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS};
use serde::Serialize;
use std::fs::File;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct Telemetry<'a> {
    device_id: &'a str,
    uptime_secs: u64,
    sequence: u64,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            return;
        }
    };

    let device = match config.device() {
        Ok(device) => device,
        Err(e) => {
            error!("Failed to resolve device: {}", e);
            return;
        }
    };
    info!("Device '{}' on hub '{}'", device.device_id(), device.hub_name());

    let certs = match File::open(&config.ca_certs_path) {
        Ok(file) => file,
        Err(e) => {
            error!(
                "Failed to open CA certs file {}: {}",
                config.ca_certs_path.display(),
                e
            );
            return;
        }
    };

    let keep = keep_alive(Duration::from_secs(config.keep_alive_secs));
    let will = telemetry_will(r#"{"status": "offline"}"#);
    let (client, eventloop) = match device.new_client(certs, &[&keep, &will]) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to make MQTT client: {}", e);
            return;
        }
    };

    let poller = tokio::spawn(poll_events(eventloop, device.clone()));

    let command_topic = device.command_topic();
    match client.subscribe(&command_topic, QoS::AtLeastOnce).await {
        Ok(_) => info!("Subscribed to '{}'.", command_topic),
        Err(e) => error!("Failed to subscribe to '{}': {}", command_topic, e),
    }

    let publisher = tokio::spawn(publish_telemetry(
        client.clone(),
        device.clone(),
        Duration::from_millis(config.telemetry_interval_ms),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to handle termination signal: {}", e);
    }

    info!("Shutting down...");
    publisher.abort();
    if let Err(e) = client.disconnect().await {
        warn!("Failed to disconnect cleanly: {}", e);
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, poller).await.is_err() {
        warn!("MQTT event loop did not stop within {:?}.", SHUTDOWN_GRACE);
    }
}

/// What the poller does after one `eventloop.poll()`.
#[derive(Debug, PartialEq)]
enum PollStep {
    Continue,
    /// rumqttc reconnects on the next poll; wait a moment first.
    Retry,
    Stop,
}

fn next_step(polled: &Result<Event, ConnectionError>) -> PollStep {
    match polled {
        Ok(Event::Incoming(Packet::Disconnect)) | Ok(Event::Outgoing(Outgoing::Disconnect)) => {
            PollStep::Stop
        }
        Ok(_) => PollStep::Continue,
        // Every AsyncClient handle is gone, nothing can be sent any more.
        Err(ConnectionError::RequestsDone) => PollStep::Stop,
        Err(_) => PollStep::Retry,
    }
}

async fn poll_events(mut eventloop: EventLoop, device: Device) {
    loop {
        let polled = eventloop.poll().await;
        match &polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to {}.", device.broker());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                info!("Command on '{}': {}", publish.topic, payload);
            }
            Ok(event) => {
                debug!("Event: {:?}", event);
            }
            Err(e) => {
                error!("Error in MQTT event loop: {}", e);
            }
        }

        match next_step(&polled) {
            PollStep::Continue => {}
            PollStep::Retry => {
                warn!("Lost connection to MQTT broker. Retrying in {:?}...", RETRY_INTERVAL);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            PollStep::Stop => {
                info!("MQTT event loop stopped.");
                break;
            }
        }
    }
}

async fn publish_telemetry(client: AsyncClient, device: Device, interval: Duration) {
    let topic = device.telemetry_topic();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);

    for sequence in 0.. {
        ticker.tick().await;

        let message = Telemetry {
            device_id: device.device_id(),
            uptime_secs: started.elapsed().as_secs(),
            sequence,
        };
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode telemetry: {}", e);
                continue;
            }
        };

        match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
            Ok(_) => debug!("Telemetry #{} queued for '{}'.", sequence, topic),
            Err(e) => error!("Failed to publish to '{}': {}", topic, e),
        }
    }
}
