mod sim;

use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{PlantSim, Scenario};

/// Parse a 16-hex-digit radio address.
fn parse_address(s: &str) -> Result<u64> {
    if s.len() != 16 {
        bail!("address {s:?} must be 16 hex digits");
    }
    if !s.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("address {s:?} is not hex");
    }
    u64::from_str_radix(s, 16).with_context(|| format!("address {s:?} is not hex"))
}

/// Level carried by an actuator command addressed to `node`, if any.
/// Commands are 8 big-endian address bytes followed by a level byte.
fn command_level_for(node: u64, payload: &[u8]) -> Option<u8> {
    let (addr, rest) = payload.split_first_chunk::<8>()?;
    if u64::from_be_bytes(*addr) != node {
        return None;
    }
    rest.first().copied()
}

fn now_unix_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env_or("MQTT_HOST", "127.0.0.1");
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let prefix = env_or("TOPIC_PREFIX", "xbee");
    let node_hex = env_or("NODE_ADDR", "0013A200410809DD").to_ascii_uppercase();
    let irrigation_hex = env_or("IRRIGATION_ADDR", "0013A200415D76BF").to_ascii_uppercase();
    let node = parse_address(&node_hex)?;
    parse_address(&irrigation_hex)?;

    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);
    let day_period_s: f64 = env::var("SIM_DAY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(600.0);
    let scenario = Scenario::from_str_lossy(&env_or("SIM_SCENARIO", "drying"));

    let mut mqttoptions = MqttOptions::new(format!("plant-node-{node_hex}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    let watering = Arc::new(AtomicBool::new(false));
    let cmd_topic = format!("{prefix}/{irrigation_hex}/tx");

    // Listen for pump commands addressed to this node; resubscribe on reconnect.
    {
        let client = client.clone();
        let watering = Arc::clone(&watering);
        let cmd_topic = cmd_topic.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(topic = %cmd_topic, "node connected");
                        if let Err(e) = client.try_subscribe(&cmd_topic, QoS::AtMostOnce) {
                            warn!("subscribe failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        match command_level_for(node, &p.payload) {
                            Some(level) => {
                                info!(level, "pump command received");
                                watering.store(level != 0, Ordering::Relaxed);
                            }
                            None => debug!(bytes = p.payload.len(), "command for another node"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt error: {e}. retrying...");
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let topic = format!("{prefix}/{node_hex}/rx");
    info!(%topic, %scenario, sample_every_s, "publishing frames");

    let mut sim = PlantSim::new(scenario, day_period_s);
    loop {
        sim.set_watering(watering.load(Ordering::Relaxed));
        let sample = sim.sample(now_unix_f64());

        if let Err(e) = client
            .publish(&topic, QoS::AtLeastOnce, false, sample.encode())
            .await
        {
            warn!("publish error: {e}");
        } else {
            info!(
                temperature = sample.temperature,
                humidity = sample.humidity,
                soil_moisture = sample.soil_moisture,
                light = sample.light,
                watering = sim.watering(),
                "frame published"
            );
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
