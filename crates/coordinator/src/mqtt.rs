//! Radio link over an MQTT gateway.
//!
//! The gateway owns the serial radio. It publishes every received frame's raw
//! payload on `<prefix>/<SENDER>/rx` and transmits anything published on
//! `<prefix>/<TARGET>/tx`.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::address::HardwareAddress;
use crate::config::{MqttConfig, RadioConfig};
use crate::error::RadioError;
use crate::radio::{Frame, Radio, Reception};
use crate::state::SharedState;

/// Frames buffered between the MQTT event loop and the control loop.
const FRAME_QUEUE: usize = 64;

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

pub(crate) fn rx_filter(prefix: &str) -> String {
    format!("{prefix}/+/rx")
}

pub(crate) fn tx_topic(prefix: &str, target: HardwareAddress) -> String {
    format!("{prefix}/{target}/tx")
}

/// Extract the sender from "<prefix>/<ADDRESS>/rx".
pub(crate) fn extract_sender(prefix: &str, topic: &str) -> Option<HardwareAddress> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() == 2 && parts[1] == "rx" {
        parts[0].parse().ok()
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Radio implementation
// ---------------------------------------------------------------------------

pub struct MqttRadio {
    client: AsyncClient,
    frames: mpsc::Receiver<Frame>,
    prefix: String,
}

impl MqttRadio {
    /// Connect to the gateway's broker and start forwarding frames.
    pub fn connect(mqtt: &MqttConfig, radio: &RadioConfig, shared: SharedState) -> Self {
        let mut options = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, 20);
        let (tx, frames) = mpsc::channel(FRAME_QUEUE);

        info!(
            broker = %format_args!("{}:{}", mqtt.host, mqtt.port),
            serial_port = %radio.port,
            baud_rate = radio.baud_rate,
            prefix = %mqtt.topic_prefix,
            "radio bridge configured"
        );

        tokio::spawn(pump_events(
            eventloop,
            client.clone(),
            tx,
            mqtt.topic_prefix.clone(),
            shared,
        ));

        Self {
            client,
            frames,
            prefix: mqtt.topic_prefix.clone(),
        }
    }
}

impl Radio for MqttRadio {
    async fn receive(&mut self, timeout: Duration) -> Result<Reception, RadioError> {
        match tokio::time::timeout(timeout, self.frames.recv()).await {
            Ok(Some(frame)) => Ok(Reception::Frame(frame)),
            Ok(None) => Err(RadioError::Disconnected),
            Err(_) => Ok(Reception::Timeout),
        }
    }

    async fn send(&self, target: HardwareAddress, payload: Vec<u8>) -> Result<(), RadioError> {
        self.client
            .try_publish(tx_topic(&self.prefix, target), QoS::AtMostOnce, false, payload)
            .map_err(|e| RadioError::Send {
                target,
                reason: e.to_string(),
            })
    }
}

/// Drive the MQTT connection, forwarding frames until the control loop goes
/// away. Subscribes on every (re)connect.
async fn pump_events(
    mut eventloop: EventLoop,
    client: AsyncClient,
    frames: mpsc::Sender<Frame>,
    prefix: String,
    shared: SharedState,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => match extract_sender(&prefix, &p.topic) {
                Some(sender) => {
                    let frame = Frame {
                        sender,
                        payload: p.payload.to_vec(),
                    };
                    if frames.send(frame).await.is_err() {
                        debug!("control loop gone; stopping radio bridge");
                        return;
                    }
                }
                None => debug!(topic = %p.topic, "ignoring unexpected topic"),
            },
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("radio bridge connected");
                if let Err(e) = client.try_subscribe(rx_filter(&prefix), QoS::AtLeastOnce) {
                    warn!("radio bridge subscribe failed: {e}");
                }
                let mut st = shared.write().await;
                st.radio_connected = true;
                st.record_system("radio bridge connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("radio bridge disconnected");
                let mut st = shared.write().await;
                st.radio_connected = false;
                st.record_system("radio bridge disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("radio bridge error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.radio_connected = false;
                st.record_error(format!("radio bridge error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: HardwareAddress = HardwareAddress::new(0x0013_A200_4108_09DD);

    /// A radio whose event loop is never polled; publishes accumulate in the
    /// client's request buffer. The event loop must outlive the test.
    fn test_radio() -> (MqttRadio, mpsc::Sender<Frame>, EventLoop) {
        let opts = MqttOptions::new("test-radio", "127.0.0.1", 1883);
        let (client, eventloop) = AsyncClient::new(opts, 10);
        let (tx, frames) = mpsc::channel(4);
        let radio = MqttRadio {
            client,
            frames,
            prefix: "xbee".into(),
        };
        (radio, tx, eventloop)
    }

    // -- Topics -------------------------------------------------------------

    #[test]
    fn extract_sender_valid_topic() {
        assert_eq!(extract_sender("xbee", "xbee/0013A200410809DD/rx"), Some(NODE));
    }

    #[test]
    fn extract_sender_wrong_prefix() {
        assert_eq!(extract_sender("xbee", "zigbee/0013A200410809DD/rx"), None);
        assert_eq!(extract_sender("xbee", "xbeex/0013A200410809DD/rx"), None);
    }

    #[test]
    fn extract_sender_wrong_suffix() {
        assert_eq!(extract_sender("xbee", "xbee/0013A200410809DD/tx"), None);
    }

    #[test]
    fn extract_sender_bad_address() {
        assert_eq!(extract_sender("xbee", "xbee/node-a/rx"), None);
    }

    #[test]
    fn extract_sender_too_many_segments() {
        assert_eq!(extract_sender("xbee", "xbee/0013A200410809DD/sub/rx"), None);
    }

    #[test]
    fn extract_sender_empty() {
        assert_eq!(extract_sender("xbee", ""), None);
    }

    #[test]
    fn topic_builders() {
        assert_eq!(rx_filter("xbee"), "xbee/+/rx");
        assert_eq!(tx_topic("xbee", NODE), "xbee/0013A200410809DD/tx");
    }

    // -- Radio ----------------------------------------------------------------

    #[tokio::test]
    async fn receive_forwards_queued_frame() {
        let (mut radio, tx, _el) = test_radio();
        let frame = Frame {
            sender: NODE,
            payload: vec![1, 2, 3],
        };
        tx.send(frame.clone()).await.unwrap();
        assert_eq!(
            radio.receive(Duration::from_secs(1)).await.unwrap(),
            Reception::Frame(frame)
        );
    }

    #[tokio::test]
    async fn receive_times_out_when_idle() {
        let (mut radio, _tx, _el) = test_radio();
        assert_eq!(
            radio.receive(Duration::from_millis(10)).await.unwrap(),
            Reception::Timeout
        );
    }

    #[tokio::test]
    async fn receive_reports_closed_bridge() {
        let (mut radio, tx, _el) = test_radio();
        drop(tx);
        assert!(matches!(
            radio.receive(Duration::from_secs(1)).await,
            Err(RadioError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn send_is_accepted_without_broker() {
        let (radio, _tx, _el) = test_radio();
        radio.send(NODE, vec![0, 1]).await.unwrap();
    }
}
