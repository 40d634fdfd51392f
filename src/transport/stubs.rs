//! Placeholder transports.
//!
//! MQTT and WukongIM satisfy the full [`Transport`] contract but fail fast
//! with [`TransportError::NotImplemented`] from every operation, so the
//! orchestrator errors immediately instead of hanging on an unusable
//! transport.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::protocol::Frame;
use crate::transport::{
    ConnectionMetrics, ConnectionSnapshot, Transport, TransportConfig, TransportEvent,
};

macro_rules! stub_transport {
    ($name:ident, $label:literal) => {
        pub struct $name;

        #[async_trait]
        impl Transport for $name {
            async fn connect(&self, _config: TransportConfig) -> TransportResult<()> {
                Err(TransportError::NotImplemented($label))
            }

            async fn disconnect(&self) -> TransportResult<()> {
                Err(TransportError::NotImplemented($label))
            }

            async fn send_frame(&self, _frame: Frame) -> TransportResult<()> {
                Err(TransportError::NotImplemented($label))
            }

            async fn send_hello(&self, _frame: Frame) -> TransportResult<()> {
                Err(TransportError::NotImplemented($label))
            }

            async fn send_audio(
                &self,
                _data: Bytes,
                _version: Option<crate::protocol::BinaryProtocolVersion>,
            ) -> TransportResult<()> {
                Err(TransportError::NotImplemented($label))
            }

            fn is_connected(&self) -> bool {
                false
            }

            fn snapshot(&self) -> ConnectionSnapshot {
                ConnectionSnapshot::default()
            }

            fn set_session_id(&self, _session_id: Option<String>) {}

            fn metrics(&self) -> ConnectionMetrics {
                ConnectionMetrics::default()
            }

            fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
                None
            }

            async fn destroy(&self) {}
        }
    };
}

stub_transport!(MqttTransport, "mqtt");
stub_transport!(WukongImTransport, "wukongim");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeartbeatConfig, ReconnectConfig};
    use crate::protocol::{create_codec, BinaryProtocolVersion};
    use std::time::Duration;

    fn dummy_config() -> TransportConfig {
        TransportConfig {
            url: "mqtt://example".to_string(),
            auth_token: "t".to_string(),
            device_id: "d".to_string(),
            client_id: "c".to_string(),
            protocol_version: BinaryProtocolVersion::V1,
            connect_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            codec: create_codec("sdkwork").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_every_operation_fails_fast() {
        let transport = MqttTransport;

        assert!(matches!(
            transport.connect(dummy_config()).await,
            Err(TransportError::NotImplemented("mqtt"))
        ));
        assert!(matches!(
            transport.send_frame(Frame::text_message("x")).await,
            Err(TransportError::NotImplemented("mqtt"))
        ));
        assert!(matches!(
            transport.send_audio(Bytes::from_static(b"a"), None).await,
            Err(TransportError::NotImplemented("mqtt"))
        ));
        assert!(matches!(
            transport.disconnect().await,
            Err(TransportError::NotImplemented("mqtt"))
        ));
        assert!(!transport.is_connected());
        assert!(transport.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_wukong_label() {
        let transport = WukongImTransport;
        assert!(matches!(
            transport.send_hello(Frame::text_message("x")).await,
            Err(TransportError::NotImplemented("wukongim"))
        ));
    }
}
