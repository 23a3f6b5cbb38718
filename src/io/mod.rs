//! External interfaces: telemetry bus router, control-plane HTTP, openers

pub mod control;
pub mod opener;
pub mod router;

use crate::infra::config::MqttConnectSettings;
use anyhow::Context;
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Build broker connection options from shared connection settings:
/// 30 s keep-alive, uuid client id when unset, optional credentials, and
/// TLS with optional certificate verification skip.
pub(crate) fn build_mqtt_options(conn: &MqttConnectSettings) -> anyhow::Result<MqttOptions> {
    let client_id = if conn.client_id.is_empty() {
        // generate a uuid for the connection if not specified in config
        Uuid::new_v4().to_string()
    } else {
        conn.client_id.clone()
    };

    debug!(
        client_id = %client_id,
        host = %conn.host,
        port = conn.port,
        username = !conn.user.is_empty(),
        password = !conn.pass.is_empty(),
        "building mqtt options"
    );

    let mut options = MqttOptions::new(client_id, &conn.host, conn.port);
    options.set_keep_alive(Duration::from_secs(30));
    if !conn.user.is_empty() || !conn.pass.is_empty() {
        options.set_credentials(&conn.user, &conn.pass);
    }
    if conn.use_tls {
        debug!(skip_verify = conn.skip_tls_verify, "mqtt tls enabled");
        let mut builder = native_tls::TlsConnector::builder();
        if conn.skip_tls_verify {
            builder.danger_accept_invalid_certs(true);
        }
        let connector = builder.build().context("failed to build tls connector")?;
        options.set_transport(Transport::Tls(TlsConfiguration::NativeConnector(connector)));
    }
    Ok(options)
}
