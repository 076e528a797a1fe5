//! gNMI server in front of a NETCONF device
//!
//! Serves gNMI Get/Set/Capabilities and forwards them over a NETCONF session
//! to the configured device.

use std::sync::Arc;

use anyhow::Context;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tracing::info;

use gnmi_netconf_adapter::gnmi::g_nmi_server::GNmiServer;
use gnmi_netconf_adapter::{Adapter, GnmiNetconfConfig, Schema, StdioSession};
use gnmi_netconf_common::{AdapterArgs, AdapterConfig, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = AdapterArgs::parse_with_default("gnmi-netconf.json5");

    // Load configuration
    let config = GnmiNetconfConfig::load(&args.config)?;

    // Initialize logging
    let logging = config
        .logging()
        .with_level_override(args.log_level.as_deref());
    init_tracing(&logging)?;

    // Load the compiled schema
    let schema = Schema::load(&config.schema.path)
        .with_context(|| format!("loading schema {}", config.schema.path.display()))?;
    info!(
        entries = schema.len(),
        models = schema.models().len(),
        "Loaded schema from {}",
        config.schema.path.display()
    );

    // Open the southbound NETCONF session
    let session = StdioSession::spawn(&config.netconf.command)
        .await
        .context("starting NETCONF session")?;
    info!(
        pid = ?session.process_id(),
        session_id = ?session.session_id(),
        "NETCONF transport running"
    );

    let adapter = Adapter::new(Arc::new(schema), session)
        .with_datastore(config.netconf.datastore)
        .with_namespaces(config.netconf.namespaces.clone());

    let mut server = Server::builder();
    let tls = &config.server.tls;
    if tls.enabled {
        let (Some(cert), Some(key)) = (&tls.cert, &tls.key) else {
            anyhow::bail!("TLS enabled without cert and key");
        };
        let identity = Identity::from_pem(
            tokio::fs::read(cert).await.context("reading TLS certificate")?,
            tokio::fs::read(key).await.context("reading TLS key")?,
        );
        let mut tls_config = ServerTlsConfig::new().identity(identity);
        if let Some(ca_cert) = &tls.ca_cert {
            let ca = tokio::fs::read(ca_cert).await.context("reading CA certificate")?;
            tls_config = tls_config.client_ca_root(Certificate::from_pem(ca));
        }
        server = server.tls_config(tls_config)?;
    }

    info!(
        listen = %config.server.listen,
        datastore = %config.netconf.datastore,
        tls = tls.enabled,
        "Starting gNMI server"
    );

    server
        .add_service(GNmiServer::new(adapter))
        .serve_with_shutdown(config.server.listen, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("gNMI adapter shutdown complete");
    Ok(())
}
