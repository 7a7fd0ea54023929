mod connect;
mod ensure;
mod maintenance;
mod status;

pub use connect::run_connect;
pub use ensure::run_ensure;
pub use maintenance::{run_accept_eula, run_compose_up, run_create_db, run_reset_data, run_sanitize};
pub use status::run_status;

use std::sync::Arc;
use vertica_supervisor::connection::{ConnectionVerifier, TlsMode, VsqlClient};
use vertica_supervisor::Supervisor;

/// Verifier running `vsql` inside the supervised container.
fn verifier(supervisor: &Supervisor) -> (Arc<VsqlClient>, ConnectionVerifier) {
    let config = supervisor.config();
    let client = Arc::new(VsqlClient::new(supervisor.runtime(), config.container.clone()));
    let verifier = ConnectionVerifier::new(
        client.clone(),
        supervisor.clock(),
        config.port,
        config.database.clone(),
        TlsMode::resolve(config.tls_mode.as_deref()),
        config.timings.connect_timeout,
    );
    (client, verifier)
}
