use tokio::process::Command;

use crate::tunnel::TunnelEndpoint;

/// Check whether something is listening on the given local port by scanning
/// the `ss -ln` socket listing.
pub async fn is_listening(port: u16) -> bool {
    let output = match Command::new("ss").arg("-ln").output().await {
        Ok(output) => output,
        Err(_) => return false,
    };
    port_in_listing(&String::from_utf8_lossy(&output.stdout), port)
}

/// `ss` prints local addresses as `<addr>:<port>`; match on the full port so
/// `:22` does not accept a listener on `:2222`.
fn port_in_listing(listing: &str, port: u16) -> bool {
    let suffix = format!(":{}", port);
    listing
        .split_whitespace()
        .any(|field| field.ends_with(&suffix))
}

/// Render the ssh invocation for a provisioned endpoint, using the local
/// username as the login.
pub fn login_command(endpoint: &TunnelEndpoint) -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
    match endpoint.port {
        Some(port) => format!("ssh {}@{} -p {}", user, endpoint.host, port),
        None => format!("ssh {}@{}", user, endpoint.host),
    }
}
