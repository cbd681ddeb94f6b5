use std::ffi::OsString;
use std::io;

use registry_client::{ServiceAddress, ServiceIdentity};
use tracing::warn;

use crate::config::Config;

/// Advertised in place of the hostname when it can't be looked up.
pub const UNKNOWN_HOST: &str = "unknown";

/// Local hostname, or [`UNKNOWN_HOST`]. Never fails: a missing hostname must not keep
/// the service from starting.
pub fn resolve_host() -> String {
    resolve_host_with(hostname::get)
}

pub fn resolve_host_with<F>(lookup: F) -> String
where
    F: FnOnce() -> io::Result<OsString>,
{
    match lookup() {
        Ok(name) => match name.into_string() {
            Ok(name) if !name.is_empty() => name,
            Ok(_) => {
                warn!("hostname is empty, advertising as {}", UNKNOWN_HOST);
                UNKNOWN_HOST.to_owned()
            }
            Err(raw) => {
                warn!(hostname = ?raw, "hostname is not valid UTF-8, advertising as {}", UNKNOWN_HOST);
                UNKNOWN_HOST.to_owned()
            }
        },
        Err(e) => {
            warn!("failed to resolve hostname, advertising as {}: {}", UNKNOWN_HOST, e);
            UNKNOWN_HOST.to_owned()
        }
    }
}

/// Fresh identity for this process plus the address the registry should use to reach it.
pub fn resolve(config: &Config) -> (ServiceIdentity, ServiceAddress) {
    let host = match &config.advertise_host {
        Some(host) => host.clone(),
        None => resolve_host(),
    };

    (
        ServiceIdentity::generate(&config.service_name),
        ServiceAddress::new(host, config.port),
    )
}
