use std::time::Duration;

use fabriq_transport::{identity, Identity};
use fabriq_worker::ServiceClient;

use crate::cmd::SendArgs;
use crate::exit::{identity_error, worker_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let identity = match &args.identity {
        Some(path) => Identity::load(path).map_err(|err| identity_error("identity", err))?,
        None => Identity::generate().map_err(|err| identity_error("identity", err))?,
    };

    let server_key = args
        .server_key
        .as_deref()
        .map(identity::parse_key_hex)
        .transpose()
        .map_err(|err| CliError::new(USAGE, format!("invalid server key: {err}")))?;

    let mut client =
        ServiceClient::connect_with(args.addr, &identity, server_key, Duration::from_secs(5))
            .map_err(|err| worker_error("connect failed", err))?;
    eprintln!("connected to worker '{}'", client.server_name());

    let payload: Vec<&[u8]> = args.data.iter().map(|d| d.as_bytes()).collect();
    client
        .request(&args.command, &payload)
        .map_err(|err| worker_error("send failed", err))?;

    if args.wait {
        let timeout = parse_duration(&args.wait_timeout)
            .ok_or_else(|| CliError::new(USAGE, format!("invalid timeout: {}", args.wait_timeout)))?;
        client
            .set_recv_timeout(Some(timeout))
            .map_err(|err| worker_error("receive failed", err))?;
        let reply = client
            .recv()
            .map_err(|err| worker_error("receive failed", err))?;
        for frame in reply.frames() {
            println!("{}", String::from_utf8_lossy(frame));
        }
    }

    Ok(SUCCESS)
}

/// Parse durations of the form "500ms", "5s" or "2m".
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    if let Some(s) = value.strip_suffix('s') {
        return s.parse().ok().map(Duration::from_secs);
    }
    if let Some(m) = value.strip_suffix('m') {
        return m.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_millis_seconds_minutes() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration(""), None);
    }
}
