use bytes::Bytes;
use fabriq_transport::{identity, AuthMode};
use fabriq_worker::{Config, RequestWorker};

use crate::cmd::RunArgs;
use crate::exit::{worker_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: RunArgs) -> CliResult<i32> {
    let mut config = Config::new(args.service, args.heartbeat, args.identity);
    config.name = args.name;
    config.log_requests = args.log_requests;

    for addr in &args.allow {
        let parsed = addr
            .parse()
            .map_err(|_| CliError::new(USAGE, format!("invalid allowlist address: {addr}")))?;
        config.allowlist.push(parsed);
    }

    if !args.authorized_keys.is_empty() {
        let mut keys = Vec::with_capacity(args.authorized_keys.len());
        for key in &args.authorized_keys {
            keys.push(identity::parse_key_hex(key).map_err(|err| {
                CliError::new(USAGE, format!("invalid authorized key: {err}"))
            })?);
        }
        config.auth = AuthMode::keys(keys);
    }

    let mut worker =
        RequestWorker::start(config).map_err(|err| worker_error("startup failed", err))?;

    if args.echo {
        worker.attach("echo", |request, replies| {
            let mut frames = vec![Bytes::copy_from_slice(request.command().as_bytes())];
            frames.extend_from_slice(request.payload());
            let _ = replies.enqueue(request.reply(frames));
        });
    }

    let stop = worker.stop_handle();
    ctrlc::set_handler(move || stop.stop()).map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })?;

    worker.run();
    Ok(SUCCESS)
}
