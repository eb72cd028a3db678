use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fabriq_worker::BeaconSubscriber;

use crate::cmd::WatchArgs;
use crate::exit::{worker_error, CliError, CliResult, SUCCESS};

pub fn run(args: WatchArgs) -> CliResult<i32> {
    let mut subscriber =
        BeaconSubscriber::connect(args.addr).map_err(|err| worker_error("connect failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = Arc::clone(&running);
    ctrlc::set_handler(move || running_flag.store(false, Ordering::SeqCst)).map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let counter = subscriber
            .recv()
            .map_err(|err| worker_error("receive failed", err))?;
        println!("{counter}");
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    Ok(SUCCESS)
}
