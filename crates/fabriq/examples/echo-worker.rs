//! Minimal echo worker — answers "echo" requests and broadcasts beacons.
//!
//! Run with:
//!   cargo run --example echo-worker
//!
//! In another terminal:
//!   cargo run -- send 127.0.0.1:9091 --command echo --data hello --wait
//!   cargo run -- watch 127.0.0.1:9092 --count 3

use bytes::Bytes;
use fabriq::transport::Identity;
use fabriq::worker::{Config, RequestWorker};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join(format!("fabriq-echo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let identity_path = dir.join("identity.json");
    Identity::generate()?.save(&identity_path)?;

    let config = Config::new(
        "127.0.0.1:9091".parse()?,
        "127.0.0.1:9092".parse()?,
        &identity_path,
    );
    let mut worker = RequestWorker::start(config)?;

    worker.attach("echo", |request, replies| {
        let mut frames = vec![Bytes::copy_from_slice(request.command().as_bytes())];
        frames.extend_from_slice(request.payload());
        let _ = replies.enqueue(request.reply(frames));
    });

    eprintln!("echo worker listening on 127.0.0.1:9091 (heartbeat 127.0.0.1:9092)");
    worker.run();

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
