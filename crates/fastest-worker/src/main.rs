//! The persistent worker subprocess. Spawned by `fastest-execution`'s
//! `WorkerPool` with `FASTEST_WORKER=1` set, it signals readiness over
//! stdout, then loops reading framed `HostMessage`s from stdin and writing
//! framed `WorkerMessage`s back until it is told to shut down or its stdin
//! closes.

use std::io::{BufReader, BufWriter};
use std::process::ExitCode;

use tracing::{error, info, warn};

use fastest_execution::ipc::{self, HostMessage, WorkerMessage};
use fastest_execution::{ReferenceExecutor, TestExecutor};

const ENV_WORKER_FLAG: &str = "FASTEST_WORKER";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if std::env::var(ENV_WORKER_FLAG).is_err() {
        eprintln!("fastest-worker is a subprocess launched by the fastest runner; it isn't meant to be run directly.");
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker exited with a fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());

    let mut executor = ReferenceExecutor;

    ipc::write_frame(&mut writer, &WorkerMessage::Ready)?;
    info!("worker ready");

    loop {
        let message = match ipc::read_frame::<_, HostMessage>(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("host closed the pipe; exiting");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "failed to read host message");
                return Err(e.into());
            }
        };

        match message {
            HostMessage::Exec { req_id, unit } => {
                // Flush each item's result as soon as it's ready instead of
                // collecting the whole unit first: if this process dies
                // partway through, the items already flushed stay valid
                // results on the host side instead of being reported as
                // crashes alongside the ones that never ran.
                for (item, plan) in &unit.items {
                    let result = executor.execute(item, plan);
                    ipc::write_frame(&mut writer, &WorkerMessage::ItemResult { req_id, result })?;
                }
                ipc::write_frame(&mut writer, &WorkerMessage::UnitDone { req_id })?;
            }
            HostMessage::Teardown { scope_key_json } => {
                executor.teardown(&scope_key_json);
            }
            HostMessage::Shutdown => {
                info!("shutdown requested; exiting");
                return Ok(());
            }
        }
    }
}
