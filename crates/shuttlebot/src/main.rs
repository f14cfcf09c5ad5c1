use futures::prelude::*;
use shuttlebot::tracing_err;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        eprintln!("Dotenv config was not found, ignoring this...")
    }

    shuttlebot::init_logging();

    info!(
        labels = ?shuttlebot::BUILD_LABELS,
        "Telegram Forwarding Shuttle Bot"
    );

    let main_fut = AssertUnwindSafe(async {
        let result = try_main().await;

        result.map(|()| ExitCode::SUCCESS).unwrap_or_else(|err| {
            error!(err = tracing_err(&err), "Exitting with an error...");
            ExitCode::FAILURE
        })
    })
    .catch_unwind()
    .unwrap_or_else(|_| {
        error!("Exitting due to a panic...");
        ExitCode::FAILURE
    });

    if !cfg!(debug_assertions) {
        return main_fut.await;
    }

    // The graceful shutdown of the dispatcher waits for the long polling
    // request to finish, which is annoying during development
    tokio::select! {
        exit_code = main_fut => {
            info!("Main task has finished, exiting...");
            exit_code
        }
        () = abort_signal() => ExitCode::SUCCESS,
    }
}

async fn try_main() -> shuttlebot::Result {
    let config = shuttlebot::Config::load()?;
    shuttlebot::run(config).await
}

async fn abort_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            err = tracing_err(&err),
            "Failed to wait for Ctrl+C, exiting..."
        );
    } else {
        info!("Ctrl+C received, exiting forcefully...");
    }
}
