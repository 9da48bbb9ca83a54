//! Construction, wiring and cooperative shutdown.
//!
//! The supervisor owns every spawned task and a single cancellation token.
//! It is also the single recovery point: nothing below it retries, so any
//! session loss cancels the whole process, which exits with code 2.

use std::process;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::queue;
use crate::worker::Worker;

pub async fn run(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let (queue_tx, queue_rx) = queue::bounded(config.queue_depth);

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for id in 1..=config.workers {
        let uri = config.pg_uri.clone();
        let queue = queue_rx.clone();
        let token = shutdown.clone();
        tasks.spawn(async move {
            let result = async { Worker::connect(id, &uri, queue).await?.run(token).await }.await;
            if let Err(ref error) = result {
                log::error!("worker-{id}: fatal: {error}");
            }
            result
        });
    }
    // the listener's sender is the only producer handle; once its task is
    // gone the queue closes and the workers drain what remains
    drop(queue_rx);

    {
        let uri = config.pg_uri.clone();
        let token = shutdown.clone();
        tasks.spawn(async move {
            let result =
                async { Listener::connect(&uri, queue_tx).await?.run(token).await }.await;
            if let Err(ref error) = result {
                log::error!("listener: fatal: {error}");
            }
            result
        });
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let mut failure = None;

    // run until the first termination signal or the first task failure
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                log::info!("SIGINT received, beginning shutdown");
                break;
            }
            _ = sigterm.recv() => {
                log::info!("SIGTERM received, beginning shutdown");
                break;
            }
            joined = tasks.join_next() => match joined {
                Some(result) => {
                    if let Some(error) = task_failure(result) {
                        log::error!("task failed, beginning shutdown");
                        failure.get_or_insert(error);
                        break;
                    }
                    // a task ended cleanly ahead of shutdown; keep running
                }
                None => break,
            }
        }
    }

    shutdown.cancel();

    // every task observes the token at its next suspension point and closes
    // its own session; a second signal escalates past the grace deadline
    let graceful = tokio::select! {
        _ = drain(&mut tasks, &mut failure) => true,
        _ = tokio::time::sleep(config.grace) => false,
        _ = either_signal(&mut sigint, &mut sigterm) => {
            log::warn!("second termination signal, exiting immediately");
            process::exit(1);
        }
    };

    if !graceful {
        log::warn!(
            "grace deadline of {:?} expired, aborting remaining tasks",
            config.grace
        );
        tasks.abort_all();
        drain(&mut tasks, &mut failure).await;
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

async fn drain(tasks: &mut JoinSet<Result<()>>, failure: &mut Option<Error>) {
    while let Some(result) = tasks.join_next().await {
        if let Some(error) = task_failure(result) {
            failure.get_or_insert(error);
        }
    }
}

fn task_failure(result: std::result::Result<Result<()>, tokio::task::JoinError>) -> Option<Error> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(join_error) if join_error.is_cancelled() => None,
        Err(join_error) => Some(Error::driver(format!("task panicked: {join_error}"))),
    }
}

async fn either_signal(sigint: &mut Signal, sigterm: &mut Signal) {
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
