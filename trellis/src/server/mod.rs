//! Worker orchestration: one runtime per thread, engines built per worker,
//! shutdown fanned out over oneshot channels.

use std::{io, rc::Rc};

use futures::channel::oneshot;
use service_async::MakeService;
use trellis_core::{
    config::{AppConfig, ListenerConfig},
    listener::{Listener, ListenerBuilder},
};
use trellis_services::http::{EngineBuilder, HttpConnService};

mod runtime;
use runtime::WorkerRuntime;

pub type RouteSetup = fn(&mut EngineBuilder);

pub fn run(config: AppConfig, setup: RouteSetup) -> anyhow::Result<()> {
    let workers = config.runtime.worker_threads.max(1);
    let cores = if config.runtime.cpu_affinity {
        std::thread::available_parallelism().ok()
    } else {
        None
    };

    let mut shutdown_handles = Vec::with_capacity(workers);
    let mut joins = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let config = config.clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        shutdown_handles.push(shutdown_tx);

        let join = std::thread::Builder::new()
            .name(format!("trellis-worker-{worker_id}"))
            .spawn(move || {
                if let Some(cores) = cores {
                    let core = worker_id % cores;
                    if let Err(e) = monoio::utils::bind_to_cpu_set([core]) {
                        tracing::warn!("binding worker {worker_id} to core {core} failed: {e}");
                    }
                }
                let mut runtime = match WorkerRuntime::build(&config.runtime) {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("worker {worker_id} could not build its runtime: {e:?}");
                        return;
                    }
                };
                if let Err(e) = runtime.block_on(worker(config, setup, shutdown_rx)) {
                    tracing::error!("worker {worker_id} exited with error: {e:?}");
                }
            })?;
        joins.push(join);
    }

    for join in joins {
        let _ = join.join();
    }
    drop(shutdown_handles);
    Ok(())
}

async fn worker(
    config: AppConfig,
    setup: RouteSetup,
    shutdown: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let mut builder = EngineBuilder::with_config(config.engine);
    setup(&mut builder);
    let engine = Rc::new(builder.build()?);

    let listener = build_listener(&config.listener)?;
    let service = Rc::new(HttpConnService::factory(engine.clone(), config.server).make()?);

    trellis_services::serve(listener, service, shutdown).await;
    engine.shutdown().await;
    Ok(())
}

fn build_listener(config: &ListenerConfig) -> io::Result<Listener> {
    match config {
        ListenerConfig::Socket(addr) => {
            ListenerBuilder::bind_tcp(*addr, Default::default())?.build()
        }
        #[cfg(unix)]
        ListenerConfig::Unix(path) => ListenerBuilder::bind_unix(path)?.build(),
    }
}
