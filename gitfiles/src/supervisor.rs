use std::sync::Arc;

use gitfiles_acme::{namespace, Acme, PlumbPort};
use gitfiles_core::{dispatch, CommandHelpers, Config, Session};
use tokio::sync::mpsc;

/// Open requests waiting for the dispatcher.
const QUEUE_DEPTH: usize = 32;

pub async fn run(chatty9p: bool) -> Result<(), String> {
    let config = Config::load();
    let ns = namespace::namespace()?;
    log::debug!("namespace {}", ns.display());

    let acme = Acme::connect(&ns, chatty9p)
        .await
        .map_err(|e| format!("cannot connect to acme in {}: {}", ns.display(), e))?;
    let helpers = CommandHelpers::new(&config);
    let port = config.port.clone();
    let session = Session::new(Arc::new(acme), Arc::new(helpers), config);

    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    tokio::spawn(dispatch::run(session.clone(), rx));
    tokio::spawn(async move {
        let plumb = match PlumbPort::open(&ns, &port, chatty9p).await {
            Ok(plumb) => plumb,
            Err(e) => {
                log::warn!("cannot open plumb/{}: {}", port, e);
                return;
            }
        };
        if let Err(e) = plumb.forward(tx).await {
            log::warn!("plumb/{}: {}", port, e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("cannot wait for interrupt: {}", e))?;
    log::debug!("interrupted with {} window(s) open", session.registry().len());
    Ok(())
}
