//! flowstate demo - drives a catalog search machine through a failed
//! request and a retry, printing every state it passes through.

use flowstate::{
    MachineConfig, MachineState, StateMachine, Tagged, Transition, TransitionContext,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Catalog {
    Idle,
    Loading(String),
    Loaded(Vec<String>),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CatalogTag {
    Idle,
    Loading,
    Loaded,
    Failed,
}

impl Tagged for Catalog {
    type Tag = CatalogTag;

    fn tag(&self) -> CatalogTag {
        match self {
            Catalog::Idle => CatalogTag::Idle,
            Catalog::Loading(_) => CatalogTag::Loading,
            Catalog::Loaded(_) => CatalogTag::Loaded,
            Catalog::Failed(_) => CatalogTag::Failed,
        }
    }
}

impl MachineState for Catalog {
    fn is_error(&self) -> bool {
        matches!(self, Catalog::Failed(_))
    }
}

#[derive(Debug)]
struct Search(String);

impl Tagged for Search {
    type Tag = &'static str;

    fn tag(&self) -> &'static str {
        "search"
    }
}

/// Pretends to query a remote catalog. The first call times out.
async fn fetch(query: &str, first_call: &AtomicBool) -> Result<Vec<String>, String> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if first_call.swap(false, Ordering::SeqCst) {
        return Err("upstream timed out".to_string());
    }
    Ok((1..=3).map(|i| format!("{} #{}", query, i)).collect())
}

fn load(first_call: Arc<AtomicBool>) -> Transition<Catalog, Search> {
    Transition::always(move |Search(query), ctx: TransitionContext<Catalog>| {
        let first_call = first_call.clone();
        async move {
            ctx.emit(Catalog::Loading(query.clone()));
            match fetch(&query, &first_call).await {
                Ok(items) => ctx.emit(Catalog::Loaded(items)),
                Err(reason) => ctx.emit(Catalog::Failed(reason)),
            };
            Ok(())
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    flowstate::init_logging("info");

    let config = match MachineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            if std::env::var("FLOWSTATE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            MachineConfig::default()
        }
    };

    let first_call = Arc::new(AtomicBool::new(true));
    let machine: StateMachine<Catalog, Search> = StateMachine::builder(Catalog::Idle)
        .config(config)
        .register(move |r| {
            r.on(CatalogTag::Idle, "search", load(first_call.clone()))
                .on(CatalogTag::Loaded, "search", load(first_call.clone()))
                .on(CatalogTag::Loading, "search", load(first_call));
        })
        .build()?;

    let mut states = machine.states();
    let printer = tokio::spawn(async move {
        while let Some(state) = states.next().await {
            println!("{:?}", state);
        }
    });

    machine.on_event(Search("lamps".to_string()))?;
    machine.idle().await;

    if machine.current_state().is_error() {
        tracing::info!("Search failed, retrying");
        machine.retry(Search("lamps".to_string()), Duration::from_millis(200))?;
        machine.idle().await;
    }

    machine.destroy();
    printer.await?;
    Ok(())
}
