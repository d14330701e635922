use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ListSession, LoadOutcome, LocalFilter, LogErrors, ODataSource, PagedCollectionLoader,
    ViewModelSink, ViewUpdate,
};
use serde_json::json;
use shared::{order::DecisionLog, record::Record};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod views;

use config::{load_settings, Settings, SETTINGS_FILE};
use views::{preset, ViewName};

#[derive(Parser, Debug)]
#[command(name = "backoffice", about = "Browse customers, orders and invoices of an OData service")]
struct Cli {
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
    /// Overrides the service root from the settings file and environment.
    #[arg(long)]
    service_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct ListArgs {
    /// Server-side search over the view's search fields.
    #[arg(long)]
    search: Option<String>,
    /// In-memory filter on the loaded records: `Field=value` or `Field~text`.
    #[arg(long = "where")]
    filter: Option<LocalFilter>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long, requires = "sort")]
    desc: bool,
    /// Extra pages to fetch after the first one.
    #[arg(long, default_value_t = 0)]
    more: usize,
    #[arg(long)]
    page_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    List {
        #[arg(value_enum)]
        view: ViewName,
        #[command(flatten)]
        args: ListArgs,
    },
    /// Lists orders with their status, after applying simulated decisions.
    Orders {
        #[command(flatten)]
        args: ListArgs,
        #[arg(long)]
        approve: Vec<String>,
        #[arg(long)]
        decline: Vec<String>,
    },
}

struct TraceView;

impl ViewModelSink for TraceView {
    fn publish(&self, update: ViewUpdate) {
        debug!(
            records = update.records.len(),
            has_more = update.has_more,
            sort = ?update.sort,
            query = ?update.query,
            "view updated"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(&cli.config)?;
    if let Some(service_url) = cli.service_url {
        settings.service_url = service_url;
    }

    match cli.command {
        Command::List { view, args } => {
            let session = open_session(&settings, view, &args).await?;
            let displayed = session.displayed().await;
            for record in &displayed {
                println!("{}", serde_json::to_string(record)?);
            }
            print_summary(&session, displayed.len()).await;
        }
        Command::Orders {
            args,
            approve,
            decline,
        } => {
            let session = open_session(&settings, ViewName::Orders, &args).await?;
            let base = session
                .snapshot()
                .await
                .map(|state| state.base_records().to_vec())
                .unwrap_or_default();

            let mut decisions = DecisionLog::default();
            for order_id in &approve {
                let order = find_order(&base, &decisions, order_id)?;
                decisions.approve(order)?;
                info!(order_id = %order_id, "order approved");
            }
            for order_id in &decline {
                let order = find_order(&base, &decisions, order_id)?;
                decisions.decline(order)?;
                info!(order_id = %order_id, "order declined");
            }

            let displayed = session.displayed().await;
            for order in &displayed {
                let line = json!({ "status": decisions.status_of(order), "order": order });
                println!("{line}");
            }
            print_summary(&session, displayed.len()).await;
        }
    }

    Ok(())
}

async fn open_session(
    settings: &Settings,
    view: ViewName,
    args: &ListArgs,
) -> Result<ListSession<ODataSource>> {
    let mut view_preset = preset(view, settings);
    if let Some(page_size) = args.page_size {
        view_preset.page_size = page_size.max(1);
    }

    let source = ODataSource::new(&settings.service_url)
        .with_context(|| format!("invalid service url '{}'", settings.service_url))?
        .with_policy(settings.fetch_policy());
    let loader = PagedCollectionLoader::new(source)
        .with_view_sink(Arc::new(TraceView))
        .with_error_sink(Arc::new(LogErrors));
    info!(
        service_url = %settings.service_url,
        entity_set = %view_preset.endpoint.entity_set,
        page_size = view_preset.page_size,
        "opening list"
    );
    let session = ListSession::new(loader, view_preset.endpoint, view_preset.page_size);

    ensure_loaded(session.open().await?)?;
    if let Some(query) = &args.search {
        ensure_loaded(session.search(query).await?)?;
    }
    for _ in 0..args.more {
        let outcome = session.load_more().await?;
        let exhausted = !outcome.state.has_more();
        ensure_loaded(outcome)?;
        if exhausted {
            break;
        }
    }

    if args.filter.is_some() {
        session.filter(args.filter.clone())?;
    }
    if let Some(field) = &args.sort {
        session.sort(field)?;
        if args.desc {
            session.sort(field)?;
        }
    }

    Ok(session)
}

fn ensure_loaded(outcome: LoadOutcome) -> Result<()> {
    match outcome.error {
        Some(err) => Err(anyhow!(err)),
        None => Ok(()),
    }
}

fn find_order<'a>(base: &'a [Record], decisions: &DecisionLog, order_id: &str) -> Result<&'a Record> {
    base.iter()
        .find(|order| decisions.order_id(order).as_deref() == Some(order_id))
        .ok_or_else(|| anyhow!("order {order_id} is not among the loaded orders"))
}

async fn print_summary(session: &ListSession<ODataSource>, shown: usize) {
    if let Some(state) = session.snapshot().await {
        println!(
            "# {} shown of {} loaded, has_more={}",
            shown,
            state.base_records().len(),
            state.has_more()
        );
    }
}
