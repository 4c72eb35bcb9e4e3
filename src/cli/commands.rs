use std::collections::HashMap;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::interval;

use crate::app::{AppContext, Result};
use crate::cli::SweepArgs;
use crate::config::format_duration;
use crate::domain::{FeedItem, PollStatus};
use crate::events::{EventSink, PollEvent};
use crate::scheduler::{SweepOptions, SweepReport};
use crate::store::{ListOptions, Record, FEED_ITEMS, RESOURCES};

pub struct AddOptions {
    pub title: Option<String>,
    pub disabled: bool,
    pub timeout: Option<Duration>,
    pub max_age: Option<Duration>,
}

pub fn add_resource(ctx: &AppContext, url: &str, options: AddOptions) -> Result<()> {
    let mut resource = ctx.new_resource(url)?;
    resource.title = options.title;
    resource.disabled = options.disabled;
    if let Some(timeout) = options.timeout {
        resource.timeout = timeout;
    }
    if let Some(max_age) = options.max_age {
        resource.max_age = max_age;
    }

    match ctx.store.create(RESOURCES, Record::from_model(&resource)?) {
        Ok(_) => {
            println!("Added resource: {}", resource.url);
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            println!("Resource already exists: {}", resource.url);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub fn list_resources(ctx: &AppContext) -> Result<()> {
    let resources = ctx.resources()?;

    if resources.is_empty() {
        println!("No resources");
        return Ok(());
    }

    for resource in resources {
        let checked = if resource.has_been_polled() {
            resource
                .last_validated
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        } else {
            "never".to_string()
        };
        let state = if resource.disabled { " (disabled)" } else { "" };

        println!(
            "{}{}\n  {}  status {}, checked {}, max age {}",
            resource.display_title(),
            state,
            resource.url,
            resource.status,
            checked,
            format_duration(resource.max_age)
        );
        if let Some(error) = &resource.last_error {
            println!("  last error: {}", error);
        }
    }

    Ok(())
}

pub fn list_items(ctx: &AppContext, limit: usize, order_by: &str) -> Result<()> {
    let options = ListOptions::new().order_by(order_by).limit(limit);
    let items: Vec<FeedItem> = ctx
        .store
        .list(FEED_ITEMS, &options)?
        .into_iter()
        .map(|record| record.into_model())
        .collect::<Result<_>>()?;

    if items.is_empty() {
        println!("No items");
        return Ok(());
    }

    for item in items {
        let date = item
            .published
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "          ".to_string());

        println!("{} {}", date, item.display_title());
        if let Some(link) = &item.link {
            println!("           {}", link);
        }
    }

    Ok(())
}

fn sweep_options(ctx: &AppContext, args: &SweepArgs, events: EventSink) -> SweepOptions {
    SweepOptions {
        concurrency: args.concurrency.unwrap_or(ctx.config.poll.concurrency),
        max_age: args.max_age,
        ingest: !args.no_ingest,
        events,
    }
}

/// Print one line per finished poll.
async fn print_progress(mut rx: UnboundedReceiver<PollEvent>, urls: HashMap<String, String>) {
    let url = |id: &str| urls.get(id).map(String::as_str).unwrap_or("?").to_string();

    while let Some(event) = rx.recv().await {
        match event {
            PollEvent::Status {
                resource_id,
                status,
            } => {
                let marker = match status {
                    PollStatus::Http(200) => "+",
                    PollStatus::Http(304) => "=",
                    _ => "!",
                };
                println!("  {} {:>7} {}", marker, status.to_string(), url(&resource_id));
            }
            PollEvent::Disabled { resource_id } => {
                println!("  - {:>7} {}", "off", url(&resource_id))
            }
            PollEvent::Abort => println!("Aborting, waiting for running polls..."),
            _ => {}
        }
    }
}

/// Run one sweep over every stored resource. Ctrl-C aborts the sweep and
/// waits for in-flight polls to finish.
pub async fn poll(ctx: &AppContext, args: &SweepArgs) -> Result<SweepReport> {
    let resources = ctx.resources()?;

    if resources.is_empty() {
        println!("No resources to poll");
        return Ok(SweepReport::default());
    }

    println!("Polling {} resources...", resources.len());

    let urls = resources
        .iter()
        .map(|r| (r.id.clone(), r.url.clone()))
        .collect();
    let (events, rx) = EventSink::channel();
    let printer = tokio::spawn(print_progress(rx, urls));

    let sweep = ctx
        .scheduler
        .poll_all(resources, sweep_options(ctx, args, events))?;

    let abort = sweep.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let report = sweep.wait().await;
    interrupt.abort();
    // The sink is gone with the sweep, so the printer drains and stops
    let _ = printer.await;

    let report = report?;
    println!(
        "Poll complete: {} fetched, {} fresh, {} disabled, {} skipped, {} failed, {} new items",
        report.polled,
        report.fresh,
        report.disabled,
        report.skipped,
        report.failed,
        report.items_new
    );
    Ok(report)
}

/// Sweep every `every` until Ctrl-C.
pub async fn watch(ctx: &AppContext, every: Duration, args: &SweepArgs) -> Result<()> {
    println!(
        "Watching resources every {} (Ctrl-C to stop)",
        format_duration(every)
    );

    let mut timer = interval(every.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let start = Utc::now();
        println!("[{}] Running scheduled poll...", Local::now().format("%Y-%m-%d %H:%M:%S"));

        match poll(ctx, args).await {
            Ok(report) if report.aborted => break,
            Ok(_) => {}
            Err(e) => tracing::error!("Scheduled poll failed: {}", e),
        }

        let elapsed = Utc::now().signed_duration_since(start);
        tracing::info!(
            "Poll took {:.1}s",
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }

    println!("Stopped watching");
    Ok(())
}
