//! Example pipeline session.
//!
//! Run with: cargo run -p pipeline-demo [config.json]
//!
//! Without a `kernel_command` in the config, statements run against the
//! in-memory engine and are only logged.

use std::sync::Arc;

use anyhow::Context;
use remote_pipeline_core::{Engine, SessionConfig};
use remote_pipeline_session::{
    Arg, Category, ExecutionRecord, Invocation, MemoryEngine, SessionBinding, SourceFragment,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading config {path}"))?;
            SessionConfig::from_json_str(&raw).with_context(|| format!("parsing config {path}"))?
        }
        None => SessionConfig::default(),
    };

    if config.kernel_command.is_some() {
        return run_with_kernel(config).await;
    }

    let engine = MemoryEngine::new()
        .respond("count()", json!(2))
        .respond("collect()", json!([["alice"], ["bob"]]));
    let session = SessionBinding::start(Arc::new(engine) as Arc<dyn Engine>, config);
    run_pipeline(&session).await?;
    session.stop().await;
    Ok(())
}

#[cfg(feature = "kernel")]
async fn run_with_kernel(config: SessionConfig) -> anyhow::Result<()> {
    let (kernel, session) = remote_pipeline_transport::start_session(config)?;
    run_pipeline(&session).await?;
    session.stop().await;
    kernel.shutdown().await?;
    Ok(())
}

#[cfg(not(feature = "kernel"))]
async fn run_with_kernel(_config: SessionConfig) -> anyhow::Result<()> {
    anyhow::bail!("kernel_command is set but the demo was built without the kernel feature")
}

async fn run_pipeline(session: &Arc<SessionBinding>) -> anyhow::Result<()> {
    session.add_execute_listener(|record: &ExecutionRecord| {
        if record.is_ok() {
            tracing::info!(code = %record.code, "executed");
        } else {
            tracing::warn!(code = %record.code, error = ?record.error, "failed");
        }
    });

    let people = session.invoke_static(
        "sqlContext",
        "table",
        [Arg::from("people")],
        Category::TABLE,
    )?;
    let adults = people.derive(
        &people
            .call("filter")
            .call_arg(
                Invocation::new(&people, "col")
                    .arg("age")
                    .returns(Category::COLUMN),
            )
            .returns(Category::TABLE),
    )?;
    let names = adults.invoke("select", [Arg::from(vec!["name"])], Category::TABLE)?;

    // Issued without waiting; the channel keeps them in order.
    let count = names.action("count", [])?;
    let rows = names.action("collect", [])?;

    let by_dept = people.invoke("groupBy", [Arg::from("dept")], Category::GROUPED_VIEW)?;
    let sizes = by_dept.invoke("count", [], Category::TABLE)?;
    let mapped = sizes
        .invoke("toRDD", [], Category::DISTRIBUTED_SEQUENCE)?
        .invoke(
            "map",
            [Arg::from(SourceFragment::new(
                "function (row) { return row.getString(0); }",
            )?)],
            Category::DISTRIBUTED_SEQUENCE,
        )?;

    tracing::info!(output = ?count.await?.output, "count");
    tracing::info!(output = ?rows.await?.output, "collect");
    mapped.wait().await?;
    tracing::info!(
        tables = session.issued(&Category::TABLE),
        columns = session.issued(&Category::COLUMN),
        "pipeline done"
    );
    Ok(())
}
