//! `build` and `migrate`

use serde::Serialize;

use super::Context;

#[derive(Debug, Serialize)]
struct Applied<'a> {
    data_source: String,
    operation: &'a str,
    applied: Vec<i64>,
}

fn describe(applied: &Applied<'_>) -> String {
    match applied.applied.as_slice() {
        [] => format!("{}: schema already current", applied.data_source),
        versions => format!(
            "{}: {} applied {} migration(s): {}",
            applied.data_source,
            applied.operation,
            versions.len(),
            versions
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

pub async fn build(ctx: &Context) -> anyhow::Result<()> {
    let applied = Applied {
        data_source: ctx.database.data_source(),
        operation: "build",
        applied: ctx.database.build().await?,
    };
    ctx.emit(&applied, || describe(&applied))
}

pub async fn migrate(ctx: &Context) -> anyhow::Result<()> {
    let applied = Applied {
        data_source: ctx.database.data_source(),
        operation: "migrate",
        applied: ctx.database.migrate().await?,
    };
    ctx.emit(&applied, || describe(&applied))
}
