//! `flotilla providers`: list backends.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::output::print_output;

use super::CommandContext;

#[derive(Debug, Serialize, Tabled)]
struct ProviderRow {
    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Selected")]
    selected: bool,
}

pub fn run(ctx: CommandContext) -> Result<()> {
    let selected = ctx.provider_name();
    let rows: Vec<ProviderRow> = ctx
        .registry
        .names()
        .into_iter()
        .map(|name| ProviderRow {
            name: name.to_string(),
            selected: name == selected,
        })
        .collect();

    print_output(&rows, ctx.format);
    Ok(())
}
