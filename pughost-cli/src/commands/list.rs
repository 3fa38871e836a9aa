use std::fmt::Display;
use std::path::Path;

use color_eyre::Result;
use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, ContentArrangement,
    Table,
};

use pughost::ScenarioStore;

fn header(name: &str) -> Cell {
    Cell::new(name).add_attribute(Attribute::Bold)
}

fn optional(value: Option<impl Display>) -> Cell {
    match value {
        Some(value) => Cell::new(value),
        None => Cell::new("-"),
    }
}

pub fn exec(config: &Path) -> Result<()> {
    let store = ScenarioStore::load(config)?;

    println!(
        "localhost:{} -> {} ({})",
        store.proxy_port,
        store.upstream,
        config.display()
    );

    if store.scenarios.is_empty() {
        println!("No scenarios defined.");
        return Ok(());
    }

    let mut table = Table::new();

    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            header("Scenario"),
            header("Latency (ms)"),
            header("Jitter (ms)"),
            header("Bandwidth (KB/s)"),
            header("Packet loss"),
        ]);

    for (name, scenario) in &store.scenarios {
        table.add_row(vec![
            Cell::new(name).add_attribute(Attribute::Bold),
            optional(scenario.latency),
            optional(scenario.latency.and(scenario.jitter)),
            optional(scenario.bandwidth),
            optional(scenario.packet_loss.map(|p| format!("{:.1}%", p * 100.0))),
        ]);
    }

    println!("{table}");

    Ok(())
}
