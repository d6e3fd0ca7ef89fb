//! `cluster`: reads a TURTLES store's settled call graph and reports the
//! maximum-spanning-forest clusters found by the k-machine engine.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, OutputFormat};
use serde::Serialize;
use std::collections::BTreeMap;
use turtles::mst::{ClusterLine, GraphOptions, Supervisor};
use turtles::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose.max(cli.verbosity));

    let store = Store::open_readonly(&cli.db_file)
        .with_context(|| format!("opening store at {}", cli.db_file.display()))?;

    let options = GraphOptions {
        machines: cli.machine_count(),
        cutoff: cli.cutoff,
        undirected: cli.undirected,
    };
    let supervisor = Supervisor::new(options);
    let lines = supervisor
        .run(&store)
        .await
        .context("running the clustering engine")?;

    match cli.format {
        OutputFormat::Text => print_text(&lines),
        OutputFormat::Json => print_json(&lines)?,
    }

    Ok(())
}

/// `<groupProcId> { <procName> ... }`, one line per cluster, sorted by
/// root so repeated runs over the same store read identically.
fn print_text(lines: &[ClusterLine]) {
    let mut groups: BTreeMap<i64, Vec<&ClusterLine>> = BTreeMap::new();
    for line in lines {
        groups.entry(line.root).or_default().push(line);
    }
    for (root, mut members) in groups {
        members.sort_by_key(|m| m.proc_id);
        let names: Vec<&str> = members.iter().map(|m| m.proc_name.as_str()).collect();
        println!("{root} {{ {} }}", names.join(" "));
    }
}

#[derive(Serialize)]
struct JsonCluster {
    root: i64,
    root_name: String,
    members: Vec<JsonMember>,
}

#[derive(Serialize)]
struct JsonMember {
    proc_id: i64,
    proc_name: String,
    parent: i64,
    edge_weight: i64,
}

fn print_json(lines: &[ClusterLine]) -> Result<()> {
    let mut groups: BTreeMap<i64, Vec<&ClusterLine>> = BTreeMap::new();
    for line in lines {
        groups.entry(line.root).or_default().push(line);
    }

    let clusters: Vec<JsonCluster> = groups
        .into_iter()
        .map(|(root, mut members)| {
            members.sort_by_key(|m| m.proc_id);
            JsonCluster {
                root,
                root_name: members
                    .first()
                    .map(|m| m.root_name.clone())
                    .unwrap_or_default(),
                members: members
                    .iter()
                    .map(|m| JsonMember {
                        proc_id: m.proc_id,
                        proc_name: m.proc_name.clone(),
                        parent: m.parent,
                        edge_weight: m.edge_weight,
                    })
                    .collect(),
            }
        })
        .collect();

    let out = serde_json::to_string_pretty(&clusters)?;
    println!("{out}");
    Ok(())
}
