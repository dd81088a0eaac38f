// topic-loom: drive a topic forest from the shell.
// Build with: cargo build --bin topic-loom

use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};

use topic_loom::explorer::{ExpansionOutcome, Explorer};
use topic_loom::export::{export_forest_csv, export_forest_json};
use topic_loom::graph_utils::graph::Position;
use topic_loom::graph_utils::view::{Emphasis, ForestView};
use topic_loom::knowledge::{KnowledgeSource, PayloadFileSource};
use topic_loom::persistence::persist::PersistedForest;
use topic_loom::persistence::settings::AppSettings;

fn cli() -> Command {
    let node = || Arg::new("node").required(true).help("Node id");
    let payload = || {
        Arg::new("payload")
            .long("payload")
            .value_name("FILE")
            .value_parser(value_parser!(PathBuf))
            .help("Read the generated payload from a JSON file instead of the knowledge service")
    };
    Command::new("topic-loom")
        .about("Topic-Loom: grow, fold and lay out an exploratory topic forest")
        .arg(
            Arg::new("state_dir")
                .long("state-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Directory of the saved forest (overrides settings)"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("seed").about("Start a new topic").arg(Arg::new("topic").required(true)).arg(payload()))
        .subcommand(Command::new("expand").about("Grow children under a node").arg(node()).arg(payload()))
        .subcommand(Command::new("toggle").about("Fold or unfold a node").arg(node()))
        .subcommand(Command::new("delete").about("Delete a node and its branch").arg(node()))
        .subcommand(
            Command::new("rename")
                .about("Change a node label")
                .arg(node())
                .arg(Arg::new("label").required(true)),
        )
        .subcommand(
            Command::new("move")
                .about("Pin a node at a position until the next layout")
                .arg(node())
                .arg(Arg::new("x").required(true).allow_hyphen_values(true).value_parser(value_parser!(f64)))
                .arg(Arg::new("y").required(true).allow_hyphen_values(true).value_parser(value_parser!(f64))),
        )
        .subcommand(
            Command::new("show")
                .about("Print the forest")
                .arg(Arg::new("focus").long("focus").value_name("NODE").help("Highlight a node's lineage"))
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Print the renderer view as JSON")),
        )
        .subcommand(Command::new("layout").about("Re-run the layout"))
        .subcommand(
            Command::new("export")
                .about("Export nodes and edges")
                .arg(Arg::new("path").required(true).value_parser(value_parser!(PathBuf)))
                .arg(Arg::new("csv").long("csv").action(ArgAction::SetTrue).help("Write CSV instead of JSON")),
        )
        .subcommand(Command::new("snapshot").about("Save a timestamped copy of the forest"))
        .subcommand(Command::new("versions").about("List saved snapshots, newest first"))
        .subcommand(Command::new("clear").about("Delete the whole forest"))
}

fn knowledge_source(matches: &ArgMatches, settings: &AppSettings) -> Result<Box<dyn KnowledgeSource>> {
    if let Some(path) = matches.get_one::<PathBuf>("payload") {
        return Ok(Box::new(PayloadFileSource::new(path.clone())));
    }
    #[cfg(feature = "ollama")]
    {
        let source = topic_loom::knowledge::ollama::OllamaSource::new(
            &settings.knowledge_endpoint,
            &settings.knowledge_model,
        )?;
        return Ok(Box::new(source));
    }
    #[cfg(not(feature = "ollama"))]
    {
        let _ = settings;
        Err(anyhow!("no knowledge source: pass --payload FILE or build with the `ollama` feature"))
    }
}

fn node_arg(matches: &ArgMatches) -> Result<&str> {
    matches
        .get_one::<String>("node")
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing node id"))
}

fn report(outcome: ExpansionOutcome) -> Result<()> {
    match outcome {
        ExpansionOutcome::Merged(summary) => {
            println!("added {} nodes, {} edges", summary.added_nodes, summary.added_edges);
            if let Some(root) = summary.root {
                println!("root {}", root);
            }
            Ok(())
        }
        ExpansionOutcome::Failed { reason } => bail!("expansion failed: {}", reason),
        ExpansionOutcome::Ignored => Ok(()),
    }
}

fn print_tree(view: &ForestView, explorer: &Explorer) {
    let forest = explorer.forest();
    let mut stack: Vec<(&str, usize)> = forest
        .nodes()
        .iter()
        .filter(|n| forest.parent_of(&n.id).is_none())
        .rev()
        .map(|n| (n.id.as_str(), 0))
        .collect();
    while let Some((id, depth)) = stack.pop() {
        let Some(nv) = view.node(id) else { continue };
        if nv.hidden {
            continue;
        }
        let marker = if nv.collapsed { "+" } else if nv.node.child_hint > 0 { "-" } else { "*" };
        let dim = if nv.emphasis == Emphasis::Dimmed { " (dimmed)" } else { "" };
        println!(
            "{}{} {}  [{}] @ ({:.0}, {:.0}){}",
            "  ".repeat(depth),
            marker,
            nv.node.label,
            nv.node.id,
            nv.node.position.x,
            nv.node.position.y,
            dim
        );
        for child in forest.children_of(id).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
}

fn run() -> Result<()> {
    let matches = cli().get_matches();
    let mut settings = AppSettings::load().unwrap_or_else(|e| {
        log::warn!("settings unreadable, using defaults: {}", e);
        AppSettings::default()
    });
    if let Some(dir) = matches.get_one::<PathBuf>("state_dir") {
        settings.autosave_override = Some(dir.clone());
    }
    let store = settings.file_store();
    let mut explorer = Explorer::open(Box::new(store.clone()), settings.layout.clone());

    match matches.subcommand() {
        Some(("seed", sub)) => {
            let topic = sub.get_one::<String>("topic").ok_or_else(|| anyhow!("missing topic"))?;
            let source = knowledge_source(sub, &settings)?;
            report(explorer.expand(source.as_ref(), topic, None)?)?;
        }
        Some(("expand", sub)) => {
            let id = node_arg(sub)?;
            let topic = explorer
                .forest()
                .get_node(id)
                .map(|n| n.label.clone())
                .ok_or_else(|| anyhow!("node not found: {}", id))?;
            let source = knowledge_source(sub, &settings)?;
            report(explorer.expand(source.as_ref(), &topic, Some(id))?)?;
        }
        Some(("toggle", sub)) => {
            let id = node_arg(sub)?;
            let collapsed = explorer.toggle_collapse(id)?;
            println!("{} {}", id, if collapsed { "collapsed" } else { "expanded" });
        }
        Some(("delete", sub)) => {
            let removed = explorer.delete_branch(node_arg(sub)?)?;
            println!("removed {} nodes, {} edges", removed.nodes.len(), removed.edges.len());
        }
        Some(("rename", sub)) => {
            let label = sub.get_one::<String>("label").ok_or_else(|| anyhow!("missing label"))?;
            explorer.edit_label(node_arg(sub)?, label)?;
        }
        Some(("move", sub)) => {
            let x = *sub.get_one::<f64>("x").ok_or_else(|| anyhow!("missing x"))?;
            let y = *sub.get_one::<f64>("y").ok_or_else(|| anyhow!("missing y"))?;
            explorer.commit_drag(node_arg(sub)?, Position::new(x, y))?;
        }
        Some(("show", sub)) => {
            explorer.set_focus(sub.get_one::<String>("focus").map(String::as_str))?;
            let view = explorer.view();
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_tree(&view, &explorer);
            }
        }
        Some(("layout", _)) => {
            let moved = explorer.relayout();
            println!("{}", if moved { "layout updated" } else { "layout unchanged" });
        }
        Some(("export", sub)) => {
            let path = sub.get_one::<PathBuf>("path").ok_or_else(|| anyhow!("missing path"))?;
            let path = if path.is_relative() { settings.export_dir().join(path) } else { path.clone() };
            if sub.get_flag("csv") {
                let (nodes, edges) = export_forest_csv(explorer.forest(), explorer.hidden(), &path)?;
                println!("wrote {} and {}", nodes.display(), edges.display());
            } else {
                export_forest_json(explorer.forest(), explorer.hidden(), &path)?;
                println!("wrote {}", path.display());
            }
        }
        Some(("snapshot", _)) => {
            let state = PersistedForest::from_runtime(explorer.forest(), explorer.collapsed());
            let path = store.save_versioned(&state)?;
            println!("saved {}", path.display());
        }
        Some(("versions", _)) => {
            for p in store.list_versions()? {
                println!("{}", p.display());
            }
        }
        Some(("clear", _)) => {
            explorer.clear();
            println!("forest cleared");
        }
        _ => bail!("unrecognized command"),
    }

    if let Some(notice) = explorer.last_notice() {
        eprintln!("{}", notice);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
