use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::graph_utils::graph::TopicForest;
use crate::graph_utils::visibility::IdSet;

#[derive(Serialize)]
struct NodeOut<'a> {
    id: &'a str,
    label: &'a str,
    description: &'a str,
    level: u32,
    is_root: bool,
    child_hint: u32,
    parent: Option<&'a str>,
    hidden: bool,
    x: f64,
    y: f64,
}

#[derive(Serialize)]
struct EdgeOut<'a> {
    id: &'a str,
    source: &'a str,
    target: &'a str,
}

#[derive(Serialize)]
struct ForestOut<'a> {
    nodes: Vec<NodeOut<'a>>,
    edges: Vec<EdgeOut<'a>>,
}

fn node_rows<'a>(forest: &'a TopicForest, hidden: &IdSet) -> Vec<NodeOut<'a>> {
    forest
        .nodes()
        .iter()
        .map(|n| NodeOut {
            id: &n.id,
            label: &n.label,
            description: &n.description,
            level: n.level,
            is_root: n.is_root,
            child_hint: n.child_hint,
            parent: forest.parent_of(&n.id),
            hidden: hidden.contains(&n.id),
            x: n.position.x,
            y: n.position.y,
        })
        .collect()
}

fn edge_rows(forest: &TopicForest) -> Vec<EdgeOut<'_>> {
    forest
        .edges()
        .iter()
        .map(|e| EdgeOut { id: &e.id, source: &e.source, target: &e.target })
        .collect()
}

pub fn export_forest_json(forest: &TopicForest, hidden: &IdSet, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = ForestOut { nodes: node_rows(forest, hidden), edges: edge_rows(forest) };
    let mut f = File::create(path)?;
    serde_json::to_writer_pretty(&mut f, &out)?;
    // newline at end
    f.write_all(b"\n")?;
    Ok(())
}

/// Writes `<stem>_nodes.csv` and `<stem>_edges.csv` next to `base_path`.
pub fn export_forest_csv(forest: &TopicForest, hidden: &IdSet, base_path: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let parent = base_path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let stem = base_path.file_stem().and_then(|s| s.to_str()).unwrap_or("forest");
    let nodes_path = parent.join(format!("{}_nodes.csv", stem));
    let edges_path = parent.join(format!("{}_edges.csv", stem));

    {
        let mut wtr = csv::Writer::from_path(&nodes_path)?;
        for row in node_rows(forest, hidden) {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
    }
    {
        let mut wtr = csv::Writer::from_path(&edges_path)?;
        for row in edge_rows(forest) {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
    }
    Ok((nodes_path, edges_path))
}
