use std::path::Path;
use std::time::Duration;

use repoyard::*;

pub fn options(dir: &Path) -> EngineOptions {
    EngineOptions {
        lock_timeout: Duration::from_secs(5),
        ..EngineOptions::new(dir.join("repos"))
    }
}

pub fn create_engine(dir: &Path) -> Engine {
    Engine::open(options(dir)).unwrap()
}

/// An engine with one repository `user1/test_repo`.
#[allow(dead_code)]
pub fn engine_with_repo(dir: &Path) -> (Engine, Workspace) {
    let engine = create_engine(dir);
    let ws = engine.create_repository("user1", "test_repo").unwrap();
    (engine, ws)
}

#[allow(dead_code)]
pub fn tree(json: &str) -> TreeNode {
    TreeNode::from_json(json).unwrap()
}

#[allow(dead_code)]
pub fn log_hashes(ws: &Workspace) -> Vec<String> {
    ws.history()
        .log()
        .unwrap()
        .into_iter()
        .map(|c| c.commit_hash.as_str().to_string())
        .collect()
}
