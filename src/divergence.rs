use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::types::{CommitRef, Divergence, Repository};
use crate::vcs::Vcs;

/// Compare the default-branch head of the fork `repository` against the
/// default-branch head of its source.
///
/// Read-only and lock-free: heads are re-read on every call, so a workspace
/// being mutated concurrently may yield a transient answer. `diverged` is
/// true when the fork has commits its source cannot reach; only then is the
/// file-level diff (source head to fork head) reported.
pub(crate) fn compute<V: Vcs>(engine: &Engine<V>, repository: &Repository) -> Result<Divergence> {
    let target_ref = repository.repo_ref();
    let relation = engine
        .catalog()
        .fork_source(&target_ref)?
        .ok_or_else(|| Error::comparison_unavailable(format!("{} is not a fork", target_ref)))?;

    let source = engine.catalog().get(&relation.source)?.ok_or_else(|| {
        Error::comparison_unavailable(format!("source {} no longer exists", relation.source))
    })?;
    // The cached record may predate a rename of the default branch.
    let target = engine.catalog().get(&target_ref)?.unwrap_or_else(|| repository.clone());

    let locator = engine.locator();
    let target_root = locator.contain(&target.path)?;
    let source_root = locator.contain(&source.path)?;

    let target_head = default_head(engine, &target, target_root.path())?;
    let source_head = default_head(engine, &source, source_root.path())?;

    let comparison = engine.vcs().compare(
        target_root.path(),
        &target_head,
        source_root.path(),
        &source_head,
    )?;
    let diverged = comparison.ahead > 0;
    log::debug!(
        "{} vs {}: ahead {}, behind {}",
        target_ref,
        relation.source,
        comparison.ahead,
        comparison.behind
    );

    Ok(Divergence {
        diverged,
        ahead: comparison.ahead,
        behind: comparison.behind,
        source_head,
        target_head,
        diff: if diverged { comparison.diff } else { Vec::new() },
    })
}

fn default_head<V: Vcs>(
    engine: &Engine<V>,
    repository: &Repository,
    root: &std::path::Path,
) -> Result<CommitRef> {
    engine
        .vcs()
        .branch_head(root, &repository.default_branch)?
        .ok_or_else(|| {
            Error::comparison_unavailable(format!(
                "{} has no branch '{}'",
                repository.repo_ref(),
                repository.default_branch
            ))
        })
}
