//! Acquisition: materialize a plugin tree from a source URI into a local
//! root, by local copy or `git2` clone.

use std::path::Path;

use crate::plugin::PluginRecord;

const DEFAULT_BRANCH: &str = "master";

/// Returns `true` on success. Emits only to the plugin's own log sink,
/// never to the global one.
pub fn acquire(record: &mut PluginRecord) -> bool {
    let source = record.source_uri.clone();
    let source_path = Path::new(&source);

    if source_path.exists() {
        return copy_local(record, source_path);
    }
    git_acquire(record, &source)
}

fn copy_local(record: &mut PluginRecord, source: &Path) -> bool {
    if record.root.exists() {
        tracing::warn!(target: "aigis::boot", plugin = %record.name, "local copy target already exists, leaving untouched");
        return true;
    }
    match copy_dir_recursive(source, &record.root) {
        Ok(()) => {
            tracing::info!(target: "aigis::boot", plugin = %record.name, "copied plugin tree from {}", source.display());
            true
        }
        Err(e) => {
            tracing::error!(plugin = %record.name, "copy failed: {e}");
            false
        }
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let dest_path = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}

fn git_acquire(record: &mut PluginRecord, source: &str) -> bool {
    if record.root.exists() {
        match git2::Repository::open(&record.root).and_then(|repo| pull(&repo)) {
            Ok(()) => tracing::info!(target: "aigis::boot", plugin = %record.name, "pulled latest"),
            Err(e) => tracing::warn!(plugin = %record.name, "git pull failed, continuing with existing tree: {e}"),
        }
        return true;
    }

    let mut builder = git2::build::RepoBuilder::new();
    builder.branch(DEFAULT_BRANCH);
    match builder.clone(source, &record.root) {
        Ok(_) => {
            tracing::info!(target: "aigis::boot", plugin = %record.name, "cloned from {source}");
            true
        }
        Err(e) => {
            tracing::error!(plugin = %record.name, "clone failed: {e}");
            false
        }
    }
}

fn pull(repo: &git2::Repository) -> Result<(), git2::Error> {
    let mut remote = repo.find_remote("origin")?;
    remote.fetch(&[DEFAULT_BRANCH], None, None)?;
    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;
    if analysis.is_up_to_date() || !analysis.is_fast_forward() {
        return Ok(());
    }
    let refname = format!("refs/heads/{DEFAULT_BRANCH}");
    let mut reference = repo.find_reference(&refname)?;
    reference.set_target(fetch_commit.id(), "fast-forward")?;
    repo.set_head(&refname)?;
    repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))
}
