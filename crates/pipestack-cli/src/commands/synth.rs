//! Synthesis to disk.

use anyhow::{Context, Result};
use futures::future::try_join_all;
use pipestack_core::SynthesizedStack;
use pipestack_stacks::{App, CloudAssembly};
use std::path::{Path, PathBuf};
use tracing::info;

pub const MANIFEST_FILE: &str = "manifest.json";

pub async fn run(config_path: &Path, out: &Path, stack: Option<&str>) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let assembly = App::from_config(&config)?.synth()?;
    let written = write_assembly(&assembly, out, stack).await?;
    println!("Wrote {} files to {}", written.len(), out.display());
    Ok(())
}

/// Write the template and construct tree of each selected stack, plus a
/// manifest listing only those stacks. Returns the paths written.
pub async fn write_assembly(
    assembly: &CloudAssembly,
    out: &Path,
    stack: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let stacks: Vec<&SynthesizedStack> = match stack {
        Some(name) => vec![
            assembly
                .stack(name)
                .with_context(|| format!("no stack named '{name}'"))?,
        ],
        None => assembly.stacks.iter().collect(),
    };

    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("failed to create {}", out.display()))?;

    let mut files = Vec::new();
    for stack in &stacks {
        files.push((
            out.join(stack.template_file_name()),
            stack.template.to_json_pretty()?,
        ));
        files.push((
            out.join(stack.tree_file_name()),
            serde_json::to_string_pretty(&stack.tree.to_json())?,
        ));
    }
    files.push((
        out.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&CloudAssembly::manifest_for(&stacks))?,
    ));

    let written = try_join_all(files.into_iter().map(|(path, contents)| async move {
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote file");
        Ok::<_, anyhow::Error>(path)
    }))
    .await?;

    Ok(written)
}
