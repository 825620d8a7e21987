//! Merge command - fold compiled binary caches into one file

use crate::cache::{binary_sources, CacheMerger};
use crate::cli::args::MergeArgs;
use crate::config::Config;
use crate::error::DevfarmResult;
use crate::ui::{self, UiContext};
use tracing::debug;

/// Execute the merge command
pub fn execute(args: MergeArgs, config: &Config) -> DevfarmResult<()> {
    let ctx = UiContext::detect();

    let merger = match args.platform_key {
        Some(key) => CacheMerger::new(key),
        None => CacheMerger::from_config(&config.cache),
    };

    let sources = if args.from_dirs {
        let file_name = args
            .file_name
            .as_deref()
            .unwrap_or(&config.cache.compiled_program_file);
        binary_sources(&args.inputs, &config.cache.binary_subdir, file_name)
    } else {
        args.inputs
    };
    debug!("Merging {} sources into {}", sources.len(), args.output.display());

    let summary = merger.merge_to_file(&sources, &args.output)?;

    if summary.sources_missing > 0 {
        ui::step_warn_hint(
            &ctx,
            &format!("{} of {} caches not found", summary.sources_missing, sources.len()),
            "rerun with -vv to list them",
        );
    }
    ui::step_ok_detail(
        &ctx,
        &format!(
            "Merged {} records from {} caches",
            summary.records, summary.sources_read
        ),
        &summary.output.display().to_string(),
    );
    Ok(())
}
