//! `ferry crate`.

use anyhow::{Context as _, Result};
use ferry_core::{Context, CrateMirror, CrateOptions, ListFormat};
use ferry_schema::FilterSet;

use crate::CrateArgs;

/// Build mirror options, loading `--filter` and `--filter-file` patterns.
pub fn options(args: CrateArgs) -> Result<CrateOptions> {
    let mut filters = FilterSet::new();
    for arg in &args.filters {
        filters.add_arg(arg)?;
    }
    for path in &args.filter_files {
        filters
            .add_file(path)
            .with_context(|| format!("reading --filter-file {}", path.display()))?;
    }
    if !filters.is_empty() {
        tracing::debug!("{} filters active", filters.len());
    }

    let list_format = if args.show_hash {
        ListFormat::Hash
    } else if args.show_path {
        ListFormat::Path
    } else {
        ListFormat::Spec
    };

    Ok(CrateOptions {
        index: args.index,
        crates_root: args.crates_root,
        archive: args.archive,
        bundle_path: args.bundle_path,
        index_url: args.index_url,
        crates_url: args.crates_url,
        server_url: args.server_url,
        start: args.start,
        end: args.end,
        allow_missing_start: args.allow_missing_start,
        filters,
        keep_going: args.keep_going,
        assume_ok: args.assume_ok,
        good_paths: args.good_paths,
        bad_paths: args.bad_paths,
        list_format,
        prefix: args.prefix,
        archive_prefix: args.archive_prefix,
    })
}

/// Run the crate mirror COMMANDs.
pub async fn run(ctx: Context, args: CrateArgs) -> Result<()> {
    let commands = args.commands.clone();
    let opts = options(args)?;
    CrateMirror::new(ctx, opts).run(&commands).await?;
    Ok(())
}
