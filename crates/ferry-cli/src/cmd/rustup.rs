//! `ferry rustup`.

use anyhow::Result;
use ferry_core::{Context, RustupOptions, RustupStore};

use crate::RustupArgs;

/// Run the rustup COMMANDs.
pub async fn run(ctx: Context, args: RustupArgs) -> Result<()> {
    let defaults = RustupOptions::default();
    let opts = RustupOptions {
        dest: args.dest,
        url: args.url.unwrap_or(defaults.url),
        archive: args.archive,
        specs: args.specs,
        targets: args.targets,
        assume_ok: args.assume_ok,
    };
    RustupStore::new(ctx, opts).run(&args.commands).await?;
    Ok(())
}
