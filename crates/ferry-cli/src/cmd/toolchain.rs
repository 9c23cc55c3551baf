//! `ferry toolchain`.

use std::sync::Arc;

use anyhow::Result;
use ferry_core::signature::{GpgVerifier, SignatureCheck, SignaturePolicy};
use ferry_core::{Context, ToolchainOptions, ToolchainStore};

use crate::ToolchainArgs;

/// Build store options; signatures are required unless a flag relaxes them.
pub fn options(args: ToolchainArgs) -> ToolchainOptions {
    let policy = if args.no_signature {
        SignaturePolicy::Skip
    } else if args.warn_signature {
        SignaturePolicy::Warn
    } else {
        SignaturePolicy::Require
    };
    let defaults = ToolchainOptions::default();
    ToolchainOptions {
        dest: args.dest,
        url: args.url.unwrap_or(defaults.url),
        archive: args.archive,
        specs: args.specs,
        targets: args.targets,
        components: args.components,
        cross: args.cross,
        assume_ok: args.assume_ok,
        signature: SignatureCheck::new(policy, Arc::new(GpgVerifier::new(args.gpg_homedir))),
    }
}

/// Run the toolchain COMMANDs.
pub async fn run(ctx: Context, args: ToolchainArgs) -> Result<()> {
    let commands = args.commands.clone();
    ToolchainStore::new(ctx, options(args))
        .run(&commands)
        .await?;
    Ok(())
}
