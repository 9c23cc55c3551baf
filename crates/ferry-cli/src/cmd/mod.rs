//! One module per subcommand: map parsed arguments onto a store and run it.

pub mod completions;
pub mod crates;
pub mod rustup;
pub mod toolchain;
