//! Crate-mirror commands and the phases they expand to.

use std::fmt;
use std::str::FromStr;

/// A single, individually invocable step of the crate mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Clone the upstream index and create the crates root.
    Init,
    /// Create an index whose `origin` is an imported bundle.
    InitImport,
    /// Fetch `origin` and merge it into the working branch.
    Pull,
    /// Delete crate files for entries the range removes.
    Prune,
    /// Fetch the crate files the range adds.
    Download,
    /// Hash the crate files the range adds.
    Verify,
    /// Write the range's bundle and crate files to an archive.
    Pack,
    /// Extract an archive into the index and crates root.
    Unpack,
    /// Publish END on `mark` and `master`.
    Mark,
    /// Point `config.json` at the mirror server.
    Config,
    /// Print the range's entries.
    List,
}

impl Phase {
    /// Command-line name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::InitImport => "init-import",
            Self::Pull => "pull",
            Self::Prune => "prune",
            Self::Download => "download",
            Self::Verify => "verify",
            Self::Pack => "pack",
            Self::Unpack => "unpack",
            Self::Mark => "mark",
            Self::Config => "config",
            Self::List => "list",
        }
    }

    /// Phases after which the range just processed may be published.
    pub fn completes_range(self) -> bool {
        matches!(self, Self::Download | Self::Verify)
    }

    /// Phases that move HEAD or replace the index content.
    pub fn moves_head(self) -> bool {
        matches!(
            self,
            Self::Init | Self::InitImport | Self::Pull | Self::Unpack | Self::Config | Self::Mark
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a user may name on the command line: a phase or a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// A single phase.
    Phase(Phase),
    /// `pull prune download mark`
    Update,
    /// `pull prune download pack mark`
    Export,
    /// `unpack pull prune verify mark`
    Import,
}

impl Command {
    /// Phases this command runs, in order.
    pub fn phases(self) -> Vec<Phase> {
        match self {
            Self::Phase(p) => vec![p],
            Self::Update => vec![Phase::Pull, Phase::Prune, Phase::Download, Phase::Mark],
            Self::Export => vec![
                Phase::Pull,
                Phase::Prune,
                Phase::Download,
                Phase::Pack,
                Phase::Mark,
            ],
            Self::Import => vec![
                Phase::Unpack,
                Phase::Pull,
                Phase::Prune,
                Phase::Verify,
                Phase::Mark,
            ],
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let phase = match s {
            "update" => return Ok(Self::Update),
            "export" => return Ok(Self::Export),
            "import" => return Ok(Self::Import),
            "init" => Phase::Init,
            "init-import" => Phase::InitImport,
            "pull" => Phase::Pull,
            "prune" => Phase::Prune,
            "download" => Phase::Download,
            "verify" => Phase::Verify,
            "pack" => Phase::Pack,
            "unpack" => Phase::Unpack,
            "mark" => Phase::Mark,
            "config" => Phase::Config,
            "list" => Phase::List,
            other => return Err(format!("invalid crate command '{other}'")),
        };
        Ok(Self::Phase(phase))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase(p) => p.fmt(f),
            Self::Update => f.write_str("update"),
            Self::Export => f.write_str("export"),
            Self::Import => f.write_str("import"),
        }
    }
}

/// Flatten commands into the phases to run, in order.
pub fn expand(commands: &[Command]) -> Vec<Phase> {
    commands.iter().flat_map(|c| c.phases()).collect()
}

/// Whether a `mark` at `phases[index]` runs without a preceding download or
/// verify in the same invocation, i.e. the caller vouches for the store.
pub fn is_standalone_mark(phases: &[Phase], index: usize) -> bool {
    phases.get(index) == Some(&Phase::Mark)
        && !phases[..index].iter().any(|p| p.completes_range())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(words: &[&str]) -> Vec<Command> {
        words.iter().map(|w| w.parse().unwrap()).collect()
    }

    #[test]
    fn composites_expand_in_order() {
        assert_eq!(
            expand(&parse(&["update"])),
            [Phase::Pull, Phase::Prune, Phase::Download, Phase::Mark]
        );
        assert_eq!(
            expand(&parse(&["import", "list"])),
            [
                Phase::Unpack,
                Phase::Pull,
                Phase::Prune,
                Phase::Verify,
                Phase::Mark,
                Phase::List
            ]
        );
        assert!("fetch".parse::<Command>().is_err());
        assert_eq!(Command::Export.to_string(), "export");
        assert_eq!(
            "init-import".parse::<Command>().unwrap(),
            Command::Phase(Phase::InitImport)
        );
    }

    #[test]
    fn standalone_marks() {
        let phases = expand(&parse(&["mark"]));
        assert!(is_standalone_mark(&phases, 0));

        let phases = expand(&parse(&["config", "mark"]));
        assert!(is_standalone_mark(&phases, 1));

        let phases = expand(&parse(&["update"]));
        assert!(!is_standalone_mark(&phases, 3));
        assert!(!is_standalone_mark(&phases, 0));
    }
}
