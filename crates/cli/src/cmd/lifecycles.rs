//! Implementation of the `lifecycle lifecycles` command.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use lifecycle_core::{BuildFile, Lifecycles};

use crate::output::{OutputFormat, print_json};

/// List the lifecycles declared by `file`, or the standard ones.
pub fn cmd_lifecycles(file: Option<&Path>, format: OutputFormat) -> Result<()> {
  let registry = match file {
    Some(path) => BuildFile::load(path)
      .with_context(|| format!("Failed to load build file: {}", path.display()))?
      .lifecycles()
      .context("Invalid lifecycle declaration")?,
    None => Lifecycles::standard(),
  };

  if format.is_json() {
    let lifecycles: Vec<_> = registry.iter().collect();
    return print_json(&lifecycles);
  }

  for lifecycle in registry.iter() {
    println!(
      "{} ({} phases)",
      lifecycle.name.if_supports_color(Stream::Stdout, |s| s.bold()),
      lifecycle.phases.len()
    );
    for phase in &lifecycle.phases {
      println!("  {}", phase);
    }
  }

  Ok(())
}
