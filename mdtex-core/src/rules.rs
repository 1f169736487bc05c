//! Ordered text rewrite passes.
//!
//! The preprocessor and postprocessor are each a fixed list of passes. Every
//! pass rewrites all of its own matches over the full text before the next
//! pass starts. A pass that finds nothing returns its input unchanged.

use crate::error::Result;

/// One rewrite pass over a whole text.
pub struct Rule<C> {
    pub name: &'static str,
    pub apply: fn(&str, &mut C) -> Result<String>,
}

impl<C> Rule<C> {
    pub const fn new(name: &'static str, apply: fn(&str, &mut C) -> Result<String>) -> Self {
        Self { name, apply }
    }
}

/// Run `rules` in order, feeding each the previous output.
pub fn run_rules<C>(rules: &[Rule<C>], text: &str, ctx: &mut C) -> Result<String> {
    let mut current = text.to_string();
    for rule in rules {
        let next = (rule.apply)(&current, ctx)?;
        if next != current {
            log::trace!("rule '{}' rewrote text ({} -> {} bytes)", rule.name, current.len(), next.len());
        }
        current = next;
    }
    Ok(current)
}
