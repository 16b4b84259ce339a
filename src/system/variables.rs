//! Description of the physical variables stored per block-row.

use crate::error::{LssError, Result};

/// Ordered list of named variables, each contributing a fixed number of
/// equations to every block-row.
///
/// A single-variable descriptor reproduces the plain interleaved layout;
/// several variables select the blocked layout used by
/// [`IndexMap`](super::IndexMap).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariablesDescriptor {
    vars: Vec<(String, usize)>,
}

impl VariablesDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// One anonymous variable with `neq` equations.
    pub fn single(neq: usize) -> Self {
        Self { vars: vec![("u".to_owned(), neq)] }
    }

    pub fn push(&mut self, name: &str, length: usize) -> Result<()> {
        if length == 0 {
            return Err(LssError::Setup(format!("variable '{}' has no equations", name)));
        }
        if self.vars.iter().any(|(n, _)| n == name) {
            return Err(LssError::Setup(format!("variable '{}' declared twice", name)));
        }
        self.vars.push((name.to_owned(), length));
        Ok(())
    }

    /// Builder form of [`push`](Self::push).
    pub fn with_variable(mut self, name: &str, length: usize) -> Result<Self> {
        self.push(name, length)?;
        Ok(self)
    }

    /// Total number of equations per block-row.
    pub fn size(&self) -> usize {
        self.vars.iter().map(|(_, l)| l).sum()
    }

    pub fn nb_vars(&self) -> usize {
        self.vars.len()
    }

    /// First equation of variable `var` inside a block-row.
    pub fn offset(&self, var: usize) -> usize {
        self.vars[..var].iter().map(|(_, l)| l).sum()
    }

    pub fn var_length(&self, var: usize) -> usize {
        self.vars[var].1
    }

    pub fn var_name(&self, var: usize) -> &str {
        &self.vars[var].0
    }

    /// Variable holding equation `eq`, with `eq`'s rank inside it.
    pub fn locate(&self, eq: usize) -> (usize, usize) {
        let mut start = 0;
        for (v, (_, len)) in self.vars.iter().enumerate() {
            if eq < start + len {
                return (v, eq - start);
            }
            start += len;
        }
        debug_assert!(false, "equation {} beyond {} equations", eq, start);
        (self.vars.len(), 0)
    }
}
